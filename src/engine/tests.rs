use tokio_test::{assert_err, assert_ok};

use super::mutations::{BookingRequest, RecurrenceRequest};
use super::*;
use crate::notify::Payload;

fn test_wal_path(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join("leavedesk_test_engine");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    let _ = std::fs::remove_file(&path);
    path
}

fn admin() -> Actor {
    Actor::new("root", Role::Admin)
}

fn ana() -> Actor {
    Actor::new("ana", Role::Staff)
}

fn jefe() -> Actor {
    Actor::new("jefe", Role::Management)
}

fn in_days(n: i64) -> Day {
    Day::today().add_days(n)
}

fn employee(id: &str, role: Role) -> Employee {
    Employee {
        id: id.into(),
        role,
        quota_override: 0,
        email: Some(format!("{id}@school.example")),
    }
}

/// Engine with periods 1..=6, one room, three employees and a full rule set.
async fn school(name: &str) -> (Engine, Ulid) {
    let engine = bare_school(name).await;
    for (key, value) in [
        (ConstraintKey::Quota, 2),
        (ConstraintKey::Concurrent, 2),
        (ConstraintKey::NoticeMin, 2),
        (ConstraintKey::NoticeMax, 30),
        (ConstraintKey::Consecutive, 2),
    ] {
        engine.set_constraint(&admin(), key, value).await.unwrap();
    }
    let room = Ulid::new();
    engine.create_room(&admin(), room, "Library".into()).await.unwrap();
    (engine, room)
}

async fn bare_school(name: &str) -> Engine {
    let engine = Engine::new(test_wal_path(name), Arc::new(NotifyHub::new())).unwrap();
    for p in 1..=6 {
        engine.define_period(&admin(), p, format!("Period {p}")).await.unwrap();
    }
    for (id, role) in [("ana", Role::Staff), ("luis", Role::Staff), ("jefe", Role::Management)] {
        engine.upsert_employee(&admin(), employee(id, role)).await.unwrap();
    }
    engine
}

async fn file(engine: &Engine, actor: &Actor, person: &str, date: Day) -> Result<LeaveReceipt, EngineError> {
    engine
        .create_leave_request(actor, Ulid::new(), person.into(), date, Category::PERSONAL_DAYS, "family".into())
        .await
}

fn booking(room_id: Ulid, date: Day, start: PeriodId, end: PeriodId) -> BookingRequest {
    BookingRequest {
        id: Ulid::new(),
        room_id,
        date,
        start_period: start,
        end_period: end,
        owner: "ana".into(),
        description: "exam".into(),
    }
}

fn series(room_id: Ulid, from: Day, to: Day, frequency: Frequency) -> RecurrenceRequest {
    RecurrenceRequest {
        id: Ulid::new(),
        room_id,
        occupant: "luis".into(),
        start_period: 2,
        end_period: 3,
        from,
        to,
        frequency,
        description: "choir".into(),
    }
}

fn rejection_code(result: Result<LeaveReceipt, EngineError>) -> Option<&'static str> {
    match result {
        Err(EngineError::Rejected(r)) => Some(r.code()),
        _ => None,
    }
}

// ── Leave requests ───────────────────────────────────────

#[tokio::test]
async fn leave_request_starts_pending_and_notifies() {
    let (engine, _) = school("leave_pending.wal").await;
    let mut rx = engine.notify.subscribe();

    let receipt = assert_ok!(file(&engine, &ana(), "ana", in_days(5)).await);
    assert_eq!(receipt.status, Status::Pending);
    assert!(!receipt.obfuscate);

    let stored = engine.get_leave_request(&receipt.id).await.unwrap();
    assert_eq!(stored.status, Status::Pending);
    assert_eq!(stored.created_by, "ana");

    let n = rx.recv().await.unwrap();
    assert_eq!(n.recipient, "ana");
    assert_eq!(n.email.as_deref(), Some("ana@school.example"));
    assert!(matches!(n.payload, Payload::LeaveRequested { .. }));
}

#[tokio::test]
async fn leave_for_unknown_employee_not_found() {
    let (engine, _) = school("leave_unknown.wal").await;
    let result = file(&engine, &jefe(), "ghost", in_days(5)).await;
    assert!(matches!(result, Err(EngineError::NotFound(Entity::Employee))));
}

#[tokio::test]
async fn staff_cannot_file_for_someone_else() {
    let (engine, _) = school("leave_other.wal").await;
    let result = file(&engine, &ana(), "luis", in_days(5)).await;
    assert!(matches!(result, Err(EngineError::Forbidden(_))));
    assert_ok!(file(&engine, &jefe(), "luis", in_days(5)).await);
}

#[tokio::test]
async fn unknown_category_is_invalid() {
    let (engine, _) = school("leave_bad_category.wal").await;
    let result = engine
        .create_leave_request(&ana(), Ulid::new(), "ana".into(), in_days(5), Category(99), String::new())
        .await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
}

#[tokio::test]
async fn missing_rules_are_reported_not_defaulted() {
    let engine = bare_school("leave_not_configured.wal").await;
    engine.set_constraint(&admin(), ConstraintKey::Quota, 3).await.unwrap();
    match file(&engine, &ana(), "ana", in_days(5)).await {
        Err(EngineError::NotConfigured { missing, .. }) => {
            assert_eq!(
                missing,
                vec![
                    ConstraintKey::Concurrent,
                    ConstraintKey::NoticeMin,
                    ConstraintKey::NoticeMax,
                    ConstraintKey::Consecutive,
                ]
            );
        }
        other => panic!("expected NotConfigured, got {other:?}"),
    }
}

#[tokio::test]
async fn exempt_category_needs_no_rules() {
    let engine = bare_school("leave_exempt.wal").await;
    let result = engine
        .create_leave_request(&ana(), Ulid::new(), "ana".into(), Day::today(), Category(14), "doctor".into())
        .await;
    assert_ok!(result);
}

#[tokio::test]
async fn notice_window_boundaries() {
    let (engine, _) = school("leave_notice.wal").await;
    assert_eq!(rejection_code(file(&engine, &ana(), "ana", in_days(1)).await), Some("notice_too_short"));
    assert_ok!(file(&engine, &ana(), "ana", in_days(2)).await);
    assert_eq!(rejection_code(file(&engine, &ana(), "ana", in_days(31)).await), Some("notice_too_long"));
}

#[tokio::test]
async fn concurrency_cap_across_people() {
    let (engine, _) = school("leave_concurrency.wal").await;
    engine.upsert_employee(&admin(), employee("marta", Role::Staff)).await.unwrap();
    let date = in_days(10);
    assert_ok!(file(&engine, &jefe(), "ana", date).await);
    assert_ok!(file(&engine, &jefe(), "luis", date).await);
    assert_eq!(rejection_code(file(&engine, &jefe(), "marta", date).await), Some("concurrency_cap"));
}

#[tokio::test]
async fn consecutive_run_cap() {
    let (engine, _) = school("leave_consecutive.wal").await;
    assert_ok!(file(&engine, &ana(), "ana", in_days(10)).await);
    assert_ok!(file(&engine, &ana(), "ana", in_days(11)).await);
    assert_eq!(rejection_code(file(&engine, &ana(), "ana", in_days(12)).await), Some("consecutive_cap"));
    assert_eq!(rejection_code(file(&engine, &ana(), "ana", in_days(9)).await), Some("consecutive_cap"));
    assert_ok!(file(&engine, &ana(), "ana", in_days(14)).await);
}

#[tokio::test]
async fn reviewed_rejections_keep_counting() {
    let (engine, _) = school("leave_rejected_counts.wal").await;
    engine.upsert_employee(&admin(), employee("marta", Role::Staff)).await.unwrap();
    let date = in_days(10);
    for person in ["ana", "luis"] {
        let receipt = file(&engine, &jefe(), person, date).await.unwrap();
        assert_ok!(engine.review_leave_request(&jefe(), receipt.id, Decision::Reject).await);
    }
    assert_eq!(rejection_code(file(&engine, &jefe(), "marta", date).await), Some("concurrency_cap"));
}

#[tokio::test]
async fn quota_rechecked_at_acceptance() {
    let (engine, _) = school("leave_quota_accept.wal").await;
    let mut ana_emp = employee("ana", Role::Staff);
    ana_emp.quota_override = 1;
    engine.upsert_employee(&admin(), ana_emp).await.unwrap();

    let first = file(&engine, &ana(), "ana", in_days(5)).await.unwrap();
    let second = file(&engine, &ana(), "ana", in_days(15)).await.unwrap();

    let accepted = assert_ok!(engine.review_leave_request(&jefe(), first.id, Decision::Accept).await);
    assert_eq!(accepted.status, Status::Accepted);
    assert_eq!(accepted.updated_by, "jefe");

    let result = engine.review_leave_request(&jefe(), second.id, Decision::Accept).await;
    assert!(matches!(result, Err(EngineError::Rejected(Rejection::QuotaExceeded { used: 1, limit: 1 }))));
    assert_eq!(engine.get_leave_request(&second.id).await.unwrap().status, Status::Pending);

    // Creation now also refuses.
    assert_eq!(rejection_code(file(&engine, &ana(), "ana", in_days(20)).await), Some("quota_exceeded"));

    let summary = engine.quota_summary("ana").await.unwrap();
    assert_eq!((summary.used, summary.limit, summary.remaining()), (1, 1, 0));
}

#[tokio::test]
async fn acceptance_without_quota_is_not_configured() {
    let (engine, _) = school("leave_accept_unconfigured.wal").await;
    let receipt = file(&engine, &ana(), "ana", in_days(5)).await.unwrap();
    engine.set_constraint(&admin(), ConstraintKey::Quota, 0).await.unwrap();
    let result = engine.review_leave_request(&jefe(), receipt.id, Decision::Accept).await;
    assert!(matches!(result, Err(EngineError::NotConfigured { .. })));
}

#[tokio::test]
async fn reviewed_requests_are_final() {
    let (engine, _) = school("leave_terminal.wal").await;
    let receipt = file(&engine, &ana(), "ana", in_days(5)).await.unwrap();
    assert_ok!(engine.review_leave_request(&jefe(), receipt.id, Decision::Reject).await);

    for decision in [Decision::Accept, Decision::Reject] {
        let result = engine.review_leave_request(&jefe(), receipt.id, decision).await;
        assert!(matches!(result, Err(EngineError::Forbidden(_))));
    }
    assert_eq!(engine.get_leave_request(&receipt.id).await.unwrap().status, Status::Rejected);
}

#[tokio::test]
async fn staff_cannot_review() {
    let (engine, _) = school("leave_staff_review.wal").await;
    let receipt = file(&engine, &ana(), "ana", in_days(5)).await.unwrap();
    let result = engine.review_leave_request(&ana(), receipt.id, Decision::Accept).await;
    assert!(matches!(result, Err(EngineError::Forbidden(_))));
}

#[tokio::test]
async fn review_unknown_request_not_found() {
    let (engine, _) = school("leave_review_missing.wal").await;
    let result = engine.review_leave_request(&jefe(), Ulid::new(), Decision::Accept).await;
    assert!(matches!(result, Err(EngineError::NotFound(Entity::LeaveRequest(_)))));
}

#[tokio::test]
async fn only_pending_requests_can_be_deleted() {
    let (engine, _) = school("leave_delete.wal").await;
    let pending = file(&engine, &ana(), "ana", in_days(5)).await.unwrap();
    let accepted = file(&engine, &ana(), "ana", in_days(15)).await.unwrap();
    engine.review_leave_request(&jefe(), accepted.id, Decision::Accept).await.unwrap();

    let result = engine.delete_booking(&ana(), accepted.id).await;
    assert!(matches!(result, Err(EngineError::Forbidden(_))));

    let luis = Actor::new("luis", Role::Staff);
    assert!(matches!(engine.delete_booking(&luis, pending.id).await, Err(EngineError::Forbidden(_))));

    assert_ok!(engine.delete_booking(&ana(), pending.id).await);
    assert!(engine.get_leave_request(&pending.id).await.is_none());
    assert!(matches!(
        engine.delete_booking(&ana(), pending.id).await,
        Err(EngineError::NotFound(_))
    ));
}

#[tokio::test]
async fn override_bypasses_notice_but_not_quota() {
    let (engine, _) = school("leave_override.wal").await;
    let today = Day::today();
    assert_eq!(rejection_code(file(&engine, &ana(), "ana", today).await), Some("notice_too_short"));

    let grant = Ulid::new();
    assert_ok!(engine.grant_override(&jefe(), grant, "ana".into(), today).await);
    let dup = engine.grant_override(&jefe(), Ulid::new(), "ana".into(), today).await;
    assert!(matches!(dup, Err(EngineError::AlreadyExists(id)) if id == grant));

    assert_ok!(file(&engine, &ana(), "ana", today).await);

    assert_ok!(engine.revoke_override(&jefe(), grant).await);
    assert!(engine.list_overrides().await.is_empty());
}

#[tokio::test]
async fn staff_cannot_grant_overrides() {
    let (engine, _) = school("leave_override_staff.wal").await;
    let result = engine.grant_override(&ana(), Ulid::new(), "ana".into(), Day::today()).await;
    assert!(matches!(result, Err(EngineError::Forbidden(_))));
}

#[tokio::test]
async fn blocked_range_rejects_even_with_override() {
    let (engine, _) = school("leave_blocked.wal").await;
    let date = in_days(8);
    engine
        .add_blocked_range(&admin(), Ulid::new(), in_days(7), in_days(9), "evaluations".into())
        .await
        .unwrap();
    engine.grant_override(&jefe(), Ulid::new(), "ana".into(), date).await.unwrap();
    assert_eq!(rejection_code(file(&engine, &ana(), "ana", date).await), Some("blocked_date"));
    assert_ok!(file(&engine, &ana(), "ana", in_days(10)).await);
}

#[tokio::test]
async fn obfuscation_masks_other_people_for_staff() {
    let (engine, _) = school("leave_obfuscate.wal").await;
    engine.set_constraint(&admin(), ConstraintKey::Obfuscate, 1).await.unwrap();
    let receipt = file(&engine, &ana(), "ana", in_days(5)).await.unwrap();
    assert!(receipt.obfuscate);
    file(&engine, &jefe(), "luis", in_days(5)).await.unwrap();

    let seen_by_ana = engine.list_leave_requests(&ana(), &LeaveFilter::default()).await;
    let mut people: Vec<_> = seen_by_ana.iter().map(|r| r.person.as_str()).collect();
    people.sort();
    assert_eq!(people, vec!["***", "ana"]);

    let seen_by_jefe = engine.list_leave_requests(&jefe(), &LeaveFilter::default()).await;
    assert!(seen_by_jefe.iter().all(|r| r.person != "***"));
}

#[tokio::test]
async fn admin_only_rule_changes() {
    let (engine, _) = school("rules_admin.wal").await;
    let result = engine.set_constraint(&jefe(), ConstraintKey::Quota, 10).await;
    assert!(matches!(result, Err(EngineError::Forbidden(_))));
    let result = engine.set_constraint(&admin(), ConstraintKey::Quota, -1).await;
    assert!(matches!(result, Err(EngineError::Validation(_))));
    assert_ok!(engine.clear_constraint(&admin(), ConstraintKey::Quota).await);
    assert!(matches!(
        engine.clear_constraint(&admin(), ConstraintKey::Quota).await,
        Err(EngineError::NotFound(Entity::Constraint(ConstraintKey::Quota)))
    ));
}

// ── Room bookings ────────────────────────────────────────

#[tokio::test]
async fn booking_conflicts_on_overlap_only() {
    let (engine, room) = school("room_overlap.wal").await;
    let date = in_days(3);
    let first = booking(room, date, 2, 3);
    let first_id = first.id;
    assert_ok!(engine.create_room_booking(&ana(), first).await);

    let result = engine.create_room_booking(&ana(), booking(room, date, 3, 4)).await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == first_id));

    assert_ok!(engine.create_room_booking(&ana(), booking(room, date, 4, 5)).await);
    assert_ok!(engine.create_room_booking(&ana(), booking(room, date, 1, 1)).await);
    assert_ok!(engine.create_room_booking(&ana(), booking(room, date.add_days(1), 2, 3)).await);

    let day = engine.room_bookings(room, date).await.unwrap();
    let starts: Vec<_> = day.iter().map(|b| b.periods.start).collect();
    assert_eq!(starts, vec![1, 2, 4]);

    assert_eq!(engine.conflicts(room, date, 3, 6).await.unwrap().map(|b| b.id), Some(first_id));
    assert!(engine.conflicts(room, date, 6, 6).await.unwrap().is_none());
}

#[tokio::test]
async fn booking_validates_periods_and_room() {
    let (engine, room) = school("room_validate.wal").await;
    let date = in_days(3);
    assert!(matches!(
        engine.create_room_booking(&ana(), booking(room, date, 4, 2)).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_room_booking(&ana(), booking(room, date, 1, 9)).await,
        Err(EngineError::Validation(_))
    ));
    assert!(matches!(
        engine.create_room_booking(&ana(), booking(Ulid::new(), date, 1, 2)).await,
        Err(EngineError::NotFound(Entity::Room(_)))
    ));
}

#[tokio::test]
async fn booking_delete_permissions() {
    let (engine, room) = school("room_delete.wal").await;
    let req = booking(room, in_days(3), 1, 2);
    let id = req.id;
    engine.create_room_booking(&jefe(), req).await.unwrap();

    let luis = Actor::new("luis", Role::Staff);
    assert!(matches!(engine.delete_booking(&luis, id).await, Err(EngineError::Forbidden(_))));
    // The occupant may cancel a booking someone else made for them.
    assert_ok!(engine.delete_booking(&ana(), id).await);
    assert!(engine.room_bookings(room, in_days(3)).await.unwrap().is_empty());
}

#[tokio::test]
async fn room_with_bookings_cannot_be_deleted() {
    let (engine, room) = school("room_delete_busy.wal").await;
    let req = booking(room, in_days(3), 1, 2);
    let id = req.id;
    engine.create_room_booking(&ana(), req).await.unwrap();
    assert!(matches!(engine.delete_room(&admin(), room).await, Err(EngineError::Validation(_))));
    engine.delete_booking(&ana(), id).await.unwrap();
    assert_ok!(engine.delete_room(&admin(), room).await);
    assert!(engine.list_rooms().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_overlapping_bookings_admit_one() {
    let (engine, room) = school("room_race.wal").await;
    let engine = Arc::new(engine);
    let date = in_days(4);

    let mut handles = Vec::new();
    for i in 0..16u32 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let start = 1 + i % 3;
            engine.create_room_booking(&ana(), booking(room, date, start, start + 2)).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        if h.await.unwrap().is_ok() {
            ok += 1;
        }
    }
    // Every candidate covers period 3, so exactly one can win.
    assert_eq!(ok, 1);
    assert_eq!(engine.room_bookings(room, date).await.unwrap().len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_with_one_id_admit_one() {
    let (engine, room) = school("room_same_id.wal").await;
    let engine = Arc::new(engine);
    let id = Ulid::new();

    let mut handles = Vec::new();
    for i in 1..=8i64 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let mut req = booking(room, in_days(i), 1, 1);
            req.id = id;
            engine.create_room_booking(&ana(), req).await
        }));
    }
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(()) => ok += 1,
            Err(e) => assert!(matches!(e, EngineError::AlreadyExists(dup) if dup == id)),
        }
    }
    assert_eq!(ok, 1);
    let mut total = 0;
    for i in 1..=8 {
        total += engine.room_bookings(room, in_days(i)).await.unwrap().len();
    }
    assert_eq!(total, 1);
}

#[tokio::test]
async fn failed_booking_releases_its_id() {
    let (engine, room) = school("room_id_release.wal").await;
    let date = in_days(3);
    engine.create_room_booking(&ana(), booking(room, date, 1, 2)).await.unwrap();

    let retry = booking(room, date, 2, 3);
    let retry_id = retry.id;
    assert_err!(engine.create_room_booking(&ana(), retry.clone()).await);
    assert!(engine.get_room_for_booking(&retry_id).is_none());

    let mut moved = retry;
    moved.start_period = 4;
    moved.end_period = 4;
    assert_ok!(engine.create_room_booking(&ana(), moved).await);

    let other_room = Ulid::new();
    engine.create_room(&admin(), other_room, "Gym".into()).await.unwrap();
    let mut dup = booking(other_room, date, 1, 1);
    dup.id = retry_id;
    assert!(matches!(
        engine.create_room_booking(&ana(), dup).await,
        Err(EngineError::AlreadyExists(id)) if id == retry_id
    ));
    assert_eq!(engine.get_room_for_booking(&retry_id), Some(room));
}

#[tokio::test]
async fn booking_update_moves_within_the_day() {
    let (engine, room) = school("room_update.wal").await;
    let date = in_days(3);
    let own = booking(room, date, 1, 2);
    let own_id = own.id;
    let other = booking(room, date, 5, 6);
    let other_id = other.id;
    engine.create_room_booking(&ana(), own).await.unwrap();
    engine.create_room_booking(&jefe(), other).await.unwrap();

    // Overlapping its own old range is fine.
    let moved = assert_ok!(engine.update_room_booking(&ana(), own_id, 2, 4, None).await);
    assert_eq!((moved.periods.start, moved.periods.end), (2, 4));
    assert_eq!(moved.description, "exam");
    assert_eq!(moved.date, date);

    let result = engine.update_room_booking(&ana(), own_id, 3, 5, None).await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == other_id));

    let renamed = assert_ok!(engine.update_room_booking(&ana(), own_id, 1, 1, Some("revision".into())).await);
    assert_eq!(renamed.description, "revision");
    let starts: Vec<_> = engine.room_bookings(room, date).await.unwrap().iter().map(|b| b.periods.start).collect();
    assert_eq!(starts, vec![1, 5]);
}

#[tokio::test]
async fn booking_update_checks_permissions_and_periods() {
    let (engine, room) = school("room_update_checks.wal").await;
    let req = booking(room, in_days(3), 1, 2);
    let id = req.id;
    engine.create_room_booking(&ana(), req).await.unwrap();

    let luis = Actor::new("luis", Role::Staff);
    assert!(matches!(engine.update_room_booking(&luis, id, 3, 3, None).await, Err(EngineError::Forbidden(_))));
    assert!(matches!(engine.update_room_booking(&ana(), id, 4, 2, None).await, Err(EngineError::Validation(_))));
    assert!(matches!(
        engine.update_room_booking(&ana(), Ulid::new(), 1, 1, None).await,
        Err(EngineError::NotFound(Entity::Booking(_)))
    ));
    assert_ok!(engine.update_room_booking(&jefe(), id, 3, 3, None).await);
}

// ── Recurrence ───────────────────────────────────────────

#[tokio::test]
async fn recurrence_books_every_generated_date() {
    let (engine, room) = school("series_ok.wal").await;
    let mut rx = engine.notify.subscribe();
    let from = in_days(1);
    let req = series(room, from, from.add_days(4), Frequency::Daily);
    let parent = req.id;

    let receipt = assert_ok!(engine.create_recurring_booking(&ana(), req).await);
    assert_eq!(receipt, SeriesReceipt { parent_id: parent, child_count: 5 });

    let children = engine.template_children(parent).await.unwrap();
    assert_eq!(children.len(), 5);
    assert!(children.iter().all(|b| b.owner == "luis" && b.booked_by == "ana"));

    let n = rx.recv().await.unwrap();
    assert_eq!(n.recipient, "luis");
    assert!(matches!(n.payload, Payload::RecurrenceCreated { child_count: 5, .. }));
}

#[tokio::test]
async fn recurrence_is_all_or_nothing() {
    let (engine, room) = school("series_atomic.wal").await;
    let from = in_days(1);
    let blocker = booking(room, from.add_days(2), 3, 3);
    let blocker_id = blocker.id;
    engine.create_room_booking(&ana(), blocker).await.unwrap();

    let req = series(room, from, from.add_days(4), Frequency::Daily);
    let parent = req.id;
    let result = engine.create_recurring_booking(&ana(), req).await;
    assert!(matches!(result, Err(EngineError::Conflict(id)) if id == blocker_id));

    for offset in 0..5 {
        let day = engine.room_bookings(room, from.add_days(offset)).await.unwrap();
        assert!(day.iter().all(|b| b.template_id.is_none()));
    }
    assert!(engine.list_templates().is_empty());
    assert_err!(engine.template_children(parent).await);
}

#[tokio::test]
async fn recurrence_without_dates_is_rejected() {
    let (engine, room) = school("series_empty.wal").await;
    let from = in_days(1);
    let req = series(room, from, from.add_days(14), Frequency::Weekly(WeekdaySet::parse("lunes")));
    let result = engine.create_recurring_booking(&ana(), req).await;
    assert!(matches!(result, Err(EngineError::Validation(msg)) if msg == "no dates generated"));
    assert!(engine.list_templates().is_empty());
}

#[tokio::test]
async fn template_delete_keeps_children() {
    let (engine, room) = school("series_delete.wal").await;
    let from = in_days(1);
    let req = series(room, from, from.add_days(13), Frequency::Weekly(WeekdaySet::from_indices(&[0, 3])));
    let parent = req.id;
    let receipt = engine.create_recurring_booking(&ana(), req).await.unwrap();
    assert_eq!(receipt.child_count, 4);

    let luis = Actor::new("luis", Role::Staff);
    assert!(matches!(engine.delete_booking(&luis, parent).await, Err(EngineError::Forbidden(_))));
    assert_ok!(engine.delete_booking(&ana(), parent).await);

    assert!(engine.list_templates().is_empty());
    let remaining: usize = {
        let mut n = 0;
        for offset in 0..14 {
            n += engine.room_bookings(room, from.add_days(offset)).await.unwrap().len();
        }
        n
    };
    assert_eq!(remaining, 4);
}

// ── Persistence ──────────────────────────────────────────

#[tokio::test]
async fn wal_replay_restores_state() {
    let path = test_wal_path("replay.wal");
    let (room, leave, parent) = {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        for p in 1..=6 {
            engine.define_period(&admin(), p, format!("P{p}")).await.unwrap();
        }
        engine.upsert_employee(&admin(), employee("ana", Role::Staff)).await.unwrap();
        for (key, value) in [
            (ConstraintKey::Quota, 2),
            (ConstraintKey::Concurrent, 2),
            (ConstraintKey::NoticeMin, 0),
            (ConstraintKey::NoticeMax, 30),
            (ConstraintKey::Consecutive, 3),
        ] {
            engine.set_constraint(&admin(), key, value).await.unwrap();
        }
        let room = Ulid::new();
        engine.create_room(&admin(), room, "Lab".into()).await.unwrap();
        let leave = file(&engine, &ana(), "ana", in_days(3)).await.unwrap().id;
        engine.review_leave_request(&jefe(), leave, Decision::Accept).await.unwrap();
        let req = series(room, in_days(1), in_days(3), Frequency::Daily);
        let parent = req.id;
        engine.create_recurring_booking(&ana(), req).await.unwrap();
        let single = booking(room, in_days(5), 1, 1);
        let single_id = single.id;
        engine.create_room_booking(&ana(), single).await.unwrap();
        engine.update_room_booking(&ana(), single_id, 4, 6, Some("moved".into())).await.unwrap();
        (room, leave, parent)
    };

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    assert_eq!(engine.get_leave_request(&leave).await.unwrap().status, Status::Accepted);
    assert_eq!(engine.list_periods().len(), 6);
    assert_eq!(engine.template_children(parent).await.unwrap().len(), 3);
    assert_eq!(engine.room_bookings(room, in_days(2)).await.unwrap().len(), 1);
    assert_eq!(engine.quota_summary("ana").await.unwrap().used, 1);
    let edited = engine.room_bookings(room, in_days(5)).await.unwrap();
    assert_eq!(edited.len(), 1);
    assert_eq!((edited[0].periods.start, edited[0].periods.end), (4, 6));
    assert_eq!(edited[0].description, "moved");

    // Indexes are rebuilt: the replayed booking still conflicts.
    let result = engine.create_room_booking(&ana(), booking(room, in_days(2), 1, 2)).await;
    assert!(matches!(result, Err(EngineError::Conflict(_))));
}

#[tokio::test]
async fn compaction_preserves_state() {
    let path = test_wal_path("compact.wal");
    let room = Ulid::new();
    let (kept, parent) = {
        let engine = Engine::new(path.clone(), Arc::new(NotifyHub::new())).unwrap();
        for p in 1..=6 {
            engine.define_period(&admin(), p, format!("P{p}")).await.unwrap();
        }
        engine.create_room(&admin(), room, "Library".into()).await.unwrap();
        engine.upsert_employee(&admin(), employee("ana", Role::Staff)).await.unwrap();
        for v in 0..20 {
            engine.set_constraint(&admin(), ConstraintKey::Quota, v).await.unwrap();
        }
        let churn = booking(room, in_days(2), 1, 1);
        let churn_id = churn.id;
        engine.create_room_booking(&ana(), churn).await.unwrap();
        engine.delete_booking(&ana(), churn_id).await.unwrap();

        let kept = booking(room, in_days(2), 5, 6);
        let kept_id = kept.id;
        engine.create_room_booking(&ana(), kept).await.unwrap();
        let req = series(room, in_days(1), in_days(2), Frequency::Daily);
        let parent = req.id;
        engine.create_recurring_booking(&ana(), req).await.unwrap();

        assert!(engine.wal_appends_since_compact().await > 0);
        let before = std::fs::metadata(&path).unwrap().len();
        engine.compact_wal().await.unwrap();
        assert_eq!(engine.wal_appends_since_compact().await, 0);
        assert!(std::fs::metadata(&path).unwrap().len() < before);
        (kept_id, parent)
    };

    let engine = Engine::new(path, Arc::new(NotifyHub::new())).unwrap();
    let day = engine.room_bookings(room, in_days(2)).await.unwrap();
    assert_eq!(day.len(), 2);
    assert!(day.iter().any(|b| b.id == kept));
    assert_eq!(engine.template_children(parent).await.unwrap().len(), 2);
    assert_eq!(engine.list_constraints().await, vec![(ConstraintKey::Quota, 19)]);
    assert!(engine.get_employee("ana").await.is_some());
}
