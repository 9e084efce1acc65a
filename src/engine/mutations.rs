use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use tracing::{debug, info};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;
use crate::notify::{Notification, Payload};

use super::constraints::{validate_value, ConstraintSet};
use super::eligibility::{evaluate, Proposal};
use super::overlap::{check_no_conflict, check_no_conflict_excluding};
use super::{lifecycle, quota, recurrence};
use super::{now_ms, Engine, EngineError, Entity, RoomState, WalCommand};

fn require_admin(actor: &Actor) -> Result<(), EngineError> {
    if actor.role != Role::Admin {
        return Err(EngineError::Forbidden("administrator role required"));
    }
    Ok(())
}

fn require_privileged(actor: &Actor) -> Result<(), EngineError> {
    if !actor.role.is_privileged() {
        return Err(EngineError::Forbidden("management role required"));
    }
    Ok(())
}

fn validate_person(person: &str) -> Result<(), EngineError> {
    if person.trim().is_empty() {
        return Err(EngineError::Validation("person id is required".into()));
    }
    if person.len() > MAX_PERSON_ID_LEN {
        return Err(EngineError::LimitExceeded("person id too long"));
    }
    Ok(())
}

fn validate_description(text: &str) -> Result<(), EngineError> {
    if text.len() > MAX_DESCRIPTION_LEN {
        return Err(EngineError::LimitExceeded("description too long"));
    }
    Ok(())
}

fn validate_name(name: &str) -> Result<(), EngineError> {
    if name.trim().is_empty() {
        return Err(EngineError::Validation("name is required".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(EngineError::LimitExceeded("name too long"));
    }
    Ok(())
}

/// Input for a single room booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub date: Day,
    pub start_period: PeriodId,
    pub end_period: PeriodId,
    pub owner: PersonId,
    pub description: String,
}

/// Input for a repeating booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecurrenceRequest {
    pub id: Ulid,
    pub room_id: Ulid,
    pub occupant: PersonId,
    pub start_period: PeriodId,
    pub end_period: PeriodId,
    pub from: Day,
    pub to: Day,
    pub frequency: Frequency,
    pub description: String,
}

impl Engine {
    fn period_range(&self, start: PeriodId, end: PeriodId) -> Result<PeriodRange, EngineError> {
        for p in [start, end] {
            if !self.periods.contains_key(&p) {
                return Err(EngineError::Validation(format!("unknown period {p}")));
            }
        }
        PeriodRange::new(start, end).ok_or_else(|| {
            EngineError::Validation(format!("start period {start} is after end period {end}"))
        })
    }

    // ── Registry ─────────────────────────────────────────────

    pub async fn create_room(&self, actor: &Actor, id: Ulid, name: String) -> Result<(), EngineError> {
        require_admin(actor)?;
        validate_name(&name)?;
        let _gate = self.commit_gate.read().await;
        if self.rooms.len() >= MAX_ROOMS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many rooms"));
        }
        if self.rooms.contains_key(&id) {
            return Err(EngineError::AlreadyExists(id));
        }

        let room = Room { id, name };
        self.wal_append(&Event::RoomCreated { room: room.clone() }).await?;
        self.rooms.insert(id, Arc::new(RwLock::new(RoomState::new(room))));
        info!("room {id} created");
        Ok(())
    }

    /// Rooms that still hold bookings cannot be removed.
    pub async fn delete_room(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        require_admin(actor)?;
        let _gate = self.commit_gate.read().await;
        let rs = self.get_room(&id).ok_or(EngineError::NotFound(Entity::Room(id)))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::NotFound(Entity::Room(id)));
        }
        if guard.booking_count() > 0 {
            return Err(EngineError::Validation(format!(
                "room {id} still has {} bookings",
                guard.booking_count()
            )));
        }

        self.wal_append(&Event::RoomDeleted { id }).await?;
        guard.deleted = true;
        self.rooms.remove(&id);
        info!("room {id} deleted");
        Ok(())
    }

    /// Define or rename a period of the school day.
    pub async fn define_period(&self, actor: &Actor, id: PeriodId, name: String) -> Result<(), EngineError> {
        require_admin(actor)?;
        validate_name(&name)?;
        let _gate = self.commit_gate.read().await;
        if !self.periods.contains_key(&id) && self.periods.len() >= MAX_PERIODS {
            return Err(EngineError::LimitExceeded("too many periods"));
        }
        let period = Period { id, name };
        self.wal_append(&Event::PeriodDefined { period: period.clone() }).await?;
        self.periods.insert(id, period);
        Ok(())
    }

    pub async fn upsert_employee(&self, actor: &Actor, employee: Employee) -> Result<(), EngineError> {
        require_admin(actor)?;
        validate_person(&employee.id)?;
        if let Some(email) = &employee.email
            && email.len() > MAX_NAME_LEN
        {
            return Err(EngineError::LimitExceeded("email too long"));
        }
        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        if ledger.employee(&employee.id).is_none() && ledger.employee_count() >= MAX_EMPLOYEES {
            return Err(EngineError::LimitExceeded("too many employees"));
        }
        self.persist_ledger(&mut ledger, &Event::EmployeeUpserted { employee }).await
    }

    // ── Rules ────────────────────────────────────────────────

    pub async fn set_constraint(&self, actor: &Actor, key: ConstraintKey, value: i64) -> Result<(), EngineError> {
        require_admin(actor)?;
        validate_value(key, value)?;
        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        self.persist_ledger(&mut ledger, &Event::ConstraintUpdated { key, value }).await?;
        info!("constraint {key} set to {value}");
        Ok(())
    }

    pub async fn clear_constraint(&self, actor: &Actor, key: ConstraintKey) -> Result<(), EngineError> {
        require_admin(actor)?;
        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        if ledger.constraint(key).is_none() {
            return Err(EngineError::NotFound(Entity::Constraint(key)));
        }
        self.persist_ledger(&mut ledger, &Event::ConstraintCleared { key }).await
    }

    pub async fn add_blocked_range(
        &self,
        actor: &Actor,
        id: Ulid,
        from: Day,
        to: Day,
        reason: String,
    ) -> Result<(), EngineError> {
        require_admin(actor)?;
        if from > to {
            return Err(EngineError::Validation(format!("range starts {from} after it ends {to}")));
        }
        validate_description(&reason)?;
        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        if ledger.blocked_ranges().iter().any(|b| b.id == id) {
            return Err(EngineError::AlreadyExists(id));
        }
        if ledger.blocked_ranges().len() >= MAX_BLOCKED_RANGES {
            return Err(EngineError::LimitExceeded("too many blocked ranges"));
        }
        let range = BlockedRange { id, from, to, reason };
        self.persist_ledger(&mut ledger, &Event::BlockedRangeAdded { range }).await
    }

    pub async fn remove_blocked_range(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        require_admin(actor)?;
        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        if !ledger.blocked_ranges().iter().any(|b| b.id == id) {
            return Err(EngineError::NotFound(Entity::BlockedRange(id)));
        }
        self.persist_ledger(&mut ledger, &Event::BlockedRangeRemoved { id }).await
    }

    /// One override per (person, date).
    pub async fn grant_override(&self, actor: &Actor, id: Ulid, person: PersonId, date: Day) -> Result<(), EngineError> {
        require_privileged(actor)?;
        validate_person(&person)?;
        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        if ledger.employee(&person).is_none() {
            return Err(EngineError::NotFound(Entity::Employee));
        }
        if let Some(existing) = ledger.override_for(&person, date) {
            return Err(EngineError::AlreadyExists(existing.id));
        }
        if ledger.override_by_id(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        let grant = AuthorizationOverride {
            id,
            person,
            date,
            granted_by: actor.id.clone(),
            granted_at: now_ms(),
        };
        info!("override {id} granted to {} for {date}", grant.person);
        self.persist_ledger(&mut ledger, &Event::OverrideGranted { grant }).await
    }

    pub async fn revoke_override(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        require_privileged(actor)?;
        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        if ledger.override_by_id(&id).is_none() {
            return Err(EngineError::NotFound(Entity::Override(id)));
        }
        self.persist_ledger(&mut ledger, &Event::OverrideRevoked { id }).await
    }

    // ── Leave ────────────────────────────────────────────────

    /// Evaluate and file a leave request. Stored as pending on success.
    pub async fn create_leave_request(
        &self,
        actor: &Actor,
        id: Ulid,
        person: PersonId,
        date: Day,
        category: Category,
        description: String,
    ) -> Result<LeaveReceipt, EngineError> {
        validate_person(&person)?;
        validate_description(&description)?;
        if !category.is_known() {
            return Err(EngineError::Validation(format!("unknown category {category}")));
        }
        if !actor.can_act_for(&person) {
            return Err(EngineError::Forbidden("cannot file leave for another person"));
        }

        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        if ledger.request(&id).is_some() {
            return Err(EngineError::AlreadyExists(id));
        }
        if ledger.request_count() >= MAX_LEAVE_REQUESTS {
            return Err(EngineError::LimitExceeded("too many leave requests"));
        }
        let employee = ledger
            .employee(&person)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::Employee))?;

        let obfuscate = if category.consumes_quota() {
            let rules = ConstraintSet::load(category, ledger.constraints(), ledger.blocked_ranges())?;
            let limit = quota::effective_limit(&employee, Some(rules.quota))?;
            let proposal = Proposal { person: &person, date, category };
            if let Err(rejection) = evaluate(&ledger, &rules, limit, &proposal, Day::today()) {
                metrics::counter!(
                    crate::observability::LEAVE_DECISIONS_TOTAL,
                    "outcome" => rejection.code()
                )
                .increment(1);
                debug!("leave {id} for {person} on {date} rejected: {rejection}");
                return Err(rejection.into());
            }
            rules.obfuscate
        } else {
            ledger.obfuscate()
        };

        let now = now_ms();
        let request = LeaveRequest {
            id,
            person,
            date,
            category,
            description,
            status: Status::Pending,
            created_by: actor.id.clone(),
            created_at: now,
            updated_by: actor.id.clone(),
            updated_at: now,
        };
        self.persist_ledger(&mut ledger, &Event::LeaveRequested { request: request.clone() })
            .await?;
        drop(ledger);

        metrics::counter!(crate::observability::LEAVE_DECISIONS_TOTAL, "outcome" => "filed").increment(1);
        debug!("leave {id} filed for {} on {date}", request.person);
        self.publish(Notification {
            recipient: request.person.clone(),
            email: employee.email,
            payload: Payload::LeaveRequested { request, obfuscate },
        });
        Ok(LeaveReceipt { id, status: Status::Pending, obfuscate })
    }

    /// Accept or reject a pending request. Acceptance re-checks the quota.
    pub async fn review_leave_request(
        &self,
        actor: &Actor,
        id: Ulid,
        decision: Decision,
    ) -> Result<LeaveRequest, EngineError> {
        lifecycle::ensure_reviewer(actor)?;
        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        let request = ledger
            .request(&id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::LeaveRequest(id)))?;
        let status = lifecycle::transition(request.status, decision)?;

        let employee = ledger.employee(&request.person).cloned();
        if status == Status::Accepted && request.category.consumes_quota() {
            let employee = employee.as_ref().ok_or(EngineError::NotFound(Entity::Employee))?;
            let limit = quota::effective_limit(employee, ledger.constraint(ConstraintKey::Quota))?;
            let used = ledger.accepted_count(&request.person, request.category);
            quota::check_quota(used, limit)?;
        }

        let event = Event::LeaveReviewed {
            id,
            status,
            by: actor.id.clone(),
            at: now_ms(),
        };
        self.persist_ledger(&mut ledger, &event).await?;
        let updated = ledger
            .request(&id)
            .cloned()
            .ok_or(EngineError::NotFound(Entity::LeaveRequest(id)))?;
        drop(ledger);

        info!("leave {id} {} by {}", status.as_str(), actor.id);
        self.publish(Notification {
            recipient: updated.person.clone(),
            email: employee.and_then(|e| e.email),
            payload: Payload::LeaveReviewed { request: updated.clone() },
        });
        Ok(updated)
    }

    /// Withdraw a pending request.
    pub async fn delete_leave_request(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let mut ledger = self.ledger.write().await;
        let request = ledger
            .request(&id)
            .ok_or(EngineError::NotFound(Entity::LeaveRequest(id)))?;
        if !actor.can_act_for(&request.person) {
            return Err(EngineError::Forbidden("cannot delete another person's request"));
        }
        lifecycle::ensure_deletable(request.status)?;
        self.persist_ledger(&mut ledger, &Event::LeaveDeleted { id }).await
    }

    // ── Rooms ────────────────────────────────────────────────

    /// Book one room for a period range on one day.
    pub async fn create_room_booking(&self, actor: &Actor, req: BookingRequest) -> Result<(), EngineError> {
        validate_person(&req.owner)?;
        validate_description(&req.description)?;
        let periods = self.period_range(req.start_period, req.end_period)?;

        let _gate = self.commit_gate.read().await;
        // Reserve the id before any await; released again on failure.
        match self.booking_to_room.entry(req.id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(req.id)),
            Entry::Vacant(slot) => {
                slot.insert(req.room_id);
            }
        }
        let id = req.id;
        let (booking, room_name) = match self.insert_reserved_booking(actor, req, periods).await {
            Ok(committed) => committed,
            Err(e) => {
                self.booking_to_room.remove(&id);
                return Err(e);
            }
        };

        debug!("room {} booked on {} {}", booking.room_id, booking.date, booking.periods);
        let email = self.employee_email(&booking.owner).await;
        self.publish(Notification {
            recipient: booking.owner.clone(),
            email,
            payload: Payload::RoomBooked { booking, room_name },
        });
        Ok(())
    }

    async fn insert_reserved_booking(
        &self,
        actor: &Actor,
        req: BookingRequest,
        periods: PeriodRange,
    ) -> Result<(RoomBooking, String), EngineError> {
        let rs = self
            .get_room(&req.room_id)
            .ok_or(EngineError::NotFound(Entity::Room(req.room_id)))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::NotFound(Entity::Room(req.room_id)));
        }
        if guard.booking_count() >= MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        check_no_conflict(&guard, req.date, &periods)?;

        let booking = RoomBooking {
            id: req.id,
            room_id: req.room_id,
            date: req.date,
            periods,
            owner: req.owner,
            booked_by: actor.id.clone(),
            description: req.description,
            template_id: None,
            created_at: now_ms(),
        };
        self.persist_room(&mut guard, &Event::RoomBooked { booking: booking.clone() })
            .await?;
        Ok((booking, guard.room.name.clone()))
    }

    /// Move a booking to another period range on the same day, optionally
    /// replacing its description. Same permission as deleting it.
    pub async fn update_room_booking(
        &self,
        actor: &Actor,
        id: Ulid,
        start_period: PeriodId,
        end_period: PeriodId,
        description: Option<String>,
    ) -> Result<RoomBooking, EngineError> {
        if let Some(description) = &description {
            validate_description(description)?;
        }
        let periods = self.period_range(start_period, end_period)?;

        let _gate = self.commit_gate.read().await;
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(&id).ok_or(EngineError::NotFound(Entity::Booking(id)))?;
        if !actor.can_act_for(&booking.owner) && actor.id != booking.booked_by {
            return Err(EngineError::Forbidden("cannot edit another person's booking"));
        }
        let date = booking.date;
        let description = description.unwrap_or_else(|| booking.description.clone());

        check_no_conflict_excluding(&guard, date, &periods, id)?;

        self.persist_room(
            &mut guard,
            &Event::BookingUpdated { id, room_id, periods, description },
        )
        .await?;
        let updated = guard.booking(&id).cloned().ok_or(EngineError::NotFound(Entity::Booking(id)))?;
        debug!("booking {id} moved to {} on {date}", updated.periods);
        Ok(updated)
    }

    /// Expand a template and book every generated date, or none of them.
    pub async fn create_recurring_booking(
        &self,
        actor: &Actor,
        req: RecurrenceRequest,
    ) -> Result<SeriesReceipt, EngineError> {
        validate_person(&req.occupant)?;
        validate_description(&req.description)?;
        let periods = self.period_range(req.start_period, req.end_period)?;
        let dates = recurrence::expand(req.from, req.to, req.frequency)?;

        let _gate = self.commit_gate.read().await;
        if self.templates.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        let rs = self
            .get_room(&req.room_id)
            .ok_or(EngineError::NotFound(Entity::Room(req.room_id)))?;
        let mut guard = rs.write().await;
        if guard.deleted {
            return Err(EngineError::NotFound(Entity::Room(req.room_id)));
        }
        if guard.booking_count() + dates.len() > MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        // Phase 1: every date must be free before anything is written.
        for date in &dates {
            check_no_conflict(&guard, *date, &periods)?;
        }

        // Phase 2: one record carries the template and all its children.
        let now = now_ms();
        let template = RecurrenceTemplate {
            id: req.id,
            owner: actor.id.clone(),
            occupant: req.occupant,
            room_id: req.room_id,
            periods,
            from: req.from,
            to: req.to,
            frequency: req.frequency,
            description: req.description,
            created_at: now,
        };
        let bookings: Vec<RoomBooking> = dates
            .iter()
            .map(|date| RoomBooking {
                id: Ulid::new(),
                room_id: template.room_id,
                date: *date,
                periods,
                owner: template.occupant.clone(),
                booked_by: actor.id.clone(),
                description: template.description.clone(),
                template_id: Some(template.id),
                created_at: now,
            })
            .collect();
        let child_count = bookings.len();
        self.persist_room(
            &mut guard,
            &Event::RecurrenceCreated { template: template.clone(), bookings },
        )
        .await?;
        let room_name = guard.room.name.clone();
        drop(guard);

        metrics::histogram!(crate::observability::RECURRENCE_DATES).record(child_count as f64);
        info!("recurrence {} created with {child_count} bookings", template.id);
        let email = self.employee_email(&template.occupant).await;
        self.publish(Notification {
            recipient: template.occupant.clone(),
            email,
            payload: Payload::RecurrenceCreated { template, room_name, child_count },
        });
        Ok(SeriesReceipt { parent_id: req.id, child_count })
    }

    /// Remove one room booking. Allowed to its occupant, its creator and management.
    pub async fn delete_room_booking(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let (room_id, mut guard) = self.resolve_booking_write(&id).await?;
        let booking = guard.booking(&id).ok_or(EngineError::NotFound(Entity::Booking(id)))?;
        if !actor.can_act_for(&booking.owner) && actor.id != booking.booked_by {
            return Err(EngineError::Forbidden("cannot delete another person's booking"));
        }
        self.persist_room(&mut guard, &Event::BookingDeleted { id, room_id }).await
    }

    /// Remove a template row. Bookings it generated are left in place.
    pub async fn delete_recurrence_template(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        let _gate = self.commit_gate.read().await;
        let template = self
            .templates
            .get(&id)
            .map(|t| t.value().clone())
            .ok_or(EngineError::NotFound(Entity::Template(id)))?;
        if !actor.role.is_privileged() && actor.id != template.owner {
            return Err(EngineError::Forbidden("cannot delete another person's template"));
        }
        let rs = self
            .get_room(&template.room_id)
            .ok_or(EngineError::NotFound(Entity::Room(template.room_id)))?;
        let mut guard = rs.write().await;
        if !self.templates.contains_key(&id) {
            return Err(EngineError::NotFound(Entity::Template(id)));
        }
        self.persist_room(&mut guard, &Event::TemplateDeleted { id }).await
    }

    /// Delete whatever `id` names: a room booking, a recurrence template or a leave request.
    pub async fn delete_booking(&self, actor: &Actor, id: Ulid) -> Result<(), EngineError> {
        if self.booking_to_room.contains_key(&id) {
            return self.delete_room_booking(actor, id).await;
        }
        if self.templates.contains_key(&id) {
            return self.delete_recurrence_template(actor, id).await;
        }
        self.delete_leave_request(actor, id).await
    }

    async fn resolve_booking_write(
        &self,
        booking_id: &Ulid,
    ) -> Result<(Ulid, tokio::sync::OwnedRwLockWriteGuard<RoomState>), EngineError> {
        let room_id = self
            .get_room_for_booking(booking_id)
            .ok_or(EngineError::NotFound(Entity::Booking(*booking_id)))?;
        let rs = self
            .get_room(&room_id)
            .ok_or(EngineError::NotFound(Entity::Room(room_id)))?;
        Ok((room_id, rs.write_owned().await))
    }

    async fn employee_email(&self, person: &str) -> Option<String> {
        self.ledger.read().await.employee(person).and_then(|e| e.email.clone())
    }

    // ── Maintenance ──────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.commit_gate.write().await;
        let mut events = Vec::new();

        let mut periods: Vec<Period> = self.periods.iter().map(|e| e.value().clone()).collect();
        periods.sort_by_key(|p| p.id);
        events.extend(periods.into_iter().map(|period| Event::PeriodDefined { period }));

        self.ledger.read().await.snapshot_events(&mut events);

        let mut room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        room_ids.sort();
        let mut bookings = Vec::new();
        for id in room_ids {
            let Some(rs) = self.get_room(&id) else { continue };
            let guard = rs.read().await;
            events.push(Event::RoomCreated { room: guard.room.clone() });
            bookings.extend(guard.bookings().cloned());
        }

        let mut templates: Vec<RecurrenceTemplate> =
            self.templates.iter().map(|e| e.value().clone()).collect();
        templates.sort_by_key(|t| t.id);
        events.extend(
            templates
                .into_iter()
                .map(|template| Event::RecurrenceCreated { template, bookings: Vec::new() }),
        );
        events.extend(bookings.into_iter().map(|booking| Event::RoomBooked { booking }));

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        info!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
