use ulid::Ulid;

use crate::limits::MAX_IN_CLAUSE_IDS;
use crate::model::*;

use super::overlap::find_conflict;
use super::{quota, Engine, EngineError, Entity};

/// Shown instead of another person's id when identities are hidden.
pub const MASKED_PERSON: &str = "***";

impl Engine {
    /// Map a login name to an actor. The configured administrator is always Admin.
    pub async fn resolve_actor(&self, user: &str, admin_user: &str) -> Actor {
        if user == admin_user {
            return Actor::new(user, Role::Admin);
        }
        let role = self
            .ledger
            .read()
            .await
            .employee(user)
            .map(|e| e.role)
            .unwrap_or(Role::Staff);
        Actor::new(user, role)
    }

    /// Leave requests matching `filter`, ordered by date.
    ///
    /// When the obfuscate rule is on, staff readers see other people's ids masked.
    pub async fn list_leave_requests(&self, actor: &Actor, filter: &LeaveFilter) -> Vec<LeaveRequest> {
        let ledger = self.ledger.read().await;
        let mask = ledger.obfuscate() && !actor.role.is_privileged();
        let mut out: Vec<LeaveRequest> = ledger
            .requests()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        drop(ledger);

        out.sort_by(|a, b| a.date.cmp(&b.date).then(a.id.cmp(&b.id)));
        if mask {
            for r in out.iter_mut().filter(|r| r.person != actor.id) {
                r.person = MASKED_PERSON.into();
                r.created_by = MASKED_PERSON.into();
                r.updated_by = MASKED_PERSON.into();
            }
        }
        out
    }

    pub async fn get_leave_request(&self, id: &Ulid) -> Option<LeaveRequest> {
        self.ledger.read().await.request(id).cloned()
    }

    pub async fn quota_summary(&self, person: &str) -> Result<QuotaSummary, EngineError> {
        let ledger = self.ledger.read().await;
        let employee = ledger.employee(person).ok_or(EngineError::NotFound(Entity::Employee))?;
        let limit = quota::effective_limit(employee, ledger.constraint(ConstraintKey::Quota))?;
        Ok(QuotaSummary {
            person: person.to_string(),
            used: ledger.accepted_count(person, Category::PERSONAL_DAYS),
            limit,
        })
    }

    pub async fn list_constraints(&self) -> Vec<(ConstraintKey, i64)> {
        self.ledger
            .read()
            .await
            .constraints()
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect()
    }

    pub async fn list_blocked_ranges(&self) -> Vec<BlockedRange> {
        self.ledger.read().await.blocked_ranges().to_vec()
    }

    pub async fn list_overrides(&self) -> Vec<AuthorizationOverride> {
        let mut out: Vec<_> = self.ledger.read().await.overrides().cloned().collect();
        out.sort_by(|a, b| a.date.cmp(&b.date).then(a.person.cmp(&b.person)));
        out
    }

    pub async fn get_employee(&self, id: &str) -> Option<Employee> {
        self.ledger.read().await.employee(id).cloned()
    }

    pub async fn list_employees(&self) -> Vec<Employee> {
        let mut out: Vec<_> = self.ledger.read().await.employees().cloned().collect();
        out.sort_by(|a, b| a.id.cmp(&b.id));
        out
    }

    // ── Rooms ────────────────────────────────────────────────

    pub async fn list_rooms(&self) -> Vec<Room> {
        let arcs: Vec<_> = self.rooms.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(arcs.len());
        for rs in arcs {
            out.push(rs.read().await.room.clone());
        }
        out.sort_by(|a, b| a.name.cmp(&b.name).then(a.id.cmp(&b.id)));
        out
    }

    pub fn list_periods(&self) -> Vec<Period> {
        let mut out: Vec<_> = self.periods.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|p| p.id);
        out
    }

    /// Bookings of a room on one day, ordered by start period.
    pub async fn room_bookings(&self, room_id: Ulid, date: Day) -> Result<Vec<RoomBooking>, EngineError> {
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(Entity::Room(room_id)))?;
        let guard = rs.read().await;
        Ok(guard.on_day(date).to_vec())
    }

    /// Bookings across several rooms on one day.
    pub async fn rooms_bookings(&self, room_ids: &[Ulid], date: Day) -> Result<Vec<RoomBooking>, EngineError> {
        if room_ids.len() > MAX_IN_CLAUSE_IDS {
            return Err(EngineError::LimitExceeded("too many room IDs"));
        }
        let mut out = Vec::new();
        for id in room_ids {
            out.extend(self.room_bookings(*id, date).await?);
        }
        Ok(out)
    }

    /// Whether `[start, end]` on `date` would collide with an existing booking.
    pub async fn conflicts(
        &self,
        room_id: Ulid,
        date: Day,
        start: PeriodId,
        end: PeriodId,
    ) -> Result<Option<RoomBooking>, EngineError> {
        let periods = PeriodRange::new(start, end).ok_or_else(|| {
            EngineError::Validation(format!("start period {start} is after end period {end}"))
        })?;
        let rs = self.get_room(&room_id).ok_or(EngineError::NotFound(Entity::Room(room_id)))?;
        let guard = rs.read().await;
        Ok(find_conflict(guard.on_day(date), &periods).cloned())
    }

    pub fn list_templates(&self) -> Vec<RecurrenceTemplate> {
        let mut out: Vec<_> = self.templates.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|t| t.id);
        out
    }

    /// Bookings still carrying `template_id` as their parent.
    pub async fn template_children(&self, template_id: Ulid) -> Result<Vec<RoomBooking>, EngineError> {
        let room_id = self
            .templates
            .get(&template_id)
            .map(|t| t.room_id)
            .ok_or(EngineError::NotFound(Entity::Template(template_id)))?;
        let Some(rs) = self.get_room(&room_id) else {
            return Ok(Vec::new());
        };
        let guard = rs.read().await;
        Ok(guard
            .bookings()
            .filter(|b| b.template_id == Some(template_id))
            .cloned()
            .collect())
    }
}
