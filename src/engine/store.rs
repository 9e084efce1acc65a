use std::collections::{BTreeMap, HashMap};

use ulid::Ulid;

use crate::model::*;

/// Everything leave-related for one tenant. Guarded by a single lock in the engine,
/// since eligibility reads across people (concurrency cap) as well as within one.
#[derive(Debug, Default)]
pub struct LeaveLedger {
    requests: HashMap<Ulid, LeaveRequest>,
    by_person: HashMap<PersonId, BTreeMap<Day, Vec<Ulid>>>,
    by_day: BTreeMap<Day, Vec<Ulid>>,
    employees: HashMap<PersonId, Employee>,
    overrides: HashMap<Ulid, AuthorizationOverride>,
    constraints: BTreeMap<ConstraintKey, i64>,
    blocked: Vec<BlockedRange>,
}

impl LeaveLedger {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Requests ─────────────────────────────────────────────

    pub fn request(&self, id: &Ulid) -> Option<&LeaveRequest> {
        self.requests.get(id)
    }

    pub fn request_count(&self) -> usize {
        self.requests.len()
    }

    pub fn requests(&self) -> impl Iterator<Item = &LeaveRequest> {
        self.requests.values()
    }

    /// Accepted requests of `category` held by `person`.
    pub fn accepted_count(&self, person: &str, category: Category) -> u32 {
        self.by_person
            .get(person)
            .into_iter()
            .flat_map(|days| days.values().flatten())
            .filter_map(|id| self.requests.get(id))
            .filter(|r| r.category == category && r.status == Status::Accepted)
            .count() as u32
    }

    /// Requests of `category` on `day`, across everyone and in any status.
    pub fn count_on_day(&self, day: Day, category: Category) -> usize {
        self.by_day
            .get(&day)
            .into_iter()
            .flatten()
            .filter_map(|id| self.requests.get(id))
            .filter(|r| r.category == category)
            .count()
    }

    /// Days within `center ± window` on which `person` holds a request of `category`,
    /// whatever its status.
    pub fn person_days_near(&self, person: &str, category: Category, center: Day, window: i64) -> Vec<Day> {
        let Some(days) = self.by_person.get(person) else {
            return Vec::new();
        };
        days.range(center.add_days(-window)..=center.add_days(window))
            .filter(|(_, ids)| {
                ids.iter()
                    .filter_map(|id| self.requests.get(id))
                    .any(|r| r.category == category)
            })
            .map(|(day, _)| *day)
            .collect()
    }

    fn index_request(&mut self, r: &LeaveRequest) {
        self.by_person
            .entry(r.person.clone())
            .or_default()
            .entry(r.date)
            .or_default()
            .push(r.id);
        self.by_day.entry(r.date).or_default().push(r.id);
    }

    fn unindex_request(&mut self, r: &LeaveRequest) {
        if let Some(days) = self.by_person.get_mut(&r.person) {
            if let Some(ids) = days.get_mut(&r.date) {
                ids.retain(|id| *id != r.id);
                if ids.is_empty() {
                    days.remove(&r.date);
                }
            }
            if days.is_empty() {
                self.by_person.remove(&r.person);
            }
        }
        if let Some(ids) = self.by_day.get_mut(&r.date) {
            ids.retain(|id| *id != r.id);
            if ids.is_empty() {
                self.by_day.remove(&r.date);
            }
        }
    }

    // ── People ───────────────────────────────────────────────

    pub fn employee(&self, id: &str) -> Option<&Employee> {
        self.employees.get(id)
    }

    pub fn employee_count(&self) -> usize {
        self.employees.len()
    }

    pub fn employees(&self) -> impl Iterator<Item = &Employee> {
        self.employees.values()
    }

    // ── Rules ────────────────────────────────────────────────

    pub fn constraint(&self, key: ConstraintKey) -> Option<i64> {
        self.constraints.get(&key).copied()
    }

    pub fn constraints(&self) -> &BTreeMap<ConstraintKey, i64> {
        &self.constraints
    }

    pub fn obfuscate(&self) -> bool {
        self.constraint(ConstraintKey::Obfuscate).unwrap_or(0) != 0
    }

    pub fn blocked_ranges(&self) -> &[BlockedRange] {
        &self.blocked
    }

    pub fn override_for(&self, person: &str, day: Day) -> Option<&AuthorizationOverride> {
        self.overrides
            .values()
            .find(|o| o.person == person && o.date == day)
    }

    pub fn override_by_id(&self, id: &Ulid) -> Option<&AuthorizationOverride> {
        self.overrides.get(id)
    }

    pub fn overrides(&self) -> impl Iterator<Item = &AuthorizationOverride> {
        self.overrides.values()
    }

    // ── Event application ────────────────────────────────────

    /// Apply a ledger event. Room events are ignored here.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::EmployeeUpserted { employee } => {
                self.employees.insert(employee.id.clone(), employee.clone());
            }
            Event::ConstraintUpdated { key, value } => {
                self.constraints.insert(*key, *value);
            }
            Event::ConstraintCleared { key } => {
                self.constraints.remove(key);
            }
            Event::BlockedRangeAdded { range } => {
                self.blocked.retain(|b| b.id != range.id);
                self.blocked.push(range.clone());
                self.blocked.sort_by_key(|b| (b.from, b.id));
            }
            Event::BlockedRangeRemoved { id } => {
                self.blocked.retain(|b| b.id != *id);
            }
            Event::OverrideGranted { grant } => {
                self.overrides.insert(grant.id, grant.clone());
            }
            Event::OverrideRevoked { id } => {
                self.overrides.remove(id);
            }
            Event::LeaveRequested { request } => {
                if let Some(old) = self.requests.remove(&request.id) {
                    self.unindex_request(&old);
                }
                self.index_request(request);
                self.requests.insert(request.id, request.clone());
            }
            Event::LeaveReviewed { id, status, by, at } => {
                if let Some(r) = self.requests.get_mut(id) {
                    r.status = *status;
                    r.updated_by = by.clone();
                    r.updated_at = *at;
                }
            }
            Event::LeaveDeleted { id } => {
                if let Some(old) = self.requests.remove(id) {
                    self.unindex_request(&old);
                }
            }
            Event::RoomCreated { .. }
            | Event::RoomDeleted { .. }
            | Event::PeriodDefined { .. }
            | Event::RoomBooked { .. }
            | Event::RecurrenceCreated { .. }
            | Event::BookingUpdated { .. }
            | Event::BookingDeleted { .. }
            | Event::TemplateDeleted { .. } => {}
        }
    }

    /// Minimal event set that recreates this ledger.
    pub fn snapshot_events(&self, events: &mut Vec<Event>) {
        let mut employees: Vec<_> = self.employees.values().collect();
        employees.sort_by(|a, b| a.id.cmp(&b.id));
        events.extend(employees.into_iter().map(|e| Event::EmployeeUpserted { employee: e.clone() }));

        events.extend(
            self.constraints
                .iter()
                .map(|(key, value)| Event::ConstraintUpdated { key: *key, value: *value }),
        );
        events.extend(self.blocked.iter().map(|b| Event::BlockedRangeAdded { range: b.clone() }));

        let mut overrides: Vec<_> = self.overrides.values().collect();
        overrides.sort_by_key(|o| o.id);
        events.extend(overrides.into_iter().map(|o| Event::OverrideGranted { grant: o.clone() }));

        let mut requests: Vec<_> = self.requests.values().collect();
        requests.sort_by_key(|r| r.id);
        events.extend(requests.into_iter().map(|r| Event::LeaveRequested { request: r.clone() }));
    }
}

/// Bookings of one room, grouped by day.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub room: Room,
    /// Set under the write lock when the room is removed, so late lock holders see it.
    pub deleted: bool,
    bookings: BTreeMap<Day, Vec<RoomBooking>>,
    booking_count: usize,
}

impl RoomState {
    pub fn new(room: Room) -> Self {
        Self {
            room,
            deleted: false,
            bookings: BTreeMap::new(),
            booking_count: 0,
        }
    }

    pub fn on_day(&self, day: Day) -> &[RoomBooking] {
        self.bookings.get(&day).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn booking(&self, id: &Ulid) -> Option<&RoomBooking> {
        self.bookings.values().flatten().find(|b| b.id == *id)
    }

    pub fn bookings(&self) -> impl Iterator<Item = &RoomBooking> {
        self.bookings.values().flatten()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_count
    }

    /// Insert keeping each day ordered by start period.
    pub fn insert_booking(&mut self, booking: RoomBooking) {
        let day = self.bookings.entry(booking.date).or_default();
        let pos = day
            .binary_search_by_key(&booking.periods.start, |b| b.periods.start)
            .unwrap_or_else(|e| e);
        day.insert(pos, booking);
        self.booking_count += 1;
    }

    pub fn remove_booking(&mut self, id: &Ulid) -> Option<RoomBooking> {
        let day = *self
            .bookings
            .iter()
            .find(|(_, list)| list.iter().any(|b| b.id == *id))?
            .0;
        let list = self.bookings.get_mut(&day)?;
        let pos = list.iter().position(|b| b.id == *id)?;
        let removed = list.remove(pos);
        if list.is_empty() {
            self.bookings.remove(&day);
        }
        self.booking_count -= 1;
        Some(removed)
    }

    /// Apply a booking event addressed to this room.
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::RoomBooked { booking } => self.insert_booking(booking.clone()),
            Event::RecurrenceCreated { bookings, .. } => {
                for b in bookings {
                    self.insert_booking(b.clone());
                }
            }
            Event::BookingUpdated { id, periods, description, .. } => {
                if let Some(mut booking) = self.remove_booking(id) {
                    booking.periods = *periods;
                    booking.description = description.clone();
                    self.insert_booking(booking);
                }
            }
            Event::BookingDeleted { id, .. } => {
                self.remove_booking(id);
            }
            _ => {}
        }
    }
}
