use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Days, NaiveDate};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds, used for audit timestamps only.
pub type Ms = i64;

/// Opaque person identifier (login name in the directory).
pub type PersonId = String;

/// Position of a slot in the school day.
pub type PeriodId = u32;

// ── Calendar ─────────────────────────────────────────────────────

/// A timezone-free calendar date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Day(NaiveDate);

impl Day {
    pub const MIN: Day = Day(NaiveDate::MIN);
    pub const MAX: Day = Day(NaiveDate::MAX);

    pub fn from_ymd(year: i32, month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(year, month, day).map(Day)
    }

    /// Local wall-clock date. Only used to produce the "today" input of an evaluation.
    pub fn today() -> Self {
        Day(chrono::Local::now().date_naive())
    }

    /// Signed whole days from `self` to `other`.
    pub fn days_until(&self, other: Day) -> i64 {
        (other.0 - self.0).num_days()
    }

    /// Monday = 0 .. Sunday = 6.
    pub fn weekday_index(&self) -> u8 {
        self.0.weekday().num_days_from_monday() as u8
    }

    /// `None` once the result leaves the representable calendar.
    pub fn checked_add_days(&self, n: i64) -> Option<Self> {
        let step = Days::new(n.unsigned_abs());
        let date = if n >= 0 { self.0.checked_add_days(step) } else { self.0.checked_sub_days(step) };
        date.map(Day)
    }

    /// Clamps to `Day::MIN`/`Day::MAX`.
    pub fn add_days(&self, n: i64) -> Self {
        self.checked_add_days(n)
            .unwrap_or(if n >= 0 { Day::MAX } else { Day::MIN })
    }

    pub fn succ(&self) -> Option<Self> {
        self.checked_add_days(1)
    }
}

impl fmt::Display for Day {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d"))
    }
}

impl FromStr for Day {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d").map(Day)
    }
}

// ── Leave ────────────────────────────────────────────────────────

/// Leave category code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Category(pub u16);

impl Category {
    /// Personal days: the only category that draws on a quota.
    pub const PERSONAL_DAYS: Category = Category(13);

    const KNOWN: [(u16, &'static str); 10] = [
        (0, "other"),
        (2, "illness of a relative"),
        (3, "moving house"),
        (4, "public duty"),
        (7, "exams"),
        (11, "training"),
        (13, "personal days"),
        (14, "medical appointment"),
        (15, "union duty"),
        (32, "strike"),
    ];

    pub fn is_known(&self) -> bool {
        Self::KNOWN.iter().any(|(code, _)| *code == self.0)
    }

    pub fn consumes_quota(&self) -> bool {
        *self == Self::PERSONAL_DAYS
    }

    pub fn label(&self) -> &'static str {
        Self::KNOWN
            .iter()
            .find(|(code, _)| *code == self.0)
            .map(|(_, label)| *label)
            .unwrap_or("unknown")
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Status {
    Pending,
    Accepted,
    Rejected,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Pending => "pending",
            Status::Accepted => "accepted",
            Status::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Status::Pending),
            "accepted" => Some(Status::Accepted),
            "rejected" => Some(Status::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Status::Pending)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LeaveRequest {
    pub id: Ulid,
    pub person: PersonId,
    pub date: Day,
    pub category: Category,
    pub description: String,
    pub status: Status,
    pub created_by: PersonId,
    pub created_at: Ms,
    pub updated_by: PersonId,
    pub updated_at: Ms,
}

// ── People ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Staff,
    Management,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Staff => "staff",
            Role::Management => "management",
            Role::Admin => "admin",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "staff" => Some(Role::Staff),
            "management" => Some(Role::Management),
            "admin" => Some(Role::Admin),
            _ => None,
        }
    }

    /// May review requests and act on behalf of others.
    pub fn is_privileged(&self) -> bool {
        matches!(self, Role::Management | Role::Admin)
    }
}

/// Whoever issued the current operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: PersonId,
    pub role: Role,
}

impl Actor {
    pub fn new(id: impl Into<PersonId>, role: Role) -> Self {
        Self { id: id.into(), role }
    }

    pub fn can_act_for(&self, person: &str) -> bool {
        self.role.is_privileged() || self.id == person
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Employee {
    pub id: PersonId,
    pub role: Role,
    /// 0 means "use the institutional quota".
    pub quota_override: u32,
    pub email: Option<String>,
}

// ── Rooms ────────────────────────────────────────────────────────

/// Closed range of periods `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodRange {
    pub start: PeriodId,
    pub end: PeriodId,
}

impl PeriodRange {
    pub fn new(start: PeriodId, end: PeriodId) -> Option<Self> {
        (start <= end).then_some(Self { start, end })
    }

    pub fn overlaps(&self, other: &PeriodRange) -> bool {
        !(self.end < other.start || self.start > other.end)
    }

    pub fn contains(&self, period: PeriodId) -> bool {
        self.start <= period && period <= self.end
    }
}

impl fmt::Display for PeriodRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.start, self.end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: Ulid,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Period {
    pub id: PeriodId,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomBooking {
    pub id: Ulid,
    pub room_id: Ulid,
    pub date: Day,
    pub periods: PeriodRange,
    /// Occupant.
    pub owner: PersonId,
    pub booked_by: PersonId,
    pub description: String,
    pub template_id: Option<Ulid>,
    pub created_at: Ms,
}

/// Set of weekdays, bit 0 = Monday.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeekdaySet(u8);

impl WeekdaySet {
    pub fn from_indices(days: &[u8]) -> Self {
        let mut bits = 0u8;
        for d in days {
            if *d < 7 {
                bits |= 1 << d;
            }
        }
        WeekdaySet(bits)
    }

    /// Lenient parse of `"0,2,4"`. Any invalid token yields the empty set.
    pub fn parse(s: &str) -> Self {
        let mut bits = 0u8;
        for token in s.split(',').map(str::trim).filter(|t| !t.is_empty()) {
            match token.parse::<u8>() {
                Ok(d) if d < 7 => bits |= 1 << d,
                _ => return WeekdaySet(0),
            }
        }
        WeekdaySet(bits)
    }

    pub fn contains(&self, weekday: u8) -> bool {
        weekday < 7 && self.0 & (1 << weekday) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for WeekdaySet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let days: Vec<String> = (0..7u8)
            .filter(|d| self.contains(*d))
            .map(|d| d.to_string())
            .collect();
        write!(f, "{}", days.join(","))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Frequency {
    Daily,
    Weekly(WeekdaySet),
}

impl Frequency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Frequency::Daily => "daily",
            Frequency::Weekly(_) => "weekly",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecurrenceTemplate {
    pub id: Ulid,
    /// Creator.
    pub owner: PersonId,
    pub occupant: PersonId,
    pub room_id: Ulid,
    pub periods: PeriodRange,
    pub from: Day,
    pub to: Day,
    pub frequency: Frequency,
    pub description: String,
    pub created_at: Ms,
}

// ── Rules ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ConstraintKey {
    Quota,
    Concurrent,
    NoticeMin,
    NoticeMax,
    Consecutive,
    Obfuscate,
}

impl ConstraintKey {
    pub const ALL: [ConstraintKey; 6] = [
        ConstraintKey::Quota,
        ConstraintKey::Concurrent,
        ConstraintKey::NoticeMin,
        ConstraintKey::NoticeMax,
        ConstraintKey::Consecutive,
        ConstraintKey::Obfuscate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ConstraintKey::Quota => "quota",
            ConstraintKey::Concurrent => "concurrent",
            ConstraintKey::NoticeMin => "notice_min",
            ConstraintKey::NoticeMax => "notice_max",
            ConstraintKey::Consecutive => "consecutive",
            ConstraintKey::Obfuscate => "obfuscate",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s.trim())
    }

    pub fn is_required(&self) -> bool {
        !matches!(self, ConstraintKey::Obfuscate)
    }
}

impl fmt::Display for ConstraintKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Dates on which quota-bearing leave may not be requested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedRange {
    pub id: Ulid,
    pub from: Day,
    pub to: Day,
    pub reason: String,
}

impl BlockedRange {
    pub fn contains(&self, day: Day) -> bool {
        self.from <= day && day <= self.to
    }
}

/// Lets one person file on one date without notice, concurrency or run checks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationOverride {
    pub id: Ulid,
    pub person: PersonId,
    pub date: Day,
    pub granted_by: PersonId,
    pub granted_at: Ms,
}

/// Flat event records, one per state change. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomCreated {
        room: Room,
    },
    RoomDeleted {
        id: Ulid,
    },
    PeriodDefined {
        period: Period,
    },
    EmployeeUpserted {
        employee: Employee,
    },
    ConstraintUpdated {
        key: ConstraintKey,
        value: i64,
    },
    ConstraintCleared {
        key: ConstraintKey,
    },
    BlockedRangeAdded {
        range: BlockedRange,
    },
    BlockedRangeRemoved {
        id: Ulid,
    },
    OverrideGranted {
        grant: AuthorizationOverride,
    },
    OverrideRevoked {
        id: Ulid,
    },
    LeaveRequested {
        request: LeaveRequest,
    },
    LeaveReviewed {
        id: Ulid,
        status: Status,
        by: PersonId,
        at: Ms,
    },
    LeaveDeleted {
        id: Ulid,
    },
    RoomBooked {
        booking: RoomBooking,
    },
    /// A whole series in one record, so replay never sees half of it.
    RecurrenceCreated {
        template: RecurrenceTemplate,
        bookings: Vec<RoomBooking>,
    },
    /// New period range and description for an existing booking. Day and room stay.
    BookingUpdated {
        id: Ulid,
        room_id: Ulid,
        periods: PeriodRange,
        description: String,
    },
    BookingDeleted {
        id: Ulid,
        room_id: Ulid,
    },
    TemplateDeleted {
        id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaSummary {
    pub person: PersonId,
    pub used: u32,
    pub limit: u32,
}

impl QuotaSummary {
    pub fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.used)
    }
}

/// Outcome of a successful leave creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveReceipt {
    pub id: Ulid,
    pub status: Status,
    pub obfuscate: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeriesReceipt {
    pub parent_id: Ulid,
    pub child_count: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LeaveFilter {
    pub person: Option<PersonId>,
    pub date: Option<Day>,
    pub status: Option<Status>,
    pub category: Option<Category>,
}

impl LeaveFilter {
    pub fn matches(&self, r: &LeaveRequest) -> bool {
        self.person.as_ref().is_none_or(|p| *p == r.person)
            && self.date.is_none_or(|d| d == r.date)
            && self.status.is_none_or(|s| s == r.status)
            && self.category.is_none_or(|c| c == r.category)
    }
}
