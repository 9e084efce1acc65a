//! Hard caps that bound memory and per-request work for a single tenant.

pub const MAX_TENANTS: usize = 64;
pub const MAX_TENANT_NAME_LEN: usize = 128;

pub const MAX_ROOMS_PER_TENANT: usize = 1_000;
pub const MAX_PERIODS: usize = 32;
pub const MAX_EMPLOYEES: usize = 10_000;
pub const MAX_BOOKINGS_PER_ROOM: usize = 50_000;
pub const MAX_LEAVE_REQUESTS: usize = 500_000;
pub const MAX_BLOCKED_RANGES: usize = 1_000;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_PERSON_ID_LEN: usize = 128;
pub const MAX_DESCRIPTION_LEN: usize = 2_000;

/// Upper bound on dates one recurrence template may expand into.
pub const MAX_RECURRENCE_DATES: usize = 400;

/// Half-width of the window scanned for consecutive leave days.
pub const CONSECUTIVE_WINDOW_DAYS: i64 = 10;

pub const MAX_IN_CLAUSE_IDS: usize = 1_000;
