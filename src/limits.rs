pub const MAX_SPECIALISTS: usize = 100_000;
pub const MAX_INTERVALS_PER_DAY: usize = 96;
pub const MAX_EXCEPTIONS: usize = 2_000;
pub const MAX_BOOKINGS_PER_SPECIALIST: usize = 100_000;
pub const MAX_TIMEZONE_LEN: usize = 64;
/// Widest `available_slots` date range, inclusive.
pub const MAX_QUERY_DAYS: i64 = 93;
