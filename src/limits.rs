use crate::model::Ms;

const DAY_MS: Ms = 86_400_000;

/// 1970-01-01T00:00:00Z
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
/// 9999-12-31T23:59:59.999Z
pub const MAX_VALID_TIMESTAMP_MS: Ms = 253_402_300_799_999;

/// Longest single reservation or window.
pub const MAX_SPAN_DURATION_MS: Ms = 3 * 365 * DAY_MS;
/// Widest window accepted by availability queries.
pub const MAX_QUERY_WINDOW_MS: Ms = 5 * 365 * DAY_MS;

pub const MAX_CARS: usize = 1_000_000;
pub const MAX_INTERVALS_PER_CAR: usize = 100_000;

pub const MAX_TEXT_LEN: usize = 256;

/// Results per page of a catalog search.
pub const PAGE_SIZE: usize = 10;
