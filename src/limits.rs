//! Hard input bounds. These protect the engine from pathological clients;
//! none of them encode product policy.

use crate::model::Ms;

pub const MAX_ROOMS_PER_CONFERENCE: usize = 4096;
pub const MAX_TALKS_PER_CONFERENCE: usize = 65_536;
pub const MAX_BOOKINGS_PER_ROOM: usize = 4096;

pub const MAX_NAME_LEN: usize = 256;
pub const MAX_TITLE_LEN: usize = 512;
pub const MAX_TEXT_LEN: usize = 4096;

/// Multi-row `INSERT INTO bookings` cap.
pub const MAX_BATCH_SIZE: usize = 64;

/// A talk longer than a full day is a client bug.
pub const MAX_TALK_DURATION_MIN: u32 = 24 * 60;

/// Widest window accepted by availability queries: one year.
pub const MAX_QUERY_WINDOW_MS: Ms = 366 * 24 * 3_600_000;

/// 1970-01-01 .. 2100-01-01. Anything outside is a client bug.
pub const MIN_VALID_TIMESTAMP_MS: Ms = 0;
pub const MAX_VALID_TIMESTAMP_MS: Ms = 4_102_444_800_000;

/// Grid cells between 5 minutes and 4 hours.
pub const MIN_GRID_CELL_MIN: u32 = 5;
pub const MAX_GRID_CELL_MIN: u32 = 240;

pub const MAX_CONFERENCES: usize = 256;
pub const MAX_CONFERENCE_NAME_LEN: usize = 128;
