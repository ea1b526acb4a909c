//! Operational limits and documented business constants.

use crate::model::Money;

pub const MAX_ROOMS: usize = 10_000;
pub const MAX_ROOM_TYPES: usize = 256;
pub const MAX_BOOKINGS_PER_ROOM: usize = 50_000;
pub const MAX_LEDGER_ENTRIES_PER_BOOKING: usize = 1_000;

pub const MAX_NAME_LEN: usize = 120;
pub const MAX_NOTES_LEN: usize = 2_000;
pub const MAX_REASON_LEN: usize = 500;
pub const MAX_TXN_ID_LEN: usize = 128;

/// Longest bookable stay.
pub const MAX_STAY_NIGHTS: i64 = 365;

/// Stay dates outside this year range are rejected as garbage input.
pub const MIN_STAY_YEAR: i32 = 2000;
pub const MAX_STAY_YEAR: i32 = 2200;

/// Nightly surcharge per occupant beyond room capacity, in currency units.
pub const EXTRA_OCCUPANT_SURCHARGE: Money = 25;

/// Occupant count sanity cap (adults + children).
pub const MAX_OCCUPANTS: u32 = 16;

/// Hour of day (UTC) at which check-in opens; cancellation windows are
/// measured against this instant on the check-in date.
pub const CHECK_IN_HOUR: u32 = 14;

/// Attempts to draw a fresh reference code before giving up.
pub const MAX_REFERENCE_RETRIES: usize = 8;
