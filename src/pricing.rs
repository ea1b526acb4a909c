//! Nightly rate resolution and stay pricing. Pure — callers supply the room
//! and rate-card records, nothing here touches the store.

use serde::{Deserialize, Serialize};

use crate::engine::EngineError;
use crate::limits::{EXTRA_OCCUPANT_SURCHARGE, MAX_OCCUPANTS, MAX_STAY_NIGHTS, MAX_STAY_YEAR, MIN_STAY_YEAR};
use crate::model::{Money, RoomType, Stay};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub nightly_rate: Money,
    pub nights: i64,
    /// Extra-occupant surcharge per night, already folded into `total`.
    pub surcharge: Money,
    pub total: Money,
}

/// Resolve the nightly rate. Priority: type-level override, then room-level
/// override, then the type's base rate. Overrides only count when positive.
pub fn nightly_rate(room_type: &RoomType, room_override: Option<Money>) -> Money {
    if let Some(rate) = room_type.rate_override
        && rate > 0 {
            return rate;
        }
    if let Some(rate) = room_override
        && rate > 0 {
            return rate;
        }
    room_type.base_rate
}

/// Reject garbage stays before they reach the store.
pub fn validate_stay(stay: &Stay) -> Result<(), EngineError> {
    if stay.check_out <= stay.check_in {
        return Err(EngineError::InvalidInterval);
    }
    if stay.nights() > MAX_STAY_NIGHTS {
        return Err(EngineError::LimitExceeded("stay too long"));
    }
    use chrono::Datelike;
    if stay.check_in.year() < MIN_STAY_YEAR || stay.check_out.year() > MAX_STAY_YEAR {
        return Err(EngineError::LimitExceeded("stay date out of range"));
    }
    Ok(())
}

pub fn validate_occupancy(adults: u32, children: u32) -> Result<(), EngineError> {
    if adults < 1 {
        return Err(EngineError::InvalidOccupancy);
    }
    if adults + children > MAX_OCCUPANTS {
        return Err(EngineError::LimitExceeded("too many occupants"));
    }
    Ok(())
}

/// Price a stay: `(nightly_rate + surcharge) * nights`, where each occupant
/// beyond room capacity adds a fixed nightly surcharge.
pub fn quote(
    room_type: &RoomType,
    room_override: Option<Money>,
    stay: &Stay,
    adults: u32,
    children: u32,
) -> Result<Quote, EngineError> {
    validate_stay(stay)?;
    validate_occupancy(adults, children)?;

    let rate = nightly_rate(room_type, room_override);
    let extra = (adults + children).saturating_sub(room_type.capacity) as Money;
    let surcharge = extra * EXTRA_OCCUPANT_SURCHARGE;
    let nights = stay.nights();
    Ok(Quote {
        nightly_rate: rate,
        nights,
        surcharge,
        total: (rate + surcharge) * nights,
    })
}
