//! Read-side operations. All of these take read locks only; a write in
//! flight on the same room briefly blocks the reader and the reader then
//! sees the committed result.

use ulid::Ulid;

use crate::model::*;
use crate::pricing::{self, Quote};

use super::{Engine, EngineError, availability};

impl Engine {
    pub async fn room_info(&self, room_id: &Ulid) -> Result<RoomInfo, EngineError> {
        let rs = self.room(room_id).ok_or(EngineError::RoomNotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(RoomInfo {
            id: guard.id,
            room_type_id: guard.room_type_id,
            number: guard.number.clone(),
            status: guard.status,
            rate_override: guard.rate_override,
        })
    }

    pub async fn get_booking(&self, booking_id: &Ulid) -> Result<BookingInfo, EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let rs = self.room(&room_id).ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        guard
            .booking(booking_id)
            .map(BookingInfo::from_booking)
            .ok_or(EngineError::BookingNotFound(*booking_id))
    }

    pub async fn booking_by_reference(&self, reference: &str) -> Result<BookingInfo, EngineError> {
        let booking_id = self
            .references
            .get(reference)
            .map(|e| *e.value())
            .ok_or_else(|| EngineError::ReferenceNotFound(reference.to_string()))?;
        self.get_booking(&booking_id).await
    }

    /// Full ledger for a booking, in recorded order.
    pub async fn ledger_entries(&self, booking_id: &Ulid) -> Result<Vec<LedgerEntry>, EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let rs = self.room(&room_id).ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        guard
            .booking(booking_id)
            .map(|b| b.ledger.clone())
            .ok_or(EngineError::BookingNotFound(*booking_id))
    }

    pub async fn cancellation(
        &self,
        booking_id: &Ulid,
    ) -> Result<Option<CancellationRecord>, EngineError> {
        let room_id = self
            .room_for_booking(booking_id)
            .ok_or(EngineError::BookingNotFound(*booking_id))?;
        let rs = self.room(&room_id).ok_or(EngineError::RoomNotFound(room_id))?;
        let guard = rs.read().await;
        guard
            .booking(booking_id)
            .map(|b| b.cancellation.clone())
            .ok_or(EngineError::BookingNotFound(*booking_id))
    }

    /// Every booking on a room, sorted by check-in.
    pub async fn bookings_for_room(&self, room_id: &Ulid) -> Result<Vec<BookingInfo>, EngineError> {
        let rs = self.room(room_id).ok_or(EngineError::RoomNotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(guard.bookings.iter().map(BookingInfo::from_booking).collect())
    }

    /// Whether the stay fits on the room with no active-booking conflict.
    /// Advisory only — `create_booking` re-checks under the write lock.
    pub async fn is_available(&self, room_id: &Ulid, stay: &Stay) -> Result<bool, EngineError> {
        pricing::validate_stay(stay)?;
        let rs = self.room(room_id).ok_or(EngineError::RoomNotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(availability::find_conflict(&guard, stay).is_none())
    }

    /// Price a stay on a specific room without creating anything.
    pub async fn quote(
        &self,
        room_id: &Ulid,
        stay: &Stay,
        adults: u32,
        children: u32,
    ) -> Result<Quote, EngineError> {
        let rs = self.room(room_id).ok_or(EngineError::RoomNotFound(*room_id))?;
        let guard = rs.read().await;
        let room_type = self
            .room_type(&guard.room_type_id)
            .ok_or(EngineError::RoomTypeNotFound(guard.room_type_id))?;
        pricing::quote(&room_type, guard.rate_override, stay, adults, children)
    }

    /// All rooms that could take this party for this stay, each with a
    /// price. Rooms out of service (cleaning, maintenance) are skipped, as
    /// are rooms whose type capacity is below the party size. A direct
    /// `create_booking` may still exceed capacity with the surcharge; the
    /// listing only offers rooms that fit.
    pub async fn list_available(
        &self,
        stay: &Stay,
        adults: u32,
        children: u32,
    ) -> Result<Vec<AvailableRoom>, EngineError> {
        pricing::validate_stay(stay)?;
        pricing::validate_occupancy(adults, children)?;

        let room_ids: Vec<Ulid> = self.rooms.iter().map(|e| *e.key()).collect();
        let mut out = Vec::new();
        for room_id in room_ids {
            let Some(rs) = self.room(&room_id) else { continue };
            let guard = rs.read().await;
            if !guard.status.bookable() {
                continue;
            }
            let Some(room_type) = self.room_type(&guard.room_type_id) else { continue };
            if room_type.capacity < adults + children {
                continue;
            }
            if availability::find_conflict(&guard, stay).is_some() {
                continue;
            }
            let quote = pricing::quote(&room_type, guard.rate_override, stay, adults, children)?;
            out.push(AvailableRoom {
                room: RoomInfo {
                    id: guard.id,
                    room_type_id: guard.room_type_id,
                    number: guard.number.clone(),
                    status: guard.status,
                    rate_override: guard.rate_override,
                },
                quote,
            });
        }
        out.sort_by(|a, b| a.quote.total.cmp(&b.quote.total).then(a.room.number.cmp(&b.room.number)));
        Ok(out)
    }

    /// Free sub-ranges of a window on one room.
    pub async fn free_nights(&self, room_id: &Ulid, window: &Stay) -> Result<Vec<Stay>, EngineError> {
        pricing::validate_stay(window)?;
        let rs = self.room(room_id).ok_or(EngineError::RoomNotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(availability::free_ranges(&guard, window))
    }

    /// Who holds the room on a given night, derived from the bookings —
    /// never from the room's operational status.
    pub async fn room_occupancy(
        &self,
        room_id: &Ulid,
        date: chrono::NaiveDate,
    ) -> Result<Option<BookingInfo>, EngineError> {
        let rs = self.room(room_id).ok_or(EngineError::RoomNotFound(*room_id))?;
        let guard = rs.read().await;
        Ok(guard
            .bookings
            .iter()
            .find(|b| b.blocks_availability() && b.stay.contains_date(date))
            .map(BookingInfo::from_booking))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn room_ids(&self) -> Vec<Ulid> {
        self.rooms.iter().map(|e| *e.key()).collect()
    }

    pub fn room_types(&self) -> Vec<RoomType> {
        self.room_types.iter().map(|e| e.value().clone()).collect()
    }
}
