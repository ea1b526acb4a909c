use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minor currency units — the only money type. Integer arithmetic keeps
/// `paid + remaining == total` exact; there is no floating-point epsilon.
pub type Money = i64;

/// Half-open stay interval `[check_in, check_out)` — the check-out day is
/// free for a same-day arrival.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stay {
    pub check_in: NaiveDate,
    pub check_out: NaiveDate,
}

impl Stay {
    pub fn new(check_in: NaiveDate, check_out: NaiveDate) -> Self {
        debug_assert!(check_in < check_out, "Stay check_in must precede check_out");
        Self { check_in, check_out }
    }

    pub fn nights(&self) -> i64 {
        (self.check_out - self.check_in).num_days()
    }

    pub fn overlaps(&self, other: &Stay) -> bool {
        self.check_in < other.check_out && other.check_in < self.check_out
    }

    pub fn contains_date(&self, date: NaiveDate) -> bool {
        self.check_in <= date && date < self.check_out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoomStatus {
    Available,
    Occupied,
    Cleaning,
    Maintenance,
}

impl RoomStatus {
    /// Rooms pulled out of service never show up in availability listings.
    pub fn bookable(&self) -> bool {
        matches!(self, RoomStatus::Available | RoomStatus::Occupied)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    CheckedIn,
    CheckedOut,
    Cancelled,
}

impl BookingStatus {
    /// Only confirmed and in-house bookings block the room.
    pub fn blocks_availability(&self) -> bool {
        matches!(self, BookingStatus::Confirmed | BookingStatus::CheckedIn)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Partial,
    Completed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BookingSource {
    WalkIn,
    Online,
    Corporate,
    /// House-account booking — confirmed without any payment.
    OwnerReference,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    BankTransfer,
    Mobile,
}

/// Which channel a ledger entry arrived through. The legacy system kept
/// deposits, front-desk cash, and installments in three separate tables;
/// here they are one append-only ledger with a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntrySource {
    Deposit,
    FrontDesk,
    Installment,
    Refund,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryStatus {
    Completed,
    Pending,
    Refunded,
    PartiallyRefunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RefundType {
    Full,
    Partial75,
    Partial50,
    Partial25,
    NoRefund,
    FullMedical,
    FullHotelFault,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancellationReason {
    GuestRequest,
    NoShow,
    MedicalEmergency,
    HotelFault,
    Overbooking,
}

/// One money movement. Refund entries carry a negative amount and reference
/// the entry they reverse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: Ulid,
    pub booking_id: Ulid,
    pub amount: Money,
    pub method: PaymentMethod,
    pub source: EntrySource,
    pub status: EntryStatus,
    pub txn_id: Option<String>,
    /// Receipt code doubles as the idempotency key for replayed submissions.
    pub receipt: String,
    pub refund_of: Option<Ulid>,
    /// Free-text annotation; refund entries carry the refund reason here.
    pub note: Option<String>,
    pub recorded_by: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationRecord {
    pub reason: CancellationReason,
    pub fee: Money,
    pub refund: Money,
    pub refund_type: RefundType,
    pub actor: Option<String>,
    pub cancelled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub id: Ulid,
    /// Human-facing reference, unique across the property.
    pub reference: String,
    pub guest_id: Ulid,
    pub room_id: Ulid,
    pub stay: Stay,
    pub adults: u32,
    pub children: u32,
    pub source: BookingSource,
    pub notes: Option<String>,
    pub status: BookingStatus,
    pub total: Money,
    pub paid: Money,
    pub remaining: Money,
    pub payment_status: PaymentStatus,
    pub ledger: Vec<LedgerEntry>,
    pub cancellation: Option<CancellationRecord>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub checked_in_at: Option<DateTime<Utc>>,
    pub checked_out_at: Option<DateTime<Utc>>,
}

impl Booking {
    pub fn blocks_availability(&self) -> bool {
        self.status.blocks_availability()
    }
}

/// Read-only rate card for a class of rooms.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomType {
    pub id: Ulid,
    pub name: String,
    /// Base nightly rate.
    pub base_rate: Money,
    /// Type-level override; wins over everything when positive.
    pub rate_override: Option<Money>,
    pub capacity: u32,
    pub description: Option<String>,
}

/// A room plus every booking taken on it, sorted by check-in date.
/// Occupancy is always derived from the bookings — the operational status
/// only records housekeeping/maintenance blocks.
#[derive(Debug, Clone)]
pub struct RoomState {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub number: String,
    pub status: RoomStatus,
    /// Room-level rate override; applies when positive and no type override.
    pub rate_override: Option<Money>,
    pub bookings: Vec<Booking>,
}

impl RoomState {
    pub fn new(
        id: Ulid,
        room_type_id: Ulid,
        number: String,
        rate_override: Option<Money>,
    ) -> Self {
        Self {
            id,
            room_type_id,
            number,
            status: RoomStatus::Available,
            rate_override,
            bookings: Vec::new(),
        }
    }

    /// Insert keeping the check-in sort order.
    pub fn insert_booking(&mut self, booking: Booking) {
        let pos = self
            .bookings
            .binary_search_by_key(&booking.stay.check_in, |b| b.stay.check_in)
            .unwrap_or_else(|e| e);
        self.bookings.insert(pos, booking);
    }

    pub fn booking(&self, id: &Ulid) -> Option<&Booking> {
        self.bookings.iter().find(|b| b.id == *id)
    }

    pub fn booking_mut(&mut self, id: &Ulid) -> Option<&mut Booking> {
        self.bookings.iter_mut().find(|b| b.id == *id)
    }

    /// Bookings whose stay overlaps the query window. Binary search skips
    /// everything checking in at or after the window's check-out.
    pub fn overlapping(&self, query: &Stay) -> impl Iterator<Item = &Booking> {
        let right = self
            .bookings
            .partition_point(|b| b.stay.check_in < query.check_out);
        self.bookings[..right]
            .iter()
            .filter(move |b| b.stay.check_out > query.check_in)
    }
}

/// The event types — flat, no nesting. This is the WAL record format; one
/// WAL frame holds one or more events committed atomically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    RoomTypeDefined {
        id: Ulid,
        name: String,
        base_rate: Money,
        rate_override: Option<Money>,
        capacity: u32,
        description: Option<String>,
    },
    RoomCreated {
        id: Ulid,
        room_type_id: Ulid,
        number: String,
        rate_override: Option<Money>,
    },
    RoomStatusChanged {
        id: Ulid,
        status: RoomStatus,
    },
    BookingCreated {
        id: Ulid,
        room_id: Ulid,
        reference: String,
        guest_id: Ulid,
        stay: Stay,
        adults: u32,
        children: u32,
        source: BookingSource,
        notes: Option<String>,
        total: Money,
        status: BookingStatus,
        at: DateTime<Utc>,
    },
    BookingConfirmed {
        booking_id: Ulid,
        room_id: Ulid,
        at: DateTime<Utc>,
    },
    GuestCheckedIn {
        booking_id: Ulid,
        room_id: Ulid,
        at: DateTime<Utc>,
    },
    GuestCheckedOut {
        booking_id: Ulid,
        room_id: Ulid,
        at: DateTime<Utc>,
    },
    BookingCancelled {
        booking_id: Ulid,
        room_id: Ulid,
        reason: CancellationReason,
        fee: Money,
        refund: Money,
        refund_type: RefundType,
        actor: Option<String>,
        at: DateTime<Utc>,
    },
    PaymentRecorded {
        entry_id: Ulid,
        booking_id: Ulid,
        room_id: Ulid,
        amount: Money,
        method: PaymentMethod,
        source: EntrySource,
        status: EntryStatus,
        txn_id: Option<String>,
        receipt: String,
        recorded_by: Option<String>,
        at: DateTime<Utc>,
    },
    PaymentRefunded {
        entry_id: Ulid,
        booking_id: Ulid,
        room_id: Ulid,
        /// Negative — money leaving the ledger.
        amount: Money,
        method: PaymentMethod,
        refund_of: Option<Ulid>,
        receipt: String,
        reason: Option<String>,
        actor: Option<String>,
        at: DateTime<Utc>,
    },
}

/// Reference codes: `BK-` plus the random tail of a fresh ULID — never a
/// wall-clock timestamp. Uniqueness is still collision-checked under the
/// room lock before a code is committed.
pub fn reference_code() -> String {
    let ulid = Ulid::new().to_string();
    format!("BK-{}", &ulid[ulid.len() - 10..])
}

/// Receipt codes for ledger entries, same scheme.
pub fn receipt_code() -> String {
    let ulid = Ulid::new().to_string();
    format!("RC-{}", &ulid[ulid.len() - 10..])
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoomInfo {
    pub id: Ulid,
    pub room_type_id: Ulid,
    pub number: String,
    pub status: RoomStatus,
    pub rate_override: Option<Money>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookingInfo {
    pub id: Ulid,
    pub reference: String,
    pub guest_id: Ulid,
    pub room_id: Ulid,
    pub stay: Stay,
    pub adults: u32,
    pub children: u32,
    pub source: BookingSource,
    pub status: BookingStatus,
    pub total: Money,
    pub paid: Money,
    pub remaining: Money,
    pub payment_status: PaymentStatus,
}

impl BookingInfo {
    pub fn from_booking(b: &Booking) -> Self {
        Self {
            id: b.id,
            reference: b.reference.clone(),
            guest_id: b.guest_id,
            room_id: b.room_id,
            stay: b.stay,
            adults: b.adults,
            children: b.children,
            source: b.source,
            status: b.status,
            total: b.total,
            paid: b.paid,
            remaining: b.remaining,
            payment_status: b.payment_status,
        }
    }
}

/// One room offered by `list_available`, priced for the requested stay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailableRoom {
    pub room: RoomInfo,
    pub quote: crate::pricing::Quote,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn stub_booking(check_in: &str, check_out: &str, status: BookingStatus) -> Booking {
        let stay = Stay::new(d(check_in), d(check_out));
        Booking {
            id: Ulid::new(),
            reference: reference_code(),
            guest_id: Ulid::new(),
            room_id: Ulid::new(),
            stay,
            adults: 2,
            children: 0,
            source: BookingSource::Online,
            notes: None,
            status,
            total: 3000,
            paid: 0,
            remaining: 3000,
            payment_status: PaymentStatus::Pending,
            ledger: Vec::new(),
            cancellation: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            checked_in_at: None,
            checked_out_at: None,
        }
    }

    #[test]
    fn stay_basics() {
        let s = Stay::new(d("2025-03-01"), d("2025-03-05"));
        assert_eq!(s.nights(), 4);
        assert!(s.contains_date(d("2025-03-01")));
        assert!(s.contains_date(d("2025-03-04")));
        assert!(!s.contains_date(d("2025-03-05"))); // half-open
    }

    #[test]
    fn stay_overlap() {
        let a = Stay::new(d("2025-03-01"), d("2025-03-05"));
        let b = Stay::new(d("2025-03-04"), d("2025-03-08"));
        let c = Stay::new(d("2025-03-05"), d("2025-03-08"));
        assert!(a.overlaps(&b));
        assert!(!a.overlaps(&c)); // same-day turnover, not a conflict
    }

    #[test]
    fn booking_sorted_insertion() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), None);
        rs.insert_booking(stub_booking("2025-03-10", "2025-03-12", BookingStatus::Confirmed));
        rs.insert_booking(stub_booking("2025-03-01", "2025-03-03", BookingStatus::Confirmed));
        rs.insert_booking(stub_booking("2025-03-05", "2025-03-07", BookingStatus::Confirmed));
        let check_ins: Vec<_> = rs.bookings.iter().map(|b| b.stay.check_in).collect();
        assert_eq!(
            check_ins,
            vec![d("2025-03-01"), d("2025-03-05"), d("2025-03-10")]
        );
    }

    #[test]
    fn overlapping_window() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), None);
        rs.insert_booking(stub_booking("2025-03-01", "2025-03-03", BookingStatus::Confirmed));
        rs.insert_booking(stub_booking("2025-03-04", "2025-03-08", BookingStatus::Confirmed));
        rs.insert_booking(stub_booking("2025-03-20", "2025-03-22", BookingStatus::Confirmed));

        let query = Stay::new(d("2025-03-05"), d("2025-03-10"));
        let hits: Vec<_> = rs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].stay.check_in, d("2025-03-04"));
    }

    #[test]
    fn overlapping_excludes_adjacent() {
        let mut rs = RoomState::new(Ulid::new(), Ulid::new(), "101".into(), None);
        rs.insert_booking(stub_booking("2025-03-01", "2025-03-05", BookingStatus::Confirmed));
        let query = Stay::new(d("2025-03-05"), d("2025-03-08"));
        assert_eq!(rs.overlapping(&query).count(), 0);
    }

    #[test]
    fn blocking_statuses() {
        assert!(BookingStatus::Confirmed.blocks_availability());
        assert!(BookingStatus::CheckedIn.blocks_availability());
        assert!(!BookingStatus::Pending.blocks_availability());
        assert!(!BookingStatus::Cancelled.blocks_availability());
        assert!(!BookingStatus::CheckedOut.blocks_availability());
    }

    #[test]
    fn reference_code_shape() {
        let r = reference_code();
        assert!(r.starts_with("BK-"));
        assert_eq!(r.len(), 13);
        // Two draws should essentially never collide.
        assert_ne!(reference_code(), reference_code());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::BookingCreated {
            id: Ulid::new(),
            room_id: Ulid::new(),
            reference: reference_code(),
            guest_id: Ulid::new(),
            stay: Stay::new(d("2025-03-01"), d("2025-03-05")),
            adults: 2,
            children: 1,
            source: BookingSource::WalkIn,
            notes: Some("late arrival".into()),
            total: 12_000,
            status: BookingStatus::Pending,
            at: Utc::now(),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
