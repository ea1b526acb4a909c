use ulid::Ulid;

use crate::model::{BookingStatus, Money};

#[derive(Debug)]
pub enum EngineError {
    /// check_out is not strictly after check_in.
    InvalidInterval,
    /// Fewer than one adult.
    InvalidOccupancy,
    /// An active booking already holds the room; carries the winner's id.
    RoomUnavailable(Ulid),
    RoomNotFound(Ulid),
    RoomTypeNotFound(Ulid),
    BookingNotFound(Ulid),
    ReferenceNotFound(String),
    EntryNotFound(Ulid),
    /// Illegal state change, double-cancel included.
    InvalidTransition {
        from: BookingStatus,
        action: &'static str,
    },
    AmountMismatch {
        expected: Money,
        got: Money,
    },
    RefundExceedsOriginal {
        requested: Money,
        available: Money,
    },
    LimitExceeded(&'static str),
    Collaborator(String),
    WalError(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidInterval => write!(f, "check-out must be after check-in"),
            EngineError::InvalidOccupancy => write!(f, "at least one adult required"),
            EngineError::RoomUnavailable(id) => {
                write!(f, "room unavailable: conflicts with booking {id}")
            }
            EngineError::RoomNotFound(id) => write!(f, "room not found: {id}"),
            EngineError::RoomTypeNotFound(id) => write!(f, "room type not found: {id}"),
            EngineError::BookingNotFound(id) => write!(f, "booking not found: {id}"),
            EngineError::ReferenceNotFound(r) => write!(f, "no booking with reference {r}"),
            EngineError::EntryNotFound(id) => write!(f, "ledger entry not found: {id}"),
            EngineError::InvalidTransition { from, action } => {
                write!(f, "cannot {action} a booking in state {from:?}")
            }
            EngineError::AmountMismatch { expected, got } => {
                write!(f, "amount mismatch: expected {expected}, got {got}")
            }
            EngineError::RefundExceedsOriginal { requested, available } => {
                write!(
                    f,
                    "refund {requested} exceeds refundable amount {available}"
                )
            }
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::Collaborator(msg) => write!(f, "collaborator failed: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
