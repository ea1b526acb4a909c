//! The payment ledger. Entries are append-only; corrections are new negative
//! entries, never edits. Paid/remaining/payment-status are always recomputed
//! from the ledger, so there is no drift between the rollup and the entries.

use ulid::Ulid;

use crate::limits;
use crate::model::*;

use super::{Engine, EngineError, availability};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reconciliation {
    pub paid: Money,
    pub remaining: Money,
    pub status: PaymentStatus,
}

/// Fold the ledger into the rollup. Pending entries don't count as money in
/// hand; refunded originals still count (the negative refund entry subtracts
/// the money exactly once).
pub fn reconcile(entries: &[LedgerEntry], total: Money) -> Reconciliation {
    let paid: Money = entries
        .iter()
        .filter(|e| e.status != EntryStatus::Pending)
        .map(|e| e.amount)
        .sum();
    let has_refund = entries.iter().any(|e| e.amount < 0);
    let remaining = (total - paid).max(0);

    let status = if has_refund && paid <= 0 {
        PaymentStatus::Refunded
    } else if remaining == 0 && paid >= total {
        PaymentStatus::Completed
    } else if paid > 0 {
        PaymentStatus::Partial
    } else {
        PaymentStatus::Pending
    };

    Reconciliation { paid, remaining, status }
}

/// Recompute a booking's rollup in place.
pub(super) fn apply_reconcile(b: &mut Booking) {
    let r = reconcile(&b.ledger, b.total);
    b.paid = r.paid;
    b.remaining = r.remaining;
    b.payment_status = r.status;
}

/// Sum already refunded against one original entry (positive number).
fn refunded_against(b: &Booking, original_id: &Ulid) -> Money {
    b.ledger
        .iter()
        .filter(|e| e.refund_of == Some(*original_id))
        .map(|e| -e.amount)
        .sum()
}

/// After a refund lands, restamp the original entry's status.
pub(super) fn mark_refunded(b: &mut Booking, original_id: &Ulid) {
    let covered = refunded_against(b, original_id);
    if let Some(original) = b.ledger.iter_mut().find(|e| e.id == *original_id) {
        original.status = if covered >= original.amount {
            EntryStatus::Refunded
        } else {
            EntryStatus::PartiallyRefunded
        };
    }
}

impl Engine {
    /// Append a payment to a booking's ledger. Idempotent on `txn_id`: a
    /// replayed gateway callback returns the already-recorded entry instead
    /// of double-charging. Paying more than the outstanding balance is
    /// rejected; a payment against a pending booking confirms it in the
    /// same WAL frame.
    pub async fn record_payment(
        &self,
        booking_id: Ulid,
        input: super::PaymentInput,
        source: EntrySource,
    ) -> Result<LedgerEntry, EngineError> {
        if input.amount <= 0 {
            return Err(EngineError::LimitExceeded("payment amount must be positive"));
        }
        if let Some(txn) = &input.txn_id
            && txn.len() > limits::MAX_TXN_ID_LEN {
                return Err(EngineError::LimitExceeded("txn id too long"));
            }

        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let b = guard
            .booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;

        if let Some(txn) = &input.txn_id
            && let Some(existing) = b.ledger.iter().find(|e| e.txn_id.as_deref() == Some(txn)) {
                return Ok(existing.clone());
            }

        match b.status {
            BookingStatus::Cancelled | BookingStatus::CheckedOut => {
                return Err(EngineError::InvalidTransition {
                    from: b.status,
                    action: "record a payment on",
                });
            }
            _ => {}
        }
        if b.ledger.len() >= limits::MAX_LEDGER_ENTRIES_PER_BOOKING {
            return Err(EngineError::LimitExceeded("ledger full for booking"));
        }
        if input.amount > b.remaining {
            return Err(EngineError::AmountMismatch {
                expected: b.remaining,
                got: input.amount,
            });
        }

        let was_pending = b.status == BookingStatus::Pending;
        // Auto-confirming makes the booking start blocking the room; a
        // confirmed rival that took these nights in the meantime wins.
        if was_pending
            && let Some(winner) =
                availability::find_conflict_excluding(&guard, &b.stay, &booking_id) {
                metrics::counter!(crate::observability::BOOKING_CONFLICTS_TOTAL).increment(1);
                return Err(EngineError::RoomUnavailable(winner));
            }
        let entry_id = Ulid::new();
        let at = chrono::Utc::now();
        let mut events = vec![Event::PaymentRecorded {
            entry_id,
            booking_id,
            room_id,
            amount: input.amount,
            method: input.method,
            source,
            status: EntryStatus::Completed,
            txn_id: input.txn_id.clone(),
            receipt: receipt_code(),
            recorded_by: input.recorded_by.clone(),
            at,
        }];
        if was_pending {
            events.push(Event::BookingConfirmed { booking_id, room_id, at });
        }

        self.persist_and_apply(room_id, &mut guard, &events).await?;

        metrics::counter!(crate::observability::PAYMENTS_RECORDED_TOTAL).increment(1);
        if was_pending {
            metrics::counter!(crate::observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        }

        let entry = guard
            .booking(&booking_id)
            .and_then(|b| b.ledger.iter().find(|e| e.id == entry_id))
            .cloned()
            .ok_or(EngineError::EntryNotFound(entry_id))?;
        drop(guard);

        self.audit_effect(
            input.recorded_by,
            "payment.recorded",
            "booking",
            booking_id,
            serde_json::json!({ "entry": entry.id.to_string(), "amount": entry.amount }),
        );
        Ok(entry)
    }

    /// Reverse money from one ledger entry. The refund is a new negative
    /// entry pointing back at the original; the original is restamped
    /// Refunded or PartiallyRefunded.
    pub async fn refund_payment(
        &self,
        entry_id: Ulid,
        amount: Money,
        reason: Option<String>,
        actor: Option<String>,
    ) -> Result<LedgerEntry, EngineError> {
        if amount <= 0 {
            return Err(EngineError::LimitExceeded("refund amount must be positive"));
        }
        if let Some(r) = &reason
            && r.len() > limits::MAX_REASON_LEN {
                return Err(EngineError::LimitExceeded("refund reason too long"));
            }

        let booking_id = self
            .entry_to_booking
            .get(&entry_id)
            .map(|e| *e.value())
            .ok_or(EngineError::EntryNotFound(entry_id))?;
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let b = guard
            .booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        let original = b
            .ledger
            .iter()
            .find(|e| e.id == entry_id)
            .ok_or(EngineError::EntryNotFound(entry_id))?;

        if original.amount <= 0 {
            // Refunding a refund is never legal.
            return Err(EngineError::RefundExceedsOriginal { requested: amount, available: 0 });
        }
        let available_on_entry = original.amount - refunded_against(b, &entry_id);
        if amount > available_on_entry {
            return Err(EngineError::RefundExceedsOriginal {
                requested: amount,
                available: available_on_entry.max(0),
            });
        }
        // Cross-entry guard: never let cumulative refunds pass cumulative
        // payments, whatever per-entry math says.
        let payments: Money = b.ledger.iter().filter(|e| e.amount > 0).map(|e| e.amount).sum();
        let refunds: Money = b.ledger.iter().filter(|e| e.amount < 0).map(|e| -e.amount).sum();
        if refunds + amount > payments {
            return Err(EngineError::RefundExceedsOriginal {
                requested: amount,
                available: payments - refunds,
            });
        }

        let method = original.method;
        let refund_id = Ulid::new();
        let event = Event::PaymentRefunded {
            entry_id: refund_id,
            booking_id,
            room_id,
            amount: -amount,
            method,
            refund_of: Some(entry_id),
            receipt: receipt_code(),
            reason,
            actor: actor.clone(),
            at: chrono::Utc::now(),
        };
        self.persist_and_apply(room_id, &mut guard, std::slice::from_ref(&event)).await?;
        metrics::counter!(crate::observability::REFUNDS_ISSUED_TOTAL).increment(1);

        let entry = guard
            .booking(&booking_id)
            .and_then(|b| b.ledger.iter().find(|e| e.id == refund_id))
            .cloned()
            .ok_or(EngineError::EntryNotFound(refund_id))?;
        drop(guard);

        self.audit_effect(
            actor,
            "payment.refunded",
            "booking",
            booking_id,
            serde_json::json!({ "entry": entry.id.to_string(), "amount": entry.amount }),
        );
        Ok(entry)
    }
}
