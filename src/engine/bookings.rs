//! Booking lifecycle: create, confirm, check-in, check-out, cancel. Every
//! mutation re-validates under the room's write lock and commits its events
//! as one WAL frame, so a booking and its deposit (or a cancellation and its
//! refund) land together or not at all.

use std::future::Future;

use chrono::{DateTime, NaiveTime, Utc};
use ulid::Ulid;

use crate::collaborators::{CollaboratorError, GuestIdentity};
use crate::limits;
use crate::model::*;
use crate::observability;
use crate::policy;
use crate::pricing;

use super::{Engine, EngineError, availability};

/// Money handed over as part of a booking operation.
#[derive(Debug, Clone)]
pub struct PaymentInput {
    pub amount: Money,
    pub method: PaymentMethod,
    pub txn_id: Option<String>,
    pub recorded_by: Option<String>,
}

#[derive(Debug, Clone)]
pub struct CreateBooking {
    pub room_id: Ulid,
    pub guest: GuestIdentity,
    pub stay: Stay,
    pub adults: u32,
    pub children: u32,
    pub source: BookingSource,
    pub notes: Option<String>,
    /// Optional deposit taken at creation. A positive deposit confirms the
    /// booking immediately.
    pub deposit: Option<PaymentInput>,
}

/// Hours from `now` until 14:00 on the check-in date. Negative once the
/// check-in time has passed.
fn hours_until_check_in(stay: &Stay, now: DateTime<Utc>) -> i64 {
    let check_in_at = stay
        .check_in
        .and_time(NaiveTime::from_hms_opt(limits::CHECK_IN_HOUR, 0, 0).unwrap_or_default())
        .and_utc();
    (check_in_at - now).num_hours()
}

impl Engine {
    /// Take a booking. The conflict check, pricing, and reference allocation
    /// all happen under the room's write lock — a racing create for the same
    /// nights serializes behind this one and fails with `RoomUnavailable`.
    pub async fn create_booking(&self, req: CreateBooking) -> Result<BookingInfo, EngineError> {
        pricing::validate_stay(&req.stay)?;
        pricing::validate_occupancy(req.adults, req.children)?;
        if req.guest.name.is_empty() || req.guest.name.len() > limits::MAX_NAME_LEN {
            return Err(EngineError::LimitExceeded("guest name length"));
        }
        if let Some(notes) = &req.notes
            && notes.len() > limits::MAX_NOTES_LEN {
                return Err(EngineError::LimitExceeded("notes too long"));
            }
        if let Some(deposit) = &req.deposit
            && deposit.amount < 0 {
                return Err(EngineError::LimitExceeded("negative deposit"));
            }

        // Guest resolution happens before the lock: it may hit a remote
        // directory and must not stall other writers on this room.
        let guests = self.collaborators.guests.clone();
        let guest_id = self
            .collaborate("guest directory", guests.find_or_create(&req.guest))
            .await?;

        let rs = self
            .room(&req.room_id)
            .ok_or(EngineError::RoomNotFound(req.room_id))?;
        let room_type = {
            let guard = rs.read().await;
            self.room_type(&guard.room_type_id)
                .ok_or(EngineError::RoomTypeNotFound(guard.room_type_id))?
        };

        let mut guard = rs.write().await;
        if let Some(winner) = availability::find_conflict(&guard, &req.stay) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::RoomUnavailable(winner));
        }
        if guard.bookings.len() >= limits::MAX_BOOKINGS_PER_ROOM {
            return Err(EngineError::LimitExceeded("too many bookings on room"));
        }

        let quote = pricing::quote(&room_type, guard.rate_override, &req.stay, req.adults, req.children)?;
        let deposit_amount = req.deposit.as_ref().map_or(0, |d| d.amount);
        if deposit_amount > quote.total {
            return Err(EngineError::AmountMismatch {
                expected: quote.total,
                got: deposit_amount,
            });
        }

        let mut reference = reference_code();
        let mut retries = 0;
        while self.references.contains_key(&reference) {
            retries += 1;
            if retries > limits::MAX_REFERENCE_RETRIES {
                return Err(EngineError::LimitExceeded("reference allocation"));
            }
            reference = reference_code();
        }

        let status = if deposit_amount > 0 || req.source == BookingSource::OwnerReference {
            BookingStatus::Confirmed
        } else {
            BookingStatus::Pending
        };

        let booking_id = Ulid::new();
        let at = Utc::now();
        let mut events = vec![Event::BookingCreated {
            id: booking_id,
            room_id: req.room_id,
            reference,
            guest_id,
            stay: req.stay,
            adults: req.adults,
            children: req.children,
            source: req.source,
            notes: req.notes.clone(),
            total: quote.total,
            status,
            at,
        }];
        if let Some(deposit) = &req.deposit
            && deposit.amount > 0 {
                events.push(Event::PaymentRecorded {
                    entry_id: Ulid::new(),
                    booking_id,
                    room_id: req.room_id,
                    amount: deposit.amount,
                    method: deposit.method,
                    source: EntrySource::Deposit,
                    status: EntryStatus::Completed,
                    txn_id: deposit.txn_id.clone(),
                    receipt: receipt_code(),
                    recorded_by: deposit.recorded_by.clone(),
                    at,
                });
            }

        self.persist_and_apply(req.room_id, &mut guard, &events).await?;

        metrics::counter!(observability::BOOKINGS_CREATED_TOTAL).increment(1);
        if status == BookingStatus::Confirmed {
            metrics::counter!(observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        }
        if events.len() > 1 {
            metrics::counter!(observability::PAYMENTS_RECORDED_TOTAL).increment(1);
        }

        let info = guard
            .booking(&booking_id)
            .map(BookingInfo::from_booking)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        drop(guard);

        self.dispatch_booking_created(&info);
        Ok(info)
    }

    /// Confirm a pending booking against a payment covering exactly what is
    /// outstanding. Deposit-at-creation bookings are already confirmed and
    /// reject this with `InvalidTransition`.
    pub async fn confirm_booking(
        &self,
        booking_id: Ulid,
        payment: PaymentInput,
    ) -> Result<BookingInfo, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let b = guard
            .booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        if b.status != BookingStatus::Pending {
            return Err(EngineError::InvalidTransition { from: b.status, action: "confirm" });
        }
        // Pending bookings never block the room, so a confirmed rival may
        // have landed on these nights since creation. Confirming starts
        // blocking, so it must win the same check a fresh create would.
        if let Some(winner) = availability::find_conflict_excluding(&guard, &b.stay, &booking_id) {
            metrics::counter!(observability::BOOKING_CONFLICTS_TOTAL).increment(1);
            return Err(EngineError::RoomUnavailable(winner));
        }
        if payment.amount != b.remaining {
            return Err(EngineError::AmountMismatch {
                expected: b.remaining,
                got: payment.amount,
            });
        }

        let at = Utc::now();
        let mut events = Vec::with_capacity(2);
        if payment.amount > 0 {
            events.push(Event::PaymentRecorded {
                entry_id: Ulid::new(),
                booking_id,
                room_id,
                amount: payment.amount,
                method: payment.method,
                source: EntrySource::FrontDesk,
                status: EntryStatus::Completed,
                txn_id: payment.txn_id.clone(),
                receipt: receipt_code(),
                recorded_by: payment.recorded_by.clone(),
                at,
            });
        }
        events.push(Event::BookingConfirmed { booking_id, room_id, at });

        self.persist_and_apply(room_id, &mut guard, &events).await?;
        metrics::counter!(observability::BOOKINGS_CONFIRMED_TOTAL).increment(1);
        if events.len() > 1 {
            metrics::counter!(observability::PAYMENTS_RECORDED_TOTAL).increment(1);
        }

        let info = guard
            .booking(&booking_id)
            .map(BookingInfo::from_booking)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        drop(guard);

        self.audit_effect(
            payment.recorded_by,
            "booking.confirmed",
            "booking",
            booking_id,
            serde_json::json!({ "reference": info.reference }),
        );
        Ok(info)
    }

    pub async fn check_in(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let b = guard
            .booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        if b.status != BookingStatus::Confirmed {
            return Err(EngineError::InvalidTransition { from: b.status, action: "check in" });
        }
        let event = Event::GuestCheckedIn { booking_id, room_id, at: Utc::now() };
        self.persist_and_apply(room_id, &mut guard, std::slice::from_ref(&event)).await
    }

    pub async fn check_out(&self, booking_id: Ulid) -> Result<(), EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let b = guard
            .booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        if b.status != BookingStatus::CheckedIn {
            return Err(EngineError::InvalidTransition { from: b.status, action: "check out" });
        }
        let event = Event::GuestCheckedOut { booking_id, room_id, at: Utc::now() };
        self.persist_and_apply(room_id, &mut guard, std::slice::from_ref(&event)).await
    }

    /// Cancel a pending or confirmed booking. The fee/refund split comes
    /// from the policy brackets against the money actually held (or the
    /// total, when nothing was paid — the fee is then owed, not deducted).
    /// The refund entry and the cancellation commit in one WAL frame.
    pub async fn cancel_booking(
        &self,
        booking_id: Ulid,
        reason: CancellationReason,
        actor: Option<String>,
    ) -> Result<CancellationRecord, EngineError> {
        let (room_id, mut guard) = self.resolve_booking_write(&booking_id).await?;
        let b = guard
            .booking(&booking_id)
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        match b.status {
            BookingStatus::Pending | BookingStatus::Confirmed => {}
            // Double-cancel lands here too.
            from => return Err(EngineError::InvalidTransition { from, action: "cancel" }),
        }

        let now = Utc::now();
        let hours = hours_until_check_in(&b.stay, now);
        let basis = if b.paid > 0 { b.paid } else { b.total };
        let outcome = policy::evaluate(basis, hours, reason);
        // Never refund more than is actually held.
        let refund = outcome.refund.min(b.paid).max(0);

        let mut events = Vec::with_capacity(2);
        if refund > 0 {
            let method = b
                .ledger
                .iter()
                .rev()
                .find(|e| e.amount > 0)
                .map_or(PaymentMethod::Card, |e| e.method);
            events.push(Event::PaymentRefunded {
                entry_id: Ulid::new(),
                booking_id,
                room_id,
                amount: -refund,
                method,
                refund_of: None,
                receipt: receipt_code(),
                reason: Some("cancellation refund".into()),
                actor: actor.clone(),
                at: now,
            });
        }
        events.push(Event::BookingCancelled {
            booking_id,
            room_id,
            reason,
            fee: outcome.fee,
            refund,
            refund_type: outcome.refund_type,
            actor: actor.clone(),
            at: now,
        });

        self.persist_and_apply(room_id, &mut guard, &events).await?;
        metrics::counter!(observability::BOOKINGS_CANCELLED_TOTAL).increment(1);
        if refund > 0 {
            metrics::counter!(observability::REFUNDS_ISSUED_TOTAL).increment(1);
        }

        let record = guard
            .booking(&booking_id)
            .and_then(|b| b.cancellation.clone())
            .ok_or(EngineError::BookingNotFound(booking_id))?;
        drop(guard);

        self.dispatch_booking_cancelled(booking_id, refund, actor);
        Ok(record)
    }

    // ── Collaborator plumbing ───────────────────────────────────

    /// Await a required collaborator under the configured timeout.
    pub(super) async fn collaborate<T>(
        &self,
        what: &'static str,
        fut: impl Future<Output = Result<T, CollaboratorError>>,
    ) -> Result<T, EngineError> {
        match tokio::time::timeout(self.collaborator_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(EngineError::Collaborator(format!("{what}: {}", e.0))),
            Err(_) => Err(EngineError::Collaborator(format!("{what}: timed out"))),
        }
    }

    /// Fire a best-effort side effect: bounded by the collaborator timeout,
    /// failures are logged and counted but never surface to the caller.
    pub(super) fn spawn_effect<F>(&self, what: &'static str, fut: F)
    where
        F: Future<Output = Result<(), CollaboratorError>> + Send + 'static,
    {
        let timeout = self.collaborator_timeout;
        tokio::spawn(async move {
            let outcome = match tokio::time::timeout(timeout, fut).await {
                Ok(Ok(())) => return,
                Ok(Err(e)) => e.0,
                Err(_) => "timed out".into(),
            };
            metrics::counter!(observability::SIDE_EFFECT_FAILURES_TOTAL, "effect" => what)
                .increment(1);
            tracing::warn!(effect = what, error = %outcome, "side effect failed");
        });
    }

    pub(super) fn audit_effect(
        &self,
        actor: Option<String>,
        action: &'static str,
        entity: &'static str,
        entity_id: Ulid,
        details: serde_json::Value,
    ) {
        let audit = self.collaborators.audit.clone();
        self.spawn_effect("audit", async move {
            audit.record(actor, action, entity, entity_id, details).await
        });
    }

    fn dispatch_booking_created(&self, info: &BookingInfo) {
        let booking_id = info.id;

        let invoices = self.collaborators.invoices.clone();
        let issued = self.invoices.clone();
        self.spawn_effect("invoice", async move {
            let invoice_id = invoices.generate(booking_id).await?;
            issued.insert(booking_id, invoice_id);
            invoices.mark_sent(invoice_id).await
        });

        let mailer = self.collaborators.mailer.clone();
        self.spawn_effect("mail", async move {
            mailer.send_booking_confirmation(booking_id).await
        });

        self.audit_effect(
            None,
            "booking.created",
            "booking",
            booking_id,
            serde_json::json!({ "reference": info.reference, "total": info.total }),
        );
    }

    fn dispatch_booking_cancelled(&self, booking_id: Ulid, refund: Money, actor: Option<String>) {
        if let Some((_, invoice_id)) = self.invoices.remove(&booking_id) {
            let invoices = self.collaborators.invoices.clone();
            self.spawn_effect("invoice", async move { invoices.cancel(invoice_id).await });
        }

        let mailer = self.collaborators.mailer.clone();
        self.spawn_effect("mail", async move {
            mailer.send_cancellation(booking_id, refund).await
        });

        self.audit_effect(
            actor,
            "booking.cancelled",
            "booking",
            booking_id,
            serde_json::json!({ "refund": refund }),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn hours_until_check_in_counts_to_two_pm() {
        let stay = Stay::new(d("2025-03-10"), d("2025-03-12"));
        let now = "2025-03-09T14:00:00Z".parse::<DateTime<Utc>>().unwrap();
        assert_eq!(hours_until_check_in(&stay, now), 24);

        let later = "2025-03-10T16:30:00Z".parse::<DateTime<Utc>>().unwrap();
        assert!(hours_until_check_in(&stay, later) < 0);
    }
}
