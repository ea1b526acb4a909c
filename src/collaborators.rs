//! Collaborator seams. The engine owns none of these concerns — guest
//! profiles, invoices, mail, and audit trails live elsewhere and are reached
//! through these traits. Everything except guest resolution is best-effort:
//! a failure is logged and swallowed, never surfaced to the booking caller.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use ulid::Ulid;

#[derive(Debug, Clone)]
pub struct CollaboratorError(pub String);

impl fmt::Display for CollaboratorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "collaborator error: {}", self.0)
    }
}

impl std::error::Error for CollaboratorError {}

/// How a guest identifies themselves at booking time. Matching precedence is
/// email, then phone; an unmatched identity creates a new profile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuestIdentity {
    pub name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
}

#[async_trait]
pub trait GuestDirectory: Send + Sync {
    async fn find_or_create(&self, identity: &GuestIdentity) -> Result<Ulid, CollaboratorError>;
}

#[async_trait]
pub trait InvoiceService: Send + Sync {
    async fn generate(&self, booking_id: Ulid) -> Result<Ulid, CollaboratorError>;
    async fn cancel(&self, invoice_id: Ulid) -> Result<(), CollaboratorError>;
    async fn mark_sent(&self, invoice_id: Ulid) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send_booking_confirmation(&self, booking_id: Ulid) -> Result<(), CollaboratorError>;
    async fn send_cancellation(
        &self,
        booking_id: Ulid,
        refund_amount: crate::model::Money,
    ) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait AuditLog: Send + Sync {
    async fn record(
        &self,
        actor: Option<String>,
        action: &'static str,
        entity: &'static str,
        entity_id: Ulid,
        details: serde_json::Value,
    ) -> Result<(), CollaboratorError>;
}

/// The collaborator bundle handed to the engine. All fields are `Arc`s so
/// best-effort tasks can move clones into spawned futures.
#[derive(Clone)]
pub struct Collaborators {
    pub guests: Arc<dyn GuestDirectory>,
    pub invoices: Arc<dyn InvoiceService>,
    pub mailer: Arc<dyn Mailer>,
    pub audit: Arc<dyn AuditLog>,
}

impl Default for Collaborators {
    fn default() -> Self {
        Self {
            guests: Arc::new(InMemoryGuestDirectory::new()),
            invoices: Arc::new(NullInvoiceService),
            mailer: Arc::new(NullMailer),
            audit: Arc::new(TracingAuditLog),
        }
    }
}

// ── Default implementations ──────────────────────────────────────

/// Guest directory backed by two lookup maps. Good enough for development
/// and tests; production wires a real profile store here.
pub struct InMemoryGuestDirectory {
    by_email: DashMap<String, Ulid>,
    by_phone: DashMap<String, Ulid>,
}

impl Default for InMemoryGuestDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryGuestDirectory {
    pub fn new() -> Self {
        Self {
            by_email: DashMap::new(),
            by_phone: DashMap::new(),
        }
    }
}

#[async_trait]
impl GuestDirectory for InMemoryGuestDirectory {
    async fn find_or_create(&self, identity: &GuestIdentity) -> Result<Ulid, CollaboratorError> {
        if let Some(email) = &identity.email
            && let Some(id) = self.by_email.get(email) {
                return Ok(*id.value());
            }
        if let Some(phone) = &identity.phone
            && let Some(id) = self.by_phone.get(phone) {
                return Ok(*id.value());
            }

        let id = Ulid::new();
        if let Some(email) = &identity.email {
            self.by_email.insert(email.clone(), id);
        }
        if let Some(phone) = &identity.phone {
            self.by_phone.insert(phone.clone(), id);
        }
        Ok(id)
    }
}

/// Invoice service that issues ids and forgets them.
pub struct NullInvoiceService;

#[async_trait]
impl InvoiceService for NullInvoiceService {
    async fn generate(&self, _booking_id: Ulid) -> Result<Ulid, CollaboratorError> {
        Ok(Ulid::new())
    }
    async fn cancel(&self, _invoice_id: Ulid) -> Result<(), CollaboratorError> {
        Ok(())
    }
    async fn mark_sent(&self, _invoice_id: Ulid) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

pub struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send_booking_confirmation(&self, _booking_id: Ulid) -> Result<(), CollaboratorError> {
        Ok(())
    }
    async fn send_cancellation(
        &self,
        _booking_id: Ulid,
        _refund_amount: crate::model::Money,
    ) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

/// Audit sink that writes structured log lines instead of persisting.
pub struct TracingAuditLog;

#[async_trait]
impl AuditLog for TracingAuditLog {
    async fn record(
        &self,
        actor: Option<String>,
        action: &'static str,
        entity: &'static str,
        entity_id: Ulid,
        details: serde_json::Value,
    ) -> Result<(), CollaboratorError> {
        tracing::info!(
            actor = actor.as_deref().unwrap_or("system"),
            action,
            entity,
            %entity_id,
            %details,
            "audit"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn identity(name: &str, email: Option<&str>, phone: Option<&str>) -> GuestIdentity {
        GuestIdentity {
            name: name.into(),
            email: email.map(Into::into),
            phone: phone.map(Into::into),
        }
    }

    #[tokio::test]
    async fn guest_matched_by_email() {
        let dir = InMemoryGuestDirectory::new();
        let first = dir
            .find_or_create(&identity("Ada", Some("ada@example.com"), None))
            .await
            .unwrap();
        let second = dir
            .find_or_create(&identity("Ada L.", Some("ada@example.com"), Some("+111")))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn guest_matched_by_phone_when_email_unknown() {
        let dir = InMemoryGuestDirectory::new();
        let first = dir
            .find_or_create(&identity("Bob", Some("bob@example.com"), Some("+222")))
            .await
            .unwrap();
        let second = dir
            .find_or_create(&identity("Bob", None, Some("+222")))
            .await
            .unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn unmatched_identity_creates_new_guest() {
        let dir = InMemoryGuestDirectory::new();
        let a = dir
            .find_or_create(&identity("A", Some("a@example.com"), None))
            .await
            .unwrap();
        let b = dir
            .find_or_create(&identity("B", Some("b@example.com"), None))
            .await
            .unwrap();
        assert_ne!(a, b);
    }
}
