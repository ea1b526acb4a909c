//! innkeep — an embeddable hotel reservation engine.
//!
//! The engine keeps one property's rooms, bookings, and payment ledgers in
//! memory behind per-room write locks, and makes every mutation durable
//! through a group-committed write-ahead log before applying it. Overlap
//! checks run under the same lock that commits the booking, so two racing
//! writers for the same nights serialize and exactly one wins.
//!
//! ```no_run
//! use innkeep::{Collaborators, CreateBooking, Engine, EngineConfig, GuestIdentity};
//! use innkeep::model::{BookingSource, Stay};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = EngineConfig::from_env();
//! let engine = Engine::open(&config, Collaborators::default())?;
//!
//! let type_id = engine.define_room_type("Standard".into(), 5000, None, 2, None).await?;
//! let room_id = engine.create_room(type_id, "101".into(), None).await?;
//!
//! let booking = engine
//!     .create_booking(CreateBooking {
//!         room_id,
//!         guest: GuestIdentity {
//!             name: "Ada".into(),
//!             email: Some("ada@example.com".into()),
//!             phone: None,
//!         },
//!         stay: Stay::new("2025-06-01".parse()?, "2025-06-04".parse()?),
//!         adults: 2,
//!         children: 0,
//!         source: BookingSource::Online,
//!         notes: None,
//!         deposit: None,
//!     })
//!     .await?;
//! println!("booked {} for {}", booking.reference, booking.total);
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod policy;
pub mod pricing;
pub mod wal;

pub use collaborators::{
    AuditLog, CollaboratorError, Collaborators, GuestDirectory, GuestIdentity, InvoiceService,
    Mailer,
};
pub use config::EngineConfig;
pub use engine::{CreateBooking, Engine, EngineError, PaymentInput};
pub use model::{AvailableRoom, BookingInfo, RoomInfo};
pub use pricing::Quote;
