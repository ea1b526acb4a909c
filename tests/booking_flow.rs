//! End-to-end flow through the public API, including the per-room event
//! broadcast a front-desk dashboard would subscribe to.

use std::time::Duration;

use innkeep::model::{
    BookingSource, BookingStatus, CancellationReason, Event, PaymentMethod, Stay,
};
use innkeep::{Collaborators, CreateBooking, Engine, EngineConfig, GuestIdentity, PaymentInput};
use ulid::Ulid;

fn config() -> EngineConfig {
    EngineConfig {
        data_dir: std::env::temp_dir()
            .join("innkeep_test_flow")
            .join(Ulid::new().to_string()),
        compact_threshold: 0,
        collaborator_timeout: Duration::from_secs(1),
        metrics_port: None,
    }
}

fn stay(check_in: &str, check_out: &str) -> Stay {
    Stay::new(check_in.parse().unwrap(), check_out.parse().unwrap())
}

#[tokio::test]
async fn booking_events_reach_subscribers() {
    let config = config();
    let engine = Engine::open(&config, Collaborators::default()).unwrap();

    let type_id = engine
        .define_room_type("Deluxe".into(), 8_000, None, 2, Some("sea view".into()))
        .await
        .unwrap();
    let room_id = engine.create_room(type_id, "301".into(), None).await.unwrap();

    let mut rx = engine.notify.subscribe(room_id);

    let booking = engine
        .create_booking(CreateBooking {
            room_id,
            guest: GuestIdentity {
                name: "Grace".into(),
                email: Some("grace@example.com".into()),
                phone: None,
            },
            stay: stay("2025-07-01", "2025-07-04"),
            adults: 2,
            children: 0,
            source: BookingSource::Online,
            notes: None,
            deposit: Some(PaymentInput {
                amount: 8_000,
                method: PaymentMethod::Card,
                txn_id: Some("gw-1".into()),
                recorded_by: None,
            }),
        })
        .await
        .unwrap();
    assert_eq!(booking.status, BookingStatus::Confirmed);
    assert_eq!(booking.total, 24_000);

    // The whole creation frame arrives in order.
    match rx.recv().await.unwrap() {
        Event::BookingCreated { id, total, .. } => {
            assert_eq!(id, booking.id);
            assert_eq!(total, 24_000);
        }
        other => panic!("expected BookingCreated, got {other:?}"),
    }
    match rx.recv().await.unwrap() {
        Event::PaymentRecorded { booking_id, amount, .. } => {
            assert_eq!(booking_id, booking.id);
            assert_eq!(amount, 8_000);
        }
        other => panic!("expected PaymentRecorded, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&config.data_dir);
}

#[tokio::test]
async fn cancellation_frame_carries_refund_then_cancel() {
    let config = config();
    let engine = Engine::open(&config, Collaborators::default()).unwrap();

    let type_id = engine
        .define_room_type("Standard".into(), 5_000, None, 2, None)
        .await
        .unwrap();
    let room_id = engine.create_room(type_id, "101".into(), None).await.unwrap();

    // Far enough out for a free cancellation.
    let check_in = chrono::Utc::now().date_naive() + chrono::Days::new(30);
    let booking = engine
        .create_booking(CreateBooking {
            room_id,
            guest: GuestIdentity {
                name: "Linus".into(),
                email: None,
                phone: Some("+46".into()),
            },
            stay: Stay::new(check_in, check_in + chrono::Days::new(2)),
            adults: 1,
            children: 0,
            source: BookingSource::WalkIn,
            notes: None,
            deposit: Some(PaymentInput {
                amount: 10_000,
                method: PaymentMethod::Cash,
                txn_id: None,
                recorded_by: Some("frontdesk".into()),
            }),
        })
        .await
        .unwrap();

    let mut rx = engine.notify.subscribe(room_id);
    let record = engine
        .cancel_booking(booking.id, CancellationReason::GuestRequest, Some("frontdesk".into()))
        .await
        .unwrap();
    assert_eq!(record.fee, 0);
    assert_eq!(record.refund, 10_000);

    match rx.recv().await.unwrap() {
        Event::PaymentRefunded { amount, .. } => assert_eq!(amount, -10_000),
        other => panic!("expected PaymentRefunded, got {other:?}"),
    }
    match rx.recv().await.unwrap() {
        Event::BookingCancelled { booking_id, refund, .. } => {
            assert_eq!(booking_id, booking.id);
            assert_eq!(refund, 10_000);
        }
        other => panic!("expected BookingCancelled, got {other:?}"),
    }

    let _ = std::fs::remove_dir_all(&config.data_dir);
}
