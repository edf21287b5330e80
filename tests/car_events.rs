use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::TryRecvError;
use ulid::Ulid;

use carbook::catalog::{CarAttributes, CarType, FuelType, Transmission};
use carbook::clock::FixedClock;
use carbook::config::EngineConfig;
use carbook::engine::Engine;
use carbook::model::{Event, Span};
use carbook::notify::NotifyHub;

// ── Test infrastructure ──────────────────────────────────────

fn attributes(make: &str) -> CarAttributes {
    CarAttributes {
        make: make.into(),
        model: "Base".into(),
        year: 2019,
        price_per_km_cents: 30,
        location: "Bitola".into(),
        coordinates: None,
        car_type: CarType::MicroCar,
        fuel_type: FuelType::Hybrid,
        transmission: Transmission::Manual,
        seats: 4,
        listed_at: 0,
    }
}

fn start_engine() -> (Arc<Engine>, Arc<NotifyHub>) {
    let dir = std::env::temp_dir().join(format!("carbook_int_test_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).unwrap();
    let notify = Arc::new(NotifyHub::new());
    let engine = Engine::with_clock(
        dir.join("carbook.wal"),
        notify.clone(),
        EngineConfig::default(),
        Arc::new(FixedClock::new(0)),
    )
    .unwrap();
    (Arc::new(engine), notify)
}

async fn next_event(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("timed out waiting for event")
        .expect("channel closed")
}

// ── Tests ────────────────────────────────────────────────────

#[tokio::test]
async fn subscriber_sees_booking_lifecycle_in_order() {
    let (engine, notify) = start_engine();
    engine.register_car(1, 10, attributes("Toyota")).await.unwrap();
    let mut rx = notify.subscribe(1);

    let r = engine.reserve(1, 1_000, 2_000, 7).await.unwrap();
    engine.reschedule(r.id, Some(1_500), Some(2_500), 7).await.unwrap();
    engine.cancel(r.id, 7).await.unwrap();

    match next_event(&mut rx).await {
        Event::ReservationCreated { id, car_id, span, owner_id } => {
            assert_eq!((id, car_id, span, owner_id), (r.id, 1, Span::new(1_000, 2_000), 7));
        }
        other => panic!("expected ReservationCreated, got {other:?}"),
    }
    assert_eq!(
        next_event(&mut rx).await,
        Event::ReservationRescheduled { id: r.id, car_id: 1, span: Span::new(1_500, 2_500) }
    );
    assert_eq!(
        next_event(&mut rx).await,
        Event::ReservationCancelled { id: r.id, car_id: 1 }
    );
}

#[tokio::test]
async fn rejected_requests_publish_nothing() {
    let (engine, notify) = start_engine();
    engine.register_car(1, 10, attributes("Toyota")).await.unwrap();
    engine.reserve(1, 1_000, 2_000, 7).await.unwrap();
    let mut rx = notify.subscribe(1);

    assert!(engine.reserve(1, 1_500, 2_500, 8).await.is_err());
    assert!(engine.reserve(1, 3_000, 2_500, 8).await.is_err());
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn channels_are_per_car() {
    let (engine, notify) = start_engine();
    engine.register_car(1, 10, attributes("Toyota")).await.unwrap();
    engine.register_car(2, 10, attributes("Honda")).await.unwrap();
    let mut first = notify.subscribe(1);
    let mut second = notify.subscribe(2);
    let mut second_again = notify.subscribe(2);

    engine.reserve(2, 1_000, 2_000, 7).await.unwrap();

    assert!(matches!(next_event(&mut second).await, Event::ReservationCreated { car_id: 2, .. }));
    assert!(matches!(next_event(&mut second_again).await, Event::ReservationCreated { car_id: 2, .. }));
    assert!(matches!(first.try_recv(), Err(TryRecvError::Empty)));
}

#[tokio::test]
async fn concurrent_winners_are_published_once() {
    let (engine, notify) = start_engine();
    engine.register_car(1, 10, attributes("Toyota")).await.unwrap();
    let mut rx = notify.subscribe(1);

    let mut handles = Vec::new();
    for user in 0..10 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move { engine.reserve(1, 5_000, 6_000, user).await }));
    }
    let winners: Vec<_> = futures::future::join_all(handles)
        .await
        .into_iter()
        .filter_map(|h| h.unwrap().ok())
        .collect();
    assert_eq!(winners.len(), 1);

    match next_event(&mut rx).await {
        Event::ReservationCreated { id, .. } => assert_eq!(id, winners[0].id),
        other => panic!("expected ReservationCreated, got {other:?}"),
    }
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
}
