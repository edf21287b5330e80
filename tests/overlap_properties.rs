use std::sync::Arc;

use proptest::prelude::*;
use ulid::Ulid;

use carbook::catalog::{CarAttributes, CarType, FuelType, Transmission};
use carbook::clock::FixedClock;
use carbook::config::EngineConfig;
use carbook::engine::{first_conflict, Engine, EngineError};
use carbook::model::{CarState, Interval, IntervalKind, Ms, Span};
use carbook::notify::NotifyHub;

fn attributes() -> CarAttributes {
    CarAttributes {
        make: "Audi".into(),
        model: "A4".into(),
        year: 2022,
        price_per_km_cents: 35,
        location: "Ohrid".into(),
        coordinates: None,
        car_type: CarType::Medium,
        fuel_type: FuelType::Diesel,
        transmission: Transmission::Automatic,
        seats: 5,
        listed_at: 0,
    }
}

/// Disjoint reservations laid out left to right from (gap, length) pairs.
fn layout(pieces: &[(Ms, Ms)]) -> Vec<Span> {
    let mut cursor = 0;
    pieces
        .iter()
        .map(|&(gap, len)| {
            let start = cursor + gap;
            cursor = start + len;
            Span::new(start, cursor)
        })
        .collect()
}

fn car_with(spans: &[Span]) -> CarState {
    let mut car = CarState::new(1, 1, attributes());
    for &span in spans {
        car.insert_interval(Interval {
            id: Ulid::new(),
            span,
            kind: IntervalKind::Reservation { owner_id: 1 },
        });
    }
    car
}

fn brute_force_overlaps(spans: &[Span], candidate: &Span) -> bool {
    spans
        .iter()
        .any(|r| candidate.start < r.end && r.start < candidate.end)
}

fn fresh_engine() -> Engine {
    let dir = std::env::temp_dir().join("carbook_test_properties");
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join(format!("{}.wal", Ulid::new()));
    Engine::with_clock(
        path,
        Arc::new(NotifyHub::new()),
        EngineConfig::default(),
        Arc::new(FixedClock::new(0)),
    )
    .unwrap()
}

proptest! {
    #[test]
    fn conflict_iff_true_intersection(
        pieces in prop::collection::vec((0i64..100, 1i64..50), 0..20),
        start in 0i64..1_500,
        len in 1i64..200,
    ) {
        let spans = layout(&pieces);
        let car = car_with(&spans);
        let candidate = Span::new(start, start + len);
        prop_assert_eq!(
            first_conflict(&car, &candidate, None).is_some(),
            brute_force_overlaps(&spans, &candidate)
        );
    }

    #[test]
    fn excluded_reservation_never_conflicts(
        pieces in prop::collection::vec((0i64..100, 1i64..50), 1..10),
        pick in any::<prop::sample::Index>(),
    ) {
        let spans = layout(&pieces);
        let car = car_with(&spans);
        let target = &car.intervals[pick.index(car.intervals.len())];
        // Its own span only intersects itself.
        prop_assert!(first_conflict(&car, &target.span, Some(target.id)).is_none());
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn back_to_back_is_always_free(
        a in 1_000i64..1_000_000,
        len in 1i64..100_000,
        after in 1i64..100_000,
        before in 1i64..1_000,
    ) {
        tokio_test::block_on(async {
            let engine = fresh_engine();
            engine.register_car(1, 1, attributes()).await.unwrap();
            let b = a + len;
            engine.reserve(1, a, b, 2).await.unwrap();

            assert!(engine.is_free(1, b, b + after, None).await.unwrap());
            assert!(engine.is_free(1, a - before, a, None).await.unwrap());
            assert!(!engine.is_free(1, a, b, None).await.unwrap());
        });
    }

    #[test]
    fn reserve_sequence_never_double_books(
        requests in prop::collection::vec((0i64..2_000, 1i64..300), 1..25),
    ) {
        tokio_test::block_on(async {
            let engine = fresh_engine();
            engine.register_car(1, 1, attributes()).await.unwrap();
            let mut accepted: Vec<Span> = Vec::new();

            for (start, len) in requests {
                let span = Span::new(start, start + len);
                let expected_conflict = brute_force_overlaps(&accepted, &span);
                match engine.reserve(1, span.start, span.end, 2).await {
                    Ok(_) => {
                        assert!(!expected_conflict);
                        accepted.push(span);
                    }
                    Err(EngineError::Conflict { .. }) => assert!(expected_conflict),
                    Err(e) => panic!("unexpected error: {e}"),
                }
            }

            let stored = engine.reservations_for_car(1).await.unwrap();
            assert_eq!(stored.len(), accepted.len());
            for pair in stored.windows(2) {
                assert!(pair[0].end <= pair[1].start, "overlap: {pair:?}");
            }
        });
    }
}
