//! Car attributes and the optional predicates a listing query combines.
//!
//! The engine only decides availability; everything here narrows and orders
//! the candidate pool before availability is checked. Geographic distance is
//! delegated to a [`DistanceScorer`] supplied by the caller.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::limits::MAX_TEXT_LEN;
use crate::model::{CarInfo, Ms, Span, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CarType {
    #[serde(rename = "Micro Car")]
    MicroCar,
    Medium,
    #[serde(rename = "SUV")]
    Suv,
    #[serde(rename = "Mini Bus")]
    MiniBus,
    Truck,
    Van,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FuelType {
    Electric,
    Petrol,
    Diesel,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Transmission {
    Automatic,
    Manual,
}

/// WGS84 coordinates in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CarAttributes {
    pub make: String,
    pub model: String,
    pub year: u16,
    /// Price per kilometre in cents.
    pub price_per_km_cents: u32,
    pub location: String,
    pub coordinates: Option<GeoPoint>,
    pub car_type: CarType,
    pub fuel_type: FuelType,
    pub transmission: Transmission,
    pub seats: u8,
    /// When the listing was published; drives the default ordering.
    pub listed_at: Ms,
}

impl CarAttributes {
    /// Returns the first violated constraint, if any.
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.make.len() > MAX_TEXT_LEN
            || self.model.len() > MAX_TEXT_LEN
            || self.location.len() > MAX_TEXT_LEN
        {
            return Err("text field too long");
        }
        if self.year < 1900 {
            return Err("year before 1900");
        }
        if !(1..=50).contains(&self.seats) {
            return Err("seats must be between 1 and 50");
        }
        if let Some(point) = self.coordinates
            && !point.is_valid()
        {
            return Err("coordinates out of range");
        }
        Ok(())
    }
}

/// Opaque distance function. Ranking by distance is the caller's concern;
/// the catalog only asks for a number it can compare.
pub trait DistanceScorer: Send + Sync {
    fn distance_km(&self, from: GeoPoint, to: GeoPoint) -> f64;
}

/// A search origin paired with the scorer that measures from it.
#[derive(Clone, Copy)]
pub struct Proximity<'a> {
    pub origin: GeoPoint,
    pub scorer: &'a dyn DistanceScorer,
}

impl Proximity<'_> {
    pub fn distance_to(&self, attrs: &CarAttributes) -> Option<f64> {
        attrs
            .coordinates
            .map(|to| self.scorer.distance_km(self.origin, to))
    }
}

/// Owner reputation, kept by whoever collects reviews. Higher is better;
/// `None` for owners nobody has rated yet.
pub trait OwnerRatings: Send + Sync {
    fn rating(&self, owner_id: UserId) -> Option<f64>;
}

/// Optional attribute predicates. Every set field must hold; empty lists and
/// `None` mean "no constraint".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CarFilter {
    pub car_types: Vec<CarType>,
    pub fuel_types: Vec<FuelType>,
    pub makes: Vec<String>,
    pub transmission: Option<Transmission>,
    pub min_seats: Option<u8>,
    pub max_seats: Option<u8>,
    pub min_price_cents: Option<u32>,
    pub max_price_cents: Option<u32>,
    pub max_distance_km: Option<f64>,
}

impl CarFilter {
    pub fn matches(&self, attrs: &CarAttributes, proximity: Option<&Proximity<'_>>) -> bool {
        if !self.car_types.is_empty() && !self.car_types.contains(&attrs.car_type) {
            return false;
        }
        if !self.fuel_types.is_empty() && !self.fuel_types.contains(&attrs.fuel_type) {
            return false;
        }
        if !self.makes.is_empty() && !self.makes.iter().any(|m| *m == attrs.make) {
            return false;
        }
        if self.transmission.is_some_and(|t| t != attrs.transmission) {
            return false;
        }
        if self.min_seats.is_some_and(|min| attrs.seats < min)
            || self.max_seats.is_some_and(|max| attrs.seats > max)
        {
            return false;
        }
        if self.min_price_cents.is_some_and(|min| attrs.price_per_km_cents < min)
            || self.max_price_cents.is_some_and(|max| attrs.price_per_km_cents > max)
        {
            return false;
        }
        if let Some(max_km) = self.max_distance_km {
            // Without a way to measure, a distance bound cannot be satisfied.
            match proximity.and_then(|p| p.distance_to(attrs)) {
                Some(d) if d < max_km => {}
                _ => return false,
            }
        }
        true
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Most recently listed first.
    #[default]
    Newest,
    /// Lowest price per km first.
    Cheapest,
    /// Nearest to the search origin first. Falls back to `Newest` without one.
    Closest,
    /// Best-rated owner first, unrated owners last. Falls back to `Newest`
    /// without a rating source.
    Rating,
}

impl SortOrder {
    pub fn sort(
        self,
        cars: &mut [CarInfo],
        proximity: Option<&Proximity<'_>>,
        ratings: Option<&dyn OwnerRatings>,
    ) {
        match (self, proximity, ratings) {
            (SortOrder::Rating, _, Some(r)) => cars.sort_by(|a, b| {
                cmp_rating(r.rating(a.owner_id), r.rating(b.owner_id)).then(a.id.cmp(&b.id))
            }),
            (SortOrder::Cheapest, _, _) => cars.sort_by(|a, b| {
                a.attributes
                    .price_per_km_cents
                    .cmp(&b.attributes.price_per_km_cents)
                    .then(a.id.cmp(&b.id))
            }),
            (SortOrder::Closest, Some(p), _) => cars.sort_by(|a, b| {
                cmp_distance(p.distance_to(&a.attributes), p.distance_to(&b.attributes))
                    .then(a.id.cmp(&b.id))
            }),
            (SortOrder::Newest, _, _)
            | (SortOrder::Closest, None, _)
            | (SortOrder::Rating, _, None) => cars.sort_by(|a, b| {
                b.attributes
                    .listed_at
                    .cmp(&a.attributes.listed_at)
                    .then(a.id.cmp(&b.id))
            }),
        }
    }
}

/// Unknown distances sort last.
fn cmp_distance(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.total_cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Highest first; unrated sorts last.
fn cmp_rating(a: Option<f64>, b: Option<f64>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// A full listing query: predicates, an optional rental period the car must
/// be free for, ordering, and a 1-based page.
#[derive(Clone, Default)]
pub struct SearchQuery<'a> {
    pub filter: CarFilter,
    pub period: Option<Span>,
    pub proximity: Option<Proximity<'a>>,
    pub ratings: Option<&'a dyn OwnerRatings>,
    pub sort: SortOrder,
    pub page: usize,
}

impl SearchQuery<'_> {
    /// Number of matching cars to skip. Page 0 is treated as page 1.
    pub fn offset(&self) -> usize {
        (self.page.max(1) - 1).saturating_mul(crate::limits::PAGE_SIZE)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Treats degrees as a flat plane, one degree = 100 km.
    pub(crate) struct FlatScorer;

    impl DistanceScorer for FlatScorer {
        fn distance_km(&self, from: GeoPoint, to: GeoPoint) -> f64 {
            let dlat = from.lat - to.lat;
            let dlng = from.lng - to.lng;
            (dlat * dlat + dlng * dlng).sqrt() * 100.0
        }
    }

    pub(crate) fn attrs(make: &str, price: u32, seats: u8) -> CarAttributes {
        CarAttributes {
            make: make.into(),
            model: "Base".into(),
            year: 2020,
            price_per_km_cents: price,
            location: "Skopje".into(),
            coordinates: None,
            car_type: CarType::Medium,
            fuel_type: FuelType::Petrol,
            transmission: Transmission::Manual,
            seats,
            listed_at: 0,
        }
    }

    /// Ratings from a fixed table.
    pub(crate) struct TableRatings(pub(crate) Vec<(UserId, f64)>);

    impl OwnerRatings for TableRatings {
        fn rating(&self, owner_id: UserId) -> Option<f64> {
            self.0.iter().find(|(id, _)| *id == owner_id).map(|(_, r)| *r)
        }
    }

    fn info(id: i64, attributes: CarAttributes) -> CarInfo {
        CarInfo {
            id,
            owner_id: 1,
            attributes,
        }
    }

    #[test]
    fn empty_filter_matches_everything() {
        assert!(CarFilter::default().matches(&attrs("Audi", 50, 5), None));
    }

    #[test]
    fn predicates_combine_conjunctively() {
        let filter = CarFilter {
            makes: vec!["Audi".into(), "Skoda".into()],
            min_seats: Some(4),
            max_price_cents: Some(60),
            ..Default::default()
        };
        assert!(filter.matches(&attrs("Audi", 50, 5), None));
        assert!(!filter.matches(&attrs("Audi", 70, 5), None)); // too expensive
        assert!(!filter.matches(&attrs("Audi", 50, 2), None)); // too small
        assert!(!filter.matches(&attrs("Fiat", 50, 5), None)); // wrong make
    }

    #[test]
    fn enum_sets_and_transmission() {
        let mut a = attrs("Tesla", 90, 5);
        a.fuel_type = FuelType::Electric;
        a.transmission = Transmission::Automatic;
        a.car_type = CarType::Suv;

        let filter = CarFilter {
            car_types: vec![CarType::Suv, CarType::Van],
            fuel_types: vec![FuelType::Electric],
            transmission: Some(Transmission::Automatic),
            ..Default::default()
        };
        assert!(filter.matches(&a, None));

        a.transmission = Transmission::Manual;
        assert!(!filter.matches(&a, None));
    }

    #[test]
    fn distance_bound_needs_scorer_and_coordinates() {
        let filter = CarFilter {
            max_distance_km: Some(50.0),
            ..Default::default()
        };
        let mut near = attrs("Audi", 50, 5);
        near.coordinates = Some(GeoPoint::new(41.0, 21.0));
        let proximity = Proximity {
            origin: GeoPoint::new(41.1, 21.0),
            scorer: &FlatScorer,
        };

        assert!(filter.matches(&near, Some(&proximity)));
        assert!(!filter.matches(&near, None));

        let unplaced = attrs("Audi", 50, 5);
        assert!(!filter.matches(&unplaced, Some(&proximity)));

        let mut far = attrs("Audi", 50, 5);
        far.coordinates = Some(GeoPoint::new(45.0, 21.0));
        assert!(!filter.matches(&far, Some(&proximity)));
    }

    #[test]
    fn sort_cheapest_then_id() {
        let mut cars = vec![
            info(3, attrs("A", 30, 4)),
            info(1, attrs("B", 10, 4)),
            info(2, attrs("C", 30, 4)),
        ];
        SortOrder::Cheapest.sort(&mut cars, None, None);
        let ids: Vec<_> = cars.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn sort_newest_first() {
        let mut old = attrs("A", 10, 4);
        old.listed_at = 100;
        let mut new = attrs("B", 10, 4);
        new.listed_at = 200;
        let mut cars = vec![info(1, old), info(2, new)];
        SortOrder::Newest.sort(&mut cars, None, None);
        assert_eq!(cars[0].id, 2);
    }

    #[test]
    fn sort_closest_puts_unplaced_last_and_falls_back_without_origin() {
        let mut near = attrs("A", 10, 4);
        near.coordinates = Some(GeoPoint::new(0.1, 0.0));
        near.listed_at = 1;
        let mut far = attrs("B", 10, 4);
        far.coordinates = Some(GeoPoint::new(1.0, 0.0));
        far.listed_at = 3;
        let mut unplaced = attrs("C", 10, 4);
        unplaced.listed_at = 2;

        let mut cars = vec![info(1, unplaced.clone()), info(2, far.clone()), info(3, near.clone())];
        let proximity = Proximity {
            origin: GeoPoint::new(0.0, 0.0),
            scorer: &FlatScorer,
        };
        SortOrder::Closest.sort(&mut cars, Some(&proximity), None);
        let ids: Vec<_> = cars.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![3, 2, 1]);

        SortOrder::Closest.sort(&mut cars, None, None);
        let ids: Vec<_> = cars.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 1, 3]); // newest first
    }

    #[test]
    fn attribute_validation() {
        assert!(attrs("Audi", 10, 5).validate().is_ok());
        assert!(attrs("Audi", 10, 0).validate().is_err());
        assert!(attrs("Audi", 10, 51).validate().is_err());
        let mut bad = attrs("Audi", 10, 5);
        bad.coordinates = Some(GeoPoint::new(91.0, 0.0));
        assert_eq!(bad.validate(), Err("coordinates out of range"));
        let mut long = attrs("Audi", 10, 5);
        long.make = "x".repeat(MAX_TEXT_LEN + 1);
        assert_eq!(long.validate(), Err("text field too long"));
    }

    #[test]
    fn page_offset() {
        let mut q = SearchQuery::default();
        assert_eq!(q.offset(), 0);
        q.page = 1;
        assert_eq!(q.offset(), 0);
        q.page = 3;
        assert_eq!(q.offset(), 20);
        q.page = usize::MAX;
        assert_eq!(q.offset(), usize::MAX);
    }

    #[test]
    fn sort_by_owner_rating_puts_unrated_last() {
        let owned = |id, owner_id, listed_at| {
            let mut a = attrs("A", 10, 4);
            a.listed_at = listed_at;
            CarInfo {
                id,
                owner_id,
                attributes: a,
            }
        };
        let mut cars = vec![owned(1, 10, 3), owned(2, 20, 1), owned(3, 30, 2), owned(4, 20, 4)];
        let ratings = TableRatings(vec![(10, 3.5), (20, 4.8)]);

        SortOrder::Rating.sort(&mut cars, None, Some(&ratings));
        let ids: Vec<_> = cars.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![2, 4, 1, 3]);

        // No rating source: newest first.
        SortOrder::Rating.sort(&mut cars, None, None);
        let ids: Vec<_> = cars.iter().map(|c| c.id).collect();
        assert_eq!(ids, vec![4, 1, 3, 2]);
    }

    #[test]
    fn car_type_wire_names() {
        assert_eq!(serde_json::to_string(&CarType::MicroCar).unwrap(), "\"Micro Car\"");
        assert_eq!(serde_json::to_string(&CarType::Suv).unwrap(), "\"SUV\"");
        let parsed: CarType = serde_json::from_str("\"Mini Bus\"").unwrap();
        assert_eq!(parsed, CarType::MiniBus);
    }
}
