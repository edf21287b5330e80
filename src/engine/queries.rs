use std::collections::HashMap;

use async_trait::async_trait;
use futures::stream::{self, Stream, StreamExt};
use ulid::Ulid;

use crate::catalog::SearchQuery;
use crate::limits::PAGE_SIZE;
use crate::model::*;

use super::availability::free_spans;
use super::conflict::validate_query_span;
use super::{Engine, EngineError};

/// The one persistence question the overlap checks ask: which reservations
/// on a car intersect a span.
#[async_trait]
pub trait ReservationRepository: Send + Sync {
    /// Reservations on `car_id` overlapping `span`, in start order, minus the
    /// one with id `exclude`. Adjacent reservations are not returned.
    async fn find_overlapping(
        &self,
        car_id: CarId,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, EngineError>;
}

#[async_trait]
impl ReservationRepository for Engine {
    async fn find_overlapping(
        &self,
        car_id: CarId,
        span: Span,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, EngineError> {
        let guard = self.read_car(car_id).await?;
        Ok(guard
            .overlapping(&span)
            .filter(|i| Some(i.id) != exclude)
            .filter_map(|i| Reservation::from_interval(car_id, i))
            .collect())
    }
}

impl Engine {
    /// True iff no reservation on the car, other than `exclude`, overlaps
    /// `[start, end)`. Past spans are fine to ask about.
    pub async fn is_free(
        &self,
        car_id: CarId,
        start: Ms,
        end: Ms,
        exclude: Option<Ulid>,
    ) -> Result<bool, EngineError> {
        let span = validate_query_span(start, end)?;
        Ok(self.find_overlapping(car_id, span, exclude).await?.is_empty())
    }

    /// Lazily yield the cars of `pool` that are free for `[start, end)`, in
    /// pool order. Unknown or removed cars are skipped. An invalid range is
    /// reported before anything is yielded.
    pub fn list_available_cars<I>(
        &self,
        start: Ms,
        end: Ms,
        pool: I,
    ) -> Result<impl Stream<Item = CarId> + Send + '_, EngineError>
    where
        I: IntoIterator<Item = CarId>,
        I::IntoIter: Send + 'static,
    {
        let span = validate_query_span(start, end)?;
        Ok(stream::iter(pool).filter_map(move |car_id| async move {
            match self.find_overlapping(car_id, span, None).await {
                Ok(hits) if hits.is_empty() => Some(car_id),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!("skipping car {car_id}: {e}");
                    None
                }
            }
        }))
    }

    /// Catalog search: filter, sort, optionally keep only cars free for the
    /// query's period, then cut one page.
    pub async fn search_cars(&self, query: &SearchQuery<'_>) -> Result<Vec<CarInfo>, EngineError> {
        let period = query
            .period
            .map(|p| validate_query_span(p.start, p.end))
            .transpose()?;
        let proximity = query.proximity.as_ref();

        let mut matching: Vec<CarInfo> = self
            .list_cars()
            .await
            .into_iter()
            .filter(|car| query.filter.matches(&car.attributes, proximity))
            .collect();
        query.sort.sort(&mut matching, proximity, query.ratings);

        let Some(period) = period else {
            return Ok(matching
                .into_iter()
                .skip(query.offset())
                .take(PAGE_SIZE)
                .collect());
        };

        let ordered: Vec<CarId> = matching.iter().map(|c| c.id).collect();
        let page: Vec<CarId> = self
            .list_available_cars(period.start, period.end, ordered)?
            .skip(query.offset())
            .take(PAGE_SIZE)
            .collect()
            .await;
        let mut by_id: HashMap<CarId, CarInfo> = matching.into_iter().map(|c| (c.id, c)).collect();
        Ok(page.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }

    // ── Cars ─────────────────────────────────────────────

    pub async fn get_car(&self, id: CarId) -> Result<CarInfo, EngineError> {
        Ok(self.read_car(id).await?.info())
    }

    /// Every registered car, by id.
    pub async fn list_cars(&self) -> Vec<CarInfo> {
        let mut cars = Vec::with_capacity(self.cars.len());
        for rs in self.car_handles() {
            let guard = rs.read().await;
            if !guard.retired {
                cars.push(guard.info());
            }
        }
        cars.sort_by_key(|c| c.id);
        cars
    }

    pub async fn cars_by_owner(&self, owner_id: UserId) -> Vec<CarInfo> {
        let mut cars = self.list_cars().await;
        cars.retain(|c| c.owner_id == owner_id);
        cars
    }

    // ── Reservations ─────────────────────────────────────

    pub async fn get_reservation(&self, id: Ulid) -> Result<Reservation, EngineError> {
        let car_id = self
            .car_for_entity(&id)
            .ok_or(EngineError::ReservationNotFound(id))?;
        let guard = self
            .read_car(car_id)
            .await
            .map_err(|_| EngineError::ReservationNotFound(id))?;
        guard
            .interval(id)
            .and_then(|i| Reservation::from_interval(car_id, i))
            .ok_or(EngineError::ReservationNotFound(id))
    }

    /// Reservations on one car, in start order.
    pub async fn reservations_for_car(&self, car_id: CarId) -> Result<Vec<Reservation>, EngineError> {
        let guard = self.read_car(car_id).await?;
        Ok(guard
            .reservations()
            .filter_map(|i| Reservation::from_interval(car_id, i))
            .collect())
    }

    /// Every reservation made by `user_id`, by start then car.
    pub async fn reservations_by_user(&self, user_id: UserId) -> Vec<Reservation> {
        let mut found = Vec::new();
        for rs in self.car_handles() {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            found.extend(
                guard
                    .reservations()
                    .filter_map(|i| Reservation::from_interval(guard.id, i))
                    .filter(|r| r.owner_id == user_id),
            );
        }
        found.sort_by_key(|r| (r.start, r.car_id));
        found
    }

    // ── Windows ──────────────────────────────────────────

    pub async fn get_window(&self, id: Ulid) -> Result<AvailabilityWindow, EngineError> {
        let car_id = self
            .car_for_entity(&id)
            .ok_or(EngineError::WindowNotFound(id))?;
        let guard = self
            .read_car(car_id)
            .await
            .map_err(|_| EngineError::WindowNotFound(id))?;
        guard
            .interval(id)
            .and_then(|i| AvailabilityWindow::from_interval(car_id, i))
            .ok_or(EngineError::WindowNotFound(id))
    }

    pub async fn windows_for_car(&self, car_id: CarId) -> Result<Vec<AvailabilityWindow>, EngineError> {
        let guard = self.read_car(car_id).await?;
        Ok(guard
            .windows()
            .filter_map(|i| AvailabilityWindow::from_interval(car_id, i))
            .collect())
    }

    /// Unreserved sub-spans of `[start, end)` on one car.
    pub async fn compute_free_spans(
        &self,
        car_id: CarId,
        start: Ms,
        end: Ms,
    ) -> Result<Vec<Span>, EngineError> {
        let query = validate_query_span(start, end)?;
        let guard = self.read_car(car_id).await?;
        Ok(free_spans(&guard, &query))
    }
}
