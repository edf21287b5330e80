use std::sync::Arc;
use std::time::Instant;

use dashmap::mapref::entry::Entry;
use tokio::sync::{oneshot, RwLock};
use ulid::Ulid;

use crate::catalog::CarAttributes;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, check_offered, ensure_not_past, validate_span};
use super::{CarGuard, Engine, EngineError, WalCommand};

impl Engine {
    // ── Car registry ─────────────────────────────────────

    pub async fn register_car(
        &self,
        id: CarId,
        owner_id: UserId,
        attributes: CarAttributes,
    ) -> Result<CarInfo, EngineError> {
        attributes.validate().map_err(EngineError::InvalidAttributes)?;
        if self.cars.len() >= MAX_CARS {
            return Err(EngineError::LimitExceeded("too many cars"));
        }
        let gate = self.enter_gate(id).await?;

        // Claim the id with the lock already held, so nothing can reserve on
        // the car before its registration is durable.
        let rs = Arc::new(RwLock::new(CarState::new(id, owner_id, attributes.clone())));
        let car = match self.cars.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(slot) => {
                let car = rs
                    .clone()
                    .try_write_owned()
                    .map_err(|_| EngineError::Busy(id))?;
                slot.insert(rs);
                car
            }
        };
        let mut guard = CarGuard { _gate: gate, car };

        let event = Event::CarRegistered {
            id,
            owner_id,
            attributes,
        };
        if let Err(e) = self.wal_append(&event).await {
            guard.retired = true;
            self.cars.remove(&id);
            return Err(e);
        }
        self.notify.send(id, &event);
        metrics::gauge!(observability::CARS_ACTIVE).set(self.cars.len() as f64);
        tracing::info!(car_id = id, owner_id, "car registered");
        Ok(guard.info())
    }

    pub async fn update_car(
        &self,
        id: CarId,
        attributes: CarAttributes,
        requester_id: UserId,
    ) -> Result<CarInfo, EngineError> {
        attributes.validate().map_err(EngineError::InvalidAttributes)?;
        let mut guard = self.lock_car(id).await?;
        ensure_owner(guard.owner_id, requester_id)?;

        let event = Event::CarUpdated { id, attributes };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(guard.info())
    }

    /// Remove a car together with all of its reservations and windows.
    pub async fn remove_car(&self, id: CarId, requester_id: UserId) -> Result<(), EngineError> {
        let mut guard = self.lock_car(id).await?;
        ensure_owner(guard.owner_id, requester_id)?;

        let dropped = guard.intervals.len();
        let event = Event::CarRemoved { id };
        self.persist_and_apply(&mut guard, &event).await?;
        self.cars.remove(&id);
        self.notify.remove(&id);
        metrics::gauge!(observability::CARS_ACTIVE).set(self.cars.len() as f64);
        tracing::info!(car_id = id, dropped, "car removed");
        Ok(())
    }

    // ── Reservations ─────────────────────────────────────

    /// Book `[start, end)` on a car for `user_id`. The overlap check and the
    /// write happen under the car's lock, so of two racing requests for
    /// overlapping spans exactly one succeeds.
    pub async fn reserve(
        &self,
        car_id: CarId,
        start: Ms,
        end: Ms,
        user_id: UserId,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.reserve_locked(car_id, start, end, user_id).await;
        observability::record_operation("reserve", started, &result);
        result
    }

    async fn reserve_locked(
        &self,
        car_id: CarId,
        start: Ms,
        end: Ms,
        user_id: UserId,
    ) -> Result<Reservation, EngineError> {
        let span = validate_span(start, end)?;
        ensure_not_past(&span, self.now())?;

        let mut guard = self.lock_car(car_id).await?;
        if guard.intervals.len() >= MAX_INTERVALS_PER_CAR {
            return Err(EngineError::LimitExceeded("too many intervals on car"));
        }
        check_no_conflict(&guard, &span, None)?;
        check_offered(&guard, &span, self.config.window_policy)?;

        let id = Ulid::new();
        let event = Event::ReservationCreated {
            id,
            car_id,
            span,
            owner_id: user_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(car_id, reservation = %id, user_id, "reserved [{start}, {end})");
        Ok(Reservation {
            id,
            car_id,
            start,
            end,
            owner_id: user_id,
        })
    }

    /// Move a reservation. Omitted bounds keep their current value; the
    /// reservation's own span never counts as a conflict.
    pub async fn reschedule(
        &self,
        reservation_id: Ulid,
        new_start: Option<Ms>,
        new_end: Option<Ms>,
        requester_id: UserId,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self
            .reschedule_locked(reservation_id, new_start, new_end, requester_id)
            .await;
        observability::record_operation("reschedule", started, &result);
        result
    }

    async fn reschedule_locked(
        &self,
        reservation_id: Ulid,
        new_start: Option<Ms>,
        new_end: Option<Ms>,
        requester_id: UserId,
    ) -> Result<Reservation, EngineError> {
        let mut guard = self
            .lock_entity(reservation_id, EngineError::ReservationNotFound)
            .await?;
        let current = guard
            .interval(reservation_id)
            .and_then(|i| Reservation::from_interval(guard.id, i))
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        ensure_owner(current.owner_id, requester_id)?;

        if new_start.is_none() && new_end.is_none() {
            return Ok(current);
        }
        let span = validate_span(
            new_start.unwrap_or(current.start),
            new_end.unwrap_or(current.end),
        )?;
        ensure_not_past(&span, self.now())?;
        check_no_conflict(&guard, &span, Some(reservation_id))?;
        check_offered(&guard, &span, self.config.window_policy)?;

        let event = Event::ReservationRescheduled {
            id: reservation_id,
            car_id: current.car_id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(
            car_id = current.car_id,
            reservation = %reservation_id,
            "rescheduled to [{}, {})",
            span.start,
            span.end
        );
        Ok(Reservation {
            start: span.start,
            end: span.end,
            ..current
        })
    }

    /// Delete a reservation; its span becomes free immediately.
    pub async fn cancel(&self, reservation_id: Ulid, requester_id: UserId) -> Result<(), EngineError> {
        let started = Instant::now();
        let result = self.cancel_locked(reservation_id, requester_id).await;
        observability::record_operation("cancel", started, &result);
        result
    }

    async fn cancel_locked(&self, reservation_id: Ulid, requester_id: UserId) -> Result<(), EngineError> {
        let mut guard = self
            .lock_entity(reservation_id, EngineError::ReservationNotFound)
            .await?;
        let owner_id = guard
            .interval(reservation_id)
            .and_then(|i| i.reservation_owner())
            .ok_or(EngineError::ReservationNotFound(reservation_id))?;
        ensure_owner(owner_id, requester_id)?;

        let car_id = guard.id;
        let event = Event::ReservationCancelled {
            id: reservation_id,
            car_id,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        tracing::info!(car_id, reservation = %reservation_id, "reservation cancelled");
        Ok(())
    }

    // ── Availability windows ─────────────────────────────

    pub async fn add_window(
        &self,
        car_id: CarId,
        start: Ms,
        end: Ms,
        requester_id: UserId,
    ) -> Result<AvailabilityWindow, EngineError> {
        let span = validate_span(start, end)?;
        let mut guard = self.lock_car(car_id).await?;
        ensure_owner(guard.owner_id, requester_id)?;
        if guard.intervals.len() >= MAX_INTERVALS_PER_CAR {
            return Err(EngineError::LimitExceeded("too many intervals on car"));
        }

        let id = Ulid::new();
        let event = Event::WindowAdded { id, car_id, span };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(AvailabilityWindow {
            id,
            car_id,
            start,
            end,
        })
    }

    pub async fn update_window(
        &self,
        window_id: Ulid,
        new_start: Option<Ms>,
        new_end: Option<Ms>,
        requester_id: UserId,
    ) -> Result<AvailabilityWindow, EngineError> {
        let mut guard = self
            .lock_entity(window_id, EngineError::WindowNotFound)
            .await?;
        let current = guard
            .interval(window_id)
            .and_then(|i| AvailabilityWindow::from_interval(guard.id, i))
            .ok_or(EngineError::WindowNotFound(window_id))?;
        ensure_owner(guard.owner_id, requester_id)?;

        let span = validate_span(
            new_start.unwrap_or(current.start),
            new_end.unwrap_or(current.end),
        )?;
        if span.start == current.start && span.end == current.end {
            return Ok(current);
        }

        let event = Event::WindowUpdated {
            id: window_id,
            car_id: current.car_id,
            span,
        };
        self.persist_and_apply(&mut guard, &event).await?;
        Ok(AvailabilityWindow {
            start: span.start,
            end: span.end,
            ..current
        })
    }

    pub async fn remove_window(&self, window_id: Ulid, requester_id: UserId) -> Result<(), EngineError> {
        let mut guard = self
            .lock_entity(window_id, EngineError::WindowNotFound)
            .await?;
        if !guard.interval(window_id).is_some_and(|i| i.is_window()) {
            return Err(EngineError::WindowNotFound(window_id));
        }
        ensure_owner(guard.owner_id, requester_id)?;

        let car_id = guard.id;
        let event = Event::WindowRemoved { id: window_id, car_id };
        self.persist_and_apply(&mut guard, &event).await
    }

    // ── Journal maintenance ──────────────────────────────

    /// Compact the WAL by rewriting it with only the events needed to recreate the current state.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        // Exclusive gate: no mutation is in flight until the swap is done.
        let _gate = self.compaction_gate.write().await;

        let mut events = Vec::new();
        for rs in self.car_handles() {
            let guard = rs.read().await;
            if guard.retired {
                continue;
            }
            events.push(Event::CarRegistered {
                id: guard.id,
                owner_id: guard.owner_id,
                attributes: guard.attributes.clone(),
            });
            for interval in &guard.intervals {
                events.push(match interval.kind {
                    IntervalKind::Reservation { owner_id } => Event::ReservationCreated {
                        id: interval.id,
                        car_id: guard.id,
                        span: interval.span,
                        owner_id,
                    },
                    IntervalKind::Window => Event::WindowAdded {
                        id: interval.id,
                        car_id: guard.id,
                        span: interval.span,
                    },
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        metrics::counter!(observability::COMPACTIONS_TOTAL).increment(1);
        tracing::debug!("WAL compacted to {count} events");
        Ok(())
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}

fn ensure_owner(owner_id: UserId, requester_id: UserId) -> Result<(), EngineError> {
    if owner_id != requester_id {
        return Err(EngineError::Forbidden { requester_id });
    }
    Ok(())
}
