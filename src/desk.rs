use std::sync::Arc;

use ulid::Ulid;

use crate::dto::{BookingRequest, RescheduleRequest, ReservationView, WindowRequest, WindowView};
use crate::engine::{Engine, EngineError};
use crate::model::UserId;
use crate::observability;
use crate::retry::{retry_with_predicate, RetryPolicy};

/// Request-level entry point: parses client payloads, runs the engine
/// operation and retries it while the car is `Busy`.
#[derive(Clone)]
pub struct BookingDesk {
    engine: Arc<Engine>,
    retry: RetryPolicy,
}

fn retry_if_busy(op: &'static str) -> impl Fn(&EngineError) -> bool {
    move |e| {
        let retry = e.is_retryable();
        if retry {
            metrics::counter!(observability::RETRIES_TOTAL, "op" => op).increment(1);
        }
        retry
    }
}

impl BookingDesk {
    pub fn new(engine: Arc<Engine>, retry: RetryPolicy) -> Self {
        Self { engine, retry }
    }

    pub fn engine(&self) -> &Arc<Engine> {
        &self.engine
    }

    pub async fn book(
        &self,
        requester_id: UserId,
        req: &BookingRequest,
    ) -> Result<ReservationView, EngineError> {
        let (start, end) = req.span_ms()?;
        let reservation = retry_with_predicate(
            &self.retry,
            || self.engine.reserve(req.car_id, start, end, requester_id),
            retry_if_busy("reserve"),
        )
        .await?;
        Ok(ReservationView::from(&reservation))
    }

    pub async fn reschedule(
        &self,
        requester_id: UserId,
        reservation_id: Ulid,
        req: &RescheduleRequest,
    ) -> Result<ReservationView, EngineError> {
        let (start, end) = req.bounds_ms()?;
        let reservation = retry_with_predicate(
            &self.retry,
            || self.engine.reschedule(reservation_id, start, end, requester_id),
            retry_if_busy("reschedule"),
        )
        .await?;
        Ok(ReservationView::from(&reservation))
    }

    pub async fn cancel(&self, requester_id: UserId, reservation_id: Ulid) -> Result<(), EngineError> {
        retry_with_predicate(
            &self.retry,
            || self.engine.cancel(reservation_id, requester_id),
            retry_if_busy("cancel"),
        )
        .await
    }

    pub async fn offer_window(
        &self,
        requester_id: UserId,
        req: &WindowRequest,
    ) -> Result<WindowView, EngineError> {
        let (start, end) = req.span_ms()?;
        let window = retry_with_predicate(
            &self.retry,
            || self.engine.add_window(req.car_id, start, end, requester_id),
            retry_if_busy("add_window"),
        )
        .await?;
        Ok(WindowView::from(&window))
    }
}
