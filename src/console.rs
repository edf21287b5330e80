//! Line-delimited JSON front end for the booking desk.
//!
//! One request object per line, one response object per line:
//!
//! ```text
//! {"op":"book","requesterId":7,"carId":1,"startDate":"2025-06-01T00:00Z","endDate":"2025-06-05T00:00Z"}
//! {"ok":{"id":"01J...","carId":1,"startDate":"2025-06-01T00:00:00.000Z",...}}
//! ```
//!
//! Failures come back as `{"error":{"kind":"conflict","message":"..."}}`.

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec};
use ulid::Ulid;

use crate::catalog::CarAttributes;
use crate::desk::BookingDesk;
use crate::dto::{parse_instant, BookingRequest, RescheduleRequest, ReservationView, WindowRequest};
use crate::engine::EngineError;
use crate::model::{CarId, UserId};

const MAX_LINE_LEN: usize = 64 * 1024;

#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum Command {
    RegisterCar {
        requester_id: UserId,
        car_id: CarId,
        attributes: CarAttributes,
    },
    RemoveCar {
        requester_id: UserId,
        car_id: CarId,
    },
    Book {
        requester_id: UserId,
        #[serde(flatten)]
        request: BookingRequest,
    },
    Reschedule {
        requester_id: UserId,
        reservation_id: Ulid,
        #[serde(flatten)]
        request: RescheduleRequest,
    },
    Cancel {
        requester_id: UserId,
        reservation_id: Ulid,
    },
    OfferWindow {
        requester_id: UserId,
        #[serde(flatten)]
        request: WindowRequest,
    },
    IsFree {
        car_id: CarId,
        start_date: String,
        end_date: String,
    },
    Available {
        start_date: String,
        end_date: String,
        pool: Vec<CarId>,
    },
    MyReservations {
        requester_id: UserId,
    },
}

fn error_value(e: &EngineError) -> Value {
    json!({ "error": { "kind": e.kind().as_str(), "message": e.to_string() } })
}

fn ok_value(value: Value) -> Value {
    json!({ "ok": value })
}

fn to_json<T: Serialize>(value: &T) -> Result<Value, EngineError> {
    serde_json::to_value(value).map_err(|e| EngineError::Encoding(e.to_string()))
}

/// Run one command against the desk.
pub async fn execute(desk: &BookingDesk, cmd: Command) -> Result<Value, EngineError> {
    let engine = desk.engine();
    Ok(match cmd {
        Command::RegisterCar {
            requester_id,
            car_id,
            attributes,
        } => {
            let info = engine.register_car(car_id, requester_id, attributes).await?;
            json!({ "id": info.id, "ownerId": info.owner_id })
        }
        Command::RemoveCar {
            requester_id,
            car_id,
        } => {
            engine.remove_car(car_id, requester_id).await?;
            Value::Null
        }
        Command::Book {
            requester_id,
            request,
        } => to_json(&desk.book(requester_id, &request).await?)?,
        Command::Reschedule {
            requester_id,
            reservation_id,
            request,
        } => to_json(&desk.reschedule(requester_id, reservation_id, &request).await?)?,
        Command::Cancel {
            requester_id,
            reservation_id,
        } => {
            desk.cancel(requester_id, reservation_id).await?;
            Value::Null
        }
        Command::OfferWindow {
            requester_id,
            request,
        } => to_json(&desk.offer_window(requester_id, &request).await?)?,
        Command::IsFree {
            car_id,
            start_date,
            end_date,
        } => {
            let (start, end) = (parse_instant(&start_date)?, parse_instant(&end_date)?);
            Value::Bool(engine.is_free(car_id, start, end, None).await?)
        }
        Command::Available {
            start_date,
            end_date,
            pool,
        } => {
            let (start, end) = (parse_instant(&start_date)?, parse_instant(&end_date)?);
            let free: Vec<CarId> = engine.list_available_cars(start, end, pool)?.collect().await;
            json!(free)
        }
        Command::MyReservations { requester_id } => {
            let views: Vec<ReservationView> = engine
                .reservations_by_user(requester_id)
                .await
                .iter()
                .map(ReservationView::from)
                .collect();
            to_json(&views)?
        }
    })
}

/// Parse and run one request line, always producing a response object.
pub async fn handle_line(desk: &BookingDesk, line: &str) -> Value {
    let cmd: Command = match serde_json::from_str(line) {
        Ok(cmd) => cmd,
        Err(e) => {
            return json!({ "error": { "kind": "invalid_input", "message": format!("bad request: {e}") } });
        }
    };
    match execute(desk, cmd).await {
        Ok(value) => ok_value(value),
        Err(e) => {
            if e.kind() == crate::engine::ErrorKind::Internal {
                tracing::error!("request failed: {e}");
            }
            error_value(&e)
        }
    }
}

/// Serve requests from `input` until it closes, writing responses to `output`.
pub async fn serve<R, W>(desk: &BookingDesk, input: R, output: W) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = FramedRead::new(input, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let mut responses = FramedWrite::new(output, LinesCodec::new());

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!("dropping unreadable request: {e}");
                let reply = json!({ "error": { "kind": "invalid_input", "message": e.to_string() } });
                responses.send(reply.to_string()).await.map_err(into_io)?;
                continue;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let reply = handle_line(desk, &line).await;
        responses.send(reply.to_string()).await.map_err(into_io)?;
    }
    Ok(())
}

fn into_io(e: tokio_util::codec::LinesCodecError) -> std::io::Error {
    match e {
        tokio_util::codec::LinesCodecError::Io(e) => e,
        other => std::io::Error::other(other.to_string()),
    }
}
