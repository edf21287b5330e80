use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::engine::EngineError;
use crate::model::{AvailabilityWindow, CarId, Ms, Reservation, UserId};

/// Body of a booking request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    pub car_id: CarId,
    pub start_date: String,
    pub end_date: String,
}

/// Partial update; an omitted date keeps its current value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RescheduleRequest {
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowRequest {
    pub car_id: CarId,
    pub start_date: String,
    pub end_date: String,
}

/// Parse a client timestamp to unix millis.
///
/// Accepted: RFC 3339 (`2025-06-01T10:00:00+02:00`), UTC with a `Z` suffix and
/// optional seconds/fraction (`2025-06-01T10:00Z`), and a bare date
/// (`2025-06-01`, taken as UTC midnight).
pub fn parse_instant(raw: &str) -> Result<Ms, EngineError> {
    let s = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.timestamp_millis());
    }
    if let Some(naive) = s.strip_suffix('Z').or_else(|| s.strip_suffix('z')) {
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
            if let Ok(dt) = NaiveDateTime::parse_from_str(naive, fmt) {
                return Ok(dt.and_utc().timestamp_millis());
            }
        }
    }
    if let Ok(dt) = DateTime::parse_from_str(s, "%Y-%m-%dT%H:%M%:z") {
        return Ok(dt.timestamp_millis());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && let Some(midnight) = date.and_hms_opt(0, 0, 0)
    {
        return Ok(midnight.and_utc().timestamp_millis());
    }
    Err(EngineError::InvalidTimestamp(raw.to_string()))
}

fn parse_optional(raw: Option<&str>) -> Result<Option<Ms>, EngineError> {
    raw.map(parse_instant).transpose()
}

impl BookingRequest {
    pub fn span_ms(&self) -> Result<(Ms, Ms), EngineError> {
        Ok((parse_instant(&self.start_date)?, parse_instant(&self.end_date)?))
    }
}

impl RescheduleRequest {
    pub fn bounds_ms(&self) -> Result<(Option<Ms>, Option<Ms>), EngineError> {
        Ok((
            parse_optional(self.start_date.as_deref())?,
            parse_optional(self.end_date.as_deref())?,
        ))
    }
}

impl WindowRequest {
    pub fn span_ms(&self) -> Result<(Ms, Ms), EngineError> {
        Ok((parse_instant(&self.start_date)?, parse_instant(&self.end_date)?))
    }
}

/// RFC 3339 in UTC with millisecond precision.
pub fn format_instant(ms: Ms) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        .unwrap_or_else(|| ms.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub id: Ulid,
    pub car_id: CarId,
    pub start_date: String,
    pub end_date: String,
    pub owner_id: UserId,
}

impl From<&Reservation> for ReservationView {
    fn from(r: &Reservation) -> Self {
        Self {
            id: r.id,
            car_id: r.car_id,
            start_date: format_instant(r.start),
            end_date: format_instant(r.end),
            owner_id: r.owner_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowView {
    pub id: Ulid,
    pub car_id: CarId,
    pub start_date: String,
    pub end_date: String,
}

impl From<&AvailabilityWindow> for WindowView {
    fn from(w: &AvailabilityWindow) -> Self {
        Self {
            id: w.id,
            car_id: w.car_id,
            start_date: format_instant(w.start),
            end_date: format_instant(w.end),
        }
    }
}
