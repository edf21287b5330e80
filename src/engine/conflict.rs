use ulid::Ulid;

use crate::config::WindowPolicy;
use crate::limits::*;
use crate::model::*;

use super::availability::{merge_overlapping, subtract_intervals};
use super::EngineError;

/// Ordering first, then the representable timestamp range.
fn checked_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = Span::try_new(start, end).ok_or(EngineError::InvalidRange { start, end })?;
    if span.start < MIN_VALID_TIMESTAMP_MS || span.end > MAX_VALID_TIMESTAMP_MS {
        return Err(EngineError::LimitExceeded("timestamp out of range"));
    }
    Ok(span)
}

/// Span of a reservation or window to be stored.
pub(crate) fn validate_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = checked_span(start, end)?;
    if span.duration_ms() > MAX_SPAN_DURATION_MS {
        return Err(EngineError::LimitExceeded("span too wide"));
    }
    Ok(span)
}

/// Span of a read-only availability question. May be wider than any booking.
pub(crate) fn validate_query_span(start: Ms, end: Ms) -> Result<Span, EngineError> {
    let span = checked_span(start, end)?;
    if span.duration_ms() > MAX_QUERY_WINDOW_MS {
        return Err(EngineError::LimitExceeded("query window too wide"));
    }
    Ok(span)
}

pub(crate) fn ensure_not_past(span: &Span, now: Ms) -> Result<(), EngineError> {
    if span.start < now {
        return Err(EngineError::PastDate {
            start: span.start,
            now,
        });
    }
    Ok(())
}

/// First reservation on the car that overlaps `span`, ignoring `exclude`.
/// Windows never conflict.
pub fn first_conflict<'a>(
    car: &'a CarState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Option<&'a Interval> {
    car.overlapping(span)
        .filter(|i| i.is_reservation())
        .find(|i| Some(i.id) != exclude)
}

pub(crate) fn check_no_conflict(
    car: &CarState,
    span: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match first_conflict(car, span, exclude) {
        Some(blocking) => {
            tracing::debug!(
                car_id = car.id,
                blocking = %blocking.id,
                "requested [{}, {}) overlaps [{}, {})",
                span.start,
                span.end,
                blocking.span.start,
                blocking.span.end
            );
            Err(EngineError::Conflict {
                reservation_id: blocking.id,
                span: blocking.span,
            })
        }
        None => Ok(()),
    }
}

/// Under `RequireCoverage`, the union of the car's windows must cover `span`.
pub(crate) fn check_offered(
    car: &CarState,
    span: &Span,
    policy: WindowPolicy,
) -> Result<(), EngineError> {
    if policy == WindowPolicy::Ignore {
        return Ok(());
    }
    let mut windows: Vec<Span> = car
        .overlapping(span)
        .filter(|i| i.is_window())
        .map(|i| i.span)
        .collect();
    windows.sort_by_key(|s| s.start);
    let offered = merge_overlapping(&windows);
    // Merged windows are disjoint and non-adjacent.
    if offered.iter().any(|w| w.contains_span(span)) {
        return Ok(());
    }
    Err(EngineError::NotOffered {
        span: *span,
        uncovered: subtract_intervals(&[*span], &offered),
    })
}
