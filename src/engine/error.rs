use ulid::Ulid;

use crate::model::{CarId, Ms, Span, UserId};

#[derive(Debug)]
pub enum EngineError {
    InvalidRange { start: Ms, end: Ms },
    InvalidTimestamp(String),
    InvalidAttributes(&'static str),
    PastDate { start: Ms, now: Ms },
    CarNotFound(CarId),
    ReservationNotFound(Ulid),
    WindowNotFound(Ulid),
    Forbidden { requester_id: UserId },
    /// The requested span overlaps an active reservation.
    Conflict { reservation_id: Ulid, span: Span },
    /// The car is not offered for the whole span (window policy in force).
    NotOffered { span: Span, uncovered: Vec<Span> },
    AlreadyExists(CarId),
    /// The car's lock could not be taken in time. Safe to retry.
    Busy(CarId),
    LimitExceeded(&'static str),
    WalError(String),
    /// A result could not be rendered for the caller.
    Encoding(String),
}

/// Coarse classification the boundary layer maps to a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    InvalidInput,
    NotFound,
    Forbidden,
    Conflict,
    Busy,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidInput => "invalid_input",
            ErrorKind::NotFound => "not_found",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::Conflict => "conflict",
            ErrorKind::Busy => "busy",
            ErrorKind::Internal => "internal",
        }
    }
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::InvalidRange { .. }
            | EngineError::InvalidTimestamp(_)
            | EngineError::InvalidAttributes(_)
            | EngineError::PastDate { .. }
            | EngineError::LimitExceeded(_) => ErrorKind::InvalidInput,
            EngineError::CarNotFound(_)
            | EngineError::ReservationNotFound(_)
            | EngineError::WindowNotFound(_) => ErrorKind::NotFound,
            EngineError::Forbidden { .. } => ErrorKind::Forbidden,
            EngineError::Conflict { .. }
            | EngineError::NotOffered { .. }
            | EngineError::AlreadyExists(_) => ErrorKind::Conflict,
            EngineError::Busy(_) => ErrorKind::Busy,
            EngineError::WalError(_) | EngineError::Encoding(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Busy
    }

    /// Short stable label for metrics.
    pub fn label(&self) -> &'static str {
        match self {
            EngineError::InvalidRange { .. } => "invalid_range",
            EngineError::InvalidTimestamp(_) => "invalid_timestamp",
            EngineError::InvalidAttributes(_) => "invalid_attributes",
            EngineError::PastDate { .. } => "past_date",
            EngineError::CarNotFound(_)
            | EngineError::ReservationNotFound(_)
            | EngineError::WindowNotFound(_) => "not_found",
            EngineError::Forbidden { .. } => "forbidden",
            EngineError::Conflict { .. } => "conflict",
            EngineError::NotOffered { .. } => "not_offered",
            EngineError::AlreadyExists(_) => "already_exists",
            EngineError::Busy(_) => "busy",
            EngineError::LimitExceeded(_) => "limit_exceeded",
            EngineError::WalError(_) | EngineError::Encoding(_) => "internal",
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::InvalidRange { start, end } => {
                write!(f, "invalid range: start {start} is not before end {end}")
            }
            EngineError::InvalidTimestamp(raw) => write!(f, "invalid timestamp: {raw:?}"),
            EngineError::InvalidAttributes(msg) => write!(f, "invalid car attributes: {msg}"),
            EngineError::PastDate { start, now } => {
                write!(f, "start {start} is in the past (now {now})")
            }
            EngineError::CarNotFound(id) => write!(f, "car not found: {id}"),
            EngineError::ReservationNotFound(id) => write!(f, "reservation not found: {id}"),
            EngineError::WindowNotFound(id) => write!(f, "availability window not found: {id}"),
            EngineError::Forbidden { requester_id } => {
                write!(f, "user {requester_id} does not own this resource")
            }
            EngineError::Conflict {
                reservation_id,
                span,
            } => write!(
                f,
                "conflict with reservation {reservation_id} [{}, {})",
                span.start, span.end
            ),
            EngineError::NotOffered { span, uncovered } => write!(
                f,
                "car not offered for [{}, {}); uncovered: {:?}",
                span.start, span.end, uncovered
            ),
            EngineError::AlreadyExists(id) => write!(f, "car already exists: {id}"),
            EngineError::Busy(id) => write!(f, "car {id} is busy, retry later"),
            EngineError::LimitExceeded(msg) => write!(f, "limit exceeded: {msg}"),
            EngineError::WalError(e) => write!(f, "WAL error: {e}"),
            EngineError::Encoding(e) => write!(f, "could not encode response: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_distinguishable_without_messages() {
        assert_eq!(
            EngineError::InvalidRange { start: 2, end: 1 }.kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            EngineError::PastDate { start: 1, now: 2 }.kind(),
            ErrorKind::InvalidInput
        );
        assert_eq!(
            EngineError::ReservationNotFound(Ulid::new()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(EngineError::CarNotFound(1).kind(), ErrorKind::NotFound);
        assert_eq!(
            EngineError::Forbidden { requester_id: 1 }.kind(),
            ErrorKind::Forbidden
        );
        assert_eq!(
            EngineError::Conflict {
                reservation_id: Ulid::new(),
                span: Span::new(0, 1)
            }
            .kind(),
            ErrorKind::Conflict
        );
        assert_eq!(EngineError::Busy(1).kind(), ErrorKind::Busy);
        assert_eq!(EngineError::WalError("disk".into()).kind(), ErrorKind::Internal);
        assert_eq!(EngineError::Encoding("json".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn only_busy_is_retryable() {
        assert!(EngineError::Busy(1).is_retryable());
        assert!(!EngineError::WalError("x".into()).is_retryable());
        assert!(
            !EngineError::Conflict {
                reservation_id: Ulid::new(),
                span: Span::new(0, 1)
            }
            .is_retryable()
        );
    }

    #[test]
    fn conflict_message_names_blocking_reservation() {
        let id = Ulid::new();
        let msg = EngineError::Conflict {
            reservation_id: id,
            span: Span::new(10, 20),
        }
        .to_string();
        assert!(msg.contains(&id.to_string()));
        assert!(msg.contains("[10, 20)"));
    }
}
