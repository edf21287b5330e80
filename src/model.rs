use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::catalog::CarAttributes;

/// Unix milliseconds. The only time type.
pub type Ms = i64;

/// Caller-assigned car identifier.
pub type CarId = i64;

/// Caller-assigned user identifier (resolved by the authentication layer).
pub type UserId = i64;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    /// Checked constructor for untrusted input.
    pub fn try_new(start: Ms, end: Ms) -> Option<Self> {
        (start < end).then_some(Self { start, end })
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    /// Back-to-back spans (`a.end == b.start`) do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// What an interval on a car represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IntervalKind {
    /// A booked, car-exclusive period.
    Reservation { owner_id: UserId },
    /// A period during which the car is nominally offered.
    Window,
}

/// Reservations and availability windows are both just intervals on a car.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Interval {
    pub id: Ulid,
    pub span: Span,
    pub kind: IntervalKind,
}

impl Interval {
    pub fn is_reservation(&self) -> bool {
        matches!(self.kind, IntervalKind::Reservation { .. })
    }

    pub fn is_window(&self) -> bool {
        matches!(self.kind, IntervalKind::Window)
    }

    pub fn reservation_owner(&self) -> Option<UserId> {
        match self.kind {
            IntervalKind::Reservation { owner_id } => Some(owner_id),
            IntervalKind::Window => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CarState {
    pub id: CarId,
    pub owner_id: UserId,
    pub attributes: CarAttributes,
    /// Set under the write lock when the car is removed. Writers that were
    /// queued on the lock must treat the car as gone.
    pub retired: bool,
    /// Reservations and windows, sorted by `span.start`.
    pub intervals: Vec<Interval>,
}

impl CarState {
    pub fn new(id: CarId, owner_id: UserId, attributes: CarAttributes) -> Self {
        Self {
            id,
            owner_id,
            attributes,
            retired: false,
            intervals: Vec::new(),
        }
    }

    /// Insert interval maintaining sort order by span.start.
    pub fn insert_interval(&mut self, interval: Interval) {
        let pos = self
            .intervals
            .binary_search_by_key(&interval.span.start, |i| i.span.start)
            .unwrap_or_else(|e| e);
        self.intervals.insert(pos, interval);
    }

    /// Remove interval by id.
    pub fn remove_interval(&mut self, id: Ulid) -> Option<Interval> {
        let pos = self.intervals.iter().position(|i| i.id == id)?;
        Some(self.intervals.remove(pos))
    }

    pub fn interval(&self, id: Ulid) -> Option<&Interval> {
        self.intervals.iter().find(|i| i.id == id)
    }

    /// Return only intervals whose span overlaps the query window.
    /// Uses binary search to skip intervals starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Interval> {
        let right_bound = self
            .intervals
            .partition_point(|i| i.span.start < query.end);
        self.intervals[..right_bound]
            .iter()
            .filter(move |i| i.span.end > query.start)
    }

    pub fn reservations(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter().filter(|i| i.is_reservation())
    }

    pub fn windows(&self) -> impl Iterator<Item = &Interval> {
        self.intervals.iter().filter(|i| i.is_window())
    }

    pub fn info(&self) -> CarInfo {
        CarInfo {
            id: self.id,
            owner_id: self.owner_id,
            attributes: self.attributes.clone(),
        }
    }
}

/// Journal record format. Flat, no nesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    CarRegistered {
        id: CarId,
        owner_id: UserId,
        attributes: CarAttributes,
    },
    CarUpdated {
        id: CarId,
        attributes: CarAttributes,
    },
    /// Cascades: every reservation and window of the car goes with it.
    CarRemoved {
        id: CarId,
    },
    ReservationCreated {
        id: Ulid,
        car_id: CarId,
        span: Span,
        owner_id: UserId,
    },
    ReservationRescheduled {
        id: Ulid,
        car_id: CarId,
        span: Span,
    },
    ReservationCancelled {
        id: Ulid,
        car_id: CarId,
    },
    WindowAdded {
        id: Ulid,
        car_id: CarId,
        span: Span,
    },
    WindowUpdated {
        id: Ulid,
        car_id: CarId,
        span: Span,
    },
    WindowRemoved {
        id: Ulid,
        car_id: CarId,
    },
}

impl Event {
    pub fn car_id(&self) -> CarId {
        match self {
            Event::CarRegistered { id, .. }
            | Event::CarUpdated { id, .. }
            | Event::CarRemoved { id } => *id,
            Event::ReservationCreated { car_id, .. }
            | Event::ReservationRescheduled { car_id, .. }
            | Event::ReservationCancelled { car_id, .. }
            | Event::WindowAdded { car_id, .. }
            | Event::WindowUpdated { car_id, .. }
            | Event::WindowRemoved { car_id, .. } => *car_id,
        }
    }
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct CarInfo {
    pub id: CarId,
    pub owner_id: UserId,
    pub attributes: CarAttributes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub car_id: CarId,
    pub start: Ms,
    pub end: Ms,
    pub owner_id: UserId,
}

impl Reservation {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }

    pub(crate) fn from_interval(car_id: CarId, interval: &Interval) -> Option<Self> {
        interval.reservation_owner().map(|owner_id| Self {
            id: interval.id,
            car_id,
            start: interval.span.start,
            end: interval.span.end,
            owner_id,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvailabilityWindow {
    pub id: Ulid,
    pub car_id: CarId,
    pub start: Ms,
    pub end: Ms,
}

impl AvailabilityWindow {
    pub(crate) fn from_interval(car_id: CarId, interval: &Interval) -> Option<Self> {
        interval.is_window().then(|| Self {
            id: interval.id,
            car_id,
            start: interval.span.start,
            end: interval.span.end,
        })
    }
}
