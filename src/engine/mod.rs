mod availability;
mod conflict;
mod error;
mod mutations;
mod queries;

pub use availability::{free_spans, merge_overlapping, subtract_intervals};
pub use conflict::first_conflict;
pub use error::{EngineError, ErrorKind};
pub use queries::ReservationRepository;

use std::collections::HashMap;
use std::io;
use std::ops::{Deref, DerefMut};
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{
    mpsc, oneshot, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock,
};
use ulid::Ulid;

use crate::clock::{Clock, SystemClock};
use crate::config::EngineConfig;
use crate::model::*;
use crate::notify::NotifyHub;
use crate::observability;
use crate::wal::Wal;

pub type SharedCarState = Arc<RwLock<CarState>>;

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit.
/// 1. Block until the first Append arrives.
/// 2. Buffer it (no fsync).
/// 3. Drain all immediately available Appends (the batch window).
/// 4. Single flush_sync for the whole batch.
/// 5. Respond to all senders.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;

                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => {
                            batch.push((event, response));
                        }
                        Ok(other) => {
                            // Non-append commands run after the batch they interrupted.
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }

                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush of {} events failed: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let mut append_err: Option<io::Error> = None;
    for (event, _) in batch {
        if let Err(e) = wal.append_buffered(event) {
            append_err = Some(e);
            break;
        }
    }
    let result = match append_err {
        Some(e) => Err(e),
        None => wal.flush_sync(),
    };
    // Every caller hears Err, so nothing of the batch may survive on disk.
    if result.is_err() {
        if let Err(e) = wal.rollback() {
            tracing::error!("WAL rollback after failed batch failed: {e}");
        }
    }
    result
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            if let Err(e) = &result {
                tracing::error!("WAL compaction failed: {e}");
            }
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the caller"),
    }
}

// ── Engine ───────────────────────────────────────────────

pub struct Engine {
    pub(super) cars: DashMap<CarId, SharedCarState>,
    pub(super) wal_tx: mpsc::Sender<WalCommand>,
    pub notify: Arc<NotifyHub>,
    /// Reverse lookup: reservation/window id → car id
    pub(super) entity_to_car: DashMap<Ulid, CarId>,
    /// Mutations hold this shared; compaction holds it exclusively so no
    /// append can slip between the snapshot and the file swap.
    pub(super) compaction_gate: Arc<RwLock<()>>,
    pub(super) config: EngineConfig,
    pub(super) clock: Arc<dyn Clock>,
}

/// Exclusive access to one car for the duration of a check-and-write.
pub(super) struct CarGuard {
    _gate: OwnedRwLockReadGuard<()>,
    car: OwnedRwLockWriteGuard<CarState>,
}

impl Deref for CarGuard {
    type Target = CarState;

    fn deref(&self) -> &CarState {
        &self.car
    }
}

impl DerefMut for CarGuard {
    fn deref_mut(&mut self) -> &mut CarState {
        &mut self.car
    }
}

/// Apply an event directly to a CarState (caller holds the lock).
fn apply_to_car(cs: &mut CarState, event: &Event, entity_map: &DashMap<Ulid, CarId>) {
    match event {
        Event::CarUpdated { attributes, .. } => {
            cs.attributes = attributes.clone();
        }
        Event::CarRemoved { .. } => {
            for interval in cs.intervals.drain(..) {
                entity_map.remove(&interval.id);
            }
            cs.retired = true;
        }
        Event::ReservationCreated {
            id,
            car_id,
            span,
            owner_id,
        } => {
            cs.insert_interval(Interval {
                id: *id,
                span: *span,
                kind: IntervalKind::Reservation {
                    owner_id: *owner_id,
                },
            });
            entity_map.insert(*id, *car_id);
        }
        Event::WindowAdded { id, car_id, span } => {
            cs.insert_interval(Interval {
                id: *id,
                span: *span,
                kind: IntervalKind::Window,
            });
            entity_map.insert(*id, *car_id);
        }
        Event::ReservationRescheduled { id, span, .. } | Event::WindowUpdated { id, span, .. } => {
            if let Some(mut interval) = cs.remove_interval(*id) {
                interval.span = *span;
                cs.insert_interval(interval);
            }
        }
        Event::ReservationCancelled { id, .. } | Event::WindowRemoved { id, .. } => {
            cs.remove_interval(*id);
            entity_map.remove(id);
        }
        // Registration is handled at the map level, not here.
        Event::CarRegistered { .. } => {}
    }
}

/// A journaled booking that would overlap one already replayed.
fn replay_conflict(cs: &CarState, event: &Event) -> Option<Ulid> {
    let (id, span) = match event {
        Event::ReservationCreated { id, span, .. } | Event::ReservationRescheduled { id, span, .. } => {
            (*id, span)
        }
        _ => return None,
    };
    first_conflict(cs, span, Some(id)).map(|blocking| blocking.id)
}

impl Engine {
    pub fn new(wal_path: PathBuf, notify: Arc<NotifyHub>, config: EngineConfig) -> io::Result<Self> {
        Self::with_clock(wal_path, notify, config, Arc::new(SystemClock))
    }

    /// Replay the journal at `wal_path` and start the group-commit writer.
    /// Must be called inside a tokio runtime.
    pub fn with_clock(
        wal_path: PathBuf,
        notify: Arc<NotifyHub>,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
    ) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let entity_to_car = DashMap::new();
        let mut replayed: HashMap<CarId, CarState> = HashMap::new();
        for event in &events {
            match event {
                Event::CarRegistered {
                    id,
                    owner_id,
                    attributes,
                } => {
                    replayed.insert(*id, CarState::new(*id, *owner_id, attributes.clone()));
                }
                Event::CarRemoved { id } => {
                    if let Some(mut cs) = replayed.remove(id) {
                        apply_to_car(&mut cs, event, &entity_to_car);
                    }
                }
                other => {
                    if let Some(cs) = replayed.get_mut(&other.car_id()) {
                        if let Some(blocking) = replay_conflict(cs, other) {
                            tracing::warn!(
                                car_id = cs.id,
                                %blocking,
                                "skipping journaled booking that overlaps an earlier one: {other:?}"
                            );
                            continue;
                        }
                        apply_to_car(cs, other, &entity_to_car);
                    }
                }
            }
        }

        let cars = DashMap::with_capacity(replayed.len());
        for (id, cs) in replayed {
            cars.insert(id, Arc::new(RwLock::new(cs)));
        }
        metrics::gauge!(observability::CARS_ACTIVE).set(cars.len() as f64);
        tracing::info!(
            "replayed {} events: {} cars, {} reservations/windows",
            events.len(),
            cars.len(),
            entity_to_car.len()
        );

        Ok(Self {
            cars,
            wal_tx,
            notify,
            entity_to_car,
            compaction_gate: Arc::new(RwLock::new(())),
            config,
            clock,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    pub(super) async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    pub(super) fn car_handle(&self, id: &CarId) -> Option<SharedCarState> {
        self.cars.get(id).map(|e| e.value().clone())
    }

    pub fn car_for_entity(&self, entity_id: &Ulid) -> Option<CarId> {
        self.entity_to_car.get(entity_id).map(|e| *e.value())
    }

    pub fn car_count(&self) -> usize {
        self.cars.len()
    }

    pub(super) fn now(&self) -> Ms {
        self.clock.now_ms()
    }

    /// WAL-append + apply + notify in one call.
    pub(super) async fn persist_and_apply(
        &self,
        cs: &mut CarState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        apply_to_car(cs, event, &self.entity_to_car);
        self.notify.send(cs.id, event);
        Ok(())
    }

    /// Take the compaction gate (shared), waiting at most `lock_timeout`.
    pub(super) async fn enter_gate(&self, car_id: CarId) -> Result<OwnedRwLockReadGuard<()>, EngineError> {
        tokio::time::timeout(
            self.config.lock_timeout,
            self.compaction_gate.clone().read_owned(),
        )
        .await
        .map_err(|_| busy(car_id))
    }

    /// Serialize on one car: gate + write lock, bounded by `lock_timeout`.
    /// A car removed while we queued reads as not found.
    pub(super) async fn lock_car(&self, car_id: CarId) -> Result<CarGuard, EngineError> {
        let rs = self
            .car_handle(&car_id)
            .ok_or(EngineError::CarNotFound(car_id))?;
        let gate = self.compaction_gate.clone();
        let (gate, car) = tokio::time::timeout(self.config.lock_timeout, async move {
            let gate = gate.read_owned().await;
            let car = rs.write_owned().await;
            (gate, car)
        })
        .await
        .map_err(|_| busy(car_id))?;
        if car.retired {
            return Err(EngineError::CarNotFound(car_id));
        }
        Ok(CarGuard { _gate: gate, car })
    }

    /// Resolve a reservation/window id to its car and lock that car. The
    /// entity is re-checked under the lock since it may have gone meanwhile.
    pub(super) async fn lock_entity(
        &self,
        entity_id: Ulid,
        not_found: fn(Ulid) -> EngineError,
    ) -> Result<CarGuard, EngineError> {
        let car_id = self
            .car_for_entity(&entity_id)
            .ok_or_else(|| not_found(entity_id))?;
        let guard = match self.lock_car(car_id).await {
            Err(EngineError::CarNotFound(_)) => return Err(not_found(entity_id)),
            other => other?,
        };
        if guard.interval(entity_id).is_none() {
            return Err(not_found(entity_id));
        }
        Ok(guard)
    }

    /// Shared read access to one car, for queries.
    pub(super) async fn read_car(
        &self,
        car_id: CarId,
    ) -> Result<OwnedRwLockReadGuard<CarState>, EngineError> {
        let rs = self
            .car_handle(&car_id)
            .ok_or(EngineError::CarNotFound(car_id))?;
        let guard = rs.read_owned().await;
        if guard.retired {
            return Err(EngineError::CarNotFound(car_id));
        }
        Ok(guard)
    }

    /// Handles to every car, taken without holding map shards across awaits.
    pub(super) fn car_handles(&self) -> Vec<SharedCarState> {
        self.cars.iter().map(|e| e.value().clone()).collect()
    }
}

fn busy(car_id: CarId) -> EngineError {
    tracing::warn!(car_id, "lock wait timed out");
    EngineError::Busy(car_id)
}
