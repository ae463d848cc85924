mod availability;
mod conflict;
mod error;
mod fleet;
mod ledger;
mod reports;
mod reservations;
mod store;

pub use availability::{merge_overlapping, subtract_intervals};
pub use conflict::conflicting_reservations;
pub use error::EngineError;
pub use ledger::recompute_last_service_date;
pub use reservations::EDIT_LOCK_HOURS;
pub use store::{FleetStore, SharedVehicleState};

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use mockable::Clock;
use tokio::sync::{Mutex, OwnedRwLockWriteGuard, RwLock, mpsc, oneshot};
use tracing::{error, info, warn};
use ulid::Ulid;

use crate::identity::{Caller, RoleKind};
use crate::model::*;
use crate::observability;
use crate::wal::Wal;

pub type SharedClock = Arc<dyn Clock + Send + Sync>;

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

/// Background task that owns the WAL and batches appends for group commit:
/// take the first append, drain whatever else is already queued, fsync once,
/// then answer every sender with the shared result.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = Vec::new();
                while let Ok(next) = rx.try_recv() {
                    match next {
                        WalCommand::Append { event, response } => batch.push((event, response)),
                        other => {
                            deferred.push(other);
                            break;
                        }
                    }
                }

                let started = Instant::now();
                let mut failed: Option<io::ErrorKind> = None;
                let mut responders = Vec::with_capacity(batch.len());
                for (event, response) in batch {
                    if failed.is_none()
                        && let Err(e) = wal.append_buffered(&event)
                    {
                        failed = Some(e.kind());
                    }
                    responders.push(response);
                }
                if failed.is_none()
                    && let Err(e) = wal.flush_sync()
                {
                    failed = Some(e.kind());
                }
                metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
                    .record(started.elapsed().as_secs_f64());
                metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE)
                    .record(responders.len() as f64);

                if let Some(kind) = failed {
                    warn!(path = %wal.path().display(), "WAL batch failed: {kind}");
                    roll_back(&mut wal);
                }
                for response in responders {
                    let result = match failed {
                        None => Ok(()),
                        Some(kind) => Err(io::Error::new(kind, "WAL append failed")),
                    };
                    let _ = response.send(result);
                }
                for cmd in deferred {
                    handle_control(&mut wal, cmd);
                }
            }
            other => handle_control(&mut wal, other),
        }
    }
}

fn handle_control(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let _ = response.send(wal.compact(&events));
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { event, response } => {
            let result = wal.append_buffered(&event).and_then(|()| wal.flush_sync());
            if result.is_err() {
                roll_back(wal);
            }
            let _ = response.send(result);
        }
    }
}

/// Drop everything written since the last successful sync.
fn roll_back(wal: &mut Wal) {
    if let Err(e) = wal.rollback() {
        error!(path = %wal.path().display(), "WAL rollback failed: {e}");
    }
}

/// The reservation scheduling and authorization engine together with the
/// record store it is the sole writer of.
pub struct Engine {
    store: FleetStore,
    wal_tx: mpsc::Sender<WalCommand>,
    clock: SharedClock,
    /// Mutations hold this shared; compaction holds it exclusively so the
    /// snapshot it writes cannot miss a concurrent append.
    write_gate: RwLock<()>,
    /// Serializes catalog writes guarded by uniqueness rules.
    catalog_lock: Mutex<()>,
}

impl Engine {
    /// Open the engine over the WAL at `wal_path`, replaying it into memory.
    /// Must be called inside a tokio runtime (spawns the WAL writer).
    pub fn new(wal_path: PathBuf, clock: SharedClock) -> io::Result<Self> {
        let replay = Wal::replay(&wal_path)?;
        if replay.discarded_tail {
            warn!(
                path = %wal_path.display(),
                valid_len = replay.valid_len,
                "discarded damaged WAL tail during replay"
            );
            Wal::truncate(&wal_path, replay.valid_len)?;
        }
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = FleetStore::new();
        // Replay into plain maps first; nothing else can observe the store yet.
        let mut vehicles: HashMap<Ulid, VehicleState> = HashMap::new();
        for event in &replay.events {
            match event {
                Event::VehicleSaved { vehicle } if !vehicles.contains_key(&vehicle.id) => {
                    vehicles.insert(vehicle.id, VehicleState::new(vehicle.clone()));
                }
                other => match other.vehicle_id() {
                    Some(vehicle_id) => {
                        if let Some(vs) = vehicles.get_mut(&vehicle_id) {
                            store.apply_vehicle_event(vs, other);
                        }
                    }
                    None => store.apply_catalog_event(other),
                },
            }
        }
        for (_, state) in vehicles {
            store.insert_vehicle(state);
        }
        metrics::gauge!(observability::VEHICLES_TRACKED).set(store.vehicle_count() as f64);
        info!(
            events = replay.events.len(),
            vehicles = store.vehicle_count(),
            users = store.user_count(),
            "fleet store loaded"
        );

        Ok(Self {
            store,
            wal_tx,
            clock,
            write_gate: RwLock::new(()),
            catalog_lock: Mutex::new(()),
        })
    }

    pub fn store(&self) -> &FleetStore {
        &self.store
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.utc()
    }

    /// Resolve a stored user into a caller identity. The role name is
    /// mapped to a [`RoleKind`] here and nowhere else.
    pub fn resolve_caller(&self, user_id: Ulid) -> Result<Caller, EngineError> {
        let user = self
            .store
            .user(&user_id)
            .ok_or(EngineError::not_found("user", user_id))?;
        let role = self
            .store
            .role(&user.role_id)
            .map_or(RoleKind::Member, |r| RoleKind::from_role_name(&r.name));
        Ok(Caller {
            user_id,
            role,
            active: user.active,
        })
    }

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()))
    }

    /// WAL-append then apply to the locked vehicle. Memory is untouched if
    /// the append fails.
    pub(super) async fn persist_and_apply(
        &self,
        vs: &mut VehicleState,
        event: &Event,
    ) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_vehicle_event(vs, event);
        Ok(())
    }

    /// WAL-append then apply a user/role event.
    pub(super) async fn persist_catalog(&self, event: &Event) -> Result<(), EngineError> {
        self.wal_append(event).await?;
        self.store.apply_catalog_event(event);
        Ok(())
    }

    /// Look up a vehicle and take its write lock.
    pub(super) async fn vehicle_write(
        &self,
        vehicle_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VehicleState>, EngineError> {
        let shared = self
            .store
            .vehicle(vehicle_id)
            .ok_or(EngineError::not_found("vehicle", *vehicle_id))?;
        Ok(shared.write_owned().await)
    }

    /// Lookup owned entity → vehicle, acquire the vehicle's write lock.
    pub(super) async fn resolve_entity_write(
        &self,
        entity: &'static str,
        entity_id: &Ulid,
    ) -> Result<OwnedRwLockWriteGuard<VehicleState>, EngineError> {
        let vehicle_id = self
            .store
            .vehicle_for_entity(entity_id)
            .ok_or(EngineError::not_found(entity, *entity_id))?;
        self.vehicle_write(&vehicle_id).await
    }

    /// Rewrite the WAL with one upsert event per live entity.
    pub async fn compact_wal(&self) -> Result<(), EngineError> {
        let _gate = self.write_gate.write().await;

        let mut events = Vec::new();
        for role in self.store.roles() {
            events.push(Event::RoleSaved { role });
        }
        for user in self.store.users() {
            events.push(Event::UserSaved { user });
        }
        for shared in self.store.all_vehicles() {
            let vs = shared.read().await;
            events.push(Event::VehicleSaved {
                vehicle: vs.vehicle.clone(),
            });
            for reservation in &vs.reservations {
                events.push(Event::ReservationSaved {
                    reservation: reservation.clone(),
                });
            }
            for record in &vs.service_records {
                events.push(Event::ServiceRecordSaved {
                    record: record.clone(),
                });
            }
            for record in &vs.damage_records {
                events.push(Event::DamageRecordSaved {
                    record: record.clone(),
                });
            }
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::Store("WAL writer shut down".into()))?;
        let result = rx
            .await
            .map_err(|_| EngineError::Store("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::Store(e.to_string()));
        let outcome = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::WAL_COMPACTIONS_TOTAL, "outcome" => outcome).increment(1);
        if result.is_ok() {
            info!(events = count, "WAL compacted");
        }
        result
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
