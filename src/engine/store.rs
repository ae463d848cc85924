use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::RwLock;
use ulid::Ulid;

use crate::model::*;

use super::ledger::recompute_last_service_date;

pub type SharedVehicleState = Arc<RwLock<VehicleState>>;

/// In-memory record store. Vehicles own their reservations and ledger
/// entries; users and roles are flat catalogs.
pub struct FleetStore {
    vehicles: DashMap<Ulid, SharedVehicleState>,
    users: DashMap<Ulid, User>,
    roles: DashMap<Ulid, Role>,
    /// Reverse lookup: reservation / ledger record id → vehicle id
    entity_to_vehicle: DashMap<Ulid, Ulid>,
}

impl Default for FleetStore {
    fn default() -> Self {
        Self::new()
    }
}

impl FleetStore {
    pub fn new() -> Self {
        Self {
            vehicles: DashMap::new(),
            users: DashMap::new(),
            roles: DashMap::new(),
            entity_to_vehicle: DashMap::new(),
        }
    }

    // ── Vehicles ─────────────────────────────────────────────

    pub fn vehicle_count(&self) -> usize {
        self.vehicles.len()
    }

    pub fn vehicle(&self, id: &Ulid) -> Option<SharedVehicleState> {
        self.vehicles.get(id).map(|e| e.value().clone())
    }

    pub fn insert_vehicle(&self, state: VehicleState) -> SharedVehicleState {
        let id = state.vehicle.id;
        for r in &state.reservations {
            self.map_entity(r.id, id);
        }
        for r in &state.service_records {
            self.map_entity(r.id, id);
        }
        for r in &state.damage_records {
            self.map_entity(r.id, id);
        }
        let shared = Arc::new(RwLock::new(state));
        self.vehicles.insert(id, shared.clone());
        shared
    }

    /// All vehicle handles, sorted by id for a stable lock and report order.
    pub fn all_vehicles(&self) -> Vec<SharedVehicleState> {
        let mut entries: Vec<(Ulid, SharedVehicleState)> = self
            .vehicles
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();
        entries.sort_by_key(|(id, _)| *id);
        entries.into_iter().map(|(_, v)| v).collect()
    }

    // ── Users and roles ──────────────────────────────────────

    pub fn user(&self, id: &Ulid) -> Option<User> {
        self.users.get(id).map(|e| e.value().clone())
    }

    pub fn users(&self) -> Vec<User> {
        let mut users: Vec<User> = self.users.iter().map(|e| e.value().clone()).collect();
        users.sort_by_key(|u| u.id);
        users
    }

    pub fn user_count(&self) -> usize {
        self.users.len()
    }

    pub fn role(&self, id: &Ulid) -> Option<Role> {
        self.roles.get(id).map(|e| e.value().clone())
    }

    pub fn roles(&self) -> Vec<Role> {
        let mut roles: Vec<Role> = self.roles.iter().map(|e| e.value().clone()).collect();
        roles.sort_by_key(|r| r.id);
        roles
    }

    pub fn role_by_name(&self, name: &str) -> Option<Role> {
        self.roles
            .iter()
            .find(|e| e.value().name == name)
            .map(|e| e.value().clone())
    }

    // ── Entity index ─────────────────────────────────────────

    pub fn vehicle_for_entity(&self, entity_id: &Ulid) -> Option<Ulid> {
        self.entity_to_vehicle.get(entity_id).map(|e| *e.value())
    }

    pub fn map_entity(&self, entity_id: Ulid, vehicle_id: Ulid) {
        self.entity_to_vehicle.insert(entity_id, vehicle_id);
    }

    pub fn unmap_entity(&self, entity_id: &Ulid) {
        self.entity_to_vehicle.remove(entity_id);
    }

    // ── Event application ────────────────────────────────────

    /// Apply a catalog event (users, roles). Vehicle-scoped events are ignored.
    pub fn apply_catalog_event(&self, event: &Event) {
        match event {
            Event::RoleSaved { role } => {
                self.roles.insert(role.id, role.clone());
            }
            Event::RoleDeleted { id } => {
                self.roles.remove(id);
            }
            Event::UserSaved { user } => {
                self.users.insert(user.id, user.clone());
            }
            _ => {}
        }
    }

    /// Apply a vehicle-scoped event to its state (caller holds the lock).
    pub fn apply_vehicle_event(&self, vs: &mut VehicleState, event: &Event) {
        match event {
            Event::VehicleSaved { vehicle } => {
                // The derived field is owned by the ledger, not the editor.
                let last_service_date = vs.vehicle.last_service_date;
                vs.vehicle = vehicle.clone();
                vs.vehicle.last_service_date = last_service_date;
            }
            Event::ReservationSaved { reservation } => {
                vs.upsert_reservation(reservation.clone());
                self.map_entity(reservation.id, vs.vehicle.id);
            }
            Event::ServiceRecordSaved { record } => {
                vs.upsert_service_record(record.clone());
                self.map_entity(record.id, vs.vehicle.id);
                recompute_last_service_date(vs);
            }
            Event::ServiceRecordDeleted { id, .. } => {
                vs.remove_service_record(*id);
                self.unmap_entity(id);
                recompute_last_service_date(vs);
            }
            Event::DamageRecordSaved { record } => {
                vs.upsert_damage_record(record.clone());
                self.map_entity(record.id, vs.vehicle.id);
            }
            Event::DamageRecordDeleted { id, .. } => {
                vs.remove_damage_record(*id);
                self.unmap_entity(id);
            }
            Event::RoleSaved { .. } | Event::RoleDeleted { .. } | Event::UserSaved { .. } => {}
        }
    }
}
