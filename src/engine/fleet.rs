use std::time::Instant;

use tracing::info;
use ulid::Ulid;

use crate::identity::{ADMINISTRATOR_ROLE, Caller};
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

fn validate_seats(seats: u32) -> Result<u32, EngineError> {
    if seats == 0 {
        return Err(EngineError::validation("seating capacity must be at least 1"));
    }
    Ok(seats)
}

fn validate_email(email: &str) -> Result<String, EngineError> {
    let email = required_text("email", email, MAX_TEXT_LEN)?;
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(email),
        _ => Err(EngineError::validation("email address is malformed")),
    }
}

impl Engine {
    // ── Vehicles ─────────────────────────────────────────────

    /// Whether another vehicle already carries `plate` (case-insensitive).
    /// Callers hold the catalog lock and no vehicle lock.
    async fn plate_taken(&self, plate: &str, except: Option<Ulid>) -> bool {
        for shared in self.store().all_vehicles() {
            let vs = shared.read().await;
            if Some(vs.vehicle.id) != except && vs.vehicle.license_plate.eq_ignore_ascii_case(plate) {
                return true;
            }
        }
        false
    }

    pub async fn create_vehicle(
        &self,
        caller: &Caller,
        request: NewVehicle,
    ) -> Result<Vehicle, EngineError> {
        let started = Instant::now();
        let result: Result<Vehicle, EngineError> = async {
            caller.ensure_admin()?;
            let status = request.status.unwrap_or(VehicleStatus::Active);
            if status == VehicleStatus::Archived {
                return Err(EngineError::validation("new vehicles cannot be archived"));
            }
            let now = self.now();
            let vehicle = Vehicle {
                id: Ulid::new(),
                make: required_text("make", &request.make, MAX_TEXT_LEN)?,
                model: required_text("model", &request.model, MAX_TEXT_LEN)?,
                license_plate: required_text("license plate", &request.license_plate, MAX_TEXT_LEN)?,
                color: optional_text("color", request.color, MAX_TEXT_LEN)?,
                fuel_type: request.fuel_type,
                seating_capacity: validate_seats(request.seating_capacity)?,
                transmission: request.transmission,
                status,
                description: optional_text("description", request.description, MAX_NOTES_LEN)?,
                odometer: request.odometer,
                last_service_date: None,
                next_service_date: request.next_service_date,
                technical_inspection_expiry: request.technical_inspection_expiry,
                highway_vignette_expiry: request.highway_vignette_expiry,
                emission_control_expiry: request.emission_control_expiry,
                notes: optional_text("notes", request.notes, MAX_NOTES_LEN)?,
                archived: false,
                created_at: now,
                updated_at: now,
            };

            let _gate = self.write_gate.read().await;
            let _catalog = self.catalog_lock.lock().await;
            if self.plate_taken(&vehicle.license_plate, None).await {
                return Err(EngineError::validation(format!(
                    "license plate {} is already registered",
                    vehicle.license_plate
                )));
            }
            self.wal_append(&Event::VehicleSaved {
                vehicle: vehicle.clone(),
            })
            .await?;
            self.store().insert_vehicle(VehicleState::new(vehicle.clone()));
            metrics::gauge!(observability::VEHICLES_TRACKED).set(self.store().vehicle_count() as f64);
            info!(vehicle = %vehicle.id, plate = %vehicle.license_plate, "vehicle created");
            Ok(vehicle)
        }
        .await;
        observability::record_operation("create_vehicle", started, &result);
        result
    }

    pub async fn update_vehicle(
        &self,
        caller: &Caller,
        id: Ulid,
        patch: VehiclePatch,
    ) -> Result<Vehicle, EngineError> {
        let started = Instant::now();
        let result: Result<Vehicle, EngineError> = async {
            caller.ensure_admin()?;
            if patch.status == Some(VehicleStatus::Archived) {
                return Err(EngineError::validation("use archive to archive a vehicle"));
            }
            let plate = patch
                .license_plate
                .as_deref()
                .map(|p| required_text("license plate", p, MAX_TEXT_LEN))
                .transpose()?;

            let _gate = self.write_gate.read().await;
            let _catalog = self.catalog_lock.lock().await;
            if let Some(plate) = &plate
                && self.plate_taken(plate, Some(id)).await
            {
                return Err(EngineError::validation(format!(
                    "license plate {plate} is already registered"
                )));
            }

            let mut guard = self.vehicle_write(&id).await?;
            let mut vehicle = guard.vehicle.clone();
            if let Some(status) = patch.status {
                if vehicle.archived {
                    return Err(EngineError::validation(
                        "unarchive the vehicle before changing its status",
                    ));
                }
                vehicle.status = status;
            }
            if let Some(plate) = plate {
                vehicle.license_plate = plate;
            }
            if let Some(make) = patch.make {
                vehicle.make = required_text("make", &make, MAX_TEXT_LEN)?;
            }
            if let Some(model) = patch.model {
                vehicle.model = required_text("model", &model, MAX_TEXT_LEN)?;
            }
            if patch.color.is_some() {
                vehicle.color = optional_text("color", patch.color, MAX_TEXT_LEN)?;
            }
            if let Some(fuel) = patch.fuel_type {
                vehicle.fuel_type = fuel;
            }
            if let Some(seats) = patch.seating_capacity {
                vehicle.seating_capacity = validate_seats(seats)?;
            }
            if let Some(transmission) = patch.transmission {
                vehicle.transmission = transmission;
            }
            if patch.description.is_some() {
                vehicle.description = optional_text("description", patch.description, MAX_NOTES_LEN)?;
            }
            if patch.odometer.is_some() {
                vehicle.odometer = patch.odometer;
            }
            if patch.notes.is_some() {
                vehicle.notes = optional_text("notes", patch.notes, MAX_NOTES_LEN)?;
            }
            vehicle.next_service_date = patch.next_service_date.or(vehicle.next_service_date);
            vehicle.technical_inspection_expiry = patch
                .technical_inspection_expiry
                .or(vehicle.technical_inspection_expiry);
            vehicle.highway_vignette_expiry =
                patch.highway_vignette_expiry.or(vehicle.highway_vignette_expiry);
            vehicle.emission_control_expiry =
                patch.emission_control_expiry.or(vehicle.emission_control_expiry);
            vehicle.updated_at = self.now();

            let event = Event::VehicleSaved {
                vehicle: vehicle.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            info!(vehicle = %id, status = ?guard.vehicle.status, "vehicle updated");
            Ok(guard.vehicle.clone())
        }
        .await;
        observability::record_operation("update_vehicle", started, &result);
        result
    }

    pub async fn archive_vehicle(&self, caller: &Caller, id: Ulid) -> Result<Vehicle, EngineError> {
        self.set_archived(caller, id, true).await
    }

    pub async fn unarchive_vehicle(&self, caller: &Caller, id: Ulid) -> Result<Vehicle, EngineError> {
        self.set_archived(caller, id, false).await
    }

    /// Archiving forces status `Archived`; unarchiving restores `Active`.
    async fn set_archived(
        &self,
        caller: &Caller,
        id: Ulid,
        archived: bool,
    ) -> Result<Vehicle, EngineError> {
        caller.ensure_admin()?;
        let _gate = self.write_gate.read().await;
        let mut guard = self.vehicle_write(&id).await?;
        if guard.vehicle.archived == archived {
            return Ok(guard.vehicle.clone());
        }
        let mut vehicle = guard.vehicle.clone();
        vehicle.archived = archived;
        vehicle.status = if archived {
            VehicleStatus::Archived
        } else {
            VehicleStatus::Active
        };
        vehicle.updated_at = self.now();
        let event = Event::VehicleSaved { vehicle };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(vehicle = %id, archived, "vehicle archive flag changed");
        Ok(guard.vehicle.clone())
    }

    pub async fn get_vehicle(&self, caller: &Caller, id: Ulid) -> Result<Vehicle, EngineError> {
        caller.ensure_active()?;
        let shared = self
            .store()
            .vehicle(&id)
            .ok_or(EngineError::not_found("vehicle", id))?;
        let vehicle = shared.read().await.vehicle.clone();
        Ok(vehicle)
    }

    /// Vehicles ordered by make, model and plate. Archived ones only when
    /// `filter.include_archived` is set.
    pub async fn list_vehicles(
        &self,
        caller: &Caller,
        filter: VehicleFilter,
    ) -> Result<Vec<Vehicle>, EngineError> {
        caller.ensure_active()?;
        let mut out = Vec::new();
        for shared in self.store().all_vehicles() {
            let guard = shared.read().await;
            let vehicle = &guard.vehicle;
            if vehicle.archived && !filter.include_archived {
                continue;
            }
            if filter.status.is_some_and(|s| vehicle.status != s) {
                continue;
            }
            out.push(vehicle.clone());
        }
        out.sort_by(|a, b| {
            (&a.make, &a.model, &a.license_plate).cmp(&(&b.make, &b.model, &b.license_plate))
        });
        Ok(out)
    }

    // ── Users ────────────────────────────────────────────────

    /// Reject a username, email or corporate id held by another user.
    fn check_user_unique(
        &self,
        username: &str,
        email: &str,
        corporate_id: Option<&str>,
        except: Option<Ulid>,
    ) -> Result<(), EngineError> {
        for user in self.store().users() {
            if Some(user.id) == except {
                continue;
            }
            if user.username == username {
                return Err(EngineError::validation(format!("username {username} is taken")));
            }
            if user.email.eq_ignore_ascii_case(email) {
                return Err(EngineError::validation(format!("email {email} is taken")));
            }
            if let Some(cid) = corporate_id
                && user.corporate_id.as_deref() == Some(cid)
            {
                return Err(EngineError::validation(format!("corporate id {cid} is taken")));
            }
        }
        Ok(())
    }

    fn ensure_role_exists(&self, role_id: Ulid) -> Result<(), EngineError> {
        if self.store().role(&role_id).is_none() {
            return Err(EngineError::validation(format!("role {role_id} does not exist")));
        }
        Ok(())
    }

    pub async fn create_user(&self, caller: &Caller, request: NewUser) -> Result<User, EngineError> {
        let started = Instant::now();
        let result: Result<User, EngineError> = async {
            caller.ensure_admin()?;
            let now = self.now();
            let user = User {
                id: Ulid::new(),
                username: required_text("username", &request.username, MAX_TEXT_LEN)?,
                email: validate_email(&request.email)?,
                full_name: required_text("full name", &request.full_name, MAX_TEXT_LEN)?,
                corporate_id: optional_text("corporate id", request.corporate_id, MAX_TEXT_LEN)?,
                department: optional_text("department", request.department, MAX_TEXT_LEN)?,
                phone: optional_text("phone", request.phone, MAX_TEXT_LEN)?,
                active: request.active,
                role_id: request.role_id,
                created_at: now,
                updated_at: now,
            };

            let _gate = self.write_gate.read().await;
            let _catalog = self.catalog_lock.lock().await;
            self.ensure_role_exists(user.role_id)?;
            self.check_user_unique(&user.username, &user.email, user.corporate_id.as_deref(), None)?;
            self.persist_catalog(&Event::UserSaved { user: user.clone() })
                .await?;
            info!(user = %user.id, username = %user.username, "user created");
            Ok(user)
        }
        .await;
        observability::record_operation("create_user", started, &result);
        result
    }

    /// Administrators may change every field; a user may change only their
    /// own department and phone, other fields are ignored.
    pub async fn update_user(
        &self,
        caller: &Caller,
        id: Ulid,
        patch: UserPatch,
    ) -> Result<User, EngineError> {
        let started = Instant::now();
        let result: Result<User, EngineError> = async {
            caller.ensure_active()?;
            if !caller.is_admin() && caller.user_id != id {
                return Err(EngineError::Forbidden("cannot edit another user's profile"));
            }
            let _gate = self.write_gate.read().await;
            let _catalog = self.catalog_lock.lock().await;
            let mut user = self
                .store()
                .user(&id)
                .ok_or(EngineError::not_found("user", id))?;

            if patch.department.is_some() {
                user.department = optional_text("department", patch.department, MAX_TEXT_LEN)?;
            }
            if patch.phone.is_some() {
                user.phone = optional_text("phone", patch.phone, MAX_TEXT_LEN)?;
            }
            if caller.is_admin() {
                if let Some(username) = patch.username {
                    user.username = required_text("username", &username, MAX_TEXT_LEN)?;
                }
                if let Some(email) = patch.email {
                    user.email = validate_email(&email)?;
                }
                if let Some(full_name) = patch.full_name {
                    user.full_name = required_text("full name", &full_name, MAX_TEXT_LEN)?;
                }
                if patch.corporate_id.is_some() {
                    user.corporate_id =
                        optional_text("corporate id", patch.corporate_id, MAX_TEXT_LEN)?;
                }
                if let Some(role_id) = patch.role_id {
                    self.ensure_role_exists(role_id)?;
                    user.role_id = role_id;
                }
                if let Some(active) = patch.active {
                    user.active = active;
                }
                self.check_user_unique(
                    &user.username,
                    &user.email,
                    user.corporate_id.as_deref(),
                    Some(id),
                )?;
            }
            user.updated_at = self.now();
            self.persist_catalog(&Event::UserSaved { user: user.clone() })
                .await?;
            info!(user = %id, "user updated");
            Ok(user)
        }
        .await;
        observability::record_operation("update_user", started, &result);
        result
    }

    pub async fn activate_user(&self, caller: &Caller, id: Ulid) -> Result<User, EngineError> {
        self.set_user_active(caller, id, true).await
    }

    pub async fn deactivate_user(&self, caller: &Caller, id: Ulid) -> Result<User, EngineError> {
        self.set_user_active(caller, id, false).await
    }

    async fn set_user_active(
        &self,
        caller: &Caller,
        id: Ulid,
        active: bool,
    ) -> Result<User, EngineError> {
        caller.ensure_admin()?;
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        let mut user = self
            .store()
            .user(&id)
            .ok_or(EngineError::not_found("user", id))?;
        if user.active == active {
            return Ok(user);
        }
        user.active = active;
        user.updated_at = self.now();
        self.persist_catalog(&Event::UserSaved { user: user.clone() })
            .await?;
        info!(user = %id, active, "user activation changed");
        Ok(user)
    }

    pub fn get_user(&self, caller: &Caller, id: Ulid) -> Result<User, EngineError> {
        caller.ensure_active()?;
        if !caller.is_admin() && caller.user_id != id {
            return Err(EngineError::Forbidden("cannot view another user's profile"));
        }
        self.store()
            .user(&id)
            .ok_or(EngineError::not_found("user", id))
    }

    /// Users ordered by username, optionally only active or inactive ones.
    pub fn list_users(&self, caller: &Caller, active: Option<bool>) -> Result<Vec<User>, EngineError> {
        caller.ensure_admin()?;
        let mut users: Vec<User> = self
            .store()
            .users()
            .into_iter()
            .filter(|u| active.is_none_or(|a| u.active == a))
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        Ok(users)
    }

    // ── Roles ────────────────────────────────────────────────

    fn check_role_name_free(&self, name: &str, except: Option<Ulid>) -> Result<(), EngineError> {
        match self.store().role_by_name(name) {
            Some(existing) if Some(existing.id) != except => Err(EngineError::validation(
                format!("role {name} already exists"),
            )),
            _ => Ok(()),
        }
    }

    pub async fn create_role(
        &self,
        caller: &Caller,
        name: &str,
        description: Option<String>,
    ) -> Result<Role, EngineError> {
        caller.ensure_admin()?;
        let role = Role {
            id: Ulid::new(),
            name: required_text("role name", name, MAX_TEXT_LEN)?,
            description: optional_text("description", description, MAX_NOTES_LEN)?,
            created_at: self.now(),
        };
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        self.check_role_name_free(&role.name, None)?;
        self.persist_catalog(&Event::RoleSaved { role: role.clone() })
            .await?;
        info!(role = %role.id, name = %role.name, "role created");
        Ok(role)
    }

    /// Rename or re-describe a role. The administrator role keeps its name,
    /// since the name is what grants the privilege.
    pub async fn update_role(
        &self,
        caller: &Caller,
        id: Ulid,
        name: Option<String>,
        description: Option<String>,
    ) -> Result<Role, EngineError> {
        caller.ensure_admin()?;
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        let mut role = self
            .store()
            .role(&id)
            .ok_or(EngineError::not_found("role", id))?;
        if let Some(name) = name {
            let name = required_text("role name", &name, MAX_TEXT_LEN)?;
            if role.name == ADMINISTRATOR_ROLE && name != ADMINISTRATOR_ROLE {
                return Err(EngineError::validation("the administrator role cannot be renamed"));
            }
            self.check_role_name_free(&name, Some(id))?;
            role.name = name;
        }
        if description.is_some() {
            role.description = optional_text("description", description, MAX_NOTES_LEN)?;
        }
        self.persist_catalog(&Event::RoleSaved { role: role.clone() })
            .await?;
        info!(role = %id, "role updated");
        Ok(role)
    }

    pub async fn delete_role(&self, caller: &Caller, id: Ulid) -> Result<(), EngineError> {
        caller.ensure_admin()?;
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.store().role(&id).is_none() {
            return Err(EngineError::not_found("role", id));
        }
        let assigned = self.store().users().iter().filter(|u| u.role_id == id).count();
        if assigned > 0 {
            return Err(EngineError::validation(format!(
                "role is assigned to {assigned} user(s)"
            )));
        }
        self.persist_catalog(&Event::RoleDeleted { id }).await?;
        info!(role = %id, "role deleted");
        Ok(())
    }

    pub fn list_roles(&self, caller: &Caller) -> Result<Vec<Role>, EngineError> {
        caller.ensure_admin()?;
        let mut roles = self.store().roles();
        roles.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(roles)
    }

    /// Seed an empty store with the administrator role and one administrator
    /// account. Returns `None` when users already exist.
    pub async fn bootstrap_administrator(&self, username: &str) -> Result<Option<User>, EngineError> {
        let username = required_text("username", username, MAX_TEXT_LEN)?;
        let _gate = self.write_gate.read().await;
        let _catalog = self.catalog_lock.lock().await;
        if self.store().user_count() > 0 {
            return Ok(None);
        }
        let now = self.now();
        let role = match self.store().role_by_name(ADMINISTRATOR_ROLE) {
            Some(role) => role,
            None => {
                let role = Role {
                    id: Ulid::new(),
                    name: ADMINISTRATOR_ROLE.to_string(),
                    description: Some("Full fleet administration".into()),
                    created_at: now,
                };
                self.persist_catalog(&Event::RoleSaved { role: role.clone() })
                    .await?;
                role
            }
        };
        let user = User {
            id: Ulid::new(),
            email: format!("{username}@localhost"),
            full_name: username.clone(),
            username,
            corporate_id: None,
            department: None,
            phone: None,
            active: true,
            role_id: role.id,
            created_at: now,
            updated_at: now,
        };
        self.persist_catalog(&Event::UserSaved { user: user.clone() })
            .await?;
        info!(user = %user.id, username = %user.username, "bootstrap administrator created");
        Ok(Some(user))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn email_needs_both_halves() {
        assert_eq!(validate_email(" jan@corp.cz ").unwrap(), "jan@corp.cz");
        assert!(validate_email("jan@").is_err());
        assert!(validate_email("@corp.cz").is_err());
        assert!(validate_email("jan.corp.cz").is_err());
    }

    #[test]
    fn zero_seats_rejected() {
        assert!(validate_seats(0).is_err());
        assert_eq!(validate_seats(7).unwrap(), 7);
    }
}
