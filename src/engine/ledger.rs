use std::time::Instant;

use rust_decimal::Decimal;
use tracing::info;
use ulid::Ulid;

use crate::identity::Caller;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

/// The single place `last_service_date` is derived: the latest
/// `service_date` among the vehicle's service records, or none.
pub fn recompute_last_service_date(vs: &mut VehicleState) {
    vs.vehicle.last_service_date = vs.service_records.iter().map(|r| r.service_date).max();
}

fn validate_cost(field: &'static str, cost: Option<Decimal>) -> Result<Option<Decimal>, EngineError> {
    match cost {
        Some(c) if c.is_sign_negative() && !c.is_zero() => {
            Err(EngineError::validation(format!("{field} cannot be negative")))
        }
        other => Ok(other),
    }
}

fn validate_photos(photos: Vec<String>) -> Result<Vec<String>, EngineError> {
    if photos.len() > MAX_PHOTOS_PER_RECORD {
        return Err(EngineError::validation(format!(
            "more than {MAX_PHOTOS_PER_RECORD} photos"
        )));
    }
    photos
        .iter()
        .map(|p| required_text("photo", p, MAX_TEXT_LEN))
        .collect()
}

impl Engine {
    // ── Service records ──────────────────────────────────────

    pub async fn create_service_record(
        &self,
        caller: &Caller,
        request: NewServiceRecord,
    ) -> Result<ServiceRecord, EngineError> {
        let started = Instant::now();
        let result: Result<ServiceRecord, EngineError> = async {
            caller.ensure_admin()?;
            let service_type = required_text("service type", &request.service_type, MAX_TEXT_LEN)?;
            let description = required_text("description", &request.description, MAX_NOTES_LEN)?;
            let cost = validate_cost("cost", request.cost)?;
            let service_provider =
                optional_text("service provider", request.service_provider, MAX_TEXT_LEN)?;

            let _gate = self.write_gate.read().await;
            let mut guard = self.vehicle_write(&request.vehicle_id).await?;
            let now = self.now();
            let record = ServiceRecord {
                id: Ulid::new(),
                vehicle_id: request.vehicle_id,
                service_date: request.service_date,
                service_type,
                description,
                cost,
                service_provider,
                created_at: now,
                updated_at: now,
            };
            let event = Event::ServiceRecordSaved {
                record: record.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            info!(record = %record.id, vehicle = %record.vehicle_id, "service record created");
            Ok(record)
        }
        .await;
        observability::record_operation("create_service_record", started, &result);
        result
    }

    pub async fn update_service_record(
        &self,
        caller: &Caller,
        id: Ulid,
        patch: ServiceRecordPatch,
    ) -> Result<ServiceRecord, EngineError> {
        let started = Instant::now();
        let result: Result<ServiceRecord, EngineError> = async {
            caller.ensure_admin()?;
            let _gate = self.write_gate.read().await;
            let mut guard = self.resolve_entity_write("service record", &id).await?;
            let mut record = guard
                .service_records
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or(EngineError::not_found("service record", id))?;

            if let Some(date) = patch.service_date {
                record.service_date = date;
            }
            if let Some(service_type) = patch.service_type {
                record.service_type = required_text("service type", &service_type, MAX_TEXT_LEN)?;
            }
            if let Some(description) = patch.description {
                record.description = required_text("description", &description, MAX_NOTES_LEN)?;
            }
            if patch.cost.is_some() {
                record.cost = validate_cost("cost", patch.cost)?;
            }
            if patch.service_provider.is_some() {
                record.service_provider =
                    optional_text("service provider", patch.service_provider, MAX_TEXT_LEN)?;
            }
            record.updated_at = self.now();

            let event = Event::ServiceRecordSaved {
                record: record.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            info!(record = %id, "service record updated");
            Ok(record)
        }
        .await;
        observability::record_operation("update_service_record", started, &result);
        result
    }

    pub async fn delete_service_record(&self, caller: &Caller, id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result: Result<(), EngineError> = async {
            caller.ensure_admin()?;
            let _gate = self.write_gate.read().await;
            let mut guard = self.resolve_entity_write("service record", &id).await?;
            if !guard.service_records.iter().any(|r| r.id == id) {
                return Err(EngineError::not_found("service record", id));
            }
            let event = Event::ServiceRecordDeleted {
                id,
                vehicle_id: guard.vehicle.id,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            info!(record = %id, "service record deleted");
            Ok(())
        }
        .await;
        observability::record_operation("delete_service_record", started, &result);
        result
    }

    /// Service records, newest service date first.
    pub async fn list_service_records(
        &self,
        caller: &Caller,
        vehicle_id: Option<Ulid>,
    ) -> Result<Vec<ServiceRecord>, EngineError> {
        caller.ensure_admin()?;
        let vehicles = match vehicle_id {
            Some(id) => vec![
                self.store()
                    .vehicle(&id)
                    .ok_or(EngineError::not_found("vehicle", id))?,
            ],
            None => self.store().all_vehicles(),
        };
        let mut out = Vec::new();
        for shared in vehicles {
            out.extend(shared.read().await.service_records.iter().cloned());
        }
        out.sort_by(|a, b| {
            b.service_date
                .cmp(&a.service_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(out)
    }

    // ── Damage records ───────────────────────────────────────

    pub async fn create_damage_record(
        &self,
        caller: &Caller,
        request: NewDamageRecord,
    ) -> Result<DamageRecord, EngineError> {
        let started = Instant::now();
        let result: Result<DamageRecord, EngineError> = async {
            caller.ensure_admin()?;
            let description = required_text("description", &request.description, MAX_NOTES_LEN)?;
            let estimated_cost = validate_cost("estimated cost", request.estimated_cost)?;
            let actual_cost = validate_cost("actual cost", request.actual_cost)?;
            let photos = validate_photos(request.photos)?;

            let _gate = self.write_gate.read().await;
            let mut guard = self.vehicle_write(&request.vehicle_id).await?;
            let now = self.now();
            let record = DamageRecord {
                id: Ulid::new(),
                vehicle_id: request.vehicle_id,
                damage_date: request.damage_date,
                description,
                estimated_cost,
                actual_cost,
                repair_status: request.repair_status.unwrap_or(RepairStatus::Pending),
                photos,
                created_at: now,
                updated_at: now,
            };
            let event = Event::DamageRecordSaved {
                record: record.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            info!(record = %record.id, vehicle = %record.vehicle_id, "damage record created");
            Ok(record)
        }
        .await;
        observability::record_operation("create_damage_record", started, &result);
        result
    }

    pub async fn update_damage_record(
        &self,
        caller: &Caller,
        id: Ulid,
        patch: DamageRecordPatch,
    ) -> Result<DamageRecord, EngineError> {
        let started = Instant::now();
        let result: Result<DamageRecord, EngineError> = async {
            caller.ensure_admin()?;
            let _gate = self.write_gate.read().await;
            let mut guard = self.resolve_entity_write("damage record", &id).await?;
            let mut record = guard
                .damage_records
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .ok_or(EngineError::not_found("damage record", id))?;

            if let Some(date) = patch.damage_date {
                record.damage_date = date;
            }
            if let Some(description) = patch.description {
                record.description = required_text("description", &description, MAX_NOTES_LEN)?;
            }
            if patch.estimated_cost.is_some() {
                record.estimated_cost = validate_cost("estimated cost", patch.estimated_cost)?;
            }
            if patch.actual_cost.is_some() {
                record.actual_cost = validate_cost("actual cost", patch.actual_cost)?;
            }
            if let Some(status) = patch.repair_status {
                record.repair_status = status;
            }
            if let Some(photos) = patch.photos {
                record.photos = validate_photos(photos)?;
            }
            record.updated_at = self.now();

            let event = Event::DamageRecordSaved {
                record: record.clone(),
            };
            self.persist_and_apply(&mut guard, &event).await?;
            info!(record = %id, repair_status = ?record.repair_status, "damage record updated");
            Ok(record)
        }
        .await;
        observability::record_operation("update_damage_record", started, &result);
        result
    }

    pub async fn delete_damage_record(&self, caller: &Caller, id: Ulid) -> Result<(), EngineError> {
        let started = Instant::now();
        let result: Result<(), EngineError> = async {
            caller.ensure_admin()?;
            let _gate = self.write_gate.read().await;
            let mut guard = self.resolve_entity_write("damage record", &id).await?;
            if !guard.damage_records.iter().any(|r| r.id == id) {
                return Err(EngineError::not_found("damage record", id));
            }
            let event = Event::DamageRecordDeleted {
                id,
                vehicle_id: guard.vehicle.id,
            };
            self.persist_and_apply(&mut guard, &event).await?;
            info!(record = %id, "damage record deleted");
            Ok(())
        }
        .await;
        observability::record_operation("delete_damage_record", started, &result);
        result
    }

    /// Damage records, newest damage date first.
    pub async fn list_damage_records(
        &self,
        caller: &Caller,
        vehicle_id: Option<Ulid>,
        repair_status: Option<RepairStatus>,
    ) -> Result<Vec<DamageRecord>, EngineError> {
        caller.ensure_admin()?;
        let vehicles = match vehicle_id {
            Some(id) => vec![
                self.store()
                    .vehicle(&id)
                    .ok_or(EngineError::not_found("vehicle", id))?,
            ],
            None => self.store().all_vehicles(),
        };
        let mut out = Vec::new();
        for shared in vehicles {
            let guard = shared.read().await;
            out.extend(
                guard
                    .damage_records
                    .iter()
                    .filter(|r| repair_status.is_none_or(|s| r.repair_status == s))
                    .cloned(),
            );
        }
        out.sort_by(|a, b| {
            b.damage_date
                .cmp(&a.damage_date)
                .then(b.created_at.cmp(&a.created_at))
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn state() -> VehicleState {
        let t = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        VehicleState::new(Vehicle {
            id: Ulid::new(),
            make: "Ford".into(),
            model: "Transit".into(),
            license_plate: "2BC 3456".into(),
            color: None,
            fuel_type: FuelType::Diesel,
            seating_capacity: 3,
            transmission: Transmission::Manual,
            status: VehicleStatus::Active,
            description: None,
            odometer: Some(120_000),
            last_service_date: None,
            next_service_date: None,
            technical_inspection_expiry: None,
            highway_vignette_expiry: None,
            emission_control_expiry: None,
            notes: None,
            archived: false,
            created_at: t,
            updated_at: t,
        })
    }

    fn record(vehicle_id: Ulid, day: u32) -> ServiceRecord {
        let t = Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap();
        ServiceRecord {
            id: Ulid::new(),
            vehicle_id,
            service_date: NaiveDate::from_ymd_opt(2030, 2, day).unwrap(),
            service_type: "Inspection".into(),
            description: "Annual".into(),
            cost: None,
            service_provider: None,
            created_at: t,
            updated_at: t,
        }
    }

    #[test]
    fn last_service_date_follows_records() {
        let mut vs = state();
        let vid = vs.vehicle.id;
        let older = record(vid, 3);
        let newer = record(vid, 20);
        vs.upsert_service_record(newer.clone());
        vs.upsert_service_record(older.clone());
        recompute_last_service_date(&mut vs);
        assert_eq!(vs.vehicle.last_service_date, Some(newer.service_date));

        vs.remove_service_record(newer.id);
        recompute_last_service_date(&mut vs);
        assert_eq!(vs.vehicle.last_service_date, Some(older.service_date));

        vs.remove_service_record(older.id);
        recompute_last_service_date(&mut vs);
        assert_eq!(vs.vehicle.last_service_date, None);
    }

    #[test]
    fn negative_costs_rejected() {
        assert!(validate_cost("cost", Some(Decimal::new(-1, 2))).is_err());
        assert_eq!(validate_cost("cost", Some(Decimal::ZERO)).unwrap(), Some(Decimal::ZERO));
        assert_eq!(validate_cost("cost", None).unwrap(), None);
    }

    #[test]
    fn photo_count_is_capped() {
        let photos = vec!["front.jpg".to_string(); MAX_PHOTOS_PER_RECORD + 1];
        assert!(validate_photos(photos).is_err());
        assert_eq!(
            validate_photos(vec![" rear.jpg ".into()]).unwrap(),
            vec!["rear.jpg".to_string()]
        );
    }
}
