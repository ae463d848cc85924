use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::engine::Engine;

const CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Background task that rewrites the WAL once enough appends piled up
/// since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(CHECK_INTERVAL);
    loop {
        interval.tick().await;
        compact_if_due(&engine, threshold).await;
    }
}

/// One compaction check. Returns whether a compaction ran successfully.
pub async fn compact_if_due(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    debug!(appends, threshold, "compacting WAL");
    match engine.compact_wal().await {
        Ok(()) => true,
        Err(e) => {
            warn!("WAL compaction failed: {e}");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Caller, RoleKind};
    use crate::model::*;
    use crate::wal::Wal;
    use chrono::{DateTime, Local, TimeZone, Utc};
    use mockable::Clock;
    use std::path::PathBuf;
    use ulid::Ulid;

    struct Epoch;

    impl Clock for Epoch {
        fn local(&self) -> DateTime<Local> {
            self.utc().with_timezone(&Local)
        }

        fn utc(&self) -> DateTime<Utc> {
            Utc.with_ymd_and_hms(2030, 1, 1, 8, 0, 0).unwrap()
        }
    }

    fn test_wal_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("fleetbook_test_compactor");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let _ = std::fs::remove_file(&path);
        path
    }

    fn new_vehicle(plate: &str) -> NewVehicle {
        NewVehicle {
            make: "Toyota".into(),
            model: "Corolla".into(),
            license_plate: plate.into(),
            color: None,
            fuel_type: FuelType::Hybrid,
            seating_capacity: 5,
            transmission: Transmission::Automatic,
            status: None,
            description: None,
            odometer: None,
            next_service_date: None,
            technical_inspection_expiry: None,
            highway_vignette_expiry: None,
            emission_control_expiry: None,
            notes: None,
        }
    }

    #[tokio::test]
    async fn compacts_only_past_threshold() {
        let path = test_wal_path("threshold.wal");
        let engine = Engine::new(path.clone(), Arc::new(Epoch)).unwrap();
        let admin = Caller::new(Ulid::new(), RoleKind::Administrator);

        let vehicle = engine.create_vehicle(&admin, new_vehicle("1AA 0001")).await.unwrap();
        for seats in 2..=4 {
            let patch = VehiclePatch {
                seating_capacity: Some(seats),
                ..Default::default()
            };
            engine.update_vehicle(&admin, vehicle.id, patch).await.unwrap();
        }
        assert_eq!(engine.wal_appends_since_compact().await, 4);

        assert!(!compact_if_due(&engine, 10).await);
        assert!(compact_if_due(&engine, 4).await);
        assert_eq!(engine.wal_appends_since_compact().await, 0);

        let replay = Wal::replay(&path).unwrap();
        assert_eq!(replay.events.len(), 1);
        match &replay.events[0] {
            Event::VehicleSaved { vehicle: saved } => assert_eq!(saved.seating_capacity, 4),
            other => panic!("unexpected event {other:?}"),
        }
    }
}
