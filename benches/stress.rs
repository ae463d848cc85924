use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use chrono::{TimeDelta, Utc};
use mockable::DefaultClock;
use ulid::Ulid;

use fleetbook::engine::{Engine, EngineError};
use fleetbook::identity::Caller;
use fleetbook::model::*;

fn percentile(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }
    let idx = ((sorted.len() as f64) * p / 100.0) as usize;
    sorted[idx.min(sorted.len() - 1)]
}

fn print_latency(label: &str, latencies: &mut [Duration]) {
    if latencies.is_empty() {
        println!("  {label}: no samples");
        return;
    }
    latencies.sort();
    let total: Duration = latencies.iter().sum();
    let avg = total / latencies.len() as u32;
    println!("  {label}:");
    println!(
        "    n={}, avg={:.2}ms, p50={:.2}ms, p95={:.2}ms, p99={:.2}ms, max={:.2}ms",
        latencies.len(),
        avg.as_secs_f64() * 1000.0,
        percentile(latencies, 50.0).as_secs_f64() * 1000.0,
        percentile(latencies, 95.0).as_secs_f64() * 1000.0,
        percentile(latencies, 99.0).as_secs_f64() * 1000.0,
        percentile(latencies, 100.0).as_secs_f64() * 1000.0,
    );
}

fn vehicle(plate: String) -> NewVehicle {
    NewVehicle {
        make: "Skoda".into(),
        model: "Superb".into(),
        license_plate: plate,
        color: None,
        fuel_type: FuelType::Diesel,
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

fn booking(vehicle_id: Ulid, start: Timestamp) -> NewReservation {
    NewReservation {
        vehicle_id,
        start,
        end: start + TimeDelta::hours(1),
        purpose: "Benchmark".into(),
        destination: "Nowhere".into(),
        passenger_count: 1,
        user_notes: None,
        admin_notes: None,
        user_id: None,
    }
}

fn base() -> Timestamp {
    Utc::now() + TimeDelta::days(1)
}

struct Bench {
    engine: Arc<Engine>,
    admin: Caller,
}

async fn setup() -> Bench {
    let dir = std::env::temp_dir().join(format!("fleetbook_bench_{}", Ulid::new()));
    std::fs::create_dir_all(&dir).expect("create bench dir");
    let engine = Arc::new(
        Engine::new(dir.join("fleet.wal"), Arc::new(DefaultClock)).expect("open engine"),
    );
    let admin = engine
        .bootstrap_administrator("bench")
        .await
        .expect("bootstrap")
        .expect("fresh store");
    let admin = engine.resolve_caller(admin.id).expect("resolve admin");
    Bench { engine, admin }
}

async fn add_vehicle(bench: &Bench) -> Ulid {
    bench
        .engine
        .create_vehicle(&bench.admin, vehicle(format!("B-{}", Ulid::new())))
        .await
        .expect("create vehicle")
        .id
}

async fn phase1_sequential(bench: &Bench) {
    let vehicle_id = add_vehicle(bench).await;
    let n = 2000;
    let start_at = base();
    let mut latencies = Vec::with_capacity(n);
    let start = Instant::now();

    for i in 0..n {
        let request = booking(vehicle_id, start_at + TimeDelta::hours(i as i64));
        let t = Instant::now();
        bench
            .engine
            .create_reservation(&bench.admin, request)
            .await
            .expect("sequential booking");
        latencies.push(t.elapsed());
    }

    let elapsed = start.elapsed();
    let ops = n as f64 / elapsed.as_secs_f64();
    println!("  {n} bookings in {:.2}s = {ops:.0} ops/sec", elapsed.as_secs_f64());
    print_latency("write latency", &mut latencies);
}

async fn phase2_concurrent(bench: &Bench) {
    let n_tasks = 10;
    let n_per_task = 200;
    let mut vehicles = Vec::new();
    for _ in 0..n_tasks {
        vehicles.push(add_vehicle(bench).await);
    }

    let start_at = base();
    let start = Instant::now();
    let mut handles = Vec::new();
    for vehicle_id in vehicles {
        let engine = bench.engine.clone();
        let admin = bench.admin;
        handles.push(tokio::spawn(async move {
            for j in 0..n_per_task {
                let request = booking(vehicle_id, start_at + TimeDelta::hours(j));
                engine
                    .create_reservation(&admin, request)
                    .await
                    .expect("concurrent booking");
            }
        }));
    }
    for h in handles {
        h.await.expect("task panicked");
    }

    let elapsed = start.elapsed();
    let total = n_tasks * n_per_task as usize;
    let ops = total as f64 / elapsed.as_secs_f64();
    println!(
        "  {n_tasks} tasks x {n_per_task} bookings = {total} total in {:.2}s = {ops:.0} ops/sec",
        elapsed.as_secs_f64()
    );
}

async fn phase3_read_under_load(bench: &Bench) {
    let read_vehicle = add_vehicle(bench).await;
    let start_at = base();
    for i in 0..200 {
        bench
            .engine
            .create_reservation(&bench.admin, booking(read_vehicle, start_at + TimeDelta::hours(i * 2)))
            .await
            .expect("prefill");
    }

    let stop = Arc::new(AtomicBool::new(false));
    let mut writer_handles = Vec::new();
    for _ in 0..5 {
        let vehicle_id = add_vehicle(bench).await;
        let engine = bench.engine.clone();
        let admin = bench.admin;
        let stop = stop.clone();
        writer_handles.push(tokio::spawn(async move {
            let mut i = 0i64;
            while !stop.load(Ordering::Relaxed) {
                let _ = engine
                    .create_reservation(&admin, booking(vehicle_id, start_at + TimeDelta::hours(i)))
                    .await;
                i += 1;
            }
        }));
    }

    let n_readers = 10;
    let reads_per_reader = 500;
    let mut reader_handles = Vec::new();
    for r in 0..n_readers {
        let engine = bench.engine.clone();
        let admin = bench.admin;
        reader_handles.push(tokio::spawn(async move {
            let mut latencies = Vec::with_capacity(reads_per_reader);
            for q in 0..reads_per_reader {
                let from = start_at + TimeDelta::hours(((r * reads_per_reader + q) % 400) as i64);
                let t = Instant::now();
                let _ = engine
                    .is_available(&admin, read_vehicle, from, from + TimeDelta::hours(3))
                    .await;
                latencies.push(t.elapsed());
            }
            latencies
        }));
    }

    let mut all_latencies = Vec::new();
    for h in reader_handles {
        all_latencies.extend(h.await.expect("reader panicked"));
    }
    stop.store(true, Ordering::Relaxed);
    for h in writer_handles {
        let _ = h.await;
    }
    print_latency("availability query", &mut all_latencies);
}

async fn phase4_contention(bench: &Bench) {
    let vehicle_id = add_vehicle(bench).await;
    let n_tasks = 50;
    let slot = base();
    let admitted = Arc::new(AtomicUsize::new(0));
    let conflicts = Arc::new(AtomicUsize::new(0));

    let start = Instant::now();
    let mut handles = Vec::new();
    for _ in 0..n_tasks {
        let engine = bench.engine.clone();
        let admin = bench.admin;
        let admitted = admitted.clone();
        let conflicts = conflicts.clone();
        handles.push(tokio::spawn(async move {
            match engine.create_reservation(&admin, booking(vehicle_id, slot)).await {
                Ok(_) => admitted.fetch_add(1, Ordering::Relaxed),
                Err(EngineError::Conflict(_)) => conflicts.fetch_add(1, Ordering::Relaxed),
                Err(e) => panic!("unexpected error: {e}"),
            };
        }));
    }
    for h in handles {
        let _ = h.await;
    }

    println!(
        "  {n_tasks} bookings for one slot: {} admitted, {} conflicts in {:.2}ms",
        admitted.load(Ordering::Relaxed),
        conflicts.load(Ordering::Relaxed),
        start.elapsed().as_secs_f64() * 1000.0
    );
}

async fn phase5_compaction(bench: &Bench) {
    let appends = bench.engine.wal_appends_since_compact().await;
    let start = Instant::now();
    bench.engine.compact_wal().await.expect("compaction");
    println!(
        "  compacted {appends} appends in {:.2}ms",
        start.elapsed().as_secs_f64() * 1000.0
    );
}

#[tokio::main]
async fn main() {
    println!("=== fleetbook stress benchmark ===\n");

    println!("[setup]");
    let bench = setup().await;

    println!("\n[phase 1] sequential booking throughput");
    phase1_sequential(&bench).await;

    println!("\n[phase 2] concurrent booking throughput");
    phase2_concurrent(&bench).await;

    println!("\n[phase 3] availability latency under write load");
    phase3_read_under_load(&bench).await;

    println!("\n[phase 4] contention on one slot");
    phase4_contention(&bench).await;

    println!("\n[phase 5] compaction");
    phase5_compaction(&bench).await;

    println!("\n=== benchmark complete ===");
}
