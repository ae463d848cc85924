use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// UTC instant, the only time type for reservations and audit stamps.
pub type Timestamp = DateTime<Utc>;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Span {
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }

    /// Duration in fractional hours.
    pub fn hours(&self) -> f64 {
        self.duration().num_seconds() as f64 / 3600.0
    }

    /// Overlap test written as the three ways `other` can touch `self`:
    /// it covers our start, it covers our end, or it sits inside us.
    /// Equivalent to `self.start < other.end && other.start < self.end`
    /// for non-empty spans; touching endpoints never overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        let covers_start = other.start <= self.start && other.end > self.start;
        let covers_end = other.start < self.end && other.end >= self.end;
        let contained = other.start >= self.start && other.end <= self.end;
        covers_start || covers_end || contained
    }

    pub fn contains_instant(&self, t: Timestamp) -> bool {
        self.start <= t && t < self.end
    }

    /// Returns true if `self` fully contains `other`.
    pub fn contains_span(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// Midnight UTC opening `date`.
pub fn start_of_day(date: NaiveDate) -> Timestamp {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Midnight UTC closing `date`, i.e. the start of the next day.
pub fn end_of_day(date: NaiveDate) -> Option<Timestamp> {
    date.succ_opt().map(start_of_day)
}

// ── Vehicles ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VehicleStatus {
    Active,
    InMaintenance,
    OutOfService,
    Archived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuelType {
    Petrol,
    Diesel,
    Electric,
    Hybrid,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Transmission {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: Ulid,
    pub make: String,
    pub model: String,
    pub license_plate: String,
    pub color: Option<String>,
    pub fuel_type: FuelType,
    pub seating_capacity: u32,
    pub transmission: Transmission,
    pub status: VehicleStatus,
    pub description: Option<String>,
    pub odometer: Option<u32>,
    /// Derived: max `service_date` over this vehicle's service records.
    pub last_service_date: Option<NaiveDate>,
    pub next_service_date: Option<NaiveDate>,
    pub technical_inspection_expiry: Option<NaiveDate>,
    pub highway_vignette_expiry: Option<NaiveDate>,
    pub emission_control_expiry: Option<NaiveDate>,
    pub notes: Option<String>,
    pub archived: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Vehicle {
    /// Only active, non-archived vehicles accept new bookings.
    pub fn is_bookable(&self) -> bool {
        !self.archived && self.status == VehicleStatus::Active
    }

    /// Display label used in reports, e.g. `Skoda Octavia (1AB 2345)`.
    pub fn label(&self) -> String {
        format!("{} {} ({})", self.make, self.model, self.license_plate)
    }
}

// ── Reservations ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ReservationStatus {
    Confirmed,
    Cancelled,
    Completed,
}

impl ReservationStatus {
    pub const ALL: [ReservationStatus; 3] = [
        ReservationStatus::Confirmed,
        ReservationStatus::Cancelled,
        ReservationStatus::Completed,
    ];

    /// Cancelled and Completed are final; nothing transitions out of them.
    pub fn is_terminal(self) -> bool {
        !matches!(self, ReservationStatus::Confirmed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    pub id: Ulid,
    pub user_id: Ulid,
    pub vehicle_id: Ulid,
    pub span: Span,
    pub purpose: String,
    pub destination: String,
    pub passenger_count: u32,
    pub user_notes: Option<String>,
    /// Visible to and editable by administrators only.
    pub admin_notes: Option<String>,
    pub status: ReservationStatus,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Reservation {
    pub fn is_confirmed(&self) -> bool {
        self.status == ReservationStatus::Confirmed
    }
}

// ── Users and roles ──────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub id: Ulid,
    pub name: String,
    pub description: Option<String>,
    pub created_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: Ulid,
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub corporate_id: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub active: bool,
    pub role_id: Ulid,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ── Ledger ───────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub service_date: NaiveDate,
    pub service_type: String,
    pub description: String,
    pub cost: Option<Decimal>,
    pub service_provider: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RepairStatus {
    /// Awaiting repair; counted as unresolved.
    Pending,
    Repaired,
    Irreparable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageRecord {
    pub id: Ulid,
    pub vehicle_id: Ulid,
    pub damage_date: NaiveDate,
    pub description: String,
    pub estimated_cost: Option<Decimal>,
    pub actual_cost: Option<Decimal>,
    pub repair_status: RepairStatus,
    pub photos: Vec<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

// ── Per-vehicle state ────────────────────────────────────────────

/// Everything owned by one vehicle, guarded by a single lock so that the
/// conflict check and the write of a reservation happen atomically.
#[derive(Debug, Clone)]
pub struct VehicleState {
    pub vehicle: Vehicle,
    /// All reservations regardless of status, sorted by `span.start`.
    pub reservations: Vec<Reservation>,
    pub service_records: Vec<ServiceRecord>,
    pub damage_records: Vec<DamageRecord>,
}

impl VehicleState {
    pub fn new(vehicle: Vehicle) -> Self {
        Self {
            vehicle,
            reservations: Vec::new(),
            service_records: Vec::new(),
            damage_records: Vec::new(),
        }
    }

    /// Insert reservation maintaining sort order by span.start.
    pub fn insert_reservation(&mut self, reservation: Reservation) {
        let pos = self
            .reservations
            .partition_point(|r| r.span.start <= reservation.span.start);
        self.reservations.insert(pos, reservation);
    }

    /// Replace a reservation by id, re-sorting if its window moved.
    pub fn upsert_reservation(&mut self, reservation: Reservation) {
        self.remove_reservation(reservation.id);
        self.insert_reservation(reservation);
    }

    pub fn remove_reservation(&mut self, id: Ulid) -> Option<Reservation> {
        let pos = self.reservations.iter().position(|r| r.id == id)?;
        Some(self.reservations.remove(pos))
    }

    pub fn reservation(&self, id: &Ulid) -> Option<&Reservation> {
        self.reservations.iter().find(|r| r.id == *id)
    }

    /// Return only reservations whose span overlaps the query window.
    /// Uses binary search to skip reservations starting at or after `query.end`.
    pub fn overlapping(&self, query: &Span) -> impl Iterator<Item = &Reservation> {
        // Everything at index >= right_bound starts at or after query.end → can't overlap.
        let right_bound = self
            .reservations
            .partition_point(|r| r.span.start < query.end);
        self.reservations
            .iter()
            .take(right_bound)
            .filter(move |r| r.span.end > query.start)
    }

    pub fn upsert_service_record(&mut self, record: ServiceRecord) {
        match self.service_records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => self.service_records.push(record),
        }
    }

    pub fn remove_service_record(&mut self, id: Ulid) -> Option<ServiceRecord> {
        let pos = self.service_records.iter().position(|r| r.id == id)?;
        Some(self.service_records.remove(pos))
    }

    pub fn upsert_damage_record(&mut self, record: DamageRecord) {
        match self.damage_records.iter_mut().find(|r| r.id == record.id) {
            Some(existing) => *existing = record,
            None => self.damage_records.push(record),
        }
    }

    pub fn remove_damage_record(&mut self, id: Ulid) -> Option<DamageRecord> {
        let pos = self.damage_records.iter().position(|r| r.id == id)?;
        Some(self.damage_records.remove(pos))
    }
}

/// The event types. This is the WAL record format; every mutation is an
/// upsert or delete of one whole entity, so replay is order-preserving
/// last-writer-wins.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    VehicleSaved { vehicle: Vehicle },
    RoleSaved { role: Role },
    RoleDeleted { id: Ulid },
    UserSaved { user: User },
    ReservationSaved { reservation: Reservation },
    ServiceRecordSaved { record: ServiceRecord },
    ServiceRecordDeleted { id: Ulid, vehicle_id: Ulid },
    DamageRecordSaved { record: DamageRecord },
    DamageRecordDeleted { id: Ulid, vehicle_id: Ulid },
}

impl Event {
    /// The owning vehicle for vehicle-scoped events.
    pub fn vehicle_id(&self) -> Option<Ulid> {
        match self {
            Event::VehicleSaved { vehicle } => Some(vehicle.id),
            Event::ReservationSaved { reservation } => Some(reservation.vehicle_id),
            Event::ServiceRecordSaved { record } => Some(record.vehicle_id),
            Event::DamageRecordSaved { record } => Some(record.vehicle_id),
            Event::ServiceRecordDeleted { vehicle_id, .. }
            | Event::DamageRecordDeleted { vehicle_id, .. } => Some(*vehicle_id),
            Event::RoleSaved { .. } | Event::RoleDeleted { .. } | Event::UserSaved { .. } => None,
        }
    }
}

// ── Command payloads ─────────────────────────────────────────────

/// Request to book a vehicle. `user_id` names the traveller when an
/// administrator books on someone else's behalf.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewReservation {
    pub vehicle_id: Ulid,
    pub start: Timestamp,
    pub end: Timestamp,
    pub purpose: String,
    pub destination: String,
    pub passenger_count: u32,
    pub user_notes: Option<String>,
    pub admin_notes: Option<String>,
    pub user_id: Option<Ulid>,
}

/// Partial update of a reservation. `None` leaves a field untouched.
/// `admin_notes`, `status` and `user_id` are ignored for non-administrators.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationPatch {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub purpose: Option<String>,
    pub destination: Option<String>,
    pub passenger_count: Option<u32>,
    pub user_notes: Option<String>,
    pub admin_notes: Option<String>,
    pub status: Option<ReservationStatus>,
    pub user_id: Option<Ulid>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReservationFilter {
    pub vehicle_id: Option<Ulid>,
    pub status: Option<ReservationStatus>,
    /// Reservations starting on or after this day.
    pub from: Option<NaiveDate>,
    /// Reservations ending before the day after this one.
    pub to: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewVehicle {
    pub make: String,
    pub model: String,
    pub license_plate: String,
    pub color: Option<String>,
    pub fuel_type: FuelType,
    pub seating_capacity: u32,
    pub transmission: Transmission,
    pub status: Option<VehicleStatus>,
    pub description: Option<String>,
    pub odometer: Option<u32>,
    pub next_service_date: Option<NaiveDate>,
    pub technical_inspection_expiry: Option<NaiveDate>,
    pub highway_vignette_expiry: Option<NaiveDate>,
    pub emission_control_expiry: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehiclePatch {
    pub make: Option<String>,
    pub model: Option<String>,
    pub license_plate: Option<String>,
    pub color: Option<String>,
    pub fuel_type: Option<FuelType>,
    pub seating_capacity: Option<u32>,
    pub transmission: Option<Transmission>,
    pub status: Option<VehicleStatus>,
    pub description: Option<String>,
    pub odometer: Option<u32>,
    pub next_service_date: Option<NaiveDate>,
    pub technical_inspection_expiry: Option<NaiveDate>,
    pub highway_vignette_expiry: Option<NaiveDate>,
    pub emission_control_expiry: Option<NaiveDate>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VehicleFilter {
    pub status: Option<VehicleStatus>,
    pub include_archived: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub full_name: String,
    pub corporate_id: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub role_id: Ulid,
    pub active: bool,
}

/// Self-service callers may only change `department` and `phone`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPatch {
    pub username: Option<String>,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub corporate_id: Option<String>,
    pub department: Option<String>,
    pub phone: Option<String>,
    pub role_id: Option<Ulid>,
    pub active: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewServiceRecord {
    pub vehicle_id: Ulid,
    pub service_date: NaiveDate,
    pub service_type: String,
    pub description: String,
    pub cost: Option<Decimal>,
    pub service_provider: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecordPatch {
    pub service_date: Option<NaiveDate>,
    pub service_type: Option<String>,
    pub description: Option<String>,
    pub cost: Option<Decimal>,
    pub service_provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewDamageRecord {
    pub vehicle_id: Ulid,
    pub damage_date: NaiveDate,
    pub description: String,
    pub estimated_cost: Option<Decimal>,
    pub actual_cost: Option<Decimal>,
    pub repair_status: Option<RepairStatus>,
    pub photos: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageRecordPatch {
    pub damage_date: Option<NaiveDate>,
    pub description: Option<String>,
    pub estimated_cost: Option<Decimal>,
    pub actual_cost: Option<Decimal>,
    pub repair_status: Option<RepairStatus>,
    pub photos: Option<Vec<String>>,
}

// ── Query result types ───────────────────────────────────────────

/// Outcome of an availability check for one vehicle and window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub available: bool,
    pub conflicts: Vec<Reservation>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(hour: u32, minute: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2030, 5, 6, hour, minute, 0).unwrap()
    }

    fn span(start: (u32, u32), end: (u32, u32)) -> Span {
        Span::new(at(start.0, start.1), at(end.0, end.1))
    }

    fn vehicle() -> Vehicle {
        Vehicle {
            id: Ulid::new(),
            make: "Skoda".into(),
            model: "Octavia".into(),
            license_plate: "1AB 2345".into(),
            color: None,
            fuel_type: FuelType::Diesel,
            seating_capacity: 5,
            transmission: Transmission::Manual,
            status: VehicleStatus::Active,
            description: None,
            odometer: None,
            last_service_date: None,
            next_service_date: None,
            technical_inspection_expiry: None,
            highway_vignette_expiry: None,
            emission_control_expiry: None,
            notes: None,
            archived: false,
            created_at: at(0, 0),
            updated_at: at(0, 0),
        }
    }

    fn reservation(vehicle_id: Ulid, window: Span) -> Reservation {
        Reservation {
            id: Ulid::new(),
            user_id: Ulid::new(),
            vehicle_id,
            span: window,
            purpose: "Client visit".into(),
            destination: "Brno".into(),
            passenger_count: 1,
            user_notes: None,
            admin_notes: None,
            status: ReservationStatus::Confirmed,
            created_at: at(0, 0),
            updated_at: at(0, 0),
        }
    }

    #[test]
    fn span_basics() {
        let s = span((10, 0), (11, 0));
        assert_eq!(s.duration(), TimeDelta::hours(1));
        assert_eq!(s.hours(), 1.0);
        assert!(s.contains_instant(at(10, 0)));
        assert!(s.contains_instant(at(10, 59)));
        assert!(!s.contains_instant(at(11, 0))); // half-open
    }

    #[test]
    fn span_overlap_cases() {
        let a = span((10, 0), (11, 0));
        assert!(a.overlaps(&span((10, 30), (11, 30)))); // partial, covers end
        assert!(a.overlaps(&span((9, 30), (10, 30)))); // partial, covers start
        assert!(a.overlaps(&span((10, 15), (10, 45)))); // contained
        assert!(a.overlaps(&span((9, 0), (12, 0)))); // containing
        assert!(a.overlaps(&a)); // identical bounds
        assert!(!a.overlaps(&span((11, 0), (12, 0)))); // adjacent after
        assert!(!a.overlaps(&span((9, 0), (10, 0)))); // adjacent before
    }

    #[test]
    fn span_overlap_matches_strict_form() {
        // Every pair of non-empty spans on a quarter-hour grid from 08:00 to 12:00.
        let points: Vec<Timestamp> = (0..=16)
            .map(|q| at(8, 0) + TimeDelta::minutes(15 * q))
            .collect();
        let mut spans = Vec::new();
        for (i, &s) in points.iter().enumerate() {
            for &e in &points[i + 1..] {
                spans.push(Span::new(s, e));
            }
        }
        for a in &spans {
            for b in &spans {
                let strict = a.start < b.end && b.start < a.end;
                assert_eq!(a.overlaps(b), strict, "{a:?} vs {b:?}");
                assert_eq!(a.overlaps(b), b.overlaps(a), "symmetry {a:?} vs {b:?}");
            }
        }
    }

    #[test]
    fn span_contains_span() {
        let outer = span((8, 0), (12, 0));
        let inner = span((9, 0), (10, 0));
        let partial = span((7, 0), (9, 0));
        assert!(outer.contains_span(&inner));
        assert!(outer.contains_span(&outer)); // self-containment
        assert!(!outer.contains_span(&partial));
    }

    #[test]
    fn day_bounds() {
        let d = NaiveDate::from_ymd_opt(2030, 5, 6).unwrap();
        assert_eq!(start_of_day(d), at(0, 0));
        assert_eq!(end_of_day(d), Some(at(0, 0) + TimeDelta::days(1)));
        assert_eq!(end_of_day(NaiveDate::MAX), None);
    }

    #[test]
    fn vehicle_bookability() {
        let mut v = vehicle();
        assert!(v.is_bookable());
        v.status = VehicleStatus::InMaintenance;
        assert!(!v.is_bookable());
        v.status = VehicleStatus::Active;
        v.archived = true;
        assert!(!v.is_bookable());
        assert_eq!(v.label(), "Skoda Octavia (1AB 2345)");
    }

    #[test]
    fn reservation_ordering() {
        let mut vs = VehicleState::new(vehicle());
        let vid = vs.vehicle.id;
        vs.insert_reservation(reservation(vid, span((14, 0), (15, 0))));
        vs.insert_reservation(reservation(vid, span((8, 0), (9, 0))));
        vs.insert_reservation(reservation(vid, span((11, 0), (12, 0))));
        let starts: Vec<_> = vs.reservations.iter().map(|r| r.span.start).collect();
        assert_eq!(starts, vec![at(8, 0), at(11, 0), at(14, 0)]);
    }

    #[test]
    fn upsert_moves_reservation() {
        let mut vs = VehicleState::new(vehicle());
        let vid = vs.vehicle.id;
        let early = reservation(vid, span((8, 0), (9, 0)));
        let late = reservation(vid, span((11, 0), (12, 0)));
        vs.insert_reservation(early.clone());
        vs.insert_reservation(late.clone());

        let mut moved = early.clone();
        moved.span = span((13, 0), (14, 0));
        vs.upsert_reservation(moved.clone());

        assert_eq!(vs.reservations.len(), 2);
        assert_eq!(vs.reservations[0].id, late.id);
        assert_eq!(vs.reservations[1], moved);
    }

    #[test]
    fn overlapping_skips_past_and_future() {
        let mut vs = VehicleState::new(vehicle());
        let vid = vs.vehicle.id;
        vs.insert_reservation(reservation(vid, span((6, 0), (7, 0))));
        let hit = reservation(vid, span((9, 30), (10, 30)));
        vs.insert_reservation(hit.clone());
        vs.insert_reservation(reservation(vid, span((15, 0), (16, 0))));

        let query = span((10, 0), (12, 0));
        let hits: Vec<_> = vs.overlapping(&query).collect();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, hit.id);
    }

    #[test]
    fn overlapping_adjacent_not_included() {
        let mut vs = VehicleState::new(vehicle());
        let vid = vs.vehicle.id;
        vs.insert_reservation(reservation(vid, span((9, 0), (10, 0))));
        vs.insert_reservation(reservation(vid, span((11, 0), (12, 0))));
        let hits: Vec<_> = vs.overlapping(&span((10, 0), (11, 0))).collect();
        assert!(hits.is_empty());
    }

    #[test]
    fn ledger_upsert_and_remove() {
        let mut vs = VehicleState::new(vehicle());
        let record = ServiceRecord {
            id: Ulid::new(),
            vehicle_id: vs.vehicle.id,
            service_date: NaiveDate::from_ymd_opt(2030, 1, 10).unwrap(),
            service_type: "Oil change".into(),
            description: "5W-30".into(),
            cost: Some(Decimal::new(12_000, 2)),
            service_provider: None,
            created_at: at(0, 0),
            updated_at: at(0, 0),
        };
        vs.upsert_service_record(record.clone());
        let mut edited = record.clone();
        edited.service_type = "Brakes".into();
        vs.upsert_service_record(edited.clone());
        assert_eq!(vs.service_records, vec![edited]);
        assert!(vs.remove_service_record(record.id).is_some());
        assert!(vs.remove_service_record(record.id).is_none());
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ReservationStatus::Confirmed.is_terminal());
        assert!(ReservationStatus::Cancelled.is_terminal());
        assert!(ReservationStatus::Completed.is_terminal());
    }

    #[test]
    fn event_serialization_roundtrip() {
        let v = vehicle();
        let event = Event::ReservationSaved {
            reservation: reservation(v.id, span((10, 0), (11, 0))),
        };
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
        assert_eq!(decoded.vehicle_id(), Some(v.id));
    }
}
