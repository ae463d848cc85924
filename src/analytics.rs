//! Read-side fleet reports.
//!
//! Every report is a pure function of a [`FleetSnapshot`] plus explicit
//! dates, so they run without locks and never fail on an empty fleet.

use std::collections::HashMap;

use chrono::{Datelike, Days, Months, NaiveDate, TimeDelta};
use rust_decimal::Decimal;
use serde::Serialize;
use ulid::Ulid;

use crate::engine::EngineError;
use crate::limits::MAX_REPORT_RANGE_DAYS;
use crate::model::*;

/// Length of the default report window and of the "recent services" count.
pub const TRAILING_DAYS: u32 = 30;
/// Months in the dashboard reservation trend, current month included.
pub const TREND_MONTHS: u32 = 6;
/// Entries kept in each top-users / top-vehicles list.
pub const TOP_N: usize = 10;

/// Point-in-time copy of the store that reports read from.
#[derive(Debug, Clone, Default)]
pub struct FleetSnapshot {
    pub vehicles: Vec<VehicleState>,
    pub users: Vec<User>,
}

/// Inclusive range of calendar days (UTC). Only built through
/// [`DateRange::new`] or [`DateRange::trailing_days`], so it is always
/// ordered and no wider than [`MAX_REPORT_RANGE_DAYS`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, EngineError> {
        if end < start {
            return Err(EngineError::validation("report range ends before it starts"));
        }
        if (end - start).num_days() >= MAX_REPORT_RANGE_DAYS {
            return Err(EngineError::validation("report range too wide"));
        }
        if end.succ_opt().is_none() {
            return Err(EngineError::validation("report range out of bounds"));
        }
        Ok(Self { start, end })
    }

    /// The `days` calendar days ending with `today`, capped at the widest
    /// accepted range.
    pub fn trailing_days(today: NaiveDate, days: u32) -> Self {
        let widest = u32::try_from(MAX_REPORT_RANGE_DAYS).unwrap_or(u32::MAX);
        let back = u64::from(days.clamp(1, widest) - 1);
        Self {
            start: today.checked_sub_days(Days::new(back)).unwrap_or(NaiveDate::MIN),
            end: today,
        }
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// The instants covered: `[start 00:00, end + 1 day 00:00)`.
    pub fn window(&self) -> (Timestamp, Timestamp) {
        let end = end_of_day(self.end).unwrap_or(Timestamp::MAX_UTC);
        (start_of_day(self.start), end)
    }

    pub fn hours(&self) -> f64 {
        let (start, end) = self.window();
        (end - start).num_seconds() as f64 / 3600.0
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> {
        let end = self.end;
        self.start.iter_days().take_while(move |d| *d <= end)
    }
}

fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}

// ── Dashboard ────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MonthCount {
    /// `YYYY-MM`
    pub month: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DashboardSummary {
    pub active_vehicles: usize,
    pub active_users: usize,
    pub reservations_this_month: usize,
    pub reservations_in_progress: usize,
    pub vehicles_in_maintenance: usize,
    pub recent_services: usize,
    pub unresolved_damages: usize,
    pub reservation_trend: Vec<MonthCount>,
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.checked_sub_days(Days::new(u64::from(date.day0())))
        .unwrap_or(date)
}

/// Headline counts for `now`, plus reservations created per calendar month
/// over the last [`TREND_MONTHS`] months, oldest first.
pub fn dashboard(snapshot: &FleetSnapshot, now: Timestamp) -> DashboardSummary {
    let this_month = start_of_day(month_start(now.date_naive()));
    let recent_cutoff = now - TimeDelta::days(i64::from(TRAILING_DAYS));
    let reservations = || snapshot.vehicles.iter().flat_map(|vs| vs.reservations.iter());

    let reservation_trend = (0..TREND_MONTHS)
        .rev()
        .filter_map(|back| {
            let first = month_start(now.date_naive()).checked_sub_months(Months::new(back))?;
            let next = first.checked_add_months(Months::new(1))?;
            let (from, to) = (start_of_day(first), start_of_day(next));
            Some(MonthCount {
                month: first.format("%Y-%m").to_string(),
                count: reservations()
                    .filter(|r| r.created_at >= from && r.created_at < to)
                    .count(),
            })
        })
        .collect();

    DashboardSummary {
        active_vehicles: snapshot.vehicles.iter().filter(|vs| !vs.vehicle.archived).count(),
        active_users: snapshot.users.iter().filter(|u| u.active).count(),
        reservations_this_month: reservations().filter(|r| r.created_at >= this_month).count(),
        reservations_in_progress: reservations()
            .filter(|r| r.is_confirmed() && r.span.contains_instant(now))
            .count(),
        vehicles_in_maintenance: snapshot
            .vehicles
            .iter()
            .filter(|vs| vs.vehicle.status == VehicleStatus::InMaintenance)
            .count(),
        recent_services: snapshot
            .vehicles
            .iter()
            .flat_map(|vs| vs.service_records.iter())
            .filter(|r| r.created_at >= recent_cutoff)
            .count(),
        unresolved_damages: snapshot
            .vehicles
            .iter()
            .flat_map(|vs| vs.damage_records.iter())
            .filter(|r| r.repair_status == RepairStatus::Pending)
            .count(),
        reservation_trend,
    }
}

// ── Utilization ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UtilizationRow {
    pub vehicle_id: Ulid,
    pub label: String,
    pub reserved_hours: f64,
    pub utilization_percent: f64,
    pub reservation_count: usize,
}

/// Share of `range` each non-archived vehicle spent booked, highest first.
/// Only confirmed reservations lying wholly inside the range count.
pub fn vehicle_utilization(snapshot: &FleetSnapshot, range: &DateRange) -> Vec<UtilizationRow> {
    let (from, to) = range.window();
    let total_hours = range.hours();

    let mut rows: Vec<UtilizationRow> = snapshot
        .vehicles
        .iter()
        .filter(|vs| !vs.vehicle.archived)
        .map(|vs| {
            let counted: Vec<&Reservation> = vs
                .reservations
                .iter()
                .filter(|r| r.is_confirmed() && r.span.start >= from && r.span.end < to)
                .collect();
            let hours: f64 = counted.iter().map(|r| r.span.hours()).sum();
            let percent = if total_hours > 0.0 {
                hours / total_hours * 100.0
            } else {
                0.0
            };
            UtilizationRow {
                vehicle_id: vs.vehicle.id,
                label: vs.vehicle.label(),
                reserved_hours: round2(hours),
                utilization_percent: round2(percent),
                reservation_count: counted.len(),
            }
        })
        .collect();
    rows.sort_by(|a, b| {
        b.utilization_percent
            .total_cmp(&a.utilization_percent)
            .then_with(|| a.label.cmp(&b.label))
    });
    rows
}

// ── Costs ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostRow {
    pub vehicle_id: Ulid,
    pub label: String,
    pub service_cost: Decimal,
    pub damage_cost: Decimal,
    pub total_cost: Decimal,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CostSummary {
    pub service_total: Decimal,
    pub damage_total: Decimal,
    pub grand_total: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CostReport {
    pub vehicles: Vec<CostRow>,
    pub summary: CostSummary,
}

/// Service costs and actual repair costs dated within `range`, per
/// non-archived vehicle, most expensive first. Missing costs count as zero.
pub fn cost_analysis(snapshot: &FleetSnapshot, range: &DateRange) -> CostReport {
    let mut summary = CostSummary::default();
    let mut vehicles: Vec<CostRow> = snapshot
        .vehicles
        .iter()
        .filter(|vs| !vs.vehicle.archived)
        .map(|vs| {
            let service_cost: Decimal = vs
                .service_records
                .iter()
                .filter(|r| range.contains(r.service_date))
                .filter_map(|r| r.cost)
                .sum();
            let damage_cost: Decimal = vs
                .damage_records
                .iter()
                .filter(|r| range.contains(r.damage_date))
                .filter_map(|r| r.actual_cost)
                .sum();
            summary.service_total += service_cost;
            summary.damage_total += damage_cost;
            CostRow {
                vehicle_id: vs.vehicle.id,
                label: vs.vehicle.label(),
                service_cost,
                damage_cost,
                total_cost: service_cost + damage_cost,
            }
        })
        .collect();
    summary.grand_total = summary.service_total + summary.damage_total;
    vehicles.sort_by(|a, b| b.total_cost.cmp(&a.total_cost).then_with(|| a.label.cmp(&b.label)));
    CostReport { vehicles, summary }
}

// ── Reservation statistics ───────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusCount {
    pub status: ReservationStatus,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RankedCount {
    pub id: Ulid,
    pub label: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReservationStatistics {
    pub by_status: Vec<StatusCount>,
    pub top_users: Vec<RankedCount>,
    pub top_vehicles: Vec<RankedCount>,
    pub daily: Vec<DailyCount>,
}

fn top_n(counts: HashMap<Ulid, usize>, label: impl Fn(&Ulid) -> String) -> Vec<RankedCount> {
    let mut ranked: Vec<RankedCount> = counts
        .into_iter()
        .map(|(id, count)| RankedCount {
            label: label(&id),
            id,
            count,
        })
        .collect();
    ranked.sort_by(|a, b| {
        b.count
            .cmp(&a.count)
            .then_with(|| a.label.cmp(&b.label))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.truncate(TOP_N);
    ranked
}

/// Breakdowns of reservations by creation date. With no `range` the status
/// and top lists cover every reservation while the daily series covers the
/// trailing [`TRAILING_DAYS`] days ending `today`.
pub fn reservation_statistics(
    snapshot: &FleetSnapshot,
    range: Option<&DateRange>,
    today: NaiveDate,
) -> ReservationStatistics {
    let created_in = |r: &Reservation, range: &DateRange| {
        let (from, to) = range.window();
        r.created_at >= from && r.created_at < to
    };
    let selected: Vec<&Reservation> = snapshot
        .vehicles
        .iter()
        .flat_map(|vs| vs.reservations.iter())
        .filter(|r| range.is_none_or(|range| created_in(*r, range)))
        .collect();

    let by_status = ReservationStatus::ALL
        .iter()
        .map(|&status| StatusCount {
            status,
            count: selected.iter().filter(|r| r.status == status).count(),
        })
        .collect();

    let mut per_user: HashMap<Ulid, usize> = HashMap::new();
    let mut per_vehicle: HashMap<Ulid, usize> = HashMap::new();
    for r in &selected {
        *per_user.entry(r.user_id).or_default() += 1;
        *per_vehicle.entry(r.vehicle_id).or_default() += 1;
    }
    let user_names: HashMap<Ulid, &str> = snapshot
        .users
        .iter()
        .map(|u| (u.id, u.full_name.as_str()))
        .collect();
    let vehicle_labels: HashMap<Ulid, String> = snapshot
        .vehicles
        .iter()
        .map(|vs| (vs.vehicle.id, vs.vehicle.label()))
        .collect();
    let top_users = top_n(per_user, |id| {
        user_names
            .get(id)
            .map_or_else(|| id.to_string(), |name| (*name).to_string())
    });
    let top_vehicles = top_n(per_vehicle, |id| {
        vehicle_labels.get(id).cloned().unwrap_or_else(|| id.to_string())
    });

    let daily_range = range
        .copied()
        .unwrap_or_else(|| DateRange::trailing_days(today, TRAILING_DAYS));
    let mut per_day: HashMap<NaiveDate, usize> = HashMap::new();
    for r in snapshot.vehicles.iter().flat_map(|vs| vs.reservations.iter()) {
        let day = r.created_at.date_naive();
        if daily_range.contains(day) {
            *per_day.entry(day).or_default() += 1;
        }
    }
    let daily = daily_range
        .days()
        .map(|date| DailyCount {
            date,
            count: per_day.get(&date).copied().unwrap_or(0),
        })
        .collect();

    ReservationStatistics {
        by_status,
        top_users,
        top_vehicles,
        daily,
    }
}
