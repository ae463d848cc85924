use std::time::Instant;

use chrono::TimeDelta;
use ulid::Ulid;

use crate::identity::Caller;
use crate::limits::{max_query_window, max_reservation_span};
use crate::model::*;
use crate::observability;

use super::conflict::conflicting_reservations;
use super::{Engine, EngineError};

/// Bookability of one vehicle over one window. `create_reservation` applies
/// the same two rules and the same length cap, so a window reported
/// available is one it accepts (past starts aside).
pub(crate) fn resolve_availability(vs: &VehicleState, window: &Span) -> Availability {
    let conflicts = conflicting_reservations(vs, window, None);
    Availability {
        available: vs.vehicle.is_bookable() && conflicts.is_empty(),
        conflicts,
    }
}

/// Free sub-windows of `query`: the query minus every confirmed reservation.
pub(crate) fn free_windows(vs: &VehicleState, query: &Span) -> Vec<Span> {
    if !vs.vehicle.is_bookable() {
        return Vec::new();
    }
    let busy: Vec<Span> = vs
        .overlapping(query)
        .filter(|r| r.is_confirmed())
        .map(|r| r.span)
        .collect();
    // `overlapping` yields in start order, so `busy` is already sorted.
    subtract_intervals(&[*query], &merge_overlapping(&busy))
}

/// Merge sorted overlapping/adjacent intervals into disjoint intervals.
pub fn merge_overlapping(sorted: &[Span]) -> Vec<Span> {
    let mut merged: Vec<Span> = Vec::new();
    for &span in sorted {
        if let Some(last) = merged.last_mut()
            && span.start <= last.end
        {
            last.end = last.end.max(span.end);
            continue;
        }
        merged.push(span);
    }
    merged
}

/// Remove sorted, disjoint `to_remove` spans from sorted `base` spans.
pub fn subtract_intervals(base: &[Span], to_remove: &[Span]) -> Vec<Span> {
    let mut result = Vec::new();
    let mut ri = 0;

    for &b in base {
        let mut current_start = b.start;
        let current_end = b.end;

        while ri < to_remove.len() && to_remove[ri].end <= current_start {
            ri += 1;
        }

        let mut j = ri;
        while j < to_remove.len() && to_remove[j].start < current_end {
            let r = &to_remove[j];
            if r.start > current_start {
                result.push(Span::new(current_start, r.start));
            }
            current_start = current_start.max(r.end);
            j += 1;
        }

        if current_start < current_end {
            result.push(Span::new(current_start, current_end));
        }
    }

    result
}

fn validate_query(start: Timestamp, end: Timestamp, widest: TimeDelta) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::validation("end time must be after start time"));
    }
    if end - start > widest {
        return Err(EngineError::validation("query window too wide"));
    }
    Ok(Span::new(start, end))
}

impl Engine {
    /// Whether `vehicle_id` can be booked for `[start, end)`, with the
    /// confirmed reservations standing in the way.
    pub async fn is_available(
        &self,
        caller: &Caller,
        vehicle_id: Ulid,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Availability, EngineError> {
        let started = Instant::now();
        let result: Result<Availability, EngineError> = async {
            caller.ensure_active()?;
            let window = validate_query(start, end, max_reservation_span())?;
            let shared = self
                .store()
                .vehicle(&vehicle_id)
                .ok_or(EngineError::not_found("vehicle", vehicle_id))?;
            let guard = shared.read().await;
            Ok(resolve_availability(&guard, &window))
        }
        .await;
        observability::record_operation("is_available", started, &result);
        result
    }

    /// The parts of `[start, end)` in which `vehicle_id` is free to book.
    pub async fn free_windows(
        &self,
        caller: &Caller,
        vehicle_id: Ulid,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Vec<Span>, EngineError> {
        caller.ensure_active()?;
        let query = validate_query(start, end, max_query_window())?;
        let shared = self
            .store()
            .vehicle(&vehicle_id)
            .ok_or(EngineError::not_found("vehicle", vehicle_id))?;
        let guard = shared.read().await;
        Ok(free_windows(&guard, &query))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(hour: u32) -> Timestamp {
        Utc.with_ymd_and_hms(2030, 3, 4, hour, 0, 0).unwrap()
    }

    fn s(start: u32, end: u32) -> Span {
        Span::new(at(start), at(end))
    }

    #[test]
    fn merge_joins_overlapping_and_adjacent() {
        let merged = merge_overlapping(&[s(1, 3), s(2, 4), s(4, 5), s(7, 8)]);
        assert_eq!(merged, vec![s(1, 5), s(7, 8)]);
    }

    #[test]
    fn merge_empty() {
        assert!(merge_overlapping(&[]).is_empty());
    }

    #[test]
    fn subtract_punches_holes() {
        let free = subtract_intervals(&[s(8, 18)], &[s(9, 10), s(12, 14)]);
        assert_eq!(free, vec![s(8, 9), s(10, 12), s(14, 18)]);
    }

    #[test]
    fn subtract_covering_removal_leaves_nothing() {
        assert!(subtract_intervals(&[s(9, 10)], &[s(8, 12)]).is_empty());
    }

    #[test]
    fn subtract_over_edges() {
        let free = subtract_intervals(&[s(8, 12)], &[s(6, 9), s(11, 13)]);
        assert_eq!(free, vec![s(9, 11)]);
    }

    #[test]
    fn subtract_multiple_bases() {
        let free = subtract_intervals(&[s(1, 3), s(5, 9)], &[s(2, 6)]);
        assert_eq!(free, vec![s(1, 2), s(6, 9)]);
    }
}
