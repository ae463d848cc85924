use tracing::debug;
use ulid::Ulid;

use crate::limits::max_reservation_span;
use crate::model::*;
use crate::observability;

use super::{Engine, EngineError};

/// Confirmed reservations of `vs` overlapping `window`, optionally
/// ignoring one reservation (an update checking against everything but
/// itself). Cancelled and completed reservations never conflict.
pub fn conflicting_reservations(
    vs: &VehicleState,
    window: &Span,
    exclude: Option<Ulid>,
) -> Vec<Reservation> {
    vs.overlapping(window)
        .filter(|r| r.is_confirmed())
        .filter(|r| Some(r.id) != exclude)
        .filter(|r| window.overlaps(&r.span))
        .cloned()
        .collect()
}

pub(crate) fn check_no_conflict(
    vs: &VehicleState,
    window: &Span,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match conflicting_reservations(vs, window, exclude).first() {
        Some(hit) => {
            metrics::counter!(observability::CONFLICTS_REJECTED_TOTAL).increment(1);
            debug!(vehicle = %vs.vehicle.id, conflicting = %hit.id, "booking window overlaps");
            Err(EngineError::Conflict(hit.id))
        }
        None => Ok(()),
    }
}

/// Validate a booking window: strictly ordered, not starting in the past,
/// no longer than the booking limit.
pub(crate) fn validate_window(
    start: Timestamp,
    end: Timestamp,
    now: Timestamp,
) -> Result<Span, EngineError> {
    if start >= end {
        return Err(EngineError::validation("end time must be after start time"));
    }
    if start < now {
        return Err(EngineError::validation("reservation cannot start in the past"));
    }
    if end - start > max_reservation_span() {
        return Err(EngineError::validation("reservation window too long"));
    }
    Ok(Span::new(start, end))
}

impl Engine {
    /// Confirmed reservations on `vehicle_id` overlapping `[start, end)`.
    pub async fn find_conflicts(
        &self,
        vehicle_id: Ulid,
        start: Timestamp,
        end: Timestamp,
        exclude: Option<Ulid>,
    ) -> Result<Vec<Reservation>, EngineError> {
        if start >= end {
            return Err(EngineError::validation("end time must be after start time"));
        }
        let shared = self
            .store()
            .vehicle(&vehicle_id)
            .ok_or(EngineError::not_found("vehicle", vehicle_id))?;
        let guard = shared.read().await;
        Ok(conflicting_reservations(&guard, &Span::new(start, end), exclude))
    }
}
