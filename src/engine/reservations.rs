use std::time::Instant;

use chrono::{NaiveDate, TimeDelta};
use tracing::{debug, info};
use ulid::Ulid;

use crate::identity::Caller;
use crate::limits::*;
use crate::model::*;
use crate::observability;

use super::conflict::{check_no_conflict, validate_window};
use super::{Engine, EngineError};

/// Non-administrators cannot touch a reservation this close to its start.
pub const EDIT_LOCK_HOURS: i64 = 2;

fn edit_lock() -> TimeDelta {
    TimeDelta::hours(EDIT_LOCK_HOURS)
}

/// Ownership and edit-lock gate shared by update and cancel.
fn authorize_change(
    caller: &Caller,
    reservation: &Reservation,
    now: Timestamp,
) -> Result<(), EngineError> {
    if caller.is_admin() {
        return Ok(());
    }
    if reservation.user_id != caller.user_id {
        return Err(EngineError::Forbidden("reservation belongs to another user"));
    }
    let lead = reservation.span.start - now;
    if lead < edit_lock() {
        debug!(reservation = %reservation.id, lead_minutes = lead.num_minutes(), "edit lock");
        return Err(EngineError::EditWindow {
            starts_in_minutes: lead.num_minutes(),
        });
    }
    Ok(())
}

fn validate_passengers(count: u32) -> Result<u32, EngineError> {
    if count == 0 {
        return Err(EngineError::validation("at least one passenger is required"));
    }
    if count > MAX_PASSENGERS {
        return Err(EngineError::validation(format!(
            "more than {MAX_PASSENGERS} passengers"
        )));
    }
    Ok(count)
}

/// Admin notes are never shown to members.
fn visible_to(caller: &Caller, mut reservation: Reservation) -> Reservation {
    if !caller.is_admin() {
        reservation.admin_notes = None;
    }
    reservation
}

impl Engine {
    /// The traveller a new reservation is booked for: the caller, or, for an
    /// administrator, any active user.
    fn resolve_target_user(
        &self,
        caller: &Caller,
        target: Option<Ulid>,
    ) -> Result<Ulid, EngineError> {
        let Some(user_id) = target.filter(|id| *id != caller.user_id) else {
            return Ok(caller.user_id);
        };
        if !caller.is_admin() {
            return Err(EngineError::Forbidden(
                "only administrators can book for another user",
            ));
        }
        let user = self
            .store()
            .user(&user_id)
            .ok_or(EngineError::not_found("user", user_id))?;
        if !user.active {
            return Err(EngineError::validation("cannot book for a deactivated user"));
        }
        Ok(user_id)
    }

    pub async fn create_reservation(
        &self,
        caller: &Caller,
        request: NewReservation,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.create_reservation_inner(caller, request).await;
        observability::record_operation("create_reservation", started, &result);
        result
    }

    async fn create_reservation_inner(
        &self,
        caller: &Caller,
        request: NewReservation,
    ) -> Result<Reservation, EngineError> {
        caller.ensure_active()?;
        let now = self.now();
        let span = validate_window(request.start, request.end, now)?;
        let purpose = required_text("purpose", &request.purpose, MAX_TEXT_LEN)?;
        let destination = required_text("destination", &request.destination, MAX_TEXT_LEN)?;
        let passenger_count = validate_passengers(request.passenger_count)?;
        let user_notes = optional_text("user notes", request.user_notes, MAX_NOTES_LEN)?;
        let admin_notes = if caller.is_admin() {
            optional_text("admin notes", request.admin_notes, MAX_NOTES_LEN)?
        } else {
            None
        };

        let _gate = self.write_gate.read().await;
        let mut guard = self.vehicle_write(&request.vehicle_id).await?;
        if !guard.vehicle.is_bookable() {
            return Err(EngineError::Unavailable(request.vehicle_id));
        }
        let user_id = self.resolve_target_user(caller, request.user_id)?;
        check_no_conflict(&guard, &span, None)?;

        let reservation = Reservation {
            id: Ulid::new(),
            user_id,
            vehicle_id: request.vehicle_id,
            span,
            purpose,
            destination,
            passenger_count,
            user_notes,
            admin_notes,
            status: ReservationStatus::Confirmed,
            created_at: now,
            updated_at: now,
        };
        let event = Event::ReservationSaved {
            reservation: reservation.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(
            reservation = %reservation.id,
            vehicle = %reservation.vehicle_id,
            user = %reservation.user_id,
            "reservation created"
        );
        Ok(reservation)
    }

    pub async fn update_reservation(
        &self,
        caller: &Caller,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.update_reservation_inner(caller, id, patch).await;
        observability::record_operation("update_reservation", started, &result);
        result
    }

    async fn update_reservation_inner(
        &self,
        caller: &Caller,
        id: Ulid,
        patch: ReservationPatch,
    ) -> Result<Reservation, EngineError> {
        caller.ensure_active()?;
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_entity_write("reservation", &id).await?;
        let current = guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::not_found("reservation", id))?;
        let now = self.now();
        authorize_change(caller, &current, now)?;

        let mut next = current.clone();
        if let Some(purpose) = patch.purpose {
            next.purpose = required_text("purpose", &purpose, MAX_TEXT_LEN)?;
        }
        if let Some(destination) = patch.destination {
            next.destination = required_text("destination", &destination, MAX_TEXT_LEN)?;
        }
        if let Some(count) = patch.passenger_count {
            next.passenger_count = validate_passengers(count)?;
        }
        if patch.user_notes.is_some() {
            next.user_notes = optional_text("user notes", patch.user_notes, MAX_NOTES_LEN)?;
        }

        if caller.is_admin() {
            if patch.admin_notes.is_some() {
                next.admin_notes = optional_text("admin notes", patch.admin_notes, MAX_NOTES_LEN)?;
            }
            if let Some(status) = patch.status {
                if status != current.status && current.status.is_terminal() {
                    return Err(EngineError::validation(
                        "cancelled or completed reservations cannot change status",
                    ));
                }
                next.status = status;
            }
            if let Some(user_id) = patch.user_id
                && user_id != current.user_id
            {
                if self.store().user(&user_id).is_none() {
                    return Err(EngineError::not_found("user", user_id));
                }
                next.user_id = user_id;
            }
        }

        let start = patch.start.unwrap_or(current.span.start);
        let end = patch.end.unwrap_or(current.span.end);
        if start != current.span.start || end != current.span.end {
            next.span = validate_window(start, end, now)?;
            if next.is_confirmed() {
                check_no_conflict(&guard, &next.span, Some(id))?;
            }
        }

        if next == current {
            return Ok(visible_to(caller, current));
        }
        next.updated_at = now;
        let event = Event::ReservationSaved {
            reservation: next.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(reservation = %id, status = ?next.status, "reservation updated");
        Ok(visible_to(caller, next))
    }

    /// Cancel a reservation. Cancelling one that is already cancelled or
    /// completed succeeds without writing anything.
    pub async fn cancel_reservation(
        &self,
        caller: &Caller,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        let started = Instant::now();
        let result = self.cancel_reservation_inner(caller, id).await;
        observability::record_operation("cancel_reservation", started, &result);
        result
    }

    async fn cancel_reservation_inner(
        &self,
        caller: &Caller,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        caller.ensure_active()?;
        let _gate = self.write_gate.read().await;
        let mut guard = self.resolve_entity_write("reservation", &id).await?;
        let current = guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::not_found("reservation", id))?;
        let now = self.now();
        authorize_change(caller, &current, now)?;

        if current.status.is_terminal() {
            debug!(reservation = %id, status = ?current.status, "cancel on terminal reservation");
            return Ok(visible_to(caller, current));
        }

        let mut next = current;
        next.status = ReservationStatus::Cancelled;
        next.updated_at = now;
        let event = Event::ReservationSaved {
            reservation: next.clone(),
        };
        self.persist_and_apply(&mut guard, &event).await?;
        info!(reservation = %id, "reservation cancelled");
        Ok(visible_to(caller, next))
    }

    pub async fn get_reservation(
        &self,
        caller: &Caller,
        id: Ulid,
    ) -> Result<Reservation, EngineError> {
        caller.ensure_active()?;
        let shared = self
            .store()
            .vehicle_for_entity(&id)
            .and_then(|vehicle_id| self.store().vehicle(&vehicle_id))
            .ok_or(EngineError::not_found("reservation", id))?;
        let guard = shared.read().await;
        let reservation = guard
            .reservation(&id)
            .cloned()
            .ok_or(EngineError::not_found("reservation", id))?;
        if !caller.is_admin() && reservation.user_id != caller.user_id {
            return Err(EngineError::Forbidden("reservation belongs to another user"));
        }
        Ok(visible_to(caller, reservation))
    }

    /// Reservations matching `filter`, latest start first. Members only see
    /// their own.
    pub async fn list_reservations(
        &self,
        caller: &Caller,
        filter: ReservationFilter,
    ) -> Result<Vec<Reservation>, EngineError> {
        caller.ensure_active()?;
        if let (Some(from), Some(to)) = (filter.from, filter.to)
            && to < from
        {
            return Err(EngineError::validation("'to' date is before 'from' date"));
        }
        let from = filter.from.map(start_of_day);
        let to = filter.to.and_then(end_of_day);

        let vehicles = match filter.vehicle_id {
            Some(vehicle_id) => self.store().vehicle(&vehicle_id).into_iter().collect(),
            None => self.store().all_vehicles(),
        };
        let mut out = Vec::new();
        for shared in vehicles {
            let guard = shared.read().await;
            out.extend(
                guard
                    .reservations
                    .iter()
                    .filter(|r| caller.is_admin() || r.user_id == caller.user_id)
                    .filter(|r| filter.status.is_none_or(|s| r.status == s))
                    .filter(|r| from.is_none_or(|f| r.span.start >= f))
                    .filter(|r| to.is_none_or(|t| r.span.end < t))
                    .cloned()
                    .map(|r| visible_to(caller, r)),
            );
        }
        out.sort_by(|a, b| b.span.start.cmp(&a.span.start).then(a.id.cmp(&b.id)));
        Ok(out)
    }

    /// Confirmed reservations on every vehicle starting within the days
    /// `from..=to`, earliest first.
    pub async fn calendar(
        &self,
        caller: &Caller,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Reservation>, EngineError> {
        caller.ensure_active()?;
        if to < from {
            return Err(EngineError::validation("'to' date is before 'from' date"));
        }
        let start = start_of_day(from);
        let end = end_of_day(to).ok_or(EngineError::validation("date out of range"))?;
        if end - start > max_query_window() {
            return Err(EngineError::validation("calendar range too wide"));
        }

        let mut out = Vec::new();
        for shared in self.store().all_vehicles() {
            let guard = shared.read().await;
            let first = guard.reservations.partition_point(|r| r.span.start < start);
            out.extend(
                guard.reservations[first..]
                    .iter()
                    .take_while(|r| r.span.start < end)
                    .filter(|r| r.is_confirmed())
                    .cloned()
                    .map(|r| visible_to(caller, r)),
            );
        }
        out.sort_by(|a, b| a.span.start.cmp(&b.span.start).then(a.id.cmp(&b.id)));
        Ok(out)
    }
}
