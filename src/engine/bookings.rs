use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::calendar::{check_no_conflict, validate_instant, validate_span};
use super::deposit::evaluate;
use super::{Engine, EngineError};

impl Engine {
    /// Create a booking. The overlap check, WAL append and calendar insert
    /// all run under the professional's write guard, so of two requests
    /// racing for one interval exactly one commits; the other gets
    /// `SlotConflict` and must re-list slots.
    pub async fn create_booking(&self, ctx: &RequestContext, req: NewBooking) -> Result<Booking, EngineError> {
        if let Some(ref n) = req.notes
            && n.len() > MAX_NOTES_LEN
        {
            return Err(EngineError::LimitExceeded("booking notes too long"));
        }
        let service = self.get_service(&req.service_id)?;
        let cal = self
            .get_calendar(&req.professional_id)
            .ok_or(EngineError::NotFound(req.professional_id))?;

        validate_instant(req.start)?;
        let end = req.start + service.duration_ms();
        if let Some(given) = req.end
            && given != end
        {
            return Err(EngineError::validation(format!(
                "end must equal start + {} minutes",
                service.duration_min
            )));
        }
        let span = Span { start: req.start, end };
        validate_span(&span)?;
        if span.start < ctx.now && !req.allow_past {
            return Err(EngineError::validation(
                "start is in the past; set allow_past to backfill",
            ));
        }

        let deposit = evaluate(&service, &self.customer_history(&req.customer_id), span.start, ctx.now)?;
        let status = if deposit.required {
            BookingStatus::Pending
        } else {
            BookingStatus::Confirmed
        };

        let mut guard = cal.write().await;
        if !guard.professional.offers(&req.service_id) {
            return Err(EngineError::validation(format!(
                "service {} is not offered by professional {}",
                req.service_id, req.professional_id
            )));
        }
        if self.bookings.contains_key(&req.id) || self.sales.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        if guard.intervals.len() >= MAX_BOOKINGS_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many bookings on professional"));
        }
        if let Err(e) = check_no_conflict(&guard, &span) {
            metrics::counter!(crate::observability::SLOT_CONFLICTS_TOTAL).increment(1);
            tracing::debug!(professional = %req.professional_id, start = span.start, "booking rejected: {e}");
            return Err(e);
        }

        let booking = Booking {
            id: req.id,
            professional_id: req.professional_id,
            service_id: req.service_id,
            customer_id: req.customer_id,
            span,
            status,
            deposit_required: deposit.required,
            deposit_amount: deposit.amount,
            price: service.price,
            notes: req.notes,
            created_at: ctx.now,
        };
        let event = Event::BookingCreated(booking.clone());
        self.commit(&event, || self.index_booking(&mut guard, booking.clone()))
            .await?;

        metrics::counter!(crate::observability::BOOKINGS_CREATED_TOTAL, "status" => status.as_str())
            .increment(1);
        tracing::info!(
            booking = %booking.id,
            professional = %booking.professional_id,
            status = status.as_str(),
            backfill = span.start < ctx.now,
            "booking created"
        );
        Ok(booking)
    }

    /// Explicit `pending → confirmed`. Refused while the completed deposit
    /// payments fall short of the deposit.
    pub async fn confirm_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let lock = Self::lock_for(&self.target_locks, &id);
        let _target = lock.lock().await;
        self.transition_booking(id, BookingStatus::Confirmed, |b| {
            if b.deposit_required {
                let paid = self.completed_paid(&b.id);
                if paid < b.deposit_amount {
                    return Err(EngineError::PolicyViolation(format!(
                        "deposit of {} required, {} paid",
                        b.deposit_amount, paid
                    )));
                }
            }
            Ok(())
        })
        .await
    }

    /// `confirmed → completed`, only once the appointment has ended.
    pub async fn complete_booking(&self, ctx: &RequestContext, id: Ulid) -> Result<Booking, EngineError> {
        let now = ctx.now;
        self.transition_booking(id, BookingStatus::Completed, |b| {
            if now < b.span.end {
                return Err(EngineError::validation(format!(
                    "booking {} has not ended yet",
                    b.id
                )));
            }
            Ok(())
        })
        .await
    }

    /// Cancel and release the interval. Cancelling twice is a no-op.
    pub async fn cancel_booking(&self, id: Ulid) -> Result<Booking, EngineError> {
        let current = self.get_booking(&id)?;
        if current.status == BookingStatus::Cancelled {
            return Ok(current);
        }
        match self.transition_booking(id, BookingStatus::Cancelled, |_| Ok(())).await {
            // Lost a race with another cancel.
            Err(EngineError::InvalidTransition { from: "cancelled", .. }) => self.get_booking(&id),
            other => other,
        }
    }

    /// Status changes run under the calendar write guard, which is also
    /// where every status read that matters happens.
    async fn transition_booking(
        &self,
        id: Ulid,
        to: BookingStatus,
        check: impl FnOnce(&Booking) -> Result<(), EngineError>,
    ) -> Result<Booking, EngineError> {
        let professional_id = self.get_booking(&id)?.professional_id;
        let cal = self
            .get_calendar(&professional_id)
            .ok_or(EngineError::NotFound(professional_id))?;
        let mut guard = cal.write().await;

        let current = self.get_booking(&id)?;
        if !current.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status.as_str(),
                to: to.as_str(),
            });
        }
        check(&current)?;

        let event = Event::BookingStatusChanged { id, professional_id, status: to };
        self.commit(&event, || self.apply_booking_status(&mut guard, id, to))
            .await?;
        tracing::info!(booking = %id, from = current.status.as_str(), to = to.as_str(), "booking transition");
        self.get_booking(&id)
    }

    /// Bookings ordered by start; all professionals when `professional_id` is `None`.
    pub fn list_bookings(&self, professional_id: Option<Ulid>) -> Result<Vec<Booking>, EngineError> {
        if let Some(pid) = professional_id
            && !self.calendars.contains_key(&pid)
        {
            return Err(EngineError::NotFound(pid));
        }
        let mut out: Vec<Booking> = self
            .bookings
            .iter()
            .filter(|e| professional_id.is_none_or(|pid| e.professional_id == pid))
            .map(|e| e.value().clone())
            .collect();
        out.sort_by_key(|b| (b.span.start, b.id));
        Ok(out)
    }
}
