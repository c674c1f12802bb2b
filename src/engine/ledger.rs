use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::catalog::check_money;
use super::{Engine, EngineError};

/// Balance a payment target can still absorb.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetBalance {
    pub total: Decimal,
    /// Pending + completed payments.
    pub held: Decimal,
    pub completed: Decimal,
}

impl TargetBalance {
    pub fn remaining(&self) -> Decimal {
        (self.total - self.held).max(Decimal::ZERO)
    }
}

pub(crate) fn check_stats_range(start: NaiveDate, end: NaiveDate) -> Result<(), EngineError> {
    if end < start {
        return Err(EngineError::validation("range end is before its start"));
    }
    if (end - start).num_days() + 1 > MAX_STATS_RANGE_DAYS {
        return Err(EngineError::LimitExceeded("stats range too long"));
    }
    Ok(())
}

fn method_totals(totals: &BTreeMap<PaymentMethod, Decimal>) -> Vec<(PaymentMethod, Decimal)> {
    PaymentMethod::ALL
        .iter()
        .map(|m| (*m, totals.get(m).copied().unwrap_or_default()))
        .collect()
}

#[derive(Default)]
struct DayBucket {
    revenue: Decimal,
    tips: Decimal,
    per_method: BTreeMap<PaymentMethod, Decimal>,
    count: u32,
}

impl DayBucket {
    fn add(&mut self, p: &Payment) {
        self.revenue += p.amount;
        self.tips += p.tip;
        *self.per_method.entry(p.method).or_default() += p.amount;
        self.count += 1;
    }

    fn into_stats(self, date: NaiveDate) -> DailyStats {
        DailyStats {
            date,
            total_revenue: self.revenue,
            total_tips: self.tips,
            per_method: method_totals(&self.per_method),
            payment_count: self.count,
        }
    }
}

impl Engine {
    pub(super) fn payments_for(&self, target_id: &Ulid) -> Vec<Payment> {
        self.payments_by_target
            .get(target_id)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.payments.get(id).map(|p| p.value().clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(super) fn completed_paid(&self, target_id: &Ulid) -> Decimal {
        self.payments_for(target_id)
            .iter()
            .filter(|p| p.status == PaymentStatus::Completed)
            .map(|p| p.amount)
            .sum()
    }

    fn resolve_target(&self, id: Ulid) -> Result<(PaymentTarget, Decimal), EngineError> {
        if let Some(b) = self.bookings.get(&id) {
            return Ok((PaymentTarget::Booking(id), b.price));
        }
        if let Some(s) = self.sales.get(&id) {
            return Ok((PaymentTarget::Sale(id), s.total));
        }
        Err(EngineError::NotFound(id))
    }

    pub fn target_balance(&self, target_id: Ulid) -> Result<TargetBalance, EngineError> {
        let (_, total) = self.resolve_target(target_id)?;
        let payments = self.payments_for(&target_id);
        Ok(TargetBalance {
            total,
            held: payments
                .iter()
                .filter(|p| p.status.holds_balance())
                .map(|p| p.amount)
                .sum(),
            completed: payments
                .iter()
                .filter(|p| p.status == PaymentStatus::Completed)
                .map(|p| p.amount)
                .sum(),
        })
    }

    /// Record a payment against a booking or a sale.
    ///
    /// Read-validate-write of the target's balance is serialized by the
    /// target lock. For bookings the calendar guard is taken too (target
    /// first), so a completed payment that covers the deposit confirms the
    /// booking in the same critical section.
    pub async fn record_payment(&self, ctx: &RequestContext, req: NewPayment) -> Result<Payment, EngineError> {
        if req.amount <= Decimal::ZERO {
            return Err(EngineError::validation("amount must be positive"));
        }
        check_money(req.amount, "amount")?;
        check_money(req.tip, "tip")?;
        check_money(req.tax, "tax")?;
        check_money(req.discount, "discount")?;
        let transaction_id = req.transaction_id.filter(|t| !t.trim().is_empty());
        if req.method.requires_reference() && transaction_id.is_none() {
            return Err(EngineError::validation(format!(
                "transaction id required for {} payments",
                req.method.as_str()
            )));
        }
        if transaction_id.as_ref().is_some_and(|t| t.len() > MAX_TRANSACTION_ID_LEN) {
            return Err(EngineError::LimitExceeded("transaction id too long"));
        }
        if !matches!(req.status, PaymentStatus::Pending | PaymentStatus::Completed) {
            return Err(EngineError::validation("a new payment is either pending or completed"));
        }
        let paid_at = req.paid_at.unwrap_or(ctx.now);
        if !(MIN_VALID_TIMESTAMP_MS..=MAX_VALID_TIMESTAMP_MS).contains(&paid_at) {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }

        let (target, _) = self.resolve_target(req.target_id)?;
        let lock = Self::lock_for(&self.target_locks, &req.target_id);
        let _target = lock.lock().await;

        let cal = match target {
            PaymentTarget::Booking(bid) => {
                let pid = self.get_booking(&bid)?.professional_id;
                Some(self.get_calendar(&pid).ok_or(EngineError::NotFound(pid))?)
            }
            PaymentTarget::Sale(_) => None,
        };
        let mut cal_guard = match &cal {
            Some(c) => Some(c.write().await),
            None => None,
        };

        if self.payments.contains_key(&req.id) {
            return Err(EngineError::AlreadyExists(req.id));
        }
        let booking = match target {
            PaymentTarget::Booking(bid) => {
                let b = self.get_booking(&bid)?;
                if b.status == BookingStatus::Cancelled {
                    return Err(EngineError::validation(format!("booking {bid} is cancelled")));
                }
                Some(b)
            }
            PaymentTarget::Sale(_) => None,
        };

        let balance = self.target_balance(req.target_id)?;
        let remaining = balance.remaining();
        if req.amount > remaining {
            tracing::warn!(payment_target = %req.target_id, requested = %req.amount, %remaining, "payment rejected: overpayment");
            return Err(EngineError::Overpayment {
                requested: req.amount,
                remaining,
            });
        }
        let awaiting_deposit = booking
            .as_ref()
            .filter(|b| b.status == BookingStatus::Pending && b.deposit_required);
        if !self.policy.partial_payments && req.amount != remaining {
            let deposit_due = awaiting_deposit.map(|b| (b.deposit_amount - balance.held).max(Decimal::ZERO));
            if deposit_due != Some(req.amount) {
                return Err(EngineError::PolicyViolation(format!(
                    "partial payments are disabled; {remaining} outstanding"
                )));
            }
        }

        let payment = Payment {
            id: req.id,
            target,
            amount: req.amount,
            tip: req.tip,
            tax: req.tax,
            discount: req.discount,
            method: req.method,
            status: req.status,
            transaction_id,
            paid_at,
        };
        let event = Event::PaymentRecorded(payment.clone());
        self.commit(&event, || self.index_payment(payment.clone())).await?;
        metrics::counter!(crate::observability::PAYMENTS_RECORDED_TOTAL, "method" => payment.method.as_str())
            .increment(1);
        tracing::info!(
            payment = %payment.id,
            payment_target = %payment.target.id(),
            kind = payment.target.kind(),
            amount = %payment.amount,
            "payment recorded"
        );

        if let (Some(b), Some(guard)) = (awaiting_deposit, cal_guard.as_mut())
            && payment.status == PaymentStatus::Completed
            && balance.completed + payment.amount >= b.deposit_amount
        {
            let event = Event::BookingStatusChanged {
                id: b.id,
                professional_id: b.professional_id,
                status: BookingStatus::Confirmed,
            };
            self.commit(&event, || self.apply_booking_status(guard, b.id, BookingStatus::Confirmed))
                .await?;
            tracing::info!(booking = %b.id, "deposit covered, booking confirmed");
        }
        Ok(payment)
    }

    /// `pending → completed | cancelled`, `completed → refunded`.
    pub async fn update_payment_status(&self, id: Ulid, to: PaymentStatus) -> Result<Payment, EngineError> {
        let target_id = self.get_payment(&id)?.target.id();
        let lock = Self::lock_for(&self.target_locks, &target_id);
        let _target = lock.lock().await;

        let booking = self.bookings.get(&target_id).map(|b| b.value().clone());
        let cal = match &booking {
            Some(b) => Some(
                self.get_calendar(&b.professional_id)
                    .ok_or(EngineError::NotFound(b.professional_id))?,
            ),
            None => None,
        };
        let mut cal_guard = match &cal {
            Some(c) => Some(c.write().await),
            None => None,
        };

        let current = self.get_payment(&id)?;
        if !current.status.can_transition_to(to) {
            return Err(EngineError::InvalidTransition {
                id,
                from: current.status.as_str(),
                to: to.as_str(),
            });
        }
        let completed_before = self.completed_paid(&target_id);

        let event = Event::PaymentStatusChanged { id, status: to };
        self.commit(&event, || self.apply_payment_status(id, to)).await?;
        tracing::info!(payment = %id, from = current.status.as_str(), to = to.as_str(), "payment transition");

        // Status is re-read under the calendar guard: a cancel may have won.
        let awaiting = booking
            .and_then(|b| self.get_booking(&b.id).ok())
            .filter(|b| b.status == BookingStatus::Pending && b.deposit_required);
        if let (Some(b), Some(guard)) = (awaiting, cal_guard.as_mut())
            && to == PaymentStatus::Completed
            && completed_before + current.amount >= b.deposit_amount
        {
            let event = Event::BookingStatusChanged {
                id: b.id,
                professional_id: b.professional_id,
                status: BookingStatus::Confirmed,
            };
            self.commit(&event, || self.apply_booking_status(guard, b.id, BookingStatus::Confirmed))
                .await?;
            tracing::info!(booking = %b.id, "deposit covered, booking confirmed");
        }
        self.get_payment(&id)
    }

    pub fn list_payments(&self, target_id: Option<Ulid>) -> Vec<Payment> {
        let mut out = match target_id {
            Some(t) => self.payments_for(&t),
            None => self.payments.iter().map(|e| e.value().clone()).collect(),
        };
        out.sort_by_key(|p| (p.paid_at, p.id));
        out
    }

    /// Completed payments by `paid_at` day within `span`. Pure projection
    /// over the payment log.
    fn bucket_days(&self, span: &Span) -> BTreeMap<NaiveDate, DayBucket> {
        let mut days: BTreeMap<NaiveDate, DayBucket> = BTreeMap::new();
        for entry in self.payments.iter() {
            let p = entry.value();
            if p.status != PaymentStatus::Completed || !span.contains_instant(p.paid_at) {
                continue;
            }
            if let Some(date) = date_of(p.paid_at) {
                days.entry(date).or_default().add(p);
            }
        }
        days
    }

    pub fn daily_stats(&self, date: NaiveDate) -> DailyStats {
        self.bucket_days(&day_span(date))
            .remove(&date)
            .unwrap_or_default()
            .into_stats(date)
    }

    /// Per-day series over `start..=end` (zero-filled), method breakdown,
    /// tips and the commissions the range's attributed revenue earns.
    pub fn period_stats(&self, start: NaiveDate, end: NaiveDate) -> Result<PeriodStats, EngineError> {
        check_stats_range(start, end)?;
        let span = days_span(start, end);
        let mut buckets = self.bucket_days(&span);

        let mut per_method: BTreeMap<PaymentMethod, Decimal> = BTreeMap::new();
        let mut days = Vec::new();
        let (mut total_revenue, mut total_tips, mut payment_count) = (Decimal::ZERO, Decimal::ZERO, 0);
        let mut date = start;
        while date <= end {
            let day = buckets.remove(&date).unwrap_or_default().into_stats(date);
            total_revenue += day.total_revenue;
            total_tips += day.total_tips;
            payment_count += day.payment_count;
            for (m, v) in &day.per_method {
                *per_method.entry(*m).or_default() += *v;
            }
            days.push(day);
            date += Duration::days(1);
        }

        Ok(PeriodStats {
            start,
            end,
            days,
            per_method: method_totals(&per_method),
            total_revenue,
            total_tips,
            total_commissions: self.commissions_in(&span),
            payment_count,
        })
    }
}
