use std::collections::{HashMap, HashSet};

use chrono::{Datelike, Duration, NaiveDate};
use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::catalog::check_money;
use super::ledger::check_stats_range;
use super::{Engine, EngineError};

/// Revenue attributed to one worker over a window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerRevenue {
    pub service_revenue: Decimal,
    pub product_revenue: Decimal,
    /// Distinct bookings that contributed service revenue.
    pub bookings: HashSet<Ulid>,
}

/// `(service, product)` commission for `revenue` under `config`, each
/// rounded once to cents.
pub fn commissions(config: &WorkerCompensationConfig, revenue: &WorkerRevenue) -> (Decimal, Decimal) {
    if !config.method.earns_commission() {
        return (Decimal::ZERO, Decimal::ZERO);
    }
    (
        percent_of(revenue.service_revenue, config.service_pct),
        percent_of(revenue.product_revenue, config.product_pct),
    )
}

pub fn fixed_salary(config: &WorkerCompensationConfig) -> Decimal {
    if config.method.earns_salary() {
        config.fixed_salary
    } else {
        Decimal::ZERO
    }
}

pub fn settlement_status(total_to_pay: Decimal, paid: Decimal) -> PayrollStatus {
    let remaining = (total_to_pay - paid).max(Decimal::ZERO);
    if remaining.is_zero() {
        PayrollStatus::Paid
    } else if paid > Decimal::ZERO {
        PayrollStatus::Partial
    } else {
        PayrollStatus::Pending
    }
}

/// Calendar months `start..=end` touches.
fn months_touched(start: NaiveDate, end: NaiveDate) -> u32 {
    let months = (end.year() - start.year()) * 12 + end.month() as i32 - start.month() as i32 + 1;
    months.max(0) as u32
}

/// `(current - prior) / prior * 100`, rounded to cents.
fn growth(current: Decimal, prior: Decimal) -> Option<Decimal> {
    if prior.is_zero() {
        return None;
    }
    Some(round_money((current - prior) / prior * Decimal::ONE_HUNDRED))
}

struct PeriodWindow {
    kind: PeriodKind,
    key: String,
    first: NaiveDate,
    last: NaiveDate,
}

impl PeriodWindow {
    fn containing(kind: PeriodKind, date: NaiveDate) -> Self {
        let (first, last) = kind.bounds(date);
        Self {
            kind,
            key: kind.key(date),
            first,
            last,
        }
    }

    fn span(&self) -> Span {
        days_span(self.first, self.last)
    }
}

impl Engine {
    /// Completed payments attributed to workers within `span`. Service
    /// revenue lands in the window holding the booking's start (so a
    /// backfilled booking counts where it happened), product revenue in the
    /// window holding the sale.
    pub(super) fn attributed_revenue(&self, span: &Span) -> HashMap<Ulid, WorkerRevenue> {
        let mut out: HashMap<Ulid, WorkerRevenue> = HashMap::new();
        for entry in self.payments.iter() {
            let p = entry.value();
            if p.status != PaymentStatus::Completed {
                continue;
            }
            match p.target {
                PaymentTarget::Booking(bid) => {
                    let Some(b) = self.bookings.get(&bid) else { continue };
                    if span.contains_instant(b.span.start) {
                        let r = out.entry(b.professional_id).or_default();
                        r.service_revenue += p.amount;
                        r.bookings.insert(bid);
                    }
                }
                PaymentTarget::Sale(sid) => {
                    let Some(s) = self.sales.get(&sid) else { continue };
                    if span.contains_instant(s.sold_at) {
                        out.entry(s.worker_id).or_default().product_revenue += p.amount;
                    }
                }
            }
        }
        out
    }

    /// Commissions every configured worker earns on revenue attributed to `span`.
    pub(super) fn commissions_in(&self, span: &Span) -> Decimal {
        let revenue = self.attributed_revenue(span);
        self.workers
            .iter()
            .map(|w| {
                let (service, product) = commissions(w.value(), &revenue.get(&w.worker_id).cloned().unwrap_or_default());
                service + product
            })
            .sum()
    }

    fn paid_towards(&self, worker_id: Ulid, key: &str) -> Decimal {
        self.settlements
            .get(&(worker_id, key.to_string()))
            .map(|s| s.iter().map(|s| s.amount).sum())
            .unwrap_or_default()
    }

    fn payroll_row(
        &self,
        config: &WorkerCompensationConfig,
        window: &PeriodWindow,
        revenue: &WorkerRevenue,
    ) -> PayrollRow {
        let (service_commission, product_commission) = commissions(config, revenue);
        let commissions = service_commission + product_commission;
        let fixed_salary = fixed_salary(config);
        let total_to_pay = fixed_salary + commissions;
        let paid_amount = self.paid_towards(config.worker_id, &window.key);
        PayrollRow {
            worker_id: config.worker_id,
            period: window.kind,
            period_key: window.key.clone(),
            period_start: window.first,
            period_end: window.last,
            services_count: revenue.bookings.len() as u32,
            service_revenue: revenue.service_revenue,
            product_revenue: revenue.product_revenue,
            service_commission,
            product_commission,
            commissions,
            fixed_salary,
            total_to_pay,
            paid_amount,
            remaining_amount: (total_to_pay - paid_amount).max(Decimal::ZERO),
            status: settlement_status(total_to_pay, paid_amount),
        }
    }

    /// Per-worker payroll for the period containing `date`. Recomputed from
    /// the payment log on every call; only `paid_amount` comes from the
    /// settlement history.
    pub fn compute_payroll(&self, period: PeriodKind, date: NaiveDate) -> PayrollReport {
        let window = PeriodWindow::containing(period, date);
        let revenue = self.attributed_revenue(&window.span());

        let mut rows: Vec<PayrollRow> = self
            .workers
            .iter()
            .map(|w| {
                let r = revenue.get(&w.worker_id).cloned().unwrap_or_default();
                self.payroll_row(w.value(), &window, &r)
            })
            .collect();
        rows.sort_by_key(|r| r.worker_id);

        let mut summary = PayrollSummary::default();
        for r in &rows {
            summary.workers += 1;
            summary.service_revenue += r.service_revenue;
            summary.product_revenue += r.product_revenue;
            summary.commissions += r.commissions;
            summary.fixed_salaries += r.fixed_salary;
            summary.total_to_pay += r.total_to_pay;
            summary.paid_amount += r.paid_amount;
            summary.remaining_amount += r.remaining_amount;
        }

        PayrollReport {
            period,
            period_key: window.key,
            rows,
            summary,
        }
    }

    pub fn payroll_for(&self, worker_id: Ulid, period: PeriodKind, date: NaiveDate) -> Result<PayrollRow, EngineError> {
        let config = self.get_worker_config(&worker_id)?;
        let window = PeriodWindow::containing(period, date);
        let revenue = self
            .attributed_revenue(&window.span())
            .remove(&worker_id)
            .unwrap_or_default();
        Ok(self.payroll_row(&config, &window, &revenue))
    }

    /// Append a settlement against the worker's balance for the period
    /// containing `date`. Serialized per (worker, period key).
    #[allow(clippy::too_many_arguments)]
    pub async fn mark_paid(
        &self,
        ctx: &RequestContext,
        id: Ulid,
        worker_id: Ulid,
        period: PeriodKind,
        date: NaiveDate,
        amount: Decimal,
        method: PaymentMethod,
        notes: Option<String>,
    ) -> Result<PayrollRow, EngineError> {
        if amount <= Decimal::ZERO {
            return Err(EngineError::validation("settlement amount must be positive"));
        }
        check_money(amount, "settlement amount")?;
        if notes.as_ref().is_some_and(|n| n.len() > MAX_NOTES_LEN) {
            return Err(EngineError::LimitExceeded("settlement notes too long"));
        }
        self.get_worker_config(&worker_id)?;

        let key = period.key(date);
        let lock = Self::lock_for(&self.settlement_locks, &(worker_id, key.clone()));
        let _settle = lock.lock().await;

        let row = self.payroll_for(worker_id, period, date)?;
        if amount > row.remaining_amount {
            tracing::warn!(worker = %worker_id, period = %key, requested = %amount, remaining = %row.remaining_amount, "settlement rejected: overpayment");
            return Err(EngineError::Overpayment {
                requested: amount,
                remaining: row.remaining_amount,
            });
        }

        // Reserved before the commit so a retry under another period key
        // cannot slip the same id in concurrently.
        match self.settlement_ids.entry(id) {
            Entry::Occupied(_) => return Err(EngineError::AlreadyExists(id)),
            Entry::Vacant(e) => {
                e.insert((worker_id, key.clone()));
            }
        }

        let settlement = Settlement {
            id,
            worker_id,
            period_key: key.clone(),
            amount,
            method,
            notes,
            recorded_at: ctx.now,
        };
        let event = Event::SettlementRecorded(settlement.clone());
        if let Err(e) = self.commit(&event, || self.index_settlement(settlement)).await {
            self.settlement_ids.remove(&id);
            return Err(e);
        }
        metrics::counter!(crate::observability::SETTLEMENTS_RECORDED_TOTAL).increment(1);
        tracing::info!(worker = %worker_id, period = %key, %amount, "settlement recorded");

        self.payroll_for(worker_id, period, date)
    }

    pub fn list_settlements(&self, worker_id: Ulid, key: &str) -> Vec<Settlement> {
        self.settlements
            .get(&(worker_id, key.to_string()))
            .map(|s| s.value().clone())
            .unwrap_or_default()
    }

    /// Revenue vs. compensation over `start..=end`, with growth against the
    /// immediately preceding range of equal length.
    pub fn financial_stats(&self, start: NaiveDate, end: NaiveDate) -> Result<FinancialStats, EngineError> {
        check_stats_range(start, end)?;
        let span = days_span(start, end);
        let len = (end - start).num_days() + 1;
        let prior = days_span(start - Duration::days(len), start - Duration::days(1));

        let revenue_in = |span: &Span| -> Decimal {
            self.payments
                .iter()
                .filter(|p| p.status == PaymentStatus::Completed && span.contains_instant(p.paid_at))
                .map(|p| p.amount)
                .sum()
        };
        let revenue = revenue_in(&span);
        let prior_revenue = revenue_in(&prior);

        let commissions = self.commissions_in(&span);
        let months = Decimal::from(months_touched(start, end));
        let salaries: Decimal = self
            .workers
            .iter()
            .map(|w| fixed_salary(w.value()) * months)
            .sum();
        let expenses = salaries + commissions;
        let net_profit = revenue - expenses;
        let margin_pct = if revenue.is_zero() {
            Decimal::ZERO
        } else {
            round_money(net_profit / revenue * Decimal::ONE_HUNDRED)
        };

        Ok(FinancialStats {
            start,
            end,
            revenue,
            salaries,
            commissions,
            expenses,
            net_profit,
            margin_pct,
            growth_pct: growth(revenue, prior_revenue),
        })
    }
}
