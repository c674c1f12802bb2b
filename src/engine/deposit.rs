use rust_decimal::Decimal;
use ulid::Ulid;

use crate::model::*;

use super::calendar::validate_instant;
use super::{Engine, EngineError};

/// What the tenant knows about a customer when a booking is evaluated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CustomerHistory {
    /// Prior bookings with this tenant that were not cancelled.
    pub prior_bookings: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DepositDecision {
    pub required: bool,
    pub amount: Decimal,
}

impl DepositDecision {
    pub const NONE: DepositDecision = DepositDecision {
        required: false,
        amount: Decimal::ZERO,
    };
}

/// Decide whether a deposit is due and how much.
///
/// Pure: the result depends only on the arguments. Rules apply in order:
/// the service flag, then the policy (`AllCustomers`, `NewCustomersOnly`,
/// `AdvanceBookingOnly` measured in whole days between `now` and the start).
/// A fixed amount wins over a percentage; percentages round to cents.
pub fn evaluate(
    service: &Service,
    history: &CustomerHistory,
    booking_start: Ms,
    now: Ms,
) -> Result<DepositDecision, EngineError> {
    let cfg = &service.deposit;
    if !cfg.requires_deposit {
        return Ok(DepositDecision::NONE);
    }

    let required = match cfg.policy {
        DepositPolicy::AllCustomers => true,
        DepositPolicy::NewCustomersOnly => history.prior_bookings == 0,
        DepositPolicy::AdvanceBookingOnly => {
            let lead = booking_start.saturating_sub(now);
            lead >= 0 && lead / DAY_MS >= cfg.advance_days as Ms
        }
    };
    if !required {
        return Ok(DepositDecision::NONE);
    }

    let amount = match cfg.mode() {
        Some(DepositMode::FixedAmount(fixed)) => round_money(fixed),
        Some(DepositMode::Percentage(pct)) => percent_of(service.price, pct),
        None => {
            return Err(EngineError::validation(format!(
                "service {} requires a deposit but has neither percentage nor fixed amount",
                service.id
            )));
        }
    };
    let amount = amount.min(service.price);
    if amount <= Decimal::ZERO {
        return Ok(DepositDecision::NONE);
    }
    Ok(DepositDecision {
        required: true,
        amount,
    })
}

/// Static checks run when a service is stored.
pub(crate) fn validate_deposit_config(cfg: &DepositConfig) -> Result<(), EngineError> {
    if let Some(pct) = cfg.percentage
        && (pct <= Decimal::ZERO || pct > Decimal::ONE_HUNDRED)
    {
        return Err(EngineError::validation("deposit percentage must be in (0, 100]"));
    }
    if let Some(fixed) = cfg.fixed_amount
        && fixed <= Decimal::ZERO
    {
        return Err(EngineError::validation("deposit fixed amount must be positive"));
    }
    if cfg.requires_deposit && cfg.mode().is_none() {
        return Err(EngineError::validation(
            "deposit required but neither percentage nor fixed amount configured",
        ));
    }
    Ok(())
}

impl Engine {
    /// Non-cancelled bookings this customer already holds with the tenant.
    pub fn customer_history(&self, customer_id: &Ulid) -> CustomerHistory {
        let prior_bookings = self
            .customer_bookings
            .get(customer_id)
            .map(|ids| {
                ids.iter()
                    .filter(|id| {
                        self.bookings
                            .get(*id)
                            .is_some_and(|b| b.status != BookingStatus::Cancelled)
                    })
                    .count() as u32
            })
            .unwrap_or(0);
        CustomerHistory { prior_bookings }
    }

    /// What `create_booking` would decide for this customer right now.
    pub fn quote_deposit(
        &self,
        ctx: &RequestContext,
        service_id: Ulid,
        customer_id: Ulid,
        start: Ms,
    ) -> Result<DepositDecision, EngineError> {
        validate_instant(start)?;
        let service = self.get_service(&service_id)?;
        evaluate(&service, &self.customer_history(&customer_id), start, ctx.now)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NOW: Ms = 1_790_000_000_000;

    fn service(deposit: DepositConfig) -> Service {
        Service {
            id: Ulid::new(),
            name: Some("Haircut".into()),
            duration_min: 60,
            price: Decimal::from(1000),
            deposit,
        }
    }

    fn pct(policy: DepositPolicy, pct: i64) -> DepositConfig {
        DepositConfig {
            requires_deposit: true,
            percentage: Some(Decimal::from(pct)),
            fixed_amount: None,
            policy,
            advance_days: 0,
        }
    }

    #[test]
    fn no_deposit_when_flag_off() {
        let mut cfg = pct(DepositPolicy::AllCustomers, 20);
        cfg.requires_deposit = false;
        let d = evaluate(&service(cfg), &CustomerHistory::default(), NOW, NOW).unwrap();
        assert_eq!(d, DepositDecision::NONE);
    }

    #[test]
    fn all_customers_percentage() {
        let svc = service(pct(DepositPolicy::AllCustomers, 20));
        let returning = CustomerHistory { prior_bookings: 7 };
        let d = evaluate(&svc, &returning, NOW + DAY_MS, NOW).unwrap();
        assert_eq!(d, DepositDecision { required: true, amount: Decimal::from(200) });
    }

    #[test]
    fn new_customers_only() {
        let svc = service(pct(DepositPolicy::NewCustomersOnly, 10));
        let fresh = evaluate(&svc, &CustomerHistory::default(), NOW, NOW).unwrap();
        assert!(fresh.required);
        assert_eq!(fresh.amount, Decimal::from(100));
        let known = evaluate(&svc, &CustomerHistory { prior_bookings: 1 }, NOW, NOW).unwrap();
        assert!(!known.required);
    }

    #[test]
    fn advance_booking_counts_whole_days() {
        let mut cfg = pct(DepositPolicy::AdvanceBookingOnly, 50);
        cfg.advance_days = 3;
        let svc = service(cfg);
        let h = CustomerHistory::default();
        assert!(!evaluate(&svc, &h, NOW + 3 * DAY_MS - 1, NOW).unwrap().required);
        assert!(evaluate(&svc, &h, NOW + 3 * DAY_MS, NOW).unwrap().required);
        assert!(!evaluate(&svc, &h, NOW - DAY_MS, NOW).unwrap().required);
    }

    #[test]
    fn fixed_amount_wins_over_percentage() {
        let mut cfg = pct(DepositPolicy::AllCustomers, 20);
        cfg.fixed_amount = Some(Decimal::new(15050, 2));
        let d = evaluate(&service(cfg), &CustomerHistory::default(), NOW, NOW).unwrap();
        assert_eq!(d.amount, Decimal::new(15050, 2));
    }

    #[test]
    fn percentage_rounds_to_cents() {
        let mut svc = service(pct(DepositPolicy::AllCustomers, 15));
        svc.price = Decimal::new(3333, 2);
        let d = evaluate(&svc, &CustomerHistory::default(), NOW, NOW).unwrap();
        assert_eq!(d.amount, Decimal::new(500, 2));
    }

    #[test]
    fn missing_amount_config_is_validation_error() {
        let cfg = DepositConfig {
            requires_deposit: true,
            ..DepositConfig::default()
        };
        let result = evaluate(&service(cfg.clone()), &CustomerHistory::default(), NOW, NOW);
        assert!(matches!(result, Err(EngineError::Validation(_))));
        assert!(validate_deposit_config(&cfg).is_err());
    }

    #[test]
    fn advance_lead_saturates_at_extreme_starts() {
        let mut cfg = pct(DepositPolicy::AdvanceBookingOnly, 50);
        cfg.advance_days = 1;
        let svc = service(cfg);
        let h = CustomerHistory::default();
        assert!(!evaluate(&svc, &h, i64::MIN, NOW).unwrap().required);
        assert!(evaluate(&svc, &h, i64::MAX, -NOW).unwrap().required);
    }

    #[test]
    fn evaluate_is_deterministic() {
        let svc = service(pct(DepositPolicy::NewCustomersOnly, 33));
        let h = CustomerHistory::default();
        let first = evaluate(&svc, &h, NOW + 5 * DAY_MS, NOW).unwrap();
        for _ in 0..10 {
            assert_eq!(evaluate(&svc, &h, NOW + 5 * DAY_MS, NOW).unwrap(), first);
        }
    }
}
