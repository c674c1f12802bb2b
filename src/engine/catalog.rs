use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::limits::*;
use crate::model::*;

use super::deposit::validate_deposit_config;
use super::{Engine, EngineError, ProfessionalCalendar};

fn check_name(name: &Option<String>, what: &'static str) -> Result<(), EngineError> {
    match name {
        Some(n) if n.len() > MAX_NAME_LEN => Err(EngineError::LimitExceeded(what)),
        _ => Ok(()),
    }
}

pub(crate) fn check_money(value: Decimal, field: &str) -> Result<(), EngineError> {
    if value < Decimal::ZERO {
        return Err(EngineError::validation(format!("{field} must not be negative")));
    }
    if value > max_money() {
        return Err(EngineError::LimitExceeded("amount too large"));
    }
    if value.scale() > MONEY_DP && round_money(value) != value {
        return Err(EngineError::validation(format!(
            "{field} has more than {MONEY_DP} decimal places"
        )));
    }
    Ok(())
}

fn check_percentage(value: Decimal, field: &str) -> Result<(), EngineError> {
    if value < Decimal::ZERO || value > Decimal::ONE_HUNDRED {
        return Err(EngineError::validation(format!("{field} must be between 0 and 100")));
    }
    Ok(())
}

impl Engine {
    /// Create or replace a professional's profile. Existing bookings stay.
    pub async fn upsert_professional(&self, professional: Professional) -> Result<(), EngineError> {
        check_name(&professional.name, "professional name too long")?;
        if professional.services.len() > MAX_SERVICES_PER_PROFESSIONAL {
            return Err(EngineError::LimitExceeded("too many services on professional"));
        }
        if let Some(missing) = professional
            .services
            .iter()
            .find(|id| !self.services.contains_key(*id))
        {
            return Err(EngineError::NotFound(*missing));
        }

        let id = professional.id;
        if !self.calendars.contains_key(&id) && self.calendars.len() >= MAX_PROFESSIONALS_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many professionals"));
        }
        // A new calendar is registered already write-locked so no booking can
        // reach the log ahead of its professional.
        let cal = Arc::new(RwLock::new(ProfessionalCalendar::new(professional.clone())));
        let new_guard = cal.clone().write_owned().await;
        let existing = match self.calendars.entry(id) {
            Entry::Occupied(e) => Some(e.get().clone()),
            Entry::Vacant(e) => {
                e.insert(cal);
                None
            }
        };
        let fresh = existing.is_none();
        let mut guard = match existing {
            None => new_guard,
            Some(existing) => {
                drop(new_guard);
                existing.write_owned().await
            }
        };

        let event = Event::ProfessionalUpserted(professional.clone());
        let result = self
            .commit(&event, || {
                guard.professional = professional;
            })
            .await;
        drop(guard);
        if result.is_err() && fresh {
            self.calendars.remove(&id);
        }
        result?;
        tracing::info!(professional = %id, fresh, "professional upserted");
        Ok(())
    }

    pub async fn upsert_service(&self, service: Service) -> Result<(), EngineError> {
        check_name(&service.name, "service name too long")?;
        if service.duration_min == 0 || service.duration_min > MAX_SERVICE_DURATION_MIN {
            return Err(EngineError::validation(format!(
                "duration must be between 1 and {MAX_SERVICE_DURATION_MIN} minutes"
            )));
        }
        check_money(service.price, "price")?;
        validate_deposit_config(&service.deposit)?;
        if let Some(fixed) = service.deposit.fixed_amount {
            check_money(fixed, "deposit fixed amount")?;
        }
        if !self.services.contains_key(&service.id) && self.services.len() >= MAX_SERVICES_PER_TENANT {
            return Err(EngineError::LimitExceeded("too many services"));
        }

        let event = Event::ServiceUpserted(service.clone());
        let id = service.id;
        self.commit(&event, || {
            self.services.insert(id, service);
        })
        .await?;
        tracing::info!(service = %id, "service upserted");
        Ok(())
    }

    pub async fn upsert_worker_config(&self, config: WorkerCompensationConfig) -> Result<(), EngineError> {
        check_money(config.fixed_salary, "fixed salary")?;
        check_percentage(config.service_pct, "service commission")?;
        check_percentage(config.product_pct, "product commission")?;

        let event = Event::WorkerConfigUpserted(config.clone());
        let id = config.worker_id;
        self.commit(&event, || {
            self.workers.insert(id, config);
        })
        .await?;
        tracing::info!(worker = %id, "worker compensation updated");
        Ok(())
    }

    /// Record a point-of-sale product sale. Payments may then target it.
    pub async fn register_sale(&self, sale: Sale) -> Result<(), EngineError> {
        if sale.total <= Decimal::ZERO {
            return Err(EngineError::validation("sale total must be positive"));
        }
        check_money(sale.total, "sale total")?;
        if sale.sold_at < MIN_VALID_TIMESTAMP_MS || sale.sold_at > MAX_VALID_TIMESTAMP_MS {
            return Err(EngineError::LimitExceeded("timestamp out of range"));
        }
        if self.sales.contains_key(&sale.id) || self.bookings.contains_key(&sale.id) {
            return Err(EngineError::AlreadyExists(sale.id));
        }

        let event = Event::SaleRegistered(sale.clone());
        self.commit(&event, || {
            self.sales.insert(sale.id, sale);
        })
        .await
    }

    pub async fn list_professionals(&self) -> Vec<Professional> {
        let cals: Vec<_> = self.calendars.iter().map(|e| e.value().clone()).collect();
        let mut out = Vec::with_capacity(cals.len());
        for cal in cals {
            out.push(cal.read().await.professional.clone());
        }
        out.sort_by_key(|p| p.id);
        out
    }

    pub fn list_services(&self) -> Vec<Service> {
        let mut out: Vec<Service> = self.services.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| s.id);
        out
    }

    pub fn list_worker_configs(&self) -> Vec<WorkerCompensationConfig> {
        let mut out: Vec<WorkerCompensationConfig> =
            self.workers.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|w| w.worker_id);
        out
    }

    pub fn list_sales(&self) -> Vec<Sale> {
        let mut out: Vec<Sale> = self.sales.iter().map(|e| e.value().clone()).collect();
        out.sort_by_key(|s| (s.sold_at, s.id));
        out
    }
}
