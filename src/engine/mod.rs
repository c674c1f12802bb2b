mod bookings;
mod calendar;
mod catalog;
mod deposit;
mod error;
mod ledger;
mod payroll;
mod slots;

pub use calendar::{Interval, ProfessionalCalendar};
pub use deposit::{evaluate as evaluate_deposit, CustomerHistory, DepositDecision};
pub use error::EngineError;
pub use slots::{compute_slots, merge_overlapping};

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex, RwLock};
use ulid::Ulid;

use crate::model::*;
use crate::wal::Wal;

pub type SharedCalendar = Arc<RwLock<ProfessionalCalendar>>;

/// Settlement history is keyed by worker and period key (`2026-W42`, `2026-10`).
pub type PayrollKey = (Ulid, String);

/// Tenant-wide booking and payment policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnginePolicy {
    /// Same-day slots closer than this to "now" are not offered.
    pub min_advance_minutes: u32,
    /// When false, a payment must settle the full balance (or exactly the deposit).
    pub partial_payments: bool,
}

impl Default for EnginePolicy {
    fn default() -> Self {
        Self {
            min_advance_minutes: 0,
            partial_payments: true,
        }
    }
}

// ── Group-commit WAL channel ─────────────────────────────

pub(super) enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

/// Background task that owns the WAL and batches appends for group commit:
/// wait for one append, drain whatever else is queued, one fsync for all.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        match cmd {
            WalCommand::Append { event, response } => {
                let mut batch = vec![(event, response)];
                let mut deferred = None;
                loop {
                    match rx.try_recv() {
                        Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                        Ok(other) => {
                            deferred = Some(other);
                            break;
                        }
                        Err(_) => break,
                    }
                }
                commit_batch(&mut wal, &mut batch);
                if let Some(other) = deferred {
                    handle_non_append(&mut wal, other);
                }
            }
            other => handle_non_append(&mut wal, other),
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: &mut Vec<(Event, oneshot::Sender<io::Result<()>>)>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let flush_start = std::time::Instant::now();
    let result = flush_batch(wal, batch);
    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(flush_start.elapsed().as_secs_f64());
    if let Err(e) = &result {
        tracing::error!("WAL flush failed for batch of {}: {e}", batch.len());
    }
    for (_, tx) in batch.drain(..) {
        let r = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(r);
    }
}

fn flush_batch(wal: &mut Wal, batch: &[(Event, oneshot::Sender<io::Result<()>>)]) -> io::Result<()> {
    let appended = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after an append error so half-written bytes don't leak
    // into the next batch.
    let flushed = wal.flush_sync();
    appended.and(flushed)
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result = Wal::write_compact_file(wal.path(), &events)
                .and_then(|()| wal.swap_compact_file());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { .. } => unreachable!("appends are batched by the writer loop"),
    }
}

/// One tenant's scheduling and compensation state.
pub struct Engine {
    calendars: DashMap<Ulid, SharedCalendar>,
    services: DashMap<Ulid, Service>,
    workers: DashMap<Ulid, WorkerCompensationConfig>,
    bookings: DashMap<Ulid, Booking>,
    /// customer → booking ids, for deposit history.
    customer_bookings: DashMap<Ulid, Vec<Ulid>>,
    sales: DashMap<Ulid, Sale>,
    payments: DashMap<Ulid, Payment>,
    /// booking/sale id → payment ids.
    payments_by_target: DashMap<Ulid, Vec<Ulid>>,
    /// Serializes read-validate-write of a target's balance.
    target_locks: DashMap<Ulid, Arc<Mutex<()>>>,
    settlements: DashMap<PayrollKey, Vec<Settlement>>,
    /// settlement id → the (worker, period) it was recorded against.
    settlement_ids: DashMap<Ulid, PayrollKey>,
    /// Serializes `mark_paid` per worker and period.
    settlement_locks: DashMap<PayrollKey, Arc<Mutex<()>>>,
    policy: EnginePolicy,
    wal_tx: mpsc::Sender<WalCommand>,
    /// Held shared by every commit, exclusively by compaction.
    commit_gate: RwLock<()>,
}

impl Engine {
    pub fn new(wal_path: PathBuf, policy: EnginePolicy) -> io::Result<Self> {
        let events = Wal::replay(&wal_path)?;
        let wal = Wal::open(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let engine = Self {
            calendars: DashMap::new(),
            services: DashMap::new(),
            workers: DashMap::new(),
            bookings: DashMap::new(),
            customer_bookings: DashMap::new(),
            sales: DashMap::new(),
            payments: DashMap::new(),
            payments_by_target: DashMap::new(),
            target_locks: DashMap::new(),
            settlements: DashMap::new(),
            settlement_ids: DashMap::new(),
            settlement_locks: DashMap::new(),
            policy,
            wal_tx,
            commit_gate: RwLock::new(()),
        };

        let replayed = events.len();
        for event in events {
            engine.replay_event(event);
        }
        if replayed > 0 {
            tracing::info!(
                "replayed {replayed} events: {} professionals, {} bookings, {} payments",
                engine.calendars.len(),
                engine.bookings.len(),
                engine.payments.len()
            );
        }
        Ok(engine)
    }

    pub fn policy(&self) -> EnginePolicy {
        self.policy
    }

    /// Replay a logged event. We're the sole owner of every lock at this
    /// point, so `try_write` never contends. Never block here: this may run
    /// inside an async context (lazy tenant creation).
    fn replay_event(&self, event: Event) {
        match event {
            Event::ProfessionalUpserted(p) => match self.calendars.get(&p.id).map(|e| e.value().clone()) {
                Some(cal) => {
                    if let Ok(mut guard) = cal.try_write() {
                        guard.professional = p;
                    }
                }
                None => {
                    self.calendars
                        .insert(p.id, Arc::new(RwLock::new(ProfessionalCalendar::new(p))));
                }
            },
            Event::ServiceUpserted(s) => {
                self.services.insert(s.id, s);
            }
            Event::WorkerConfigUpserted(c) => {
                self.workers.insert(c.worker_id, c);
            }
            Event::BookingCreated(b) => {
                if let Some(cal) = self.get_calendar(&b.professional_id)
                    && let Ok(mut guard) = cal.try_write()
                {
                    self.index_booking(&mut guard, b);
                }
            }
            Event::BookingStatusChanged { id, professional_id, status } => {
                if let Some(cal) = self.get_calendar(&professional_id)
                    && let Ok(mut guard) = cal.try_write()
                {
                    self.apply_booking_status(&mut guard, id, status);
                }
            }
            Event::SaleRegistered(s) => {
                self.sales.insert(s.id, s);
            }
            Event::PaymentRecorded(p) => self.index_payment(p),
            Event::PaymentStatusChanged { id, status } => self.apply_payment_status(id, status),
            Event::SettlementRecorded(s) => self.index_settlement(s),
        }
    }

    // ── State application (shared by replay and live commits) ──

    fn index_booking(&self, cal: &mut ProfessionalCalendar, booking: Booking) {
        if booking.status != BookingStatus::Cancelled {
            cal.insert_interval(Interval {
                booking_id: booking.id,
                span: booking.span,
            });
        }
        self.customer_bookings
            .entry(booking.customer_id)
            .or_default()
            .push(booking.id);
        self.bookings.insert(booking.id, booking);
    }

    fn apply_booking_status(&self, cal: &mut ProfessionalCalendar, id: Ulid, status: BookingStatus) {
        if status == BookingStatus::Cancelled {
            cal.remove_interval(id);
        }
        if let Some(mut booking) = self.bookings.get_mut(&id) {
            booking.status = status;
        }
    }

    fn index_payment(&self, payment: Payment) {
        self.payments_by_target
            .entry(payment.target.id())
            .or_default()
            .push(payment.id);
        self.payments.insert(payment.id, payment);
    }

    fn apply_payment_status(&self, id: Ulid, status: PaymentStatus) {
        if let Some(mut payment) = self.payments.get_mut(&id) {
            payment.status = status;
        }
    }

    fn index_settlement(&self, settlement: Settlement) {
        self.settlement_ids
            .insert(settlement.id, (settlement.worker_id, settlement.period_key.clone()));
        self.settlements
            .entry((settlement.worker_id, settlement.period_key.clone()))
            .or_default()
            .push(settlement);
    }

    // ── Commit path ──────────────────────────────────────────

    /// Write event to WAL via the background group-commit writer.
    async fn wal_append(&self, event: &Event) -> Result<(), EngineError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }

    /// Durably log `event`, then run `apply`. Nothing is applied if the log
    /// write fails, so every operation is all-or-nothing.
    async fn commit<T>(&self, event: &Event, apply: impl FnOnce() -> T) -> Result<T, EngineError> {
        let _gate = self.commit_gate.read().await;
        self.wal_append(event).await?;
        Ok(apply())
    }

    // ── Lookups ──────────────────────────────────────────────

    pub fn get_calendar(&self, id: &Ulid) -> Option<SharedCalendar> {
        self.calendars.get(id).map(|e| e.value().clone())
    }

    pub fn get_service(&self, id: &Ulid) -> Result<Service, EngineError> {
        self.services
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn get_booking(&self, id: &Ulid) -> Result<Booking, EngineError> {
        self.bookings
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn get_payment(&self, id: &Ulid) -> Result<Payment, EngineError> {
        self.payments
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    pub fn get_worker_config(&self, id: &Ulid) -> Result<WorkerCompensationConfig, EngineError> {
        self.workers
            .get(id)
            .map(|e| e.value().clone())
            .ok_or(EngineError::NotFound(*id))
    }

    fn lock_for<K: std::hash::Hash + Eq + Clone>(map: &DashMap<K, Arc<Mutex<()>>>, key: &K) -> Arc<Mutex<()>> {
        match map.entry(key.clone()) {
            Entry::Occupied(e) => e.get().clone(),
            Entry::Vacant(e) => e.insert(Arc::new(Mutex::new(()))).value().clone(),
        }
    }

    // ── Compaction ───────────────────────────────────────────

    /// Rewrite the WAL with only the events needed to recreate the current
    /// state. Returns `false` without touching the log if a calendar is busy;
    /// the compactor simply tries again later.
    pub async fn compact_wal(&self) -> Result<bool, EngineError> {
        let _gate = self.commit_gate.write().await;

        let mut events = Vec::new();
        for entry in self.calendars.iter() {
            let Ok(guard) = entry.value().try_read() else {
                return Ok(false);
            };
            events.push(Event::ProfessionalUpserted(guard.professional.clone()));
        }
        events.extend(self.services.iter().map(|e| Event::ServiceUpserted(e.value().clone())));
        events.extend(self.workers.iter().map(|e| Event::WorkerConfigUpserted(e.value().clone())));

        let mut bookings: Vec<Booking> = self.bookings.iter().map(|e| e.value().clone()).collect();
        bookings.sort_by_key(|b| b.id);
        events.extend(bookings.into_iter().map(Event::BookingCreated));

        events.extend(self.sales.iter().map(|e| Event::SaleRegistered(e.value().clone())));

        let mut payments: Vec<Payment> = self.payments.iter().map(|e| e.value().clone()).collect();
        payments.sort_by_key(|p| p.id);
        events.extend(payments.into_iter().map(Event::PaymentRecorded));

        for entry in self.settlements.iter() {
            events.extend(entry.value().iter().cloned().map(Event::SettlementRecorded));
        }

        let count = events.len();
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact { events, response: tx })
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))?;
        tracing::debug!("compacted WAL to {count} events");
        Ok(true)
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
