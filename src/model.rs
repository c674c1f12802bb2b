use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, Timelike, Weekday};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Unix milliseconds on the business wall clock. The only instant type.
pub type Ms = i64;

pub const MINUTE_MS: Ms = 60_000;
pub const DAY_MS: Ms = 86_400_000;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Ms,
    pub end: Ms,
}

impl Span {
    pub fn new(start: Ms, end: Ms) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration_ms(&self) -> Ms {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Ms) -> bool {
        self.start <= t && t < self.end
    }
}

/// Request-scoped context. Everything time-dependent reads "now" from here,
/// never from a global clock.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestContext {
    pub now: Ms,
}

impl RequestContext {
    pub fn at(now: Ms) -> Self {
        Self { now }
    }

    /// Context stamped with the system clock.
    pub fn system() -> Self {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as Ms)
            .unwrap_or_default();
        Self { now }
    }
}

// ── Wall-clock helpers ──────────────────────────────────────────

pub fn date_of(ms: Ms) -> Option<NaiveDate> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.date_naive())
}

pub fn time_of(ms: Ms) -> Option<NaiveTime> {
    DateTime::from_timestamp_millis(ms).map(|dt| dt.time())
}

/// First instant of `date`.
pub fn day_start(date: NaiveDate) -> Ms {
    date.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Span covering the whole of `date`.
pub fn day_span(date: NaiveDate) -> Span {
    let start = day_start(date);
    Span::new(start, start + DAY_MS)
}

/// Span covering `first..=last` (whole days).
pub fn days_span(first: NaiveDate, last: NaiveDate) -> Span {
    Span::new(day_start(first), day_start(last) + DAY_MS)
}

// ── Money ───────────────────────────────────────────────────────

/// Currency precision.
pub const MONEY_DP: u32 = 2;

pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(MONEY_DP, RoundingStrategy::MidpointAwayFromZero)
}

/// `amount * pct / 100`, rounded once to currency precision.
pub fn percent_of(amount: Decimal, pct: Decimal) -> Decimal {
    round_money(amount * pct / Decimal::ONE_HUNDRED)
}

// ── Working hours ───────────────────────────────────────────────

/// A single working window inside a day, in minutes since midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayWindow {
    pub start_min: u16,
    pub end_min: u16,
}

impl DayWindow {
    pub fn new(start_min: u16, end_min: u16) -> Option<Self> {
        (start_min < end_min && end_min <= 24 * 60).then_some(Self { start_min, end_min })
    }

    /// Absolute span of this window on `date`.
    pub fn on(&self, date: NaiveDate) -> Span {
        let base = day_start(date);
        Span::new(
            base + self.start_min as Ms * MINUTE_MS,
            base + self.end_min as Ms * MINUTE_MS,
        )
    }
}

/// Weekly template: at most one window per weekday.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkingHours {
    days: [Option<DayWindow>; 7],
}

impl WorkingHours {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, day: Weekday, window: DayWindow) -> Self {
        self.days[day.num_days_from_monday() as usize] = Some(window);
        self
    }

    pub fn window(&self, day: Weekday) -> Option<DayWindow> {
        self.days[day.num_days_from_monday() as usize]
    }

    pub fn is_empty(&self) -> bool {
        self.days.iter().all(Option::is_none)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid working hours: {0}")]
pub struct HoursParseError(pub String);

fn parse_clock(s: &str) -> Result<u16, HoursParseError> {
    if s == "24:00" {
        return Ok(24 * 60);
    }
    let t = NaiveTime::parse_from_str(s, "%H:%M")
        .map_err(|_| HoursParseError(format!("bad time '{s}'")))?;
    Ok((t.hour() * 60 + t.minute()) as u16)
}

fn format_clock(minutes: u16) -> String {
    format!("{:02}:{:02}", minutes / 60, minutes % 60)
}

/// Textual form: `mon 09:00-13:00, tue 10:00-18:00`. Empty string = no hours.
impl FromStr for WorkingHours {
    type Err = HoursParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut hours = WorkingHours::new();
        for part in s.split([',', ';']).map(str::trim).filter(|p| !p.is_empty()) {
            let (day, range) = part
                .split_once(char::is_whitespace)
                .ok_or_else(|| HoursParseError(format!("expected '<day> HH:MM-HH:MM', got '{part}'")))?;
            let day: Weekday = day
                .trim()
                .parse()
                .map_err(|_| HoursParseError(format!("bad weekday '{day}'")))?;
            let (from, to) = range
                .trim()
                .split_once('-')
                .ok_or_else(|| HoursParseError(format!("bad range '{range}'")))?;
            let window = DayWindow::new(parse_clock(from.trim())?, parse_clock(to.trim())?)
                .ok_or_else(|| HoursParseError(format!("empty window '{range}'")))?;
            if hours.window(day).is_some() {
                return Err(HoursParseError(format!("{day} listed twice")));
            }
            hours = hours.with(day, window);
        }
        Ok(hours)
    }
}

impl fmt::Display for WorkingHours {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for (i, window) in self.days.iter().enumerate() {
            let Some(w) = window else { continue };
            let day = Weekday::try_from(i as u8).map_err(|_| fmt::Error)?;
            if !first {
                f.write_str(", ")?;
            }
            first = false;
            write!(
                f,
                "{} {}-{}",
                day.to_string().to_lowercase(),
                format_clock(w.start_min),
                format_clock(w.end_min)
            )?;
        }
        Ok(())
    }
}

// ── Catalog ─────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Professional {
    pub id: Ulid,
    pub name: Option<String>,
    pub hours: WorkingHours,
    /// Services this professional may be booked for.
    pub services: Vec<Ulid>,
}

impl Professional {
    pub fn offers(&self, service_id: &Ulid) -> bool {
        self.services.contains(service_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DepositPolicy {
    AllCustomers,
    NewCustomersOnly,
    AdvanceBookingOnly,
}

impl DepositPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            DepositPolicy::AllCustomers => "all_customers",
            DepositPolicy::NewCustomersOnly => "new_customers_only",
            DepositPolicy::AdvanceBookingOnly => "advance_booking_only",
        }
    }
}

impl FromStr for DepositPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace('-', "_").as_str() {
            "all_customers" | "all" => Ok(DepositPolicy::AllCustomers),
            "new_customers_only" | "new_customers" => Ok(DepositPolicy::NewCustomersOnly),
            "advance_booking_only" | "advance_booking" => Ok(DepositPolicy::AdvanceBookingOnly),
            other => Err(format!("unknown deposit policy: {other}")),
        }
    }
}

/// How the deposit amount is derived. Fixed amount wins when both are set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DepositMode {
    Percentage(Decimal),
    FixedAmount(Decimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DepositConfig {
    pub requires_deposit: bool,
    pub percentage: Option<Decimal>,
    pub fixed_amount: Option<Decimal>,
    pub policy: DepositPolicy,
    /// Whole days; only read by `AdvanceBookingOnly`.
    pub advance_days: u32,
}

impl Default for DepositConfig {
    fn default() -> Self {
        Self {
            requires_deposit: false,
            percentage: None,
            fixed_amount: None,
            policy: DepositPolicy::AllCustomers,
            advance_days: 0,
        }
    }
}

impl DepositConfig {
    pub fn mode(&self) -> Option<DepositMode> {
        match (self.fixed_amount, self.percentage) {
            (Some(fixed), _) => Some(DepositMode::FixedAmount(fixed)),
            (None, Some(pct)) => Some(DepositMode::Percentage(pct)),
            (None, None) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub name: Option<String>,
    pub duration_min: u32,
    pub price: Decimal,
    pub deposit: DepositConfig,
}

impl Service {
    pub fn duration_ms(&self) -> Ms {
        self.duration_min as Ms * MINUTE_MS
    }
}

// ── Bookings ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BookingStatus {
    Pending,
    Confirmed,
    Completed,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BookingStatus::Completed | BookingStatus::Cancelled)
    }

    /// Forward-only: pending → confirmed → completed, cancel from pending/confirmed.
    pub fn can_transition_to(&self, next: BookingStatus) -> bool {
        matches!(
            (self, next),
            (BookingStatus::Pending, BookingStatus::Confirmed)
                | (BookingStatus::Pending, BookingStatus::Cancelled)
                | (BookingStatus::Confirmed, BookingStatus::Completed)
                | (BookingStatus::Confirmed, BookingStatus::Cancelled)
        )
    }
}

impl FromStr for BookingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(BookingStatus::Pending),
            "confirmed" => Ok(BookingStatus::Confirmed),
            "completed" => Ok(BookingStatus::Completed),
            "cancelled" | "canceled" => Ok(BookingStatus::Cancelled),
            other => Err(format!("unknown booking status: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub service_id: Ulid,
    pub customer_id: Ulid,
    /// `end = start + service.duration`.
    pub span: Span,
    pub status: BookingStatus,
    pub deposit_required: bool,
    pub deposit_amount: Decimal,
    /// Service price at booking time; the payable balance of the booking.
    pub price: Decimal,
    pub notes: Option<String>,
    pub created_at: Ms,
}

/// Input to `Engine::create_booking`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewBooking {
    pub id: Ulid,
    pub professional_id: Ulid,
    pub service_id: Ulid,
    pub customer_id: Ulid,
    pub start: Ms,
    /// Optional caller-supplied end; must equal `start + duration` when present.
    pub end: Option<Ms>,
    pub notes: Option<String>,
    /// Explicit acknowledgement for backfilling a booking that already happened.
    pub allow_past: bool,
}

// ── Payments ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Card,
    Transfer,
    MercadoPago,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Cash,
        PaymentMethod::Card,
        PaymentMethod::Transfer,
        PaymentMethod::MercadoPago,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "cash",
            PaymentMethod::Card => "card",
            PaymentMethod::Transfer => "transfer",
            PaymentMethod::MercadoPago => "mercadopago",
        }
    }

    /// Methods reconciled against an external transaction id.
    pub fn requires_reference(&self) -> bool {
        matches!(self, PaymentMethod::Transfer | PaymentMethod::MercadoPago)
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "cash" => Ok(PaymentMethod::Cash),
            "card" => Ok(PaymentMethod::Card),
            "transfer" => Ok(PaymentMethod::Transfer),
            "mercadopago" | "mercado_pago" => Ok(PaymentMethod::MercadoPago),
            other => Err(format!("unknown payment method: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PaymentStatus {
    Pending,
    Completed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    /// Pending and completed payments hold part of the target's balance.
    pub fn holds_balance(&self) -> bool {
        matches!(self, PaymentStatus::Pending | PaymentStatus::Completed)
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        matches!(
            (self, next),
            (PaymentStatus::Pending, PaymentStatus::Completed)
                | (PaymentStatus::Pending, PaymentStatus::Cancelled)
                | (PaymentStatus::Completed, PaymentStatus::Refunded)
        )
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "cancelled" | "canceled" => Ok(PaymentStatus::Cancelled),
            "refunded" => Ok(PaymentStatus::Refunded),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentTarget {
    Booking(Ulid),
    Sale(Ulid),
}

impl PaymentTarget {
    pub fn id(&self) -> Ulid {
        match self {
            PaymentTarget::Booking(id) | PaymentTarget::Sale(id) => *id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            PaymentTarget::Booking(_) => "booking",
            PaymentTarget::Sale(_) => "sale",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: Ulid,
    pub target: PaymentTarget,
    pub amount: Decimal,
    pub tip: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub transaction_id: Option<String>,
    pub paid_at: Ms,
}

/// Input to `Engine::record_payment`. The target kind is resolved by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPayment {
    pub id: Ulid,
    pub target_id: Ulid,
    pub amount: Decimal,
    pub tip: Decimal,
    pub tax: Decimal,
    pub discount: Decimal,
    pub method: PaymentMethod,
    pub transaction_id: Option<String>,
    /// `Pending` or `Completed`.
    pub status: PaymentStatus,
    /// Defaults to the request's `now`.
    pub paid_at: Option<Ms>,
}

/// A point-of-sale product sale attributed to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sale {
    pub id: Ulid,
    pub worker_id: Ulid,
    pub total: Decimal,
    pub sold_at: Ms,
}

// ── Compensation ────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmploymentType {
    Employee,
    Contractor,
}

impl EmploymentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EmploymentType::Employee => "employee",
            EmploymentType::Contractor => "contractor",
        }
    }
}

impl FromStr for EmploymentType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "employee" => Ok(EmploymentType::Employee),
            "contractor" => Ok(EmploymentType::Contractor),
            other => Err(format!("unknown employment type: {other}")),
        }
    }
}

/// How a worker is paid (not to be confused with `PaymentMethod`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompensationMethod {
    Percentage,
    Fixed,
    Mixed,
}

impl CompensationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompensationMethod::Percentage => "percentage",
            CompensationMethod::Fixed => "fixed",
            CompensationMethod::Mixed => "mixed",
        }
    }

    pub fn earns_commission(&self) -> bool {
        !matches!(self, CompensationMethod::Fixed)
    }

    pub fn earns_salary(&self) -> bool {
        matches!(self, CompensationMethod::Fixed | CompensationMethod::Mixed)
    }
}

impl FromStr for CompensationMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "percentage" => Ok(CompensationMethod::Percentage),
            "fixed" => Ok(CompensationMethod::Fixed),
            "mixed" => Ok(CompensationMethod::Mixed),
            other => Err(format!("unknown compensation method: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkerCompensationConfig {
    pub worker_id: Ulid,
    pub employment_type: EmploymentType,
    pub method: CompensationMethod,
    pub fixed_salary: Decimal,
    pub service_pct: Decimal,
    pub product_pct: Decimal,
}

// ── Payroll periods ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PeriodKind {
    Weekly,
    Monthly,
}

impl PeriodKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeriodKind::Weekly => "weekly",
            PeriodKind::Monthly => "monthly",
        }
    }

    /// Inclusive first and last day of the period containing `date`.
    pub fn bounds(&self, date: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            PeriodKind::Weekly => {
                let first =
                    date - Duration::days(date.weekday().num_days_from_monday() as i64);
                (first, first + Duration::days(6))
            }
            PeriodKind::Monthly => {
                let first = date.with_day(1).unwrap_or(date);
                let next = if first.month() == 12 {
                    NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)
                } else {
                    NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)
                };
                let last = next.and_then(|n| n.pred_opt()).unwrap_or(first);
                (first, last)
            }
        }
    }

    /// `YYYY-Www` (ISO week) or `YYYY-MM`.
    pub fn key(&self, date: NaiveDate) -> String {
        match self {
            PeriodKind::Weekly => {
                let iso = date.iso_week();
                format!("{}-W{:02}", iso.year(), iso.week())
            }
            PeriodKind::Monthly => format!("{}-{:02}", date.year(), date.month()),
        }
    }
}

impl FromStr for PeriodKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "weekly" | "week" => Ok(PeriodKind::Weekly),
            "monthly" | "month" => Ok(PeriodKind::Monthly),
            other => Err(format!("unknown period: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PayrollStatus {
    Pending,
    Partial,
    Paid,
}

impl PayrollStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayrollStatus::Pending => "pending",
            PayrollStatus::Partial => "partial",
            PayrollStatus::Paid => "paid",
        }
    }
}

/// One appended payment against a worker's period balance. Never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    pub id: Ulid,
    pub worker_id: Ulid,
    pub period_key: String,
    pub amount: Decimal,
    pub method: PaymentMethod,
    pub notes: Option<String>,
    pub recorded_at: Ms,
}

/// One flat event per state change. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProfessionalUpserted(Professional),
    ServiceUpserted(Service),
    WorkerConfigUpserted(WorkerCompensationConfig),
    BookingCreated(Booking),
    BookingStatusChanged {
        id: Ulid,
        professional_id: Ulid,
        status: BookingStatus,
    },
    SaleRegistered(Sale),
    PaymentRecorded(Payment),
    PaymentStatusChanged {
        id: Ulid,
        status: PaymentStatus,
    },
    SettlementRecorded(Settlement),
}

// ── Query result types ───────────────────────────────────────────

/// An offerable start time. Past slots stay selectable for backfills.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: Ms,
    pub past: bool,
}

impl Slot {
    /// `HH:mm`, or `PAST:HH:mm` for slots before now.
    pub fn label(&self) -> String {
        let hhmm = time_of(self.start)
            .map(|t| t.format("%H:%M").to_string())
            .unwrap_or_default();
        if self.past {
            format!("PAST:{hhmm}")
        } else {
            hhmm
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyStats {
    pub date: NaiveDate,
    pub total_revenue: Decimal,
    pub total_tips: Decimal,
    /// One entry per `PaymentMethod::ALL`, in that order.
    pub per_method: Vec<(PaymentMethod, Decimal)>,
    pub payment_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeriodStats {
    pub start: NaiveDate,
    pub end: NaiveDate,
    /// One entry per day in `start..=end`, zero-filled.
    pub days: Vec<DailyStats>,
    pub per_method: Vec<(PaymentMethod, Decimal)>,
    pub total_revenue: Decimal,
    pub total_tips: Decimal,
    pub total_commissions: Decimal,
    pub payment_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollRow {
    pub worker_id: Ulid,
    pub period: PeriodKind,
    pub period_key: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
    pub services_count: u32,
    pub service_revenue: Decimal,
    pub product_revenue: Decimal,
    pub service_commission: Decimal,
    pub product_commission: Decimal,
    pub commissions: Decimal,
    pub fixed_salary: Decimal,
    pub total_to_pay: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
    pub status: PayrollStatus,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PayrollSummary {
    pub workers: u32,
    pub service_revenue: Decimal,
    pub product_revenue: Decimal,
    pub commissions: Decimal,
    pub fixed_salaries: Decimal,
    pub total_to_pay: Decimal,
    pub paid_amount: Decimal,
    pub remaining_amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PayrollReport {
    pub period: PeriodKind,
    pub period_key: String,
    pub rows: Vec<PayrollRow>,
    pub summary: PayrollSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FinancialStats {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub revenue: Decimal,
    pub salaries: Decimal,
    pub commissions: Decimal,
    pub expenses: Decimal,
    pub net_profit: Decimal,
    pub margin_pct: Decimal,
    /// Revenue growth vs. the preceding range of equal length; `None` when that revenue is zero.
    pub growth_pct: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn span_overlap_is_half_open() {
        let a = Span::new(100, 200);
        assert!(a.overlaps(&Span::new(150, 250)));
        assert!(!a.overlaps(&Span::new(200, 300)));
        assert!(a.contains_instant(100));
        assert!(!a.contains_instant(200));
    }

    #[test]
    fn working_hours_parse_and_display() {
        let hours: WorkingHours = "mon 09:00-13:00, Tue 10:30-18:00".parse().unwrap();
        assert_eq!(hours.window(Weekday::Mon), DayWindow::new(9 * 60, 13 * 60));
        assert_eq!(hours.window(Weekday::Tue), DayWindow::new(10 * 60 + 30, 18 * 60));
        assert_eq!(hours.window(Weekday::Wed), None);
        assert_eq!(hours.to_string(), "mon 09:00-13:00, tue 10:30-18:00");
    }

    #[test]
    fn working_hours_rejects_garbage() {
        assert!("mon 13:00-09:00".parse::<WorkingHours>().is_err());
        assert!("funday 09:00-10:00".parse::<WorkingHours>().is_err());
        assert!("mon 09:00".parse::<WorkingHours>().is_err());
        assert!("mon 09:00-10:00, mon 11:00-12:00".parse::<WorkingHours>().is_err());
        assert!("".parse::<WorkingHours>().unwrap().is_empty());
    }

    #[test]
    fn working_hours_until_midnight() {
        let hours: WorkingHours = "sat 20:00-24:00".parse().unwrap();
        let w = hours.window(Weekday::Sat).unwrap();
        let span = w.on(date(2026, 10, 17));
        assert_eq!(span.duration_ms(), 4 * 60 * MINUTE_MS);
        assert_eq!(span.end, day_start(date(2026, 10, 18)));
    }

    #[test]
    fn money_rounds_half_away_from_zero() {
        assert_eq!(round_money(Decimal::new(12345, 3)), Decimal::new(1235, 2));
        assert_eq!(percent_of(Decimal::from(1000), Decimal::from(20)), Decimal::from(200));
        assert_eq!(percent_of(Decimal::new(3333, 2), Decimal::from(10)), Decimal::new(333, 2));
    }

    #[test]
    fn deposit_mode_prefers_fixed_amount() {
        let cfg = DepositConfig {
            requires_deposit: true,
            percentage: Some(Decimal::from(20)),
            fixed_amount: Some(Decimal::from(150)),
            ..DepositConfig::default()
        };
        assert_eq!(cfg.mode(), Some(DepositMode::FixedAmount(Decimal::from(150))));
    }

    #[test]
    fn weekly_period_is_iso_week() {
        // 2026-10-18 is a Sunday.
        let (first, last) = PeriodKind::Weekly.bounds(date(2026, 10, 18));
        assert_eq!(first, date(2026, 10, 12));
        assert_eq!(last, date(2026, 10, 18));
        assert_eq!(PeriodKind::Weekly.key(date(2026, 10, 18)), "2026-W42");
    }

    #[test]
    fn monthly_period_handles_december() {
        let (first, last) = PeriodKind::Monthly.bounds(date(2026, 12, 9));
        assert_eq!(first, date(2026, 12, 1));
        assert_eq!(last, date(2026, 12, 31));
        assert_eq!(PeriodKind::Monthly.key(date(2026, 12, 9)), "2026-12");
        let (_, feb_end) = PeriodKind::Monthly.bounds(date(2028, 2, 10));
        assert_eq!(feb_end, date(2028, 2, 29));
    }

    #[test]
    fn booking_transitions_are_forward_only() {
        use BookingStatus::*;
        assert!(Pending.can_transition_to(Confirmed));
        assert!(Confirmed.can_transition_to(Completed));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Cancelled));
        assert!(!Cancelled.can_transition_to(Confirmed));
    }

    #[test]
    fn slot_label_marks_past() {
        let start = day_start(date(2026, 10, 18)) + 9 * 60 * MINUTE_MS;
        assert_eq!(Slot { start, past: false }.label(), "09:00");
        assert_eq!(Slot { start, past: true }.label(), "PAST:09:00");
    }

    #[test]
    fn event_serialization_roundtrip() {
        let event = Event::PaymentRecorded(Payment {
            id: Ulid::new(),
            target: PaymentTarget::Booking(Ulid::new()),
            amount: Decimal::new(125050, 2),
            tip: Decimal::ZERO,
            tax: Decimal::new(2101, 2),
            discount: Decimal::ZERO,
            method: PaymentMethod::MercadoPago,
            status: PaymentStatus::Completed,
            transaction_id: Some("mp-123".into()),
            paid_at: 1_700_000_000_000,
        });
        let bytes = bincode::serialize(&event).unwrap();
        let decoded: Event = bincode::deserialize(&bytes).unwrap();
        assert_eq!(event, decoded);
    }
}
