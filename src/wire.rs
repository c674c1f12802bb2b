use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::Sink;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{
    AuthSource, DefaultServerParameterProvider, LoginInfo, Password, StartupHandler,
};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::data::DataRow;
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::engine::{DepositDecision, Engine, EngineError};
use crate::model::*;
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

// ── Auth ─────────────────────────────────────────────────────────

/// Single shared password for every user and tenant.
#[derive(Debug)]
pub struct PasswordSource {
    password: String,
}

impl PasswordSource {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for PasswordSource {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}

// ── Result shapes ────────────────────────────────────────────────

fn fields(cols: &[(&str, Type)]) -> Vec<FieldInfo> {
    cols.iter()
        .map(|(name, ty)| FieldInfo::new((*name).into(), None, None, ty.clone(), FieldFormat::Text))
        .collect()
}

/// Column layout of every relation that returns rows. Money travels as
/// decimal text, instants as unix milliseconds.
fn relation_schema(relation: &str) -> Vec<FieldInfo> {
    let text = Type::VARCHAR;
    let int = Type::INT8;
    let flag = Type::BOOL;
    match relation {
        "professionals" => fields(&[
            ("id", text.clone()),
            ("name", text.clone()),
            ("hours", text.clone()),
            ("services", text),
        ]),
        "services" => fields(&[
            ("id", text.clone()),
            ("name", text.clone()),
            ("duration_min", int.clone()),
            ("price", text.clone()),
            ("requires_deposit", flag),
            ("deposit_percentage", text.clone()),
            ("deposit_fixed_amount", text.clone()),
            ("deposit_policy", text),
            ("advance_days", int),
        ]),
        "workers" => fields(&[
            ("worker_id", text.clone()),
            ("employment_type", text.clone()),
            ("method", text.clone()),
            ("fixed_salary", text.clone()),
            ("service_pct", text.clone()),
            ("product_pct", text),
        ]),
        "sales" => fields(&[
            ("id", text.clone()),
            ("worker_id", text.clone()),
            ("total", text),
            ("sold_at", int),
        ]),
        "bookings" => fields(&[
            ("id", text.clone()),
            ("professional_id", text.clone()),
            ("service_id", text.clone()),
            ("customer_id", text.clone()),
            ("start", int.clone()),
            ("end", int.clone()),
            ("status", text.clone()),
            ("deposit_required", flag),
            ("deposit_amount", text.clone()),
            ("price", text.clone()),
            ("notes", text),
            ("created_at", int),
        ]),
        "payments" => fields(&[
            ("id", text.clone()),
            ("target_kind", text.clone()),
            ("target_id", text.clone()),
            ("amount", text.clone()),
            ("tip", text.clone()),
            ("tax", text.clone()),
            ("discount", text.clone()),
            ("method", text.clone()),
            ("status", text.clone()),
            ("transaction_id", text),
            ("paid_at", int),
        ]),
        "payroll_settlements" => fields(&[
            ("id", text.clone()),
            ("worker_id", text.clone()),
            ("period_key", text.clone()),
            ("amount", text.clone()),
            ("method", text.clone()),
            ("notes", text),
            ("recorded_at", int),
        ]),
        "slots" => fields(&[("start", int), ("label", text), ("past", flag)]),
        "deposit_quote" => fields(&[("required", flag), ("amount", text)]),
        "daily_stats" => fields(&[
            ("day", text.clone()),
            ("total_revenue", text.clone()),
            ("total_tips", text.clone()),
            ("payment_count", int),
            ("per_method", text),
        ]),
        "period_stats" => fields(&[
            ("start_day", text.clone()),
            ("end_day", text.clone()),
            ("total_revenue", text.clone()),
            ("total_tips", text.clone()),
            ("total_commissions", text.clone()),
            ("payment_count", int),
            ("per_method", text.clone()),
            ("days", text),
        ]),
        "payroll" => fields(&[
            ("worker_id", text.clone()),
            ("period", text.clone()),
            ("period_key", text.clone()),
            ("period_start", text.clone()),
            ("period_end", text.clone()),
            ("services_count", int),
            ("service_revenue", text.clone()),
            ("product_revenue", text.clone()),
            ("service_commission", text.clone()),
            ("product_commission", text.clone()),
            ("commissions", text.clone()),
            ("fixed_salary", text.clone()),
            ("total_to_pay", text.clone()),
            ("paid_amount", text.clone()),
            ("remaining_amount", text.clone()),
            ("status", text),
        ]),
        "payroll_summary" => fields(&[
            ("period", text.clone()),
            ("period_key", text.clone()),
            ("workers", int),
            ("service_revenue", text.clone()),
            ("product_revenue", text.clone()),
            ("commissions", text.clone()),
            ("fixed_salaries", text.clone()),
            ("total_to_pay", text.clone()),
            ("paid_amount", text.clone()),
            ("remaining_amount", text),
        ]),
        "financial_stats" => fields(&[
            ("start_day", text.clone()),
            ("end_day", text.clone()),
            ("revenue", text.clone()),
            ("salaries", text.clone()),
            ("commissions", text.clone()),
            ("expenses", text.clone()),
            ("net_profit", text.clone()),
            ("margin_pct", text.clone()),
            ("growth_pct", text),
        ]),
        _ => Vec::new(),
    }
}

/// Encode `items` as one query response in `relation`'s layout.
fn rows<T>(
    relation: &str,
    items: &[T],
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(relation_schema(relation));
    let rows: Vec<PgWireResult<DataRow>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn opt_text<T: ToString>(value: &Option<T>) -> Option<String> {
    value.as_ref().map(ToString::to_string)
}

fn per_method_json(per_method: &[(PaymentMethod, rust_decimal::Decimal)]) -> String {
    let map: serde_json::Map<String, serde_json::Value> = per_method
        .iter()
        .map(|(m, amount)| (m.as_str().to_string(), amount.to_string().into()))
        .collect();
    serde_json::Value::Object(map).to_string()
}

fn encode_professional(e: &mut DataRowEncoder, p: &Professional) -> PgWireResult<()> {
    let services: Vec<String> = p.services.iter().map(Ulid::to_string).collect();
    e.encode_field(&p.id.to_string())?;
    e.encode_field(&p.name)?;
    e.encode_field(&p.hours.to_string())?;
    e.encode_field(&services.join(","))
}

fn encode_service(e: &mut DataRowEncoder, s: &Service) -> PgWireResult<()> {
    e.encode_field(&s.id.to_string())?;
    e.encode_field(&s.name)?;
    e.encode_field(&i64::from(s.duration_min))?;
    e.encode_field(&s.price.to_string())?;
    e.encode_field(&s.deposit.requires_deposit)?;
    e.encode_field(&opt_text(&s.deposit.percentage))?;
    e.encode_field(&opt_text(&s.deposit.fixed_amount))?;
    e.encode_field(&s.deposit.policy.as_str().to_string())?;
    e.encode_field(&i64::from(s.deposit.advance_days))
}

fn encode_worker(e: &mut DataRowEncoder, w: &WorkerCompensationConfig) -> PgWireResult<()> {
    e.encode_field(&w.worker_id.to_string())?;
    e.encode_field(&w.employment_type.as_str().to_string())?;
    e.encode_field(&w.method.as_str().to_string())?;
    e.encode_field(&w.fixed_salary.to_string())?;
    e.encode_field(&w.service_pct.to_string())?;
    e.encode_field(&w.product_pct.to_string())
}

fn encode_sale(e: &mut DataRowEncoder, s: &Sale) -> PgWireResult<()> {
    e.encode_field(&s.id.to_string())?;
    e.encode_field(&s.worker_id.to_string())?;
    e.encode_field(&s.total.to_string())?;
    e.encode_field(&s.sold_at)
}

fn encode_booking(e: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    e.encode_field(&b.id.to_string())?;
    e.encode_field(&b.professional_id.to_string())?;
    e.encode_field(&b.service_id.to_string())?;
    e.encode_field(&b.customer_id.to_string())?;
    e.encode_field(&b.span.start)?;
    e.encode_field(&b.span.end)?;
    e.encode_field(&b.status.as_str().to_string())?;
    e.encode_field(&b.deposit_required)?;
    e.encode_field(&b.deposit_amount.to_string())?;
    e.encode_field(&b.price.to_string())?;
    e.encode_field(&b.notes)?;
    e.encode_field(&b.created_at)
}

fn encode_payment(e: &mut DataRowEncoder, p: &Payment) -> PgWireResult<()> {
    e.encode_field(&p.id.to_string())?;
    e.encode_field(&p.target.kind().to_string())?;
    e.encode_field(&p.target.id().to_string())?;
    e.encode_field(&p.amount.to_string())?;
    e.encode_field(&p.tip.to_string())?;
    e.encode_field(&p.tax.to_string())?;
    e.encode_field(&p.discount.to_string())?;
    e.encode_field(&p.method.as_str().to_string())?;
    e.encode_field(&p.status.as_str().to_string())?;
    e.encode_field(&p.transaction_id)?;
    e.encode_field(&p.paid_at)
}

fn encode_settlement(e: &mut DataRowEncoder, s: &Settlement) -> PgWireResult<()> {
    e.encode_field(&s.id.to_string())?;
    e.encode_field(&s.worker_id.to_string())?;
    e.encode_field(&s.period_key)?;
    e.encode_field(&s.amount.to_string())?;
    e.encode_field(&s.method.as_str().to_string())?;
    e.encode_field(&s.notes)?;
    e.encode_field(&s.recorded_at)
}

fn encode_slot(e: &mut DataRowEncoder, s: &Slot) -> PgWireResult<()> {
    e.encode_field(&s.start)?;
    e.encode_field(&s.label())?;
    e.encode_field(&s.past)
}

fn encode_deposit_quote(e: &mut DataRowEncoder, d: &DepositDecision) -> PgWireResult<()> {
    e.encode_field(&d.required)?;
    e.encode_field(&d.amount.to_string())
}

fn encode_daily_stats(e: &mut DataRowEncoder, d: &DailyStats) -> PgWireResult<()> {
    e.encode_field(&d.date.to_string())?;
    e.encode_field(&d.total_revenue.to_string())?;
    e.encode_field(&d.total_tips.to_string())?;
    e.encode_field(&i64::from(d.payment_count))?;
    e.encode_field(&per_method_json(&d.per_method))
}

fn encode_period_stats(e: &mut DataRowEncoder, p: &PeriodStats) -> PgWireResult<()> {
    let days: Vec<serde_json::Value> = p
        .days
        .iter()
        .map(|d| {
            serde_json::json!({
                "day": d.date.to_string(),
                "total_revenue": d.total_revenue.to_string(),
                "total_tips": d.total_tips.to_string(),
                "payment_count": d.payment_count,
            })
        })
        .collect();
    e.encode_field(&p.start.to_string())?;
    e.encode_field(&p.end.to_string())?;
    e.encode_field(&p.total_revenue.to_string())?;
    e.encode_field(&p.total_tips.to_string())?;
    e.encode_field(&p.total_commissions.to_string())?;
    e.encode_field(&i64::from(p.payment_count))?;
    e.encode_field(&per_method_json(&p.per_method))?;
    e.encode_field(&serde_json::Value::Array(days).to_string())
}

fn encode_payroll_row(e: &mut DataRowEncoder, r: &PayrollRow) -> PgWireResult<()> {
    e.encode_field(&r.worker_id.to_string())?;
    e.encode_field(&r.period.as_str().to_string())?;
    e.encode_field(&r.period_key)?;
    e.encode_field(&r.period_start.to_string())?;
    e.encode_field(&r.period_end.to_string())?;
    e.encode_field(&i64::from(r.services_count))?;
    e.encode_field(&r.service_revenue.to_string())?;
    e.encode_field(&r.product_revenue.to_string())?;
    e.encode_field(&r.service_commission.to_string())?;
    e.encode_field(&r.product_commission.to_string())?;
    e.encode_field(&r.commissions.to_string())?;
    e.encode_field(&r.fixed_salary.to_string())?;
    e.encode_field(&r.total_to_pay.to_string())?;
    e.encode_field(&r.paid_amount.to_string())?;
    e.encode_field(&r.remaining_amount.to_string())?;
    e.encode_field(&r.status.as_str().to_string())
}

fn encode_payroll_summary(e: &mut DataRowEncoder, r: &PayrollReport) -> PgWireResult<()> {
    let s = &r.summary;
    e.encode_field(&r.period.as_str().to_string())?;
    e.encode_field(&r.period_key)?;
    e.encode_field(&i64::from(s.workers))?;
    e.encode_field(&s.service_revenue.to_string())?;
    e.encode_field(&s.product_revenue.to_string())?;
    e.encode_field(&s.commissions.to_string())?;
    e.encode_field(&s.fixed_salaries.to_string())?;
    e.encode_field(&s.total_to_pay.to_string())?;
    e.encode_field(&s.paid_amount.to_string())?;
    e.encode_field(&s.remaining_amount.to_string())
}

fn encode_financial_stats(e: &mut DataRowEncoder, f: &FinancialStats) -> PgWireResult<()> {
    e.encode_field(&f.start.to_string())?;
    e.encode_field(&f.end.to_string())?;
    e.encode_field(&f.revenue.to_string())?;
    e.encode_field(&f.salaries.to_string())?;
    e.encode_field(&f.commissions.to_string())?;
    e.encode_field(&f.expenses.to_string())?;
    e.encode_field(&f.net_profit.to_string())?;
    e.encode_field(&f.margin_pct.to_string())?;
    e.encode_field(&opt_text(&f.growth_pct))
}

// ── Handler ──────────────────────────────────────────────────────

pub struct ApptdHandler {
    tenant_manager: Arc<TenantManager>,
    query_parser: Arc<ApptdQueryParser>,
}

impl ApptdHandler {
    pub fn new(tenant_manager: Arc<TenantManager>) -> Self {
        Self {
            tenant_manager,
            query_parser: Arc::new(ApptdQueryParser),
        }
    }

    fn resolve_engine<C: ClientInfo>(&self, client: &C) -> PgWireResult<Arc<Engine>> {
        let db = client
            .metadata()
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        self.tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))
    }

    /// Parse and run one statement, recording RED metrics.
    async fn run(&self, engine: &Engine, query: &str) -> PgWireResult<Vec<Response>> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(engine, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, engine: &Engine, cmd: Command) -> PgWireResult<Vec<Response>> {
        let ctx = RequestContext::system();
        let response = match cmd {
            Command::UpsertProfessional(p) => {
                engine.upsert_professional(p).await.map_err(engine_err)?;
                inserted()
            }
            Command::UpsertService(s) => {
                engine.upsert_service(s).await.map_err(engine_err)?;
                inserted()
            }
            Command::UpsertWorker(w) => {
                engine.upsert_worker_config(w).await.map_err(engine_err)?;
                inserted()
            }
            Command::InsertSale {
                id,
                worker_id,
                total,
                sold_at,
            } => {
                let sale = Sale {
                    id,
                    worker_id,
                    total,
                    sold_at: sold_at.unwrap_or(ctx.now),
                };
                engine.register_sale(sale).await.map_err(engine_err)?;
                inserted()
            }
            Command::InsertBooking(req) => {
                let booking = engine.create_booking(&ctx, req).await.map_err(engine_err)?;
                rows("bookings", &[booking], encode_booking)
            }
            Command::TransitionBooking { id, status } => {
                let booking = match status {
                    BookingStatus::Confirmed => engine.confirm_booking(id).await,
                    BookingStatus::Completed => engine.complete_booking(&ctx, id).await,
                    BookingStatus::Cancelled => engine.cancel_booking(id).await,
                    BookingStatus::Pending => Err(EngineError::validation(
                        "a booking cannot move back to pending",
                    )),
                }
                .map_err(engine_err)?;
                rows("bookings", &[booking], encode_booking)
            }
            Command::CancelBooking { id } => {
                engine.cancel_booking(id).await.map_err(engine_err)?;
                Response::Execution(Tag::new("DELETE").with_rows(1))
            }
            Command::InsertPayment(req) => {
                let payment = engine.record_payment(&ctx, req).await.map_err(engine_err)?;
                rows("payments", &[payment], encode_payment)
            }
            Command::TransitionPayment { id, status } => {
                let payment = engine
                    .update_payment_status(id, status)
                    .await
                    .map_err(engine_err)?;
                rows("payments", &[payment], encode_payment)
            }
            Command::MarkPaid {
                id,
                worker_id,
                period,
                date,
                amount,
                method,
                notes,
            } => {
                let row = engine
                    .mark_paid(&ctx, id, worker_id, period, date, amount, method, notes)
                    .await
                    .map_err(engine_err)?;
                rows("payroll", &[row], encode_payroll_row)
            }
            Command::SelectProfessionals => {
                let list = engine.list_professionals().await;
                rows("professionals", &list, encode_professional)
            }
            Command::SelectServices => rows("services", &engine.list_services(), encode_service),
            Command::SelectWorkers => rows("workers", &engine.list_worker_configs(), encode_worker),
            Command::SelectSales => rows("sales", &engine.list_sales(), encode_sale),
            Command::SelectBookings {
                id,
                professional_id,
            } => {
                let list = match id {
                    Some(id) => vec![engine.get_booking(&id).map_err(engine_err)?],
                    None => engine.list_bookings(professional_id).map_err(engine_err)?,
                };
                rows("bookings", &list, encode_booking)
            }
            Command::SelectPayments { target_id } => {
                rows("payments", &engine.list_payments(target_id), encode_payment)
            }
            Command::SelectSettlements {
                worker_id,
                period_key,
            } => rows(
                "payroll_settlements",
                &engine.list_settlements(worker_id, &period_key),
                encode_settlement,
            ),
            Command::SelectSlots {
                professional_id,
                service_id,
                date,
            } => {
                let slots = engine
                    .list_slots(&ctx, professional_id, service_id, date)
                    .await
                    .map_err(engine_err)?;
                rows("slots", &slots, encode_slot)
            }
            Command::SelectDepositQuote {
                service_id,
                customer_id,
                start,
            } => {
                let quote = engine
                    .quote_deposit(&ctx, service_id, customer_id, start)
                    .map_err(engine_err)?;
                rows("deposit_quote", &[quote], encode_deposit_quote)
            }
            Command::SelectDailyStats { date } => {
                rows("daily_stats", &[engine.daily_stats(date)], encode_daily_stats)
            }
            Command::SelectPeriodStats { start, end } => {
                let stats = engine.period_stats(start, end).map_err(engine_err)?;
                rows("period_stats", &[stats], encode_period_stats)
            }
            Command::SelectPayroll { period, date } => {
                let report = engine.compute_payroll(period, date);
                rows("payroll", &report.rows, encode_payroll_row)
            }
            Command::SelectPayrollSummary { period, date } => {
                let report = engine.compute_payroll(period, date);
                rows("payroll_summary", &[report], encode_payroll_summary)
            }
            Command::SelectFinancialStats { start, end } => {
                let stats = engine.financial_stats(start, end).map_err(engine_err)?;
                rows("financial_stats", &[stats], encode_financial_stats)
            }
        };
        Ok(vec![response])
    }
}

fn inserted() -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(1))
}

#[async_trait]
impl SimpleQueryHandler for ApptdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        self.run(&engine, query).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ApptdQueryParser;

#[async_trait]
impl QueryParser for ApptdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(
        &self,
        _client: &C,
        sql: &str,
        _types: &[Option<Type>],
    ) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(
        &self,
        stmt: &String,
        _column_format: Option<&Format>,
    ) -> PgWireResult<Vec<FieldInfo>> {
        Ok(statement_schema(stmt))
    }
}

fn statement_schema(sql: &str) -> Vec<FieldInfo> {
    sql::result_relation(sql).map(relation_schema).unwrap_or_default()
}

#[async_trait]
impl ExtendedQueryHandler for ApptdHandler {
    type Statement = String;
    type QueryParser = ApptdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let engine = self.resolve_engine(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &sql)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| user_error("XX000", "statement produced no response".into()))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(
            param_types,
            statement_schema(&target.statement),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(statement_schema(
            &target.statement.statement,
        )))
    }
}

/// Count the highest $N parameter placeholder in the SQL string.
fn count_params(sql: &str) -> usize {
    let mut max = 0usize;
    let bytes = sql.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'$' {
            i += 1;
            let start = i;
            while i < bytes.len() && bytes[i].is_ascii_digit() {
                i += 1;
            }
            if let Ok(n) = sql[start..i].parse::<usize>() {
                max = max.max(n);
            }
        } else {
            i += 1;
        }
    }
    max
}

/// Substitute $1, $2, ... placeholders with bound parameter values (text format).
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    // Highest index first so `$1` never eats the prefix of `$10`.
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => {
                let text = String::from_utf8_lossy(bytes);
                format!("'{}'", text.replace('\'', "''"))
            }
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ApptdFactory {
    handler: Arc<ApptdHandler>,
    auth_handler:
        Arc<CleartextPasswordAuthStartupHandler<PasswordSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ApptdFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, password: String) -> Self {
        Self {
            handler: Arc::new(ApptdHandler::new(tenant_manager)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                PasswordSource::new(password),
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ApptdFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client socket until it disconnects.
pub async fn process_connection(
    socket: TcpStream,
    tenant_manager: Arc<TenantManager>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = ApptdFactory::new(tenant_manager, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new(
        "ERROR".into(),
        code.into(),
        message,
    )))
}

/// SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::SlotConflict { .. } => "23P01",
        EngineError::Overpayment { .. } => "22003",
        EngineError::PolicyViolation(_) => "P0002",
        EngineError::NotFound(_) => "02000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn count_params_finds_highest_index() {
        assert_eq!(count_params("SELECT * FROM slots"), 0);
        assert_eq!(
            count_params("SELECT * FROM slots WHERE professional_id = $2 AND service_id = $1 AND day = $3"),
            3
        );
        assert_eq!(count_params("INSERT INTO sales VALUES ($1, $2, $10, $4)"), 10);
    }

    #[test]
    fn engine_errors_map_to_sqlstate() {
        assert_eq!(sqlstate(&EngineError::validation("x")), "22023");
        assert_eq!(
            sqlstate(&EngineError::SlotConflict {
                booking: Ulid::new(),
                span: Span::new(0, 1),
            }),
            "23P01"
        );
        assert_eq!(
            sqlstate(&EngineError::Overpayment {
                requested: Decimal::from(2),
                remaining: Decimal::ONE,
            }),
            "22003"
        );
        assert_eq!(sqlstate(&EngineError::PolicyViolation("deposit".into())), "P0002");
        assert_eq!(sqlstate(&EngineError::NotFound(Ulid::new())), "02000");
        assert_eq!(sqlstate(&EngineError::LimitExceeded("too many")), "54000");
        assert_eq!(sqlstate(&EngineError::WalError("disk".into())), "58030");
    }

    #[test]
    fn schemas_cover_every_read_relation() {
        for relation in [
            "professionals",
            "services",
            "workers",
            "sales",
            "bookings",
            "payments",
            "payroll_settlements",
            "slots",
            "deposit_quote",
            "daily_stats",
            "period_stats",
            "payroll",
            "payroll_summary",
            "financial_stats",
        ] {
            assert!(!relation_schema(relation).is_empty(), "{relation}");
        }
        assert_eq!(relation_schema("bookings").len(), 12);
        assert!(relation_schema("nope").is_empty());
    }

    #[test]
    fn per_method_json_uses_method_names() {
        let json = per_method_json(&[
            (PaymentMethod::Cash, Decimal::new(1050, 2)),
            (PaymentMethod::MercadoPago, Decimal::ZERO),
        ]);
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["cash"], "10.50");
        assert_eq!(value["mercadopago"], "0");
    }
}
