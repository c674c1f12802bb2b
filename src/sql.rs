use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    UpsertProfessional(Professional),
    UpsertService(Service),
    UpsertWorker(WorkerCompensationConfig),
    InsertSale {
        id: Ulid,
        worker_id: Ulid,
        total: Decimal,
        sold_at: Option<Ms>,
    },
    InsertBooking(NewBooking),
    TransitionBooking {
        id: Ulid,
        status: BookingStatus,
    },
    CancelBooking {
        id: Ulid,
    },
    InsertPayment(NewPayment),
    TransitionPayment {
        id: Ulid,
        status: PaymentStatus,
    },
    MarkPaid {
        id: Ulid,
        worker_id: Ulid,
        period: PeriodKind,
        date: NaiveDate,
        amount: Decimal,
        method: PaymentMethod,
        notes: Option<String>,
    },
    SelectProfessionals,
    SelectServices,
    SelectWorkers,
    SelectSales,
    SelectBookings {
        id: Option<Ulid>,
        professional_id: Option<Ulid>,
    },
    SelectPayments {
        target_id: Option<Ulid>,
    },
    SelectSettlements {
        worker_id: Ulid,
        period_key: String,
    },
    SelectSlots {
        professional_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
    },
    SelectDepositQuote {
        service_id: Ulid,
        customer_id: Ulid,
        start: Ms,
    },
    SelectDailyStats {
        date: NaiveDate,
    },
    SelectPeriodStats {
        start: NaiveDate,
        end: NaiveDate,
    },
    SelectPayroll {
        period: PeriodKind,
        date: NaiveDate,
    },
    SelectPayrollSummary {
        period: PeriodKind,
        date: NaiveDate,
    },
    SelectFinancialStats {
        start: NaiveDate,
        end: NaiveDate,
    },
}

// Positional column order used when an INSERT names no columns.
const PROFESSIONAL_COLS: &[&str] = &["id", "name", "hours", "services"];
const SERVICE_COLS: &[&str] = &[
    "id",
    "name",
    "duration_min",
    "price",
    "requires_deposit",
    "deposit_percentage",
    "deposit_fixed_amount",
    "deposit_policy",
    "advance_days",
];
const WORKER_COLS: &[&str] = &[
    "worker_id",
    "employment_type",
    "method",
    "fixed_salary",
    "service_pct",
    "product_pct",
];
const SALE_COLS: &[&str] = &["id", "worker_id", "total", "sold_at"];
const BOOKING_COLS: &[&str] = &[
    "id",
    "professional_id",
    "service_id",
    "customer_id",
    "start",
    "end",
    "notes",
    "allow_past",
];
const TRANSITION_COLS: &[&str] = &["id", "status"];
const PAYMENT_COLS: &[&str] = &[
    "id",
    "target_id",
    "amount",
    "tip",
    "tax",
    "discount",
    "method",
    "transaction_id",
    "status",
    "paid_at",
];
const SETTLEMENT_COLS: &[&str] = &["id", "worker_id", "period", "day", "amount", "method", "notes"];

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(first) = stmts.first() else {
        return Err(SqlError::Empty);
    };

    match first {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

/// Relation whose row shape `sql` returns, if it returns rows. Works on
/// statements with unbound `$n` placeholders.
pub fn result_relation(sql: &str) -> Option<&'static str> {
    let stmts = Parser::parse_sql(&PostgreSqlDialect {}, sql).ok()?;
    match stmts.first()? {
        Statement::Insert(insert) => match insert_table_name(insert).ok()?.as_str() {
            "bookings" | "booking_transitions" => Some("bookings"),
            "payments" | "payment_transitions" => Some("payments"),
            "payroll_settlements" => Some("payroll"),
            _ => None,
        },
        Statement::Query(query) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return None;
            };
            let name = table_factor_name(&select.from.first()?.relation).ok()?;
            READ_RELATIONS.iter().copied().find(|r| *r == name)
        }
        _ => None,
    }
}

const READ_RELATIONS: &[&str] = &[
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
];

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row with its column names resolved.
struct Row {
    table: &'static str,
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn get(&self, col: &str) -> Option<&Expr> {
        self.cells
            .iter()
            .find(|(name, _)| name == col)
            .map(|(_, e)| e)
            .filter(|e| !is_null(e))
    }

    fn req(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.get(col).ok_or(SqlError::MissingColumn(self.table, col))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let (table, cols): (&'static str, &[&str]) = match table.as_str() {
        "professionals" => ("professionals", PROFESSIONAL_COLS),
        "services" => ("services", SERVICE_COLS),
        "workers" => ("workers", WORKER_COLS),
        "sales" => ("sales", SALE_COLS),
        "bookings" => ("bookings", BOOKING_COLS),
        "booking_transitions" => ("booking_transitions", TRANSITION_COLS),
        "payments" => ("payments", PAYMENT_COLS),
        "payment_transitions" => ("payment_transitions", TRANSITION_COLS),
        "payroll_settlements" => ("payroll_settlements", SETTLEMENT_COLS),
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let row = insert_row(insert, table, cols)?;

    match table {
        "professionals" => Ok(Command::UpsertProfessional(Professional {
            id: parse_ulid(row.req("id")?)?,
            name: row.get("name").map(parse_string).transpose()?,
            hours: match row.get("hours") {
                Some(e) => parse_string(e)?
                    .parse()
                    .map_err(|e: HoursParseError| SqlError::Parse(e.to_string()))?,
                None => WorkingHours::new(),
            },
            services: match row.get("services") {
                Some(e) => parse_ulid_list(&parse_string(e)?)?,
                None => Vec::new(),
            },
        })),
        "services" => {
            let requires_deposit = row.get("requires_deposit").map(parse_bool).transpose()?;
            let percentage = row.get("deposit_percentage").map(parse_decimal).transpose()?;
            let fixed_amount = row.get("deposit_fixed_amount").map(parse_decimal).transpose()?;
            Ok(Command::UpsertService(Service {
                id: parse_ulid(row.req("id")?)?,
                name: row.get("name").map(parse_string).transpose()?,
                duration_min: parse_u32(row.req("duration_min")?)?,
                price: parse_decimal(row.req("price")?)?,
                deposit: DepositConfig {
                    requires_deposit: requires_deposit
                        .unwrap_or(percentage.is_some() || fixed_amount.is_some()),
                    percentage,
                    fixed_amount,
                    policy: match row.get("deposit_policy") {
                        Some(e) => parse_enum(e)?,
                        None => DepositPolicy::AllCustomers,
                    },
                    advance_days: row.get("advance_days").map(parse_u32).transpose()?.unwrap_or(0),
                },
            }))
        }
        "workers" => Ok(Command::UpsertWorker(WorkerCompensationConfig {
            worker_id: parse_ulid(row.req("worker_id")?)?,
            employment_type: match row.get("employment_type") {
                Some(e) => parse_enum(e)?,
                None => EmploymentType::Employee,
            },
            method: parse_enum(row.req("method")?)?,
            fixed_salary: decimal_or_zero(&row, "fixed_salary")?,
            service_pct: decimal_or_zero(&row, "service_pct")?,
            product_pct: decimal_or_zero(&row, "product_pct")?,
        })),
        "sales" => Ok(Command::InsertSale {
            id: parse_ulid(row.req("id")?)?,
            worker_id: parse_ulid(row.req("worker_id")?)?,
            total: parse_decimal(row.req("total")?)?,
            sold_at: row.get("sold_at").map(parse_instant).transpose()?,
        }),
        "bookings" => Ok(Command::InsertBooking(NewBooking {
            id: parse_ulid(row.req("id")?)?,
            professional_id: parse_ulid(row.req("professional_id")?)?,
            service_id: parse_ulid(row.req("service_id")?)?,
            customer_id: parse_ulid(row.req("customer_id")?)?,
            start: parse_instant(row.req("start")?)?,
            end: row.get("end").map(parse_instant).transpose()?,
            notes: row.get("notes").map(parse_string).transpose()?,
            allow_past: row.get("allow_past").map(parse_bool).transpose()?.unwrap_or(false),
        })),
        "booking_transitions" => Ok(Command::TransitionBooking {
            id: parse_ulid(row.req("id")?)?,
            status: parse_enum(row.req("status")?)?,
        }),
        "payments" => Ok(Command::InsertPayment(NewPayment {
            id: parse_ulid(row.req("id")?)?,
            target_id: parse_ulid(row.req("target_id")?)?,
            amount: parse_decimal(row.req("amount")?)?,
            tip: decimal_or_zero(&row, "tip")?,
            tax: decimal_or_zero(&row, "tax")?,
            discount: decimal_or_zero(&row, "discount")?,
            method: parse_enum(row.req("method")?)?,
            transaction_id: row.get("transaction_id").map(parse_string).transpose()?,
            status: match row.get("status") {
                Some(e) => parse_enum(e)?,
                None => PaymentStatus::Completed,
            },
            paid_at: row.get("paid_at").map(parse_instant).transpose()?,
        })),
        "payment_transitions" => Ok(Command::TransitionPayment {
            id: parse_ulid(row.req("id")?)?,
            status: parse_enum(row.req("status")?)?,
        }),
        _ => Ok(Command::MarkPaid {
            id: parse_ulid(row.req("id")?)?,
            worker_id: parse_ulid(row.req("worker_id")?)?,
            period: parse_enum(row.req("period")?)?,
            date: parse_date(row.req("day")?)?,
            amount: parse_decimal(row.req("amount")?)?,
            method: parse_enum(row.req("method")?)?,
            notes: row.get("notes").map(parse_string).transpose()?,
        }),
    }
}

/// Pair the single VALUES row with its column names: the INSERT's column
/// list when given, otherwise the table's positional order.
fn insert_row(insert: &ast::Insert, table: &'static str, positional: &[&str]) -> Result<Row, SqlError> {
    let source = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    let values = match source.body.as_ref() {
        SetExpr::Values(values) => &values.rows,
        _ => return Err(SqlError::Parse("expected VALUES".into())),
    };
    let [values] = values.as_slice() else {
        return Err(SqlError::Unsupported(format!("{table}: one row per INSERT")));
    };

    let names: Vec<String> = if insert.columns.is_empty() {
        positional.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    if values.len() > names.len() {
        return Err(SqlError::WrongArity(table, names.len(), values.len()));
    }
    if insert.columns.len() > values.len() {
        return Err(SqlError::WrongArity(table, insert.columns.len(), values.len()));
    }
    if let Some(unknown) = names.iter().find(|n| !positional.contains(&n.as_str())) {
        return Err(SqlError::UnknownColumn(table, unknown.clone()));
    }
    Ok(Row {
        table,
        cells: names.into_iter().zip(values.iter().cloned()).collect(),
    })
}

fn decimal_or_zero(row: &Row, col: &str) -> Result<Decimal, SqlError> {
    Ok(row.get(col).map(parse_decimal).transpose()?.unwrap_or_default())
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let filters = collect_filters(delete.selection.as_ref())?;

    match table.as_str() {
        "bookings" => Ok(Command::CancelBooking {
            id: filters.ulid("id")?,
        }),
        _ => Err(SqlError::Unsupported(format!("DELETE FROM {table}"))),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    let Some(from) = select.from.first() else {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    };
    let table = table_factor_name(&from.relation)?;
    let filters = collect_filters(select.selection.as_ref())?;

    match table.as_str() {
        "professionals" => Ok(Command::SelectProfessionals),
        "services" => Ok(Command::SelectServices),
        "workers" => Ok(Command::SelectWorkers),
        "sales" => Ok(Command::SelectSales),
        "bookings" => Ok(Command::SelectBookings {
            id: filters.opt_ulid("id")?,
            professional_id: filters.opt_ulid("professional_id")?,
        }),
        "payments" => Ok(Command::SelectPayments {
            target_id: filters.opt_ulid("target_id")?,
        }),
        "payroll_settlements" => Ok(Command::SelectSettlements {
            worker_id: filters.ulid("worker_id")?,
            period_key: parse_string(filters.eq("period_key")?)?,
        }),
        "slots" => Ok(Command::SelectSlots {
            professional_id: filters.ulid("professional_id")?,
            service_id: filters.ulid("service_id")?,
            date: parse_date(filters.eq("day")?)?,
        }),
        "deposit_quote" => Ok(Command::SelectDepositQuote {
            service_id: filters.ulid("service_id")?,
            customer_id: filters.ulid("customer_id")?,
            start: parse_instant(filters.eq("start")?)?,
        }),
        "daily_stats" => Ok(Command::SelectDailyStats {
            date: parse_date(filters.eq("day")?)?,
        }),
        "period_stats" => {
            let (start, end) = filters.day_range()?;
            Ok(Command::SelectPeriodStats { start, end })
        }
        "payroll" => Ok(Command::SelectPayroll {
            period: parse_enum(filters.eq("period")?)?,
            date: parse_date(filters.eq("day")?)?,
        }),
        "payroll_summary" => Ok(Command::SelectPayrollSummary {
            period: parse_enum(filters.eq("period")?)?,
            date: parse_date(filters.eq("day")?)?,
        }),
        "financial_stats" => {
            let (start, end) = filters.day_range()?;
            Ok(Command::SelectFinancialStats { start, end })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `column op value` conjuncts of a WHERE clause.
struct Filters(Vec<(String, ast::BinaryOperator, Expr)>);

impl Filters {
    fn find(&self, col: &str, op: ast::BinaryOperator) -> Option<&Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == col && *o == op)
            .map(|(_, _, e)| e)
    }

    fn eq(&self, col: &'static str) -> Result<&Expr, SqlError> {
        self.find(col, ast::BinaryOperator::Eq)
            .ok_or(SqlError::MissingFilter(col))
    }

    fn ulid(&self, col: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.eq(col)?)
    }

    fn opt_ulid(&self, col: &'static str) -> Result<Option<Ulid>, SqlError> {
        self.find(col, ast::BinaryOperator::Eq).map(parse_ulid).transpose()
    }

    /// `day >= a AND day <= b`, or `day = a` for a single day.
    fn day_range(&self) -> Result<(NaiveDate, NaiveDate), SqlError> {
        if let Some(e) = self.find("day", ast::BinaryOperator::Eq) {
            let d = parse_date(e)?;
            return Ok((d, d));
        }
        let start = self
            .find("day", ast::BinaryOperator::GtEq)
            .ok_or(SqlError::MissingFilter("day >="))?;
        let end = self
            .find("day", ast::BinaryOperator::LtEq)
            .ok_or(SqlError::MissingFilter("day <="))?;
        Ok((parse_date(start)?, parse_date(end)?))
    }
}

fn collect_filters(selection: Option<&Expr>) -> Result<Filters, SqlError> {
    fn walk(expr: &Expr, out: &mut Vec<(String, ast::BinaryOperator, Expr)>) -> Result<(), SqlError> {
        match expr {
            Expr::Nested(inner) => walk(inner, out),
            Expr::BinaryOp {
                left,
                op: ast::BinaryOperator::And,
                right,
            } => {
                walk(left, out)?;
                walk(right, out)
            }
            Expr::BinaryOp { left, op, right } => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                out.push((col, op.clone(), right.as_ref().clone()));
                Ok(())
            }
            other => Err(SqlError::Unsupported(format!("filter {other}"))),
        }
    }

    let mut out = Vec::new();
    if let Some(expr) = selection {
        walk(expr, &mut out)?;
    }
    Ok(Filters(out))
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    match tables.first() {
        Some(first) => table_factor_name(&first.relation),
        None => Err(SqlError::Parse("DELETE without table".into())),
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Literal text of a string or number, with a leading minus folded in.
fn literal_text(expr: &Expr) -> Result<String, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        return Ok(format!("-{}", literal_text(inner)?));
    }
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected literal, got {other}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal_text(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID '{s}': {e}")))
}

fn parse_ulid_list(s: &str) -> Result<Vec<Ulid>, SqlError> {
    s.split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(|p| Ulid::from_string(p).map_err(|e| SqlError::Parse(format!("bad ULID '{p}': {e}"))))
        .collect()
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    let s = literal_text(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("bad integer '{s}': {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    let s = literal_text(expr)?;
    Decimal::from_str(s.trim()).map_err(|e| SqlError::Parse(format!("bad amount '{s}': {e}")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    match extract_value(expr) {
        Some(Value::Boolean(b)) => Ok(*b),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(true),
            "false" | "f" | "0" => Ok(false),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(n != "0"),
        _ => Err(SqlError::Parse(format!("expected bool, got {expr}"))),
    }
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date '{s}': {e}")))
}

/// Unix milliseconds, or a `YYYY-MM-DD HH:MM[:SS]` wall-clock string.
fn parse_instant(expr: &Expr) -> Result<Ms, SqlError> {
    let s = literal_text(expr)?;
    if let Ok(ms) = s.parse::<i64>() {
        return Ok(ms);
    }
    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(&s, fmt).ok())
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| SqlError::Parse(format!("bad timestamp '{s}'")))
}

fn parse_enum<T: FromStr<Err = String>>(expr: &Expr) -> Result<T, SqlError> {
    parse_string(expr)?.parse().map_err(SqlError::Parse)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum SqlError {
    #[error("parse error: {0}")]
    Parse(String),
    #[error("empty query")]
    Empty,
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("unknown table: {0}")]
    UnknownTable(String),
    #[error("{0}: unknown column {1}")]
    UnknownColumn(&'static str, String),
    #[error("{0}: expected at most {1} values, got {2}")]
    WrongArity(&'static str, usize, usize),
    #[error("{0}: missing value for {1}")]
    MissingColumn(&'static str, &'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";
    const B: &str = "01BX5ZZKBKACTAV9WEVGEMMVRZ";

    fn ulid(s: &str) -> Ulid {
        Ulid::from_string(s).unwrap()
    }

    #[test]
    fn parse_insert_professional() {
        let sql = format!(
            "INSERT INTO professionals (id, name, hours, services) VALUES ('{A}', 'Ana', 'mon 09:00-13:00, tue 10:00-18:00', '{B}')"
        );
        match parse_sql(&sql).unwrap() {
            Command::UpsertProfessional(p) => {
                assert_eq!(p.id, ulid(A));
                assert_eq!(p.name.as_deref(), Some("Ana"));
                assert_eq!(p.hours.to_string(), "mon 09:00-13:00, tue 10:00-18:00");
                assert_eq!(p.services, vec![ulid(B)]);
            }
            other => panic!("expected UpsertProfessional, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_service_positional() {
        let sql = format!("INSERT INTO services VALUES ('{A}', 'Color', 90, 1500.50, true, 20, NULL, 'new_customers_only', 0)");
        match parse_sql(&sql).unwrap() {
            Command::UpsertService(s) => {
                assert_eq!(s.duration_min, 90);
                assert_eq!(s.price, Decimal::new(150050, 2));
                assert!(s.deposit.requires_deposit);
                assert_eq!(s.deposit.percentage, Some(Decimal::from(20)));
                assert_eq!(s.deposit.fixed_amount, None);
                assert_eq!(s.deposit.policy, DepositPolicy::NewCustomersOnly);
            }
            other => panic!("expected UpsertService, got {other:?}"),
        }
    }

    #[test]
    fn service_deposit_flag_defaults_from_amounts() {
        let sql = format!("INSERT INTO services (id, duration_min, price, deposit_fixed_amount) VALUES ('{A}', 30, 800, 100)");
        match parse_sql(&sql).unwrap() {
            Command::UpsertService(s) => {
                assert!(s.deposit.requires_deposit);
                assert_eq!(s.deposit.fixed_amount, Some(Decimal::from(100)));
            }
            other => panic!("expected UpsertService, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_worker() {
        let sql = format!(
            "INSERT INTO workers (worker_id, method, fixed_salary, service_pct, product_pct) VALUES ('{A}', 'mixed', 50000, 10, 5)"
        );
        let cmd = parse_sql(&sql).unwrap();
        assert_eq!(
            cmd,
            Command::UpsertWorker(WorkerCompensationConfig {
                worker_id: ulid(A),
                employment_type: EmploymentType::Employee,
                method: CompensationMethod::Mixed,
                fixed_salary: Decimal::from(50_000),
                service_pct: Decimal::from(10),
                product_pct: Decimal::from(5),
            })
        );
    }

    #[test]
    fn parse_insert_booking_with_wall_clock_start() {
        let sql = format!(
            r#"INSERT INTO bookings (id, professional_id, service_id, customer_id, start, notes) VALUES ('{A}', '{B}', '{B}', '{A}', '2026-10-19 10:00', 'first visit')"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(b) => {
                let expected = NaiveDate::from_ymd_opt(2026, 10, 19)
                    .unwrap()
                    .and_hms_opt(10, 0, 0)
                    .unwrap()
                    .and_utc()
                    .timestamp_millis();
                assert_eq!(b.start, expected);
                assert_eq!(b.end, None);
                assert_eq!(b.notes.as_deref(), Some("first visit"));
                assert!(!b.allow_past);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_insert_booking_with_end_and_backfill() {
        let sql = format!(
            r#"INSERT INTO bookings (id, professional_id, service_id, customer_id, start, "end", allow_past) VALUES ('{A}', '{B}', '{B}', '{A}', 1000, 3601000, true)"#
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertBooking(b) => {
                assert_eq!(b.start, 1000);
                assert_eq!(b.end, Some(3_601_000));
                assert!(b.allow_past);
            }
            other => panic!("expected InsertBooking, got {other:?}"),
        }
    }

    #[test]
    fn parse_booking_transition_and_cancel() {
        let sql = format!("INSERT INTO booking_transitions (id, status) VALUES ('{A}', 'completed')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::TransitionBooking { id: ulid(A), status: BookingStatus::Completed }
        );
        let sql = format!("DELETE FROM bookings WHERE id = '{A}'");
        assert_eq!(parse_sql(&sql).unwrap(), Command::CancelBooking { id: ulid(A) });
    }

    #[test]
    fn parse_insert_payment_defaults() {
        let sql = format!(
            "INSERT INTO payments (id, target_id, amount, tip, method, transaction_id) VALUES ('{A}', '{B}', 200, 15.5, 'mercadopago', 'mp-77')"
        );
        match parse_sql(&sql).unwrap() {
            Command::InsertPayment(p) => {
                assert_eq!(p.amount, Decimal::from(200));
                assert_eq!(p.tip, Decimal::new(155, 1));
                assert_eq!(p.tax, Decimal::ZERO);
                assert_eq!(p.method, PaymentMethod::MercadoPago);
                assert_eq!(p.transaction_id.as_deref(), Some("mp-77"));
                assert_eq!(p.status, PaymentStatus::Completed);
                assert_eq!(p.paid_at, None);
            }
            other => panic!("expected InsertPayment, got {other:?}"),
        }
    }

    #[test]
    fn parse_mark_paid() {
        let sql = format!(
            "INSERT INTO payroll_settlements (id, worker_id, period, day, amount, method) VALUES ('{A}', '{B}', 'weekly', '2026-10-19', 30000, 'transfer')"
        );
        match parse_sql(&sql).unwrap() {
            Command::MarkPaid { period, date, amount, method, notes, .. } => {
                assert_eq!(period, PeriodKind::Weekly);
                assert_eq!(date, NaiveDate::from_ymd_opt(2026, 10, 19).unwrap());
                assert_eq!(amount, Decimal::from(30_000));
                assert_eq!(method, PaymentMethod::Transfer);
                assert_eq!(notes, None);
            }
            other => panic!("expected MarkPaid, got {other:?}"),
        }
    }

    #[test]
    fn parse_select_slots() {
        let sql = format!(
            "SELECT * FROM slots WHERE professional_id = '{A}' AND service_id = '{B}' AND day = '2026-10-19'"
        );
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectSlots {
                professional_id: ulid(A),
                service_id: ulid(B),
                date: NaiveDate::from_ymd_opt(2026, 10, 19).unwrap(),
            }
        );
    }

    #[test]
    fn parse_select_stats_ranges() {
        let sql = "SELECT * FROM period_stats WHERE day >= '2026-10-01' AND day <= '2026-10-31'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectPeriodStats {
                start: NaiveDate::from_ymd_opt(2026, 10, 1).unwrap(),
                end: NaiveDate::from_ymd_opt(2026, 10, 31).unwrap(),
            }
        );
        let sql = "SELECT * FROM financial_stats WHERE (day = '2026-10-18')";
        let day = NaiveDate::from_ymd_opt(2026, 10, 18).unwrap();
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectFinancialStats { start: day, end: day }
        );
    }

    #[test]
    fn parse_select_payroll() {
        let sql = "SELECT * FROM payroll WHERE period = 'monthly' AND day = '2026-10-18'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectPayroll {
                period: PeriodKind::Monthly,
                date: NaiveDate::from_ymd_opt(2026, 10, 18).unwrap(),
            }
        );
    }

    #[test]
    fn result_relation_follows_returned_rows() {
        assert_eq!(result_relation("SELECT * FROM slots WHERE day = $1"), Some("slots"));
        assert_eq!(
            result_relation("INSERT INTO payment_transitions (id, status) VALUES ($1, $2)"),
            Some("payments")
        );
        assert_eq!(
            result_relation("INSERT INTO payroll_settlements VALUES ($1, $2, $3, $4, $5, $6)"),
            Some("payroll")
        );
        assert_eq!(result_relation("INSERT INTO services VALUES ($1, $2)"), None);
        assert_eq!(result_relation("DELETE FROM bookings WHERE id = $1"), None);
    }

    #[test]
    fn parse_select_bookings_optional_filter() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { id: None, professional_id: None }
        );
        let sql = format!("SELECT * FROM bookings WHERE professional_id = '{A}'");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::SelectBookings { id: None, professional_id: Some(ulid(A)) }
        );
    }

    #[test]
    fn missing_filter_is_reported() {
        let sql = format!("SELECT * FROM slots WHERE professional_id = '{A}'");
        assert!(matches!(parse_sql(&sql), Err(SqlError::MissingFilter("service_id"))));
    }

    #[test]
    fn missing_required_column_is_reported() {
        let sql = format!("INSERT INTO payments (id, target_id, method) VALUES ('{A}', '{B}', 'cash')");
        assert!(matches!(
            parse_sql(&sql),
            Err(SqlError::MissingColumn("payments", "amount"))
        ));
    }

    #[test]
    fn unknown_table_and_column_errors() {
        let sql = format!("INSERT INTO foobar (id) VALUES ('{A}')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownTable(_))));
        let sql = format!("INSERT INTO sales (id, colour) VALUES ('{A}', 'red')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::UnknownColumn("sales", _))));
    }

    #[test]
    fn multi_row_insert_rejected() {
        let sql = format!("INSERT INTO booking_transitions VALUES ('{A}', 'confirmed'), ('{B}', 'confirmed')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Unsupported(_))));
    }

    #[test]
    fn bad_enum_value_is_parse_error() {
        let sql = format!("INSERT INTO payment_transitions VALUES ('{A}', 'lost')");
        assert!(matches!(parse_sql(&sql), Err(SqlError::Parse(_))));
    }

    #[test]
    fn parse_empty_errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
    }
}
