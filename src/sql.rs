use chrono::{DateTime, NaiveDate, NaiveTime};
use rust_decimal::Decimal;
use sqlparser::ast::{
    self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject,
    UnaryOperator, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertSpot {
        label: String,
        price_per_hour: Decimal,
        partial_allowed: bool,
        address: Option<String>,
        payout: Option<String>,
    },
    DeleteSpot {
        id: Ulid,
    },
    SelectSpots,
    InsertWindow {
        spot_id: Ulid,
        start: Ms,
        end: Ms,
    },
    ReleaseWindow {
        window_id: Ulid,
    },
    SelectWindows {
        filter: SearchFilter,
    },
    SelectWindow {
        id: Ulid,
    },
    SelectSpotWindows {
        spot_id: Ulid,
    },
    SelectQuote {
        window_id: Ulid,
    },
    InsertBooking {
        window_id: Ulid,
    },
    InsertPayment {
        booking_id: Ulid,
    },
    DeleteBooking {
        id: Ulid,
    },
    SelectBookings {
        status: Option<BookingStatus>,
        as_supplier: bool,
    },
    InsertSubscription {
        request: SubscriptionRequest,
    },
    DeleteSubscription {
        id: Ulid,
    },
    SelectSubscriptions,
    SelectAlerts,
    SelectStats {
        user_id: Option<Ulid>,
    },
}

/// Result shape of a statement. Decided from the statement text alone so
/// that prepared statements can be described before parameters are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Output {
    Nothing,
    Id,
    Receipt,
    Spots,
    Windows,
    Quote,
    Bookings,
    Subscriptions,
    Alerts,
    Statistics,
    UserStatistics,
}

pub fn output_of(sql: &str) -> Output {
    let Ok(stmts) = Parser::parse_sql(&PostgreSqlDialect {}, sql) else {
        return Output::Nothing;
    };
    let table = |tf: &TableFactor| table_factor_name(tf).unwrap_or_default();
    match stmts.first() {
        Some(Statement::Insert(insert)) => match &insert.table {
            TableObject::TableName(name) => match object_name_last(name).as_deref() {
                Some("spots" | "windows" | "subscriptions") => Output::Id,
                Some("bookings") => Output::Receipt,
                _ => Output::Nothing,
            },
            _ => Output::Nothing,
        },
        Some(Statement::Query(query)) => {
            let SetExpr::Select(select) = query.body.as_ref() else {
                return Output::Nothing;
            };
            let Some(from) = select.from.first() else {
                return Output::Nothing;
            };
            match table(&from.relation).as_str() {
                "spots" => Output::Spots,
                "windows" => Output::Windows,
                "quotes" => Output::Quote,
                "bookings" => Output::Bookings,
                "subscriptions" => Output::Subscriptions,
                "alerts" => Output::Alerts,
                "stats" if select.selection.is_some() => Output::UserStatistics,
                "stats" => Output::Statistics,
                _ => Output::Nothing,
            }
        }
        _ => Output::Nothing,
    }
}

impl Command {
    pub fn output(&self) -> Output {
        match self {
            Command::InsertSpot { .. } | Command::InsertWindow { .. } | Command::InsertSubscription { .. } => {
                Output::Id
            }
            Command::InsertBooking { .. } => Output::Receipt,
            Command::InsertPayment { .. }
            | Command::DeleteSpot { .. }
            | Command::ReleaseWindow { .. }
            | Command::DeleteBooking { .. }
            | Command::DeleteSubscription { .. } => Output::Nothing,
            Command::SelectSpots => Output::Spots,
            Command::SelectWindows { .. } | Command::SelectWindow { .. } | Command::SelectSpotWindows { .. } => {
                Output::Windows
            }
            Command::SelectQuote { .. } => Output::Quote,
            Command::SelectBookings { .. } => Output::Bookings,
            Command::SelectSubscriptions => Output::Subscriptions,
            Command::SelectAlerts => Output::Alerts,
            Command::SelectStats { user_id: Some(_) } => Output::UserStatistics,
            Command::SelectStats { user_id: None } => Output::Statistics,
        }
    }
}

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
    #[error("{0}: expected {1} values, got {2}")]
    WrongArity(String, usize, usize),
    #[error("missing column: {0}")]
    MissingColumn(&'static str),
    #[error("missing filter: {0}")]
    MissingFilter(&'static str),
    #[error("unsupported filter on {0}")]
    UnsupportedFilter(String),
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let Some(stmt) = stmts.first() else {
        return Err(SqlError::Empty);
    };
    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row keyed by the column list.
struct Row {
    table: String,
    cells: Vec<(String, Expr)>,
}

impl Row {
    fn get(&self, column: &str) -> Option<&Expr> {
        self.cells.iter().find(|(c, _)| c == column).map(|(_, e)| e)
    }

    fn require(&self, column: &'static str) -> Result<&Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }

    fn reject_unknown(&self, known: &[&str]) -> Result<(), SqlError> {
        match self.cells.iter().find(|(c, _)| !known.contains(&c.as_str())) {
            Some((c, _)) => Err(SqlError::Parse(format!("{}: unknown column {c}", self.table))),
            None => Ok(()),
        }
    }
}

fn insert_row(insert: &ast::Insert) -> Result<Row, SqlError> {
    let table = match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))?
        }
        _ => return Err(SqlError::Parse("unsupported table object in INSERT".into())),
    };
    let source = insert.source.as_ref().ok_or(SqlError::Parse("no VALUES".into()))?;
    let SetExpr::Values(values) = source.body.as_ref() else {
        return Err(SqlError::Parse("expected VALUES".into()));
    };
    let row = match values.rows.as_slice() {
        [] => return Err(SqlError::Parse("empty VALUES".into())),
        [row] => row,
        _ => return Err(SqlError::Unsupported("multi-row INSERT".into())),
    };
    if insert.columns.len() != row.len() {
        return Err(SqlError::WrongArity(table, insert.columns.len(), row.len()));
    }
    let cells = insert
        .columns
        .iter()
        .map(|c| c.value.to_lowercase())
        .zip(row.iter().cloned())
        .collect();
    Ok(Row { table, cells })
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let row = insert_row(insert)?;
    match row.table.as_str() {
        "spots" => {
            row.reject_unknown(&["label", "price_per_hour", "partial_allowed", "address", "payout"])?;
            Ok(Command::InsertSpot {
                label: parse_text(row.require("label")?)?,
                price_per_hour: parse_decimal(row.require("price_per_hour")?)?,
                partial_allowed: row.get("partial_allowed").map(parse_bool).transpose()?.unwrap_or(false),
                address: optional(&row, "address", parse_text)?,
                payout: optional(&row, "payout", parse_text)?,
            })
        }
        "windows" => {
            row.reject_unknown(&["spot_id", "start", "end"])?;
            Ok(Command::InsertWindow {
                spot_id: parse_ulid(row.require("spot_id")?)?,
                start: parse_instant(row.require("start")?)?,
                end: parse_instant(row.require("end")?)?,
            })
        }
        "bookings" => {
            row.reject_unknown(&["window_id"])?;
            Ok(Command::InsertBooking {
                window_id: parse_ulid(row.require("window_id")?)?,
            })
        }
        "payments" => {
            row.reject_unknown(&["booking_id"])?;
            Ok(Command::InsertPayment {
                booking_id: parse_ulid(row.require("booking_id")?)?,
            })
        }
        "subscriptions" => {
            row.reject_unknown(&["spot_id", "date", "time_from", "time_to"])?;
            Ok(Command::InsertSubscription {
                request: SubscriptionRequest {
                    spot_id: optional(&row, "spot_id", parse_ulid)?,
                    desired_date: optional(&row, "date", parse_date)?,
                    bounds: TimeBounds::new(
                        optional(&row, "time_from", parse_time)?,
                        optional(&row, "time_to", parse_time)?,
                    ),
                },
            })
        }
        _ => Err(SqlError::UnknownTable(row.table)),
    }
}

/// Absent column and NULL both mean `None`.
fn optional<T>(
    row: &Row,
    column: &str,
    parse: impl Fn(&Expr) -> Result<T, SqlError>,
) -> Result<Option<T>, SqlError> {
    match row.get(column) {
        None => Ok(None),
        Some(expr) if is_null(expr) => Ok(None),
        Some(expr) => parse(expr).map(Some),
    }
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let tables = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    let first = tables.first().ok_or(SqlError::Parse("DELETE without table".into()))?;
    let table = table_factor_name(&first.relation)?;
    let filters = Filters::from_selection(delete.selection.as_ref())?;

    match table.as_str() {
        "spots" => Ok(Command::DeleteSpot { id: filters.ulid_eq("id")? }),
        "claims" => Ok(Command::ReleaseWindow { window_id: filters.ulid_eq("window_id")? }),
        "bookings" => Ok(Command::DeleteBooking { id: filters.ulid_eq("id")? }),
        "subscriptions" => Ok(Command::DeleteSubscription { id: filters.ulid_eq("id")? }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(SqlError::Unsupported("non-SELECT query".into()));
    };
    let from = select.from.first().ok_or(SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "spots" => {
            filters.only(&[])?;
            Ok(Command::SelectSpots)
        }
        "windows" => {
            if filters.has("id") {
                filters.only(&["id"])?;
                return Ok(Command::SelectWindow { id: filters.ulid_eq("id")? });
            }
            if filters.has("spot_id") {
                filters.only(&["spot_id"])?;
                return Ok(Command::SelectSpotWindows { spot_id: filters.ulid_eq("spot_id")? });
            }
            filters.only(&["date", "start_time", "end_time"])?;
            Ok(Command::SelectWindows {
                filter: SearchFilter {
                    date: filters.find("date", BinaryOperator::Eq).map(parse_date).transpose()?,
                    bounds: TimeBounds::new(
                        filters.find("start_time", BinaryOperator::GtEq).map(parse_time).transpose()?,
                        filters.find("end_time", BinaryOperator::LtEq).map(parse_time).transpose()?,
                    ),
                },
            })
        }
        "quotes" => {
            filters.only(&["window_id"])?;
            Ok(Command::SelectQuote { window_id: filters.ulid_eq("window_id")? })
        }
        "bookings" => {
            filters.only(&["status", "supplier"])?;
            let status = filters
                .find("status", BinaryOperator::Eq)
                .map(|e| parse_text(e)?.parse::<BookingStatus>().map_err(SqlError::Parse))
                .transpose()?;
            let as_supplier = filters
                .find("supplier", BinaryOperator::Eq)
                .map(parse_bool)
                .transpose()?
                .unwrap_or(false);
            Ok(Command::SelectBookings { status, as_supplier })
        }
        "subscriptions" => {
            filters.only(&[])?;
            Ok(Command::SelectSubscriptions)
        }
        "alerts" => {
            filters.only(&[])?;
            Ok(Command::SelectAlerts)
        }
        "stats" => {
            filters.only(&["user_id"])?;
            let user_id = filters.find("user_id", BinaryOperator::Eq).map(parse_ulid).transpose()?;
            Ok(Command::SelectStats { user_id })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

/// `col op value` terms of a WHERE clause joined by AND.
struct Filters(Vec<(String, BinaryOperator, Expr)>);

impl Filters {
    fn from_selection(selection: Option<&Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_terms(expr, &mut terms)?;
        }
        Ok(Self(terms))
    }

    fn has(&self, column: &str) -> bool {
        self.0.iter().any(|(c, _, _)| c == column)
    }

    fn find(&self, column: &str, op: BinaryOperator) -> Option<&Expr> {
        self.0
            .iter()
            .find(|(c, o, _)| c == column && *o == op)
            .map(|(_, _, e)| e)
    }

    fn ulid_eq(&self, column: &'static str) -> Result<Ulid, SqlError> {
        parse_ulid(self.find(column, BinaryOperator::Eq).ok_or(SqlError::MissingFilter(column))?)
    }

    fn only(&self, allowed: &[&str]) -> Result<(), SqlError> {
        match self.0.iter().find(|(c, _, _)| !allowed.contains(&c.as_str())) {
            Some((c, _, _)) => Err(SqlError::UnsupportedFilter(c.clone())),
            None => Ok(()),
        }
    }
}

fn collect_terms(expr: &Expr, out: &mut Vec<(String, BinaryOperator, Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_terms(inner, out),
        Expr::BinaryOp { left, op: BinaryOperator::And, right } => {
            collect_terms(left, out)?;
            collect_terms(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
            out.push((column, op.clone(), right.as_ref().clone()));
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
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

/// String or bare number literal, as text.
fn literal(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) | Some(Value::Number(s, _)) => Ok(s.clone()),
        Some(other) => Err(SqlError::Parse(format!("expected literal, got {other}"))),
        None => match expr {
            Expr::UnaryOp { op: UnaryOperator::Minus, expr } => Ok(format!("-{}", literal(expr)?)),
            _ => Err(SqlError::Parse(format!("expected value, got {expr}"))),
        },
    }
}

fn parse_text(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        _ => Err(SqlError::Parse(format!("expected string, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = literal(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID {s}: {e}")))
}

fn parse_decimal(expr: &Expr) -> Result<Decimal, SqlError> {
    let s = literal(expr)?;
    s.parse().map_err(|e| SqlError::Parse(format!("bad amount {s}: {e}")))
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

/// Unix milliseconds, or an RFC 3339 timestamp string.
fn parse_instant(expr: &Expr) -> Result<Ms, SqlError> {
    let s = literal(expr)?;
    if let Ok(ms) = s.parse::<Ms>() {
        return Ok(ms);
    }
    DateTime::parse_from_rfc3339(&s)
        .map(|dt| dt.timestamp_millis())
        .map_err(|e| SqlError::Parse(format!("bad timestamp {s}: {e}")))
}

fn parse_date(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_text(expr)?;
    NaiveDate::parse_from_str(&s, "%Y-%m-%d").map_err(|e| SqlError::Parse(format!("bad date {s}: {e}")))
}

/// `HH:MM` or `HH:MM:SS`.
fn parse_time(expr: &Expr) -> Result<NaiveTime, SqlError> {
    let s = parse_text(expr)?;
    NaiveTime::parse_from_str(&s, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(&s, "%H:%M:%S"))
        .map_err(|e| SqlError::Parse(format!("bad time {s}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    const ID: &str = "01ARZ3NDEKTSV4RRFFQ69G5FAV";

    fn id() -> Ulid {
        Ulid::from_string(ID).unwrap()
    }

    fn hm(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn insert_spot() {
        let sql = "INSERT INTO spots (label, price_per_hour, partial_allowed, address) \
                   VALUES ('B-12', 12.50, true, '4 Quay Lane')";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::InsertSpot {
                label: "B-12".into(),
                price_per_hour: Decimal::new(1250, 2),
                partial_allowed: true,
                address: Some("4 Quay Lane".into()),
                payout: None,
            }
        );
    }

    #[test]
    fn insert_spot_requires_price() {
        let err = parse_sql("INSERT INTO spots (label) VALUES ('B-12')").unwrap_err();
        assert!(matches!(err, SqlError::MissingColumn("price_per_hour")));
    }

    #[test]
    fn insert_rejects_unknown_column_and_arity() {
        assert!(parse_sql("INSERT INTO bookings (window_id, colour) VALUES ('x', 'y')").is_err());
        let err = parse_sql(&format!("INSERT INTO bookings (window_id) VALUES ('{ID}', 1)")).unwrap_err();
        assert!(matches!(err, SqlError::WrongArity(_, 1, 2)));
    }

    #[test]
    fn insert_window_accepts_ms_and_rfc3339() {
        let sql = format!(
            "INSERT INTO windows (spot_id, start, \"end\") VALUES ('{ID}', 1790000000000, '2026-10-20T12:00:00Z')"
        );
        let Command::InsertWindow { spot_id, start, end } = parse_sql(&sql).unwrap() else {
            panic!("expected InsertWindow");
        };
        assert_eq!(spot_id, id());
        assert_eq!(start, 1_790_000_000_000);
        assert_eq!(end, DateTime::parse_from_rfc3339("2026-10-20T12:00:00Z").unwrap().timestamp_millis());
    }

    #[test]
    fn booking_and_payment() {
        assert_eq!(
            parse_sql(&format!("INSERT INTO bookings (window_id) VALUES ('{ID}')")).unwrap(),
            Command::InsertBooking { window_id: id() }
        );
        assert_eq!(
            parse_sql(&format!("INSERT INTO payments (booking_id) VALUES ('{ID}')")).unwrap(),
            Command::InsertPayment { booking_id: id() }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM bookings WHERE id = '{ID}'")).unwrap(),
            Command::DeleteBooking { id: id() }
        );
    }

    #[test]
    fn deletes() {
        assert_eq!(
            parse_sql(&format!("DELETE FROM spots WHERE id = '{ID}'")).unwrap(),
            Command::DeleteSpot { id: id() }
        );
        assert_eq!(
            parse_sql(&format!("DELETE FROM claims WHERE window_id = '{ID}'")).unwrap(),
            Command::ReleaseWindow { window_id: id() }
        );
        assert!(matches!(parse_sql("DELETE FROM spots"), Err(SqlError::MissingFilter("id"))));
    }

    #[test]
    fn select_windows_with_filters() {
        let sql = "SELECT * FROM windows WHERE date = '2026-10-20' AND start_time >= '09:00' AND end_time <= '18:30:00'";
        assert_eq!(
            parse_sql(sql).unwrap(),
            Command::SelectWindows {
                filter: SearchFilter {
                    date: NaiveDate::from_ymd_opt(2026, 10, 20),
                    bounds: TimeBounds::new(Some(hm(9, 0)), Some(hm(18, 30))),
                },
            }
        );
        assert_eq!(
            parse_sql("SELECT * FROM windows").unwrap(),
            Command::SelectWindows { filter: SearchFilter::default() }
        );
    }

    #[test]
    fn select_single_window_and_spot_windows() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM windows WHERE id = '{ID}'")).unwrap(),
            Command::SelectWindow { id: id() }
        );
        assert_eq!(
            parse_sql(&format!("SELECT * FROM windows WHERE spot_id = '{ID}'")).unwrap(),
            Command::SelectSpotWindows { spot_id: id() }
        );
        assert!(matches!(
            parse_sql(&format!("SELECT * FROM windows WHERE id = '{ID}' AND date = '2026-10-20'")),
            Err(SqlError::UnsupportedFilter(_))
        ));
    }

    #[test]
    fn select_bookings_variants() {
        assert_eq!(
            parse_sql("SELECT * FROM bookings").unwrap(),
            Command::SelectBookings { status: None, as_supplier: false }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE status = 'confirmed'").unwrap(),
            Command::SelectBookings { status: Some(BookingStatus::Confirmed), as_supplier: false }
        );
        assert_eq!(
            parse_sql("SELECT * FROM bookings WHERE supplier = true").unwrap(),
            Command::SelectBookings { status: None, as_supplier: true }
        );
        assert!(parse_sql("SELECT * FROM bookings WHERE status = 'lost'").is_err());
    }

    #[test]
    fn subscriptions() {
        let sql = format!("INSERT INTO subscriptions (spot_id, date, time_from) VALUES ('{ID}', '2026-10-21', '07:00')");
        assert_eq!(
            parse_sql(&sql).unwrap(),
            Command::InsertSubscription {
                request: SubscriptionRequest {
                    spot_id: Some(id()),
                    desired_date: NaiveDate::from_ymd_opt(2026, 10, 21),
                    bounds: TimeBounds::new(Some(hm(7, 0)), None),
                },
            }
        );
        assert_eq!(
            parse_sql("INSERT INTO subscriptions (spot_id) VALUES (NULL)").unwrap(),
            Command::InsertSubscription { request: SubscriptionRequest::default() }
        );
        assert_eq!(parse_sql("SELECT * FROM subscriptions").unwrap(), Command::SelectSubscriptions);
        assert_eq!(
            parse_sql(&format!("DELETE FROM subscriptions WHERE id = '{ID}'")).unwrap(),
            Command::DeleteSubscription { id: id() }
        );
    }

    #[test]
    fn quotes_alerts_stats() {
        assert_eq!(
            parse_sql(&format!("SELECT * FROM quotes WHERE window_id = '{ID}'")).unwrap(),
            Command::SelectQuote { window_id: id() }
        );
        assert_eq!(parse_sql("SELECT * FROM alerts").unwrap(), Command::SelectAlerts);
        assert_eq!(parse_sql("SELECT * FROM stats").unwrap(), Command::SelectStats { user_id: None });
        assert_eq!(
            parse_sql(&format!("SELECT * FROM stats WHERE user_id = '{ID}'")).unwrap(),
            Command::SelectStats { user_id: Some(id()) }
        );
    }

    #[test]
    fn output_shape_without_bound_parameters() {
        assert_eq!(output_of("INSERT INTO bookings (window_id) VALUES ($1)"), Output::Receipt);
        assert_eq!(output_of("INSERT INTO payments (booking_id) VALUES ($1)"), Output::Nothing);
        assert_eq!(output_of("SELECT * FROM windows WHERE id = $1"), Output::Windows);
        assert_eq!(output_of("SELECT * FROM stats WHERE user_id = $1"), Output::UserStatistics);
        assert_eq!(output_of("SELECT * FROM stats"), Output::Statistics);
        assert_eq!(output_of("not sql at all"), Output::Nothing);

        let cmd = parse_sql(&format!("SELECT * FROM stats WHERE user_id = '{ID}'")).unwrap();
        assert_eq!(cmd.output(), output_of("SELECT * FROM stats WHERE user_id = $1"));
    }

    #[test]
    fn errors() {
        assert!(matches!(parse_sql(""), Err(SqlError::Empty)));
        assert!(matches!(parse_sql("SELECT * FROM parking"), Err(SqlError::UnknownTable(t)) if t == "parking"));
        assert!(matches!(parse_sql("DROP TABLE spots"), Err(SqlError::Unsupported(_))));
        assert!(parse_sql("SELECT * FROM bookings WHERE id = 'not-a-ulid'").is_err());
    }
}
