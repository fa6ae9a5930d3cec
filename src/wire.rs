use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
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
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::{TlsAcceptor, process_socket};
use tokio::net::TcpStream;
use ulid::Ulid;

use crate::auth::{ADMIN_SUFFIX, SpotbookAuthSource};
use crate::engine::EngineError;
use crate::model::*;
use crate::notify::Alert;
use crate::observability;
use crate::service::{Caller, Service};
use crate::sql::{self, Command, Output};

pub struct SpotbookHandler {
    service: Arc<Service>,
    query_parser: Arc<SpotbookQueryParser>,
}

impl SpotbookHandler {
    pub fn new(service: Arc<Service>) -> Self {
        Self {
            service,
            query_parser: Arc::new(SpotbookQueryParser),
        }
    }

    /// The login name is the caller's id, optionally suffixed with `@admin`.
    /// The password was already checked against the matching secret.
    fn resolve_caller<C: ClientInfo>(&self, client: &C) -> PgWireResult<Caller> {
        let user = client.metadata().get("user").map(String::as_str).unwrap_or_default();
        let (id, is_admin) = match user.strip_suffix(ADMIN_SUFFIX) {
            Some(id) => (id, true),
            None => (user, false),
        };
        let user_id = Ulid::from_string(id).map_err(|_| {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            user_error("28000", format!("user name must be a ULID, got {user:?}"))
        })?;
        Ok(Caller { user_id, is_admin })
    }

    async fn run(&self, caller: Caller, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(caller, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, caller: Caller, cmd: Command) -> PgWireResult<Response> {
        let svc = &self.service;
        let output = cmd.output();
        match cmd {
            Command::InsertSpot {
                label,
                price_per_hour,
                partial_allowed,
                address,
                payout,
            } => {
                let spot = NewSpot {
                    supplier_id: caller.user_id,
                    label,
                    address,
                    price_per_hour,
                    partial_allowed,
                    payout,
                };
                let id = svc.list_spot(caller, spot).await.map_err(engine_err)?;
                Ok(id_response(id))
            }
            Command::DeleteSpot { id } => {
                let removed = svc.remove_spot(caller, id).await.map_err(engine_err)?;
                Ok(tag("DELETE", removed))
            }
            Command::SelectSpots => Ok(rows(output, svc.my_spots(caller).await, encode_spot)),
            Command::InsertWindow { spot_id, start, end } => {
                let id = svc
                    .publish_window(caller, spot_id, start, end)
                    .await
                    .map_err(engine_err)?;
                Ok(id_response(id))
            }
            Command::ReleaseWindow { window_id } => {
                svc.release_window(caller, window_id).await.map_err(engine_err)?;
                Ok(tag("DELETE", true))
            }
            Command::SelectWindows { filter } => Ok(rows(output, svc.search(&filter).await, encode_window)),
            Command::SelectWindow { id } => {
                let view = svc.window(id).await.map_err(engine_err)?;
                Ok(rows(output, vec![view], encode_window))
            }
            Command::SelectSpotWindows { spot_id } => {
                let views = svc.spot_windows(spot_id).await.map_err(engine_err)?;
                Ok(rows(output, views, encode_window))
            }
            Command::SelectQuote { window_id } => {
                let quote = svc.quote(window_id).await.map_err(engine_err)?;
                Ok(rows(output, vec![quote], encode_quote))
            }
            Command::InsertBooking { window_id } => {
                let receipt = svc.book(caller, window_id).await.map_err(engine_err)?;
                Ok(rows(output, vec![receipt], encode_receipt))
            }
            Command::InsertPayment { booking_id } => {
                let paid = svc.pay(caller, booking_id).await.map_err(engine_err)?;
                Ok(tag("INSERT", paid))
            }
            Command::DeleteBooking { id } => {
                let cancelled = svc.cancel(caller, id).await.map_err(engine_err)?;
                Ok(tag("DELETE", cancelled))
            }
            Command::SelectBookings { status, as_supplier } => {
                let bookings = if as_supplier {
                    let mut incoming = svc.incoming_bookings(caller).await;
                    if let Some(status) = status {
                        incoming.retain(|b| b.status == status);
                    }
                    incoming
                } else {
                    svc.my_bookings(caller, status).await
                };
                Ok(rows(output, bookings, encode_booking))
            }
            Command::InsertSubscription { request } => {
                let id = svc.subscribe(caller, request).await.map_err(engine_err)?;
                Ok(id_response(id))
            }
            Command::DeleteSubscription { id } => {
                let removed = svc.unsubscribe(caller, id).await.map_err(engine_err)?;
                Ok(tag("DELETE", removed))
            }
            Command::SelectSubscriptions => {
                Ok(rows(output, svc.my_subscriptions(caller).await, encode_subscription))
            }
            Command::SelectAlerts => Ok(rows(output, svc.take_alerts(caller), encode_alert)),
            Command::SelectStats { user_id: None } => {
                let stats = svc.statistics(caller).await.map_err(engine_err)?;
                Ok(rows(output, vec![stats], encode_statistics))
            }
            Command::SelectStats { user_id } => {
                let stats = svc.user_statistics(caller, user_id).await.map_err(engine_err)?;
                Ok(rows(output, vec![stats], encode_user_statistics))
            }
        }
    }
}

// ── Result encoding ──────────────────────────────────────────────

fn field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

/// Column layout for each result shape. Ids, money and dates travel as text,
/// instants as Unix milliseconds.
fn schema(output: Output) -> Vec<FieldInfo> {
    use Type as T;
    let cols: Vec<(&str, Type)> = match output {
        Output::Nothing => vec![],
        Output::Id => vec![("id", T::VARCHAR)],
        Output::Receipt => vec![("id", T::VARCHAR), ("total_price", T::VARCHAR)],
        Output::Spots => vec![
            ("id", T::VARCHAR),
            ("label", T::VARCHAR),
            ("address", T::VARCHAR),
            ("price_per_hour", T::VARCHAR),
            ("partial_allowed", T::BOOL),
            ("payout", T::VARCHAR),
            ("active", T::BOOL),
            ("created_at", T::INT8),
        ],
        Output::Windows => vec![
            ("id", T::VARCHAR),
            ("spot_id", T::VARCHAR),
            ("supplier_id", T::VARCHAR),
            ("label", T::VARCHAR),
            ("address", T::VARCHAR),
            ("start", T::INT8),
            ("end", T::INT8),
            ("booked", T::BOOL),
            ("price_per_hour", T::VARCHAR),
            ("partial_allowed", T::BOOL),
            ("payout", T::VARCHAR),
        ],
        Output::Quote => vec![
            ("window_id", T::VARCHAR),
            ("total_price", T::VARCHAR),
            ("duration_hours", T::VARCHAR),
        ],
        Output::Bookings => vec![
            ("id", T::VARCHAR),
            ("consumer_id", T::VARCHAR),
            ("spot_id", T::VARCHAR),
            ("window_id", T::VARCHAR),
            ("start", T::INT8),
            ("end", T::INT8),
            ("total_price", T::VARCHAR),
            ("status", T::VARCHAR),
            ("payment", T::VARCHAR),
            ("created_at", T::INT8),
        ],
        Output::Subscriptions => vec![
            ("id", T::VARCHAR),
            ("spot_id", T::VARCHAR),
            ("date", T::VARCHAR),
            ("time_from", T::VARCHAR),
            ("time_to", T::VARCHAR),
            ("created_at", T::INT8),
        ],
        Output::Alerts => vec![("recipient", T::VARCHAR), ("text", T::VARCHAR)],
        Output::Statistics => vec![
            ("total_spots", T::INT8),
            ("active_spots", T::INT8),
            ("total_windows", T::INT8),
            ("open_windows", T::INT8),
            ("total_bookings", T::INT8),
            ("pending_bookings", T::INT8),
            ("confirmed_bookings", T::INT8),
            ("cancelled_bookings", T::INT8),
            ("completed_bookings", T::INT8),
            ("bookings_today", T::INT8),
            ("revenue", T::VARCHAR),
            ("active_subscriptions", T::INT8),
        ],
        Output::UserStatistics => vec![
            ("user_id", T::VARCHAR),
            ("total_bookings", T::INT8),
            ("active_spots", T::INT8),
            ("total_spent", T::VARCHAR),
            ("total_earned", T::VARCHAR),
        ],
    };
    cols.into_iter().map(|(name, ty)| field(name, ty)).collect()
}

fn rows<T>(
    output: Output,
    items: Vec<T>,
    encode: fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema(output));
    let rows: Vec<PgWireResult<_>> = items
        .iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(rows)))
}

fn id_response(id: Ulid) -> Response {
    rows(Output::Id, vec![id], |enc, id| enc.encode_field(&id.to_string()))
}

fn tag(verb: &str, affected: bool) -> Response {
    Response::Execution(Tag::new(verb).with_rows(usize::from(affected)))
}

fn count(n: usize) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

fn encode_spot(enc: &mut DataRowEncoder, s: &Spot) -> PgWireResult<()> {
    enc.encode_field(&s.id.to_string())?;
    enc.encode_field(&s.label)?;
    enc.encode_field(&s.address)?;
    enc.encode_field(&s.price_per_hour.to_string())?;
    enc.encode_field(&s.partial_allowed)?;
    enc.encode_field(&s.payout)?;
    enc.encode_field(&s.active)?;
    enc.encode_field(&s.created_at)
}

fn encode_window(enc: &mut DataRowEncoder, w: &WindowView) -> PgWireResult<()> {
    enc.encode_field(&w.window_id.to_string())?;
    enc.encode_field(&w.spot_id.to_string())?;
    enc.encode_field(&w.supplier_id.to_string())?;
    enc.encode_field(&w.spot_label)?;
    enc.encode_field(&w.address)?;
    enc.encode_field(&w.start)?;
    enc.encode_field(&w.end)?;
    enc.encode_field(&w.booked)?;
    enc.encode_field(&w.price_per_hour.to_string())?;
    enc.encode_field(&w.partial_allowed)?;
    enc.encode_field(&w.payout)
}

fn encode_quote(enc: &mut DataRowEncoder, q: &Quote) -> PgWireResult<()> {
    enc.encode_field(&q.window_id.to_string())?;
    enc.encode_field(&q.total_price.to_string())?;
    enc.encode_field(&q.duration_hours.to_string())
}

fn encode_receipt(enc: &mut DataRowEncoder, r: &BookingReceipt) -> PgWireResult<()> {
    enc.encode_field(&r.booking_id.to_string())?;
    enc.encode_field(&r.total_price.to_string())
}

fn encode_booking(enc: &mut DataRowEncoder, b: &Booking) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.consumer_id.to_string())?;
    enc.encode_field(&b.spot_id.to_string())?;
    enc.encode_field(&b.window_id.to_string())?;
    enc.encode_field(&b.span.start)?;
    enc.encode_field(&b.span.end)?;
    enc.encode_field(&b.total_price.to_string())?;
    enc.encode_field(&b.status.to_string())?;
    enc.encode_field(&b.payment.as_str().to_string())?;
    enc.encode_field(&b.created_at)
}

fn encode_subscription(enc: &mut DataRowEncoder, s: &Subscription) -> PgWireResult<()> {
    enc.encode_field(&s.id.to_string())?;
    enc.encode_field(&s.spot_id.map(|id| id.to_string()))?;
    enc.encode_field(&s.desired_date.map(|d| d.format("%Y-%m-%d").to_string()))?;
    enc.encode_field(&s.bounds.from.map(|t| t.format("%H:%M").to_string()))?;
    enc.encode_field(&s.bounds.to.map(|t| t.format("%H:%M").to_string()))?;
    enc.encode_field(&s.created_at)
}

fn encode_alert(enc: &mut DataRowEncoder, a: &Alert) -> PgWireResult<()> {
    enc.encode_field(&a.recipient.to_string())?;
    enc.encode_field(&a.text)
}

fn encode_statistics(enc: &mut DataRowEncoder, s: &Statistics) -> PgWireResult<()> {
    for n in [
        s.total_spots,
        s.active_spots,
        s.total_windows,
        s.open_windows,
        s.total_bookings,
        s.pending_bookings,
        s.confirmed_bookings,
        s.cancelled_bookings,
        s.completed_bookings,
        s.bookings_today,
    ] {
        enc.encode_field(&count(n))?;
    }
    enc.encode_field(&s.revenue.to_string())?;
    enc.encode_field(&count(s.active_subscriptions))
}

fn encode_user_statistics(enc: &mut DataRowEncoder, s: &UserStatistics) -> PgWireResult<()> {
    enc.encode_field(&s.user_id.to_string())?;
    enc.encode_field(&count(s.total_bookings))?;
    enc.encode_field(&count(s.active_spots))?;
    enc.encode_field(&s.total_spent.to_string())?;
    enc.encode_field(&s.total_earned.to_string())
}

#[async_trait]
impl SimpleQueryHandler for SpotbookHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let caller = self.resolve_caller(client)?;
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        Ok(vec![self.run(caller, cmd).await?])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct SpotbookQueryParser;

#[async_trait]
impl QueryParser for SpotbookQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(schema(sql::output_of(stmt)))
    }
}

#[async_trait]
impl ExtendedQueryHandler for SpotbookHandler {
    type Statement = String;
    type QueryParser = SpotbookQueryParser;

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
        let caller = self.resolve_caller(client)?;
        let sql = substitute_params(portal);
        let cmd = sql::parse_sql(&sql).map_err(sql_err)?;
        self.run(caller, cmd).await
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
            schema(sql::output_of(&target.statement)),
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
        Ok(DescribePortalResponse::new(schema(sql::output_of(
            &target.statement.statement,
        ))))
    }
}

/// Highest $N placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals. Highest index first so
/// `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    inline_params(&portal.statement.statement, &portal.parameters)
}

fn inline_params(sql: &str, params: &[Option<Bytes>]) -> String {
    let mut result = sql.to_string();
    for (i, param) in params.iter().enumerate().rev() {
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&format!("${}", i + 1), &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct SpotbookFactory {
    handler: Arc<SpotbookHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SpotbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl SpotbookFactory {
    pub fn new(service: Arc<Service>, password: String, admin_password: String) -> Self {
        let auth_source = SpotbookAuthSource::new(password, admin_password);
        Self {
            handler: Arc::new(SpotbookHandler::new(service)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(
                auth_source,
                DefaultServerParameterProvider::default(),
            )),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for SpotbookFactory {
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

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    factory: Arc<SpotbookFactory>,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    process_socket(socket, tls, factory).await
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// Closest SQLSTATE for each engine failure.
fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidInterval | EngineError::InvalidPrice(_) | EngineError::LimitExceeded(_) => "22023",
        EngineError::WindowUnavailable(_) => "23P01",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::SelfBookingForbidden | EngineError::Forbidden(_) => "42501",
        EngineError::BookingLimitExceeded(_) => "54000",
        EngineError::NotFound(_) => "P0002",
        EngineError::Store(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
