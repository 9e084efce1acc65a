use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::SharedPasswordSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability;
use crate::sql::{self, Command};
use crate::tenant::TenantManager;

/// Login settings shared by every connection.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub password: String,
    /// Login name that always acts as Admin.
    pub admin_user: String,
}

pub struct LeaveDeskHandler {
    tenant_manager: Arc<TenantManager>,
    admin_user: String,
    query_parser: Arc<LeaveDeskQueryParser>,
}

impl LeaveDeskHandler {
    pub fn new(tenant_manager: Arc<TenantManager>, admin_user: String) -> Self {
        Self {
            tenant_manager,
            admin_user,
            query_parser: Arc::new(LeaveDeskQueryParser),
        }
    }

    /// The tenant engine and login name of a connection.
    fn session<C: ClientInfo>(&self, client: &C) -> PgWireResult<(Arc<Engine>, String)> {
        let metadata = client.metadata();
        let db = metadata
            .get("database")
            .cloned()
            .unwrap_or_else(|| "default".to_string());
        let user = metadata.get("user").cloned().unwrap_or_default();
        let engine = self
            .tenant_manager
            .get_or_create(&db)
            .map_err(|e| user_error("08006", format!("tenant error: {e}")))?;
        Ok((engine, user))
    }

    async fn run(&self, engine: &Engine, user: &str, sql: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(sql).map_err(sql_err)?;
        self.run_command(engine, user, cmd).await
    }

    async fn run_command(&self, engine: &Engine, user: &str, cmd: Command) -> PgWireResult<Response> {
        let label = observability::command_label(&cmd);
        let actor = engine.resolve_actor(user, &self.admin_user).await;

        let start = Instant::now();
        let result = execute_command(engine, &actor, cmd).await;
        metrics::histogram!(observability::QUERY_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(observability::QUERIES_TOTAL, "command" => label, "status" => status).increment(1);

        if let Err(e) = &result {
            tracing::debug!("{label} by {} failed: {e}", actor.id);
        }
        result.map_err(engine_err)
    }
}

fn inserted(rows: usize) -> Response {
    Response::Execution(Tag::new("INSERT").with_rows(rows))
}

fn deleted() -> Response {
    Response::Execution(Tag::new("DELETE").with_rows(1))
}

async fn execute_command(engine: &Engine, actor: &Actor, cmd: Command) -> Result<Response, EngineError> {
    match cmd {
        Command::InsertRoom { id, name } => {
            engine.create_room(actor, id, name).await?;
            Ok(inserted(1))
        }
        Command::DeleteRoom { id } => {
            engine.delete_room(actor, id).await?;
            Ok(deleted())
        }
        Command::InsertPeriod { id, name } => {
            engine.define_period(actor, id, name).await?;
            Ok(inserted(1))
        }
        Command::InsertEmployee { employee } => {
            engine.upsert_employee(actor, employee).await?;
            Ok(inserted(1))
        }
        Command::InsertConstraint { key, value } => {
            engine.set_constraint(actor, key, value).await?;
            Ok(inserted(1))
        }
        Command::DeleteConstraint { key } => {
            engine.clear_constraint(actor, key).await?;
            Ok(deleted())
        }
        Command::InsertBlockedRange { id, from, to, reason } => {
            engine.add_blocked_range(actor, id, from, to, reason).await?;
            Ok(inserted(1))
        }
        Command::DeleteBlockedRange { id } => {
            engine.remove_blocked_range(actor, id).await?;
            Ok(deleted())
        }
        Command::InsertOverride { id, person, date } => {
            engine.grant_override(actor, id, person, date).await?;
            Ok(inserted(1))
        }
        Command::DeleteOverride { id } => {
            engine.revoke_override(actor, id).await?;
            Ok(deleted())
        }
        Command::InsertLeaveRequest {
            id,
            person,
            date,
            category,
            description,
            returning,
        } => {
            let receipt = engine
                .create_leave_request(actor, id, person, date, category, description)
                .await?;
            if !returning {
                return Ok(inserted(1));
            }
            Ok(rows("leave_receipt", [receipt], |enc, r| {
                enc.encode_field(&r.id.to_string())?;
                enc.encode_field(&r.status.as_str().to_string())?;
                enc.encode_field(&r.obfuscate)
            }))
        }
        Command::ReviewLeaveRequest { id, decision } => {
            engine.review_leave_request(actor, id, decision).await?;
            Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
        }
        Command::DeleteLeaveRequest { id } => {
            engine.delete_leave_request(actor, id).await?;
            Ok(deleted())
        }
        Command::InsertRoomBooking { request } => {
            engine.create_room_booking(actor, request).await?;
            Ok(inserted(1))
        }
        Command::InsertRecurringBooking { request, returning } => {
            let receipt = engine.create_recurring_booking(actor, request).await?;
            if !returning {
                return Ok(inserted(receipt.child_count));
            }
            Ok(rows("series_receipt", [receipt], |enc, r| {
                enc.encode_field(&r.parent_id.to_string())?;
                enc.encode_field(&(r.child_count as i64))
            }))
        }
        Command::UpdateRoomBooking { id, start_period, end_period, description } => {
            engine
                .update_room_booking(actor, id, start_period, end_period, description)
                .await?;
            Ok(Response::Execution(Tag::new("UPDATE").with_rows(1)))
        }
        Command::DeleteRoomBooking { id } => {
            engine.delete_room_booking(actor, id).await?;
            Ok(deleted())
        }
        Command::DeleteRecurringBooking { id } => {
            engine.delete_recurrence_template(actor, id).await?;
            Ok(deleted())
        }
        Command::DeleteAny { id } => {
            engine.delete_booking(actor, id).await?;
            Ok(deleted())
        }
        Command::SelectLeaveRequests { filter } => {
            let requests = engine.list_leave_requests(actor, &filter).await;
            Ok(rows("leave_requests", requests, encode_leave_request))
        }
        Command::SelectRoomBookings { room_ids, date } => {
            let bookings = engine.rooms_bookings(&room_ids, date).await?;
            Ok(rows("room_bookings", bookings, encode_booking))
        }
        Command::SelectSeriesBookings { template_id } => {
            let bookings = engine.template_children(template_id).await?;
            Ok(rows("room_bookings", bookings, encode_booking))
        }
        Command::SelectConflicts {
            room_id,
            date,
            start_period,
            end_period,
        } => {
            let conflict = engine.conflicts(room_id, date, start_period, end_period).await?;
            Ok(rows("conflicts", conflict, encode_booking))
        }
        Command::SelectQuota { person } => {
            let summary = engine.quota_summary(&person).await?;
            Ok(rows("quota", [summary], |enc, s| {
                enc.encode_field(&s.person)?;
                enc.encode_field(&i64::from(s.used))?;
                enc.encode_field(&i64::from(s.limit))?;
                enc.encode_field(&i64::from(s.remaining()))
            }))
        }
        Command::SelectRecurringBookings => Ok(rows("recurring_bookings", engine.list_templates(), |enc, t| {
            let weekdays = match t.frequency {
                Frequency::Weekly(set) => Some(set.to_string()),
                Frequency::Daily => None,
            };
            enc.encode_field(&t.id.to_string())?;
            enc.encode_field(&t.room_id.to_string())?;
            enc.encode_field(&t.owner)?;
            enc.encode_field(&t.occupant)?;
            enc.encode_field(&i64::from(t.periods.start))?;
            enc.encode_field(&i64::from(t.periods.end))?;
            enc.encode_field(&t.from.to_string())?;
            enc.encode_field(&t.to.to_string())?;
            enc.encode_field(&t.frequency.as_str().to_string())?;
            enc.encode_field(&weekdays)?;
            enc.encode_field(&t.description)
        })),
        Command::SelectConstraints => Ok(rows("constraints", engine.list_constraints().await, |enc, (key, value)| {
            enc.encode_field(&key.as_str().to_string())?;
            enc.encode_field(&value)
        })),
        Command::SelectRooms => Ok(rows("rooms", engine.list_rooms().await, |enc, room| {
            enc.encode_field(&room.id.to_string())?;
            enc.encode_field(&room.name)
        })),
        Command::SelectPeriods => Ok(rows("periods", engine.list_periods(), |enc, period| {
            enc.encode_field(&i64::from(period.id))?;
            enc.encode_field(&period.name)
        })),
        Command::SelectEmployees => Ok(rows("employees", engine.list_employees().await, |enc, e| {
            enc.encode_field(&e.id)?;
            enc.encode_field(&e.role.as_str().to_string())?;
            enc.encode_field(&i64::from(e.quota_override))?;
            enc.encode_field(&e.email)
        })),
        Command::SelectOverrides => Ok(rows("overrides", engine.list_overrides().await, |enc, o| {
            enc.encode_field(&o.id.to_string())?;
            enc.encode_field(&o.person)?;
            enc.encode_field(&o.date.to_string())?;
            enc.encode_field(&o.granted_by)
        })),
        Command::SelectBlockedRanges => Ok(rows("blocked_ranges", engine.list_blocked_ranges().await, |enc, b| {
            enc.encode_field(&b.id.to_string())?;
            enc.encode_field(&b.from.to_string())?;
            enc.encode_field(&b.to.to_string())?;
            enc.encode_field(&b.reason)
        })),
    }
}

fn encode_leave_request(enc: &mut DataRowEncoder, r: LeaveRequest) -> PgWireResult<()> {
    enc.encode_field(&r.id.to_string())?;
    enc.encode_field(&r.person)?;
    enc.encode_field(&r.date.to_string())?;
    enc.encode_field(&i64::from(r.category.0))?;
    enc.encode_field(&r.category.label().to_string())?;
    enc.encode_field(&r.description)?;
    enc.encode_field(&r.status.as_str().to_string())?;
    enc.encode_field(&r.created_by)?;
    enc.encode_field(&r.created_at)?;
    enc.encode_field(&r.updated_by)?;
    enc.encode_field(&r.updated_at)
}

fn encode_booking(enc: &mut DataRowEncoder, b: RoomBooking) -> PgWireResult<()> {
    enc.encode_field(&b.id.to_string())?;
    enc.encode_field(&b.room_id.to_string())?;
    enc.encode_field(&b.date.to_string())?;
    enc.encode_field(&i64::from(b.periods.start))?;
    enc.encode_field(&i64::from(b.periods.end))?;
    enc.encode_field(&b.owner)?;
    enc.encode_field(&b.booked_by)?;
    enc.encode_field(&b.description)?;
    enc.encode_field(&b.template_id.map(|id| id.to_string()))
}

/// Build a row-set response for `table`, encoding each item in schema order.
fn rows<T>(
    table: &str,
    items: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, T) -> PgWireResult<()>,
) -> Response {
    let schema = Arc::new(schema_for(table));
    let data: Vec<PgWireResult<_>> = items
        .into_iter()
        .map(|item| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, item)?;
            Ok(encoder.take_row())
        })
        .collect();
    Response::Query(QueryResponse::new(schema, stream::iter(data)))
}

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

/// Result columns of each readable table. Empty for statements without rows.
pub fn schema_for(table: &str) -> Vec<FieldInfo> {
    match table {
        "leave_requests" => vec![
            text("id"),
            text("person"),
            text("date"),
            int("category"),
            text("category_label"),
            text("description"),
            text("status"),
            text("created_by"),
            int("created_at"),
            text("updated_by"),
            int("updated_at"),
        ],
        "room_bookings" | "conflicts" => vec![
            text("id"),
            text("room_id"),
            text("date"),
            int("start_period"),
            int("end_period"),
            text("owner"),
            text("booked_by"),
            text("description"),
            text("template_id"),
        ],
        "recurring_bookings" => vec![
            text("id"),
            text("room_id"),
            text("owner"),
            text("occupant"),
            int("start_period"),
            int("end_period"),
            text("from_date"),
            text("to_date"),
            text("frequency"),
            text("weekdays"),
            text("description"),
        ],
        "quota" => vec![text("person"), int("used"), int("limit"), int("remaining")],
        "constraints" => vec![text("key"), int("value")],
        "rooms" => vec![text("id"), text("name")],
        "periods" => vec![int("id"), text("name")],
        "employees" => vec![text("id"), text("role"), int("quota_override"), text("email")],
        "overrides" => vec![text("id"), text("person"), text("date"), text("granted_by")],
        "blocked_ranges" => vec![text("id"), text("from_date"), text("to_date"), text("reason")],
        "leave_receipt" => vec![text("id"), text("status"), boolean("obfuscate")],
        "series_receipt" => vec![text("parent_id"), int("child_count")],
        _ => vec![],
    }
}

fn describe(sql: &str) -> Vec<FieldInfo> {
    sql::result_table(sql).map(|t| schema_for(&t)).unwrap_or_default()
}

#[async_trait]
impl SimpleQueryHandler for LeaveDeskHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let (engine, user) = self.session(client)?;
        let commands = sql::parse_batch(query).map_err(sql_err)?;
        let mut responses = Vec::with_capacity(commands.len());
        for cmd in commands {
            responses.push(self.run_command(&engine, &user, cmd).await?);
        }
        Ok(responses)
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct LeaveDeskQueryParser;

#[async_trait]
impl QueryParser for LeaveDeskQueryParser {
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
        Ok(describe(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for LeaveDeskHandler {
    type Statement = String;
    type QueryParser = LeaveDeskQueryParser;

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
        let (engine, user) = self.session(client)?;
        let sql = substitute_params(portal);
        self.run(&engine, &user, &sql).await
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
        Ok(DescribeStatementResponse::new(param_types, describe(&target.statement)))
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
        Ok(DescribePortalResponse::new(describe(&target.statement.statement)))
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
/// Highest index first so `$1` never clobbers the prefix of `$10`.
fn substitute_params(portal: &Portal<String>) -> String {
    let mut result = portal.statement.statement.to_string();
    for (i, param) in portal.parameters.iter().enumerate().rev() {
        let placeholder = format!("${}", i + 1);
        let value = match param {
            Some(bytes) => format!("'{}'", String::from_utf8_lossy(bytes).replace('\'', "''")),
            None => "NULL".to_string(),
        };
        result = result.replace(&placeholder, &value);
    }
    result
}

// ── Factory ──────────────────────────────────────────────────────

pub struct LeaveDeskFactory {
    handler: Arc<LeaveDeskHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<SharedPasswordSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl LeaveDeskFactory {
    pub fn new(tenant_manager: Arc<TenantManager>, credentials: Credentials) -> Self {
        let auth_source = SharedPasswordSource::new(credentials.password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(LeaveDeskHandler::new(tenant_manager, credentials.admin_user)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for LeaveDeskFactory {
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
    credentials: Credentials,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(LeaveDeskFactory::new(tenant_manager, credentials));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

/// SQLSTATE reported for each engine failure.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::Validation(_) => "22023",
        EngineError::Rejected(_) => "P0001",
        EngineError::Conflict(_) => "23P01",
        EngineError::NotFound(_) => "02000",
        EngineError::Forbidden(_) => "42501",
        EngineError::NotConfigured { .. } | EngineError::Misconfigured(_) => "F0000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::WalError(_) => "58030",
    }
}

fn error_message(e: &EngineError) -> String {
    match e {
        // Clients branch on the machine code before the colon.
        EngineError::Rejected(rejection) => format!("{}: {rejection}", rejection.code()),
        other => other.to_string(),
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), error_message(&e))
}

fn sql_err(e: sql::SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
