//! Instrumented statement proxies
//!
//! Statements created through an instrumented connection are wrapped only when
//! statement capture is latched on for the current lease; otherwise the native
//! statement is returned untouched inside the pass-through variant of
//! [`Statement`]/[`PreparedStatement`], paying no wrapping cost.
//!
//! Every execute method funnels through one interception pair,
//! [`report_begin_execution`]/[`report_statement_completion`], so timing and
//! dispatch logic exists exactly once. Completion dispatch runs on success and
//! failure alike; a driver error rides the executed event by reference and is
//! then rethrown to the caller unmodified.
//!
//! Parameter capture on prepared statements records bound values in a sparse
//! 1-indexed list, tolerating out-of-order binding; substitution back into the
//! SQL text happens lazily when the statement executes.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::clock::Clock;
use crate::connection::ConnectionHandle;
use crate::driver::{DriverPreparedStatement, DriverStatement};
use crate::error::{Error, Result};
use crate::listener::StatementExecutionListener;
use crate::manager::guarded_invoke;
use crate::user_data::UserData;
use crate::value::{Row, Value};

/// What flavor of statement a proxy wraps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatementKind {
    /// Direct SQL execution
    Direct,
    /// Prepared statement with positional parameters
    Prepared,
    /// Prepared stored-procedure call
    Call,
}

struct StatementState {
    seq_no: u32,
    kind: StatementKind,
    transaction_id: Option<String>,
    clock: Arc<dyn Clock>,
    sql: Mutex<Option<String>>,
    running: AtomicBool,
    started_at_nanos: AtomicI64,
    completed_at_nanos: AtomicI64,
    listeners: Mutex<Vec<Arc<dyn StatementExecutionListener>>>,
    user_data: UserData,
}

/// Cloneable reference to one statement's observable state
///
/// Carried by statement events; remains valid after the statement completes
/// or closes.
#[derive(Clone)]
pub struct StatementHandle {
    state: Arc<StatementState>,
}

impl StatementHandle {
    fn new(connection: &ConnectionHandle, kind: StatementKind, seq_no: u32) -> Self {
        Self {
            state: Arc::new(StatementState {
                seq_no,
                kind,
                transaction_id: connection.current_transaction_id(),
                clock: connection.manager().clock().clone(),
                sql: Mutex::new(None),
                running: AtomicBool::new(false),
                started_at_nanos: AtomicI64::new(0),
                completed_at_nanos: AtomicI64::new(0),
                listeners: Mutex::new(Vec::new()),
                user_data: UserData::new(),
            }),
        }
    }

    /// Sequence number of this statement within its connection. Assigned at
    /// creation, unique for the connection's entire physical lifetime, and
    /// never reused, even after close.
    pub fn seq_no(&self) -> u32 {
        self.state.seq_no
    }

    /// The statement flavor
    pub fn kind(&self) -> StatementKind {
        self.state.kind
    }

    /// Id of the transaction active when this statement was created, if any
    pub fn transaction_id(&self) -> Option<&str> {
        self.state.transaction_id.as_deref()
    }

    /// The SQL this statement most recently executed (or is executing). For a
    /// prepared statement with parameter capture enabled this is the fully
    /// substituted text; otherwise the raw placeholder-bearing text.
    pub fn sql(&self) -> Option<String> {
        self.state.sql.lock().clone()
    }

    /// Whether the statement is currently executing
    pub fn is_running(&self) -> bool {
        self.state.running.load(Ordering::Acquire)
    }

    /// Nanoseconds since the Unix epoch when execution last began
    pub fn started_at_nanos(&self) -> Option<i64> {
        match self.state.started_at_nanos.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    /// Nanoseconds since the Unix epoch when execution last completed
    pub fn completed_at_nanos(&self) -> Option<i64> {
        match self.state.completed_at_nanos.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    /// How long the statement executed for, or has been executing so far if
    /// it is still running
    pub fn duration(&self) -> Duration {
        let started = self.state.started_at_nanos.load(Ordering::Acquire);
        if started == 0 {
            return Duration::ZERO;
        }
        let completed = self.state.completed_at_nanos.load(Ordering::Acquire);
        let end = if completed > 0 {
            completed
        } else {
            self.state.clock.now_nanos()
        };
        Duration::from_nanos((end - started).max(0) as u64)
    }

    /// Attach a listener invoked immediately before and after this statement
    /// executes. Cleared when the statement closes.
    pub fn add_execution_listener(&self, listener: Arc<dyn StatementExecutionListener>) {
        self.state.listeners.lock().push(listener);
    }

    /// User data attached to this statement
    pub fn user_data(&self) -> &UserData {
        &self.state.user_data
    }

    fn set_sql(&self, sql: &str) {
        *self.state.sql.lock() = Some(sql.to_owned());
    }

    fn mark_running(&self) {
        self.state.running.store(true, Ordering::Release);
        self.state
            .started_at_nanos
            .store(self.state.clock.now_nanos(), Ordering::Release);
        self.state.completed_at_nanos.store(0, Ordering::Release);
    }

    fn mark_completed(&self) -> i64 {
        self.state.running.store(false, Ordering::Release);
        let now = self.state.clock.now_nanos();
        self.state.completed_at_nanos.store(now, Ordering::Release);
        (now - self.state.started_at_nanos.load(Ordering::Acquire)).max(0)
    }

    fn listeners_snapshot(&self) -> Vec<Arc<dyn StatementExecutionListener>> {
        self.state.listeners.lock().clone()
    }

    fn clear_listeners(&self) {
        self.state.listeners.lock().clear();
    }
}

impl std::fmt::Debug for StatementHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatementHandle")
            .field("seq_no", &self.state.seq_no)
            .field("kind", &self.state.kind)
            .field("running", &self.is_running())
            .finish()
    }
}

/// Single interception point for "execution begins": snapshot the SQL, mark
/// running, notify the owning connection, then statement-scoped listeners.
fn report_begin_execution(
    connection: &ConnectionHandle,
    handle: &StatementHandle,
    method: &'static str,
    sql: &str,
) {
    handle.set_sql(sql);
    handle.mark_running();

    let event = connection.statement_executing(handle, method);
    for listener in handle.listeners_snapshot() {
        guarded_invoke(connection.data_source_id(), "before_executing_statement", || {
            listener.before_executing_statement(&event)
        });
    }
}

/// Single interception point for "execution ended": mark complete, notify the
/// owning connection (which clears its current-statement pointer), then
/// statement-scoped listeners. Runs identically for success and failure.
fn report_statement_completion(
    connection: &ConnectionHandle,
    handle: &StatementHandle,
    method: &'static str,
    error: Option<&Error>,
) {
    let elapsed_nanos = handle.mark_completed();

    let event = connection.statement_executed(handle, method, elapsed_nanos, error);
    for listener in handle.listeners_snapshot() {
        guarded_invoke(connection.data_source_id(), "statement_executed", || {
            listener.statement_executed(&event)
        });
    }
}

// ===========================================================================
// Direct statements
// ===========================================================================

/// A statement created by an instrumented connection: either the native
/// statement untouched (capture off) or the instrumented proxy
pub enum Statement {
    /// The native statement, returned unwrapped when statement capture is
    /// disabled for the lease
    Passthrough(Box<dyn DriverStatement>),
    /// The instrumented proxy
    Instrumented(InstrumentedStatement),
}

impl Statement {
    /// Whether this statement is instrumented
    pub fn is_instrumented(&self) -> bool {
        matches!(self, Self::Instrumented(_))
    }

    /// The observable handle, when instrumented
    pub fn handle(&self) -> Option<StatementHandle> {
        match self {
            Self::Passthrough(_) => None,
            Self::Instrumented(s) => Some(s.handle()),
        }
    }

    /// Execute a statement that modifies data
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        match self {
            Self::Passthrough(s) => s.execute(sql).await,
            Self::Instrumented(s) => s.execute(sql).await,
        }
    }

    /// Execute a query that returns rows
    pub async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        match self {
            Self::Passthrough(s) => s.query(sql).await,
            Self::Instrumented(s) => s.query(sql).await,
        }
    }

    /// Append a statement to the current batch
    pub fn add_batch(&mut self, sql: &str) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.add_batch(sql),
            Self::Instrumented(s) => s.add_batch(sql),
        }
    }

    /// Discard the current batch
    pub fn clear_batch(&mut self) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.clear_batch(),
            Self::Instrumented(s) => s.clear_batch(),
        }
    }

    /// Execute the accumulated batch
    pub async fn execute_batch(&mut self) -> Result<Vec<u64>> {
        match self {
            Self::Passthrough(s) => s.execute_batch().await,
            Self::Instrumented(s) => s.execute_batch().await,
        }
    }

    /// Cancel a running execution; passes through unchanged
    pub async fn cancel(&mut self) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.cancel().await,
            Self::Instrumented(s) => s.cancel().await,
        }
    }

    /// Close the statement
    pub async fn close(&mut self) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.close().await,
            Self::Instrumented(s) => s.close().await,
        }
    }
}

/// Proxy around a native statement for direct SQL execution
pub struct InstrumentedStatement {
    native: Box<dyn DriverStatement>,
    connection: ConnectionHandle,
    handle: StatementHandle,
    batch: Vec<String>,
}

impl InstrumentedStatement {
    pub(crate) fn new(
        connection: ConnectionHandle,
        native: Box<dyn DriverStatement>,
        seq_no: u32,
    ) -> Self {
        let handle = StatementHandle::new(&connection, StatementKind::Direct, seq_no);
        Self {
            native,
            connection,
            handle,
            batch: Vec::new(),
        }
    }

    /// The observable handle for this statement
    pub fn handle(&self) -> StatementHandle {
        self.handle.clone()
    }

    /// The connection this statement was created by
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// Execute a statement that modifies data
    pub async fn execute(&mut self, sql: &str) -> Result<u64> {
        report_begin_execution(&self.connection, &self.handle, "execute", sql);
        match self.native.execute(sql).await {
            Ok(count) => {
                report_statement_completion(&self.connection, &self.handle, "execute", None);
                Ok(count)
            }
            Err(e) => {
                report_statement_completion(&self.connection, &self.handle, "execute", Some(&e));
                Err(e)
            }
        }
    }

    /// Execute a query that returns rows
    pub async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        report_begin_execution(&self.connection, &self.handle, "query", sql);
        match self.native.query(sql).await {
            Ok(rows) => {
                report_statement_completion(&self.connection, &self.handle, "query", None);
                Ok(rows)
            }
            Err(e) => {
                report_statement_completion(&self.connection, &self.handle, "query", Some(&e));
                Err(e)
            }
        }
    }

    /// Append a statement to the batch; the native statement receives it
    /// first in case that fails
    pub fn add_batch(&mut self, sql: &str) -> Result<()> {
        self.native.add_batch(sql)?;
        self.batch.push(sql.to_owned());
        Ok(())
    }

    /// Discard the batch
    pub fn clear_batch(&mut self) -> Result<()> {
        self.native.clear_batch()?;
        self.batch.clear();
        Ok(())
    }

    /// Execute the accumulated batch, reported as a single aggregate event
    /// whose SQL is the entries joined with a statement separator
    pub async fn execute_batch(&mut self) -> Result<Vec<u64>> {
        if self.batch.is_empty() {
            return self.native.execute_batch().await;
        }
        let joined = self.batch.join(";\n");
        report_begin_execution(&self.connection, &self.handle, "execute_batch", &joined);
        match self.native.execute_batch().await {
            Ok(counts) => {
                report_statement_completion(&self.connection, &self.handle, "execute_batch", None);
                Ok(counts)
            }
            Err(e) => {
                report_statement_completion(
                    &self.connection,
                    &self.handle,
                    "execute_batch",
                    Some(&e),
                );
                Err(e)
            }
        }
    }

    /// Cancel a running execution; passes through unchanged
    pub async fn cancel(&mut self) -> Result<()> {
        self.native.cancel().await
    }

    /// Close the statement, clearing batch bookkeeping and listeners
    pub async fn close(&mut self) -> Result<()> {
        self.batch.clear();
        self.handle.clear_listeners();
        self.native.close().await
    }
}

// ===========================================================================
// Prepared and callable statements
// ===========================================================================

/// A prepared statement created by an instrumented connection: either the
/// native statement untouched (capture off) or the instrumented proxy
pub enum PreparedStatement {
    /// The native statement, returned unwrapped when statement capture is
    /// disabled for the lease
    Passthrough(Box<dyn DriverPreparedStatement>),
    /// The instrumented proxy
    Instrumented(InstrumentedPreparedStatement),
}

impl PreparedStatement {
    /// Whether this statement is instrumented
    pub fn is_instrumented(&self) -> bool {
        matches!(self, Self::Instrumented(_))
    }

    /// The observable handle, when instrumented
    pub fn handle(&self) -> Option<StatementHandle> {
        match self {
            Self::Passthrough(_) => None,
            Self::Instrumented(s) => Some(s.handle()),
        }
    }

    /// The SQL text this statement was prepared from
    pub fn sql(&self) -> &str {
        match self {
            Self::Passthrough(s) => s.sql(),
            Self::Instrumented(s) => s.sql(),
        }
    }

    /// Bind a parameter at a 1-based position
    pub fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.bind(index, value),
            Self::Instrumented(s) => s.bind(index, value),
        }
    }

    /// Clear all bound parameters
    pub fn clear_parameters(&mut self) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.clear_parameters(),
            Self::Instrumented(s) => s.clear_parameters(),
        }
    }

    /// Execute with the bound parameters
    pub async fn execute(&mut self) -> Result<u64> {
        match self {
            Self::Passthrough(s) => s.execute().await,
            Self::Instrumented(s) => s.execute().await,
        }
    }

    /// Query with the bound parameters
    pub async fn query(&mut self) -> Result<Vec<Row>> {
        match self {
            Self::Passthrough(s) => s.query().await,
            Self::Instrumented(s) => s.query().await,
        }
    }

    /// Append the current parameter set to the batch
    pub fn add_batch(&mut self) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.add_batch(),
            Self::Instrumented(s) => s.add_batch(),
        }
    }

    /// Discard the current batch
    pub fn clear_batch(&mut self) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.clear_batch(),
            Self::Instrumented(s) => s.clear_batch(),
        }
    }

    /// Execute the accumulated batch
    pub async fn execute_batch(&mut self) -> Result<Vec<u64>> {
        match self {
            Self::Passthrough(s) => s.execute_batch().await,
            Self::Instrumented(s) => s.execute_batch().await,
        }
    }

    /// Cancel a running execution; passes through unchanged
    pub async fn cancel(&mut self) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.cancel().await,
            Self::Instrumented(s) => s.cancel().await,
        }
    }

    /// Close the statement
    pub async fn close(&mut self) -> Result<()> {
        match self {
            Self::Passthrough(s) => s.close().await,
            Self::Instrumented(s) => s.close().await,
        }
    }
}

/// Proxy around a native prepared (or callable) statement
///
/// When parameter capture is enabled for the lease, bound values are recorded
/// in a sparse 1-indexed list; binding out of order fills the gaps with
/// nothing and a later bind can land in any slot. The reported SQL substitutes
/// the captured values back into the placeholder positions.
pub struct InstrumentedPreparedStatement {
    native: Box<dyn DriverPreparedStatement>,
    connection: ConnectionHandle,
    handle: StatementHandle,
    sql: String,
    capture_parameters: bool,
    parameters: Vec<Option<Value>>,
    formatted: Option<String>,
    batch: Vec<String>,
}

impl InstrumentedPreparedStatement {
    pub(crate) fn new(
        connection: ConnectionHandle,
        native: Box<dyn DriverPreparedStatement>,
        seq_no: u32,
        sql: &str,
        kind: StatementKind,
        capture_parameters: bool,
    ) -> Self {
        let handle = StatementHandle::new(&connection, kind, seq_no);
        Self {
            native,
            connection,
            handle,
            sql: sql.to_owned(),
            capture_parameters,
            parameters: Vec::new(),
            formatted: None,
            batch: Vec::new(),
        }
    }

    /// The observable handle for this statement
    pub fn handle(&self) -> StatementHandle {
        self.handle.clone()
    }

    /// The connection this statement was created by
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// The raw SQL text this statement was prepared from
    pub fn sql(&self) -> &str {
        &self.sql
    }

    /// Bind a parameter at a 1-based position. With capture disabled this is
    /// a plain forward to the native statement with no bookkeeping.
    pub fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        if self.capture_parameters {
            self.track_parameter(index, value.clone());
        }
        self.native.bind(index, value)
    }

    fn track_parameter(&mut self, index: usize, value: Value) {
        if index == 0 {
            return;
        }
        let slot = index - 1;
        if slot >= self.parameters.len() {
            // out-of-order binding: pad intermediate positions
            self.parameters.resize(slot + 1, None);
        }
        self.parameters[slot] = Some(value);
        self.formatted = None;
    }

    /// The SQL that will be reported for the next execution: raw text when
    /// capture is off, substituted text when on
    fn formatted_sql(&mut self) -> String {
        if let Some(cached) = &self.formatted {
            return cached.clone();
        }
        if !self.capture_parameters || self.parameters.is_empty() {
            return self.sql.clone();
        }
        let formatted = self.substitute_parameters();
        self.formatted = Some(formatted.clone());
        formatted
    }

    /// Replace each `?` placeholder with the formatted captured value at that
    /// position. A skipped position inside the captured list renders NULL; a
    /// position beyond it keeps its `?`.
    fn substitute_parameters(&self) -> String {
        let manager = self.connection.manager();
        let mut out = String::with_capacity(self.sql.len() * 2);
        let mut parts = self.sql.split('?');
        if let Some(first) = parts.next() {
            out.push_str(first);
        }
        for (arg_idx, rest) in parts.enumerate() {
            let literal = match self.parameters.get(arg_idx) {
                Some(Some(value)) => manager
                    .format_parameter_value(value)
                    .unwrap_or_else(|| "NULL".to_owned()),
                Some(None) => "NULL".to_owned(),
                None => "?".to_owned(),
            };
            out.push_str(&literal);
            out.push_str(rest);
        }
        out
    }

    /// Clear all bound parameters, discarding the captured list
    pub fn clear_parameters(&mut self) -> Result<()> {
        self.parameters.clear();
        self.formatted = None;
        self.native.clear_parameters()
    }

    /// Execute with the bound parameters
    pub async fn execute(&mut self) -> Result<u64> {
        let sql = self.formatted_sql();
        report_begin_execution(&self.connection, &self.handle, "execute", &sql);
        match self.native.execute().await {
            Ok(count) => {
                report_statement_completion(&self.connection, &self.handle, "execute", None);
                Ok(count)
            }
            Err(e) => {
                report_statement_completion(&self.connection, &self.handle, "execute", Some(&e));
                Err(e)
            }
        }
    }

    /// Query with the bound parameters
    pub async fn query(&mut self) -> Result<Vec<Row>> {
        let sql = self.formatted_sql();
        report_begin_execution(&self.connection, &self.handle, "query", &sql);
        match self.native.query().await {
            Ok(rows) => {
                report_statement_completion(&self.connection, &self.handle, "query", None);
                Ok(rows)
            }
            Err(e) => {
                report_statement_completion(&self.connection, &self.handle, "query", Some(&e));
                Err(e)
            }
        }
    }

    /// Append the current parameter set to the batch; the reported batch entry
    /// is the substituted SQL for these parameters
    pub fn add_batch(&mut self) -> Result<()> {
        self.native.add_batch()?;
        let sql = self.formatted_sql();
        self.batch.push(sql);
        Ok(())
    }

    /// Discard the batch
    pub fn clear_batch(&mut self) -> Result<()> {
        self.native.clear_batch()?;
        self.batch.clear();
        Ok(())
    }

    /// Execute the accumulated batch, reported as a single aggregate event
    pub async fn execute_batch(&mut self) -> Result<Vec<u64>> {
        if self.batch.is_empty() {
            return self.native.execute_batch().await;
        }
        let joined = self.batch.join(";\n");
        report_begin_execution(&self.connection, &self.handle, "execute_batch", &joined);
        match self.native.execute_batch().await {
            Ok(counts) => {
                report_statement_completion(&self.connection, &self.handle, "execute_batch", None);
                Ok(counts)
            }
            Err(e) => {
                report_statement_completion(
                    &self.connection,
                    &self.handle,
                    "execute_batch",
                    Some(&e),
                );
                Err(e)
            }
        }
    }

    /// Cancel a running execution; passes through unchanged
    pub async fn cancel(&mut self) -> Result<()> {
        self.native.cancel().await
    }

    /// Close the statement, discarding captured parameters, batch bookkeeping,
    /// and listeners
    pub async fn close(&mut self) -> Result<()> {
        self.parameters.clear();
        self.formatted = None;
        self.batch.clear();
        self.handle.clear_listeners();
        self.native.close().await
    }
}
