//! Instrumented connection proxy
//!
//! [`InstrumentedConnection`] wraps one native connection and tracks its
//! lifecycle. Two lifecycles exist and only coincide when pooling is off:
//!
//! - the *physical* lifecycle: the actual session to the database, opened when
//!   the proxy is constructed and ended by [`close`](InstrumentedConnection::close);
//! - the *logical* lifecycle: one checkout (lease) of the physical connection
//!   from a pool, bracketed by [`logical_acquire`](InstrumentedConnection::logical_acquire)
//!   and [`logical_release`](InstrumentedConnection::logical_release).
//!
//! Feature flags are evaluated once per open transition and latched for the
//! lease, so behavior never flips mid-statement. The statement sequence
//! counter resets only on physical open; leases share it.
//!
//! The proxy itself is owned by the calling thread (`&mut self` surface, like
//! the driver underneath). Shared state lives behind a [`ConnectionHandle`],
//! the cloneable reference carried by events, resolvers, and listeners.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::driver::DriverConnection;
use crate::error::{Error, Result};
use crate::event::{
    ConnectionClosedEvent, ConnectionOpenedEvent, StatementExecutedEvent, StatementExecutingEvent,
};
use crate::listener::{ConnectionClosedListener, StatementExecutionListener};
use crate::manager::{guarded_invoke, DataSourceManager};
use crate::statement::{
    InstrumentedPreparedStatement, InstrumentedStatement, PreparedStatement, Statement,
    StatementHandle, StatementKind,
};
use crate::transaction::TransactionHandle;
use crate::user_data::UserData;

struct ConnectionInner {
    manager: Arc<DataSourceManager>,
    connection_id: Mutex<Option<String>>,

    // nanosecond timestamps; 0 means "not yet happened"
    physical_opened_nanos: AtomicI64,
    logical_opened_nanos: AtomicI64,
    logical_closed_nanos: AtomicI64,

    // flags latched at the most recent open transition
    instrumented: AtomicBool,
    capture_statements: AtomicBool,
    capture_parameters: AtomicBool,

    // next statement sequence number; reset only on physical open
    next_statement_seq: AtomicU32,

    current_statement: Mutex<Option<StatementHandle>>,
    current_transaction: Mutex<Option<TransactionHandle>>,

    // lease-scoped listeners, cleared on logical close
    close_listeners: Mutex<Vec<Arc<dyn ConnectionClosedListener>>>,
    statement_listeners: Mutex<Vec<Arc<dyn StatementExecutionListener>>>,

    user_data: UserData,
}

impl ConnectionInner {
    fn now(&self) -> i64 {
        self.manager.clock().now_nanos()
    }
}

/// Cloneable reference to an instrumented connection's shared state
///
/// This is what events carry, what resolvers return, and what listener code
/// interacts with. It exposes identity, timestamps, latched flags, the
/// current statement/transaction, lease-scoped listener registration, and
/// user data: everything except the driver half, which stays exclusively
/// with the owning [`InstrumentedConnection`].
#[derive(Clone)]
pub struct ConnectionHandle {
    inner: Arc<ConnectionInner>,
}

impl ConnectionHandle {
    /// The manager of the data source this connection belongs to
    pub fn manager(&self) -> &Arc<DataSourceManager> {
        &self.inner.manager
    }

    /// The data source id
    pub fn data_source_id(&self) -> &str {
        self.inner.manager.id()
    }

    /// The connection identifier assigned at physical open
    pub fn connection_id(&self) -> Option<String> {
        self.inner.connection_id.lock().clone()
    }

    /// Whether this connection is instrumented for the current lease.
    /// Stable for the whole lease even if the feature checker's answer
    /// changes in the meantime.
    pub fn is_instrumented(&self) -> bool {
        self.inner.instrumented.load(Ordering::Acquire)
    }

    /// Whether statements are captured for the current lease
    pub fn is_capturing_statements(&self) -> bool {
        self.is_instrumented() && self.inner.capture_statements.load(Ordering::Acquire)
    }

    /// Whether bound parameters are captured for the current lease
    pub fn is_capturing_query_parameters(&self) -> bool {
        self.is_capturing_statements() && self.inner.capture_parameters.load(Ordering::Acquire)
    }

    /// Whether this data source pools connections
    pub fn is_pooling_connections(&self) -> bool {
        self.inner.manager.is_pooling_connections()
    }

    /// Nanoseconds since the Unix epoch of the physical open
    pub fn physical_opened_nanos(&self) -> Option<i64> {
        match self.inner.physical_opened_nanos.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    /// Nanoseconds since the Unix epoch of the most recent logical open.
    /// Equal to the physical timestamp when pooling is disabled.
    pub fn logical_opened_nanos(&self) -> Option<i64> {
        match self.inner.logical_opened_nanos.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    /// Nanoseconds since the Unix epoch of the most recent logical close
    pub fn logical_closed_nanos(&self) -> Option<i64> {
        match self.inner.logical_closed_nanos.load(Ordering::Acquire) {
            0 => None,
            n => Some(n),
        }
    }

    /// The statement currently executing on this connection, if any
    pub fn executing_statement(&self) -> Option<StatementHandle> {
        self.inner.current_statement.lock().clone()
    }

    /// The transaction currently active on this connection, if any
    pub fn current_transaction(&self) -> Option<TransactionHandle> {
        self.inner.current_transaction.lock().clone()
    }

    /// The id of the currently active transaction, if any
    pub fn current_transaction_id(&self) -> Option<String> {
        self.inner
            .current_transaction
            .lock()
            .as_ref()
            .map(|tx| tx.id().to_owned())
    }

    /// Attach a listener notified when this connection is logically closed.
    /// Lease-scoped: cleared automatically after it fires.
    pub fn add_close_listener(&self, listener: Arc<dyn ConnectionClosedListener>) {
        self.inner.close_listeners.lock().push(listener);
    }

    /// Attach a statement execution listener to this connection.
    /// Lease-scoped: cleared on logical close.
    pub fn add_statement_listener(&self, listener: Arc<dyn StatementExecutionListener>) {
        self.inner.statement_listeners.lock().push(listener);
    }

    /// User data attached to this connection; cleared on logical close
    pub fn user_data(&self) -> &UserData {
        &self.inner.user_data
    }

    pub(crate) fn next_statement_seq(&self) -> u32 {
        self.inner.next_statement_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Record that `statement` has begun executing and dispatch the executing
    /// event to manager-wide and connection-scoped listeners.
    pub(crate) fn statement_executing(
        &self,
        statement: &StatementHandle,
        method: &'static str,
    ) -> StatementExecutingEvent {
        *self.inner.current_statement.lock() = Some(statement.clone());

        let event = StatementExecutingEvent::new(
            self.clone(),
            statement.clone(),
            self.inner.now(),
            self.is_pooling_connections(),
            method,
        );
        self.inner.manager.statement_executing(&event);

        let snapshot = self.inner.statement_listeners.lock().clone();
        for listener in snapshot {
            guarded_invoke(self.data_source_id(), "before_executing_statement", || {
                listener.before_executing_statement(&event)
            });
        }
        event
    }

    /// Record that `statement` finished executing, dispatch the executed event
    /// to manager-wide and connection-scoped listeners, and clear the current
    /// statement pointer.
    pub(crate) fn statement_executed<'a>(
        &self,
        statement: &StatementHandle,
        method: &'static str,
        elapsed_nanos: i64,
        error: Option<&'a Error>,
    ) -> StatementExecutedEvent<'a> {
        let event = StatementExecutedEvent::new(
            self.clone(),
            statement.clone(),
            self.inner.now(),
            self.is_pooling_connections(),
            method,
            elapsed_nanos,
            error,
        );
        self.inner.manager.statement_executed(&event);

        let snapshot = self.inner.statement_listeners.lock().clone();
        for listener in snapshot {
            guarded_invoke(self.data_source_id(), "statement_executed", || {
                listener.statement_executed(&event)
            });
        }

        *self.inner.current_statement.lock() = None;
        event
    }
}

impl std::fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("data_source", &self.data_source_id())
            .field("connection_id", &self.connection_id())
            .field("instrumented", &self.is_instrumented())
            .finish()
    }
}

/// Proxy around one native connection
///
/// Constructed by [`open`](Self::open) when the physical connection is
/// established. All driver operations delegate to the wrapped connection;
/// instrumentation observes without altering call semantics, and driver errors
/// pass through unmodified.
pub struct InstrumentedConnection {
    native: Box<dyn DriverConnection>,
    inner: Arc<ConnectionInner>,
}

impl InstrumentedConnection {
    /// Wrap a freshly established native connection. This is the physical-open
    /// transition: the connection id is assigned, the statement sequence
    /// counter resets, and feature flags are evaluated and latched. When the
    /// data source does not pool connections this is also the logical open.
    pub fn open(manager: Arc<DataSourceManager>, native: Box<dyn DriverConnection>) -> Self {
        let inner = Arc::new(ConnectionInner {
            manager,
            connection_id: Mutex::new(None),
            physical_opened_nanos: AtomicI64::new(0),
            logical_opened_nanos: AtomicI64::new(0),
            logical_closed_nanos: AtomicI64::new(0),
            instrumented: AtomicBool::new(false),
            capture_statements: AtomicBool::new(false),
            capture_parameters: AtomicBool::new(false),
            next_statement_seq: AtomicU32::new(1),
            current_statement: Mutex::new(None),
            current_transaction: Mutex::new(None),
            close_listeners: Mutex::new(Vec::new()),
            statement_listeners: Mutex::new(Vec::new()),
            user_data: UserData::new(),
        });
        let mut connection = Self { native, inner };
        connection.on_physical_open();
        connection
    }

    /// A cloneable handle to this connection's shared state
    pub fn handle(&self) -> ConnectionHandle {
        ConnectionHandle {
            inner: self.inner.clone(),
        }
    }

    fn on_physical_open(&mut self) {
        let now = self.inner.now();
        self.inner
            .physical_opened_nanos
            .store(now, Ordering::Release);
        self.inner.logical_opened_nanos.store(0, Ordering::Release);
        self.inner.logical_closed_nanos.store(0, Ordering::Release);
        self.inner.next_statement_seq.store(1, Ordering::Release);

        let manager = self.inner.manager.clone();
        let instrumented =
            manager.is_instrumented() && manager.features().should_instrument_connection();
        self.inner
            .instrumented
            .store(instrumented, Ordering::Release);

        let id = manager.assign_connection_id(self.native.as_ref());
        debug!(
            data_source = %manager.id(),
            connection_id = %id,
            instrumented,
            "physical connection opened"
        );
        *self.inner.connection_id.lock() = Some(id);

        if manager.is_pooling_connections() {
            // capture flags latch at logical acquire; physical listeners are
            // told about pool growth whenever the data source is enabled,
            // even if this particular lease ends up in pass-through mode
            self.inner
                .capture_statements
                .store(false, Ordering::Release);
            self.inner
                .capture_parameters
                .store(false, Ordering::Release);
            if manager.is_instrumented() {
                let event = ConnectionOpenedEvent::new(self.handle(), now, true);
                manager.physical_connection_opened(&event);
            }
        } else if instrumented {
            // unpooled: physical open is also the logical open
            self.latch_capture_flags();
            self.inner
                .logical_opened_nanos
                .store(now, Ordering::Release);
            manager.customize_connection(&self.handle());
            let event = ConnectionOpenedEvent::new(self.handle(), now, false);
            manager.logical_connection_opened(&event);
        } else {
            self.inner
                .capture_statements
                .store(false, Ordering::Release);
            self.inner
                .capture_parameters
                .store(false, Ordering::Release);
        }
    }

    fn latch_capture_flags(&self) {
        let features = self.inner.manager.features();
        self.inner
            .capture_statements
            .store(features.should_capture_statements(), Ordering::Release);
        self.inner.capture_parameters.store(
            features.should_capture_query_parameters(),
            Ordering::Release,
        );
    }

    /// Logical-acquire transition: the pool handed this physical connection to
    /// a caller. Re-evaluates and latches the feature flags for the new lease,
    /// runs the connection customizer, and fires the logical-open event.
    ///
    /// # Panics
    /// Panics when called on an unpooled data source or before physical open;
    /// both indicate broken pool integration.
    pub fn logical_acquire(&mut self) {
        let manager = self.inner.manager.clone();
        assert!(
            manager.is_pooling_connections(),
            "logical_acquire called for unpooled data source '{}'",
            manager.id()
        );
        assert!(
            self.inner.physical_opened_nanos.load(Ordering::Acquire) != 0,
            "logical_acquire before physical open on data source '{}'",
            manager.id()
        );

        let now = self.inner.now();
        self.inner.logical_opened_nanos.store(now, Ordering::Release);
        self.inner.logical_closed_nanos.store(0, Ordering::Release);

        let instrumented =
            manager.is_instrumented() && manager.features().should_instrument_connection();
        self.inner
            .instrumented
            .store(instrumented, Ordering::Release);

        if instrumented {
            self.latch_capture_flags();
            manager.customize_connection(&self.handle());
            let event = ConnectionOpenedEvent::new(self.handle(), now, true);
            manager.logical_connection_opened(&event);
        } else {
            self.inner
                .capture_statements
                .store(false, Ordering::Release);
            self.inner
                .capture_parameters
                .store(false, Ordering::Release);
        }
    }

    /// Logical-release transition: the lease ends and the physical connection
    /// goes back to the pool. Fires the logical-close event, runs and then
    /// clears lease-scoped listeners, and clears the current statement,
    /// transaction, and user data. The statement sequence counter is NOT
    /// reset; it runs for the whole physical lifetime.
    pub fn logical_release(&mut self) {
        if !self.inner.manager.is_pooling_connections() {
            warn!(
                data_source = %self.inner.manager.id(),
                "logical_release called but pooling is disabled; use close()"
            );
            return;
        }
        self.do_logical_close(true);
    }

    fn do_logical_close(&mut self, pooled: bool) {
        let inner = &self.inner;
        let now = inner.now();
        inner.logical_closed_nanos.store(now, Ordering::Release);

        if inner.instrumented.load(Ordering::Acquire) {
            let event = ConnectionClosedEvent::new(self.handle(), now, pooled);
            inner.manager.logical_connection_closed(&event);

            let close_snapshot = inner.close_listeners.lock().clone();
            for listener in close_snapshot {
                guarded_invoke(inner.manager.id(), "connection_closed", || {
                    listener.connection_closed(&event)
                });
            }
        }

        inner.close_listeners.lock().clear();
        inner.statement_listeners.lock().clear();
        *inner.current_statement.lock() = None;
        *inner.current_transaction.lock() = None;
        inner.user_data.clear();
    }

    /// Close the physical connection. The native close runs first; teardown
    /// and event dispatch happen even if it fails, and its error is returned
    /// unmodified afterwards.
    pub async fn close(mut self) -> Result<()> {
        let result = self.native.close().await;
        self.on_physical_close();
        result
    }

    fn on_physical_close(&mut self) {
        let manager = self.inner.manager.clone();
        let now = self.inner.now();

        if manager.is_pooling_connections() {
            // a lease still open at physical close is released implicitly
            let opened = self.inner.logical_opened_nanos.load(Ordering::Acquire);
            let closed = self.inner.logical_closed_nanos.load(Ordering::Acquire);
            if opened != 0 && closed < opened {
                self.do_logical_close(true);
            }
            if manager.is_instrumented() {
                let event = ConnectionClosedEvent::new(self.handle(), now, true);
                manager.physical_connection_closed(&event);
            }
        } else {
            // unpooled: physical close and logical close coincide
            self.do_logical_close(false);
        }

        self.inner.close_listeners.lock().clear();
        self.inner.statement_listeners.lock().clear();
        *self.inner.current_statement.lock() = None;
        *self.inner.current_transaction.lock() = None;
        self.inner.user_data.clear();

        debug!(
            data_source = %manager.id(),
            connection_id = ?self.inner.connection_id.lock().as_deref(),
            "physical connection closed"
        );
    }

    fn should_capture_statements(&self) -> bool {
        self.inner.instrumented.load(Ordering::Acquire)
            && self.inner.capture_statements.load(Ordering::Acquire)
    }

    /// Create a statement for direct SQL execution.
    ///
    /// Delegates to the native connection first; the result is wrapped only
    /// when statement capture is latched on for this lease, otherwise the
    /// native statement is returned untouched in the pass-through variant.
    pub async fn create_statement(&mut self) -> Result<Statement> {
        let native = self.native.create_statement().await?;
        if self.should_capture_statements() {
            let seq = self.handle().next_statement_seq();
            Ok(Statement::Instrumented(InstrumentedStatement::new(
                self.handle(),
                native,
                seq,
            )))
        } else {
            Ok(Statement::Passthrough(native))
        }
    }

    /// Prepare a parameterized statement
    pub async fn prepare(&mut self, sql: &str) -> Result<PreparedStatement> {
        let native = self.native.prepare(sql).await?;
        Ok(self.wrap_prepared(native, sql, StatementKind::Prepared))
    }

    /// Prepare a stored-procedure call
    pub async fn prepare_call(&mut self, sql: &str) -> Result<PreparedStatement> {
        let native = self.native.prepare_call(sql).await?;
        Ok(self.wrap_prepared(native, sql, StatementKind::Call))
    }

    fn wrap_prepared(
        &mut self,
        native: Box<dyn crate::driver::DriverPreparedStatement>,
        sql: &str,
        kind: StatementKind,
    ) -> PreparedStatement {
        if self.should_capture_statements() {
            let seq = self.handle().next_statement_seq();
            let capture_parameters = self.inner.capture_parameters.load(Ordering::Acquire);
            PreparedStatement::Instrumented(InstrumentedPreparedStatement::new(
                self.handle(),
                native,
                seq,
                sql,
                kind,
                capture_parameters,
            ))
        } else {
            PreparedStatement::Passthrough(native)
        }
    }

    /// Begin tracking a transaction on this connection.
    ///
    /// Fails when a transaction is already active. The transaction customizer
    /// runs before the transaction becomes current.
    pub fn begin_transaction(&mut self) -> Result<TransactionHandle> {
        if let Some(tx) = self.inner.current_transaction.lock().as_ref() {
            return Err(Error::transaction_state(format!(
                "unable to begin a new transaction while '{}' is still active",
                tx.id()
            )));
        }
        let manager = &self.inner.manager;
        let (seq, id) = manager.next_transaction();
        let tx = TransactionHandle::new(
            id,
            seq,
            manager.id().to_owned(),
            self.inner.connection_id.lock().clone(),
            self.inner.now(),
        );
        manager.customize_transaction(&tx);
        *self.inner.current_transaction.lock() = Some(tx.clone());
        Ok(tx)
    }

    /// Finish the transaction currently tracked on this connection.
    ///
    /// Fails when `transaction` is not the current one.
    pub fn transaction_finished(
        &mut self,
        transaction: &TransactionHandle,
        committed: bool,
    ) -> Result<()> {
        let mut current = self.inner.current_transaction.lock();
        match current.as_ref() {
            Some(tx) if tx.same_as(transaction) => {
                transaction.finish(committed);
                *current = None;
                Ok(())
            }
            Some(tx) => Err(Error::transaction_state(format!(
                "attempted to finish transaction '{}' but '{}' is current",
                transaction.id(),
                tx.id()
            ))),
            None => Err(Error::transaction_state(format!(
                "attempted to finish transaction '{}' but no transaction is current",
                transaction.id()
            ))),
        }
    }

    /// Whether this connection is instrumented for the current lease
    pub fn is_instrumented(&self) -> bool {
        self.handle().is_instrumented()
    }

    /// The connection identifier assigned at physical open
    pub fn connection_id(&self) -> Option<String> {
        self.handle().connection_id()
    }

    /// The data source id
    pub fn data_source_id(&self) -> &str {
        self.inner.manager.id()
    }

    /// The wrapped native connection
    pub fn real_connection(&self) -> &dyn DriverConnection {
        self.native.as_ref()
    }

    /// The wrapped native connection, mutably
    pub fn real_connection_mut(&mut self) -> &mut dyn DriverConnection {
        self.native.as_mut()
    }

    /// Check the native connection's health; passes through unchanged
    pub async fn is_valid(&self) -> bool {
        self.native.is_valid().await
    }
}

impl std::fmt::Debug for InstrumentedConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstrumentedConnection")
            .field("data_source", &self.data_source_id())
            .field("connection_id", &self.connection_id())
            .field("instrumented", &self.is_instrumented())
            .finish()
    }
}
