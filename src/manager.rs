//! Per-data-source manager
//!
//! A [`DataSourceManager`] is the façade connections talk to: it owns the
//! listener registries for one data source, exposes parameter formatting and
//! customization services resolved from the configuration, and dispatches
//! lifecycle events. Exactly one manager exists per data source id for the
//! process lifetime; the registry enforces that.
//!
//! Listener lists may be mutated concurrently with dispatch from connections
//! on other threads: dispatch iterates a cloned snapshot, so registration
//! during iteration never invalidates it and a removed listener is never
//! invoked after its removal completes.

use parking_lot::RwLock;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{error, warn};

use crate::checker::FeatureChecker;
use crate::clock::Clock;
use crate::config::{ConnectionCustomizer, DataSourceConfig, TransactionCustomizer};
use crate::connection::{ConnectionHandle, InstrumentedConnection};
use crate::dialect::ParameterFormatter;
use crate::driver::DriverConnection;
use crate::error::{Error, Result};
use crate::event::{
    ConnectionClosedEvent, ConnectionOpenedEvent, StatementExecutedEvent, StatementExecutingEvent,
};
use crate::listener::{
    ConnectionClosedListener, ConnectionOpenedListener, StatementExecutionListener,
};
use crate::value::Value;

/// Run one listener callback, isolating panics so a misbehaving listener
/// never breaks the database operation or starves later listeners.
pub(crate) fn guarded_invoke(data_source: &str, callback: &'static str, invoke: impl FnOnce()) {
    if catch_unwind(AssertUnwindSafe(invoke)).is_err() {
        error!(
            data_source = %data_source,
            callback,
            "listener panicked during dispatch; continuing with remaining listeners"
        );
    }
}

/// Centralized callback and service hub for a single data source
pub struct DataSourceManager {
    id: String,
    instrumented: bool,
    pooled: bool,
    features: Arc<dyn FeatureChecker>,
    formatter: Option<Arc<dyn ParameterFormatter>>,
    resolver: Option<Arc<dyn crate::resolver::ConnectionResolver>>,
    connection_customizer: Option<Arc<dyn ConnectionCustomizer>>,
    transaction_customizer: Option<Arc<dyn TransactionCustomizer>>,
    clock: Arc<dyn Clock>,

    // counters backing generated connection and transaction identifiers
    next_connection_id: AtomicU64,
    next_transaction_id: AtomicU64,

    // logical listeners fire per lease; physical listeners only exist for
    // pooled data sources and fire when the underlying connection is
    // established or torn down
    logical_opened_listeners: RwLock<Vec<Arc<dyn ConnectionOpenedListener>>>,
    logical_closed_listeners: RwLock<Vec<Arc<dyn ConnectionClosedListener>>>,
    physical_opened_listeners: RwLock<Vec<Arc<dyn ConnectionOpenedListener>>>,
    physical_closed_listeners: RwLock<Vec<Arc<dyn ConnectionClosedListener>>>,
    statement_listeners: RwLock<Vec<Arc<dyn StatementExecutionListener>>>,
}

impl DataSourceManager {
    pub(crate) fn new(config: &DataSourceConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            id: config.id().to_owned(),
            instrumented: config.is_instrumented(),
            pooled: config.is_pooling_connections(),
            features: config.feature_checker().clone(),
            formatter: config.parameter_formatter().cloned(),
            resolver: config.connection_resolver().cloned(),
            connection_customizer: config.connection_customizer().cloned(),
            transaction_customizer: config.transaction_customizer().cloned(),
            clock,
            next_connection_id: AtomicU64::new(0),
            next_transaction_id: AtomicU64::new(0),
            logical_opened_listeners: RwLock::new(Vec::new()),
            logical_closed_listeners: RwLock::new(Vec::new()),
            physical_opened_listeners: RwLock::new(Vec::new()),
            physical_closed_listeners: RwLock::new(Vec::new()),
            statement_listeners: RwLock::new(Vec::new()),
        }
    }

    /// The id of the data source this manager serves
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether any instrumentation may be enabled for this data source
    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }

    /// Whether connections to this data source are pooled
    pub fn is_pooling_connections(&self) -> bool {
        self.pooled
    }

    /// The feature checker consulted when connections open
    pub fn features(&self) -> &Arc<dyn FeatureChecker> {
        &self.features
    }

    pub(crate) fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Format a captured parameter value for query reporting.
    ///
    /// Returns `None` for NULL. Uses the configured formatter when present,
    /// otherwise the value's default rendering.
    pub fn format_parameter_value(&self, value: &Value) -> Option<String> {
        if value.is_null() {
            return None;
        }
        match &self.formatter {
            Some(formatter) => Some(formatter.format(value)),
            None => Some(value.to_string()),
        }
    }

    /// Apply the configured connection customizer, if any
    pub fn customize_connection(&self, connection: &ConnectionHandle) {
        if let Some(customizer) = &self.connection_customizer {
            customizer.customize_connection(connection);
        }
    }

    /// Apply the configured transaction customizer, if any
    pub fn customize_transaction(&self, transaction: &crate::transaction::TransactionHandle) {
        if let Some(customizer) = &self.transaction_customizer {
            customizer.customize_transaction(transaction);
        }
    }

    /// Resolve the instrumented connection underneath `connection`.
    ///
    /// Handles the identity cases directly (the value already is a
    /// [`ConnectionHandle`] or [`InstrumentedConnection`]); anything else is
    /// delegated to the configured resolver. Fails with a descriptive error
    /// naming this data source and the concrete native type otherwise.
    pub fn resolve_instrumented<T: Any>(&self, connection: &T) -> Result<ConnectionHandle> {
        let any = connection as &dyn Any;
        if let Some(handle) = any.downcast_ref::<ConnectionHandle>() {
            return Ok(handle.clone());
        }
        if let Some(conn) = any.downcast_ref::<InstrumentedConnection>() {
            return Ok(conn.handle());
        }
        if let Some(resolver) = &self.resolver {
            if let Some(handle) = resolver.resolve_instrumented(any) {
                return Ok(handle);
            }
        }
        Err(Error::Resolution {
            data_source: self.id.clone(),
            native_type: std::any::type_name::<T>().to_owned(),
        })
    }

    /// Pick an identifier for a freshly opened native connection: the
    /// driver-provided id when available, else the resolver's, else a
    /// counter-based fallback.
    pub(crate) fn assign_connection_id(&self, native: &dyn DriverConnection) -> String {
        if let Some(id) = native.connection_id() {
            return id;
        }
        if let Some(resolver) = &self.resolver {
            return resolver.generate_connection_id(native);
        }
        let n = self.next_connection_id.fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{}", self.id, n)
    }

    /// Next transaction sequence number and generated identifier
    pub(crate) fn next_transaction(&self) -> (u64, String) {
        let seq = self.next_transaction_id.fetch_add(1, Ordering::Relaxed) + 1;
        let id = format!("{}-tx-{}", self.id, seq);
        (seq, id)
    }

    // ------------------------------------------------------------------
    // Listener registration
    // ------------------------------------------------------------------

    /// Attach a listener notified when a connection is logically opened
    /// (acquired from the pool, or plain opened when unpooled)
    pub fn add_connection_opened_listener(&self, listener: Arc<dyn ConnectionOpenedListener>) {
        self.logical_opened_listeners.write().push(listener);
    }

    /// Detach a previously attached logical-open listener
    pub fn remove_connection_opened_listener(&self, listener: &Arc<dyn ConnectionOpenedListener>) {
        self.logical_opened_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Attach a listener notified when a connection is logically closed
    /// (released into the pool, or plain closed when unpooled)
    pub fn add_connection_closed_listener(&self, listener: Arc<dyn ConnectionClosedListener>) {
        self.logical_closed_listeners.write().push(listener);
    }

    /// Detach a previously attached logical-close listener
    pub fn remove_connection_closed_listener(&self, listener: &Arc<dyn ConnectionClosedListener>) {
        self.logical_closed_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Attach a listener notified when a physical connection is established.
    /// For an unpooled data source physical and logical lifecycles coincide,
    /// so the listener lands on the logical list instead.
    pub fn add_physical_connection_opened_listener(
        &self,
        listener: Arc<dyn ConnectionOpenedListener>,
    ) {
        if self.pooled {
            self.physical_opened_listeners.write().push(listener);
        } else {
            self.logical_opened_listeners.write().push(listener);
        }
    }

    /// Detach a previously attached physical-open listener
    pub fn remove_physical_connection_opened_listener(
        &self,
        listener: &Arc<dyn ConnectionOpenedListener>,
    ) {
        if self.pooled {
            self.physical_opened_listeners
                .write()
                .retain(|l| !Arc::ptr_eq(l, listener));
        } else {
            self.logical_opened_listeners
                .write()
                .retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    /// Attach a listener notified when a physical connection is torn down.
    /// Falls through to the logical list when the data source is unpooled.
    pub fn add_physical_connection_closed_listener(
        &self,
        listener: Arc<dyn ConnectionClosedListener>,
    ) {
        if self.pooled {
            self.physical_closed_listeners.write().push(listener);
        } else {
            self.logical_closed_listeners.write().push(listener);
        }
    }

    /// Detach a previously attached physical-close listener
    pub fn remove_physical_connection_closed_listener(
        &self,
        listener: &Arc<dyn ConnectionClosedListener>,
    ) {
        if self.pooled {
            self.physical_closed_listeners
                .write()
                .retain(|l| !Arc::ptr_eq(l, listener));
        } else {
            self.logical_closed_listeners
                .write()
                .retain(|l| !Arc::ptr_eq(l, listener));
        }
    }

    /// Attach a data-source-wide statement execution listener
    pub fn add_statement_listener(&self, listener: Arc<dyn StatementExecutionListener>) {
        self.statement_listeners.write().push(listener);
    }

    /// Detach a previously attached statement execution listener
    pub fn remove_statement_listener(&self, listener: &Arc<dyn StatementExecutionListener>) {
        self.statement_listeners
            .write()
            .retain(|l| !Arc::ptr_eq(l, listener));
    }

    // ------------------------------------------------------------------
    // Dispatch (invoked by connections on the caller's thread)
    // ------------------------------------------------------------------

    pub(crate) fn logical_connection_opened(&self, event: &ConnectionOpenedEvent) {
        let snapshot = self.logical_opened_listeners.read().clone();
        for listener in snapshot {
            guarded_invoke(&self.id, "connection_opened", || {
                listener.connection_opened(event)
            });
        }
    }

    pub(crate) fn logical_connection_closed(&self, event: &ConnectionClosedEvent) {
        let snapshot = self.logical_closed_listeners.read().clone();
        for listener in snapshot {
            guarded_invoke(&self.id, "connection_closed", || {
                listener.connection_closed(event)
            });
        }
    }

    /// Physical-open dispatch; only meaningful for pooled data sources.
    /// Calling it when pooling is disabled is a wiring mistake: logged, no-op.
    pub(crate) fn physical_connection_opened(&self, event: &ConnectionOpenedEvent) {
        if !event.is_pooled() {
            warn!(
                data_source = %self.id,
                "physical_connection_opened called but pooling is disabled"
            );
            return;
        }
        let snapshot = self.physical_opened_listeners.read().clone();
        for listener in snapshot {
            guarded_invoke(&self.id, "connection_opened", || {
                listener.connection_opened(event)
            });
        }
    }

    /// Physical-close dispatch; only meaningful for pooled data sources.
    pub(crate) fn physical_connection_closed(&self, event: &ConnectionClosedEvent) {
        if !event.is_pooled() {
            warn!(
                data_source = %self.id,
                "physical_connection_closed called but pooling is disabled"
            );
            return;
        }
        let snapshot = self.physical_closed_listeners.read().clone();
        for listener in snapshot {
            guarded_invoke(&self.id, "connection_closed", || {
                listener.connection_closed(event)
            });
        }
    }

    pub(crate) fn statement_executing(&self, event: &StatementExecutingEvent) {
        let snapshot = self.statement_listeners.read().clone();
        for listener in snapshot {
            guarded_invoke(&self.id, "before_executing_statement", || {
                listener.before_executing_statement(event)
            });
        }
    }

    pub(crate) fn statement_executed(&self, event: &StatementExecutedEvent<'_>) {
        let snapshot = self.statement_listeners.read().clone();
        for listener in snapshot {
            guarded_invoke(&self.id, "statement_executed", || {
                listener.statement_executed(event)
            });
        }
    }
}

impl std::fmt::Debug for DataSourceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceManager")
            .field("id", &self.id)
            .field("instrumented", &self.instrumented)
            .field("pooled", &self.pooled)
            .finish()
    }
}
