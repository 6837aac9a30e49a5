//! Event types dispatched to listeners
//!
//! Events are immutable snapshots constructed at the moment of the state
//! transition they describe. Timestamps are nanoseconds since the Unix epoch,
//! read from the data source's injectable [`Clock`](crate::clock::Clock).
//!
//! The `pooled` flag on every event tells a listener whether it is observing a
//! logical acquisition/release through a connection pool or a plain physical
//! open/close; [`EventKind::label`] renders the matching display name.

use std::time::Duration;

use crate::connection::ConnectionHandle;
use crate::error::Error;
use crate::statement::StatementHandle;

/// The kind of lifecycle event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// A connection was opened, or acquired from a pool
    ConnectionOpened,
    /// A connection was closed, or released back into a pool
    ConnectionClosed,
    /// A statement is about to execute
    StatementExecuting,
    /// A statement finished executing (successfully or not)
    StatementExecuted,
}

impl EventKind {
    /// Display name for this event kind, phrased for pooled or unpooled use
    pub fn label(self, pooled: bool) -> &'static str {
        match (self, pooled) {
            (Self::ConnectionOpened, false) => "Connection Opened",
            (Self::ConnectionOpened, true) => "Connection Acquired",
            (Self::ConnectionClosed, false) => "Connection Closed",
            (Self::ConnectionClosed, true) => "Connection Released",
            (Self::StatementExecuting, _) => "Executing Statement",
            (Self::StatementExecuted, _) => "Executed Statement",
        }
    }
}

/// Fired when a connection is opened or acquired from a pool
#[derive(Clone)]
pub struct ConnectionOpenedEvent {
    connection: ConnectionHandle,
    timestamp_nanos: i64,
    pooled: bool,
}

impl ConnectionOpenedEvent {
    pub(crate) fn new(connection: ConnectionHandle, timestamp_nanos: i64, pooled: bool) -> Self {
        Self {
            connection,
            timestamp_nanos,
            pooled,
        }
    }

    /// The connection this event describes
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// The event kind
    pub fn kind(&self) -> EventKind {
        EventKind::ConnectionOpened
    }

    /// Nanoseconds since the Unix epoch when the event occurred
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    /// Milliseconds since the Unix epoch when the event occurred
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_nanos / 1_000_000
    }

    /// Whether this describes a logical acquisition from a pool rather than
    /// establishment of a physical connection
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }
}

/// Fired when a connection is closed or released back into a pool
#[derive(Clone)]
pub struct ConnectionClosedEvent {
    connection: ConnectionHandle,
    timestamp_nanos: i64,
    pooled: bool,
}

impl ConnectionClosedEvent {
    pub(crate) fn new(connection: ConnectionHandle, timestamp_nanos: i64, pooled: bool) -> Self {
        Self {
            connection,
            timestamp_nanos,
            pooled,
        }
    }

    /// The connection this event describes
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// The event kind
    pub fn kind(&self) -> EventKind {
        EventKind::ConnectionClosed
    }

    /// Nanoseconds since the Unix epoch when the event occurred
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    /// Milliseconds since the Unix epoch when the event occurred
    pub fn timestamp_millis(&self) -> i64 {
        self.timestamp_nanos / 1_000_000
    }

    /// Whether this describes a logical release into a pool rather than a
    /// physical close
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }
}

/// Fired immediately before a statement executes against the database
#[derive(Clone)]
pub struct StatementExecutingEvent {
    connection: ConnectionHandle,
    statement: StatementHandle,
    timestamp_nanos: i64,
    pooled: bool,
    method: &'static str,
}

impl StatementExecutingEvent {
    pub(crate) fn new(
        connection: ConnectionHandle,
        statement: StatementHandle,
        timestamp_nanos: i64,
        pooled: bool,
        method: &'static str,
    ) -> Self {
        Self {
            connection,
            statement,
            timestamp_nanos,
            pooled,
            method,
        }
    }

    /// The connection the statement executes on
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// The statement that is about to execute
    pub fn statement(&self) -> &StatementHandle {
        &self.statement
    }

    /// The event kind
    pub fn kind(&self) -> EventKind {
        EventKind::StatementExecuting
    }

    /// Nanoseconds since the Unix epoch when execution began
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    /// Whether the owning connection is pooled
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// The execution method, such as `"execute"` or `"query"`
    pub fn method(&self) -> &'static str {
        self.method
    }
}

/// Fired after a statement finished executing, on success and on failure
///
/// Carries the driver error by reference when execution failed; the error
/// itself is rethrown to the caller unmodified after dispatch completes.
pub struct StatementExecutedEvent<'a> {
    connection: ConnectionHandle,
    statement: StatementHandle,
    timestamp_nanos: i64,
    pooled: bool,
    method: &'static str,
    elapsed_nanos: i64,
    error: Option<&'a Error>,
}

impl<'a> StatementExecutedEvent<'a> {
    pub(crate) fn new(
        connection: ConnectionHandle,
        statement: StatementHandle,
        timestamp_nanos: i64,
        pooled: bool,
        method: &'static str,
        elapsed_nanos: i64,
        error: Option<&'a Error>,
    ) -> Self {
        Self {
            connection,
            statement,
            timestamp_nanos,
            pooled,
            method,
            elapsed_nanos,
            error,
        }
    }

    /// The connection the statement executed on
    pub fn connection(&self) -> &ConnectionHandle {
        &self.connection
    }

    /// The statement that executed
    pub fn statement(&self) -> &StatementHandle {
        &self.statement
    }

    /// The event kind
    pub fn kind(&self) -> EventKind {
        EventKind::StatementExecuted
    }

    /// Nanoseconds since the Unix epoch when execution completed
    pub fn timestamp_nanos(&self) -> i64 {
        self.timestamp_nanos
    }

    /// Whether the owning connection is pooled
    pub fn is_pooled(&self) -> bool {
        self.pooled
    }

    /// The execution method, such as `"execute"` or `"query"`
    pub fn method(&self) -> &'static str {
        self.method
    }

    /// Execution duration in nanoseconds
    pub fn elapsed_nanos(&self) -> i64 {
        self.elapsed_nanos
    }

    /// Execution duration
    pub fn elapsed(&self) -> Duration {
        Duration::from_nanos(self.elapsed_nanos.max(0) as u64)
    }

    /// Whether the statement failed
    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// The driver error, when execution failed
    pub fn error(&self) -> Option<&'a Error> {
        self.error
    }
}
