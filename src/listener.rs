//! Listener contracts
//!
//! Listeners observe connection lifecycle and statement execution. They can be
//! registered data-source-wide on a [`DataSourceManager`] or per-connection on
//! a [`ConnectionHandle`] (lease-scoped, cleared automatically when the lease
//! is released); statement execution listeners can additionally be attached to
//! a single statement.
//!
//! A listener must never break the underlying database operation: panics in a
//! callback are caught, logged, and dispatch continues with the next listener.
//!
//! [`DataSourceManager`]: crate::manager::DataSourceManager
//! [`ConnectionHandle`]: crate::connection::ConnectionHandle

use crate::event::{
    ConnectionClosedEvent, ConnectionOpenedEvent, StatementExecutedEvent, StatementExecutingEvent,
};

/// Notified whenever a connection is opened (or acquired from a pool)
pub trait ConnectionOpenedListener: Send + Sync {
    /// Invoked with an event describing the connection that was just opened
    fn connection_opened(&self, event: &ConnectionOpenedEvent);
}

/// Notified whenever a connection is closed (or released into a pool)
pub trait ConnectionClosedListener: Send + Sync {
    /// Invoked with an event describing the connection that was just closed
    fn connection_closed(&self, event: &ConnectionClosedEvent);
}

/// Notified immediately before and after a statement executes
///
/// Both callbacks default to no-ops so implementations can subscribe to one
/// side only. The executed callback fires on success and failure alike.
pub trait StatementExecutionListener: Send + Sync {
    /// Invoked before the statement is sent to the database
    fn before_executing_statement(&self, event: &StatementExecutingEvent) {
        let _ = event;
    }

    /// Invoked after the statement finished executing; `event.has_error()`
    /// distinguishes failure from success
    fn statement_executed(&self, event: &StatementExecutedEvent<'_>) {
        let _ = event;
    }
}

impl<F> ConnectionOpenedListener for F
where
    F: Fn(&ConnectionOpenedEvent) + Send + Sync,
{
    fn connection_opened(&self, event: &ConnectionOpenedEvent) {
        self(event)
    }
}

impl<F> ConnectionClosedListener for F
where
    F: Fn(&ConnectionClosedEvent) + Send + Sync,
{
    fn connection_closed(&self, event: &ConnectionClosedEvent) {
        self(event)
    }
}
