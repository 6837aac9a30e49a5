//! # sqltap
//!
//! Transparent instrumentation layer for relational database drivers.
//!
//! sqltap sits between application code and a native driver, wrapping
//! connections and statements so that every connection acquisition/release
//! and every statement execution can be observed, timed, and reported to
//! pluggable listeners, without changing the call semantics the application
//! sees. Driver errors are rethrown unmodified; disabled instrumentation
//! returns native objects untouched.
//!
//! ## Features
//!
//! - **Lifecycle proxying**: distinguishes the *physical* connection
//!   lifecycle (socket-level open/close) from the *logical* lifecycle
//!   (pool acquire/release), which only coincide when pooling is off
//! - **Event dispatch**: connection opened/closed and statement
//!   executing/executed events with nanosecond timestamps from an injectable
//!   clock, delivered to manager-wide, connection-scoped, and
//!   statement-scoped listeners
//! - **Statement capture**: SQL text capture with optional bound-parameter
//!   substitution via vendor formatters (MySQL, PostgreSQL)
//! - **Deferred registration**: data sources can be referenced before they
//!   are configured; placeholder configurations are filled in place exactly
//!   once
//! - **Lease-latched flags**: feature decisions are evaluated once per lease
//!   and stay stable for its duration
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use sqltap::prelude::*;
//!
//! let registry = DataSourceRegistry::new();
//! let manager = registry.register(
//!     DataSourceConfig::builder("orders")
//!         .parameter_formatter(Arc::new(MySqlFormatter))
//!         .build(),
//! )?;
//!
//! manager.add_statement_listener(Arc::new(SlowQueryLogger::default()));
//!
//! // native_conn implements DriverConnection for your driver
//! let mut conn = InstrumentedConnection::open(manager, native_conn);
//! let mut stmt = conn.prepare("SELECT * FROM t WHERE id = ?").await?;
//! stmt.bind(1, Value::Int32(42))?;
//! let rows = stmt.query().await?;
//! conn.close().await?;
//! ```
//!
//! ## Scope
//!
//! sqltap does not parse or optimize SQL, does not manage a connection pool,
//! and does not persist captured events; it produces and routes them. It
//! adds no threads and no blocking of its own: all dispatch runs inline on
//! the caller's thread.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod checker;
pub mod clock;
pub mod config;
pub mod connection;
pub mod dialect;
pub mod driver;
pub mod error;
pub mod event;
pub mod listener;
pub mod manager;
pub mod registry;
pub mod resolver;
pub mod statement;
pub mod transaction;
pub mod user_data;
pub mod value;

/// Prelude module for convenient imports
pub mod prelude {
    // Error types
    pub use crate::error::{Error, ErrorCategory, Result};

    // Value and row types
    pub use crate::value::{Row, Value};

    // Registry, configuration, and manager
    pub use crate::config::{
        ConfigHandle, ConnectionCustomizer, DataSourceConfig, DataSourceConfigBuilder,
        TransactionCustomizer,
    };
    pub use crate::manager::DataSourceManager;
    pub use crate::registry::DataSourceRegistry;

    // Connection and statement proxies
    pub use crate::connection::{ConnectionHandle, InstrumentedConnection};
    pub use crate::statement::{
        InstrumentedPreparedStatement, InstrumentedStatement, PreparedStatement, Statement,
        StatementHandle, StatementKind,
    };
    pub use crate::transaction::{TransactionHandle, TransactionStatus};

    // Driver seam
    pub use crate::driver::{DriverConnection, DriverPreparedStatement, DriverStatement};

    // Events and listeners
    pub use crate::event::{
        ConnectionClosedEvent, ConnectionOpenedEvent, EventKind, StatementExecutedEvent,
        StatementExecutingEvent,
    };
    pub use crate::listener::{
        ConnectionClosedListener, ConnectionOpenedListener, StatementExecutionListener,
    };

    // Collaborators
    pub use crate::checker::{FeatureChecker, StaticFeatureChecker};
    pub use crate::clock::{Clock, ManualClock, SystemClock};
    pub use crate::dialect::{formatter_for, MySqlFormatter, ParameterFormatter, PostgresFormatter};
    pub use crate::resolver::{ConnectionResolver, IdentityConnectionResolver};
    pub use crate::user_data::UserData;
}

// Re-export commonly used items at crate root
pub use error::{Error, Result};
pub use registry::DataSourceRegistry;
pub use value::Value;
