//! Native driver seam for sqltap
//!
//! The instrumentation layer is driver-agnostic: the embedding application
//! adapts its concrete driver (or an in-memory fake in tests) to these traits
//! and hands connections to [`InstrumentedConnection::open`]. Every proxy
//! method delegates to the corresponding method here; sqltap never interprets
//! SQL and never transforms driver errors.
//!
//! Adapters produce [`Error::Driver`](crate::error::Error::Driver) values for
//! backend failures; the instrumentation layer rethrows them unmodified after
//! completion events have been dispatched.
//!
//! [`InstrumentedConnection::open`]: crate::connection::InstrumentedConnection::open

use async_trait::async_trait;

use crate::error::Result;
use crate::value::{Row, Value};

/// A native database connection as seen by the instrumentation layer
#[async_trait]
pub trait DriverConnection: Send + Sync {
    /// Backend-assigned identifier for this connection, if the driver exposes
    /// one (e.g. the MySQL thread id). Used as the preferred connection id.
    fn connection_id(&self) -> Option<String> {
        None
    }

    /// Create a statement for direct SQL execution
    async fn create_statement(&mut self) -> Result<Box<dyn DriverStatement>>;

    /// Prepare a parameterized statement
    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn DriverPreparedStatement>>;

    /// Prepare a stored-procedure call. Drivers without a distinct call
    /// interface serve these through [`prepare`](Self::prepare).
    async fn prepare_call(&mut self, sql: &str) -> Result<Box<dyn DriverPreparedStatement>> {
        self.prepare(sql).await
    }

    /// Check if the connection is still alive
    async fn is_valid(&self) -> bool {
        true
    }

    /// Close the physical connection
    async fn close(&mut self) -> Result<()>;
}

/// A native statement executing direct SQL text
#[async_trait]
pub trait DriverStatement: Send {
    /// Execute a statement that modifies data, returning the affected row count
    async fn execute(&mut self, sql: &str) -> Result<u64>;

    /// Execute a query that returns rows
    async fn query(&mut self, sql: &str) -> Result<Vec<Row>>;

    /// Append a statement to the current batch
    fn add_batch(&mut self, sql: &str) -> Result<()>;

    /// Discard the current batch
    fn clear_batch(&mut self) -> Result<()>;

    /// Execute the accumulated batch, returning per-entry affected counts
    async fn execute_batch(&mut self) -> Result<Vec<u64>>;

    /// Cancel a running execution. Passes through unchanged; sqltap introduces
    /// no cancellation of its own.
    async fn cancel(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the statement
    async fn close(&mut self) -> Result<()>;
}

/// A native prepared (or callable) statement with positional parameters
#[async_trait]
pub trait DriverPreparedStatement: Send {
    /// The SQL text this statement was prepared from
    fn sql(&self) -> &str;

    /// Bind a parameter value at a 1-based position
    fn bind(&mut self, index: usize, value: Value) -> Result<()>;

    /// Clear all bound parameters
    fn clear_parameters(&mut self) -> Result<()>;

    /// Append the current parameter set to the batch
    fn add_batch(&mut self) -> Result<()>;

    /// Discard the current batch
    fn clear_batch(&mut self) -> Result<()>;

    /// Execute with the bound parameters, returning the affected row count
    async fn execute(&mut self) -> Result<u64>;

    /// Query with the bound parameters
    async fn query(&mut self) -> Result<Vec<Row>>;

    /// Execute the accumulated batch, returning per-entry affected counts
    async fn execute_batch(&mut self) -> Result<Vec<u64>>;

    /// Cancel a running execution. Passes through unchanged.
    async fn cancel(&mut self) -> Result<()> {
        Ok(())
    }

    /// Close the statement
    async fn close(&mut self) -> Result<()>;
}
