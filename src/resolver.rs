//! Connection resolution
//!
//! When a connection pool wraps the instrumented driver, the connection object
//! application code holds is the pool's wrapper, not the instrumented one. A
//! [`ConnectionResolver`] knows how to unwrap the pool's type and recover the
//! [`ConnectionHandle`] underneath, and how to derive a stable identifier for
//! a native connection when the driver does not expose one.

use std::any::Any;

use crate::connection::ConnectionHandle;
use crate::driver::DriverConnection;

/// Unwraps pool-layer connections and derives connection identifiers
pub trait ConnectionResolver: Send + Sync {
    /// Resolve the instrumented connection underneath a pool-layer wrapper.
    /// Returns `None` if the value is not a recognized wrapper type.
    fn resolve_instrumented(&self, connection: &dyn Any) -> Option<ConnectionHandle>;

    /// Derive an identifier for a native connection. In pooled use an
    /// identifier may be observed again after the physical connection is
    /// recycled, but is only ever associated with one live connection at a
    /// time.
    fn generate_connection_id(&self, connection: &dyn DriverConnection) -> String;
}

/// Resolver for the common case where no pool wrapper is involved: the value
/// handed in is already a [`ConnectionHandle`]
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityConnectionResolver;

impl ConnectionResolver for IdentityConnectionResolver {
    fn resolve_instrumented(&self, connection: &dyn Any) -> Option<ConnectionHandle> {
        connection.downcast_ref::<ConnectionHandle>().cloned()
    }

    fn generate_connection_id(&self, connection: &dyn DriverConnection) -> String {
        format!("{:x}", connection as *const _ as *const () as usize)
    }
}
