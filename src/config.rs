//! Data source configuration
//!
//! A [`DataSourceConfig`] bundles everything the instrumentation layer needs
//! to know about one logical data source: identity, instrumentation and
//! pooling toggles, and the pluggable collaborators (feature checker,
//! parameter formatter, connection resolver, customizers). Configurations are
//! immutable once built; "the same configuration" always means the same `Arc`
//! allocation.
//!
//! A [`ConfigHandle`] is the permanent per-id identity the registry hands out.
//! It is either created resolved, or as a placeholder whose single-assignment
//! slot is filled exactly once when the real configuration arrives. This lets
//! consumers hold a stable handle to a data source before bootstrap has
//! defined it, without ever observing two identities for one id.

use once_cell::sync::OnceCell;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::checker::{FeatureChecker, StaticFeatureChecker};
use crate::connection::ConnectionHandle;
use crate::dialect::ParameterFormatter;
use crate::error::{Error, Result};
use crate::resolver::ConnectionResolver;
use crate::transaction::TransactionHandle;

/// Side-effecting hook applied to every connection at logical open, before
/// the connection-opened event fires
pub trait ConnectionCustomizer: Send + Sync {
    /// Customize a connection that has just been opened or acquired
    fn customize_connection(&self, connection: &ConnectionHandle);
}

/// Side-effecting hook applied to every transaction at creation, before the
/// transaction becomes current on its connection
pub trait TransactionCustomizer: Send + Sync {
    /// Customize a transaction that has just begun
    fn customize_transaction(&self, transaction: &TransactionHandle);
}

/// Immutable configuration for one logical data source
pub struct DataSourceConfig {
    id: String,
    instrumented: bool,
    pooling: bool,
    features: Arc<dyn FeatureChecker>,
    formatter: Option<Arc<dyn ParameterFormatter>>,
    resolver: Option<Arc<dyn ConnectionResolver>>,
    connection_customizer: Option<Arc<dyn ConnectionCustomizer>>,
    transaction_customizer: Option<Arc<dyn TransactionCustomizer>>,
}

impl DataSourceConfig {
    /// Start building a configuration for the given data source id
    pub fn builder(id: impl Into<String>) -> DataSourceConfigBuilder {
        DataSourceConfigBuilder {
            id: id.into(),
            instrumented: true,
            pooling: false,
            features: Arc::new(StaticFeatureChecker::enabled()),
            formatter: None,
            resolver: None,
            connection_customizer: None,
            transaction_customizer: None,
        }
    }

    /// The unique identifier for this data source
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether any instrumentation may be enabled for this data source.
    /// When `false`, every connection runs in pass-through mode regardless of
    /// what the feature checker says.
    pub fn is_instrumented(&self) -> bool {
        self.instrumented
    }

    /// Whether a connection pool wraps the instrumented driver, separating
    /// logical acquisition/release from physical open/close
    pub fn is_pooling_connections(&self) -> bool {
        self.pooling
    }

    /// The feature checker consulted at each connection open
    pub fn feature_checker(&self) -> &Arc<dyn FeatureChecker> {
        &self.features
    }

    /// The parameter formatter for captured query parameters, if configured
    pub fn parameter_formatter(&self) -> Option<&Arc<dyn ParameterFormatter>> {
        self.formatter.as_ref()
    }

    /// The connection resolver for unwrapping pool-layer connections, if
    /// configured
    pub fn connection_resolver(&self) -> Option<&Arc<dyn ConnectionResolver>> {
        self.resolver.as_ref()
    }

    /// The connection customizer, if configured
    pub fn connection_customizer(&self) -> Option<&Arc<dyn ConnectionCustomizer>> {
        self.connection_customizer.as_ref()
    }

    /// The transaction customizer, if configured
    pub fn transaction_customizer(&self) -> Option<&Arc<dyn TransactionCustomizer>> {
        self.transaction_customizer.as_ref()
    }
}

impl std::fmt::Debug for DataSourceConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceConfig")
            .field("id", &self.id)
            .field("instrumented", &self.instrumented)
            .field("pooling", &self.pooling)
            .field("formatter", &self.formatter.as_ref().map(|d| d.name()))
            .finish()
    }
}

/// Builder for [`DataSourceConfig`]
///
/// Defaults: instrumentation on, pooling off, a
/// [`StaticFeatureChecker::enabled`] checker, and no optional collaborators.
pub struct DataSourceConfigBuilder {
    id: String,
    instrumented: bool,
    pooling: bool,
    features: Arc<dyn FeatureChecker>,
    formatter: Option<Arc<dyn ParameterFormatter>>,
    resolver: Option<Arc<dyn ConnectionResolver>>,
    connection_customizer: Option<Arc<dyn ConnectionCustomizer>>,
    transaction_customizer: Option<Arc<dyn TransactionCustomizer>>,
}

impl DataSourceConfigBuilder {
    /// Set whether instrumentation may be enabled at all
    pub fn instrumented(mut self, instrumented: bool) -> Self {
        self.instrumented = instrumented;
        self
    }

    /// Set whether a connection pool wraps the instrumented driver
    pub fn pooling_connections(mut self, pooling: bool) -> Self {
        self.pooling = pooling;
        self
    }

    /// Set the feature checker
    pub fn feature_checker(mut self, features: Arc<dyn FeatureChecker>) -> Self {
        self.features = features;
        self
    }

    /// Set the parameter formatter
    pub fn parameter_formatter(mut self, formatter: Arc<dyn ParameterFormatter>) -> Self {
        self.formatter = Some(formatter);
        self
    }

    /// Set the connection resolver
    pub fn connection_resolver(mut self, resolver: Arc<dyn ConnectionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Set the connection customizer
    pub fn connection_customizer(mut self, customizer: Arc<dyn ConnectionCustomizer>) -> Self {
        self.connection_customizer = Some(customizer);
        self
    }

    /// Set the transaction customizer
    pub fn transaction_customizer(mut self, customizer: Arc<dyn TransactionCustomizer>) -> Self {
        self.transaction_customizer = Some(customizer);
        self
    }

    /// Build the immutable configuration
    ///
    /// Returns an `Arc` because configuration identity is the allocation:
    /// registering "the same configuration" twice means the same `Arc`.
    pub fn build(self) -> Arc<DataSourceConfig> {
        Arc::new(DataSourceConfig {
            id: self.id,
            instrumented: self.instrumented,
            pooling: self.pooling,
            features: self.features,
            formatter: self.formatter,
            resolver: self.resolver,
            connection_customizer: self.connection_customizer,
            transaction_customizer: self.transaction_customizer,
        })
    }
}

/// The permanent per-id configuration identity handed out by the registry
///
/// Either resolved from the start (created during registration) or a
/// placeholder created on first reference, later filled in place exactly once.
/// Components may cache a handle before the data source is defined; every read
/// goes through [`get`](Self::get), which fails clearly while unresolved.
pub struct ConfigHandle {
    id: String,
    slot: OnceCell<Arc<DataSourceConfig>>,
}

impl ConfigHandle {
    pub(crate) fn placeholder(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            slot: OnceCell::new(),
        }
    }

    pub(crate) fn resolved(config: Arc<DataSourceConfig>) -> Self {
        let id = config.id().to_owned();
        let slot = OnceCell::new();
        let _ = slot.set(config);
        Self { id, slot }
    }

    /// The data source id; available whether or not the handle is defined
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Whether the real configuration has been supplied
    pub fn is_defined(&self) -> bool {
        self.slot.get().is_some()
    }

    /// Fill the placeholder with its real configuration.
    ///
    /// Filling twice with the identical `Arc` is a warned no-op; any other
    /// second fill fails with [`Error::AlreadyDefined`].
    pub(crate) fn define(&self, config: Arc<DataSourceConfig>) -> Result<()> {
        debug_assert_eq!(self.id, config.id());
        if let Err(rejected) = self.slot.set(config) {
            // lost to an earlier (or concurrent) fill
            let existing = self.slot.get().expect("slot observed as filled");
            if Arc::ptr_eq(existing, &rejected) {
                warn!(
                    data_source = %self.id,
                    "attempted to define the exact same configuration reference twice"
                );
                return Ok(());
            }
            return Err(Error::AlreadyDefined {
                id: self.id.clone(),
            });
        }
        trace!(data_source = %self.id, "filled placeholder configuration");
        Ok(())
    }

    /// The resolved configuration
    ///
    /// Fails with [`Error::UndefinedDataSource`] while the handle is an
    /// unfilled placeholder.
    pub fn get(&self) -> Result<&Arc<DataSourceConfig>> {
        self.slot.get().ok_or_else(|| Error::UndefinedDataSource {
            id: self.id.clone(),
        })
    }

    /// The resolved configuration, or `None` while undefined
    pub fn try_get(&self) -> Option<&Arc<DataSourceConfig>> {
        self.slot.get()
    }
}

impl std::fmt::Debug for ConfigHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigHandle")
            .field("id", &self.id)
            .field("defined", &self.is_defined())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_defaults() {
        let config = DataSourceConfig::builder("primary").build();
        assert_eq!(config.id(), "primary");
        assert!(config.is_instrumented());
        assert!(!config.is_pooling_connections());
        assert!(config.parameter_formatter().is_none());
        assert!(config.connection_resolver().is_none());
    }

    #[test]
    fn test_placeholder_fill_once() {
        let handle = ConfigHandle::placeholder("db1");
        assert!(!handle.is_defined());
        assert!(matches!(
            handle.get(),
            Err(Error::UndefinedDataSource { .. })
        ));

        let config = DataSourceConfig::builder("db1").build();
        handle.define(config.clone()).unwrap();
        assert!(handle.is_defined());
        assert!(Arc::ptr_eq(handle.get().unwrap(), &config));
    }

    #[test]
    fn test_placeholder_same_reference_is_noop() {
        let handle = ConfigHandle::placeholder("db1");
        let config = DataSourceConfig::builder("db1").build();
        handle.define(config.clone()).unwrap();
        // same Arc again: fine
        handle.define(config).unwrap();
    }

    #[test]
    fn test_placeholder_conflicting_fill_fails() {
        let handle = ConfigHandle::placeholder("db1");
        handle
            .define(DataSourceConfig::builder("db1").build())
            .unwrap();
        let err = handle
            .define(DataSourceConfig::builder("db1").build())
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyDefined { .. }));
    }

    #[test]
    fn test_resolved_handle() {
        let config = DataSourceConfig::builder("db2").build();
        let handle = ConfigHandle::resolved(config.clone());
        assert_eq!(handle.id(), "db2");
        assert!(handle.is_defined());
        assert!(Arc::ptr_eq(handle.get().unwrap(), &config));
    }
}
