//! Data source registry
//!
//! The registry is the process-wide mapping from data source id to its
//! configuration identity and manager. It is the only part of sqltap mutated
//! concurrently by arbitrary application threads, so both maps use atomic
//! insert-if-absent: concurrent first references to an id converge on one
//! [`ConfigHandle`], and concurrent manager construction converges on one
//! [`DataSourceManager`].
//!
//! Construct a registry explicitly and pass it around (or hold it in a
//! process-wide static owned by the embedding application); keeping it an
//! ordinary value keeps bootstrap order visible and tests isolated.

use dashmap::DashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::{ConfigHandle, DataSourceConfig};
use crate::error::{Error, Result};
use crate::manager::DataSourceManager;

/// Process-wide registry of data source configurations and managers
pub struct DataSourceRegistry {
    configurations: DashMap<String, Arc<ConfigHandle>>,
    managers: DashMap<String, Arc<DataSourceManager>>,
    clock: Arc<dyn Clock>,
}

impl Default for DataSourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl DataSourceRegistry {
    /// Create a registry backed by the system clock
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create a registry with an injected time source; every manager and
    /// connection created through this registry reads timestamps from it
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            configurations: DashMap::new(),
            managers: DashMap::new(),
            clock,
        }
    }

    /// The time source this registry threads into its managers
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Retrieve the configuration identity for a data source id, installing a
    /// placeholder if the id has never been seen.
    ///
    /// Never returns an absent value: concurrent first references race through
    /// insert-if-absent and every caller receives the single winning handle.
    pub fn configuration(&self, id: &str) -> Arc<ConfigHandle> {
        if let Some(existing) = self.configurations.get(id) {
            return existing.clone();
        }
        self.configurations
            .entry(id.to_owned())
            .or_insert_with(|| {
                debug!(data_source = %id, "installed placeholder configuration");
                Arc::new(ConfigHandle::placeholder(id))
            })
            .clone()
    }

    /// Register the real configuration for a data source and return its
    /// manager.
    ///
    /// If the id was forward-referenced, the placeholder handle is filled in
    /// place and stays the permanent identity other components may already
    /// hold. Registering the identical `Arc` again is an idempotent, logged
    /// no-op; registering a different configuration for an already-defined id
    /// fails with [`Error::AlreadyRegistered`].
    pub fn register(&self, config: Arc<DataSourceConfig>) -> Result<Arc<DataSourceManager>> {
        let id = config.id().to_owned();

        if let Some(manager) = self.managers.get(&id).map(|m| m.clone()) {
            let same = self
                .configurations
                .get(&id)
                .and_then(|h| h.try_get().cloned())
                .map(|existing| Arc::ptr_eq(&existing, &config))
                .unwrap_or(false);
            if same {
                warn!(
                    data_source = %id,
                    "attempted to register the exact same configuration reference again"
                );
                return Ok(manager);
            }
            return Err(Error::AlreadyRegistered { id });
        }

        let handle = match self.configurations.entry(id.clone()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let handle = Arc::new(ConfigHandle::resolved(config.clone()));
                entry.insert(handle);
                info!(data_source = %id, "registered data source configuration");
                return Ok(self.install_manager(&config));
            }
        };

        if let Some(existing) = handle.try_get() {
            if Arc::ptr_eq(existing, &config) {
                warn!(
                    data_source = %id,
                    "attempted to register the exact same configuration reference again"
                );
            } else {
                return Err(Error::AlreadyRegistered { id });
            }
        } else {
            handle.define(config.clone())?;
            info!(data_source = %id, "filled placeholder registration with real configuration");
        }

        Ok(self.install_manager(&config))
    }

    /// Retrieve the manager for a data source id, constructing it lazily from
    /// the registered configuration.
    ///
    /// Fails with [`Error::UnknownDataSource`] when the id was never
    /// referenced or registered, and with [`Error::UndefinedDataSource`] when
    /// only an unfilled placeholder exists.
    pub fn manager(&self, id: &str) -> Result<Arc<DataSourceManager>> {
        if let Some(manager) = self.managers.get(id) {
            return Ok(manager.clone());
        }
        let handle = self
            .configurations
            .get(id)
            .map(|h| h.clone())
            .ok_or_else(|| Error::UnknownDataSource { id: id.to_owned() })?;
        let config = handle.get()?.clone();
        Ok(self.install_manager(&config))
    }

    /// Construct-or-reuse the manager for a defined configuration. The entry
    /// lock guarantees exactly one construction even under a race; every
    /// caller receives the same instance.
    fn install_manager(&self, config: &Arc<DataSourceConfig>) -> Arc<DataSourceManager> {
        self.managers
            .entry(config.id().to_owned())
            .or_insert_with(|| Arc::new(DataSourceManager::new(config, self.clock.clone())))
            .clone()
    }
}

impl std::fmt::Debug for DataSourceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataSourceRegistry")
            .field("configurations", &self.configurations.len())
            .field("managers", &self.managers.len())
            .finish()
    }
}
