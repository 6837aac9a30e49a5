//! Error types for sqltap
//!
//! Classifies failures by who has to act on them:
//! - Configuration errors (duplicate/missing registrations) are bootstrap mistakes
//! - Resolution errors mean a native connection could not be unwrapped
//! - State errors are lifecycle invariant violations
//! - Driver errors originate in the wrapped driver and pass through untouched

use std::fmt;
use thiserror::Error;

/// Result type for sqltap operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error categories for classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Registration/bootstrap errors, detected synchronously and never retried
    Configuration,
    /// A native connection could not be coerced to an instrumented one
    Resolution,
    /// A lifecycle invariant was violated
    State,
    /// An error produced by the wrapped driver, passed through unmodified
    Driver,
}

/// Main error type for sqltap
#[derive(Error, Debug)]
pub enum Error {
    /// A placeholder configuration was filled a second time with a different
    /// configuration
    #[error("data source '{id}' is already defined with a different configuration")]
    AlreadyDefined {
        /// The data source id
        id: String,
    },

    /// A real configuration conflicts with one registered earlier
    #[error("data source '{id}' is already registered with a different configuration")]
    AlreadyRegistered {
        /// The data source id
        id: String,
    },

    /// No configuration has ever been referenced or registered for this id
    #[error("no data source exists with id '{id}'")]
    UnknownDataSource {
        /// The data source id
        id: String,
    },

    /// A placeholder configuration was dereferenced before being defined
    #[error("data source '{id}' has been referenced but not yet defined")]
    UndefinedDataSource {
        /// The data source id
        id: String,
    },

    /// A native connection could not be resolved to an instrumented one
    #[error(
        "unable to coerce connection of type '{native_type}' to an instrumented \
         connection; is a ConnectionResolver registered for data source '{data_source}'?"
    )]
    Resolution {
        /// The data source id the resolution was attempted for
        data_source: String,
        /// The concrete type of the native connection
        native_type: String,
    },

    /// A transaction lifecycle invariant was violated
    #[error("transaction state error: {message}")]
    TransactionState {
        /// What went wrong
        message: String,
    },

    /// Error produced by the wrapped driver
    #[error("driver error: {message}")]
    Driver {
        /// Driver-provided message
        message: String,
        /// Underlying driver error, if any
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

impl Error {
    /// Get the error category
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::AlreadyDefined { .. }
            | Self::AlreadyRegistered { .. }
            | Self::UnknownDataSource { .. }
            | Self::UndefinedDataSource { .. } => ErrorCategory::Configuration,
            Self::Resolution { .. } => ErrorCategory::Resolution,
            Self::TransactionState { .. } => ErrorCategory::State,
            Self::Driver { .. } => ErrorCategory::Driver,
        }
    }

    /// Whether this error indicates a programmer/bootstrap mistake
    #[inline]
    pub fn is_configuration(&self) -> bool {
        self.category() == ErrorCategory::Configuration
    }

    /// Create a driver error
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver {
            message: message.into(),
            source: None,
        }
    }

    /// Create a driver error wrapping the underlying driver error
    pub fn driver_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Driver {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a transaction state error
    pub fn transaction_state(message: impl Into<String>) -> Self {
        Self::TransactionState {
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Configuration => write!(f, "configuration"),
            Self::Resolution => write!(f, "resolution"),
            Self::State => write!(f, "state"),
            Self::Driver => write!(f, "driver"),
        }
    }
}
