//! Feature checkers
//!
//! A [`FeatureChecker`] decides, at a given moment, whether instrumentation
//! capabilities should be on. It is consulted once per connection open (or
//! pool acquisition) and the answers are latched for the duration of that
//! lease, so a checker backed by a live flag system only pays its cost once
//! per lease and a mid-lease flip never produces a half-instrumented lease.

use std::sync::atomic::{AtomicBool, Ordering};

/// Per-moment instrumentation decisions for one data source
pub trait FeatureChecker: Send + Sync {
    /// Whether connections opened right now should be instrumented at all.
    /// When this returns `false` the connection runs in pass-through mode for
    /// the whole lease.
    fn should_instrument_connection(&self) -> bool;

    /// Whether SQL statements should be captured on connections opened right
    /// now. Only consulted when the connection is instrumented.
    fn should_capture_statements(&self) -> bool;

    /// Whether bound parameter values should be captured and substituted into
    /// reported SQL. Capturing parameters builds a fully formatted SQL string
    /// per execution, which costs memory proportional to the printable values.
    fn should_capture_query_parameters(&self) -> bool {
        false
    }
}

/// Feature checker with fixed flags
///
/// The default checker for data sources that do not integrate a dynamic flag
/// system. Flags are constant unless the checker was built mutable, which is
/// useful for unusual startup sequences and tests.
#[derive(Debug)]
pub struct StaticFeatureChecker {
    instrument: AtomicBool,
    capture_statements: AtomicBool,
    capture_parameters: AtomicBool,
    mutable: bool,
}

impl StaticFeatureChecker {
    /// Create a checker with explicit flags; `mutable` allows later set calls
    pub fn new(
        instrument: bool,
        capture_statements: bool,
        capture_parameters: bool,
        mutable: bool,
    ) -> Self {
        Self {
            instrument: AtomicBool::new(instrument),
            capture_statements: AtomicBool::new(capture_statements),
            capture_parameters: AtomicBool::new(capture_parameters),
            mutable,
        }
    }

    /// Checker with instrumentation and statement capture on, parameter
    /// capture off
    pub fn enabled() -> Self {
        Self::new(true, true, false, false)
    }

    /// Checker with everything off (pass-through data source)
    pub fn disabled() -> Self {
        Self::new(false, false, false, false)
    }

    /// Whether the flags may be changed after construction
    pub fn is_mutable(&self) -> bool {
        self.mutable
    }

    /// Set whether connections should be instrumented
    ///
    /// # Panics
    /// Panics if this checker is not mutable.
    pub fn set_instrumentation_enabled(&self, enabled: bool) {
        assert!(self.mutable, "cannot modify an immutable feature checker");
        self.instrument.store(enabled, Ordering::Release);
    }

    /// Set whether statements should be captured
    ///
    /// # Panics
    /// Panics if this checker is not mutable.
    pub fn set_capture_statements_enabled(&self, enabled: bool) {
        assert!(self.mutable, "cannot modify an immutable feature checker");
        self.capture_statements.store(enabled, Ordering::Release);
    }

    /// Set whether query parameters should be captured
    ///
    /// # Panics
    /// Panics if this checker is not mutable.
    pub fn set_capture_parameters_enabled(&self, enabled: bool) {
        assert!(self.mutable, "cannot modify an immutable feature checker");
        self.capture_parameters.store(enabled, Ordering::Release);
    }
}

impl FeatureChecker for StaticFeatureChecker {
    fn should_instrument_connection(&self) -> bool {
        self.instrument.load(Ordering::Acquire)
    }

    fn should_capture_statements(&self) -> bool {
        self.capture_statements.load(Ordering::Acquire)
    }

    fn should_capture_query_parameters(&self) -> bool {
        self.capture_parameters.load(Ordering::Acquire)
    }
}
