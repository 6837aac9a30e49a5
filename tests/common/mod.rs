//! Shared test support: an in-memory driver and recording listeners
#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

use sqltap::prelude::*;

/// Ordered log of native driver calls
#[derive(Default)]
pub struct CallLog {
    entries: Mutex<Vec<String>>,
}

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.entries.lock().iter().any(|e| e.contains(needle))
    }
}

/// Ordered log of observed instrumentation events
#[derive(Default)]
pub struct EventLog {
    entries: Mutex<Vec<String>>,
}

impl EventLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.entries.lock().push(entry.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.entries.lock().clone()
    }

    pub fn count_matching(&self, needle: &str) -> usize {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.contains(needle))
            .count()
    }
}

/// Clock advancement applied inside mock execute calls so statement timing is
/// deterministic
#[derive(Clone)]
pub struct ExecutionDelay {
    pub clock: Arc<ManualClock>,
    pub advance_by: Duration,
}

impl ExecutionDelay {
    fn tick(&self) {
        self.clock.advance(self.advance_by);
    }
}

/// In-memory driver connection; executions touching "FAIL" fail
pub struct MockConnection {
    connection_id: Option<String>,
    log: Arc<CallLog>,
    delay: Option<ExecutionDelay>,
    last_statement_addr: Arc<Mutex<Option<usize>>>,
    last_prepared_addr: Arc<Mutex<Option<usize>>>,
}

impl MockConnection {
    pub fn new() -> Self {
        Self::with_log(Arc::new(CallLog::default()))
    }

    pub fn with_log(log: Arc<CallLog>) -> Self {
        Self {
            connection_id: None,
            log,
            delay: None,
            last_statement_addr: Arc::new(Mutex::new(None)),
            last_prepared_addr: Arc::new(Mutex::new(None)),
        }
    }

    pub fn with_connection_id(mut self, id: impl Into<String>) -> Self {
        self.connection_id = Some(id.into());
        self
    }

    pub fn with_execution_delay(mut self, delay: ExecutionDelay) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Slot recording the heap address of the most recently created statement
    pub fn statement_addr_slot(&self) -> Arc<Mutex<Option<usize>>> {
        self.last_statement_addr.clone()
    }

    /// Slot recording the heap address of the most recently prepared statement
    pub fn prepared_addr_slot(&self) -> Arc<Mutex<Option<usize>>> {
        self.last_prepared_addr.clone()
    }
}

#[async_trait]
impl DriverConnection for MockConnection {
    fn connection_id(&self) -> Option<String> {
        self.connection_id.clone()
    }

    async fn create_statement(&mut self) -> Result<Box<dyn DriverStatement>> {
        self.log.push("create_statement");
        let stmt: Box<dyn DriverStatement> = Box::new(MockStatement {
            log: self.log.clone(),
            batch: Vec::new(),
            delay: self.delay.clone(),
        });
        let addr = &*stmt as *const dyn DriverStatement as *const () as usize;
        *self.last_statement_addr.lock() = Some(addr);
        Ok(stmt)
    }

    async fn prepare(&mut self, sql: &str) -> Result<Box<dyn DriverPreparedStatement>> {
        self.log.push(format!("prepare:{sql}"));
        let stmt: Box<dyn DriverPreparedStatement> = Box::new(MockPreparedStatement {
            sql: sql.to_owned(),
            log: self.log.clone(),
            bound: Vec::new(),
            batch_len: 0,
            delay: self.delay.clone(),
        });
        let addr = &*stmt as *const dyn DriverPreparedStatement as *const () as usize;
        *self.last_prepared_addr.lock() = Some(addr);
        Ok(stmt)
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push("close");
        Ok(())
    }
}

pub struct MockStatement {
    log: Arc<CallLog>,
    batch: Vec<String>,
    delay: Option<ExecutionDelay>,
}

impl MockStatement {
    fn tick(&self) {
        if let Some(delay) = &self.delay {
            delay.tick();
        }
    }

    fn check_fail(&self, sql: &str) -> Result<()> {
        if sql.contains("FAIL") {
            Err(Error::driver("injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DriverStatement for MockStatement {
    async fn execute(&mut self, sql: &str) -> Result<u64> {
        self.tick();
        self.log.push(format!("execute:{sql}"));
        self.check_fail(sql)?;
        Ok(1)
    }

    async fn query(&mut self, sql: &str) -> Result<Vec<Row>> {
        self.tick();
        self.log.push(format!("query:{sql}"));
        self.check_fail(sql)?;
        Ok(Vec::new())
    }

    fn add_batch(&mut self, sql: &str) -> Result<()> {
        self.log.push(format!("add_batch:{sql}"));
        self.batch.push(sql.to_owned());
        Ok(())
    }

    fn clear_batch(&mut self) -> Result<()> {
        self.batch.clear();
        Ok(())
    }

    async fn execute_batch(&mut self) -> Result<Vec<u64>> {
        self.tick();
        self.log.push(format!("execute_batch:{}", self.batch.len()));
        Ok(vec![1; self.batch.len()])
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push("statement_close");
        Ok(())
    }
}

pub struct MockPreparedStatement {
    sql: String,
    log: Arc<CallLog>,
    bound: Vec<(usize, Value)>,
    batch_len: usize,
    delay: Option<ExecutionDelay>,
}

impl MockPreparedStatement {
    fn tick(&self) {
        if let Some(delay) = &self.delay {
            delay.tick();
        }
    }

    fn check_fail(&self) -> Result<()> {
        if self.sql.contains("FAIL") {
            Err(Error::driver("injected failure"))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl DriverPreparedStatement for MockPreparedStatement {
    fn sql(&self) -> &str {
        &self.sql
    }

    fn bind(&mut self, index: usize, value: Value) -> Result<()> {
        self.log.push(format!("bind:{index}"));
        self.bound.push((index, value));
        Ok(())
    }

    fn clear_parameters(&mut self) -> Result<()> {
        self.log.push("clear_parameters");
        self.bound.clear();
        Ok(())
    }

    fn add_batch(&mut self) -> Result<()> {
        self.log.push("add_batch");
        self.batch_len += 1;
        Ok(())
    }

    fn clear_batch(&mut self) -> Result<()> {
        self.batch_len = 0;
        Ok(())
    }

    async fn execute(&mut self) -> Result<u64> {
        self.tick();
        self.log.push("execute_prepared");
        self.check_fail()?;
        Ok(1)
    }

    async fn query(&mut self) -> Result<Vec<Row>> {
        self.tick();
        self.log.push("query_prepared");
        self.check_fail()?;
        Ok(Vec::new())
    }

    async fn execute_batch(&mut self) -> Result<Vec<u64>> {
        self.tick();
        self.log.push(format!("execute_batch:{}", self.batch_len));
        Ok(vec![1; self.batch_len])
    }

    async fn close(&mut self) -> Result<()> {
        self.log.push("prepared_close");
        Ok(())
    }
}

/// Listener recording connection open/close events with a label
pub struct RecordingConnectionListener {
    pub label: &'static str,
    pub log: Arc<EventLog>,
}

impl RecordingConnectionListener {
    pub fn new(label: &'static str, log: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self { label, log })
    }
}

impl ConnectionOpenedListener for RecordingConnectionListener {
    fn connection_opened(&self, event: &ConnectionOpenedEvent) {
        self.log.push(format!(
            "{} opened pooled={} id={}",
            self.label,
            event.is_pooled(),
            event.connection().connection_id().unwrap_or_default()
        ));
    }
}

impl ConnectionClosedListener for RecordingConnectionListener {
    fn connection_closed(&self, event: &ConnectionClosedEvent) {
        self.log.push(format!(
            "{} closed pooled={}",
            self.label,
            event.is_pooled()
        ));
    }
}

/// Listener recording statement executing/executed events
pub struct RecordingStatementListener {
    pub log: Arc<EventLog>,
    pub elapsed: Mutex<Vec<i64>>,
}

impl RecordingStatementListener {
    pub fn new(log: Arc<EventLog>) -> Arc<Self> {
        Arc::new(Self {
            log,
            elapsed: Mutex::new(Vec::new()),
        })
    }
}

impl StatementExecutionListener for RecordingStatementListener {
    fn before_executing_statement(&self, event: &StatementExecutingEvent) {
        self.log.push(format!(
            "executing seq={} sql={}",
            event.statement().seq_no(),
            event.statement().sql().unwrap_or_default()
        ));
    }

    fn statement_executed(&self, event: &StatementExecutedEvent<'_>) {
        self.elapsed.lock().push(event.elapsed_nanos());
        self.log.push(format!(
            "executed seq={} error={}",
            event.statement().seq_no(),
            event.has_error()
        ));
    }
}

/// Listener that panics in every callback, for isolation tests
pub struct PanickingListener;

impl ConnectionOpenedListener for PanickingListener {
    fn connection_opened(&self, _event: &ConnectionOpenedEvent) {
        panic!("listener exploded");
    }
}

impl StatementExecutionListener for PanickingListener {
    fn before_executing_statement(&self, _event: &StatementExecutingEvent) {
        panic!("listener exploded");
    }

    fn statement_executed(&self, _event: &StatementExecutedEvent<'_>) {
        panic!("listener exploded");
    }
}
