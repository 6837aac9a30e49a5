//! Tests for the instrumented statement family: parameter capture and
//! substitution, batch aggregation, timing, and failure dispatch

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use sqltap::prelude::*;

fn capture_all_manager(registry: &DataSourceRegistry, id: &str) -> Arc<DataSourceManager> {
    registry
        .register(
            DataSourceConfig::builder(id)
                .feature_checker(Arc::new(StaticFeatureChecker::new(true, true, true, false)))
                .build(),
        )
        .unwrap()
}

// ==================== Parameter Capture ====================

#[tokio::test]
async fn test_out_of_order_binding_substitutes_all_positions() {
    let registry = DataSourceRegistry::new();
    let manager = capture_all_manager(&registry, "oo");

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn
        .prepare("INSERT INTO t VALUES (?, ?, ?)")
        .await
        .unwrap();

    // bind positions 3, 1, 2, deliberately out of order
    stmt.bind(3, Value::String("three".into())).unwrap();
    stmt.bind(1, Value::Int32(1)).unwrap();
    stmt.bind(2, Value::Bool(true)).unwrap();
    stmt.execute().await.unwrap();

    assert_eq!(
        events.snapshot()[0],
        "executing seq=1 sql=INSERT INTO t VALUES (1, true, three)"
    );

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_unbound_position_renders_null() {
    let registry = DataSourceRegistry::new();
    let manager = capture_all_manager(&registry, "gap");

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.prepare("SELECT ?, ?").await.unwrap();
    stmt.bind(2, Value::Int32(2)).unwrap();
    stmt.execute().await.unwrap();

    // position 1 was never bound: gap renders NULL-or-placeholder, position 2
    // substitutes normally
    assert_eq!(events.snapshot()[0], "executing seq=1 sql=SELECT NULL, 2");

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_null_parameter_renders_null() {
    let registry = DataSourceRegistry::new();
    let manager = capture_all_manager(&registry, "nulls");

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.prepare("UPDATE t SET a=?").await.unwrap();
    stmt.bind(1, Value::Null).unwrap();
    stmt.execute().await.unwrap();

    assert_eq!(events.snapshot()[0], "executing seq=1 sql=UPDATE t SET a=NULL");

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_vendor_formatter_shapes_literals() {
    let registry = DataSourceRegistry::new();
    let manager = registry
        .register(
            DataSourceConfig::builder("mysqlish")
                .feature_checker(Arc::new(StaticFeatureChecker::new(true, true, true, false)))
                .parameter_formatter(Arc::new(MySqlFormatter))
                .build(),
        )
        .unwrap();

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.prepare("SELECT * FROM u WHERE name=?").await.unwrap();
    stmt.bind(1, Value::String("O'Brien".into())).unwrap();
    stmt.execute().await.unwrap();

    assert_eq!(
        events.snapshot()[0],
        "executing seq=1 sql=SELECT * FROM u WHERE name='O''Brien'"
    );

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_capture_disabled_forwards_binds_without_bookkeeping() {
    let registry = DataSourceRegistry::new();
    // statements captured, parameters not
    let manager = registry
        .register(DataSourceConfig::builder("fwd").build())
        .unwrap();

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let log = Arc::new(CallLog::default());
    let mut conn =
        InstrumentedConnection::open(manager, Box::new(MockConnection::with_log(log.clone())));
    let mut stmt = conn.prepare("SELECT * FROM t WHERE id=?").await.unwrap();
    stmt.bind(1, Value::Int32(42)).unwrap();
    stmt.execute().await.unwrap();

    // the native statement still received the bind
    assert!(log.contains("bind:1"));
    // the reported SQL keeps its placeholder
    assert_eq!(
        events.snapshot()[0],
        "executing seq=1 sql=SELECT * FROM t WHERE id=?"
    );

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_clear_parameters_discards_captured_values() {
    let registry = DataSourceRegistry::new();
    let manager = capture_all_manager(&registry, "cleared");

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.prepare("SELECT ?").await.unwrap();
    stmt.bind(1, Value::Int32(1)).unwrap();
    stmt.clear_parameters().unwrap();
    stmt.execute().await.unwrap();

    // nothing captured anymore: raw SQL is reported
    assert_eq!(events.snapshot()[0], "executing seq=1 sql=SELECT ?");

    conn.close().await.unwrap();
}

// ==================== Failure Semantics ====================

#[tokio::test]
async fn test_failure_dispatches_executed_event_and_rethrows() {
    let registry = DataSourceRegistry::new();
    let manager = registry
        .register(DataSourceConfig::builder("failing").build())
        .unwrap();

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.create_statement().await.unwrap();

    let err = stmt.execute("UPDATE t SET x=1 -- FAIL").await.unwrap_err();
    assert!(matches!(err, Error::Driver { .. }));

    // completion dispatch ran before the error was rethrown
    assert_eq!(events.count_matching("executed seq=1 error=true"), 1);
    // the failed statement is no longer the connection's current statement
    assert!(conn.handle().executing_statement().is_none());
    // and the statement is usable for inspection: no longer running
    assert!(!stmt.handle().unwrap().is_running());

    conn.close().await.unwrap();
}

// ==================== Batch Execution ====================

#[tokio::test]
async fn test_batch_reports_single_aggregate_event() {
    let registry = DataSourceRegistry::new();
    let manager = registry
        .register(DataSourceConfig::builder("batch").build())
        .unwrap();

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.create_statement().await.unwrap();
    stmt.add_batch("INSERT INTO t VALUES (1)").unwrap();
    stmt.add_batch("INSERT INTO t VALUES (2)").unwrap();
    let counts = stmt.execute_batch().await.unwrap();
    assert_eq!(counts, vec![1, 1]);

    // one executing/executed pair for the whole batch, entries joined with a
    // statement separator
    assert_eq!(
        events.snapshot(),
        vec![
            "executing seq=1 sql=INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2)".to_owned(),
            "executed seq=1 error=false".to_owned(),
        ]
    );

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_prepared_batch_captures_per_entry_parameters() {
    let registry = DataSourceRegistry::new();
    let manager = capture_all_manager(&registry, "pbatch");

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.prepare("INSERT INTO t VALUES (?)").await.unwrap();

    stmt.bind(1, Value::Int32(1)).unwrap();
    stmt.add_batch().unwrap();
    stmt.bind(1, Value::Int32(2)).unwrap();
    stmt.add_batch().unwrap();
    stmt.execute_batch().await.unwrap();

    assert_eq!(
        events.snapshot()[0],
        "executing seq=1 sql=INSERT INTO t VALUES (1);\nINSERT INTO t VALUES (2)"
    );

    conn.close().await.unwrap();
}

// ==================== Timing ====================

#[tokio::test]
async fn test_elapsed_time_measured_through_injected_clock() {
    let clock = Arc::new(ManualClock::starting_at(5_000_000_000));
    let registry = DataSourceRegistry::with_clock(clock.clone());
    let manager = registry
        .register(DataSourceConfig::builder("timed").build())
        .unwrap();

    let events = Arc::new(EventLog::default());
    let listener = RecordingStatementListener::new(events.clone());
    manager.add_statement_listener(listener.clone());

    let delay = ExecutionDelay {
        clock: clock.clone(),
        advance_by: Duration::from_millis(25),
    };
    let mut conn = InstrumentedConnection::open(
        manager,
        Box::new(MockConnection::new().with_execution_delay(delay)),
    );

    let mut stmt = conn.create_statement().await.unwrap();
    stmt.execute("UPDATE t SET x=1").await.unwrap();

    let elapsed = listener.elapsed.lock().clone();
    assert_eq!(elapsed, vec![Duration::from_millis(25).as_nanos() as i64]);
    assert_eq!(
        stmt.handle().unwrap().duration(),
        Duration::from_millis(25)
    );

    conn.close().await.unwrap();
}

// ==================== Statement-Scoped Listeners ====================

#[tokio::test]
async fn test_statement_scoped_listener_and_close_clears_it() {
    let registry = DataSourceRegistry::new();
    let manager = registry
        .register(DataSourceConfig::builder("scoped").build())
        .unwrap();

    let events = Arc::new(EventLog::default());
    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.create_statement().await.unwrap();

    let handle = stmt.handle().unwrap();
    handle.add_execution_listener(RecordingStatementListener::new(events.clone()));

    stmt.execute("UPDATE t SET x=1").await.unwrap();
    assert_eq!(events.count_matching("executing seq=1"), 1);
    assert_eq!(events.count_matching("executed seq=1"), 1);

    stmt.close().await.unwrap();

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_current_statement_pointer_during_execution() {
    let registry = DataSourceRegistry::new();
    let manager = registry
        .register(DataSourceConfig::builder("pointer").build())
        .unwrap();

    // observe the connection's current statement from inside dispatch
    struct PointerProbe {
        log: Arc<EventLog>,
    }
    impl StatementExecutionListener for PointerProbe {
        fn before_executing_statement(&self, event: &StatementExecutingEvent) {
            let current = event.connection().executing_statement();
            let seen = current.map(|s| s.seq_no());
            self.log.push(format!("current={seen:?}"));
        }
    }

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(Arc::new(PointerProbe {
        log: events.clone(),
    }));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.create_statement().await.unwrap();
    stmt.execute("UPDATE t SET x=1").await.unwrap();

    assert_eq!(events.snapshot(), vec!["current=Some(1)".to_owned()]);
    // cleared once execution completed
    assert!(conn.handle().executing_statement().is_none());

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_prepare_call_is_flagged_as_call() {
    let registry = DataSourceRegistry::new();
    let manager = capture_all_manager(&registry, "calls");

    let events = Arc::new(EventLog::default());
    manager.add_statement_listener(RecordingStatementListener::new(events.clone()));

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let mut stmt = conn.prepare_call("{call audit(?)}").await.unwrap();
    assert_eq!(stmt.handle().unwrap().kind(), StatementKind::Call);

    stmt.bind(1, Value::String("login".into())).unwrap();
    stmt.execute().await.unwrap();
    assert_eq!(events.snapshot()[0], "executing seq=1 sql={call audit(login)}");

    conn.close().await.unwrap();
}

#[tokio::test]
async fn test_statement_user_data() {
    let registry = DataSourceRegistry::new();
    let manager = registry
        .register(DataSourceConfig::builder("ud").build())
        .unwrap();

    let mut conn = InstrumentedConnection::open(manager, Box::new(MockConnection::new()));
    let stmt = conn.create_statement().await.unwrap();
    let handle = stmt.handle().unwrap();

    handle.user_data().set("origin", "checkout-service".to_owned());
    assert_eq!(
        handle
            .user_data()
            .get::<String>("origin")
            .as_deref()
            .map(String::as_str),
        Some("checkout-service")
    );

    conn.close().await.unwrap();
}
