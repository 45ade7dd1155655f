use bulwark::ResilientConnection;
use bulwark_core_interface::mock::{MockBehavior, MockConnection, MockDatabase, MockOp};
use bulwark_core_interface::{
    CancelSignal, CommandBehavior, DataReader, DbError, NativeCommand, NativeConnection, Value,
};
use bulwark_core_resilience::{Backoff, Policy, RetryPolicy, TimeoutPolicy};
use std::time::Duration;
use tokio::time::Instant;

fn deadlock() -> DbError {
    DbError::Server {
        code: 1205,
        message: "Transaction was deadlocked".to_string(),
    }
}

fn deadlock_retry(max_retries: u32, delay: Duration) -> Policy<DbError> {
    RetryPolicy::on_fault(|e: &DbError| e.code() == Some(1205))
        .max_retries(max_retries)
        .backoff(Backoff::constant(delay))
        .into()
}

fn open_connection(
    db: &MockDatabase,
    blocking: Vec<Policy<DbError>>,
    non_blocking: Vec<Policy<DbError>>,
) -> ResilientConnection<MockConnection> {
    let mut conn = ResilientConnection::with_policies(
        db.connect("Data Source=db01;Database=hr"),
        blocking,
        non_blocking,
    )
    .unwrap();
    conn.open(&CancelSignal::new()).unwrap();
    conn
}

#[test]
fn test_blocking_scalar_recovers_from_deadlocks() {
    let db = MockDatabase::new();
    db.set_scalar(Value::Int(42));
    db.fail_next(MockOp::ExecuteScalar, deadlock(), 2);
    let conn = open_connection(
        &db,
        vec![deadlock_retry(3, Duration::ZERO)],
        vec![deadlock_retry(3, Duration::ZERO)],
    );

    let mut command = conn.create_command();
    command.set_command_text("SELECT COUNT(*) FROM employees".into());
    let value = command.execute_scalar(&CancelSignal::new()).unwrap();

    assert_eq!(value, Value::Int(42));
    assert_eq!(db.calls(MockOp::ExecuteScalar), 3);
}

#[test]
fn test_exhausted_retries_surface_last_fault_unchanged() {
    let db = MockDatabase::new();
    db.fail_next(MockOp::ExecuteNonQuery, deadlock(), 10);
    let conn = open_connection(
        &db,
        vec![deadlock_retry(2, Duration::ZERO)],
        vec![deadlock_retry(2, Duration::ZERO)],
    );

    let mut command = conn.create_command();
    let err = command.execute_non_query(&CancelSignal::new()).unwrap_err();

    assert_eq!(err, deadlock());
    assert_eq!(db.calls(MockOp::ExecuteNonQuery), 3);
}

#[test]
fn test_unmatched_fault_propagates_immediately() {
    let db = MockDatabase::new();
    let syntax = DbError::Server {
        code: 102,
        message: "Incorrect syntax".to_string(),
    };
    db.fail_next(MockOp::ExecuteNonQuery, syntax.clone(), 1);
    let conn = open_connection(
        &db,
        vec![deadlock_retry(5, Duration::ZERO)],
        vec![deadlock_retry(5, Duration::ZERO)],
    );

    let mut command = conn.create_command();
    let err = command.execute_non_query(&CancelSignal::new()).unwrap_err();

    assert_eq!(err, syntax);
    assert_eq!(db.calls(MockOp::ExecuteNonQuery), 1);
}

#[test]
fn test_blocking_optimistic_timeout_surfaces_policy_timeout() {
    let db = MockDatabase::new();
    db.script(MockOp::ExecuteScalar, [MockBehavior::AwaitCancel]);
    let conn = open_connection(
        &db,
        vec![TimeoutPolicy::optimistic(Duration::from_millis(50)).into()],
        vec![TimeoutPolicy::optimistic(Duration::from_millis(50)).into()],
    );

    let mut command = conn.create_command();
    let err = command.execute_scalar(&CancelSignal::new()).unwrap_err();

    assert_eq!(
        err,
        DbError::PolicyTimeout {
            timeout: Duration::from_millis(50)
        }
    );
}

#[test]
fn test_blocking_reader_through_chain() {
    let db = MockDatabase::new();
    db.set_result_set(
        &["id", "name"],
        vec![vec![Value::Int(1), Value::from("Ada")]],
    );
    db.fail_next(MockOp::ExecuteReader, deadlock(), 1);
    let conn = open_connection(
        &db,
        vec![deadlock_retry(1, Duration::ZERO)],
        vec![deadlock_retry(1, Duration::ZERO)],
    );

    let mut command = conn.create_command();
    let mut reader = command
        .execute_reader(CommandBehavior::SingleRow, &CancelSignal::new())
        .unwrap();

    assert!(reader.read().unwrap());
    assert_eq!(reader.get_by_name("name").unwrap(), Value::from("Ada"));
    assert!(!reader.read().unwrap());
    assert_eq!(db.calls(MockOp::ExecuteReader), 2);
}

#[tokio::test(start_paused = true)]
async fn test_async_scalar_retries_with_backoff() {
    let db = MockDatabase::new();
    db.set_scalar(Value::from("V"));
    db.fail_next(MockOp::ExecuteScalar, deadlock(), 2);
    let conn = open_connection(
        &db,
        vec![deadlock_retry(3, Duration::from_millis(1000))],
        vec![deadlock_retry(3, Duration::from_millis(1000))],
    );

    let mut command = conn.create_command();
    let start = Instant::now();
    let value = command
        .execute_scalar_async(CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(value, Value::from("V"));
    assert_eq!(db.calls(MockOp::ExecuteScalar), 3);
    assert!(start.elapsed() >= Duration::from_millis(2000));
}

#[tokio::test(start_paused = true)]
async fn test_async_pessimistic_timeout_abandons_hung_query() {
    let db = MockDatabase::new();
    db.script(
        MockOp::ExecuteNonQuery,
        [MockBehavior::Delay(Duration::from_secs(3600))],
    );
    let conn = open_connection(
        &db,
        vec![deadlock_retry(0, Duration::ZERO)],
        vec![TimeoutPolicy::pessimistic(Duration::from_secs(5)).into()],
    );

    let mut command = conn.create_command();
    let start = Instant::now();
    let err = command
        .execute_non_query_async(CancelSignal::new())
        .await
        .unwrap_err();

    assert_eq!(
        err,
        DbError::PolicyTimeout {
            timeout: Duration::from_secs(5)
        }
    );
    assert!(start.elapsed() >= Duration::from_secs(5));
    assert!(start.elapsed() < Duration::from_secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_async_retry_around_timeout_reruns_query() {
    let db = MockDatabase::new();
    db.set_rows_affected(1);
    db.script(
        MockOp::ExecuteNonQuery,
        [MockBehavior::Delay(Duration::from_secs(60))],
    );
    let retry_timeouts: Policy<DbError> = RetryPolicy::on_fault(|e: &DbError| e.code() == Some(1205))
        .or_timeout()
        .max_retries(1)
        .backoff(Backoff::none())
        .into();
    let conn = open_connection(
        &db,
        vec![deadlock_retry(0, Duration::ZERO)],
        vec![
            retry_timeouts,
            TimeoutPolicy::pessimistic(Duration::from_secs(2)).into(),
        ],
    );

    let mut command = conn.create_command();
    command.set_command_text("UPDATE employees SET active = 1".into());
    let rows = command
        .execute_non_query_async(CancelSignal::new())
        .await
        .unwrap();

    assert_eq!(rows, 1);
    assert_eq!(db.calls(MockOp::ExecuteNonQuery), 2);
    assert_eq!(
        db.executed_commands(),
        vec!["UPDATE employees SET active = 1"; 2]
    );
}

#[tokio::test(start_paused = true)]
async fn test_async_optimistic_timeout_cancels_cooperative_query() {
    let db = MockDatabase::new();
    db.script(MockOp::ExecuteReader, [MockBehavior::AwaitCancel]);
    let conn = open_connection(
        &db,
        vec![deadlock_retry(0, Duration::ZERO)],
        vec![TimeoutPolicy::optimistic(Duration::from_secs(1)).into()],
    );

    let mut command = conn.create_command();
    let err = command
        .execute_reader_async(CommandBehavior::Default, CancelSignal::new())
        .await
        .unwrap_err();

    assert!(err.is_timeout());
}

#[tokio::test]
async fn test_async_prepare_and_cancel() {
    let db = MockDatabase::new();
    db.fail_next(MockOp::Prepare, deadlock(), 1);
    let conn = open_connection(
        &db,
        vec![deadlock_retry(1, Duration::ZERO)],
        vec![deadlock_retry(1, Duration::ZERO)],
    );

    let mut command = conn.create_command();
    command.prepare_async(CancelSignal::new()).await.unwrap();
    command.cancel();

    assert_eq!(db.calls(MockOp::Prepare), 2);
    assert_eq!(db.calls(MockOp::Cancel), 1);
    command.dispose();
}
