//! Code written against the native traits accepts the resilient decorators
//! unchanged.

use bulwark::ResilientConnection;
use bulwark_core_interface::mock::{MockDatabase, MockOp};
use bulwark_core_interface::{
    CancelSignal, DataReader, DbError, IsolationLevel, NativeCommand, NativeConnection,
    NativeTransaction, Result, Value,
};
use bulwark_core_resilience::{Backoff, Policy, RetryPolicy};
use std::time::Duration;

fn deadlock_retry() -> Policy<DbError> {
    RetryPolicy::on_fault(|e: &DbError| e.code() == Some(1205))
        .max_retries(3)
        .backoff(Backoff::none())
        .into()
}

fn deadlock() -> DbError {
    DbError::Server {
        code: 1205,
        message: "Transaction was deadlocked".to_string(),
    }
}

/// Repository code that only knows the native traits
fn deactivate_employee<C: NativeConnection>(conn: &mut C, id: i64) -> Result<u64> {
    conn.open(&CancelSignal::new())?;
    let tx = conn.begin_transaction(IsolationLevel::ReadCommitted)?;

    let mut command = conn.create_command();
    command.set_command_text("UPDATE employees SET active = 0 WHERE id = @id".into());
    command.set_command_timeout(Duration::from_secs(10));
    command.set_transaction(Some(tx.id()));
    command.parameters_mut().add_with_value("@id", id);
    let rows = command.execute_non_query(&CancelSignal::new())?;

    tx.commit()?;
    Ok(rows)
}

async fn employee_names<C: NativeConnection>(conn: &mut C) -> Result<Vec<String>> {
    conn.open_async(CancelSignal::new()).await?;
    let mut command = conn.create_command();
    command.set_command_text("SELECT name FROM employees".into());

    let mut reader = command
        .execute_reader_async(Default::default(), CancelSignal::new())
        .await?;
    let mut names = Vec::new();
    while reader.read_async().await? {
        if let Value::Text(name) = reader.get(0)? {
            names.push(name);
        }
    }
    Ok(names)
}

#[test]
fn test_native_and_resilient_connections_are_interchangeable() {
    let db = MockDatabase::new();
    db.set_rows_affected(1);

    let mut native = db.connect("Database=hr");
    assert_eq!(deactivate_employee(&mut native, 7).unwrap(), 1);

    let mut resilient = ResilientConnection::with_policies(
        db.connect("Database=hr"),
        vec![deadlock_retry()],
        vec![deadlock_retry()],
    )
    .unwrap();
    assert_eq!(deactivate_employee(&mut resilient, 7).unwrap(), 1);

    assert_eq!(db.calls(MockOp::Commit), 2);
}

#[test]
fn test_only_resilient_connection_survives_deadlock() {
    let db = MockDatabase::new();
    db.set_rows_affected(1);

    db.fail_next(MockOp::ExecuteNonQuery, deadlock(), 1);
    let mut native = db.connect("Database=hr");
    assert_eq!(deactivate_employee(&mut native, 7).unwrap_err(), deadlock());

    db.fail_next(MockOp::ExecuteNonQuery, deadlock(), 1);
    let mut resilient = ResilientConnection::with_policies(
        db.connect("Database=hr"),
        vec![deadlock_retry()],
        vec![deadlock_retry()],
    )
    .unwrap();
    assert_eq!(deactivate_employee(&mut resilient, 7).unwrap(), 1);
}

#[tokio::test]
async fn test_async_repository_over_resilient_connection() {
    let db = MockDatabase::new();
    db.set_result_set(
        &["name"],
        vec![vec![Value::from("Ada")], vec![Value::from("Grace")]],
    );
    db.fail_next(MockOp::ExecuteReader, deadlock(), 2);

    let mut resilient = ResilientConnection::with_policies(
        db.connect("Database=hr"),
        vec![deadlock_retry()],
        vec![deadlock_retry()],
    )
    .unwrap();
    let names = employee_names(&mut resilient).await.unwrap();

    assert_eq!(names, vec!["Ada".to_string(), "Grace".to_string()]);
    assert_eq!(db.calls(MockOp::ExecuteReader), 3);
}
