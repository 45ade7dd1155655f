//! Mock database driver for testing
//!
//! This provides an in-memory implementation of the native traits that can be
//! used in tests without a database server. Every call is counted, and the
//! outcome of the next calls to an operation can be scripted.

use crate::{
    CancelSignal, CommandBehavior, CommandType, ConnectionState, DataReader, DbError,
    IsolationLevel, NativeCommand, NativeConnection, NativeTransaction, ParameterCollection,
    Result, TransactionId, Value,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use uuid::Uuid;

/// Operations the mock records and can script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MockOp {
    Open,
    Close,
    ChangeDatabase,
    BeginTransaction,
    ExecuteNonQuery,
    ExecuteScalar,
    ExecuteReader,
    Prepare,
    Read,
    Commit,
    Rollback,
    Cancel,
}

/// Scripted outcome for one call
#[derive(Debug, Clone)]
pub enum MockBehavior {
    /// Fail immediately with the given error
    Fail(DbError),
    /// Take this long, ignoring the cancel signal, then succeed
    Delay(Duration),
    /// Wait for the cancel signal, then fail with [`DbError::Cancelled`]
    ///
    /// A blocking call with a signal that never trips waits forever.
    AwaitCancel,
}

#[derive(Debug, Default)]
struct MockState {
    scripts: HashMap<MockOp, VecDeque<MockBehavior>>,
    calls: HashMap<MockOp, u32>,
    executed: Vec<String>,
    rows_affected: u64,
    scalar: Value,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

/// Shared in-memory database
///
/// Clones share the same state, so a test keeps one handle for scripting and
/// assertions while connections created from it are moved into the code under
/// test.
#[derive(Debug, Clone, Default)]
pub struct MockDatabase {
    state: Arc<Mutex<MockState>>,
}

impl MockDatabase {
    /// Create a new empty mock database
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue outcomes for the next calls to `op`; unscripted calls succeed
    pub fn script(&self, op: MockOp, behaviors: impl IntoIterator<Item = MockBehavior>) {
        self.lock()
            .scripts
            .entry(op)
            .or_default()
            .extend(behaviors);
    }

    /// Fail the next `times` calls to `op` with `error`
    pub fn fail_next(&self, op: MockOp, error: DbError, times: usize) {
        self.script(op, std::iter::repeat_n(MockBehavior::Fail(error), times));
    }

    /// Number of times `op` has been invoked
    pub fn calls(&self, op: MockOp) -> u32 {
        self.lock().calls.get(&op).copied().unwrap_or(0)
    }

    /// Command texts seen by the execute family, in call order
    pub fn executed_commands(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn set_rows_affected(&self, rows: u64) {
        self.lock().rows_affected = rows;
    }

    pub fn set_scalar(&self, value: Value) {
        self.lock().scalar = value;
    }

    /// Result set returned by every reader
    pub fn set_result_set(&self, columns: &[&str], rows: Vec<Vec<Value>>) {
        let mut state = self.lock();
        state.columns = columns.iter().map(|c| c.to_string()).collect();
        state.rows = rows;
    }

    /// Create a closed connection to this database
    pub fn connect(&self, connection_string: &str) -> MockConnection {
        let (database, data_source) = parse_connection_string(connection_string);
        MockConnection {
            db: self.clone(),
            connection_string: connection_string.to_string(),
            database,
            data_source,
            state: ConnectionState::Closed,
            client_connection_id: None,
            connection_timeout: Duration::from_secs(15),
            packet_size: 8000,
        }
    }

    fn next_behavior(&self, op: MockOp) -> Option<MockBehavior> {
        let mut state = self.lock();
        *state.calls.entry(op).or_default() += 1;
        state.scripts.get_mut(&op).and_then(VecDeque::pop_front)
    }

    fn record_execution(&self, text: &str) {
        self.lock().executed.push(text.to_string());
    }

    fn run_blocking(&self, op: MockOp, signal: &CancelSignal) -> Result<()> {
        match self.next_behavior(op) {
            None => Ok(()),
            Some(MockBehavior::Fail(err)) => Err(err),
            Some(MockBehavior::Delay(delay)) => {
                std::thread::sleep(delay);
                Ok(())
            }
            Some(MockBehavior::AwaitCancel) => {
                while !signal.is_cancelled() {
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(DbError::Cancelled)
            }
        }
    }

    async fn run_async(&self, op: MockOp, signal: CancelSignal) -> Result<()> {
        match self.next_behavior(op) {
            None => Ok(()),
            Some(MockBehavior::Fail(err)) => Err(err),
            Some(MockBehavior::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            }
            Some(MockBehavior::AwaitCancel) => {
                signal.cancelled().await;
                Err(DbError::Cancelled)
            }
        }
    }

    fn reader(&self) -> MockReader {
        let state = self.lock();
        MockReader {
            db: self.clone(),
            columns: state.columns.clone(),
            rows: state.rows.clone().into(),
            current: None,
        }
    }
}

/// Pull `Database` and `Data Source` out of a `key=value;` string
fn parse_connection_string(connection_string: &str) -> (String, String) {
    let mut database = String::new();
    let mut data_source = String::new();

    for pair in connection_string.split(';') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        match key.trim().to_ascii_lowercase().as_str() {
            "database" | "initial catalog" => database = value.trim().to_string(),
            "data source" | "server" => data_source = value.trim().to_string(),
            _ => {}
        }
    }

    (database, data_source)
}

/// Connection to a [`MockDatabase`]
///
/// Opening an already-open connection is an error, as with real drivers.
#[derive(Debug)]
pub struct MockConnection {
    db: MockDatabase,
    connection_string: String,
    database: String,
    data_source: String,
    state: ConnectionState,
    client_connection_id: Option<Uuid>,
    connection_timeout: Duration,
    packet_size: u32,
}

impl MockConnection {
    fn begin_open(&mut self) -> Result<()> {
        if self.state == ConnectionState::Open {
            return Err(DbError::InvalidOperation(
                "connection is already open".to_string(),
            ));
        }
        self.state = ConnectionState::Connecting;
        Ok(())
    }

    fn finish_open(&mut self, outcome: Result<()>) -> Result<()> {
        match outcome {
            Ok(()) => {
                self.state = ConnectionState::Open;
                self.client_connection_id = Some(Uuid::new_v4());
                Ok(())
            }
            Err(err) => {
                self.state = ConnectionState::Closed;
                Err(err)
            }
        }
    }

    fn require_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Open => Ok(()),
            state => Err(DbError::NotOpen(state)),
        }
    }

    fn finish_close(&mut self, outcome: Result<()>) -> Result<()> {
        outcome?;
        self.state = ConnectionState::Closed;
        self.client_connection_id = None;
        Ok(())
    }
}

#[async_trait]
impl NativeConnection for MockConnection {
    type Command = MockCommand;
    type Transaction = MockTransaction;

    fn connection_string(&self) -> &str {
        &self.connection_string
    }

    fn set_connection_string(&mut self, connection_string: String) -> Result<()> {
        if self.state != ConnectionState::Closed {
            return Err(DbError::InvalidOperation(
                "connection string can only change while closed".to_string(),
            ));
        }
        let (database, data_source) = parse_connection_string(&connection_string);
        self.database = database;
        self.data_source = data_source;
        self.connection_string = connection_string;
        Ok(())
    }

    fn database(&self) -> &str {
        &self.database
    }

    fn data_source(&self) -> &str {
        &self.data_source
    }

    fn server_version(&self) -> Option<&str> {
        (self.state == ConnectionState::Open).then_some("mock-1.0")
    }

    fn state(&self) -> ConnectionState {
        self.state
    }

    fn client_connection_id(&self) -> Option<Uuid> {
        self.client_connection_id
    }

    fn connection_timeout(&self) -> Duration {
        self.connection_timeout
    }

    fn packet_size(&self) -> u32 {
        self.packet_size
    }

    fn open(&mut self, signal: &CancelSignal) -> Result<()> {
        self.begin_open()?;
        let outcome = self.db.run_blocking(MockOp::Open, signal);
        self.finish_open(outcome)
    }

    async fn open_async(&mut self, signal: CancelSignal) -> Result<()> {
        self.begin_open()?;
        let outcome = self.db.run_async(MockOp::Open, signal).await;
        self.finish_open(outcome)
    }

    fn close(&mut self) -> Result<()> {
        let outcome = self.db.run_blocking(MockOp::Close, &CancelSignal::new());
        self.finish_close(outcome)
    }

    async fn close_async(&mut self) -> Result<()> {
        let outcome = self.db.run_async(MockOp::Close, CancelSignal::new()).await;
        self.finish_close(outcome)
    }

    fn change_database(&mut self, database: &str) -> Result<()> {
        self.require_open()?;
        self.db
            .run_blocking(MockOp::ChangeDatabase, &CancelSignal::new())?;
        self.database = database.to_string();
        Ok(())
    }

    fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<MockTransaction> {
        self.require_open()?;
        self.db
            .run_blocking(MockOp::BeginTransaction, &CancelSignal::new())?;
        Ok(MockTransaction {
            db: self.db.clone(),
            id: TransactionId::new(),
            isolation,
        })
    }

    fn create_command(&self) -> MockCommand {
        MockCommand {
            db: self.db.clone(),
            text: String::new(),
            command_type: CommandType::Text,
            timeout: Duration::from_secs(30),
            parameters: ParameterCollection::new(),
            transaction: None,
        }
    }
}

/// Command created by a [`MockConnection`]
#[derive(Debug)]
pub struct MockCommand {
    db: MockDatabase,
    text: String,
    command_type: CommandType,
    timeout: Duration,
    parameters: ParameterCollection,
    transaction: Option<TransactionId>,
}

impl MockCommand {
    fn rows_affected(&self) -> u64 {
        self.db.lock().rows_affected
    }

    fn scalar(&self) -> Value {
        self.db.lock().scalar.clone()
    }
}

#[async_trait]
impl NativeCommand for MockCommand {
    type Reader = MockReader;

    fn command_text(&self) -> &str {
        &self.text
    }

    fn set_command_text(&mut self, text: String) {
        self.text = text;
    }

    fn command_type(&self) -> CommandType {
        self.command_type
    }

    fn set_command_type(&mut self, command_type: CommandType) {
        self.command_type = command_type;
    }

    fn command_timeout(&self) -> Duration {
        self.timeout
    }

    fn set_command_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn parameters(&self) -> &ParameterCollection {
        &self.parameters
    }

    fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.parameters
    }

    fn transaction(&self) -> Option<TransactionId> {
        self.transaction
    }

    fn set_transaction(&mut self, transaction: Option<TransactionId>) {
        self.transaction = transaction;
    }

    fn execute_non_query(&mut self, signal: &CancelSignal) -> Result<u64> {
        self.db.record_execution(&self.text);
        self.db.run_blocking(MockOp::ExecuteNonQuery, signal)?;
        Ok(self.rows_affected())
    }

    fn execute_scalar(&mut self, signal: &CancelSignal) -> Result<Value> {
        self.db.record_execution(&self.text);
        self.db.run_blocking(MockOp::ExecuteScalar, signal)?;
        Ok(self.scalar())
    }

    fn execute_reader(
        &mut self,
        _behavior: CommandBehavior,
        signal: &CancelSignal,
    ) -> Result<MockReader> {
        self.db.record_execution(&self.text);
        self.db.run_blocking(MockOp::ExecuteReader, signal)?;
        Ok(self.db.reader())
    }

    fn prepare(&mut self, signal: &CancelSignal) -> Result<()> {
        self.db.run_blocking(MockOp::Prepare, signal)
    }

    async fn execute_non_query_async(&mut self, signal: CancelSignal) -> Result<u64> {
        self.db.record_execution(&self.text);
        self.db.run_async(MockOp::ExecuteNonQuery, signal).await?;
        Ok(self.rows_affected())
    }

    async fn execute_scalar_async(&mut self, signal: CancelSignal) -> Result<Value> {
        self.db.record_execution(&self.text);
        self.db.run_async(MockOp::ExecuteScalar, signal).await?;
        Ok(self.scalar())
    }

    async fn execute_reader_async(
        &mut self,
        _behavior: CommandBehavior,
        signal: CancelSignal,
    ) -> Result<MockReader> {
        self.db.record_execution(&self.text);
        self.db.run_async(MockOp::ExecuteReader, signal).await?;
        Ok(self.db.reader())
    }

    async fn prepare_async(&mut self, signal: CancelSignal) -> Result<()> {
        self.db.run_async(MockOp::Prepare, signal).await
    }

    fn cancel(&self) {
        self.db.next_behavior(MockOp::Cancel);
    }
}

/// Reader over the database's configured result set
#[derive(Debug)]
pub struct MockReader {
    db: MockDatabase,
    columns: Vec<String>,
    rows: VecDeque<Vec<Value>>,
    current: Option<Vec<Value>>,
}

impl MockReader {
    fn advance(&mut self, outcome: Result<()>) -> Result<bool> {
        outcome?;
        self.current = self.rows.pop_front();
        Ok(self.current.is_some())
    }
}

#[async_trait]
impl DataReader for MockReader {
    fn field_count(&self) -> usize {
        self.columns.len()
    }

    fn column_name(&self, ordinal: usize) -> Option<&str> {
        self.columns.get(ordinal).map(String::as_str)
    }

    fn read(&mut self) -> Result<bool> {
        let outcome = self.db.run_blocking(MockOp::Read, &CancelSignal::new());
        self.advance(outcome)
    }

    async fn read_async(&mut self) -> Result<bool> {
        let outcome = self.db.run_async(MockOp::Read, CancelSignal::new()).await;
        self.advance(outcome)
    }

    fn get(&self, ordinal: usize) -> Result<Value> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| DbError::InvalidOperation("no current row".to_string()))?;
        row.get(ordinal)
            .cloned()
            .ok_or_else(|| DbError::InvalidOperation(format!("column {ordinal} out of range")))
    }
}

/// Transaction begun on a [`MockConnection`]
#[derive(Debug)]
pub struct MockTransaction {
    db: MockDatabase,
    id: TransactionId,
    isolation: IsolationLevel,
}

impl NativeTransaction for MockTransaction {
    fn id(&self) -> TransactionId {
        self.id
    }

    fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    fn commit(self) -> Result<()> {
        self.db.run_blocking(MockOp::Commit, &CancelSignal::new())
    }

    fn rollback(self) -> Result<()> {
        self.db.run_blocking(MockOp::Rollback, &CancelSignal::new())
    }
}
