//! Bulwark Core Interface: Database Primitive Abstraction
//!
//! This crate defines the traits a database driver implements so that Bulwark
//! can decorate it: [`NativeConnection`], [`NativeCommand`],
//! [`NativeTransaction`] and [`DataReader`].
//!
//! # Architecture
//!
//! The traits mirror the shape of a classic data-access API:
//!
//! 1. **Connections**: open/close, connection properties, transactions, command factory
//! 2. **Commands**: text, type, timeout, parameters, and the execute family
//! 3. **Readers**: forward-only row access over a result set
//!
//! Every long-running call comes in two forms. The blocking form takes a
//! `&CancelSignal`; the non-blocking form is `async` and takes an owned
//! `CancelSignal`. Drivers that can interrupt work should watch the signal.
//!
//! # Example
//!
//! ```rust,no_run
//! use bulwark_core_interface::{CancelSignal, NativeCommand, NativeConnection, Result, Value};
//!
//! async fn count_rows<C: NativeConnection>(conn: &mut C, table: &str) -> Result<Value> {
//!     conn.open_async(CancelSignal::new()).await?;
//!
//!     let mut command = conn.create_command();
//!     command.set_command_text(format!("SELECT COUNT(*) FROM {table}"));
//!     command.execute_scalar_async(CancelSignal::new()).await
//! }
//! ```
//!
//! # Design Philosophy
//!
//! Code written against these traits cannot tell a native driver from a
//! resilient decorator, which is what lets the decorator be a drop-in
//! replacement.

use async_trait::async_trait;
use std::fmt;
use std::time::Duration;
use uuid::Uuid;

pub mod error;
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use bulwark_core_resilience::CancelSignal;
pub use error::{DbError, Result};

/// Lifecycle state of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Closed,
    Connecting,
    Open,
    Executing,
    Fetching,
    Broken,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Closed => "closed",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Open => "open",
            ConnectionState::Executing => "executing",
            ConnectionState::Fetching => "fetching",
            ConnectionState::Broken => "broken",
        };
        f.write_str(name)
    }
}

/// How the command text is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandType {
    #[default]
    Text,
    StoredProcedure,
    TableDirect,
}

/// Hints for how a reader should fetch results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CommandBehavior {
    #[default]
    Default,
    SingleResult,
    SingleRow,
    SchemaOnly,
    KeyInfo,
    SequentialAccess,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    ReadUncommitted,
    #[default]
    ReadCommitted,
    RepeatableRead,
    Serializable,
    Snapshot,
}

/// Identifies a transaction a command enlists in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId(pub Uuid);

impl TransactionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A single column value or parameter value
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Guid(Uuid),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl From<Uuid> for Value {
    fn from(v: Uuid) -> Self {
        Value::Guid(v)
    }
}

/// Named command parameter
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Ordered parameters bound to a command
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParameterCollection {
    items: Vec<Parameter>,
}

impl ParameterCollection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter, replacing any existing one with the same name
    pub fn add(&mut self, parameter: Parameter) {
        match self.items.iter_mut().find(|p| p.name == parameter.name) {
            Some(existing) => *existing = parameter,
            None => self.items.push(parameter),
        }
    }

    /// Shorthand for `add(Parameter::new(name, value))`
    pub fn add_with_value(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.add(Parameter::new(name, value));
    }

    pub fn get(&self, name: &str) -> Option<&Parameter> {
        self.items.iter().find(|p| p.name == name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Parameter> {
        let index = self.items.iter().position(|p| p.name == name)?;
        Some(self.items.remove(index))
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Parameter> {
        self.items.iter()
    }
}

/// Forward-only reader over a command's result set
#[async_trait]
pub trait DataReader: Send + 'static {
    /// Number of columns in the current result set
    fn field_count(&self) -> usize;

    fn column_name(&self, ordinal: usize) -> Option<&str>;

    /// Advance to the next row; `false` once the rows are exhausted
    fn read(&mut self) -> Result<bool>;

    async fn read_async(&mut self) -> Result<bool>;

    /// Value at `ordinal` in the current row
    fn get(&self, ordinal: usize) -> Result<Value>;

    /// Value of the named column in the current row
    fn get_by_name(&self, name: &str) -> Result<Value> {
        let ordinal = (0..self.field_count())
            .find(|&i| self.column_name(i) == Some(name))
            .ok_or_else(|| DbError::InvalidOperation(format!("no column named '{name}'")))?;
        self.get(ordinal)
    }
}

/// A unit of work on one connection
pub trait NativeTransaction: Send + 'static {
    fn id(&self) -> TransactionId;

    fn isolation_level(&self) -> IsolationLevel;

    fn commit(self) -> Result<()>;

    fn rollback(self) -> Result<()>;
}

/// A command executed against a connection
///
/// # Thread Safety
///
/// Implementations must be `Send + 'static` so a command can move between
/// tasks. Execution takes `&mut self`; a command runs one call at a time.
#[async_trait]
pub trait NativeCommand: Send + 'static {
    type Reader: DataReader;

    // ═══════════════════════════════════════════════════════════════════════
    // 1. Command Properties
    // ═══════════════════════════════════════════════════════════════════════

    fn command_text(&self) -> &str;

    fn set_command_text(&mut self, text: String);

    fn command_type(&self) -> CommandType;

    fn set_command_type(&mut self, command_type: CommandType);

    /// Driver-level timeout for each execution
    fn command_timeout(&self) -> Duration;

    fn set_command_timeout(&mut self, timeout: Duration);

    fn parameters(&self) -> &ParameterCollection;

    fn parameters_mut(&mut self) -> &mut ParameterCollection;

    /// A blank parameter in this driver's preferred shape
    fn create_parameter(&self) -> Parameter {
        Parameter::default()
    }

    /// Transaction this command enlists in, if any
    fn transaction(&self) -> Option<TransactionId>;

    fn set_transaction(&mut self, transaction: Option<TransactionId>);

    // ═══════════════════════════════════════════════════════════════════════
    // 2. Execution
    // ═══════════════════════════════════════════════════════════════════════

    /// Execute and return the number of rows affected
    fn execute_non_query(&mut self, signal: &CancelSignal) -> Result<u64>;

    /// Execute and return the first column of the first row
    fn execute_scalar(&mut self, signal: &CancelSignal) -> Result<Value>;

    fn execute_reader(
        &mut self,
        behavior: CommandBehavior,
        signal: &CancelSignal,
    ) -> Result<Self::Reader>;

    /// Create a prepared version of the command on the server
    fn prepare(&mut self, signal: &CancelSignal) -> Result<()>;

    async fn execute_non_query_async(&mut self, signal: CancelSignal) -> Result<u64>;

    async fn execute_scalar_async(&mut self, signal: CancelSignal) -> Result<Value>;

    async fn execute_reader_async(
        &mut self,
        behavior: CommandBehavior,
        signal: CancelSignal,
    ) -> Result<Self::Reader>;

    async fn prepare_async(&mut self, signal: CancelSignal) -> Result<()>;

    /// Ask the driver to abandon the current execution
    fn cancel(&self);
}

/// A connection to a database
///
/// # Thread Safety
///
/// Implementations must be `Send + 'static`. State-changing calls take
/// `&mut self`, so a connection is used by one caller at a time.
#[async_trait]
pub trait NativeConnection: Send + 'static {
    type Command: NativeCommand;
    type Transaction: NativeTransaction;

    // ═══════════════════════════════════════════════════════════════════════
    // 1. Connection Properties
    // ═══════════════════════════════════════════════════════════════════════

    fn connection_string(&self) -> &str;

    /// Replace the connection string; only allowed while closed
    fn set_connection_string(&mut self, connection_string: String) -> Result<()>;

    fn database(&self) -> &str;

    fn data_source(&self) -> &str;

    /// Server version, known once the connection has been opened
    fn server_version(&self) -> Option<&str>;

    fn state(&self) -> ConnectionState;

    /// Driver-assigned id of the current physical connection
    fn client_connection_id(&self) -> Option<Uuid>;

    fn connection_timeout(&self) -> Duration;

    fn packet_size(&self) -> u32;

    // ═══════════════════════════════════════════════════════════════════════
    // 2. Lifecycle
    // ═══════════════════════════════════════════════════════════════════════

    fn open(&mut self, signal: &CancelSignal) -> Result<()>;

    async fn open_async(&mut self, signal: CancelSignal) -> Result<()>;

    fn close(&mut self) -> Result<()>;

    async fn close_async(&mut self) -> Result<()>;

    fn change_database(&mut self, database: &str) -> Result<()>;

    // ═══════════════════════════════════════════════════════════════════════
    // 3. Factories
    // ═══════════════════════════════════════════════════════════════════════

    fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<Self::Transaction>;

    fn create_command(&self) -> Self::Command;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parameter_collection_replaces_by_name() {
        let mut params = ParameterCollection::new();
        params.add_with_value("@id", 7);
        params.add_with_value("@name", "Ada");
        params.add_with_value("@id", 8);

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("@id").unwrap().value, Value::Int(8));
        assert_eq!(params.remove("@name").unwrap().value.as_str(), Some("Ada"));
        assert!(params.get("@name").is_none());
    }

    #[test]
    fn test_value_accessors() {
        assert!(Value::default().is_null());
        assert_eq!(Value::from(42i64).as_i64(), Some(42));
        assert_eq!(Value::from("x").as_i64(), None);
        assert_eq!(Value::from(String::from("y")).as_str(), Some("y"));
    }

    #[test]
    fn test_enum_defaults() {
        assert_eq!(ConnectionState::default(), ConnectionState::Closed);
        assert_eq!(CommandType::default(), CommandType::Text);
        assert_eq!(IsolationLevel::default(), IsolationLevel::ReadCommitted);
        assert_eq!(ConnectionState::Open.to_string(), "open");
    }
}
