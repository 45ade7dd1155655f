/*!
 * Resilient connection decorator
 *
 * Owns one native connection. `open` and `open_async` run through the
 * configured policy chains; every other call is forwarded. Commands created
 * here share the connection's already-validated policies.
 *
 * Property reads are served from a snapshot refreshed after every call that
 * can change them, so they keep answering while an abandoned blocking open
 * still holds the native connection.
 */

use async_trait::async_trait;
use bulwark_core_interface::{
    CancelSignal, ConnectionState, DbError, IsolationLevel, NativeConnection, Result,
};
use bulwark_core_resilience::{ConfigError, Policy, ResiliencePolicies, SharedResource};
use futures::FutureExt;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::command::ResilientCommand;
use crate::config::ResilienceConfig;
use crate::context::connection_context;

#[derive(Debug, Clone)]
struct ConnectionSnapshot {
    connection_string: String,
    database: String,
    data_source: String,
    server_version: Option<String>,
    client_connection_id: Option<Uuid>,
    connection_timeout: Duration,
    packet_size: u32,
}

impl ConnectionSnapshot {
    fn capture<N: NativeConnection>(native: &N) -> Self {
        Self {
            connection_string: native.connection_string().to_string(),
            database: native.database().to_string(),
            data_source: native.data_source().to_string(),
            server_version: native.server_version().map(str::to_string),
            client_connection_id: native.client_connection_id(),
            connection_timeout: native.connection_timeout(),
            packet_size: native.packet_size(),
        }
    }
}

/// A native connection with Retry/Timeout policies around `open`
///
/// # Example
///
/// ```
/// use bulwark::ResilientConnection;
/// use bulwark_core_interface::mock::MockDatabase;
/// use bulwark_core_interface::{CancelSignal, ConnectionState, DbError, NativeConnection};
/// use bulwark_core_resilience::{RetryPolicy, TimeoutPolicy};
/// use std::time::Duration;
///
/// let db = MockDatabase::new();
/// let mut conn = ResilientConnection::with_policies(
///     db.connect("Data Source=db01;Database=hr"),
///     vec![RetryPolicy::on_fault(|e: &DbError| e.is_connection_failure()).into()],
///     vec![TimeoutPolicy::pessimistic(Duration::from_secs(5)).into()],
/// )
/// .unwrap();
///
/// conn.open(&CancelSignal::new()).unwrap();
/// assert_eq!(conn.state(), ConnectionState::Open);
/// ```
#[derive(Debug)]
pub struct ResilientConnection<N: NativeConnection> {
    native: SharedResource<N>,
    snapshot: ConnectionSnapshot,
    policies: ResiliencePolicies<DbError>,
    disposed: bool,
}

impl<N: NativeConnection> ResilientConnection<N> {
    /// Wrap a native connection with already-validated policies
    pub fn new(native: N, policies: ResiliencePolicies<DbError>) -> Self {
        Self {
            snapshot: ConnectionSnapshot::capture(&native),
            native: SharedResource::new(native),
            policies,
            disposed: false,
        }
    }

    /// Wrap a native connection, validating both policy lists
    pub fn with_policies<B, NB>(
        native: N,
        blocking: B,
        non_blocking: NB,
    ) -> std::result::Result<Self, ConfigError>
    where
        B: IntoIterator<Item = Policy<DbError>>,
        NB: IntoIterator<Item = Policy<DbError>>,
    {
        let policies = ResiliencePolicies::new(blocking, non_blocking)?;
        Ok(Self::new(native, policies))
    }

    /// Wrap a native connection with policies built from configuration
    pub fn from_config(native: N, config: &ResilienceConfig) -> crate::Result<Self> {
        Ok(Self::new(native, config.build_policies()?))
    }

    pub fn policies(&self) -> &ResiliencePolicies<DbError> {
        &self.policies
    }

    /// Close the native connection (if open) and release it
    ///
    /// A close failure is logged and swallowed. Dropping the decorator does
    /// the same.
    pub fn dispose(mut self) {
        self.teardown();
    }

    fn refresh(&mut self) {
        if let Some(native) = self.native.try_lock() {
            self.snapshot = ConnectionSnapshot::capture(&*native);
        }
    }

    fn teardown(&mut self) {
        if self.disposed {
            return;
        }
        self.disposed = true;

        let Some(mut native) = self.native.try_lock() else {
            warn!(
                data_source = %self.snapshot.data_source,
                "Connection held by an abandoned open, leaving it to close on its own"
            );
            return;
        };

        if native.state() == ConnectionState::Closed {
            return;
        }

        debug!(
            data_source = native.data_source(),
            database = native.database(),
            "Closing connection on dispose"
        );
        if let Err(e) = native.close() {
            warn!(error = %e, "Failed to close connection during dispose");
        }
    }
}

impl<N: NativeConnection> Drop for ResilientConnection<N> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[async_trait]
impl<N: NativeConnection> NativeConnection for ResilientConnection<N> {
    type Command = ResilientCommand<N::Command>;
    type Transaction = N::Transaction;

    fn connection_string(&self) -> &str {
        &self.snapshot.connection_string
    }

    fn set_connection_string(&mut self, connection_string: String) -> Result<()> {
        let result = self.native.lock().set_connection_string(connection_string);
        self.refresh();
        result
    }

    fn database(&self) -> &str {
        &self.snapshot.database
    }

    fn data_source(&self) -> &str {
        &self.snapshot.data_source
    }

    fn server_version(&self) -> Option<&str> {
        self.snapshot.server_version.as_deref()
    }

    fn state(&self) -> ConnectionState {
        match self.native.try_lock() {
            Some(native) => native.state(),
            // Only an open keeps the native locked past the call.
            None => ConnectionState::Connecting,
        }
    }

    fn client_connection_id(&self) -> Option<Uuid> {
        self.snapshot.client_connection_id
    }

    fn connection_timeout(&self) -> Duration {
        self.snapshot.connection_timeout
    }

    fn packet_size(&self) -> u32 {
        self.snapshot.packet_size
    }

    fn open(&mut self, signal: &CancelSignal) -> Result<()> {
        if self.state() == ConnectionState::Open {
            debug!("Connection already open");
            return Ok(());
        }

        let context = connection_context("open", &*self);
        let result = self
            .policies
            .blocking()
            .execute(&context, signal, &self.native, |native, signal| {
                // A late success from an abandoned attempt may already have
                // opened the connection.
                if native.state() == ConnectionState::Open {
                    return Ok(());
                }
                native.open(signal)
            })
            .map_err(DbError::from);
        self.refresh();
        result
    }

    async fn open_async(&mut self, signal: CancelSignal) -> Result<()> {
        if self.state() == ConnectionState::Open {
            debug!("Connection already open");
            return Ok(());
        }

        let context = connection_context("open_async", &*self);
        let native = self
            .native
            .reclaim(&signal)
            .await
            .ok_or(DbError::Cancelled)?;
        let result = self
            .policies
            .non_blocking()
            .execute_async(&context, &signal, native, |native, signal| {
                if native.state() == ConnectionState::Open {
                    return futures::future::ready(Ok(())).boxed();
                }
                native.open_async(signal)
            })
            .await
            .map_err(DbError::from);
        self.refresh();
        result
    }

    fn close(&mut self) -> Result<()> {
        let result = self.native.lock().close();
        self.refresh();
        result
    }

    async fn close_async(&mut self) -> Result<()> {
        let native = self
            .native
            .reclaim(&CancelSignal::new())
            .await
            .ok_or(DbError::Cancelled)?;
        let result = native.close_async().await;
        self.refresh();
        result
    }

    fn change_database(&mut self, database: &str) -> Result<()> {
        let result = self.native.lock().change_database(database);
        self.refresh();
        result
    }

    fn begin_transaction(&mut self, isolation: IsolationLevel) -> Result<N::Transaction> {
        self.native.lock().begin_transaction(isolation)
    }

    fn create_command(&self) -> ResilientCommand<N::Command> {
        ResilientCommand::new(self.native.lock().create_command(), self.policies.clone())
    }
}
