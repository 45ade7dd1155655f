/*!
 * Diagnostic metadata attached to each decorated call
 *
 * Metadata is a snapshot of the native resource taken right before the call.
 * Policies only log it; nothing branches on it.
 */

use bulwark_core_interface::{CommandType, ConnectionState, NativeCommand, NativeConnection};
use bulwark_core_resilience::ExecutionContext;
use std::time::Duration;
use uuid::Uuid;

/// Snapshot of a command at execution time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMetadata {
    pub text: String,
    pub command_type: CommandType,
    pub timeout: Duration,
}

impl CommandMetadata {
    pub fn capture<C: NativeCommand>(command: &C) -> Self {
        Self {
            text: command.command_text().to_string(),
            command_type: command.command_type(),
            timeout: command.command_timeout(),
        }
    }
}

/// Snapshot of a connection at execution time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionMetadata {
    pub client_connection_id: Option<Uuid>,
    pub database: String,
    pub data_source: String,
    pub state: ConnectionState,
    pub connection_timeout: Duration,
    pub packet_size: u32,
}

impl ConnectionMetadata {
    pub fn capture<N: NativeConnection>(connection: &N) -> Self {
        Self {
            client_connection_id: connection.client_connection_id(),
            database: connection.database().to_string(),
            data_source: connection.data_source().to_string(),
            state: connection.state(),
            connection_timeout: connection.connection_timeout(),
            packet_size: connection.packet_size(),
        }
    }
}

/// Context for a command operation
pub fn command_context<C: NativeCommand>(
    operation_key: &'static str,
    command: &C,
) -> ExecutionContext<CommandMetadata> {
    ExecutionContext::build(operation_key, CommandMetadata::capture(command))
}

/// Context for a connection operation
pub fn connection_context<N: NativeConnection>(
    operation_key: &'static str,
    connection: &N,
) -> ExecutionContext<ConnectionMetadata> {
    ExecutionContext::build(operation_key, ConnectionMetadata::capture(connection))
}

#[cfg(test)]
mod tests {
    use super::*;
    use bulwark_core_interface::mock::MockDatabase;

    #[test]
    fn test_command_context_snapshots_properties() {
        let db = MockDatabase::new();
        let conn = db.connect("Database=hr");
        let mut command = conn.create_command();
        command.set_command_text("EXEC dbo.GetEmployee".into());
        command.set_command_type(CommandType::StoredProcedure);
        command.set_command_timeout(Duration::from_secs(5));

        let context = command_context("execute_scalar", &command);
        command.set_command_text("changed".into());

        assert_eq!(context.operation_key(), "execute_scalar");
        assert_eq!(
            context.metadata(),
            &CommandMetadata {
                text: "EXEC dbo.GetEmployee".into(),
                command_type: CommandType::StoredProcedure,
                timeout: Duration::from_secs(5),
            }
        );
    }

    #[test]
    fn test_connection_context_snapshots_properties() {
        let db = MockDatabase::new();
        let conn = db.connect("Data Source=db01;Database=hr");

        let context = connection_context("open", &conn);
        let metadata = context.metadata();

        assert_eq!(metadata.database, "hr");
        assert_eq!(metadata.data_source, "db01");
        assert_eq!(metadata.state, ConnectionState::Closed);
        assert_eq!(metadata.client_connection_id, None);
        assert_eq!(metadata.packet_size, 8000);
        assert_eq!(metadata.connection_timeout, Duration::from_secs(15));
    }
}
