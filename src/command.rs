/*!
 * Resilient command decorator
 *
 * Wraps a native command and routes the execute family through the
 * configured policy chains. Command properties live on the decorator and are
 * applied to the native command before each attempt, so they stay readable
 * while an abandoned blocking attempt still holds the native command.
 */

use async_trait::async_trait;
use bulwark_core_interface::{
    CancelSignal, CommandBehavior, CommandType, DbError, NativeCommand, Parameter,
    ParameterCollection, Result, TransactionId, Value,
};
use bulwark_core_resilience::{ResiliencePolicies, SharedResource};
use std::time::Duration;
use tracing::debug;

use crate::context::command_context;

/// Properties the caller sets on a command
#[derive(Debug, Clone, PartialEq)]
struct CommandProperties {
    text: String,
    command_type: CommandType,
    timeout: Duration,
    parameters: ParameterCollection,
    transaction: Option<TransactionId>,
}

impl CommandProperties {
    fn capture<C: NativeCommand>(native: &C) -> Self {
        Self {
            text: native.command_text().to_string(),
            command_type: native.command_type(),
            timeout: native.command_timeout(),
            parameters: native.parameters().clone(),
            transaction: native.transaction(),
        }
    }

    fn apply<C: NativeCommand>(&self, native: &mut C) {
        if native.command_text() != self.text {
            native.set_command_text(self.text.clone());
        }
        native.set_command_type(self.command_type);
        native.set_command_timeout(self.timeout);
        if native.parameters() != &self.parameters {
            *native.parameters_mut() = self.parameters.clone();
        }
        native.set_transaction(self.transaction);
    }
}

/// A native command whose executions run through resilience policies
///
/// Created by [`crate::ResilientConnection::create_command`], or directly
/// around any native command. Implements [`NativeCommand`] itself, so code
/// written against the trait accepts it unchanged.
#[derive(Debug)]
pub struct ResilientCommand<C: NativeCommand> {
    native: SharedResource<C>,
    properties: CommandProperties,
    policies: ResiliencePolicies<DbError>,
}

impl<C: NativeCommand> ResilientCommand<C> {
    pub fn new(native: C, policies: ResiliencePolicies<DbError>) -> Self {
        Self {
            properties: CommandProperties::capture(&native),
            native: SharedResource::new(native),
            policies,
        }
    }

    /// Policies shared with the owning connection
    pub fn policies(&self) -> &ResiliencePolicies<DbError> {
        &self.policies
    }

    /// Release the native command
    ///
    /// An abandoned blocking attempt keeps the native command alive until it
    /// returns.
    pub fn dispose(self) {
        debug!(
            text = %self.properties.text,
            abandoned = self.native.is_lent(),
            "Disposing command"
        );
    }

    fn run_blocking<T, F>(
        &self,
        operation_key: &'static str,
        signal: &CancelSignal,
        call: F,
    ) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(&mut C, &CancelSignal) -> Result<T> + Send + Sync + 'static,
    {
        let context = command_context(operation_key, self);
        let properties = self.properties.clone();
        self.policies
            .blocking()
            .execute(&context, signal, &self.native, move |native, signal| {
                properties.apply(native);
                call(native, signal)
            })
            .map_err(DbError::from)
    }
}

/// Exclusive access to the native command for a non-blocking call
async fn reclaim<'a, C: NativeCommand>(
    native: &'a mut SharedResource<C>,
    properties: &CommandProperties,
    signal: &CancelSignal,
) -> Result<&'a mut C> {
    let native = native.reclaim(signal).await.ok_or_else(|| {
        debug!("Cancelled while an abandoned attempt held the command");
        DbError::Cancelled
    })?;
    properties.apply(native);
    Ok(native)
}

#[async_trait]
impl<C: NativeCommand> NativeCommand for ResilientCommand<C> {
    type Reader = C::Reader;

    fn command_text(&self) -> &str {
        &self.properties.text
    }

    fn set_command_text(&mut self, text: String) {
        self.properties.text = text;
    }

    fn command_type(&self) -> CommandType {
        self.properties.command_type
    }

    fn set_command_type(&mut self, command_type: CommandType) {
        self.properties.command_type = command_type;
    }

    fn command_timeout(&self) -> Duration {
        self.properties.timeout
    }

    fn set_command_timeout(&mut self, timeout: Duration) {
        self.properties.timeout = timeout;
    }

    fn parameters(&self) -> &ParameterCollection {
        &self.properties.parameters
    }

    fn parameters_mut(&mut self) -> &mut ParameterCollection {
        &mut self.properties.parameters
    }

    fn create_parameter(&self) -> Parameter {
        self.native.lock().create_parameter()
    }

    fn transaction(&self) -> Option<TransactionId> {
        self.properties.transaction
    }

    fn set_transaction(&mut self, transaction: Option<TransactionId>) {
        self.properties.transaction = transaction;
    }

    fn execute_non_query(&mut self, signal: &CancelSignal) -> Result<u64> {
        self.run_blocking("execute_non_query", signal, |native, signal| {
            native.execute_non_query(signal)
        })
    }

    fn execute_scalar(&mut self, signal: &CancelSignal) -> Result<Value> {
        self.run_blocking("execute_scalar", signal, |native, signal| {
            native.execute_scalar(signal)
        })
    }

    fn execute_reader(
        &mut self,
        behavior: CommandBehavior,
        signal: &CancelSignal,
    ) -> Result<Self::Reader> {
        self.run_blocking("execute_reader", signal, move |native, signal| {
            native.execute_reader(behavior, signal)
        })
    }

    fn prepare(&mut self, signal: &CancelSignal) -> Result<()> {
        self.run_blocking("prepare", signal, |native, signal| native.prepare(signal))
    }

    async fn execute_non_query_async(&mut self, signal: CancelSignal) -> Result<u64> {
        let context = command_context("execute_non_query_async", &*self);
        let native = reclaim(&mut self.native, &self.properties, &signal).await?;
        self.policies
            .non_blocking()
            .execute_async(&context, &signal, native, |native, signal| {
                native.execute_non_query_async(signal)
            })
            .await
            .map_err(DbError::from)
    }

    async fn execute_scalar_async(&mut self, signal: CancelSignal) -> Result<Value> {
        let context = command_context("execute_scalar_async", &*self);
        let native = reclaim(&mut self.native, &self.properties, &signal).await?;
        self.policies
            .non_blocking()
            .execute_async(&context, &signal, native, |native, signal| {
                native.execute_scalar_async(signal)
            })
            .await
            .map_err(DbError::from)
    }

    async fn execute_reader_async(
        &mut self,
        behavior: CommandBehavior,
        signal: CancelSignal,
    ) -> Result<Self::Reader> {
        let context = command_context("execute_reader_async", &*self);
        let native = reclaim(&mut self.native, &self.properties, &signal).await?;
        self.policies
            .non_blocking()
            .execute_async(&context, &signal, native, move |native, signal| {
                native.execute_reader_async(behavior, signal)
            })
            .await
            .map_err(DbError::from)
    }

    async fn prepare_async(&mut self, signal: CancelSignal) -> Result<()> {
        let context = command_context("prepare_async", &*self);
        let native = reclaim(&mut self.native, &self.properties, &signal).await?;
        self.policies
            .non_blocking()
            .execute_async(&context, &signal, native, |native, signal| {
                native.prepare_async(signal)
            })
            .await
            .map_err(DbError::from)
    }

    fn cancel(&self) {
        // Outside the policy chain.
        match self.native.try_lock() {
            Some(native) => native.cancel(),
            None => debug!("Command held by an abandoned attempt, cancel not forwarded"),
        }
    }
}
