//! Per-call diagnostic context
//!
//! Every chain execution carries an [`ExecutionContext`]: the name of the
//! operation plus a typed metadata record describing the resource at the
//! moment of the call. The record is built right before the call, handed to
//! the chain by reference, and dropped afterwards. Policies read it for
//! logging only.

/// Immutable diagnostic record for one invocation
///
/// # Example
/// ```
/// use bulwark_core_resilience::ExecutionContext;
///
/// #[derive(Debug)]
/// struct Query<'a> {
///     text: &'a str,
/// }
///
/// let context = ExecutionContext::build("execute_scalar", Query { text: "SELECT 1" });
/// assert_eq!(context.operation_key(), "execute_scalar");
/// assert_eq!(context.metadata().text, "SELECT 1");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutionContext<M> {
    operation_key: &'static str,
    metadata: M,
}

impl<M> ExecutionContext<M> {
    /// Build the context for one call
    pub fn build(operation_key: &'static str, metadata: M) -> Self {
        Self {
            operation_key,
            metadata,
        }
    }

    /// Name of the operation being executed
    pub fn operation_key(&self) -> &'static str {
        self.operation_key
    }

    /// Snapshot of the resource taken when the context was built
    pub fn metadata(&self) -> &M {
        &self.metadata
    }
}
