//! Executor capability handed to plug-in edit logic
//!
//! Command providers and trigger providers can return a *transaction
//! function*: a callback that performs further edits. The callback receives
//! an [`Executor`] rather than the full transaction context, so plug-ins get
//! exactly the capabilities they need and nothing else.

use crate::context::TransactionContext;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use modelgate_core::{ModelUpdateResult, ModelUri, Operation, Result};
use serde_json::Value;

/// Edit capabilities available inside a transaction
///
/// Implemented by [`TransactionContext`]; every edit issued through an
/// executor lands in the frame of the transaction level that invoked the
/// plug-in, so callers observe the union of edits performed by their
/// callees.
#[async_trait]
pub trait Executor: Send + Sync {
    /// The model this transaction operates on
    fn model_uri(&self) -> &ModelUri;

    /// Execute a command, running it through the command provider registry
    async fn execute(&self, modeluri: &ModelUri, command: Value) -> Result<ModelUpdateResult>;

    /// Apply a JSON-Patch to the model
    async fn apply_patch(&self, patch: Vec<Operation>) -> Result<ModelUpdateResult>;

    /// Open a nested transaction sharing this one's session
    fn open_transaction(&self) -> TransactionContext;
}

/// Plug-in supplied edit logic run inside a transaction
///
/// Returns `true` on success. Returning `false` discards the edits the
/// function contributed and fails the enclosing operation.
#[async_trait]
pub trait TransactionFunction: Send + Sync {
    /// Perform edits against the given executor
    async fn run(&self, exec: &dyn Executor) -> bool;
}

/// Adapter for writing a [`TransactionFunction`] as a closure
///
/// ```ignore
/// let f = FnTransaction::new(|exec| {
///     Box::pin(async move { exec.apply_patch(ops.clone()).await.is_ok() })
/// });
/// ```
pub struct FnTransaction<F>(F);

impl<F> FnTransaction<F>
where
    F: for<'a> Fn(&'a dyn Executor) -> BoxFuture<'a, bool> + Send + Sync,
{
    /// Wrap a closure as a transaction function
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F> TransactionFunction for FnTransaction<F>
where
    F: for<'a> Fn(&'a dyn Executor) -> BoxFuture<'a, bool> + Send + Sync,
{
    async fn run(&self, exec: &dyn Executor) -> bool {
        (self.0)(exec).await
    }
}
