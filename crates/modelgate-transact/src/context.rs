//! Transaction context
//!
//! One open edit session on one model. The context owns the WebSocket to
//! upstream, the stack of nested edit frames, and the dispatch logic that
//! runs every command through the provider registry before it reaches the
//! wire. Nested transactions are lightweight proxies over the same session:
//! they push a frame on open, pop it on commit, and share everything else.
//!
//! Failure policy: any wire-level failure inside `execute`, `apply_patch`,
//! or `commit` rolls the whole session back (a single best-effort
//! `roll-back` message) before the error is surfaced. A rolled-back
//! transaction never hands a merged result upward.

use crate::config::TransactionConfig;
use crate::executor::Executor;
use crate::frames::FrameStack;
use crate::registry::{
    CommandProviderRegistry, ProvidedEdit, TriggerProviderRegistry, TriggeredEdit,
};
use crate::socket::TransactionSocket;
use async_trait::async_trait;
use modelgate_core::{
    CommandOrPatch, GateError, ModelUpdateResult, ModelUri, Operation, Result, TransactionMessage,
};
use serde_json::Value;
use std::sync::Arc;

struct Inner {
    model_uri: ModelUri,
    transaction_uri: String,
    uuid: String,
    socket: TransactionSocket,
    frames: FrameStack,
    commands: CommandProviderRegistry,
    triggers: TriggerProviderRegistry,
    config: TransactionConfig,
}

/// Handle to a transactional edit session on one model
///
/// Cloning is cheap and shares the session; the root handle is the one that
/// may send the `close` terminator. Handles returned by
/// [`TransactionContext::open_transaction`] are nested children.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<Inner>,
    is_root: bool,
}

impl TransactionContext {
    /// Dial the transaction endpoint and complete the session handshake.
    ///
    /// Returns a root context with the root edit frame already pushed.
    pub(crate) async fn open(
        model_uri: ModelUri,
        transaction_uri: String,
        ws_url: &str,
        commands: CommandProviderRegistry,
        triggers: TriggerProviderRegistry,
        config: TransactionConfig,
    ) -> Result<Self> {
        let (socket, uuid) = TransactionSocket::connect(ws_url, &config).await?;
        let frames = FrameStack::new();
        frames.push();
        tracing::info!(
            model_uri = %model_uri,
            uuid = %uuid,
            "Opened transaction"
        );
        Ok(Self {
            inner: Arc::new(Inner {
                model_uri,
                transaction_uri,
                uuid,
                socket,
                frames,
                commands,
                triggers,
                config,
            }),
            is_root: true,
        })
    }

    /// The model this transaction operates on
    pub fn model_uri(&self) -> &ModelUri {
        &self.inner.model_uri
    }

    /// The transaction endpoint URI handed out by upstream
    pub fn transaction_uri(&self) -> &str {
        &self.inner.transaction_uri
    }

    /// The session UUID delivered by upstream on open
    pub fn uuid(&self) -> &str {
        &self.inner.uuid
    }

    /// Whether edits may still be sent on this session
    pub fn is_open(&self) -> bool {
        self.inner.socket.is_open()
    }

    /// Whether this handle is the root of the session
    pub fn is_root(&self) -> bool {
        self.is_root
    }

    /// Register the hook run when the session's socket closes
    pub(crate) fn on_close(&self, hook: Box<dyn FnOnce() + Send>) {
        self.inner.socket.on_close(hook);
    }

    /// Apply a single edit: commands dispatch through the provider registry,
    /// patches go to the wire directly
    pub async fn edit(&self, edit: CommandOrPatch) -> Result<ModelUpdateResult> {
        match edit {
            CommandOrPatch::Command(command) => {
                let uri = self.inner.model_uri.clone();
                self.execute(&uri, command).await
            }
            CommandOrPatch::Patch(patch) => self.apply_patch(patch).await,
        }
    }

    /// Execute a command.
    ///
    /// Commands with a registered provider are substituted or expanded;
    /// everything else is sent to upstream as-is. Provider expansion runs in
    /// its own edit frame so a failed expansion discards exactly the edits
    /// it contributed.
    pub async fn execute(
        &self,
        modeluri: &ModelUri,
        command: Value,
    ) -> Result<ModelUpdateResult> {
        match self.inner.commands.get_commands(modeluri, &command) {
            None => {
                self.send_edit(modeluri, CommandOrPatch::Command(command))
                    .await
            }
            // Substitutes go to the wire without another registry pass.
            Some(ProvidedEdit::Substitute(CommandOrPatch::Command(substitute))) => {
                self.send_edit(modeluri, CommandOrPatch::Command(substitute))
                    .await
            }
            Some(ProvidedEdit::Substitute(CommandOrPatch::Patch(patch))) => {
                self.apply_patch(patch).await
            }
            Some(ProvidedEdit::Function(function)) => {
                let command_type = command
                    .get("type")
                    .and_then(Value::as_str)
                    .unwrap_or("<untyped>")
                    .to_string();
                self.inner.frames.push();
                if function.run(self).await {
                    self.inner.frames.pop_merge()
                } else {
                    let _ = self.inner.frames.pop_discard();
                    let err = GateError::command_failed(format!(
                        "provider for command type '{command_type}' reported failure"
                    ));
                    self.auto_rollback(&err).await;
                    Err(err)
                }
            }
        }
    }

    /// Apply a JSON-Patch to the model.
    ///
    /// An empty patch is not an error and does not touch the wire; it
    /// yields the failed sentinel, matching upstream's treatment of a
    /// no-op edit.
    pub async fn apply_patch(&self, patch: Vec<Operation>) -> Result<ModelUpdateResult> {
        if patch.is_empty() {
            return Ok(ModelUpdateResult::failed());
        }
        let uri = self.inner.model_uri.clone();
        self.send_edit(&uri, CommandOrPatch::Patch(patch)).await
    }

    /// Open a nested transaction sharing this session.
    ///
    /// The child pushes its own edit frame; its `commit` pops the frame and
    /// folds it into the parent without touching the wire, and its
    /// `rollback` ends the entire session.
    pub fn open_transaction(&self) -> TransactionContext {
        self.inner.frames.push();
        tracing::debug!(
            model_uri = %self.inner.model_uri,
            depth = self.inner.frames.depth(),
            "Opened nested transaction"
        );
        TransactionContext {
            inner: self.inner.clone(),
            is_root: false,
        }
    }

    /// Commit this transaction level.
    ///
    /// A child commit pops its frame into the parent. The root commit runs
    /// the trigger loop to quiescence, sends the single `close` terminator,
    /// and returns the aggregate of everything the session applied. The
    /// closed-socket, trigger-failure, and cap-exceeded paths roll back and
    /// return the failed sentinel instead of an error.
    pub async fn commit(&self) -> Result<ModelUpdateResult> {
        if !self.is_root {
            // After a bubbled-up rollback the frames are already gone; the
            // child hands up the failed sentinel like the root would.
            return Ok(self
                .inner
                .frames
                .pop_merge()
                .unwrap_or_else(|_| ModelUpdateResult::failed()));
        }

        if !self.is_open() {
            // Rolled back or closed under us; nothing to finalize.
            self.inner.frames.clear();
            return Ok(ModelUpdateResult::failed());
        }
        let mut aggregate = self.inner.frames.pop_discard()?;

        let mut delta = aggregate.patch.clone();
        let mut rounds = 0usize;
        loop {
            if delta.is_empty() {
                break;
            }
            let triggered = self
                .inner
                .triggers
                .get_triggers(&self.inner.model_uri, &delta);
            if triggered.is_none() {
                break;
            }
            rounds += 1;
            if rounds > self.inner.config.max_trigger_rounds {
                let err = GateError::trigger_failed(format!(
                    "no quiescence after {} trigger rounds",
                    self.inner.config.max_trigger_rounds
                ));
                self.auto_rollback(&err).await;
                return Ok(ModelUpdateResult::failed());
            }
            match self.perform_triggers(triggered).await {
                Ok(result) => {
                    delta = result.patch.clone();
                    aggregate.merge(result);
                }
                Err(err) => {
                    self.auto_rollback(&err).await;
                    return Ok(ModelUpdateResult::failed());
                }
            }
        }

        let close = TransactionMessage::close(&self.inner.model_uri);
        match self.inner.socket.send_terminator(close).await {
            Ok(true) => {
                tracing::info!(
                    model_uri = %self.inner.model_uri,
                    uuid = %self.inner.uuid,
                    operations = aggregate.patch.len(),
                    success = aggregate.success,
                    "Committed transaction"
                );
                Ok(aggregate)
            }
            // Closed under us before the terminator went out.
            Ok(false) => Ok(ModelUpdateResult::failed()),
            Err(err) => {
                self.auto_rollback(&err).await;
                Ok(ModelUpdateResult::failed())
            }
        }
    }

    /// Abort the session.
    ///
    /// Best-effort and idempotent: the `roll-back` message is sent only if
    /// the socket is still open, send failures are logged rather than
    /// raised, and every frame is discarded. Always returns the failed
    /// sentinel. On a child handle this ends the entire session.
    pub async fn rollback(&self, reason: impl Into<String>) -> ModelUpdateResult {
        let reason = reason.into();
        let message = TransactionMessage::roll_back(&self.inner.model_uri, reason.clone());
        match self.inner.socket.send_terminator(message).await {
            Ok(true) => {
                tracing::info!(
                    model_uri = %self.inner.model_uri,
                    uuid = %self.inner.uuid,
                    reason = %reason,
                    "Rolled back transaction"
                );
            }
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(error = %err, "Best-effort roll-back send failed");
            }
        }
        self.inner.frames.clear();
        ModelUpdateResult::failed()
    }

    /// Run one round of triggered edits in its own frame
    async fn perform_triggers(&self, triggered: TriggeredEdit) -> Result<ModelUpdateResult> {
        self.inner.frames.push();
        let outcome = match triggered {
            TriggeredEdit::None => Ok(true),
            TriggeredEdit::Patch(patch) => self.apply_patch(patch).await.map(|_| true),
            TriggeredEdit::Function(function) => Ok(function.run(self).await),
        };
        match outcome {
            Ok(true) => self.inner.frames.pop_merge(),
            Ok(false) => {
                let _ = self.inner.frames.pop_discard();
                Err(GateError::trigger_failed(
                    "trigger function reported failure",
                ))
            }
            Err(err) => {
                let _ = self.inner.frames.pop_discard();
                Err(err)
            }
        }
    }

    /// Send one edit on the wire and fold its reply into the current frame
    async fn send_edit(
        &self,
        modeluri: &ModelUri,
        edit: CommandOrPatch,
    ) -> Result<ModelUpdateResult> {
        let message = TransactionMessage::execute(modeluri, &edit)?;
        match self
            .inner
            .socket
            .send_and_recv(message, &self.inner.config)
            .await
        {
            Ok(reply) => {
                let result = reply.to_update_result();
                self.inner.frames.merge_into_top(result.clone());
                Ok(result)
            }
            Err(err) => {
                self.auto_rollback(&err).await;
                Err(err)
            }
        }
    }

    /// Roll the session back in reaction to a failure
    async fn auto_rollback(&self, reason: &GateError) {
        tracing::warn!(
            model_uri = %self.inner.model_uri,
            error = %reason,
            "Transaction failed, rolling back"
        );
        let _ = self.rollback(reason.to_string()).await;
    }
}

#[async_trait]
impl Executor for TransactionContext {
    fn model_uri(&self) -> &ModelUri {
        TransactionContext::model_uri(self)
    }

    async fn execute(&self, modeluri: &ModelUri, command: Value) -> Result<ModelUpdateResult> {
        TransactionContext::execute(self, modeluri, command).await
    }

    async fn apply_patch(&self, patch: Vec<Operation>) -> Result<ModelUpdateResult> {
        TransactionContext::apply_patch(self, patch).await
    }

    fn open_transaction(&self) -> TransactionContext {
        TransactionContext::open_transaction(self)
    }
}
