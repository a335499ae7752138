//! Transaction manager
//!
//! Tracks at most one root transaction per model. A second open on a model
//! with a live session yields a nested child of the existing root; a fresh
//! open POSTs to upstream for a transaction endpoint, dials it, and
//! registers the context in the session map until its socket closes.

use crate::config::TransactionConfig;
use crate::context::TransactionContext;
use crate::registry::{CommandProviderRegistry, TriggerProviderRegistry};
use modelgate_core::{ModelUri, Result};
use modelgate_upstream::UpstreamClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Creates and tracks transactional edit sessions
#[derive(Clone)]
pub struct TransactionManager {
    upstream: Arc<UpstreamClient>,
    commands: CommandProviderRegistry,
    triggers: TriggerProviderRegistry,
    config: TransactionConfig,
    transactions: Arc<Mutex<HashMap<ModelUri, TransactionContext>>>,
}

impl TransactionManager {
    /// Create a manager using the given upstream client and registries
    pub fn new(
        upstream: Arc<UpstreamClient>,
        commands: CommandProviderRegistry,
        triggers: TriggerProviderRegistry,
        config: TransactionConfig,
    ) -> Self {
        Self {
            upstream,
            commands,
            triggers,
            config,
            transactions: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The command provider registry plug-ins register into
    pub fn commands(&self) -> &CommandProviderRegistry {
        &self.commands
    }

    /// The trigger provider registry plug-ins register into
    pub fn triggers(&self) -> &TriggerProviderRegistry {
        &self.triggers
    }

    /// Open a transaction on the given model.
    ///
    /// The session map is locked only to check and update it, never across
    /// the network dialogue with upstream, so transactions on distinct
    /// models open in parallel. Two racing opens on one model still never
    /// both keep a root: the loser of the race rolls its session back and
    /// receives a nested child of the winner instead.
    pub async fn open_transaction(&self, modeluri: &ModelUri) -> Result<TransactionContext> {
        if let Some(existing) = self.live_session(modeluri).await {
            tracing::debug!(model_uri = %modeluri, "Joining existing transaction as nested");
            return Ok(existing.open_transaction());
        }

        let client_id = Uuid::new_v4().to_string();
        let transaction_uri = self
            .upstream
            .create_transaction(modeluri, &client_id)
            .await?;
        let ws_url = self.upstream.to_ws_url(&transaction_uri)?;
        let context = TransactionContext::open(
            modeluri.clone(),
            transaction_uri,
            &ws_url,
            self.commands.clone(),
            self.triggers.clone(),
            self.config.clone(),
        )
        .await?;

        // Re-check now that the dial is done: a racing open on the same
        // model may have installed a root in the meantime.
        if let Some(existing) = self.try_install(modeluri, &context).await {
            tracing::debug!(
                model_uri = %modeluri,
                "Lost open race, joining the winning transaction as nested"
            );
            let nested = existing.open_transaction();
            context.rollback("superseded by a concurrent open").await;
            return Ok(nested);
        }

        // The close hook removes the map entry, but only while it still
        // refers to this session; a fresh transaction that already took the
        // slot must not be clobbered.
        let map = self.transactions.clone();
        let key = modeluri.clone();
        let uuid = context.uuid().to_string();
        context.on_close(Box::new(move || {
            tokio::spawn(async move {
                let mut transactions = map.lock().await;
                let matches = transactions
                    .get(&key)
                    .map(|current| current.uuid() == uuid)
                    .unwrap_or(false);
                if matches {
                    transactions.remove(&key);
                    tracing::debug!(model_uri = %key, "Transaction session removed");
                }
            });
        }));

        Ok(context)
    }

    /// Look up the live root for a model, dropping any dead entry whose
    /// close hook has not run yet
    async fn live_session(&self, modeluri: &ModelUri) -> Option<TransactionContext> {
        let mut transactions = self.transactions.lock().await;
        match transactions.get(modeluri) {
            Some(existing) if existing.is_open() => Some(existing.clone()),
            Some(_) => {
                transactions.remove(modeluri);
                None
            }
            None => None,
        }
    }

    /// Install the freshly opened root unless a live one beat it to the
    /// slot; returns the winner when this context lost the race
    async fn try_install(
        &self,
        modeluri: &ModelUri,
        context: &TransactionContext,
    ) -> Option<TransactionContext> {
        let mut transactions = self.transactions.lock().await;
        match transactions.get(modeluri) {
            Some(existing) if existing.is_open() => Some(existing.clone()),
            _ => {
                transactions.insert(modeluri.clone(), context.clone());
                None
            }
        }
    }

    /// Whether a live root transaction exists for the model
    pub async fn is_active(&self, modeluri: &ModelUri) -> bool {
        self.transactions
            .lock()
            .await
            .get(modeluri)
            .map(TransactionContext::is_open)
            .unwrap_or(false)
    }

    /// Number of tracked root transactions
    pub async fn active_count(&self) -> usize {
        self.transactions.lock().await.len()
    }
}
