//! Trigger provider registry
//!
//! Triggers keep models consistent: given the patch operations a commit is
//! about to finalize, each provider may contribute follow-up edits. The
//! commit loop consults the registry repeatedly until no provider has
//! anything left to add.

use crate::executor::TransactionFunction;
use modelgate_core::{ModelUri, Operation};
use std::sync::{Arc, RwLock};

/// Follow-up edits derived from a just-applied delta
pub enum TriggeredEdit {
    /// Nothing further is required
    None,
    /// Apply this patch inside the commit loop
    Patch(Vec<Operation>),
    /// Run this function inside the commit loop
    Function(Arc<dyn TransactionFunction>),
}

impl TriggeredEdit {
    /// True when no further edits were produced
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Plug-in that derives follow-up edits from applied deltas
pub trait TriggerProvider: Send + Sync {
    /// Inspect the delta and produce any follow-up edits
    fn triggers(&self, modeluri: &ModelUri, delta: &[Operation]) -> TriggeredEdit;
}

/// Registry of trigger providers, consulted in registration order
///
/// Patch contributions from multiple providers concatenate. A provider that
/// returns a transaction function short-circuits the round: the function
/// runs first and later providers see its effects as the next round's delta.
#[derive(Clone, Default)]
pub struct TriggerProviderRegistry {
    providers: Arc<RwLock<Vec<Arc<dyn TriggerProvider>>>>,
}

impl TriggerProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a trigger provider
    pub fn register(&self, provider: Arc<dyn TriggerProvider>) {
        self.providers
            .write()
            .expect("trigger registry poisoned")
            .push(provider);
    }

    /// Collect the follow-up edits for a delta
    pub fn get_triggers(&self, modeluri: &ModelUri, delta: &[Operation]) -> TriggeredEdit {
        let providers = self
            .providers
            .read()
            .expect("trigger registry poisoned")
            .clone();
        let mut patch = Vec::new();
        for provider in providers {
            match provider.triggers(modeluri, delta) {
                TriggeredEdit::None => {}
                TriggeredEdit::Patch(ops) => patch.extend(ops),
                TriggeredEdit::Function(f) => return TriggeredEdit::Function(f),
            }
        }
        if patch.is_empty() {
            TriggeredEdit::None
        } else {
            TriggeredEdit::Patch(patch)
        }
    }
}
