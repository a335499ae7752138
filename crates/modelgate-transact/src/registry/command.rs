//! Command provider registry
//!
//! Maps a command type tag to the plug-in that knows how to handle it. A
//! provider either substitutes a different command or patch for the one the
//! client sent, or expands it into a transaction function that issues any
//! number of further edits.

use crate::executor::TransactionFunction;
use modelgate_core::{CommandOrPatch, ModelUri};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// What a command provider turns a command into
pub enum ProvidedEdit {
    /// Send this command or patch to upstream instead, without recursion
    Substitute(CommandOrPatch),
    /// Run this function inside a nested edit frame
    Function(Arc<dyn TransactionFunction>),
}

/// Plug-in that handles one or more command types
pub trait CommandProvider: Send + Sync {
    /// Produce the edit to perform for the given command
    fn provide(&self, modeluri: &ModelUri, command: &Value) -> ProvidedEdit;
}

/// Registry mapping command type tags to their providers
///
/// Read-mostly: lookups happen on every `execute`, registration only at
/// plug-in initialization. The first provider registered for a type wins;
/// later registrations for the same type are ignored.
#[derive(Clone, Default)]
pub struct CommandProviderRegistry {
    providers: Arc<RwLock<HashMap<String, Arc<dyn CommandProvider>>>>,
}

impl CommandProviderRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider for a command type
    pub fn register(&self, command_type: impl Into<String>, provider: Arc<dyn CommandProvider>) {
        let command_type = command_type.into();
        let mut providers = self.providers.write().expect("command registry poisoned");
        if providers.contains_key(&command_type) {
            tracing::warn!(
                command_type = %command_type,
                "Ignoring duplicate command provider registration"
            );
            return;
        }
        tracing::debug!(command_type = %command_type, "Registered command provider");
        providers.insert(command_type, provider);
    }

    /// Whether any provider handles the given command type
    pub fn has_provider(&self, command_type: &str) -> bool {
        self.providers
            .read()
            .expect("command registry poisoned")
            .contains_key(command_type)
    }

    /// Resolve the command through its provider, if one is registered.
    ///
    /// The command's type tag is read from its `type` field; commands
    /// without one never match a provider and go to upstream as-is.
    pub fn get_commands(&self, modeluri: &ModelUri, command: &Value) -> Option<ProvidedEdit> {
        let command_type = command.get("type").and_then(Value::as_str)?;
        let provider = self
            .providers
            .read()
            .expect("command registry poisoned")
            .get(command_type)
            .cloned()?;
        Some(provider.provide(modeluri, command))
    }
}
