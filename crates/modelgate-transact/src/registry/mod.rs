//! Provider registries
//!
//! Plug-ins extend the transaction core through two read-mostly registries:
//! command providers substitute or expand custom command types, and trigger
//! providers derive follow-up edits from just-applied deltas at commit time.

mod command;
mod trigger;

pub use command::{CommandProvider, CommandProviderRegistry, ProvidedEdit};
pub use trigger::{TriggerProvider, TriggerProviderRegistry, TriggeredEdit};
