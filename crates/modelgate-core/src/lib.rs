//! Modelgate Core
//!
//! Shared vocabulary for the modelgate gateway: model identifiers, the
//! transaction wire envelope spoken with the upstream model server, update
//! results and their merge rules, and the unified error type.
//!
//! This crate is deliberately free of IO. Everything that touches a socket
//! lives in `modelgate-upstream`, `modelgate-transact`, or
//! `modelgate-gateway`.

#![forbid(unsafe_code)]

pub mod errors;
pub mod protocol;
pub mod update;
pub mod uri;

pub use errors::{GateError, Result};
pub use protocol::{CommandOrPatch, MessageKind, TransactionMessage};
pub use update::{ModelUpdateResult, Operation};
pub use uri::ModelUri;
