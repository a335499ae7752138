//! Nested edit frames
//!
//! Each level of command or trigger expansion keeps its own aggregated
//! update result. The stack bridges the recursive caller-facing API and the
//! flat wire: replies merge into the top frame, and a popped frame folds
//! into its parent so every level observes the union of edits performed
//! below it.

use modelgate_core::{GateError, ModelUpdateResult, Result};
use std::sync::Mutex;

/// Stack of aggregated update results, one per open edit level
///
/// Shared by a root transaction and its nested children. Mutation happens
/// only from the single writer driving the transaction; the mutex is never
/// held across an await point.
#[derive(Default)]
pub struct FrameStack {
    frames: Mutex<Vec<ModelUpdateResult>>,
}

impl FrameStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Push a fresh frame with the empty aggregate
    pub fn push(&self) {
        self.frames
            .lock()
            .expect("frame stack poisoned")
            .push(ModelUpdateResult::empty());
    }

    /// Pop the top frame, folding its aggregate into the parent frame.
    ///
    /// Returns the popped aggregate. Popping an empty stack is a programmer
    /// error in the transaction machinery, surfaced as an internal error.
    pub fn pop_merge(&self) -> Result<ModelUpdateResult> {
        let mut frames = self.frames.lock().expect("frame stack poisoned");
        let popped = frames
            .pop()
            .ok_or_else(|| GateError::internal("popped an empty frame stack"))?;
        if let Some(parent) = frames.last_mut() {
            parent.merge(popped.clone());
        }
        Ok(popped)
    }

    /// Pop the top frame and discard its aggregate from the parent's view
    pub fn pop_discard(&self) -> Result<ModelUpdateResult> {
        self.frames
            .lock()
            .expect("frame stack poisoned")
            .pop()
            .ok_or_else(|| GateError::internal("popped an empty frame stack"))
    }

    /// Fold a single edit result into the top frame, if one is open
    pub fn merge_into_top(&self, result: ModelUpdateResult) {
        let mut frames = self.frames.lock().expect("frame stack poisoned");
        if let Some(top) = frames.last_mut() {
            top.merge(result);
        }
    }

    /// Snapshot of the current top frame
    pub fn top(&self) -> Option<ModelUpdateResult> {
        self.frames
            .lock()
            .expect("frame stack poisoned")
            .last()
            .cloned()
    }

    /// Number of open frames
    pub fn depth(&self) -> usize {
        self.frames.lock().expect("frame stack poisoned").len()
    }

    /// Drop every frame; used by rollback
    pub fn clear(&self) {
        self.frames.lock().expect("frame stack poisoned").clear();
    }
}
