use super::*;

/// What happened at a window boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    /// Stateless operator; the store was not touched.
    Skipped,
    Saved { window_id: WindowId, bytes: usize },
}

/// Persists operator state at window boundaries.
///
/// Store failures are returned as-is and never retried.
pub struct CheckpointTrigger<S: StateStore + ?Sized> {
    store: Arc<S>,
}

impl<S: StateStore + ?Sized> CheckpointTrigger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn on_window_boundary(
        &self,
        operator: &dyn Operator,
        operator_id: OperatorId,
        window_id: WindowId,
        stateless: bool,
    ) -> Result<CheckpointOutcome> {
        if stateless {
            return Ok(CheckpointOutcome::Skipped);
        }
        let state = operator.snapshot_state()?;
        let bytes = state.len();
        self.store.save(state, operator_id, window_id)?;
        tracing::debug!(
            "checkpointed operator {} at {} ({} bytes)",
            operator_id,
            window_id,
            bytes
        );
        Ok(CheckpointOutcome::Saved { window_id, bytes })
    }
}

impl<S: StateStore + ?Sized> Clone for CheckpointTrigger<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}
