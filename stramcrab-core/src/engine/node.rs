use super::*;

/// Per-operator execution settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub operator_id: OperatorId,
    /// Stateless operators are never checkpointed.
    pub stateless: bool,
    /// Checkpoint every N closed windows.
    pub checkpoint_window_count: u32,
}

impl NodeConfig {
    pub fn new(operator_id: OperatorId) -> Self {
        Self {
            operator_id,
            ..Self::default()
        }
    }
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            operator_id: 0,
            stateless: false,
            checkpoint_window_count: 1,
        }
    }
}

/// Drives one [`Operator`] from the control signals of its reservoir.
///
/// `Begin` and `End` must alternate and name the same window; a `Reset`
/// may only arrive between windows. Anything else is an out-of-sequence
/// error for this node.
pub struct OperatorNode<O: Operator, S: StateStore + ?Sized> {
    config: NodeConfig,
    operator: O,
    trigger: CheckpointTrigger<S>,
    base_seconds: Option<u32>,
    open_window: Option<WindowId>,
    last_window: Option<WindowId>,
    windows_since_checkpoint: u32,
    last_checkpoint: Option<WindowId>,
}

impl<O: Operator, S: StateStore + ?Sized> OperatorNode<O, S> {
    pub fn new(config: NodeConfig, operator: O, store: Arc<S>) -> Result<Self> {
        if config.checkpoint_window_count == 0 {
            bail!(
                "operator {}: checkpoint window count must be greater than 0",
                config.operator_id
            );
        }
        Ok(Self {
            config,
            operator,
            trigger: CheckpointTrigger::new(store),
            base_seconds: None,
            open_window: None,
            last_window: None,
            windows_since_checkpoint: 0,
            last_checkpoint: None,
        })
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn operator(&self) -> &O {
        &self.operator
    }

    pub fn open_window(&self) -> Option<WindowId> {
        self.open_window
    }

    pub fn last_checkpoint(&self) -> Option<WindowId> {
        self.last_checkpoint
    }

    /// Apply one control signal. Returns the checkpoint outcome when the
    /// signal closed a window that was due for a checkpoint.
    pub fn process(&mut self, signal: ControlSignal) -> Result<Option<CheckpointOutcome>> {
        let operator_id = self.config.operator_id;
        match signal {
            ControlSignal::Reset { base_seconds, .. } => {
                if let Some(open) = self.open_window {
                    bail!("operator {operator_id}: {signal} while window {open} is open");
                }
                self.base_seconds = Some(base_seconds);
                self.last_window = None;
                Ok(None)
            }
            ControlSignal::Begin { window_id } => {
                if let Some(open) = self.open_window {
                    bail!("operator {operator_id}: {signal} while window {open} is open");
                }
                if let Some(base) = self.base_seconds {
                    if window_id.base_seconds() != base {
                        bail!("operator {operator_id}: {signal} outside base {base}s");
                    }
                }
                if let Some(last) = self.last_window {
                    if window_id <= last {
                        bail!("operator {operator_id}: {signal} does not follow {last}");
                    }
                }
                self.operator
                    .begin_window(window_id)
                    .with_context(|| {
                        format!("operator {operator_id} failed to begin {window_id}")
                    })?;
                self.open_window = Some(window_id);
                self.last_window = Some(window_id);
                Ok(None)
            }
            ControlSignal::End { window_id } => {
                match self.open_window {
                    Some(open) if open == window_id => {}
                    Some(open) => {
                        bail!("operator {operator_id}: {signal} while window {open} is open")
                    }
                    None => bail!("operator {operator_id}: {signal} with no open window"),
                }
                self.operator
                    .end_window()
                    .with_context(|| format!("operator {operator_id} failed to end {window_id}"))?;
                self.open_window = None;
                self.windows_since_checkpoint += 1;
                if self.windows_since_checkpoint < self.config.checkpoint_window_count {
                    return Ok(None);
                }
                self.windows_since_checkpoint = 0;
                let outcome = self.trigger.on_window_boundary(
                    &self.operator,
                    operator_id,
                    window_id,
                    self.config.stateless,
                )?;
                if let CheckpointOutcome::Saved { window_id, .. } = outcome {
                    self.last_checkpoint = Some(window_id);
                }
                Ok(Some(outcome))
            }
        }
    }

    /// Process every signal currently in `reservoir`, acknowledging each
    /// once it has been applied. Returns the number processed.
    pub fn drain(&mut self, reservoir: &SweepableReservoir) -> Result<usize> {
        let mut processed = 0;
        while let Some(signal) = reservoir.sweep()? {
            self.process(signal)?;
            reservoir.remove()?;
            processed += 1;
        }
        Ok(processed)
    }

    /// Restore the operator from its latest checkpoint, if any.
    pub fn recover(&mut self) -> Result<Option<WindowId>> {
        if self.config.stateless {
            return Ok(None);
        }
        let operator_id = self.config.operator_id;
        let store = self.trigger.store();
        let Some(window_id) = store.list_window_ids(operator_id)?.last().copied() else {
            return Ok(None);
        };
        let state = store.load(operator_id, window_id)?;
        self.operator.restore_state(&state).with_context(|| {
            format!("operator {operator_id} failed to restore checkpoint {window_id}")
        })?;
        self.last_checkpoint = Some(window_id);
        tracing::info!("operator {} recovered from {}", operator_id, window_id);
        Ok(Some(window_id))
    }

    /// Delete checkpoints strictly older than `committed`. Returns the
    /// number deleted.
    pub fn purge_committed(&self, committed: WindowId) -> Result<usize> {
        let operator_id = self.config.operator_id;
        let store = self.trigger.store();
        let mut purged = 0;
        for window_id in store.list_window_ids(operator_id)? {
            if window_id >= committed {
                break;
            }
            store.delete(operator_id, window_id)?;
            purged += 1;
        }
        if purged > 0 {
            tracing::debug!(
                "operator {} purged {} checkpoints before {}",
                operator_id,
                purged,
                committed
            );
        }
        Ok(purged)
    }
}
