use super::*;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerRecord {
    pub host: String,
    /// Incarnation that last accepted a registration from this container.
    pub registered_in: u64,
    pub errors_reported: u64,
}

/// Everything the coordinator must not lose across restarts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorState {
    /// Bumped on every open.
    pub incarnation: u64,
    pub containers: BTreeMap<ContainerId, ContainerRecord>,
    /// Latest checkpointed window per operator instance.
    pub checkpoints: BTreeMap<(ContainerId, OperatorId), WindowId>,
}

impl Versioned for CoordinatorState {
    const SCHEMA: &'static str = "coordinator-state";
    const VERSION: u32 = 2;
}

impl CoordinatorState {
    /// Oldest window every operator instance has checkpointed; checkpoints before it
    /// are no longer needed for recovery.
    pub fn committed_window(&self) -> Option<WindowId> {
        self.checkpoints.values().min().copied()
    }
}

/// A journaled state mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JournalEntry {
    ContainerRegistered {
        container_id: ContainerId,
        host: String,
        incarnation: u64,
    },
    CheckpointReported {
        container_id: ContainerId,
        operator_id: OperatorId,
        window_id: WindowId,
    },
    ErrorReported {
        container_id: ContainerId,
        operator_id: Option<OperatorId>,
        message: String,
    },
}

impl JournalEntry {
    pub fn apply(&self, state: &mut CoordinatorState) {
        match self {
            JournalEntry::ContainerRegistered {
                container_id,
                host,
                incarnation,
            } => {
                let record = state
                    .containers
                    .entry(container_id.clone())
                    .or_insert_with(|| ContainerRecord {
                        host: host.clone(),
                        registered_in: *incarnation,
                        errors_reported: 0,
                    });
                record.host = host.clone();
                record.registered_in = *incarnation;
            }
            JournalEntry::CheckpointReported {
                container_id,
                operator_id,
                window_id,
            } => {
                let latest = state
                    .checkpoints
                    .entry((container_id.clone(), *operator_id))
                    .or_insert(*window_id);
                if *window_id > *latest {
                    *latest = *window_id;
                }
            }
            JournalEntry::ErrorReported { container_id, .. } => {
                if let Some(record) = state.containers.get_mut(container_id) {
                    record.errors_reported += 1;
                }
            }
        }
    }
}
