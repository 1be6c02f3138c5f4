use super::*;

/// Durable operator-state storage, keyed by operator and window.
///
/// Blobs are passed by value; the store owns them after `save`.
pub trait StateStore: Send + Sync {
    fn save(&self, state: Vec<u8>, operator_id: OperatorId, window_id: WindowId) -> Result<()>;
    fn load(&self, operator_id: OperatorId, window_id: WindowId) -> Result<Vec<u8>>;
    fn delete(&self, operator_id: OperatorId, window_id: WindowId) -> Result<()>;
    /// Checkpointed windows of `operator_id`, ascending.
    fn list_window_ids(&self, operator_id: OperatorId) -> Result<Vec<WindowId>>;
}

/// In-memory state store for tests and single-process runs.
#[derive(Debug, Default)]
pub struct InMemoryStateStore {
    states: Mutex<BTreeMap<(OperatorId, WindowId), Vec<u8>>>,
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, BTreeMap<(OperatorId, WindowId), Vec<u8>>>> {
        self.states
            .lock()
            .map_err(|_| anyhow!("state store lock poisoned"))
    }
}

impl StateStore for InMemoryStateStore {
    fn save(&self, state: Vec<u8>, operator_id: OperatorId, window_id: WindowId) -> Result<()> {
        self.lock()?.insert((operator_id, window_id), state);
        Ok(())
    }

    fn load(&self, operator_id: OperatorId, window_id: WindowId) -> Result<Vec<u8>> {
        self.lock()?
            .get(&(operator_id, window_id))
            .cloned()
            .ok_or_else(|| anyhow!("no checkpoint for operator {operator_id} at {window_id}"))
    }

    fn delete(&self, operator_id: OperatorId, window_id: WindowId) -> Result<()> {
        self.lock()?.remove(&(operator_id, window_id));
        Ok(())
    }

    fn list_window_ids(&self, operator_id: OperatorId) -> Result<Vec<WindowId>> {
        Ok(self
            .lock()?
            .range((operator_id, WindowId::default())..=(operator_id, WindowId::from(u64::MAX)))
            .map(|((_, window_id), _)| *window_id)
            .collect())
    }
}

/// File-system state store: `<base>/op-<operator>/<window hex>.bin`.
#[derive(Debug, Clone)]
pub struct FsStateStore {
    base_path: PathBuf,
}

impl FsStateStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        fs::create_dir_all(&base_path).with_context(|| {
            format!(
                "failed to create state store directory {}",
                base_path.display()
            )
        })?;
        Ok(Self { base_path })
    }

    fn operator_dir(&self, operator_id: OperatorId) -> PathBuf {
        self.base_path.join(format!("op-{operator_id}"))
    }

    fn state_path(&self, operator_id: OperatorId, window_id: WindowId) -> PathBuf {
        self.operator_dir(operator_id)
            .join(format!("{:016x}.bin", window_id.as_u64()))
    }
}

impl StateStore for FsStateStore {
    fn save(&self, state: Vec<u8>, operator_id: OperatorId, window_id: WindowId) -> Result<()> {
        let dir = self.operator_dir(operator_id);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create operator dir {}", dir.display()))?;
        let path = self.state_path(operator_id, window_id);
        fs::write(&path, state)
            .with_context(|| format!("write operator state {} failed", path.display()))
    }

    fn load(&self, operator_id: OperatorId, window_id: WindowId) -> Result<Vec<u8>> {
        let path = self.state_path(operator_id, window_id);
        fs::read(&path).with_context(|| format!("read operator state {} failed", path.display()))
    }

    fn delete(&self, operator_id: OperatorId, window_id: WindowId) -> Result<()> {
        let path = self.state_path(operator_id, window_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err)
                .with_context(|| format!("delete operator state {} failed", path.display())),
        }
    }

    fn list_window_ids(&self, operator_id: OperatorId) -> Result<Vec<WindowId>> {
        let dir = self.operator_dir(operator_id);
        if !dir.exists() {
            return Ok(Vec::new());
        }
        let mut ids = Vec::new();
        for entry in
            fs::read_dir(&dir).with_context(|| format!("read_dir failed for {}", dir.display()))?
        {
            let entry = entry?;
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(hex) = name.strip_suffix(".bin") {
                if let Ok(id) = u64::from_str_radix(hex, 16) {
                    ids.push(WindowId::from(id));
                }
            }
        }
        ids.sort_unstable();
        Ok(ids)
    }
}
