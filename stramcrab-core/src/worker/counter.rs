use super::*;

/// Built-in operator counting the windows it has seen close.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowCounter {
    pub windows_closed: u64,
    pub last_closed: Option<WindowId>,
    #[serde(skip)]
    open: Option<WindowId>,
}

impl Operator for WindowCounter {
    fn begin_window(&mut self, window_id: WindowId) -> Result<()> {
        self.open = Some(window_id);
        Ok(())
    }

    fn end_window(&mut self) -> Result<()> {
        let window_id = self
            .open
            .take()
            .ok_or_else(|| anyhow!("window counter ended with no open window"))?;
        self.windows_closed += 1;
        self.last_closed = Some(window_id);
        Ok(())
    }

    fn snapshot_state(&self) -> Result<Vec<u8>> {
        bincode::serialize(self).context("failed to serialize window counter")
    }

    fn restore_state(&mut self, data: &[u8]) -> Result<()> {
        *self = bincode::deserialize(data).context("failed to deserialize window counter")?;
        Ok(())
    }
}
