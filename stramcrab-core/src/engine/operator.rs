use super::*;

/// Windowed operator callbacks.
pub trait Operator: Send {
    fn begin_window(&mut self, window_id: WindowId) -> Result<()>;

    fn end_window(&mut self) -> Result<()>;

    /// Snapshot operator state into bytes.
    ///
    /// Stateless operators can keep the default empty snapshot.
    fn snapshot_state(&self) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }

    /// Restore operator state from bytes.
    ///
    /// Stateless operators can keep the default no-op implementation.
    fn restore_state(&mut self, _data: &[u8]) -> Result<()> {
        Ok(())
    }
}
