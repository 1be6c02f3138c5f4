use super::*;

/// Recovery directory states that must never be observed by the operation
/// that found them. None of these is retried.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    #[error("log backup {} present, restore state before using the log", .0.display())]
    LogBackupPresent(PathBuf),
    #[error("snapshot backup {} present, restore state before saving", .0.display())]
    SnapshotBackupPresent(PathBuf),
    #[error("snapshot holds {found} v{found_version}, expected {expected} v{expected_version}")]
    SchemaMismatch {
        expected: String,
        expected_version: u32,
        found: String,
        found_version: u32,
    },
}
