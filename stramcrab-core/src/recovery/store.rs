use super::*;

const DIRECTORY_RECOVERY: &str = "recovery";
const FILE_LOG: &str = "log";
const FILE_LOG_BACKUP: &str = "log0";
const FILE_LOG_COMBINED: &str = "log.combined";
const FILE_SNAPSHOT: &str = "snapshot";
const FILE_SNAPSHOT_BACKUP: &str = "snapshot0";
const FILE_POINTER: &str = "heartbeatUri";
const FILE_POINTER_TMP: &str = "heartbeatUri.tmp";

/// Journal + snapshot persistence of coordinator state.
///
/// The intended sequence is `restore`, replay `read_log`, then alternate
/// `rotate_log` and `save`. A crash anywhere in that sequence is repaired by
/// the next `restore`.
pub trait RecoveryHandler: Send + Sync {
    /// Move the current log aside and start a fresh one.
    fn rotate_log(&self) -> Result<LogWriter>;

    /// Journal written since the last snapshot.
    fn read_log(&self) -> Result<LogReader>;

    /// Replace the snapshot and drop the rotated log it supersedes.
    fn save(&self, state: &[u8]) -> Result<()>;

    /// Repair an interrupted rotation or save and return the snapshot.
    fn restore(&self) -> Result<Option<Vec<u8>>>;

    fn save_state<S: Versioned>(&self, state: &S) -> Result<()>
    where
        Self: Sized,
    {
        self.save(&encode_snapshot(state)?)
    }

    fn restore_state<S: Versioned>(&self) -> Result<Option<S>>
    where
        Self: Sized,
    {
        self.restore()?
            .map(|bytes| decode_snapshot(&bytes))
            .transpose()
    }
}

/// [`RecoveryHandler`] over `<app_dir>/recovery/` on the local file system.
#[derive(Debug, Clone)]
pub struct FsRecoveryStore {
    dir: PathBuf,
    log: PathBuf,
    log_backup: PathBuf,
    snapshot: PathBuf,
    snapshot_backup: PathBuf,
    pointer: PathBuf,
}

impl FsRecoveryStore {
    pub fn new(app_dir: impl AsRef<Path>) -> Result<Self> {
        let dir = app_dir.as_ref().join(DIRECTORY_RECOVERY);
        fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create recovery directory {}", dir.display()))?;
        Ok(Self {
            log: dir.join(FILE_LOG),
            log_backup: dir.join(FILE_LOG_BACKUP),
            snapshot: dir.join(FILE_SNAPSHOT),
            snapshot_backup: dir.join(FILE_SNAPSHOT_BACKUP),
            pointer: dir.join(FILE_POINTER),
            dir,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Atomically replace the pointer record.
    pub fn write_pointer(&self, uri: &ConnectUri) -> Result<()> {
        let tmp = self.dir.join(FILE_POINTER_TMP);
        write_synced(&tmp, uri.to_string().as_bytes())?;
        rename(&tmp, &self.pointer)?;
        sync_dir(&self.dir)?;
        tracing::debug!("connect address {} written to {}", uri, self.pointer.display());
        Ok(())
    }

    pub fn read_pointer(&self) -> Result<ConnectUri> {
        let text = fs::read_to_string(&self.pointer)
            .with_context(|| format!("failed to read pointer {}", self.pointer.display()))?;
        let uri: ConnectUri = text.parse()?;
        tracing::debug!("connect address {} from {}", uri, self.pointer.display());
        Ok(uri)
    }
}

impl RecoveryHandler for FsRecoveryStore {
    fn rotate_log(&self) -> Result<LogWriter> {
        if self.log_backup.exists() {
            return Err(RecoveryError::LogBackupPresent(self.log_backup.clone()).into());
        }
        if self.log.exists() {
            tracing::debug!("creating log backup {}", self.log_backup.display());
            rename(&self.log, &self.log_backup)?;
        }
        tracing::info!("creating {}", self.log.display());
        let writer = LogWriter::create(self.log.clone())?;
        sync_dir(&self.dir)?;
        Ok(writer)
    }

    fn read_log(&self) -> Result<LogReader> {
        if self.log_backup.exists() {
            return Err(RecoveryError::LogBackupPresent(self.log_backup.clone()).into());
        }
        if self.log.exists() {
            tracing::debug!("opening existing log {}", self.log.display());
            LogReader::open(&self.log)
        } else {
            tracing::debug!("no existing log {}", self.log.display());
            Ok(LogReader::empty())
        }
    }

    fn save(&self, state: &[u8]) -> Result<()> {
        if self.snapshot_backup.exists() {
            return Err(RecoveryError::SnapshotBackupPresent(self.snapshot_backup.clone()).into());
        }
        if self.snapshot.exists() {
            tracing::debug!(
                "backup {} to {}",
                self.snapshot.display(),
                self.snapshot_backup.display()
            );
            rename(&self.snapshot, &self.snapshot_backup)?;
        }
        tracing::debug!("writing snapshot to {}", self.snapshot.display());
        write_synced(&self.snapshot, state)?;
        remove_if_exists(&self.snapshot_backup)?;
        remove_if_exists(&self.log_backup)?;
        sync_dir(&self.dir)
    }

    fn restore(&self) -> Result<Option<Vec<u8>>> {
        if self.snapshot_backup.exists() {
            tracing::warn!(
                "incomplete snapshot, reverting to {}",
                self.snapshot_backup.display()
            );
            rename(&self.snapshot_backup, &self.snapshot)?;

            let combined = self.dir.join(FILE_LOG_COMBINED);
            let mut out = File::create(&combined)
                .with_context(|| format!("failed to create {}", combined.display()))?;
            for part in [&self.log_backup, &self.log] {
                if !part.exists() {
                    continue;
                }
                let mut input = File::open(part)
                    .with_context(|| format!("failed to open {}", part.display()))?;
                io::copy(&mut input, &mut out).with_context(|| {
                    format!("failed to copy {} into {}", part.display(), combined.display())
                })?;
            }
            out.sync_all()
                .with_context(|| format!("failed to sync {}", combined.display()))?;
            drop(out);
            rename(&combined, &self.log)?;
            remove_if_exists(&self.log_backup)?;
            sync_dir(&self.dir)?;
        } else if self.log_backup.exists() {
            tracing::warn!(
                "found {}, snapshot after log rotation did not complete",
                self.log_backup.display()
            );
            rename(&self.log_backup, &self.log)?;
            sync_dir(&self.dir)?;
        }

        if !self.snapshot.exists() {
            tracing::debug!("no existing snapshot");
            return Ok(None);
        }
        tracing::debug!("reading snapshot {}", self.snapshot.display());
        fs::read(&self.snapshot)
            .map(Some)
            .with_context(|| format!("failed to read snapshot {}", self.snapshot.display()))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut file =
        File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
    file.write_all(bytes)
        .and_then(|()| file.sync_all())
        .with_context(|| format!("failed to write {}", path.display()))
}

fn rename(from: &Path, to: &Path) -> Result<()> {
    fs::rename(from, to)
        .with_context(|| format!("failed to rename {} to {}", from.display(), to.display()))
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).with_context(|| format!("failed to remove {}", path.display())),
    }
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> Result<()> {
    File::open(dir)
        .and_then(|d| d.sync_all())
        .with_context(|| format!("failed to sync directory {}", dir.display()))
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
