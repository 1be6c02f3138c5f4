use super::*;

pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Application directory; recovery files live under `recovery/`.
    pub app_dir: PathBuf,
    /// Advertised to workers through the pointer record.
    pub tunables: ChannelTunables,
    /// Period of journal compaction while serving.
    pub checkpoint_interval: Duration,
}

impl CoordinatorConfig {
    pub fn new(app_dir: impl Into<PathBuf>) -> Self {
        Self {
            app_dir: app_dir.into(),
            tunables: ChannelTunables::default(),
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
        }
    }
}

struct CoordinatorInner {
    state: CoordinatorState,
    journal: LogWriter,
    last_heartbeat: HashMap<ContainerId, EpochMillis>,
    /// Set once compaction fails; the recovery files then need a reopen.
    halted: Option<String>,
}

/// Journals every state change before acknowledging it, so a restarted
/// coordinator resumes from snapshot plus journal.
pub struct Coordinator {
    config: CoordinatorConfig,
    store: FsRecoveryStore,
    inner: Mutex<CoordinatorInner>,
}

impl Coordinator {
    /// Recover state from the application directory and start a new
    /// incarnation.
    pub fn open(config: CoordinatorConfig) -> Result<Self> {
        let store = FsRecoveryStore::new(&config.app_dir)?;
        let mut state = store
            .restore_state::<CoordinatorState>()?
            .unwrap_or_default();

        let mut replayed = 0usize;
        let mut log = store.read_log()?;
        while let Some(entry) = log.next_record::<JournalEntry>()? {
            entry.apply(&mut state);
            replayed += 1;
        }
        drop(log);

        state.incarnation += 1;
        let journal = store.rotate_log()?;
        store.save_state(&state)?;
        tracing::info!(
            "coordinator incarnation {} recovered {} containers, replayed {} journal entries",
            state.incarnation,
            state.containers.len(),
            replayed
        );

        Ok(Self {
            config,
            store,
            inner: Mutex::new(CoordinatorInner {
                state,
                journal,
                last_heartbeat: HashMap::new(),
                halted: None,
            }),
        })
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn store(&self) -> &FsRecoveryStore {
        &self.store
    }

    pub fn incarnation(&self) -> Result<u64> {
        Ok(self.lock()?.state.incarnation)
    }

    pub fn state(&self) -> Result<CoordinatorState> {
        Ok(self.lock()?.state.clone())
    }

    pub fn committed_window(&self) -> Result<Option<WindowId>> {
        Ok(self.lock()?.state.committed_window())
    }

    pub fn last_heartbeat(&self, container_id: &str) -> Result<Option<EpochMillis>> {
        Ok(self.lock()?.last_heartbeat.get(container_id).copied())
    }

    /// Journal `entry` durably, then apply it.
    pub fn record(&self, entry: JournalEntry) -> Result<()> {
        let mut inner = self.lock()?;
        ensure_running(&inner)?;
        inner.journal.append(&entry)?;
        inner.journal.flush()?;
        entry.apply(&mut inner.state);
        Ok(())
    }

    /// Compact: snapshot the current state and start an empty journal.
    ///
    /// A failure leaves the recovery files mid-compaction. The coordinator
    /// halts: later records and compactions fail until it is reopened.
    pub fn checkpoint(&self) -> Result<()> {
        let mut inner = self.lock()?;
        ensure_running(&inner)?;
        if let Err(err) = self.compact(&mut inner) {
            inner.halted = Some(format!("{err:#}"));
            return Err(err);
        }
        tracing::debug!(
            "coordinator state checkpointed at incarnation {}",
            inner.state.incarnation
        );
        Ok(())
    }

    fn compact(&self, inner: &mut CoordinatorInner) -> Result<()> {
        let journal = self.store.rotate_log()?;
        let previous = std::mem::replace(&mut inner.journal, journal);
        previous.close()?;
        self.store.save_state(&inner.state)
    }

    pub fn is_halted(&self) -> Result<bool> {
        Ok(self.lock()?.halted.is_some())
    }

    /// Advertise `addr` to workers.
    pub fn publish(&self, addr: SocketAddr) -> Result<ConnectUri> {
        let uri = ConnectUri::from_socket_addr(addr, self.config.tunables);
        self.store.write_pointer(&uri)?;
        tracing::info!("coordinator address published as {}", uri);
        Ok(uri)
    }

    /// Publish the listener address, then serve until `shutdown`, compacting
    /// every `checkpoint_interval`. State is compacted once more on the way
    /// out.
    ///
    /// A failed compaction stops the server and is returned.
    pub async fn serve<L: ControlListener>(
        self: Arc<Self>,
        listener: L,
        shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        self.publish(listener.local_addr()?)?;
        let (halt, halted) = watch::channel(false);
        let compaction = Arc::clone(&self).spawn_checkpoint_loop(shutdown, halt);
        let served = ControlServer::serve(listener, Arc::clone(&self), halted).await;
        if served.is_err() {
            compaction.abort();
        }
        match compaction.await {
            Ok(compacted) => compacted?,
            Err(err) if err.is_cancelled() => {}
            Err(err) => bail!("coordinator checkpoint loop panicked: {err}"),
        }
        served?;
        self.checkpoint()
    }

    /// Compact every `checkpoint_interval` until `shutdown`. `halt` is raised
    /// when the loop ends, whether on shutdown or on a failed compaction.
    pub fn spawn_checkpoint_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
        halt: watch::Sender<bool>,
    ) -> JoinHandle<Result<()>> {
        let interval = self.config.checkpoint_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            let outcome = loop {
                if *shutdown.borrow() {
                    break Ok(());
                }
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.checkpoint() {
                            tracing::error!(
                                "coordinator checkpoint failed, stopping: {:#}",
                                err
                            );
                            break Err(err);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break Ok(());
                        }
                    }
                }
            };
            let _ = halt.send(true);
            outcome
        })
    }

    fn handle(&self, request: ControlRequest) -> Result<ControlResponse> {
        match request {
            ControlRequest::Register(registration) => {
                let incarnation = self.incarnation()?;
                tracing::info!(
                    "container {} registered from {}",
                    registration.container_id,
                    registration.host
                );
                self.record(JournalEntry::ContainerRegistered {
                    container_id: registration.container_id,
                    host: registration.host,
                    incarnation,
                })?;
                Ok(ControlResponse::Registered(RegistrationAck { incarnation }))
            }
            ControlRequest::Heartbeat(heartbeat) => {
                let mut inner = self.lock()?;
                if !inner.state.containers.contains_key(&heartbeat.container_id) {
                    tracing::warn!(
                        "heartbeat from unregistered container {}",
                        heartbeat.container_id
                    );
                }
                inner
                    .last_heartbeat
                    .insert(heartbeat.container_id, heartbeat.sent_millis);
                Ok(ControlResponse::Heartbeat(HeartbeatAck {
                    incarnation: inner.state.incarnation,
                    committed_window: inner.state.committed_window(),
                }))
            }
            ControlRequest::ReportCheckpoint(report) => {
                tracing::debug!(
                    "container {} checkpointed operator {} at {}",
                    report.container_id,
                    report.operator_id,
                    report.window_id
                );
                self.record(JournalEntry::CheckpointReported {
                    container_id: report.container_id,
                    operator_id: report.operator_id,
                    window_id: report.window_id,
                })?;
                Ok(ControlResponse::Ack)
            }
            ControlRequest::ReportError(report) => {
                tracing::error!(
                    "container {} operator {:?} failed: {}",
                    report.container_id,
                    report.operator_id,
                    report.message
                );
                self.record(JournalEntry::ErrorReported {
                    container_id: report.container_id,
                    operator_id: report.operator_id,
                    message: report.message,
                })?;
                Ok(ControlResponse::Ack)
            }
            ControlRequest::Log(message) => {
                let container = &message.container_id;
                let text = &message.message;
                match message.level {
                    LogLevel::Debug => tracing::debug!("[{}] {}", container, text),
                    LogLevel::Info => tracing::info!("[{}] {}", container, text),
                    LogLevel::Warn => tracing::warn!("[{}] {}", container, text),
                    LogLevel::Error => tracing::error!("[{}] {}", container, text),
                }
                Ok(ControlResponse::Ack)
            }
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, CoordinatorInner>> {
        self.inner
            .lock()
            .map_err(|_| anyhow!("coordinator state lock poisoned"))
    }
}

#[async_trait]
impl ControlEndpoint for Coordinator {
    async fn call(&self, request: ControlRequest) -> Result<ControlResponse, CallError> {
        let name = request.name();
        self.handle(request)
            .map_err(|err| CallError::other(format!("{name} failed: {err:#}")))
    }
}

fn ensure_running(inner: &CoordinatorInner) -> Result<()> {
    match &inner.halted {
        Some(reason) => bail!("coordinator halted after failed checkpoint: {reason}"),
        None => Ok(()),
    }
}
