use super::*;

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(50);
pub const DEFAULT_RESERVOIR_CAPACITY: usize = 1024;

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Shared application directory; operator state lives under
    /// `state/<container_id>/`.
    pub app_dir: PathBuf,
    pub container_id: ContainerId,
    pub host: String,
    pub heartbeat_interval: Duration,
    pub node: NodeConfig,
    pub window_width_millis: u32,
    pub reservoir_capacity: usize,
    /// How often the operator loop sweeps its reservoir.
    pub poll_interval: Duration,
}

impl WorkerConfig {
    pub fn new(app_dir: impl Into<PathBuf>, container_id: impl Into<ContainerId>) -> Self {
        Self {
            app_dir: app_dir.into(),
            container_id: container_id.into(),
            host: "localhost".to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            node: NodeConfig::default(),
            window_width_millis: WindowConfig::DEFAULT_WINDOW_WIDTH_MILLIS,
            reservoir_capacity: DEFAULT_RESERVOIR_CAPACITY,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Per-container state directory, so containers sharing an application
    /// directory never see each other's checkpoints.
    pub fn state_dir(&self) -> PathBuf {
        self.app_dir.join("state").join(&self.container_id)
    }

    /// The container id names a directory, so it must be a single path
    /// component.
    pub fn validate(&self) -> Result<()> {
        let id = self.container_id.as_str();
        ensure!(!id.is_empty(), "container id must not be empty");
        ensure!(
            id != "." && id != ".." && !id.contains(['/', '\\']),
            "container id {id:?} is not a plain directory name"
        );
        Ok(())
    }
}

/// A worker container talking to the coordinator through `E`.
///
/// Re-registers whenever a heartbeat reveals a new coordinator incarnation,
/// and tracks the committed window so old checkpoints can be purged.
pub struct Worker<E: ControlEndpoint> {
    config: WorkerConfig,
    endpoint: E,
    incarnation: AtomicU64,
    committed_window: Mutex<Option<WindowId>>,
    heartbeats_sent: AtomicU64,
}

impl<E: ControlEndpoint + 'static> Worker<E> {
    pub fn new(config: WorkerConfig, endpoint: E) -> Self {
        Self {
            config,
            endpoint,
            incarnation: AtomicU64::new(0),
            committed_window: Mutex::new(None),
            heartbeats_sent: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &WorkerConfig {
        &self.config
    }

    pub fn endpoint(&self) -> &E {
        &self.endpoint
    }

    /// Coordinator incarnation that last accepted this container; 0 before
    /// the first registration.
    pub fn incarnation(&self) -> u64 {
        self.incarnation.load(Ordering::SeqCst)
    }

    pub fn heartbeats_sent(&self) -> u64 {
        self.heartbeats_sent.load(Ordering::Relaxed)
    }

    pub fn committed_window(&self) -> Option<WindowId> {
        self.committed_window.lock().ok().and_then(|guard| *guard)
    }

    pub async fn register(&self) -> Result<RegistrationAck> {
        let ack = self
            .endpoint
            .register(ContainerRegistration {
                container_id: self.config.container_id.clone(),
                host: self.config.host.clone(),
            })
            .await
            .with_context(|| {
                format!("container {} failed to register", self.config.container_id)
            })?;
        self.incarnation.store(ack.incarnation, Ordering::SeqCst);
        tracing::info!(
            "container {} registered with coordinator incarnation {}",
            self.config.container_id,
            ack.incarnation
        );
        Ok(ack)
    }

    pub async fn send_heartbeat(&self) -> Result<HeartbeatAck> {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
        let ack = self
            .endpoint
            .heartbeat(ContainerHeartbeat {
                container_id: self.config.container_id.clone(),
                sent_millis: SystemTimeSource.now_millis(),
            })
            .await?;
        if let Ok(mut committed) = self.committed_window.lock() {
            if ack.committed_window > *committed {
                *committed = ack.committed_window;
            }
        }
        if ack.incarnation != self.incarnation() {
            tracing::info!(
                "coordinator restarted as incarnation {}, registering again",
                ack.incarnation
            );
            self.register().await?;
        }
        Ok(ack)
    }

    pub fn spawn_heartbeat_loop(
        self: Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let interval = self.config.heartbeat_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.send_heartbeat().await {
                            tracing::warn!("heartbeat failed: {:#}", err);
                        }
                    }
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        })
    }

    pub async fn report_checkpoint(
        &self,
        operator_id: OperatorId,
        window_id: WindowId,
    ) -> Result<()> {
        self.endpoint
            .report_checkpoint(CheckpointReport {
                container_id: self.config.container_id.clone(),
                operator_id,
                window_id,
            })
            .await
            .with_context(|| {
                format!("failed to report checkpoint {window_id} of operator {operator_id}")
            })
    }

    pub async fn report_error(&self, operator_id: Option<OperatorId>, err: &anyhow::Error) {
        let report = ErrorReport {
            container_id: self.config.container_id.clone(),
            operator_id,
            message: format!("{err:#}"),
        };
        if let Err(report_err) = self.endpoint.report_error(report).await {
            tracing::error!("failed to report operator error: {}", report_err);
        }
    }

    /// Apply every pending signal, report the checkpoints taken, and purge
    /// checkpoints the coordinator has committed past. Returns the number of
    /// signals applied.
    pub async fn pump<O: Operator, S: StateStore + ?Sized>(
        &self,
        node: &mut OperatorNode<O, S>,
        reservoir: &SweepableReservoir,
    ) -> Result<usize> {
        let operator_id = node.config().operator_id;
        let mut applied = 0;
        while let Some(signal) = reservoir.sweep()? {
            let outcome = node.process(signal)?;
            reservoir.remove()?;
            applied += 1;
            if let Some(CheckpointOutcome::Saved { window_id, .. }) = outcome {
                if let Err(err) = self.report_checkpoint(operator_id, window_id).await {
                    tracing::warn!("{:#}", err);
                }
            }
        }
        if let Some(committed) = self.committed_window() {
            node.purge_committed(committed)?;
        }
        Ok(applied)
    }

    /// Drive `node` from `reservoir` until `shutdown`. An operator failure is
    /// reported to the coordinator and ends the loop.
    pub async fn run_operator<O: Operator, S: StateStore + ?Sized>(
        &self,
        node: &mut OperatorNode<O, S>,
        reservoir: &SweepableReservoir,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let operator_id = node.config().operator_id;
        let mut ticker = tokio::time::interval(self.config.poll_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(err) = self.pump(node, reservoir).await {
                        self.report_error(Some(operator_id), &err).await;
                        return Err(err);
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Register, recover the built-in [`WindowCounter`] from its latest
    /// checkpoint and run it off a fresh window clock until `shutdown`.
    pub async fn run(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Result<()> {
        self.config.validate()?;
        self.register().await?;

        let store = Arc::new(FsStateStore::new(self.config.state_dir())?);
        let mut node =
            OperatorNode::new(self.config.node.clone(), WindowCounter::default(), store)?;
        if let Some(window_id) = node.recover()? {
            tracing::info!(
                "operator {} resumed after {} closed windows (checkpoint {})",
                self.config.node.operator_id,
                node.operator().windows_closed,
                window_id
            );
        }

        let mut clock = WindowClock::new(WindowConfig::starting_now(
            self.config.window_width_millis,
        ));
        let reservoir = clock.acquire_reservoir(
            format!("operator-{}", self.config.node.operator_id),
            self.config.reservoir_capacity,
        )?;
        clock.activate()?;

        let heartbeat = Arc::clone(&self).spawn_heartbeat_loop(shutdown.clone());
        let result = self.run_operator(&mut node, &reservoir, shutdown).await;
        clock.deactivate();
        heartbeat.abort();
        let _ = heartbeat.await;
        tracing::info!(
            "container {} stopped after {} windows",
            self.config.container_id,
            node.operator().windows_closed
        );
        result
    }
}
