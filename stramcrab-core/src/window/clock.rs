use super::*;

use crossbeam_channel::{RecvTimeoutError, Sender, bounded};

/// Source of wall-clock time for the window clock.
pub trait TimeSource: Send + Sync {
    fn now_millis(&self) -> EpochMillis;
}

/// System wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now_millis(&self) -> EpochMillis {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as EpochMillis)
            .unwrap_or(0)
    }
}

/// Manually advanced clock for deterministic tests and replays.
#[derive(Debug, Default)]
pub struct ManualTimeSource {
    now: AtomicI64,
}

impl ManualTimeSource {
    pub fn new(now: EpochMillis) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: EpochMillis) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualTimeSource {
    fn now_millis(&self) -> EpochMillis {
        self.now.load(Ordering::SeqCst)
    }
}

/// Window clock configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowConfig {
    /// Time of the first window to open.
    pub first_window_millis: EpochMillis,
    /// Anchor from which windows and bases are laid out.
    pub reset_window_millis: EpochMillis,
    pub window_width_millis: u32,
}

impl WindowConfig {
    pub const DEFAULT_WINDOW_WIDTH_MILLIS: u32 = 500;

    /// Most windows `start` replays to catch up with the time source. A
    /// longer backlog is skipped.
    pub const MAX_CATCH_UP_WINDOWS: u64 = 1024;

    /// Windows anchored at, and starting from, the current system time.
    pub fn starting_now(window_width_millis: u32) -> Self {
        Self::starting_at(SystemTimeSource.now_millis(), window_width_millis)
    }

    /// Windows anchored at, and starting from, `millis`.
    pub fn starting_at(millis: EpochMillis, window_width_millis: u32) -> Self {
        Self {
            first_window_millis: millis,
            reset_window_millis: millis,
            window_width_millis,
        }
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.window_width_millis > 0,
            "window width must be greater than 0"
        );
        Ok(())
    }
}

#[derive(Default)]
struct ClockShared {
    generator: Mutex<Option<WindowGenerator>>,
    reservoirs: Mutex<Vec<ReservoirWriter>>,
}

impl ClockShared {
    /// Advance one window and publish, holding the generator lock so that no
    /// two transitions interleave.
    fn tick(&self) -> Result<()> {
        let mut guard = self
            .generator
            .lock()
            .map_err(|_| anyhow!("window generator lock poisoned"))?;
        let generator = guard
            .as_mut()
            .ok_or_else(|| anyhow!("window clock is not active"))?;
        let mut signals = Vec::with_capacity(3);
        generator.advance(&mut |signal| signals.push(signal))?;
        self.publish(&signals)
    }

    fn next_boundary_millis(&self) -> Result<Option<EpochMillis>> {
        Ok(self
            .generator
            .lock()
            .map_err(|_| anyhow!("window generator lock poisoned"))?
            .as_ref()
            .map(WindowGenerator::next_boundary_millis))
    }

    /// Deliver signals to every attached reservoir. A reservoir that
    /// overflows is detached; its consumer observes the failure on sweep.
    fn publish(&self, signals: &[ControlSignal]) -> Result<()> {
        let mut reservoirs = self
            .reservoirs
            .lock()
            .map_err(|_| anyhow!("reservoir registry lock poisoned"))?;
        reservoirs.retain(|writer| {
            if writer.is_abandoned() {
                tracing::debug!("detaching reservoir {} with no consumer", writer.name());
                return false;
            }
            for signal in signals {
                if let Err(err) = writer.put(*signal) {
                    tracing::error!("detaching reservoir {}: {}", writer.name(), err);
                    return false;
                }
            }
            true
        });
        Ok(())
    }
}

struct ClockDriver {
    shutdown: Sender<()>,
    handle: JoinHandle<()>,
}

/// Timer-driven window clock.
///
/// `start` + `tick` drive the clock by hand; `activate` spawns a single timer
/// thread that ticks at every window boundary of the configured
/// [`TimeSource`]. Signals reach every reservoir acquired from the clock in
/// emission order.
pub struct WindowClock {
    config: WindowConfig,
    time: Arc<dyn TimeSource>,
    shared: Arc<ClockShared>,
    driver: Option<ClockDriver>,
}

impl WindowClock {
    pub fn new(config: WindowConfig) -> Self {
        Self {
            config,
            time: Arc::new(SystemTimeSource),
            shared: Arc::new(ClockShared::default()),
            driver: None,
        }
    }

    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Replace the configuration of an inactive clock.
    pub fn reconfigure(&mut self, config: WindowConfig) -> Result<()> {
        ensure!(
            !self.is_active(),
            "window clock must be deactivated before it is reconfigured"
        );
        config.validate()?;
        self.config = config;
        Ok(())
    }

    /// Attach a new consumer reservoir holding at most `capacity` signals.
    pub fn acquire_reservoir(
        &self,
        name: impl Into<String>,
        capacity: usize,
    ) -> Result<SweepableReservoir> {
        let (writer, reservoir) = reservoir(name.into(), capacity)?;
        self.shared
            .reservoirs
            .lock()
            .map_err(|_| anyhow!("reservoir registry lock poisoned"))?
            .push(writer);
        Ok(reservoir)
    }

    pub fn is_active(&self) -> bool {
        self.shared
            .generator
            .lock()
            .map(|guard| guard.is_some())
            .unwrap_or(false)
    }

    pub fn current_window_id(&self) -> Option<WindowId> {
        self.shared
            .generator
            .lock()
            .ok()
            .and_then(|guard| guard.as_ref().map(WindowGenerator::current_window_id))
    }

    /// Open the first window and catch up with the time source, without
    /// starting the timer thread.
    ///
    /// Elapsed windows are replayed only while every attached reservoir can
    /// hold them and there are at most
    /// [`MAX_CATCH_UP_WINDOWS`](WindowConfig::MAX_CATCH_UP_WINDOWS) of them.
    /// A longer backlog is skipped: the clock opens the window containing now
    /// with a fresh `Reset`.
    pub fn start(&self) -> Result<()> {
        let budget = self.catch_up_budget()?;
        let mut guard = self
            .shared
            .generator
            .lock()
            .map_err(|_| anyhow!("window generator lock poisoned"))?;
        ensure!(guard.is_none(), "window clock is already active");

        let now = self.time.now_millis();
        let mut signals = Vec::new();
        let mut generator = WindowGenerator::start(&self.config, &mut |s| signals.push(s))?;
        let elapsed = generator.elapsed_windows(now);
        if elapsed > budget {
            tracing::warn!(
                "window clock skipping {} elapsed windows after {}, resuming at {}ms",
                elapsed,
                generator.current_window_id(),
                now
            );
            signals.clear();
            let resumed = WindowConfig {
                first_window_millis: now,
                ..self.config
            };
            generator = WindowGenerator::start(&resumed, &mut |s| signals.push(s))?;
        } else if elapsed > 0 {
            generator.catch_up(now, &mut |s| signals.push(s))?;
            tracing::debug!("window clock caught up {} elapsed windows", elapsed);
        }
        tracing::info!(
            "window clock started at {} (width {}ms)",
            generator.current_window_id(),
            generator.width_millis()
        );
        *guard = Some(generator);
        self.shared.publish(&signals)
    }

    /// Elapsed windows `start` may replay without overflowing a reservoir.
    /// Opening takes two signals, each further window two more, and a base
    /// change one extra.
    fn catch_up_budget(&self) -> Result<u64> {
        let free = self
            .shared
            .reservoirs
            .lock()
            .map_err(|_| anyhow!("reservoir registry lock poisoned"))?
            .iter()
            .filter(|writer| !writer.is_abandoned())
            .map(ReservoirWriter::free_slots)
            .min();
        Ok(match free {
            Some(free) => {
                let windows = (free.saturating_sub(3) / 2) as u64;
                windows.min(WindowConfig::MAX_CATCH_UP_WINDOWS)
            }
            None => WindowConfig::MAX_CATCH_UP_WINDOWS,
        })
    }

    /// Close the open window and open the next one.
    pub fn tick(&self) -> Result<()> {
        self.shared.tick()
    }

    /// Start the clock and its timer thread.
    pub fn activate(&mut self) -> Result<()> {
        self.start()?;
        let (shutdown, shutdown_rx) = bounded::<()>(0);
        let shared = Arc::clone(&self.shared);
        let time = Arc::clone(&self.time);

        let spawned = std::thread::Builder::new()
            .name("window-clock".to_string())
            .spawn(move || {
                loop {
                    let next = match shared.next_boundary_millis() {
                        Ok(Some(next)) => next,
                        Ok(None) => break,
                        Err(err) => {
                            tracing::error!("window clock stopped: {}", err);
                            break;
                        }
                    };
                    let wait = (next - time.now_millis()).max(0) as u64;
                    match shutdown_rx.recv_timeout(Duration::from_millis(wait)) {
                        Err(RecvTimeoutError::Timeout) => {}
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                    if time.now_millis() < next {
                        continue;
                    }
                    if let Err(err) = shared.tick() {
                        tracing::error!("window clock stopped: {}", err);
                        break;
                    }
                }
            });

        match spawned {
            Ok(handle) => {
                self.driver = Some(ClockDriver { shutdown, handle });
                Ok(())
            }
            Err(err) => {
                self.clear_generator();
                Err(anyhow!("failed to spawn window clock thread: {err}"))
            }
        }
    }

    /// Stop emission. Safe to call repeatedly; the clock can be reconfigured
    /// and activated again afterwards.
    pub fn deactivate(&mut self) {
        if let Some(driver) = self.driver.take() {
            drop(driver.shutdown);
            if driver.handle.join().is_err() {
                tracing::error!("window clock thread panicked");
            }
        }
        if self.clear_generator() {
            tracing::info!("window clock deactivated");
        }
    }

    fn clear_generator(&self) -> bool {
        match self.shared.generator.lock() {
            Ok(mut guard) => guard.take().is_some(),
            Err(poisoned) => poisoned.into_inner().take().is_some(),
        }
    }
}

impl Drop for WindowClock {
    fn drop(&mut self) {
        self.deactivate();
    }
}
