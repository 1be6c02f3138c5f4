use super::*;

/// Window state machine.
///
/// Owns no timer and no queues: every transition hands its signals to the
/// `emit` callback in order. The caller serializes transitions.
///
/// # Invariant
/// `current_window_millis` is always the start of the open window, so
/// `window_id_for(current_window_millis, reset, width)` equals
/// [`current_window_id`](Self::current_window_id).
#[derive(Debug, Clone)]
pub struct WindowGenerator {
    width_millis: u32,
    base_seconds: u32,
    sequence: u32,
    current_window_millis: EpochMillis,
}

impl WindowGenerator {
    /// Open the window containing `first_window_millis`: emits `Reset` then
    /// `Begin`.
    pub fn start(config: &WindowConfig, emit: &mut impl FnMut(ControlSignal)) -> Result<Self> {
        config.validate()?;
        let width_millis = config.window_width_millis;
        let first_id = window_id_for(
            config.first_window_millis,
            config.reset_window_millis,
            width_millis,
        )?;
        let current_window_millis =
            window_millis(first_id, config.reset_window_millis, width_millis)?;

        let generator = Self {
            width_millis,
            base_seconds: first_id.base_seconds(),
            sequence: first_id.sequence(),
            current_window_millis,
        };
        emit(generator.reset_signal());
        emit(ControlSignal::Begin {
            window_id: generator.current_window_id(),
        });
        Ok(generator)
    }

    pub fn current_window_id(&self) -> WindowId {
        WindowId::new(self.base_seconds, self.sequence)
    }

    pub fn current_window_millis(&self) -> EpochMillis {
        self.current_window_millis
    }

    /// Time at which the open window ends.
    pub fn next_boundary_millis(&self) -> EpochMillis {
        self.current_window_millis + EpochMillis::from(self.width_millis)
    }

    pub fn width_millis(&self) -> u32 {
        self.width_millis
    }

    /// Close the open window and open the next one.
    ///
    /// When the sequence counter is exhausted a new base starts at the next
    /// window: `End`, `Reset`, `Begin` with sequence 0.
    pub fn advance(&mut self, emit: &mut impl FnMut(ControlSignal)) -> Result<()> {
        emit(ControlSignal::End {
            window_id: self.current_window_id(),
        });
        self.current_window_millis = self.next_boundary_millis();
        match self.sequence.checked_add(1) {
            Some(sequence) => self.sequence = sequence,
            None => {
                let base_seconds = self.current_window_millis.div_euclid(1000);
                self.base_seconds = u32::try_from(base_seconds)
                    .map_err(|_| anyhow!("window base {base_seconds}s overflows the window id"))?;
                self.sequence = 0;
                tracing::info!(
                    "window sequence exhausted, new base {}s",
                    self.base_seconds
                );
                emit(self.reset_signal());
            }
        }
        emit(ControlSignal::Begin {
            window_id: self.current_window_id(),
        });
        Ok(())
    }

    /// Number of windows [`catch_up`](Self::catch_up) would close for `now`.
    pub fn elapsed_windows(&self, now: EpochMillis) -> u64 {
        let boundary = i128::from(self.next_boundary_millis());
        let now = i128::from(now);
        if now < boundary {
            return 0;
        }
        let elapsed = (now - boundary) / i128::from(self.width_millis) + 1;
        u64::try_from(elapsed).unwrap_or(u64::MAX)
    }

    /// Advance until the open window contains `now`. Returns the number of
    /// windows closed.
    pub fn catch_up(
        &mut self,
        now: EpochMillis,
        emit: &mut impl FnMut(ControlSignal),
    ) -> Result<usize> {
        let mut closed = 0;
        while self.next_boundary_millis() <= now {
            self.advance(emit)?;
            closed += 1;
        }
        Ok(closed)
    }

    fn reset_signal(&self) -> ControlSignal {
        ControlSignal::Reset {
            base_seconds: self.base_seconds,
            interval_millis: self.width_millis,
        }
    }
}
