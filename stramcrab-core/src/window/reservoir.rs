use super::*;

#[derive(Debug, Default)]
struct ReservoirQueue {
    signals: VecDeque<ControlSignal>,
    overflowed: bool,
}

#[derive(Debug)]
struct ReservoirShared {
    name: String,
    capacity: usize,
    queue: Mutex<ReservoirQueue>,
    available: Condvar,
}

/// Bounded, ordered, single-consumer queue of control signals.
///
/// The consumer peeks with [`sweep`](Self::sweep) and acknowledges with
/// [`remove`](Self::remove); the producer never drops entries on the
/// consumer's behalf. Once the producer finds the reservoir full it is marked
/// overflowed and every later sweep fails.
#[derive(Debug)]
pub struct SweepableReservoir {
    shared: Arc<ReservoirShared>,
}

impl SweepableReservoir {
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    pub fn len(&self) -> usize {
        self.shared
            .queue
            .lock()
            .map(|queue| queue.signals.len())
            .unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Oldest unacknowledged signal, left in place.
    pub fn sweep(&self) -> Result<Option<ControlSignal>> {
        let queue = self.lock()?;
        self.check_overflow(&queue)?;
        Ok(queue.signals.front().copied())
    }

    /// Like [`sweep`](Self::sweep), but waits up to `timeout` for a signal.
    pub fn sweep_timeout(&self, timeout: Duration) -> Result<Option<ControlSignal>> {
        let deadline = Instant::now() + timeout;
        let mut queue = self.lock()?;
        loop {
            self.check_overflow(&queue)?;
            if let Some(signal) = queue.signals.front() {
                return Ok(Some(*signal));
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            queue = self
                .shared
                .available
                .wait_timeout(queue, deadline - now)
                .map_err(|_| anyhow!("reservoir {} lock poisoned", self.shared.name))?
                .0;
        }
    }

    /// Acknowledge the oldest signal, removing it.
    pub fn remove(&self) -> Result<Option<ControlSignal>> {
        let mut queue = self.lock()?;
        self.check_overflow(&queue)?;
        Ok(queue.signals.pop_front())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, ReservoirQueue>> {
        self.shared
            .queue
            .lock()
            .map_err(|_| anyhow!("reservoir {} lock poisoned", self.shared.name))
    }

    fn check_overflow(&self, queue: &ReservoirQueue) -> Result<()> {
        if queue.overflowed {
            bail!(
                "reservoir {} overflowed its capacity of {} signals",
                self.shared.name,
                self.shared.capacity
            );
        }
        Ok(())
    }
}

/// Producer side of a [`SweepableReservoir`], held by the clock.
#[derive(Debug)]
pub(crate) struct ReservoirWriter {
    shared: Arc<ReservoirShared>,
}

impl ReservoirWriter {
    pub(crate) fn name(&self) -> &str {
        &self.shared.name
    }

    /// Signals that can still be put before the reservoir overflows.
    pub(crate) fn free_slots(&self) -> usize {
        self.shared
            .queue
            .lock()
            .map(|queue| self.shared.capacity.saturating_sub(queue.signals.len()))
            .unwrap_or(0)
    }

    /// Append a signal. Fails, and poisons the reservoir for its consumer,
    /// when the reservoir is full.
    pub(crate) fn put(&self, signal: ControlSignal) -> Result<()> {
        let mut queue = self
            .shared
            .queue
            .lock()
            .map_err(|_| anyhow!("reservoir {} lock poisoned", self.shared.name))?;
        if queue.overflowed {
            bail!("reservoir {} already overflowed", self.shared.name);
        }
        if queue.signals.len() >= self.shared.capacity {
            queue.overflowed = true;
            self.shared.available.notify_all();
            bail!(
                "reservoir {} overflowed its capacity of {} signals",
                self.shared.name,
                self.shared.capacity
            );
        }
        queue.signals.push_back(signal);
        self.shared.available.notify_one();
        Ok(())
    }

    /// True once the consumer dropped its handle.
    pub(crate) fn is_abandoned(&self) -> bool {
        Arc::strong_count(&self.shared) == 1
    }
}

/// Create a connected reservoir pair.
pub(crate) fn reservoir(
    name: String,
    capacity: usize,
) -> Result<(ReservoirWriter, SweepableReservoir)> {
    ensure!(capacity > 0, "reservoir {name} needs a capacity greater than 0");
    let shared = Arc::new(ReservoirShared {
        name,
        capacity,
        queue: Mutex::new(ReservoirQueue::default()),
        available: Condvar::new(),
    });
    Ok((
        ReservoirWriter {
            shared: Arc::clone(&shared),
        },
        SweepableReservoir { shared },
    ))
}
