use serde::{Deserialize, Serialize};

/// Wall-clock time in milliseconds since the Unix epoch.
pub type EpochMillis = i64;

/// Identifier of a physical operator instance.
pub type OperatorId = u32;

/// Identifier of a worker container registered with the coordinator.
pub type ContainerId = String;

/// Largest sequence number representable in the low half of a [`WindowId`].
pub const MAX_SEQ: u32 = u32::MAX;

/// Logical clock value identifying a processing window.
///
/// The high 32 bits carry the base epoch time in seconds, the low 32 bits a
/// sequence counter within that base. Ordering of two ids is the ordering of
/// `(base_seconds, sequence)`.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash, Default,
)]
pub struct WindowId(pub u64);

impl WindowId {
    pub fn new(base_seconds: u32, sequence: u32) -> Self {
        Self((u64::from(base_seconds) << 32) | u64::from(sequence))
    }

    pub fn base_seconds(self) -> u32 {
        (self.0 >> 32) as u32
    }

    pub fn sequence(self) -> u32 {
        self.0 as u32
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }

    /// The following window within the same base, or `None` once the
    /// sequence counter is exhausted.
    pub fn next_in_base(self) -> Option<Self> {
        self.sequence()
            .checked_add(1)
            .map(|sequence| Self::new(self.base_seconds(), sequence))
    }
}

impl From<u64> for WindowId {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl std::fmt::Display for WindowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#018x}", self.0)
    }
}

/// Control signal emitted by the window clock.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ControlSignal {
    /// A new base epoch starts; the window width is restated.
    Reset {
        base_seconds: u32,
        interval_millis: u32,
    },
    /// The window opens.
    Begin { window_id: WindowId },
    /// The window closes.
    End { window_id: WindowId },
}

impl ControlSignal {
    /// Window id carried by the signal. A reset carries the first id of its
    /// base.
    pub fn window_id(&self) -> WindowId {
        match self {
            ControlSignal::Reset { base_seconds, .. } => WindowId::new(*base_seconds, 0),
            ControlSignal::Begin { window_id } | ControlSignal::End { window_id } => *window_id,
        }
    }

    pub fn is_reset(&self) -> bool {
        matches!(self, ControlSignal::Reset { .. })
    }
}

impl std::fmt::Display for ControlSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ControlSignal::Reset {
                base_seconds,
                interval_millis,
            } => write!(f, "Reset(base={base_seconds}s, width={interval_millis}ms)"),
            ControlSignal::Begin { window_id } => write!(f, "Begin({window_id})"),
            ControlSignal::End { window_id } => write!(f, "End({window_id})"),
        }
    }
}

#[cfg(test)]
#[path = "tests/types_tests.rs"]
mod tests;
