//! Throttled transfer progress. Pure state machine: the caller decides where
//! emitted events go.

use std::time::{Duration, Instant};

/// Minimum wall-clock gap between two non-terminal updates.
pub const UPDATE_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Sending,
    Receiving,
}

/// One progress notification. Terminal events carry `is_complete = true`;
/// a failed or rejected transfer reports zero bytes with the declared total.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub direction: Direction,
    pub filename: String,
    pub bytes_transferred: u64,
    pub total_bytes: u64,
    pub is_complete: bool,
}

impl ProgressEvent {
    /// Integer percentage, floored. Zero when the total is zero. Widened so
    /// the multiply cannot overflow for any byte count.
    pub fn percent(&self) -> u64 {
        if self.total_bytes == 0 {
            return 0;
        }
        (self.bytes_transferred as u128 * 100 / self.total_bytes as u128) as u64
    }
}

/// Per-transfer reporter. `start` and the terminal calls always produce an
/// event; `update` produces at most one per [`UPDATE_INTERVAL`] regardless of
/// how many reads or writes happened in between.
#[derive(Debug)]
pub struct ProgressReporter {
    direction: Direction,
    filename: String,
    total: u64,
    last_update: Option<Instant>,
}

impl ProgressReporter {
    pub fn new(direction: Direction, filename: &str, total: u64) -> Self {
        Self {
            direction,
            filename: filename.to_string(),
            total,
            last_update: None,
        }
    }

    fn event(&self, bytes: u64, is_complete: bool) -> ProgressEvent {
        ProgressEvent {
            direction: self.direction,
            filename: self.filename.clone(),
            bytes_transferred: bytes,
            total_bytes: self.total,
            is_complete,
        }
    }

    /// Unconditional event at transfer start.
    pub fn start(&mut self) -> ProgressEvent {
        self.last_update = Some(Instant::now());
        self.event(0, false)
    }

    /// Throttled mid-transfer event.
    pub fn update(&mut self, bytes: u64) -> Option<ProgressEvent> {
        let now = Instant::now();
        match self.last_update {
            Some(last) if now.duration_since(last) < UPDATE_INTERVAL => None,
            _ => {
                self.last_update = Some(now);
                Some(self.event(bytes, false))
            }
        }
    }

    /// Unconditional terminal event on success.
    pub fn finish(&self, bytes: u64) -> ProgressEvent {
        self.event(bytes, true)
    }

    /// Terminal event for a failed or rejected transfer. Same outward shape
    /// as success with zero bytes; the distinct reason lives in logs.
    pub fn aborted(&self) -> ProgressEvent {
        self.event(0, true)
    }
}
