use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::backoff::Backoff;
use super::stop::StopToken;

/// Connection lifecycle of one camera.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SupervisorState {
    #[default]
    Disconnected,
    Connecting,
    Streaming,
    Error,
    Stopped,
}

impl fmt::Display for SupervisorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Error => "error",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Read-only view of a supervisor's current state, shared with the registry.
#[derive(Clone, Debug, Default)]
pub struct StateCell {
    inner: Arc<Mutex<SupervisorState>>,
}

impl StateCell {
    pub fn get(&self) -> SupervisorState {
        *self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn set(&self, state: SupervisorState) -> SupervisorState {
        let mut guard = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        std::mem::replace(&mut *guard, state)
    }
}

/// Mutable per-camera bookkeeping, owned by the supervisor thread.
#[derive(Debug)]
pub struct WorkerState {
    /// Cleared exactly once; never set again.
    pub running: StopToken,
    pub backoff: Backoff,
    pub processed: u64,
    pub last_frame: Option<Instant>,
    pub fps: f64,
}

impl WorkerState {
    pub fn new(running: StopToken, backoff: Backoff) -> Self {
        Self {
            running,
            backoff,
            processed: 0,
            last_frame: None,
            fps: 0.0,
        }
    }

    pub fn is_running(&self) -> bool {
        !self.running.is_stopped()
    }
}

/// Final report returned by a supervisor when its thread ends.
#[derive(Clone, Debug, PartialEq)]
pub struct WorkerSummary {
    pub camera_id: String,
    pub processed: u64,
    pub reconnects: u64,
    pub errors: u64,
    /// Backoff that the next failure would have used.
    pub backoff: Duration,
    pub fps: f64,
}

impl fmt::Display for WorkerSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] processed={} reconnects={} errors={} fps={:.1}",
            self.camera_id, self.processed, self.reconnects, self.errors, self.fps
        )
    }
}
