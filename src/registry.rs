//! One supervisor thread per configured camera.

use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};

use crate::config::CameraConfig;
use crate::supervisor::{
    CameraSupervisor, Capabilities, StateCell, StopToken, SupervisorState, WorkerSummary,
};

struct WorkerHandle {
    camera_id: String,
    stop: StopToken,
    state: StateCell,
    thread: Option<JoinHandle<WorkerSummary>>,
}

/// Owns the supervisor threads and their stop tokens.
pub struct WorkerRegistry {
    workers: Vec<WorkerHandle>,
}

impl WorkerRegistry {
    /// Build one supervisor per camera and start each on its own thread.
    pub fn start(configs: Vec<CameraConfig>, caps: &Capabilities) -> Result<Self> {
        let mut registry = Self {
            workers: Vec::with_capacity(configs.len()),
        };
        for config in configs {
            let camera_id = config.id.clone();
            let stop = StopToken::new();
            let supervisor = CameraSupervisor::new(config, caps, stop.clone());
            let state = supervisor.state_cell();
            let thread = thread::Builder::new()
                .name(format!("camwatch-{}", camera_id))
                .spawn(move || supervisor.run())
                .with_context(|| format!("failed to spawn supervisor for {}", camera_id))?;
            registry.workers.push(WorkerHandle {
                camera_id,
                stop,
                state,
                thread: Some(thread),
            });
        }
        log::info!("started {} camera supervisor(s)", registry.workers.len());
        Ok(registry)
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn camera_ids(&self) -> Vec<&str> {
        self.workers.iter().map(|w| w.camera_id.as_str()).collect()
    }

    /// Signal every supervisor to stop. Safe to call repeatedly.
    pub fn stop_all(&self) {
        for worker in &self.workers {
            if !worker.stop.is_stopped() {
                log::info!("[{}] stop requested", worker.camera_id);
                worker.stop.stop();
            }
        }
    }

    /// `None` for unknown cameras.
    pub fn is_running(&self, camera_id: &str) -> Option<bool> {
        self.find(camera_id).map(|worker| {
            !worker.stop.is_stopped() && worker.state.get() != SupervisorState::Stopped
        })
    }

    pub fn state(&self, camera_id: &str) -> Option<SupervisorState> {
        self.find(camera_id).map(|worker| worker.state.get())
    }

    /// True once every supervisor thread has returned.
    pub fn all_finished(&self) -> bool {
        self.workers.iter().all(|worker| {
            worker
                .thread
                .as_ref()
                .map_or(true, |thread| thread.is_finished())
        })
    }

    /// Wait for every supervisor and collect their summaries.
    pub fn join_all(&mut self) -> Vec<WorkerSummary> {
        let mut summaries = Vec::with_capacity(self.workers.len());
        for worker in &mut self.workers {
            let Some(thread) = worker.thread.take() else {
                continue;
            };
            match thread.join() {
                Ok(summary) => summaries.push(summary),
                Err(_) => log::error!("[{}] supervisor thread panicked", worker.camera_id),
            }
        }
        summaries
    }

    fn find(&self, camera_id: &str) -> Option<&WorkerHandle> {
        self.workers.iter().find(|w| w.camera_id == camera_id)
    }
}

impl Drop for WorkerRegistry {
    fn drop(&mut self) {
        self.stop_all();
        let _ = self.join_all();
    }
}
