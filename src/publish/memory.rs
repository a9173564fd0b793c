use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{bail, Result};

use super::{FrameSink, FrameSinkFactory};
use crate::frame::StreamProperties;

/// What one in-memory sink saw during its lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SinkRecord {
    pub target: String,
    pub properties: StreamProperties,
    pub frames: usize,
    pub bytes: usize,
    pub closed: bool,
}

#[derive(Default)]
struct Shared {
    records: Vec<SinkRecord>,
    open: usize,
    peak_open: usize,
}

/// Factory of recording sinks, optionally breaking after a number of writes.
#[derive(Clone, Default)]
pub struct MemorySinkFactory {
    shared: Arc<Mutex<Shared>>,
    break_after: Option<usize>,
}

impl MemorySinkFactory {
    /// Sinks that report a broken pipe once `writes` frames were accepted.
    pub fn breaking_after(writes: usize) -> Self {
        Self {
            shared: Arc::default(),
            break_after: Some(writes),
        }
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        lock(&self.shared).records.clone()
    }

    pub fn open_sinks(&self) -> usize {
        lock(&self.shared).open
    }

    /// Highest number of simultaneously open sinks observed.
    pub fn peak_open_sinks(&self) -> usize {
        lock(&self.shared).peak_open
    }
}

impl FrameSinkFactory for MemorySinkFactory {
    fn open(&self, properties: StreamProperties, target: &str) -> Result<Box<dyn FrameSink>> {
        let mut shared = lock(&self.shared);
        shared.records.push(SinkRecord {
            target: target.to_string(),
            properties,
            frames: 0,
            bytes: 0,
            closed: false,
        });
        shared.open += 1;
        shared.peak_open = shared.peak_open.max(shared.open);
        let index = shared.records.len() - 1;
        Ok(Box::new(MemorySink {
            shared: self.shared.clone(),
            index,
            break_after: self.break_after,
        }))
    }
}

pub struct MemorySink {
    shared: Arc<Mutex<Shared>>,
    index: usize,
    break_after: Option<usize>,
}

impl FrameSink for MemorySink {
    fn write(&mut self, frame: &[u8]) -> Result<()> {
        let mut shared = lock(&self.shared);
        let record = &mut shared.records[self.index];
        if record.closed {
            bail!("write to closed sink");
        }
        if self.break_after.is_some_and(|limit| record.frames >= limit) {
            bail!("broken pipe");
        }
        record.frames += 1;
        record.bytes += frame.len();
        Ok(())
    }

    fn close(&mut self) {
        let mut shared = lock(&self.shared);
        if !shared.records[self.index].closed {
            shared.records[self.index].closed = true;
            shared.open = shared.open.saturating_sub(1);
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
