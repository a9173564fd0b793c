//! Deterministic frame-skip policy.

/// Decides which captured frames are processed.
///
/// Frame indices start at 1 for each streaming session. With a skip count of
/// `k`, only indices where `index % (k + 1) == 0` pass; `k = 0` passes every
/// frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameSampler {
    skip: u32,
}

impl FrameSampler {
    pub fn new(skip: u32) -> Self {
        Self { skip }
    }

    pub fn skip(&self) -> u32 {
        self.skip
    }

    pub fn should_process(&self, index: u64) -> bool {
        index != 0 && index % (self.skip as u64 + 1) == 0
    }
}
