//! Staging queue for descriptor writes.
//!
//! Resource assignments do not reach the backend immediately; they are
//! queued per set index and flushed in one batch right before the pipeline
//! is bound. Re-assigning the same slot before the flush simply queues a
//! later write, which wins.

use crate::descriptor_set::DescriptorWrite;
use foldhash::HashMap;

#[derive(Debug, Default)]
pub struct ResourceBindingQueue {
    writes: HashMap<u32, Vec<DescriptorWrite>>,
}

impl ResourceBindingQueue {
    pub fn new() -> Self {
        ResourceBindingQueue::default()
    }

    /// Queues a write against a set index.
    pub fn push(&mut self, set_idx: u32, write: DescriptorWrite) {
        self.writes.entry(set_idx).or_default().push(write);
    }

    pub fn is_empty(&self) -> bool {
        self.writes.values().all(|w| w.is_empty())
    }

    /// Takes all queued writes, leaving the queue empty.
    pub fn drain(&mut self) -> impl Iterator<Item = (u32, Vec<DescriptorWrite>)> + '_ {
        self.writes.drain().filter(|(_, writes)| !writes.is_empty())
    }

    /// Drops queued writes for one set, for when its layout is rebuilt and
    /// stale writes would target slots that no longer exist.
    pub fn remove_set(&mut self, set_idx: u32) -> Option<Vec<DescriptorWrite>> {
        self.writes.remove(&set_idx)
    }
}
