//! Rolling frame buffer

use std::collections::VecDeque;

use crate::capture::Frame;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferStats {
    pub pushed: u64,
    pub dropped: u64,
}

/// Bounded queue of the most recent frames.
///
/// The queue grows on demand up to `capacity`. When full, pushing evicts the
/// oldest frame and keeps its pixel storage in a single recycle slot, so a
/// warmed up buffer stops allocating.
pub struct FrameBuffer {
    frames: VecDeque<Frame>,
    capacity: usize,
    recycled: Option<Vec<u8>>,
    stats: BufferStats,
}

impl FrameBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            frames: VecDeque::new(),
            capacity,
            recycled: None,
            stats: BufferStats::default(),
        }
    }

    pub fn push(&mut self, frame: Frame) {
        if self.frames.len() >= self.capacity {
            if let Some(oldest) = self.frames.pop_front() {
                self.recycled = Some(oldest.into_data());
                self.stats.dropped += 1;
            }
        }
        self.frames.push_back(frame);
        self.stats.pushed += 1;
    }

    /// Storage of the last evicted frame, if it has not been handed out yet.
    pub fn take_recycled(&mut self) -> Option<Vec<u8>> {
        self.recycled.take()
    }

    pub fn has_recycled(&self) -> bool {
        self.recycled.is_some()
    }

    /// Removes every frame, oldest first.
    pub fn drain(&mut self) -> Vec<Frame> {
        self.frames.drain(..).collect()
    }

    /// Drops all frames and the recycled storage.
    pub fn flush(&mut self) {
        self.frames = VecDeque::new();
        self.recycled = None;
        self.stats = BufferStats::default();
    }

    pub fn resize(&mut self, capacity: usize) {
        self.capacity = capacity.max(1);
        self.flush();
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BufferStats {
        self.stats
    }

    pub fn iter(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter()
    }
}
