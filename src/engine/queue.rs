//! In-memory FIFO of pending job files with a single-flight busy flag.

use std::collections::VecDeque;
use std::path::PathBuf;

#[derive(Debug, Default)]
pub struct JobQueue {
    pending: VecDeque<PathBuf>,
    busy: bool,
}

impl JobQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an arrival. Duplicates are kept.
    pub fn push(&mut self, path: PathBuf) {
        self.pending.push_back(path);
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn is_busy(&self) -> bool {
        self.busy
    }

    /// Take the head of the queue and mark the queue busy.
    /// Returns None while a job is in flight or when nothing is pending.
    pub fn begin(&mut self) -> Option<PathBuf> {
        if self.busy {
            return None;
        }
        let next = self.pending.pop_front()?;
        self.busy = true;
        Some(next)
    }

    /// Mark the in-flight job finished.
    pub fn finish(&mut self) {
        self.busy = false;
    }
}
