//! Bounded history of completed runs

use std::collections::VecDeque;

use super::result::Run;

/// Keeps the most recent completed runs, oldest evicted first
#[derive(Debug, Clone)]
pub struct RunHistory {
    capacity: usize,
    runs: VecDeque<Run>,
}

impl RunHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            runs: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, run: Run) {
        if self.capacity == 0 {
            return;
        }
        while self.runs.len() >= self.capacity {
            self.runs.pop_front();
        }
        self.runs.push_back(run);
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Most recently completed run
    pub fn last(&self) -> Option<&Run> {
        self.runs.back()
    }

    /// Runs oldest first
    pub fn iter(&self) -> impl Iterator<Item = &Run> {
        self.runs.iter()
    }

    pub fn find(&self, number: u64) -> Option<&Run> {
        self.runs.iter().find(|r| r.number == number)
    }
}
