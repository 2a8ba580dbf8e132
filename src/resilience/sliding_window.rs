use std::collections::VecDeque;

/// Bounded history of the most recent call outcomes
#[derive(Debug, Clone)]
pub struct SlidingWindow {
    /// `true` marks a failure
    outcomes: VecDeque<bool>,
    size: usize,
    failures: usize,
}

impl SlidingWindow {
    pub fn new(size: usize) -> Self {
        Self {
            outcomes: VecDeque::with_capacity(size),
            size,
            failures: 0,
        }
    }

    /// Append an outcome, evicting the oldest once the window is full
    pub fn record(&mut self, failed: bool) {
        if self.outcomes.len() == self.size && self.outcomes.pop_front() == Some(true) {
            self.failures -= 1;
        }
        self.outcomes.push_back(failed);
        if failed {
            self.failures += 1;
        }
    }

    pub fn is_full(&self) -> bool {
        self.outcomes.len() >= self.size
    }

    /// Failure percentage (0-100) over the outcomes currently held
    pub fn failure_rate(&self) -> f64 {
        if self.outcomes.is_empty() {
            return 0.0;
        }
        self.failures as f64 * 100.0 / self.outcomes.len() as f64
    }

    pub fn failures(&self) -> usize {
        self.failures
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn clear(&mut self) {
        self.outcomes.clear();
        self.failures = 0;
    }
}
