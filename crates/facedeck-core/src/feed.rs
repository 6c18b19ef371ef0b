//! Live feed state and the bounded, most-recent-first recognition history.

use std::collections::VecDeque;
use std::fmt;

/// Number of live recognitions kept on screen unless configured otherwise.
pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Connection state of the live recognition subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FeedState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Error,
}

impl FeedState {
    /// Human-readable status line.
    pub fn label(self) -> &'static str {
        match self {
            Self::Disconnected => "Disconnected",
            Self::Connecting => "Connecting",
            Self::Connected => "Connected",
            Self::Error => "Connection Error",
        }
    }

    /// Label of the connect/disconnect action offered in this state.
    pub fn action_label(self) -> &'static str {
        match self {
            Self::Connected => "Disconnect",
            Self::Connecting => "Connecting...",
            Self::Disconnected | Self::Error => "Connect",
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Fixed-capacity history, newest entry first.
///
/// Pushing beyond capacity evicts from the back, so the history always holds
/// the `capacity` most recently received entries.
#[derive(Debug, Clone)]
pub struct FeedHistory<T> {
    entries: VecDeque<T>,
    capacity: usize,
}

impl<T> FeedHistory<T> {
    /// Create an empty history. A capacity of zero is clamped to one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Prepend an entry, returning how many old entries were evicted.
    pub fn push(&mut self, entry: T) -> usize {
        self.entries.push_front(entry);
        let mut evicted = 0;
        while self.entries.len() > self.capacity {
            self.entries.pop_back();
            evicted += 1;
        }
        evicted
    }

    /// Newest entry, if any.
    pub fn latest(&self) -> Option<&T> {
        self.entries.front()
    }
}

impl<T: Clone> FeedHistory<T> {
    /// Entries newest first.
    pub fn to_vec(&self) -> Vec<T> {
        self.entries.iter().cloned().collect()
    }
}

impl<T> Default for FeedHistory<T> {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_state_disconnected() {
        assert_eq!(FeedState::default(), FeedState::Disconnected);
        assert_eq!(FeedState::Error.label(), "Connection Error");
        assert_eq!(FeedState::Connected.action_label(), "Disconnect");
    }

    #[test]
    fn test_history_newest_first() {
        let mut h = FeedHistory::new(5);
        for i in 0..3 {
            assert_eq!(h.push(i), 0);
        }
        assert_eq!(h.to_vec(), vec![2, 1, 0]);
        assert_eq!(h.latest(), Some(&2));
    }

    #[test]
    fn test_history_keeps_most_recent_capacity() {
        for capacity in 1..8 {
            let mut h = FeedHistory::new(capacity);
            let n = capacity * 3 + 1;
            for i in 0..n {
                h.push(i);
            }
            let expected: Vec<usize> = (n - capacity..n).rev().collect();
            assert_eq!(h.to_vec(), expected, "capacity {capacity}");
        }
    }

    #[test]
    fn test_history_score_example() {
        let mut h = FeedHistory::new(2);
        h.push(0.95);
        h.push(0.40);
        assert_eq!(h.push(0.89), 1);
        assert_eq!(h.to_vec(), vec![0.89, 0.40]);
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut h = FeedHistory::new(0);
        assert_eq!(h.capacity(), 1);
        h.push("a");
        h.push("b");
        assert_eq!(h.to_vec(), vec!["b"]);
    }

    #[test]
    fn test_default_capacity() {
        let h: FeedHistory<u8> = FeedHistory::default();
        assert_eq!(h.capacity(), DEFAULT_HISTORY_CAPACITY);
        assert_eq!(h.latest(), None);
    }
}
