//! Rolling history of recently validated plate texts

use std::collections::VecDeque;

/// Bounded FIFO; the oldest entry is dropped on overflow
#[derive(Debug, Clone)]
pub struct PlateHistory {
    entries: VecDeque<String>,
    capacity: usize,
}

impl PlateHistory {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, text: impl Into<String>) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(text.into());
    }

    pub fn contains(&self, text: &str) -> bool {
        self.entries.iter().any(|t| t == text)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_evicts_oldest() {
        let mut history = PlateHistory::new(2);
        history.push("AAA-111");
        history.push("BBB-222");
        history.push("CCC-333");

        assert_eq!(history.len(), 2);
        assert!(!history.contains("AAA-111"));
        assert_eq!(history.iter().collect::<Vec<_>>(), vec!["BBB-222", "CCC-333"]);
    }

    #[test]
    fn test_duplicates_kept() {
        let mut history = PlateHistory::new(3);
        history.push("ABC-123");
        history.push("ABC-123");
        assert_eq!(history.len(), 2);
        assert!(history.contains("ABC-123"));
    }

    #[test]
    fn test_zero_capacity_clamped() {
        let mut history = PlateHistory::new(0);
        history.push("X");
        assert_eq!(history.capacity(), 1);
        assert_eq!(history.len(), 1);
    }
}
