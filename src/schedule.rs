use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

/// Deadline-ordered deferred tasks, run by whoever owns the main context.
pub struct Deferred<T> {
    pending: BinaryHeap<Reverse<Entry<T>>>,
    next_seq: u64,
}

struct Entry<T> {
    due: Instant,
    seq: u64,
    task: T,
}

impl<T> PartialEq for Entry<T> {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl<T> Eq for Entry<T> {}

impl<T> PartialOrd for Entry<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Entry<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.due
            .cmp(&other.due)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

impl<T> Deferred<T> {
    pub fn new() -> Self {
        Self {
            pending: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    pub fn schedule(&mut self, now: Instant, delay: Duration, task: T) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.push(Reverse(Entry {
            due: now + delay,
            seq,
            task,
        }));
    }

    /// Removes and returns every task due at `now`, earliest first.
    pub fn take_due(&mut self, now: Instant) -> Vec<T> {
        let mut due = Vec::new();
        while self
            .pending
            .peek()
            .is_some_and(|Reverse(entry)| entry.due <= now)
        {
            if let Some(Reverse(entry)) = self.pending.pop() {
                due.push(entry.task);
            }
        }
        due
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending.peek().map(|Reverse(entry)| entry.due)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tasks_come_out_by_deadline_then_insertion() {
        let start = Instant::now();
        let mut deferred = Deferred::new();
        deferred.schedule(start, Duration::from_millis(300), "late");
        deferred.schedule(start, Duration::from_millis(100), "early");
        deferred.schedule(start, Duration::from_millis(100), "early-second");

        assert!(deferred.take_due(start).is_empty());
        assert_eq!(deferred.len(), 3);
        assert_eq!(
            deferred.take_due(start + Duration::from_millis(100)),
            vec!["early", "early-second"]
        );
        assert_eq!(
            deferred.next_deadline(),
            Some(start + Duration::from_millis(300))
        );
        assert_eq!(deferred.len(), 1);
        assert_eq!(
            deferred.take_due(start + Duration::from_secs(1)),
            vec!["late"]
        );
        assert!(deferred.is_empty());
    }
}
