use std::collections::VecDeque;

use trinity_types::event::{CoordinatorEvent, EventRecord};
use trinity_types::primitives::Timestamp;

/// Bounded, sequence-numbered log of coordinator events.
///
/// Sequence numbers start at 0 and never repeat. When full, the oldest record
/// is dropped; readers asking for an evicted position resume at the oldest
/// retained one.
pub struct EventLog {
    records: VecDeque<EventRecord>,
    next_seq: u64,
    capacity: usize,
}

impl EventLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::new(),
            next_seq: 0,
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, event: CoordinatorEvent, timestamp: Timestamp) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        if self.records.len() == self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(EventRecord {
            seq,
            timestamp,
            event,
        });
        seq
    }

    /// Up to `limit` records with `seq >= from`, in order.
    pub fn since(&self, from: u64, limit: usize) -> Vec<EventRecord> {
        let skip = match self.records.front() {
            Some(first) if from > first.seq => (from - first.seq) as usize,
            _ => 0,
        };
        self.records.iter().skip(skip).take(limit).cloned().collect()
    }

    /// Sequence number the next event will get.
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expired(byte: u8) -> CoordinatorEvent {
        CoordinatorEvent::OperationExpired {
            operation_id: [byte; 32],
        }
    }

    #[test]
    fn test_since_is_inclusive_and_limited() {
        let mut log = EventLog::new(10);
        for i in 0..5 {
            assert_eq!(log.push(expired(i), 100), i as u64);
        }
        let records = log.since(2, 2);
        assert_eq!(records.iter().map(|r| r.seq).collect::<Vec<_>>(), vec![2, 3]);
        assert!(log.since(5, 10).is_empty());
    }

    #[test]
    fn test_eviction_keeps_sequence() {
        let mut log = EventLog::new(3);
        for i in 0..5 {
            log.push(expired(i), 100);
        }
        assert_eq!(log.len(), 3);
        assert_eq!(log.next_seq(), 5);
        // Position 0 was evicted; reading resumes at the oldest retained.
        let records = log.since(0, 10);
        assert_eq!(records.first().map(|r| r.seq), Some(2));
    }
}
