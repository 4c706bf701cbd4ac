use std::collections::HashMap;

use trinity_types::primitives::{Address, Timestamp};

/// A token bucket driven by ledger time.
///
/// One token is restored every `refill_interval` seconds, up to `capacity`.
/// The bucket never reads the wall clock: callers pass the host timestamp so
/// that every replica of the coordinator makes the same decision.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    capacity: u64,
    tokens: u64,
    refill_interval: u64,
    last_refill: Timestamp,
}

impl TokenBucket {
    /// Create a full bucket.
    pub fn new(capacity: u64, refill_interval: u64, now: Timestamp) -> Self {
        Self {
            capacity,
            tokens: capacity,
            refill_interval: refill_interval.max(1),
            last_refill: now,
        }
    }

    pub fn refill(&mut self, now: Timestamp) {
        let elapsed = now.saturating_sub(self.last_refill);
        let new_tokens = elapsed / self.refill_interval;
        if new_tokens > 0 {
            self.tokens = self.tokens.saturating_add(new_tokens).min(self.capacity);
            // Keep the remainder so partial intervals are not lost.
            self.last_refill += new_tokens * self.refill_interval;
        }
    }

    /// Refill, then take `tokens` if available.
    pub fn try_consume(&mut self, tokens: u64, now: Timestamp) -> bool {
        self.refill(now);
        if self.tokens >= tokens {
            self.tokens -= tokens;
            true
        } else {
            false
        }
    }

    /// Currently available tokens (without refilling).
    pub fn available(&self) -> u64 {
        self.tokens
    }

    /// True once the bucket would be full at `now`; such a bucket carries no
    /// information and can be dropped.
    pub fn is_idle(&self, now: Timestamp) -> bool {
        let missing = self.capacity - self.tokens;
        now.saturating_sub(self.last_refill) / self.refill_interval >= missing
    }
}

/// Per-initiator throttle for operation creation.
pub struct InitiatorThrottle {
    buckets: HashMap<Address, TokenBucket>,
    capacity: u64,
    refill_interval: u64,
}

impl InitiatorThrottle {
    pub fn new(capacity: u64, refill_interval: u64) -> Self {
        Self {
            buckets: HashMap::new(),
            capacity,
            refill_interval,
        }
    }

    /// Take one token from `initiator`'s bucket. Returns false when exhausted.
    pub fn check(&mut self, initiator: &Address, now: Timestamp) -> bool {
        let (capacity, interval) = (self.capacity, self.refill_interval);
        self.buckets
            .entry(*initiator)
            .or_insert_with(|| TokenBucket::new(capacity, interval, now))
            .try_consume(1, now)
    }

    /// Drop buckets that have fully refilled. Returns how many were removed.
    pub fn prune_idle(&mut self, now: Timestamp) -> usize {
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_idle(now));
        before - self.buckets.len()
    }

    pub fn tracked(&self) -> usize {
        self.buckets.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_bucket_consume_and_exhaust() {
        let mut bucket = TokenBucket::new(3, 10, 1_000);
        assert!(bucket.try_consume(2, 1_000));
        assert!(bucket.try_consume(1, 1_000));
        assert!(!bucket.try_consume(1, 1_005));
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_token_bucket_refill_keeps_partial_interval() {
        let mut bucket = TokenBucket::new(5, 10, 0);
        assert!(bucket.try_consume(5, 0));

        bucket.refill(25);
        assert_eq!(bucket.available(), 2);
        // 25 -> 30 completes the third interval.
        bucket.refill(30);
        assert_eq!(bucket.available(), 3);
    }

    #[test]
    fn test_token_bucket_refill_capped_at_capacity() {
        let mut bucket = TokenBucket::new(4, 1, 0);
        assert!(bucket.try_consume(1, 0));
        bucket.refill(1_000_000);
        assert_eq!(bucket.available(), 4);
    }

    #[test]
    fn test_clock_going_backwards_adds_nothing() {
        let mut bucket = TokenBucket::new(2, 1, 100);
        assert!(bucket.try_consume(2, 100));
        bucket.refill(50);
        assert_eq!(bucket.available(), 0);
    }

    #[test]
    fn test_throttle_is_per_initiator() {
        let mut throttle = InitiatorThrottle::new(2, 60);
        let alice = [1u8; 20];
        let bob = [2u8; 20];
        assert!(throttle.check(&alice, 0));
        assert!(throttle.check(&alice, 0));
        assert!(!throttle.check(&alice, 0));
        assert!(throttle.check(&bob, 0));
        assert!(throttle.check(&alice, 60));
    }

    #[test]
    fn test_prune_idle_buckets() {
        let mut throttle = InitiatorThrottle::new(2, 10);
        throttle.check(&[1u8; 20], 0);
        throttle.check(&[2u8; 20], 0);
        throttle.check(&[2u8; 20], 0);
        assert_eq!(throttle.tracked(), 2);

        // After 10s the first bucket is full again, the second is not.
        assert_eq!(throttle.prune_idle(10), 1);
        assert_eq!(throttle.tracked(), 1);
        assert_eq!(throttle.prune_idle(20), 1);
        assert_eq!(throttle.tracked(), 0);
    }
}
