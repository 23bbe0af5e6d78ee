//! Sliding-TTL duplicate suppression.
//!
//! An `IdempotencyWindow` remembers keys with the time they were last seen.
//! A hit refreshes that time, so a key that keeps being redelivered stays a
//! duplicate for as long as it keeps arriving; a key left alone for longer
//! than the TTL is forgotten and treated as fresh.
//!
//! The window logic is written once over a `ScoredSet` (member → unix-seconds
//! score), the shape of a Redis sorted set.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_zset;

use std::sync::Arc;

use tracing::debug;

use chatlog_core::Clock;

use crate::error::CacheError;

pub use in_memory::InMemoryScoredSet;
#[cfg(feature = "redis")]
pub use redis_zset::RedisScoredSet;

/// Score-ordered membership store.
pub trait ScoredSet: Send + Sync {
    fn score(&self, member: &str) -> Result<Option<i64>, CacheError>;
    fn put(&self, member: &str, score: i64) -> Result<(), CacheError>;
    fn remove(&self, member: &str) -> Result<(), CacheError>;
    fn clear(&self) -> Result<(), CacheError>;
}

impl<S> ScoredSet for Arc<S>
where
    S: ScoredSet + ?Sized,
{
    fn score(&self, member: &str) -> Result<Option<i64>, CacheError> {
        (**self).score(member)
    }

    fn put(&self, member: &str, score: i64) -> Result<(), CacheError> {
        (**self).put(member, score)
    }

    fn remove(&self, member: &str) -> Result<(), CacheError> {
        (**self).remove(member)
    }

    fn clear(&self) -> Result<(), CacheError> {
        (**self).clear()
    }
}

/// Sliding-TTL membership set.
#[derive(Debug)]
pub struct IdempotencyWindow<S, C> {
    set: S,
    clock: C,
    ttl_secs: i64,
}

impl<S, C> IdempotencyWindow<S, C>
where
    S: ScoredSet,
    C: Clock,
{
    pub fn new(set: S, clock: C, ttl_secs: i64) -> Self {
        Self {
            set,
            clock,
            ttl_secs: ttl_secs.max(0),
        }
    }

    /// True when `key` was seen within the TTL; a hit refreshes its time.
    /// A stale entry is removed and reported as absent.
    pub fn contains(&self, key: &str) -> Result<bool, CacheError> {
        let Some(stored) = self.set.score(key)? else {
            return Ok(false);
        };

        let now = self.clock.now();
        let age = now.saturating_sub(stored);
        if age <= self.ttl_secs {
            self.set.put(key, now)?;
            return Ok(true);
        }

        debug!(key, age, "dedup entry expired");
        self.set.remove(key)?;
        Ok(false)
    }

    /// Record `key` as seen now.
    pub fn add(&self, key: &str) -> Result<(), CacheError> {
        self.set.put(key, self.clock.now())
    }

    pub fn discard(&self, key: &str) -> Result<(), CacheError> {
        self.set.remove(key)
    }

    pub fn clear(&self) -> Result<(), CacheError> {
        self.set.clear()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatlog_core::ManualClock;

    const TTL: i64 = 10;

    fn window() -> (IdempotencyWindow<Arc<InMemoryScoredSet>, Arc<ManualClock>>, Arc<ManualClock>) {
        let clock = ManualClock::arc(1_000);
        let window = IdempotencyWindow::new(InMemoryScoredSet::arc(), clock.clone(), TTL);
        (window, clock)
    }

    #[test]
    fn absent_key_is_not_contained() {
        let (w, _) = window();
        assert!(!w.contains("1-1").unwrap());
    }

    #[test]
    fn key_within_ttl_is_duplicate() {
        let (w, clock) = window();
        w.add("1-1").unwrap();
        clock.advance(TTL);
        assert!(w.contains("1-1").unwrap());
    }

    #[test]
    fn key_past_ttl_is_fresh_and_evicted() {
        let (w, clock) = window();
        w.add("1-1").unwrap();
        clock.advance(TTL + 1);
        assert!(!w.contains("1-1").unwrap());
        // The stale entry was removed, so even "now" it stays absent.
        assert!(!w.contains("1-1").unwrap());
    }

    #[test]
    fn hits_slide_the_window() {
        let (w, clock) = window();
        w.add("1-1").unwrap();
        for _ in 0..5 {
            clock.advance(TTL);
            assert!(w.contains("1-1").unwrap());
        }
    }

    #[test]
    fn discard_and_clear() {
        let (w, _) = window();
        w.add("a").unwrap();
        w.add("b").unwrap();
        w.discard("a").unwrap();
        assert!(!w.contains("a").unwrap());
        assert!(w.contains("b").unwrap());
        w.clear().unwrap();
        assert!(!w.contains("b").unwrap());
    }

    #[test]
    fn corrupt_score_is_treated_as_expired() {
        let set = InMemoryScoredSet::arc();
        let w = IdempotencyWindow::new(set.clone(), ManualClock::arc(1_000), TTL);
        set.put("1-1", i64::MIN).unwrap();
        assert!(!w.contains("1-1").unwrap());
        assert_eq!(set.score("1-1").unwrap(), None);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            /// Property: a single add followed by one lookup after `gap`
            /// seconds is a duplicate exactly when `gap <= ttl`.
            #[test]
            fn membership_matches_ttl(ttl in 0i64..3600, gap in 0i64..7200) {
                let clock = ManualClock::arc(50_000);
                let w = IdempotencyWindow::new(InMemoryScoredSet::arc(), clock.clone(), ttl);
                w.add("k").unwrap();
                clock.advance(gap);
                prop_assert_eq!(w.contains("k").unwrap(), gap <= ttl);
            }
        }
    }
}
