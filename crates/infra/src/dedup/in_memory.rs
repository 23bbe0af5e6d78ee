use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::ScoredSet;
use crate::error::CacheError;

/// In-memory scored set for tests/dev.
#[derive(Debug, Default)]
pub struct InMemoryScoredSet {
    inner: RwLock<HashMap<String, i64>>,
}

impl InMemoryScoredSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> CacheError {
    CacheError::Command("lock poisoned".to_string())
}

impl ScoredSet for InMemoryScoredSet {
    fn score(&self, member: &str) -> Result<Option<i64>, CacheError> {
        let map = self.inner.read().map_err(|_| poisoned())?;
        Ok(map.get(member).copied())
    }

    fn put(&self, member: &str, score: i64) -> Result<(), CacheError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.insert(member.to_string(), score);
        Ok(())
    }

    fn remove(&self, member: &str) -> Result<(), CacheError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.remove(member);
        Ok(())
    }

    fn clear(&self) -> Result<(), CacheError> {
        let mut map = self.inner.write().map_err(|_| poisoned())?;
        map.clear();
        Ok(())
    }
}
