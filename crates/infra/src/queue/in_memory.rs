use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use super::{DurableQueue, QueueError};

/// In-memory queue for tests/dev.
///
/// `set_unavailable(true)` makes every operation fail, standing in for an
/// unreachable backend.
#[derive(Debug)]
pub struct InMemoryQueue {
    name: String,
    items: Mutex<VecDeque<Vec<u8>>>,
    unavailable: AtomicBool,
}

impl InMemoryQueue {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            items: Mutex::new(VecDeque::new()),
            unavailable: AtomicBool::new(false),
        }
    }

    pub fn arc(name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self::new(name))
    }

    /// Current contents, head first.
    pub fn contents(&self) -> Vec<Vec<u8>> {
        self.items
            .lock()
            .map(|items| items.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), QueueError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(QueueError::Connection(format!("{} is unavailable", self.name)));
        }
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, VecDeque<Vec<u8>>>, QueueError> {
        self.items
            .lock()
            .map_err(|_| QueueError::Command("lock poisoned".to_string()))
    }
}

impl DurableQueue for InMemoryQueue {
    fn name(&self) -> &str {
        &self.name
    }

    fn put(&self, payload: &[u8]) -> Result<(), QueueError> {
        self.check()?;
        self.lock()?.push_back(payload.to_vec());
        Ok(())
    }

    fn get(&self) -> Result<Option<Vec<u8>>, QueueError> {
        self.check()?;
        Ok(self.lock()?.pop_front())
    }

    fn size(&self) -> Result<u64, QueueError> {
        self.check()?;
        Ok(self.lock()?.len() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: u8) -> InMemoryQueue {
        let q = InMemoryQueue::new("insert");
        for i in 0..n {
            q.put(&[i]).unwrap();
        }
        q
    }

    #[test]
    fn fifo_order() {
        let q = filled(3);
        assert_eq!(q.get().unwrap(), Some(vec![0]));
        assert_eq!(q.get().unwrap(), Some(vec![1]));
        assert_eq!(q.size().unwrap(), 1);
    }

    #[test]
    fn get_on_empty_is_none() {
        let q = InMemoryQueue::new("insert");
        assert_eq!(q.get().unwrap(), None);
    }

    #[test]
    fn bulk_get_under_fill_returns_what_is_there() {
        let q = filled(3);
        let batch = q.bulk_get(10).unwrap();
        assert_eq!(batch, vec![vec![0], vec![1], vec![2]]);
        assert_eq!(q.size().unwrap(), 0);
    }

    #[test]
    fn bulk_get_respects_max() {
        let q = filled(5);
        assert_eq!(q.bulk_get(2).unwrap().len(), 2);
        assert_eq!(q.size().unwrap(), 3);
    }

    #[test]
    fn put_all_appends_in_order() {
        let q = filled(1);
        q.put_all(&[vec![7], vec![8]]).unwrap();
        assert_eq!(q.contents(), vec![vec![0], vec![7], vec![8]]);
    }

    #[test]
    fn unavailable_backend_errors() {
        let q = filled(1);
        q.set_unavailable(true);
        assert!(q.bulk_get(10).is_err());
        let err = q.put_all(&[vec![1], vec![2]]).unwrap_err();
        assert_eq!(err.requeued, 0);
        q.set_unavailable(false);
        assert_eq!(q.size().unwrap(), 1);
    }
}
