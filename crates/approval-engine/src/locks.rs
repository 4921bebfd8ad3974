//! Per-request mutual exclusion for read-evaluate-write transitions

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Lock table keyed by request id. Requests never contend with each other.
#[derive(Debug, Default)]
pub struct RequestLocks {
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl RequestLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mutex guarding `request_id`, created on first use
    pub fn acquire(&self, request_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(request_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone()
    }

    /// Drop the entry of a request that reached a terminal status
    pub fn release(&self, request_id: &str) {
        self.locks.remove(request_id);
    }

    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_same_key_shares_mutex() {
        let locks = RequestLocks::new();
        let a = locks.acquire("apr_1");
        let b = locks.acquire("apr_1");

        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(locks.len(), 1);

        let _guard = a.lock().await;
        assert!(b.try_lock().is_err());
    }

    #[tokio::test]
    async fn test_distinct_keys_do_not_contend() {
        let locks = RequestLocks::new();
        let a = locks.acquire("apr_1");
        let b = locks.acquire("apr_2");

        let _guard = a.lock().await;
        assert!(b.try_lock().is_ok());
    }

    #[test]
    fn test_release() {
        let locks = RequestLocks::new();
        locks.acquire("apr_1");
        locks.release("apr_1");
        assert!(locks.is_empty());
    }
}
