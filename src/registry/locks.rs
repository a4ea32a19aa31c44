use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// One mutex per model id. Mutations of the same id are serialized while
/// different ids proceed in parallel.
#[derive(Default)]
pub(crate) struct IdLocks {
    inner: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl IdLocks {
    pub(crate) fn for_id(&self, id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Drops the entry of a deleted model once nobody else holds or waits
    /// on it. The caller must have released its own handle first.
    pub(crate) fn release(&self, id: &str) {
        let mut locks = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(id).is_some_and(|lock| Arc::strong_count(lock) == 1) {
            locks.remove(id);
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_id_shares_lock() {
        let locks = IdLocks::default();
        let a = locks.for_id("m1");
        let b = locks.for_id("m1");
        let c = locks.for_id("m2");
        assert!(Arc::ptr_eq(&a, &b));
        assert!(!Arc::ptr_eq(&a, &c));

        drop((a, b));
        locks.release("m1");
        assert_eq!(locks.len(), 1);
    }

    #[test]
    fn test_release_keeps_entry_while_waiters_hold_it() {
        let locks = IdLocks::default();
        let waiter = locks.for_id("m1");

        locks.release("m1");
        assert_eq!(locks.len(), 1);
        assert!(Arc::ptr_eq(&waiter, &locks.for_id("m1")));

        drop(waiter);
        locks.release("m1");
        assert_eq!(locks.len(), 0);
    }

    #[test]
    fn test_held_lock_blocks_same_id_only() {
        let locks = IdLocks::default();
        let held = locks.for_id("m1");
        let _guard = held.lock().unwrap();

        assert!(locks.for_id("m1").try_lock().is_err());
        assert!(locks.for_id("m2").try_lock().is_ok());
    }
}
