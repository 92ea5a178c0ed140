//! Poison recovery for std locks.
//!
//! Every guarded value here stays consistent between statements, so a panic
//! while holding a lock leaves nothing half-written and the data is reused.

use std::sync::LockResult;

use tracing::warn;

/// Take the guard out of any `lock()`, `read()` or `write()` result,
/// logging and clearing a poisoned state instead of propagating it.
pub(crate) fn recover<G>(result: LockResult<G>, source: &'static str, op: &'static str) -> G {
    result.unwrap_or_else(|poisoned| {
        warn!(source, op, "Lock poisoned by a panicked holder, reusing its data");
        poisoned.into_inner()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex, RwLock};

    #[test]
    fn test_poisoned_mutex_is_recovered() {
        let lock = Arc::new(Mutex::new(1));
        let held = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = held.lock().unwrap();
            panic!("poisoned on purpose");
        })
        .join();

        assert!(lock.is_poisoned());
        *recover(lock.lock(), "test", "increment") += 1;
        assert_eq!(*recover(lock.lock(), "test", "read"), 2);
    }

    #[test]
    fn test_poisoned_rwlock_is_recovered() {
        let lock = Arc::new(RwLock::new(String::from("kept")));
        let held = Arc::clone(&lock);
        let _ = std::thread::spawn(move || {
            let _guard = held.write().unwrap();
            panic!("poisoned on purpose");
        })
        .join();

        assert!(lock.is_poisoned());
        assert_eq!(*recover(lock.read(), "test", "read"), "kept");
        recover(lock.write(), "test", "write").push('!');
        assert_eq!(*recover(lock.read(), "test", "read"), "kept!");
    }
}
