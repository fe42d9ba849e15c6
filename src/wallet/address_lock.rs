//! Per-address construction locks
//!
//! Transaction construction for one sender address must be serialized:
//! two concurrent builders would otherwise select the same UTXOs. The
//! registry hands out one mutex per address, created on demand, and leaves
//! unrelated addresses fully parallel. It is an explicit object owned by
//! the node engine rather than process-global state.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

/// Registry of one mutex per address
#[derive(Debug, Default)]
pub struct AddressLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl AddressLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// The mutex for `addr`, created on first use
    ///
    /// Callers hold the returned lock across build, sign, verify, and
    /// admit of any transaction spending from `addr`.
    pub fn lock_for(&self, addr: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(addr.to_string()).or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_address_same_lock() {
        let locks = AddressLocks::new();
        let first = locks.lock_for("addr1");
        let second = locks.lock_for("addr1");
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_different_addresses_different_locks() {
        let locks = AddressLocks::new();
        let first = locks.lock_for("addr1");
        let second = locks.lock_for("addr2");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_serializes_critical_sections() {
        let locks = Arc::new(AddressLocks::new());
        let counter = Arc::new(Mutex::new(0i32));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let locks = Arc::clone(&locks);
                let counter = Arc::clone(&counter);
                std::thread::spawn(move || {
                    let lock = locks.lock_for("addr1");
                    let _guard = lock.lock();
                    let value = *counter.lock();
                    std::thread::yield_now();
                    *counter.lock() = value + 1;
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*counter.lock(), 8);
    }
}
