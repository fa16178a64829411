//! Keyed async mutex serializing code requests per phone number.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockTable = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

#[derive(Debug, Clone, Default)]
pub struct PhoneLocks {
    table: LockTable,
}

/// Held while a request for one phone is in progress. The table entry is
/// removed when the last holder or waiter lets go.
#[derive(Debug)]
pub struct PhoneGuard {
    table: LockTable,
    phone: String,
    lock: Arc<AsyncMutex<()>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl PhoneLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, phone: &str) -> PhoneGuard {
        let lock = self
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(phone.to_string())
            .or_default()
            .clone();

        let guard = lock.clone().lock_owned().await;
        PhoneGuard {
            table: self.table.clone(),
            phone: phone.to_string(),
            lock,
            guard: Some(guard),
        }
    }

    /// Number of phones with a holder or waiter.
    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PhoneGuard {
    fn drop(&mut self) {
        self.guard.take();

        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        // One reference in the table, one here: nobody else is waiting.
        if Arc::strong_count(&self.lock) == 2 {
            table.remove(&self.phone);
        }
    }
}
