use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

use crate::model::ResultId;

/// Advisory locks serializing settlement runs of the same result.
/// Runs for different results proceed in parallel.
#[derive(Debug, Default)]
pub struct SettlementLocks {
    locks: Mutex<HashMap<ResultId, Arc<Mutex<()>>>>,
}

impl SettlementLocks {
    pub fn for_result(&self, id: ResultId) -> Arc<Mutex<()>> {
        self.locks.lock().entry(id).or_default().clone()
    }

    /// Hand back a lock taken with `for_result`. The entry is dropped once
    /// no other run holds it.
    pub fn release(&self, id: ResultId, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks.lock();
        drop(lock);
        if locks.get(&id).is_some_and(|entry| Arc::strong_count(entry) == 1) {
            locks.remove(&id);
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.locks.lock().len()
    }
}
