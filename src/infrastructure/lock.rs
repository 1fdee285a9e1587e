use crate::domain::ports::BatchLock;
use crate::error::{ProcessorError, Result};
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};

/// Process-wide advisory lock table.
///
/// Clones share the same table. Acquisition never waits: a held key is
/// reported as unavailable and the caller decides what to do.
#[derive(Default, Clone)]
pub struct ProcessLock {
    held: Arc<Mutex<HashSet<i64>>>,
}

impl ProcessLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_held(&self, key: i64) -> bool {
        self.held.lock().map(|held| held.contains(&key)).unwrap_or(false)
    }
}

#[async_trait]
impl BatchLock for ProcessLock {
    async fn try_acquire(&self, key: i64) -> Result<bool> {
        let mut held = self
            .held
            .lock()
            .map_err(|e| ProcessorError::InternalError(e.to_string().into()))?;
        Ok(held.insert(key))
    }

    async fn release(&self, key: i64) -> Result<()> {
        let mut held = self
            .held
            .lock()
            .map_err(|e| ProcessorError::InternalError(e.to_string().into()))?;
        held.remove(&key);
        Ok(())
    }
}
