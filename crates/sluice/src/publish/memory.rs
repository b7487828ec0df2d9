use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::Publisher;
use crate::error::PublishError;

/// Collects payloads in memory. Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Debug, Default)]
struct Inner {
    payloads: Vec<Vec<u8>>,
    failing: u32,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reject the next `count` payloads.
    pub fn fail_next(&self, count: u32) {
        self.inner().failing = count;
    }

    /// Accepted payloads, oldest first.
    pub fn payloads(&self) -> Vec<Vec<u8>> {
        self.inner().payloads.clone()
    }

    pub fn len(&self) -> usize {
        self.inner().payloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Publisher for MemoryPublisher {
    async fn publish(&self, payload: Vec<u8>) -> Result<(), PublishError> {
        let mut inner = self.inner();
        if inner.failing > 0 {
            inner.failing -= 1;
            return Err(PublishError::Rejected {
                message: "injected failure".to_string(),
            });
        }
        inner.payloads.push(payload);
        Ok(())
    }

    fn destination(&self) -> String {
        "memory".to_string()
    }
}
