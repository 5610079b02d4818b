use std::ops::Deref;
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::backend::ObjectBackend;
use crate::{StorageError, StorageResult};

/// Pooled, concurrency-bounded handle to the object store.
///
/// Acquiring waits for a free slot instead of failing; the slot goes back
/// to the pool when the returned [`ClientHandle`] is dropped, on every
/// exit path.
#[derive(Clone)]
pub struct ObjectStoreClient {
    backend: Arc<dyn ObjectBackend>,
    permits: Arc<Semaphore>,
    max_connections: usize,
}

impl ObjectStoreClient {
    pub fn new(backend: Arc<dyn ObjectBackend>, max_connections: usize) -> Self {
        let max_connections = max_connections.max(1);
        Self {
            backend,
            permits: Arc::new(Semaphore::new(max_connections)),
            max_connections,
        }
    }

    /// Wait for a pool slot
    pub async fn acquire(&self) -> StorageResult<ClientHandle> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StorageError::PoolClosed)?;

        Ok(ClientHandle {
            backend: self.backend.clone(),
            _permit: permit,
        })
    }

    pub fn max_connections(&self) -> usize {
        self.max_connections
    }

    /// Slots not currently held
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Stop handing out slots; waiting and future acquisitions fail
    pub fn close(&self) {
        self.permits.close();
    }
}

/// A held pool slot; derefs to the backend
pub struct ClientHandle {
    backend: Arc<dyn ObjectBackend>,
    _permit: OwnedSemaphorePermit,
}

impl Deref for ClientHandle {
    type Target = dyn ObjectBackend;

    fn deref(&self) -> &Self::Target {
        self.backend.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::memory::MemoryBackend;
    use std::time::Duration;

    #[tokio::test]
    async fn acquisition_waits_instead_of_failing() {
        let client = ObjectStoreClient::new(Arc::new(MemoryBackend::new()), 1);

        let held = client.acquire().await.unwrap();
        assert_eq!(client.available(), 0);

        let waiting = tokio::time::timeout(Duration::from_millis(20), client.acquire()).await;
        assert!(waiting.is_err(), "second acquisition should queue while the slot is held");

        drop(held);
        let handle = tokio::time::timeout(Duration::from_secs(1), client.acquire()).await;
        assert!(matches!(handle, Ok(Ok(_))));
    }

    #[tokio::test]
    async fn slot_is_released_when_the_call_fails() {
        let client = ObjectStoreClient::new(Arc::new(MemoryBackend::new()), 2);

        {
            let handle = client.acquire().await.unwrap();
            assert!(handle.head_bucket("missing").await.is_err());
        }

        assert_eq!(client.available(), 2);
    }

    #[tokio::test]
    async fn closed_pool_rejects_acquisition() {
        let client = ObjectStoreClient::new(Arc::new(MemoryBackend::new()), 1);
        client.close();
        assert!(matches!(client.acquire().await, Err(StorageError::PoolClosed)));
    }
}
