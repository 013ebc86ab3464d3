use std::sync::Arc;

use tokio::sync::Semaphore;

use xviz_api::{DecodeError, MetadataProvider, ParserConfig, compose_metadata};

use crate::config::PoolConfig;
use crate::error::EngineError;
use crate::transport::{Delivery, PendingDelivery, spawn_with_permit};

/// Dispatches each message to its own one-shot worker, with at most
/// `max_in_flight` workers alive at once.
///
/// Results of different messages are independent; callers that need
/// ordering keep it themselves (`decode_all` does so for a batch).
pub struct DecodePool {
    config: Arc<ParserConfig>,
    permits: Arc<Semaphore>,
    providers: Vec<Arc<dyn MetadataProvider>>,
}

impl std::fmt::Debug for DecodePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodePool")
            .field("config", &self.config)
            .field("available", &self.permits.available_permits())
            .field("providers", &self.providers.len())
            .finish()
    }
}

impl DecodePool {
    pub fn new(config: Arc<ParserConfig>, pool: &PoolConfig) -> Self {
        Self {
            config,
            permits: Arc::new(Semaphore::new(pool.max_in_flight.max(1))),
            providers: Vec::new(),
        }
    }

    /// Register a metadata capability. Providers are queried in
    /// registration order.
    pub fn with_provider(mut self, provider: Arc<dyn MetadataProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn config(&self) -> &Arc<ParserConfig> {
        &self.config
    }

    /// `{ "ui_config": ... }` composed from every registered provider.
    pub fn metadata(&self) -> serde_json::Value {
        compose_metadata(&self.providers)
    }

    /// Workers that can start right now.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    /// Start a fresh worker for `payload`, waiting for a free slot first.
    pub async fn submit(&self, payload: Vec<u8>) -> Result<PendingDelivery, EngineError> {
        let permit = self
            .permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| EngineError::PoolClosed)?;
        Ok(spawn_with_permit(self.config.clone(), Some(permit)).post(payload))
    }

    /// Decode a batch. Results come back in input order.
    ///
    /// If the pool closes partway, the workers already started are awaited
    /// and their results discarded, then `PoolClosed` is returned: no worker
    /// of the batch outlives the call.
    pub async fn decode_all(
        &self,
        payloads: Vec<Vec<u8>>,
    ) -> Result<Vec<Result<Delivery, DecodeError>>, EngineError> {
        let total = payloads.len();
        let mut pending = Vec::with_capacity(total);
        for payload in payloads {
            match self.submit(payload).await {
                Ok(p) => pending.push(p),
                Err(e) => {
                    tracing::warn!(
                        started = pending.len(),
                        total,
                        error = %e,
                        "batch interrupted, draining started workers"
                    );
                    for p in pending {
                        let _ = p.wait().await;
                    }
                    return Err(e);
                }
            }
        }
        let mut results = Vec::with_capacity(pending.len());
        for p in pending {
            results.push(p.wait().await);
        }
        Ok(results)
    }

    /// Refuse new work. Workers already running finish normally.
    pub fn close(&self) {
        self.permits.close();
        tracing::info!("decode pool closed");
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::task::Poll;

    use xviz_api::ErrorKind;

    use super::*;

    fn pool(max_in_flight: usize) -> DecodePool {
        DecodePool::new(Arc::new(ParserConfig::default()), &PoolConfig { max_in_flight })
    }

    #[tokio::test]
    async fn batch_results_keep_input_order() {
        let pool = pool(2);
        let payloads = (0..6)
            .map(|i| {
                if i == 3 {
                    b"[{".to_vec()
                } else {
                    format!(r#"[{{"time": {i}}}]"#).into_bytes()
                }
            })
            .collect();

        let results = pool.decode_all(payloads).await.unwrap();
        assert_eq!(results.len(), 6);
        for (i, result) in results.into_iter().enumerate() {
            match result {
                Ok(delivery) => assert_eq!(delivery.records[0].time, i as f64),
                Err(e) => {
                    assert_eq!(i, 3);
                    assert_eq!(e.kind(), ErrorKind::MalformedSyntax);
                }
            }
        }
    }

    #[tokio::test]
    async fn permits_return_after_delivery() {
        let pool = pool(1);
        let pending = pool.submit(b"[]".to_vec()).await.unwrap();
        pending.wait().await.unwrap();
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn closed_pool_rejects_work() {
        let pool = pool(1);
        pool.close();
        let err = pool.submit(b"[]".to_vec()).await.unwrap_err();
        assert!(matches!(err, EngineError::PoolClosed));
    }

    #[tokio::test]
    async fn closing_mid_batch_drains_started_workers() {
        let pool = pool(1);
        let batch = pool.decode_all(vec![b"[]".to_vec(), b"[]".to_vec()]);
        tokio::pin!(batch);

        // First poll starts the first worker and parks on the second slot.
        let first = std::future::poll_fn(|cx| Poll::Ready(batch.as_mut().poll(cx))).await;
        assert!(first.is_pending());
        assert_eq!(pool.available(), 0);

        pool.close();
        let err = batch.await.unwrap_err();
        assert!(matches!(err, EngineError::PoolClosed));
        // The started worker has terminated and handed its slot back.
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn metadata_without_providers_is_empty() {
        let metadata = pool(1).metadata();
        assert_eq!(metadata, serde_json::json!({ "ui_config": {} }));
    }
}
