use crate::error::CoreError;
use crate::policy::Policy;
use crate::time::now_ms;
use async_trait::async_trait;
use courier_api::types::{Envelope, StorageLocation};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep, timeout};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColdReceipt {
    pub content_id: String,
    pub size: u64,
    pub pinned: bool,
}

/// Content-addressed cold tier; the pinning provider behind it is hidden.
#[async_trait]
pub trait ColdStore: Send + Sync {
    async fn upload(&self, bytes: &[u8]) -> Result<ColdReceipt, CoreError>;
    async fn download(&self, content_id: &str) -> Result<Vec<u8>, CoreError>;
    async fn pin(&self, content_id: &str) -> Result<(), CoreError>;
}

#[derive(Clone, Default)]
pub struct InMemoryColdStore {
    entries: Arc<Mutex<HashMap<String, Vec<u8>>>>,
    pins: Arc<Mutex<HashMap<String, bool>>>,
}

impl InMemoryColdStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn is_pinned(&self, content_id: &str) -> bool {
        self.pins
            .lock()
            .await
            .get(content_id)
            .copied()
            .unwrap_or(false)
    }
}

pub fn content_id_for(bytes: &[u8]) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(b"courier:content:v1");
    hasher.update(bytes);
    hasher.finalize().to_hex().to_string()
}

#[async_trait]
impl ColdStore for InMemoryColdStore {
    async fn upload(&self, bytes: &[u8]) -> Result<ColdReceipt, CoreError> {
        let content_id = content_id_for(bytes);
        let mut guard = self.entries.lock().await;
        guard.insert(content_id.clone(), bytes.to_vec());
        Ok(ColdReceipt {
            content_id,
            size: bytes.len() as u64,
            pinned: false,
        })
    }

    async fn download(&self, content_id: &str) -> Result<Vec<u8>, CoreError> {
        let guard = self.entries.lock().await;
        guard
            .get(content_id)
            .cloned()
            .ok_or_else(|| CoreError::ColdTier("missing".to_string()))
    }

    async fn pin(&self, content_id: &str) -> Result<(), CoreError> {
        let entries = self.entries.lock().await;
        if !entries.contains_key(content_id) {
            return Err(CoreError::ColdTier("missing".to_string()));
        }
        drop(entries);
        self.pins.lock().await.insert(content_id.to_string(), true);
        Ok(())
    }
}

struct HotEntry {
    envelope: Envelope,
    stored_at: u64,
}

#[derive(Default)]
struct HotState {
    entries: HashMap<String, HotEntry>,
    order: VecDeque<String>,
    cold_index: HashMap<String, String>,
}

#[derive(Clone)]
pub struct TierManager {
    hot: Arc<Mutex<HotState>>,
    cold: Arc<dyn ColdStore>,
    policy: Policy,
}

impl TierManager {
    pub fn new(cold: Arc<dyn ColdStore>, policy: Policy) -> Self {
        Self {
            hot: Arc::new(Mutex::new(HotState::default())),
            cold,
            policy,
        }
    }

    // Always writes hot; a cold request additionally uploads eagerly.
    // Upload failure degrades to hot-only.
    pub async fn store(&self, envelope: Envelope) -> Result<Envelope, CoreError> {
        let mut envelope = envelope;
        if envelope.storage_location == StorageLocation::Cold && envelope.cold_reference.is_none() {
            match self.upload_envelope(&envelope).await {
                Ok(receipt) => {
                    envelope.cold_reference = Some(receipt.content_id);
                }
                Err(err) => {
                    log::warn!("cold upload failed for {}: {}, staying hot", envelope.id, err);
                    envelope.storage_location = StorageLocation::Hot;
                }
            }
        }
        self.insert_hot(envelope.clone()).await;
        Ok(envelope)
    }

    pub async fn retrieve(&self, id_or_content_id: &str) -> Result<Envelope, CoreError> {
        let content_id = {
            let guard = self.hot.lock().await;
            if let Some(entry) = guard.entries.get(id_or_content_id) {
                return Ok(entry.envelope.clone());
            }
            guard
                .cold_index
                .get(id_or_content_id)
                .cloned()
                .unwrap_or_else(|| id_or_content_id.to_string())
        };
        let bytes = self.fetch_cold(&content_id).await?;
        let mut envelope: Envelope =
            serde_json::from_slice(&bytes).map_err(|_| CoreError::ColdTier("codec".to_string()))?;
        envelope.storage_location = StorageLocation::Cold;
        envelope.cold_reference = Some(content_id);
        self.insert_hot(envelope.clone()).await;
        Ok(envelope)
    }

    pub async fn offload(&self, envelope: &Envelope) -> Result<ColdReceipt, CoreError> {
        let receipt = self.upload_envelope(envelope).await?;
        self.cold_op(self.cold.pin(&receipt.content_id)).await?;
        let mut guard = self.hot.lock().await;
        guard
            .cold_index
            .insert(envelope.id.to_string(), receipt.content_id.clone());
        Ok(receipt)
    }

    // Entries whose upload fails stay hot until the next sweep.
    pub async fn sweep_expired(&self, now: u64) -> Vec<String> {
        let expired: Vec<Envelope> = {
            let guard = self.hot.lock().await;
            guard
                .entries
                .values()
                .filter(|e| e.envelope.ttl > 0 && e.stored_at.saturating_add(e.envelope.ttl) <= now)
                .map(|e| e.envelope.clone())
                .collect()
        };
        let mut demoted = Vec::new();
        for mut envelope in expired {
            if envelope.cold_reference.is_none() {
                match self.upload_envelope(&envelope).await {
                    Ok(receipt) => {
                        envelope.cold_reference = Some(receipt.content_id);
                    }
                    Err(err) => {
                        log::warn!("ttl demotion deferred for {}: {}", envelope.id, err);
                        continue;
                    }
                }
            }
            let key = envelope.id.to_string();
            let mut guard = self.hot.lock().await;
            if let Some(reference) = envelope.cold_reference.clone() {
                guard.cold_index.insert(key.clone(), reference);
            }
            guard.entries.remove(&key);
            guard.order.retain(|k| k != &key);
            demoted.push(key);
        }
        demoted
    }

    pub async fn hot_len(&self) -> usize {
        self.hot.lock().await.entries.len()
    }

    pub async fn contains_hot(&self, key: &str) -> bool {
        self.hot.lock().await.entries.contains_key(key)
    }

    pub async fn cold_reference_for(&self, id: &str) -> Option<String> {
        self.hot.lock().await.cold_index.get(id).cloned()
    }

    async fn insert_hot(&self, envelope: Envelope) {
        let key = envelope.id.to_string();
        let evicted = {
            let mut guard = self.hot.lock().await;
            if let Some(reference) = envelope.cold_reference.clone() {
                guard.cold_index.insert(key.clone(), reference);
            }
            if !guard.entries.contains_key(&key) {
                guard.order.push_back(key.clone());
            }
            guard.entries.insert(
                key,
                HotEntry {
                    envelope,
                    stored_at: now_ms(),
                },
            );
            let mut evicted = Vec::new();
            while guard.entries.len() > self.policy.hot_capacity {
                let Some(oldest) = guard.order.pop_front() else {
                    break;
                };
                if let Some(entry) = guard.entries.remove(&oldest) {
                    evicted.push(entry.envelope);
                }
            }
            evicted
        };
        // Lazy cold write for evictees without a reference.
        for envelope in evicted {
            if envelope.cold_reference.is_some() {
                continue;
            }
            match self.upload_envelope(&envelope).await {
                Ok(receipt) => {
                    let mut guard = self.hot.lock().await;
                    guard
                        .cold_index
                        .insert(envelope.id.to_string(), receipt.content_id);
                }
                Err(err) => {
                    log::warn!("evicted {} without cold copy: {}", envelope.id, err);
                }
            }
        }
    }

    async fn upload_envelope(&self, envelope: &Envelope) -> Result<ColdReceipt, CoreError> {
        let mut wire = envelope.clone();
        wire.cold_reference = None;
        let bytes = serde_json::to_vec(&wire).map_err(|_| CoreError::Storage)?;
        self.cold_op(self.cold.upload(&bytes)).await
    }

    async fn fetch_cold(&self, content_id: &str) -> Result<Vec<u8>, CoreError> {
        let tries = self.policy.cold_fetch_tries.max(1);
        let mut last = CoreError::ColdTier("unreachable".to_string());
        for attempt in 0..tries {
            if attempt > 0 {
                sleep(Duration::from_millis(
                    self.policy.cold_retry_delay_ms.saturating_mul(attempt as u64),
                ))
                .await;
            }
            match self.cold_op(self.cold.download(content_id)).await {
                Ok(bytes) => return Ok(bytes),
                Err(err) => {
                    log::warn!("cold fetch {} attempt {} failed: {}", content_id, attempt + 1, err);
                    last = err;
                }
            }
        }
        Err(last)
    }

    async fn cold_op<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, CoreError>>,
    ) -> Result<T, CoreError> {
        match timeout(Duration::from_millis(self.policy.cold_op_timeout_ms), fut).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::ColdTier("timeout".to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_api::types::{ContentType, DeliveryStatus};
    use uuid::Uuid;

    fn envelope(ttl: u64) -> Envelope {
        Envelope {
            id: Uuid::new_v4(),
            thread_id: "t".to_string(),
            sequence: 0,
            sender: "a".to_string(),
            recipient: "b".to_string(),
            content: "cafe".to_string(),
            content_type: ContentType::Text,
            encryption_key_id: "k".to_string(),
            nonce: "00".to_string(),
            timestamp: 1,
            ttl,
            delivery_status: DeliveryStatus::Sent,
            acks: Vec::new(),
            storage_location: StorageLocation::Hot,
            signature: String::new(),
            cold_reference: None,
            delivery_token: None,
            chain_ref: None,
        }
    }

    fn manager(cold: Arc<dyn ColdStore>) -> TierManager {
        TierManager::new(
            cold,
            Policy {
                hot_capacity: 4,
                cold_retry_delay_ms: 1,
                ..Policy::default()
            },
        )
    }

    struct DownCold;

    #[async_trait]
    impl ColdStore for DownCold {
        async fn upload(&self, _bytes: &[u8]) -> Result<ColdReceipt, CoreError> {
            Err(CoreError::ColdTier("down".to_string()))
        }

        async fn download(&self, _content_id: &str) -> Result<Vec<u8>, CoreError> {
            Err(CoreError::ColdTier("down".to_string()))
        }

        async fn pin(&self, _content_id: &str) -> Result<(), CoreError> {
            Err(CoreError::ColdTier("down".to_string()))
        }
    }

    #[tokio::test]
    async fn hot_hit_after_store() {
        let tier = manager(Arc::new(InMemoryColdStore::new()));
        let env = envelope(10_000);
        let stored = tier.store(env.clone()).await.expect("store");
        let got = tier.retrieve(&env.id.to_string()).await.expect("retrieve");
        assert_eq!(got, stored);
    }

    #[tokio::test]
    async fn eager_cold_store_sets_reference() {
        let cold = Arc::new(InMemoryColdStore::new());
        let tier = manager(cold.clone());
        let mut env = envelope(10_000);
        env.storage_location = StorageLocation::Cold;
        let stored = tier.store(env).await.expect("store");
        let reference = stored.cold_reference.clone().expect("reference");
        let bytes = cold.download(&reference).await.expect("download");
        let uploaded: Envelope = serde_json::from_slice(&bytes).expect("decode");
        assert_eq!(uploaded.id, stored.id);
    }

    #[tokio::test]
    async fn cold_miss_repopulates_hot() {
        let cold = Arc::new(InMemoryColdStore::new());
        let tier = manager(cold.clone());
        let env = envelope(10_000);
        let receipt = tier.offload(&env).await.expect("offload");
        assert!(cold.is_pinned(&receipt.content_id).await);

        let fetched = tier.retrieve(&receipt.content_id).await.expect("fetch");
        assert_eq!(fetched.id, env.id);
        assert!(tier.contains_hot(&env.id.to_string()).await);
    }

    #[tokio::test]
    async fn cold_outage_degrades_without_failing_store() {
        let tier = manager(Arc::new(DownCold));
        let mut env = envelope(10_000);
        env.storage_location = StorageLocation::Cold;
        let stored = tier.store(env.clone()).await.expect("store");
        assert_eq!(stored.storage_location, StorageLocation::Hot);
        assert!(stored.cold_reference.is_none());
        assert!(tier.contains_hot(&env.id.to_string()).await);
    }

    #[tokio::test]
    async fn cold_outage_fails_retrieval_of_missing_entry() {
        let tier = manager(Arc::new(DownCold));
        let err = tier.retrieve("nope").await.unwrap_err();
        assert!(matches!(err, CoreError::ColdTier(_)));
    }

    #[tokio::test]
    async fn sweep_demotes_expired_entries() {
        let cold = Arc::new(InMemoryColdStore::new());
        let tier = manager(cold.clone());
        let env = envelope(1);
        tier.store(env.clone()).await.expect("store");
        sleep(Duration::from_millis(5)).await;

        let demoted = tier.sweep_expired(now_ms()).await;
        assert_eq!(demoted, vec![env.id.to_string()]);
        assert!(!tier.contains_hot(&env.id.to_string()).await);

        // Still retrievable through the cold tier.
        let restored = tier.retrieve(&env.id.to_string()).await.expect("retrieve");
        assert_eq!(restored.id, env.id);
        assert_eq!(restored.storage_location, StorageLocation::Cold);
    }

    #[tokio::test]
    async fn sweep_keeps_entry_when_cold_is_down() {
        let tier = manager(Arc::new(DownCold));
        let env = envelope(1);
        tier.store(env.clone()).await.expect("store");
        sleep(Duration::from_millis(5)).await;
        let demoted = tier.sweep_expired(now_ms()).await;
        assert!(demoted.is_empty());
        assert!(tier.contains_hot(&env.id.to_string()).await);
    }

    #[tokio::test]
    async fn eviction_bounds_hot_tier() {
        let cold = Arc::new(InMemoryColdStore::new());
        let tier = manager(cold);
        let mut ids = Vec::new();
        for _ in 0..6 {
            let env = envelope(10_000);
            ids.push(env.id.to_string());
            tier.store(env).await.expect("store");
        }
        assert_eq!(tier.hot_len().await, 4);
        assert!(!tier.contains_hot(&ids[0]).await);
        assert!(tier.contains_hot(&ids[5]).await);
        // The evicted entry picked up a lazy cold reference.
        assert!(tier.cold_reference_for(&ids[0]).await.is_some());
    }
}
