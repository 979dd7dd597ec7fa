pub mod batch;
pub mod config;
pub mod delivery;
pub mod error;
pub mod event;
pub mod ids;
pub mod keys;
pub mod local;
pub mod policy;
pub mod remote;
pub mod store;
pub mod sync;
pub mod time;
pub mod transport;

use crate::batch::MerkleBatch;
use crate::config::SessionConfig;
use crate::delivery::{DeliveryTracker, RetryOutcome};
use crate::error::CoreError;
use crate::event::{EventBus, EventReceiver, SessionEvent};
use crate::ids::{thread_id_for_pair, AccountId};
use crate::keys::{KeyPair, NONCE_LEN};
use crate::local::LocalStore;
use crate::policy::Policy;
use crate::remote::{RemoteGateway, RemoteStore};
use crate::store::{ColdStore, TierManager};
use crate::time::now_ms;
use crate::transport::{PeerMessage, PeerTransport, PROTOCOL_VERSION};
use courier_api::types::{
    Ack, DeliveryStatus, Envelope, IncomingMessage, SendRequest, StorageLocation,
};
use courier_api::validation::validate_send_request;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use uuid::Uuid;

/// Public half of a peer's session keys, exchanged out of band.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Contact {
    pub dh_public: [u8; 32],
    pub verifying: [u8; 32],
}

#[derive(Clone)]
pub struct Session {
    config: SessionConfig,
    policy: Policy,
    keys: Arc<KeyPair>,
    account: AccountId,
    contacts: Arc<Mutex<HashMap<String, Contact>>>,
    local: Arc<Mutex<LocalStore>>,
    tier: TierManager,
    tracker: DeliveryTracker,
    transport: Arc<dyn PeerTransport>,
    remote: RemoteGateway,
    events: EventBus,
    sequences: Arc<Mutex<HashMap<String, u64>>>,
    workers: Arc<std::sync::Mutex<Vec<JoinHandle<()>>>>,
}

impl Session {
    pub fn init(
        config: SessionConfig,
        policy: Policy,
        cold: Arc<dyn ColdStore>,
        remote: Arc<dyn RemoteStore>,
        transport: Arc<dyn PeerTransport>,
    ) -> Result<Self, CoreError> {
        let keys = keys::generate_keypair(None)?;
        let account = AccountId::from_bytes(keys.dh_public);
        let local = LocalStore::open_or_create(&config.storage_path, &config.namespace)?;
        let session = Self {
            tier: TierManager::new(cold, policy.clone()),
            config: config.clone(),
            policy,
            keys: Arc::new(keys),
            account,
            contacts: Arc::new(Mutex::new(HashMap::new())),
            local: Arc::new(Mutex::new(local)),
            tracker: DeliveryTracker::new(),
            transport,
            remote: RemoteGateway::new(remote),
            events: EventBus::new(256),
            sequences: Arc::new(Mutex::new(HashMap::new())),
            workers: Arc::new(std::sync::Mutex::new(Vec::new())),
        };
        if config.polling_interval_ms > 0 {
            session.start_remote_poller();
        }
        if config.retry_tick_ms > 0 {
            session.start_retry_worker();
        }
        if config.sweep_interval_ms > 0 {
            session.start_ttl_sweeper();
        }
        session.start_push_listener();
        Ok(session)
    }

    pub fn account_id(&self) -> AccountId {
        self.account
    }

    pub fn public_identity(&self) -> Contact {
        Contact {
            dh_public: self.keys.dh_public,
            verifying: self.keys.verifying_key(),
        }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.events.subscribe()
    }

    pub async fn add_contact(&self, account: &AccountId, contact: Contact) {
        let mut guard = self.contacts.lock().await;
        guard.insert(account.to_hex(), contact);
    }

    pub async fn send(&self, request: SendRequest) -> Result<Uuid, CoreError> {
        let sender_hex = self.account.to_hex();
        validate_send_request(&request, &sender_hex, &self.policy.validation_limits())
            .map_err(|e| CoreError::Validation(e.to_string()))?;
        let recipient = AccountId::from_hex(&request.recipient)
            .ok_or_else(|| CoreError::Validation("recipient".to_string()))?;
        let contact = self
            .contacts
            .lock()
            .await
            .get(&request.recipient)
            .copied()
            .ok_or(CoreError::NotFound)?;
        let shared = keys::derive_shared_key(&self.keys, &contact.dh_public)?;
        let (ciphertext, nonce) = keys::encrypt(request.body.as_bytes(), &shared)?;

        let thread_id = thread_id_for_pair(&self.account, &recipient);
        let sequence = self.next_sequence(&thread_id).await;
        let mut envelope = Envelope {
            id: Uuid::new_v4(),
            thread_id,
            sequence,
            sender: sender_hex,
            recipient: request.recipient.clone(),
            content: hex::encode(ciphertext),
            content_type: request.content_type,
            encryption_key_id: shared.key_id.clone(),
            nonce: hex::encode(nonce),
            timestamp: now_ms(),
            ttl: request.ttl_ms.unwrap_or(self.config.default_ttl_ms),
            delivery_status: DeliveryStatus::Pending,
            acks: Vec::new(),
            storage_location: if self.config.eager_cold_store {
                StorageLocation::Cold
            } else {
                StorageLocation::Hot
            },
            signature: String::new(),
            cold_reference: None,
            delivery_token: None,
            chain_ref: request.chain_ref.clone(),
        };
        envelope.signature = hex::encode(keys::sign_envelope(&envelope, &self.keys.signing));

        let packet = serde_json::to_vec(&envelope).map_err(|_| CoreError::Storage)?;
        self.tracker
            .track(envelope.id, envelope.recipient.clone(), packet, now_ms())
            .await;
        let mut stored = self.tier.store(envelope).await?;
        self.persist(stored.clone()).await?;

        match self.try_send_direct(&stored.recipient, &stored).await {
            Ok(()) => {
                self.note_sent(&mut stored).await?;
            }
            Err(CoreError::NetworkUnavailable) => {
                if self.cold_fallback(&mut stored).await.is_ok() {
                    self.note_sent(&mut stored).await?;
                }
                // Otherwise the retry worker picks it up while it is still
                // pending.
            }
            Err(err) => return Err(err),
        }
        Ok(stored.id)
    }

    pub async fn poll_once(&self) -> Result<(), CoreError> {
        let me = self.account.to_hex();
        for message in self.transport.receive(&me).await? {
            if let Err(err) = self.handle_peer_message(message).await {
                log::debug!("peer message dropped: {}", err);
            }
        }
        for envelope in self.remote.pull(&me).await? {
            if let Err(err) = self.observe_envelope(envelope).await {
                log::debug!("remote envelope dropped: {}", err);
            }
        }
        Ok(())
    }

    pub async fn conversation(&self, counterpart: &AccountId) -> Vec<Envelope> {
        let thread_id = thread_id_for_pair(&self.account, counterpart);
        let mut entries = {
            let guard = self.local.lock().await;
            guard.thread(&thread_id)
        };
        for envelope in entries.iter_mut() {
            self.tracker.decorate(envelope).await;
        }
        sync::merge_thread(&thread_id, vec![entries])
    }

    /// Local-only transition; requires a prior `delivered`.
    pub async fn mark_read(&self, message_id: &Uuid) -> Result<(), CoreError> {
        let tracked = self.tracker.status(message_id).await;
        if tracked.is_some() {
            self.tracker.mark_read(message_id).await?;
        }
        let mut guard = self.local.lock().await;
        let Some(mut envelope) = guard.get(&message_id.to_string()) else {
            return if tracked.is_some() {
                Ok(())
            } else {
                Err(CoreError::NotFound)
            };
        };
        if envelope.delivery_status == DeliveryStatus::Read {
            return Ok(());
        }
        if tracked.is_none() && envelope.delivery_status != DeliveryStatus::Delivered {
            return Err(CoreError::Validation(format!(
                "read requires delivered, was {:?}",
                envelope.delivery_status
            )));
        }
        envelope.delivery_status = DeliveryStatus::Read;
        guard.put(envelope)
    }

    pub async fn retrieve(&self, id_or_content_id: &str) -> Result<Envelope, CoreError> {
        self.tier.retrieve(id_or_content_id).await
    }

    pub async fn audit_batch(&self, counterpart: &AccountId) -> Option<MerkleBatch> {
        let thread_id = thread_id_for_pair(&self.account, counterpart);
        let mut references: Vec<String> = {
            let guard = self.local.lock().await;
            guard
                .thread(&thread_id)
                .into_iter()
                .filter_map(|e| e.cold_reference)
                .collect()
        };
        for envelope in self.conversation(counterpart).await {
            if let Some(reference) = self.tier.cold_reference_for(&envelope.id.to_string()).await {
                references.push(reference);
            }
        }
        references.sort();
        references.dedup();
        MerkleBatch::new(references)
    }

    pub fn shutdown(&self) {
        let mut guard = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        for handle in guard.drain(..) {
            handle.abort();
        }
    }

    async fn next_sequence(&self, thread_id: &str) -> u64 {
        let mut guard = self.sequences.lock().await;
        let counter = guard.entry(thread_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    async fn persist(&self, envelope: Envelope) -> Result<(), CoreError> {
        let mut guard = self.local.lock().await;
        let merged = match guard.get(&envelope.id.to_string()) {
            Some(existing) => sync::merge(vec![vec![existing], vec![envelope]])
                .pop()
                .ok_or(CoreError::Storage)?,
            None => envelope,
        };
        guard.put(merged)
    }

    async fn try_send_direct(&self, recipient: &str, envelope: &Envelope) -> Result<(), CoreError> {
        let bytes = serde_json::to_vec(envelope).map_err(|_| CoreError::Storage)?;
        let connect = Duration::from_millis(self.config.connect_timeout_ms);
        match timeout(connect, self.transport.dial(recipient)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => return Err(CoreError::NetworkUnavailable),
        }
        self.transport
            .send(
                recipient,
                PeerMessage {
                    sender: self.account.to_hex(),
                    version: PROTOCOL_VERSION,
                    bytes,
                },
            )
            .await
    }

    async fn cold_fallback(&self, envelope: &mut Envelope) -> Result<(), CoreError> {
        let receipt = match self.tier.offload(envelope).await {
            Ok(receipt) => receipt,
            Err(err) => {
                log::warn!("cold fallback failed for {}: {}", envelope.id, err);
                return Err(err);
            }
        };
        envelope.storage_location = StorageLocation::Cold;
        envelope.cold_reference = Some(receipt.content_id.clone());
        envelope.delivery_token = Some(receipt.content_id);
        let recipient = envelope.recipient.clone();
        let _ = self.remote.push(&recipient, envelope.clone()).await;
        Ok(())
    }

    async fn note_sent(&self, envelope: &mut Envelope) -> Result<(), CoreError> {
        let retry_at = now_ms().saturating_add(self.policy.backoff_initial_ms);
        self.tracker.mark_sent(&envelope.id, retry_at).await;
        if envelope.delivery_status.rank() < DeliveryStatus::Sent.rank() {
            envelope.delivery_status = DeliveryStatus::Sent;
        }
        self.tier.store(envelope.clone()).await?;
        self.persist(envelope.clone()).await
    }

    async fn handle_peer_message(&self, message: PeerMessage) -> Result<(), CoreError> {
        if message.version != PROTOCOL_VERSION {
            return Err(CoreError::Validation(format!(
                "protocol version {}",
                message.version
            )));
        }
        let envelope: Envelope = serde_json::from_slice(&message.bytes)
            .map_err(|_| CoreError::Validation("envelope".to_string()))?;
        self.observe_envelope(envelope).await
    }

    // One funnel for transport, push, and poll observations.
    async fn observe_envelope(&self, envelope: Envelope) -> Result<(), CoreError> {
        let me = self.account.to_hex();
        if envelope.recipient == me {
            return self.receive_incoming(envelope).await;
        }
        if envelope.sender == me {
            self.tracker.apply_observed(&envelope).await;
            let mut reconciled = envelope;
            self.tracker.decorate(&mut reconciled).await;
            return self.persist(reconciled).await;
        }
        Err(CoreError::Validation("addressee".to_string()))
    }

    async fn receive_incoming(&self, envelope: Envelope) -> Result<(), CoreError> {
        {
            let guard = self.local.lock().await;
            if let Some(existing) = guard.get(&envelope.id.to_string()) {
                if existing.delivery_status.rank() >= DeliveryStatus::Delivered.rank() {
                    return Ok(());
                }
            }
        }
        let contact = self
            .contacts
            .lock()
            .await
            .get(&envelope.sender)
            .copied()
            .ok_or(CoreError::Signature)?;
        let signature = hex::decode(&envelope.signature).map_err(|_| CoreError::Signature)?;
        keys::verify_envelope(&envelope, &signature, &contact.verifying)?;

        let shared = keys::derive_shared_key(&self.keys, &contact.dh_public)?;
        let ciphertext = hex::decode(&envelope.content).map_err(|_| CoreError::Decryption)?;
        let nonce_bytes = hex::decode(&envelope.nonce).map_err(|_| CoreError::Decryption)?;
        let nonce: [u8; NONCE_LEN] = nonce_bytes
            .try_into()
            .map_err(|_| CoreError::Decryption)?;
        let plaintext = keys::decrypt(&ciphertext, &nonce, &shared)?;
        let body = String::from_utf8(plaintext).map_err(|_| CoreError::Decryption)?;

        let now = now_ms();
        let me = self.account.to_hex();
        let mut decrypted = envelope.clone();
        decrypted.content = body.clone();
        decrypted.nonce = String::new();
        decrypted.delivery_status = DeliveryStatus::Delivered;
        if !decrypted.has_ack_from(&me) {
            decrypted.acks.push(Ack {
                peer_id: me.clone(),
                timestamp: now,
            });
        }
        self.persist(decrypted.clone()).await?;
        let _ = self.tier.store(decrypted).await;

        // Delivery receipt goes back through the remote store.
        let mut receipt = envelope.clone();
        receipt.delivery_status = DeliveryStatus::Delivered;
        if !receipt.has_ack_from(&me) {
            receipt.acks.push(Ack {
                peer_id: me.clone(),
                timestamp: now,
            });
        }
        let _ = self.remote.push(&envelope.sender, receipt).await;

        self.events.publish(SessionEvent::Message(IncomingMessage {
            message_id: envelope.id,
            thread_id: envelope.thread_id.clone(),
            sender: envelope.sender.clone(),
            content_type: envelope.content_type,
            body,
            timestamp: envelope.timestamp,
        }));
        Ok(())
    }

    fn start_remote_poller(&self) {
        let session = self.clone();
        let interval_ms = self.config.polling_interval_ms;
        self.spawn_worker(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                let _ = session.poll_once().await;
            }
        });
    }

    fn start_push_listener(&self) {
        let session = self.clone();
        let mut rx = self.remote.subscribe(&self.account.to_hex());
        self.spawn_worker(async move {
            while let Ok(envelope) = rx.recv().await {
                if let Err(err) = session.observe_envelope(envelope).await {
                    log::debug!("pushed envelope dropped: {}", err);
                }
            }
        });
    }

    fn start_retry_worker(&self) {
        let session = self.clone();
        let tick_ms = self.config.retry_tick_ms;
        self.spawn_worker(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(tick_ms));
            loop {
                ticker.tick().await;
                let now = now_ms();
                let due = session
                    .tracker
                    .load_due(now, session.policy.retry_batch)
                    .await;
                for item in due {
                    let envelope: Result<Envelope, _> = serde_json::from_slice(&item.packet);
                    let Ok(mut envelope) = envelope else {
                        continue;
                    };
                    if session
                        .try_send_direct(&item.recipient, &envelope)
                        .await
                        .is_ok()
                    {
                        let _ = session.note_sent(&mut envelope).await;
                    }
                    // An attempt consumes a try whether or not the
                    // transport accepted it.
                    let outcome = session
                        .tracker
                        .bump_retry(&item.message_id, &session.policy, now)
                        .await;
                    if outcome == RetryOutcome::Exhausted {
                        envelope.delivery_status = DeliveryStatus::Failed;
                        let _ = session.persist(envelope).await;
                        session.events.publish(SessionEvent::DeliveryFailed {
                            message_id: item.message_id,
                            reason: CoreError::RetryExhausted(item.message_id.to_string())
                                .to_string(),
                        });
                    }
                }
            }
        });
    }

    fn start_ttl_sweeper(&self) {
        let session = self.clone();
        let interval_ms = self.config.sweep_interval_ms;
        self.spawn_worker(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(interval_ms));
            loop {
                ticker.tick().await;
                let demoted = session.tier.sweep_expired(now_ms()).await;
                for id in demoted {
                    if let Some(reference) = session.tier.cold_reference_for(&id).await {
                        let mut guard = session.local.lock().await;
                        if let Some(mut envelope) = guard.get(&id) {
                            envelope.storage_location = StorageLocation::Cold;
                            envelope.cold_reference = Some(reference);
                            let _ = guard.put(envelope);
                        }
                    }
                }
            }
        });
    }

    fn spawn_worker(&self, fut: impl std::future::Future<Output = ()> + Send + 'static) {
        let handle = tokio::spawn(fut);
        let mut guard = match self.workers.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard.push(handle);
    }
}

#[cfg(test)]
mod tests;
