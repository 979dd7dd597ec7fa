use crate::error::CoreError;
use async_trait::async_trait;
use courier_api::types::Envelope;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, Mutex};

#[derive(Clone, Debug, Default)]
pub struct RemotePage {
    pub envelopes: Vec<Envelope>,
    pub cursor: u64,
}

/// Managed remote datastore: push, cursor-paged poll, push subscription.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    async fn push(&self, recipient: &str, envelope: Envelope) -> Result<(), CoreError>;
    async fn pull(&self, recipient: &str, cursor: u64) -> Result<RemotePage, CoreError>;
    fn subscribe(&self, recipient: &str) -> broadcast::Receiver<Envelope>;
}

struct RemoteInbox {
    entries: Vec<Envelope>,
    notify: broadcast::Sender<Envelope>,
}

impl Default for RemoteInbox {
    fn default() -> Self {
        let (notify, _) = broadcast::channel(64);
        Self {
            entries: Vec::new(),
            notify,
        }
    }
}

#[derive(Clone, Default)]
pub struct InMemoryRemote {
    inboxes: Arc<std::sync::Mutex<HashMap<String, RemoteInbox>>>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RemoteStore for InMemoryRemote {
    async fn push(&self, recipient: &str, envelope: Envelope) -> Result<(), CoreError> {
        let mut guard = self
            .inboxes
            .lock()
            .map_err(|_| CoreError::NetworkUnavailable)?;
        let inbox = guard.entry(recipient.to_string()).or_default();
        inbox.entries.push(envelope.clone());
        let _ = inbox.notify.send(envelope);
        Ok(())
    }

    async fn pull(&self, recipient: &str, cursor: u64) -> Result<RemotePage, CoreError> {
        let guard = self
            .inboxes
            .lock()
            .map_err(|_| CoreError::NetworkUnavailable)?;
        let Some(inbox) = guard.get(recipient) else {
            return Ok(RemotePage {
                envelopes: Vec::new(),
                cursor,
            });
        };
        let start = (cursor as usize).min(inbox.entries.len());
        Ok(RemotePage {
            envelopes: inbox.entries[start..].to_vec(),
            cursor: inbox.entries.len() as u64,
        })
    }

    fn subscribe(&self, recipient: &str) -> broadcast::Receiver<Envelope> {
        let mut guard = match self.inboxes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        guard
            .entry(recipient.to_string())
            .or_default()
            .notify
            .subscribe()
    }
}

// Keeps per-account poll cursors.
#[derive(Clone)]
pub struct RemoteGateway {
    client: Arc<dyn RemoteStore>,
    cursors: Arc<Mutex<HashMap<String, u64>>>,
}

impl RemoteGateway {
    pub fn new(client: Arc<dyn RemoteStore>) -> Self {
        Self {
            client,
            cursors: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn push(&self, recipient: &str, envelope: Envelope) -> Result<(), CoreError> {
        self.client.push(recipient, envelope).await
    }

    pub async fn pull(&self, recipient: &str) -> Result<Vec<Envelope>, CoreError> {
        let cursor = {
            let guard = self.cursors.lock().await;
            guard.get(recipient).copied().unwrap_or(0)
        };
        let page = self.client.pull(recipient, cursor).await?;
        let mut guard = self.cursors.lock().await;
        guard.insert(recipient.to_string(), page.cursor);
        Ok(page.envelopes)
    }

    pub fn subscribe(&self, recipient: &str) -> broadcast::Receiver<Envelope> {
        self.client.subscribe(recipient)
    }
}
