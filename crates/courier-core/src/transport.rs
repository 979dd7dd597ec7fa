use crate::error::CoreError;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;

/// Framing version, carried out of band.
pub const PROTOCOL_VERSION: u8 = 1;

#[derive(Clone, Debug)]
pub struct PeerMessage {
    pub sender: String,
    pub version: u8,
    pub bytes: Vec<u8>,
}

#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn dial(&self, peer: &str) -> Result<(), CoreError>;
    async fn send(&self, peer: &str, message: PeerMessage) -> Result<(), CoreError>;
    async fn receive(&self, peer: &str) -> Result<Vec<PeerMessage>, CoreError>;
}

#[derive(Clone, Default)]
pub struct MockTransport {
    inboxes: Arc<Mutex<HashMap<String, Vec<PeerMessage>>>>,
    offline: Arc<Mutex<HashSet<String>>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_offline(&self, peer: &str, offline: bool) {
        let mut guard = self.offline.lock().await;
        if offline {
            guard.insert(peer.to_string());
        } else {
            guard.remove(peer);
        }
    }
}

#[async_trait]
impl PeerTransport for MockTransport {
    async fn dial(&self, peer: &str) -> Result<(), CoreError> {
        if self.offline.lock().await.contains(peer) {
            return Err(CoreError::NetworkUnavailable);
        }
        Ok(())
    }

    async fn send(&self, peer: &str, message: PeerMessage) -> Result<(), CoreError> {
        if self.offline.lock().await.contains(peer) {
            return Err(CoreError::NetworkUnavailable);
        }
        let mut guard = self.inboxes.lock().await;
        guard.entry(peer.to_string()).or_default().push(message);
        Ok(())
    }

    async fn receive(&self, peer: &str) -> Result<Vec<PeerMessage>, CoreError> {
        let mut guard = self.inboxes.lock().await;
        Ok(guard.remove(peer).unwrap_or_default())
    }
}
