use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Placeholder value carried in `content` when a message could not be
/// decrypted. Reconciliation treats it as the weakest content form.
pub const CONTENT_PLACEHOLDER: &str = "[unreadable]";

/// Placeholder delivery token; never matches for canonical identity.
pub const TOKEN_PLACEHOLDER: &str = "pending";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Text,
    Image,
    File,
    System,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Sent,
    Delivered,
    Read,
    Failed,
}

impl DeliveryStatus {
    /// Merge precedence. `Failed` outranks `Sent` (exhausted retries carry
    /// more information) but a late `Delivered`/`Read` still wins.
    pub fn rank(&self) -> u8 {
        match self {
            DeliveryStatus::Pending => 0,
            DeliveryStatus::Sent => 1,
            DeliveryStatus::Failed => 2,
            DeliveryStatus::Delivered => 3,
            DeliveryStatus::Read => 4,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Read | DeliveryStatus::Failed)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageLocation {
    Hot,
    Cold,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Ack {
    pub peer_id: String,
    pub timestamp: u64,
}

/// The encrypted, signed unit of transport and storage. Serializes to the
/// wire/persisted JSON object; `content`, `nonce` and `signature` are hex
/// strings (except `content` after local decryption, which holds plaintext).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Envelope {
    pub id: Uuid,
    pub thread_id: String,
    pub sequence: u64,
    pub sender: String,
    pub recipient: String,
    pub content: String,
    pub content_type: ContentType,
    pub encryption_key_id: String,
    pub nonce: String,
    pub timestamp: u64,
    pub ttl: u64,
    pub delivery_status: DeliveryStatus,
    pub acks: Vec<Ack>,
    pub storage_location: StorageLocation,
    pub signature: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cold_reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delivery_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chain_ref: Option<String>,
}

impl Envelope {
    pub fn has_ack_from(&self, peer_id: &str) -> bool {
        self.acks.iter().any(|a| a.peer_id == peer_id)
    }

    /// Non-empty, non-placeholder delivery token, if any.
    pub fn usable_token(&self) -> Option<&str> {
        self.delivery_token
            .as_deref()
            .filter(|t| !t.is_empty() && *t != TOKEN_PLACEHOLDER)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendRequest {
    pub recipient: String,
    pub content_type: ContentType,
    pub body: String,
    pub ttl_ms: Option<u64>,
    pub chain_ref: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct IncomingMessage {
    pub message_id: Uuid,
    pub thread_id: String,
    pub sender: String,
    pub content_type: ContentType,
    pub body: String,
    pub timestamp: u64,
}
