use crate::error::CoreError;
use courier_api::types::Envelope;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Default)]
struct Stored {
    envelopes: HashMap<String, Envelope>,
}

/// File-backed envelope store, one JSON file per namespace.
pub struct LocalStore {
    path: PathBuf,
    data: Stored,
}

impl LocalStore {
    pub fn open_or_create(path: impl AsRef<Path>, namespace: &str) -> Result<Self, CoreError> {
        let mut base = path.as_ref().to_path_buf();
        fs::create_dir_all(&base).map_err(|_| CoreError::Storage)?;
        base.push(format!("{}-envelopes.json", namespace));
        let data = if base.exists() {
            let content = fs::read_to_string(&base).map_err(|_| CoreError::Storage)?;
            serde_json::from_str(&content).map_err(|_| CoreError::Storage)?
        } else {
            Stored::default()
        };
        Ok(Self { path: base, data })
    }

    pub fn get(&self, id: &str) -> Option<Envelope> {
        self.data.envelopes.get(id).cloned()
    }

    pub fn put(&mut self, envelope: Envelope) -> Result<(), CoreError> {
        self.data
            .envelopes
            .insert(envelope.id.to_string(), envelope);
        self.flush()
    }

    pub fn all(&self) -> Vec<Envelope> {
        self.data.envelopes.values().cloned().collect()
    }

    pub fn thread(&self, thread_id: &str) -> Vec<Envelope> {
        self.data
            .envelopes
            .values()
            .filter(|e| e.thread_id == thread_id)
            .cloned()
            .collect()
    }

    pub fn delete(&mut self, id: &str) -> Result<(), CoreError> {
        self.data.envelopes.remove(id);
        self.flush()
    }

    fn flush(&self) -> Result<(), CoreError> {
        let serialized = serde_json::to_string(&self.data).map_err(|_| CoreError::Storage)?;
        fs::write(&self.path, serialized).map_err(|_| CoreError::Storage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_api::types::{ContentType, DeliveryStatus, StorageLocation};
    use uuid::Uuid;

    fn envelope(thread: &str) -> Envelope {
        Envelope {
            id: Uuid::new_v4(),
            thread_id: thread.to_string(),
            sequence: 0,
            sender: "a".to_string(),
            recipient: "b".to_string(),
            content: "hi".to_string(),
            content_type: ContentType::Text,
            encryption_key_id: "k".to_string(),
            nonce: "00".to_string(),
            timestamp: 5,
            ttl: 0,
            delivery_status: DeliveryStatus::Pending,
            acks: Vec::new(),
            storage_location: StorageLocation::Hot,
            signature: String::new(),
            cold_reference: None,
            delivery_token: None,
            chain_ref: None,
        }
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let env = envelope("t1");
        {
            let mut store = LocalStore::open_or_create(dir.path(), "test").expect("open");
            store.put(env.clone()).expect("put");
        }
        let store = LocalStore::open_or_create(dir.path(), "test").expect("reopen");
        assert_eq!(store.get(&env.id.to_string()), Some(env));
    }

    #[test]
    fn thread_filters_by_thread_id() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = LocalStore::open_or_create(dir.path(), "test").expect("open");
        store.put(envelope("t1")).expect("put");
        store.put(envelope("t1")).expect("put");
        store.put(envelope("t2")).expect("put");
        assert_eq!(store.thread("t1").len(), 2);
        assert_eq!(store.thread("t2").len(), 1);
    }
}
