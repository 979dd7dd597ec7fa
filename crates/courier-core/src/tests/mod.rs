mod reconcile_scenarios;

use crate::config::SessionConfig;
use crate::policy::Policy;
use crate::remote::InMemoryRemote;
use crate::store::InMemoryColdStore;
use crate::transport::MockTransport;
use crate::Session;
use courier_api::types::{ContentType, SendRequest};
use std::sync::Arc;
use tempfile::TempDir;

// Shared in-memory infrastructure for a set of sessions.
pub struct Harness {
    pub remote: Arc<InMemoryRemote>,
    pub transport: Arc<MockTransport>,
    pub cold: Arc<InMemoryColdStore>,
    dirs: Vec<TempDir>,
}

impl Harness {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        Self {
            remote: Arc::new(InMemoryRemote::new()),
            transport: Arc::new(MockTransport::new()),
            cold: Arc::new(InMemoryColdStore::new()),
            dirs: Vec::new(),
        }
    }

    // Background intervals default to off; tests drive `poll_once`
    // explicitly unless the tweak closure opts back in.
    pub fn session(
        &mut self,
        namespace: &str,
        tweak: impl FnOnce(&mut SessionConfig, &mut Policy),
    ) -> Session {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut config = SessionConfig {
            storage_path: dir.path().to_string_lossy().into_owned(),
            namespace: namespace.to_string(),
            polling_interval_ms: 0,
            retry_tick_ms: 0,
            sweep_interval_ms: 0,
            connect_timeout_ms: 200,
            ..SessionConfig::default()
        };
        let mut policy = Policy::default();
        tweak(&mut config, &mut policy);
        self.dirs.push(dir);
        Session::init(
            config,
            policy,
            self.cold.clone(),
            self.remote.clone(),
            self.transport.clone(),
        )
        .expect("session init")
    }
}

pub async fn connected_pair(harness: &mut Harness) -> (Session, Session) {
    let a = harness.session("a", |_, _| {});
    let b = harness.session("b", |_, _| {});
    a.add_contact(&b.account_id(), b.public_identity()).await;
    b.add_contact(&a.account_id(), a.public_identity()).await;
    (a, b)
}

pub fn text_to(recipient: &Session, body: &str) -> SendRequest {
    SendRequest {
        recipient: recipient.account_id().to_hex(),
        content_type: ContentType::Text,
        body: body.to_string(),
        ttl_ms: None,
        chain_ref: None,
    }
}
