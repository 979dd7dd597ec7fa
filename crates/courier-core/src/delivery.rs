use crate::error::CoreError;
use crate::policy::Policy;
use courier_api::types::{Ack, DeliveryStatus, Envelope};
use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

#[derive(Clone, Debug)]
pub struct DeliveryState {
    pub status: DeliveryStatus,
    pub acks: Vec<Ack>,
    pub recipient: String,
    pub packet: Vec<u8>,
    pub tries: u32,
    pub next_retry_ms: u64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RetryOutcome {
    Scheduled(u64),
    Exhausted,
}

#[derive(Clone, Debug)]
pub struct DueItem {
    pub message_id: Uuid,
    pub recipient: String,
    pub packet: Vec<u8>,
}

#[derive(Clone, Default)]
pub struct DeliveryTracker {
    states: Arc<Mutex<HashMap<Uuid, DeliveryState>>>,
}

fn transition_allowed(from: DeliveryStatus, to: DeliveryStatus) -> bool {
    if from == DeliveryStatus::Failed || from == DeliveryStatus::Read {
        return false;
    }
    if to == DeliveryStatus::Failed {
        return matches!(from, DeliveryStatus::Pending | DeliveryStatus::Sent);
    }
    to.rank() > from.rank()
}

impl DeliveryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn track(&self, message_id: Uuid, recipient: String, packet: Vec<u8>, now: u64) {
        let mut guard = self.states.lock().await;
        guard.entry(message_id).or_insert(DeliveryState {
            status: DeliveryStatus::Pending,
            acks: Vec::new(),
            recipient,
            packet,
            tries: 0,
            next_retry_ms: now,
        });
    }

    pub async fn status(&self, message_id: &Uuid) -> Option<DeliveryStatus> {
        self.states.lock().await.get(message_id).map(|s| s.status)
    }

    pub async fn acks(&self, message_id: &Uuid) -> Vec<Ack> {
        self.states
            .lock()
            .await
            .get(message_id)
            .map(|s| s.acks.clone())
            .unwrap_or_default()
    }

    // Stale observations are no-ops.
    pub async fn advance(&self, message_id: &Uuid, to: DeliveryStatus) -> bool {
        let mut guard = self.states.lock().await;
        let Some(state) = guard.get_mut(message_id) else {
            return false;
        };
        if !transition_allowed(state.status, to) {
            return false;
        }
        state.status = to;
        true
    }

    pub async fn mark_sent(&self, message_id: &Uuid, retry_at: u64) -> bool {
        let mut guard = self.states.lock().await;
        let Some(state) = guard.get_mut(message_id) else {
            return false;
        };
        if !transition_allowed(state.status, DeliveryStatus::Sent) {
            return false;
        }
        state.status = DeliveryStatus::Sent;
        state.next_retry_ms = retry_at;
        true
    }

    /// Idempotent; any ack advances the message to `delivered`.
    pub async fn record_ack(&self, message_id: &Uuid, peer_id: &str, timestamp: u64) -> bool {
        let mut guard = self.states.lock().await;
        let Some(state) = guard.get_mut(message_id) else {
            return false;
        };
        if state.acks.iter().any(|a| a.peer_id == peer_id) {
            return false;
        }
        state.acks.push(Ack {
            peer_id: peer_id.to_string(),
            timestamp,
        });
        if transition_allowed(state.status, DeliveryStatus::Delivered) {
            state.status = DeliveryStatus::Delivered;
        }
        true
    }

    pub async fn mark_read(&self, message_id: &Uuid) -> Result<(), CoreError> {
        let mut guard = self.states.lock().await;
        let state = guard.get_mut(message_id).ok_or(CoreError::NotFound)?;
        match state.status {
            DeliveryStatus::Read => Ok(()),
            DeliveryStatus::Delivered => {
                state.status = DeliveryStatus::Read;
                Ok(())
            }
            other => Err(CoreError::Validation(format!(
                "read requires delivered, was {:?}",
                other
            ))),
        }
    }

    pub async fn load_due(&self, now: u64, limit: usize) -> Vec<DueItem> {
        let guard = self.states.lock().await;
        let mut due = Vec::new();
        for (id, state) in guard.iter() {
            if due.len() >= limit {
                break;
            }
            let retryable = matches!(state.status, DeliveryStatus::Pending | DeliveryStatus::Sent);
            if retryable && state.acks.is_empty() && state.next_retry_ms <= now {
                due.push(DueItem {
                    message_id: *id,
                    recipient: state.recipient.clone(),
                    packet: state.packet.clone(),
                });
            }
        }
        due
    }

    pub async fn bump_retry(&self, message_id: &Uuid, policy: &Policy, now: u64) -> RetryOutcome {
        let mut guard = self.states.lock().await;
        let Some(state) = guard.get_mut(message_id) else {
            return RetryOutcome::Exhausted;
        };
        state.tries = state.tries.saturating_add(1);
        if state.tries >= policy.max_send_tries {
            if transition_allowed(state.status, DeliveryStatus::Failed) {
                state.status = DeliveryStatus::Failed;
            }
            return RetryOutcome::Exhausted;
        }
        let factor = 1u64 << (state.tries.saturating_sub(1).min(16));
        let base = policy.backoff_initial_ms.saturating_mul(factor);
        let capped = base.min(policy.backoff_max_ms);
        let jitter = rand::thread_rng().gen_range(0..=capped / 2 + 1);
        state.next_retry_ms = now.saturating_add(capped + jitter);
        RetryOutcome::Scheduled(state.next_retry_ms)
    }

    // Folds a remotely observed copy of an owned message back in.
    pub async fn apply_observed(&self, envelope: &Envelope) {
        let mut guard = self.states.lock().await;
        let Some(state) = guard.get_mut(&envelope.id) else {
            return;
        };
        for ack in envelope.acks.iter() {
            if !state.acks.iter().any(|a| a.peer_id == ack.peer_id) {
                state.acks.push(ack.clone());
            }
        }
        if !state.acks.is_empty() && transition_allowed(state.status, DeliveryStatus::Delivered) {
            state.status = DeliveryStatus::Delivered;
        }
        if transition_allowed(state.status, envelope.delivery_status) {
            state.status = envelope.delivery_status;
        }
    }

    pub async fn decorate(&self, envelope: &mut Envelope) {
        let guard = self.states.lock().await;
        if let Some(state) = guard.get(&envelope.id) {
            if state.status.rank() > envelope.delivery_status.rank() {
                envelope.delivery_status = state.status;
            }
            for ack in state.acks.iter() {
                if !envelope.has_ack_from(&ack.peer_id) {
                    envelope.acks.push(ack.clone());
                }
            }
        }
    }
}
