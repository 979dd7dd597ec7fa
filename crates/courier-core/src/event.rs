use courier_api::types::IncomingMessage;
use tokio::sync::broadcast;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SessionEvent {
    Message(IncomingMessage),
    DeliveryFailed { message_id: Uuid, reason: String },
}

pub type EventReceiver = broadcast::Receiver<SessionEvent>;

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(size: usize) -> Self {
        let (tx, _) = broadcast::channel(size);
        Self { tx }
    }

    pub fn subscribe(&self) -> EventReceiver {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: SessionEvent) {
        let _ = self.tx.send(event);
    }
}
