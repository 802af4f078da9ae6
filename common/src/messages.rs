//! Definition of Quarry messages

use serde::{Deserialize, Serialize};

/// Durable queue notifications
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueueMessage {
    /// A producer durably inserted `count` entries into `topic`
    Enqueued { topic: String, count: usize },
}

// === Global message enum ===
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Message {
    #[default]
    None, // Just so we have a simple default

    // Pipeline messages
    Queue(QueueMessage),
}

impl From<QueueMessage> for Message {
    fn from(msg: QueueMessage) -> Self {
        Message::Queue(msg)
    }
}
