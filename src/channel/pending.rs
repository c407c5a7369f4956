//! Optimistic delivery bookkeeping
//!
//! Tracks chat messages the caller rendered before the server confirmed
//! them, keyed by the client-generated temp id carried in `message` and
//! echoed back in `message_ack`.

use uuid::Uuid;

use crate::message::{ClientMessage, ErrorCode};
use crate::types::MessageId;

/// Delivery state of a locally sent message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryStatus {
    /// Handed to the channel, no ack yet
    Sending,
    /// Acknowledged by the server
    Sent,
    /// Channel gave up before an ack arrived
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    pub temp_id: String,
    pub content: String,
    pub status: DeliveryStatus,
    /// Server id, once acknowledged
    pub message_id: Option<MessageId>,
}

/// Locally sent messages in send order
#[derive(Debug, Default)]
pub struct PendingMessages {
    entries: Vec<PendingMessage>,
}

impl PendingMessages {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outgoing message and build the event to send
    pub fn track(&mut self, content: impl Into<String>) -> ClientMessage {
        let content = content.into();
        let temp_id = Uuid::new_v4().to_string();

        self.entries.push(PendingMessage {
            temp_id: temp_id.clone(),
            content: content.clone(),
            status: DeliveryStatus::Sending,
            message_id: None,
        });

        ClientMessage::Message { content, temp_id }
    }

    /// Apply a `message_ack`
    ///
    /// Unknown temp ids (e.g. from another session) are ignored.
    pub fn acknowledge(&mut self, temp_id: &str, message_id: MessageId) -> Option<&PendingMessage> {
        let entry = self.entries.iter_mut().find(|e| e.temp_id == temp_id)?;
        entry.status = DeliveryStatus::Sent;
        entry.message_id = Some(message_id);
        Some(entry)
    }

    /// Whether a broadcast `message` is the server copy of one of ours
    pub fn is_own(&self, message_id: MessageId) -> bool {
        self.entries
            .iter()
            .any(|e| e.message_id == Some(message_id))
    }

    /// Mark everything still unacknowledged as failed
    ///
    /// Returns how many entries changed.
    pub fn fail_sending(&mut self) -> usize {
        let mut failed = 0;
        for entry in self
            .entries
            .iter_mut()
            .filter(|e| e.status == DeliveryStatus::Sending)
        {
            entry.status = DeliveryStatus::Failed;
            failed += 1;
        }
        failed
    }

    /// Apply a server `error`
    ///
    /// `NOT_JOINED` means the session refuses chat messages, so nothing
    /// still unacknowledged will be acked. Returns how many entries failed.
    pub fn reject(&mut self, code: ErrorCode) -> usize {
        match code {
            ErrorCode::NotJoined => self.fail_sending(),
            _ => 0,
        }
    }

    pub fn get(&self, temp_id: &str) -> Option<&PendingMessage> {
        self.entries.iter().find(|e| e.temp_id == temp_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_id_of(msg: &ClientMessage) -> String {
        match msg {
            ClientMessage::Message { temp_id, .. } => temp_id.clone(),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_track_builds_message_event() {
        let mut pending = PendingMessages::new();
        let msg = pending.track("hi");

        let temp_id = temp_id_of(&msg);
        assert!(matches!(msg, ClientMessage::Message { ref content, .. } if content == "hi"));
        assert_eq!(pending.get(&temp_id).unwrap().status, DeliveryStatus::Sending);
    }

    #[test]
    fn test_ack_reconciles_temp_id() {
        let mut pending = PendingMessages::new();
        let temp_id = temp_id_of(&pending.track("hi"));
        let message_id = MessageId::new();

        assert!(!pending.is_own(message_id));
        let entry = pending.acknowledge(&temp_id, message_id).unwrap();
        assert_eq!(entry.status, DeliveryStatus::Sent);
        assert_eq!(entry.message_id, Some(message_id));
        assert!(pending.is_own(message_id));
    }

    #[test]
    fn test_unknown_ack_ignored() {
        let mut pending = PendingMessages::new();
        pending.track("hi");
        assert!(pending.acknowledge("nope", MessageId::new()).is_none());
    }

    #[test]
    fn test_fail_sending_leaves_acked_alone() {
        let mut pending = PendingMessages::new();
        let first = temp_id_of(&pending.track("one"));
        let second = temp_id_of(&pending.track("two"));
        pending.acknowledge(&first, MessageId::new());

        assert_eq!(pending.fail_sending(), 1);
        assert_eq!(pending.get(&first).unwrap().status, DeliveryStatus::Sent);
        assert_eq!(pending.get(&second).unwrap().status, DeliveryStatus::Failed);
        assert_eq!(pending.len(), 2);
    }

    #[test]
    fn test_not_joined_fails_unacked() {
        let mut pending = PendingMessages::new();
        let temp_id = temp_id_of(&pending.track("typed offline"));

        assert_eq!(pending.reject(ErrorCode::InvalidUsername), 0);
        assert_eq!(pending.get(&temp_id).unwrap().status, DeliveryStatus::Sending);

        assert_eq!(pending.reject(ErrorCode::NotJoined), 1);
        assert_eq!(pending.get(&temp_id).unwrap().status, DeliveryStatus::Failed);
    }
}
