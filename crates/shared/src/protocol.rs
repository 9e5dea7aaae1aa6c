use serde::{Deserialize, Serialize};

use crate::domain::{ChatMessage, ParticipantId, SessionId};

/// Frames the client emits to the relay, encoded as `{"event": .., "data": ..}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum OutboundEvent {
    #[serde(rename = "join-room", rename_all = "camelCase")]
    JoinRoom {
        room_id: SessionId,
        user_id: ParticipantId,
    },
    #[serde(rename = "leave-room", rename_all = "camelCase")]
    LeaveRoom { room_id: SessionId },
    #[serde(rename = "send-message", rename_all = "camelCase")]
    SendMessage { room_id: SessionId, message: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data")]
pub enum InboundEvent {
    #[serde(rename = "receive-message")]
    ReceiveMessage(ReceiveMessagePayload),
    #[serde(rename = "userJoined")]
    UserJoined(PresencePayload),
    #[serde(rename = "userLeft")]
    UserLeft(PresencePayload),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceiveMessagePayload {
    pub room_id: SessionId,
    pub message: String,
    pub sender_id: ParticipantId,
    #[serde(default)]
    pub sender_name: String,
    pub timestamp: String,
}

impl ReceiveMessagePayload {
    pub fn into_chat_message(self) -> ChatMessage {
        ChatMessage {
            session_id: self.room_id,
            sender_id: self.sender_id,
            sender_name: self.sender_name,
            content: self.message,
            timestamp: self.timestamp,
        }
    }
}

/// Relay servers disagree on the field naming the user, so all three spellings are accepted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresencePayload {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<ParticipantId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ParticipantId>,
}

impl PresencePayload {
    pub fn participant_id(&self) -> Option<ParticipantId> {
        self.user_id
            .as_ref()
            .or(self.uid.as_ref())
            .or(self.id.as_ref())
            .filter(|id| !id.as_str().is_empty())
            .cloned()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateParticipantsRequest {
    pub participants: Vec<ParticipantId>,
}

/// REST responses arrive either wrapped as `{success, data}` or as the bare object.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ApiResponse<T> {
    Wrapped { data: T },
    Bare(T),
}

impl<T> ApiResponse<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Wrapped { data } => data,
            Self::Bare(data) => data,
        }
    }
}

#[cfg(test)]
#[path = "tests/protocol_tests.rs"]
mod tests;
