use anyhow::Result;
use async_trait::async_trait;
use shared::domain::{Meeting, ParticipantId, SessionId};

pub mod config;
pub mod dedup;
pub mod error;
pub mod meeting_api;
pub mod participants;
pub mod session;
pub mod transport;
pub mod unread;
pub mod ws_relay;

pub use config::{load_settings, SessionSettings};
pub use error::{FailureReason, SessionError, TransportError, ValidationError};
pub use meeting_api::HttpMeetingService;
pub use participants::ParticipantView;
pub use session::{SessionDeps, SessionHandle, SessionOptions, SessionState, SessionView};
pub use transport::{RelayChannel, RelayConnector, RelayEvent, RelayTransport};
pub use ws_relay::WsRelayConnector;

#[async_trait]
pub trait MeetingLookup: Send + Sync {
    /// `Ok(None)` when the meeting does not exist.
    async fn get_meeting(&self, id: &SessionId, credential: &str) -> Result<Option<Meeting>>;
}

#[async_trait]
pub trait MeetingUpdate: Send + Sync {
    async fn update_participants(
        &self,
        id: &SessionId,
        participants: &[ParticipantId],
        credential: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait CredentialProvider: Send + Sync {
    async fn get_token(&self) -> Option<String>;
}

pub struct StaticCredentials(Option<String>);

impl StaticCredentials {
    pub fn new(token: Option<String>) -> Self {
        Self(token)
    }
}

#[async_trait]
impl CredentialProvider for StaticCredentials {
    async fn get_token(&self) -> Option<String> {
        self.0.clone()
    }
}

#[cfg(test)]
#[path = "tests/support.rs"]
pub(crate) mod test_support;
