use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shared::{
    domain::{Meeting, ParticipantId, SessionId},
    error::ApiException,
    protocol::{ApiResponse, UpdateParticipantsRequest},
};
use tracing::debug;
use url::Url;

use crate::{config::SessionSettings, MeetingLookup, MeetingUpdate};

/// REST client for the meeting service (`GET`/`PUT {base}/meetings/{id}`).
pub struct HttpMeetingService {
    http: Client,
    base_url: Url,
}

impl HttpMeetingService {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base_url = Url::parse(base_url.trim_end_matches('/'))
            .with_context(|| format!("invalid meeting api url: {base_url}"))?;
        if base_url.cannot_be_a_base() {
            return Err(anyhow!("meeting api url cannot carry a path: {base_url}"));
        }
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .context("failed to build meeting api client")?;
        Ok(Self { http, base_url })
    }

    pub fn from_settings(settings: &SessionSettings) -> Result<Self> {
        Self::new(&settings.api_base_url, settings.lookup_timeout)
    }

    fn meeting_url(&self, id: &SessionId) -> Result<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| anyhow!("meeting api url cannot carry a path"))?
            .pop_if_empty()
            .extend(["meetings", id.as_str()]);
        Ok(url)
    }
}

async fn error_for_status(response: reqwest::Response) -> Result<reqwest::Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(ApiException::from_body(status.as_u16(), &body).into())
}

#[async_trait]
impl MeetingLookup for HttpMeetingService {
    async fn get_meeting(&self, id: &SessionId, credential: &str) -> Result<Option<Meeting>> {
        let url = self.meeting_url(id)?;
        debug!(meeting_id = %id, "meetings: fetching meeting");
        let response = self
            .http
            .get(url)
            .bearer_auth(credential)
            .send()
            .await
            .with_context(|| format!("meeting lookup request failed for {id}"))?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let meeting = error_for_status(response)
            .await?
            .json::<ApiResponse<Meeting>>()
            .await
            .with_context(|| format!("invalid meeting payload for {id}"))?
            .into_inner();
        Ok(Some(meeting))
    }
}

#[async_trait]
impl MeetingUpdate for HttpMeetingService {
    async fn update_participants(
        &self,
        id: &SessionId,
        participants: &[ParticipantId],
        credential: &str,
    ) -> Result<()> {
        let url = self.meeting_url(id)?;
        debug!(
            meeting_id = %id,
            participants = participants.len(),
            "meetings: updating participant list"
        );
        let response = self
            .http
            .put(url)
            .bearer_auth(credential)
            .json(&UpdateParticipantsRequest {
                participants: participants.to_vec(),
            })
            .send()
            .await
            .with_context(|| format!("participant update request failed for {id}"))?;
        error_for_status(response).await?;
        Ok(())
    }
}

#[cfg(test)]
#[path = "tests/meeting_api_tests.rs"]
mod tests;
