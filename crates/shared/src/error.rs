use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error body returned by the meeting REST API, e.g. `{"message": "...", "error": "..."}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl ApiErrorBody {
    pub fn describe(&self) -> String {
        match (&self.message, &self.error) {
            (Some(message), Some(error)) => format!("{message} ({error})"),
            (Some(message), None) => message.clone(),
            (None, Some(error)) => error.clone(),
            (None, None) => "unexpected error".to_string(),
        }
    }
}

#[derive(Debug, Error)]
#[error("meeting api returned {status}: {message}")]
pub struct ApiException {
    pub status: u16,
    pub message: String,
}

impl ApiException {
    pub fn new(status: u16, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn from_body(status: u16, raw_body: &str) -> Self {
        let message = match serde_json::from_str::<ApiErrorBody>(raw_body) {
            Ok(body) => body.describe(),
            Err(_) if raw_body.trim().is_empty() => "unexpected error".to_string(),
            Err(_) => raw_body.trim().to_string(),
        };
        Self::new(status, message)
    }
}
