use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;
use url::Url;

use taskline_proto::{Notification, NotificationId};

#[derive(Debug, Error)]
pub enum RestError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("gateway rejected the request ({status}): {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("invalid gateway url: {0}")]
    InvalidUrl(#[from] url::ParseError),
}

#[derive(Debug, Deserialize)]
struct ListEnvelope {
    data: Vec<Notification>,
}

#[derive(Debug, Deserialize)]
struct CountEnvelope {
    count: u64,
}

#[derive(Debug, Deserialize)]
struct ItemEnvelope {
    data: Notification,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: String,
}

/// Thin client for the gateway's REST fallback endpoints. The manager uses
/// it to hydrate the unread counter after connecting and to keep read state
/// authoritative on the server.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base: Url,
    credential: String,
}

impl RestClient {
    pub fn new(base_url: &str, credential: impl Into<String>) -> Result<Self, RestError> {
        Ok(Self {
            http: reqwest::Client::new(),
            base: Url::parse(base_url)?,
            credential: credential.into(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, RestError> {
        Ok(self.base.join(path)?)
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, RestError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let message = response
            .json::<ErrorEnvelope>()
            .await
            .map(|envelope| envelope.error)
            .unwrap_or_default();
        Err(RestError::Rejected { status, message })
    }

    pub async fn list_notifications(&self) -> Result<Vec<Notification>, RestError> {
        let response = self
            .http
            .get(self.endpoint("api/notifications")?)
            .bearer_auth(&self.credential)
            .send()
            .await?;
        let envelope: ListEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.data)
    }

    pub async fn unread_count(&self) -> Result<u64, RestError> {
        let response = self
            .http
            .get(self.endpoint("api/notifications/unread-count")?)
            .bearer_auth(&self.credential)
            .send()
            .await?;
        let envelope: CountEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.count)
    }

    pub async fn mark_read(&self, id: &NotificationId) -> Result<Notification, RestError> {
        let response = self
            .http
            .put(self.endpoint(&format!("api/notifications/{id}"))?)
            .bearer_auth(&self.credential)
            .send()
            .await?;
        let envelope: ItemEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.data)
    }

    /// Returns how many notifications flipped to read.
    pub async fn mark_all_read(&self) -> Result<u64, RestError> {
        let response = self
            .http
            .put(self.endpoint("api/notifications/read-all")?)
            .bearer_auth(&self.credential)
            .send()
            .await?;
        let envelope: CountEnvelope = Self::check(response).await?.json().await?;
        Ok(envelope.count)
    }
}
