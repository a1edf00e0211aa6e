use async_trait::async_trait;
use models::device::{DeviceRecord, DeviceStatus, StatusUpdate, ToggleOutcome};
use models::scan::{ScanRequest, ScanResolution};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;
use url::Url;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("rejected with {status}: {message}")]
    Rejected { status: StatusCode, message: String },
    #[error("invalid url: {0}")]
    Url(#[from] url::ParseError),
    #[error(transparent)]
    Transport(#[from] reqwest::Error),
}

/// The parts of the custody api a gate station drives.
#[async_trait]
pub trait CustodyApi: Send + Sync {
    async fn resolve(&self, payload: &str) -> Result<ScanResolution, ClientError>;

    async fn set_status(
        &self,
        device_id: i32,
        status: DeviceStatus,
    ) -> Result<DeviceRecord, ClientError>;

    async fn toggle(&self, payload: &str) -> Result<ToggleOutcome, ClientError>;
}

#[derive(Debug, Clone)]
pub struct GateClient {
    client: reqwest::Client,
    base: Url,
    token: String,
}

impl GateClient {
    pub fn new(base: Url, token: String) -> Result<Self, ClientError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(concat!("gated/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base,
            token,
        })
    }

    fn url(&self, path: &str) -> Result<Url, ClientError> {
        Ok(self.base.join(path)?)
    }

    async fn parse<T: DeserializeOwned>(response: Response) -> Result<T, ClientError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response.text().await.unwrap_or_default();
        debug!("Request failed with {status}: {message}");
        Err(match status {
            StatusCode::NOT_FOUND => ClientError::NotFound(message),
            StatusCode::CONFLICT => ClientError::Conflict(message),
            status => ClientError::Rejected { status, message },
        })
    }
}

#[async_trait]
impl CustodyApi for GateClient {
    async fn resolve(&self, payload: &str) -> Result<ScanResolution, ClientError> {
        let response = self
            .client
            .post(self.url("scan/resolve")?)
            .bearer_auth(&self.token)
            .json(&ScanRequest {
                payload: payload.to_owned(),
            })
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn set_status(
        &self,
        device_id: i32,
        status: DeviceStatus,
    ) -> Result<DeviceRecord, ClientError> {
        let response = self
            .client
            .put(self.url(&format!("devices/{device_id}/status"))?)
            .bearer_auth(&self.token)
            .json(&StatusUpdate { status })
            .send()
            .await?;
        Self::parse(response).await
    }

    async fn toggle(&self, payload: &str) -> Result<ToggleOutcome, ClientError> {
        let response = self
            .client
            .post(self.url("scan/toggle")?)
            .bearer_auth(&self.token)
            .json(&ScanRequest {
                payload: payload.to_owned(),
            })
            .send()
            .await?;
        Self::parse(response).await
    }
}
