//! Artifact store backed by an HTTP object gateway.
//!
//! Objects are fetched with `GET <base_url>/<key>`. A configured token is sent
//! as a bearer credential.

use super::{decode, ArtifactStore, BackupLayout, BackupReader};
use crate::models::{Backup, BackupFileMeta, BackupFilesMetadata};
use crate::utils::cancel::cancellable;
use crate::utils::errors::{AgentError, Result};
use async_trait::async_trait;
use futures_util::TryStreamExt;
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use std::time::Duration;
use tokio_util::io::StreamReader;
use tokio_util::sync::CancellationToken;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpArtifactStore {
    client: Client,
    base_url: String,
    token: Option<String>,
    metadata_timeout: Duration,
    layout: BackupLayout,
    cancel: CancellationToken,
}

impl HttpArtifactStore {
    pub fn new(
        base_url: impl Into<String>,
        token: Option<String>,
        metadata_timeout: Duration,
        layout: BackupLayout,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .user_agent(concat!("restore-agent/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            metadata_timeout,
            layout,
            cancel,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    /// Issue a GET and turn non-success statuses into errors.
    /// `timeout` bounds the whole exchange including the body; file streams pass `None`.
    async fn get(&self, key: &str, timeout: Option<Duration>) -> Result<Response> {
        let url = self.url(key);
        debug!(url = %url, "Fetching backup object");

        let mut request = self.client.get(&url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }

        let response = cancellable(&self.cancel, async { Ok(request.send().await?) }).await?;
        match response.status() {
            StatusCode::NOT_FOUND => Err(AgentError::NotFound(url)),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(AgentError::PermissionDenied(
                format!("{} returned {}", url, response.status()),
            )),
            _ => Ok(response.error_for_status()?),
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Result<T> {
        let response = self.get(key, Some(self.metadata_timeout)).await?;
        let body = cancellable(&self.cancel, async { Ok(response.bytes().await?) }).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn fetch_sentinel(&self) -> Result<Backup> {
        self.get_json(&self.layout.sentinel_key()).await
    }

    async fn fetch_files_metadata(&self) -> Result<BackupFilesMetadata> {
        self.get_json(&self.layout.files_metadata_key()).await
    }

    async fn open_reader(&self, file: &BackupFileMeta) -> Result<BackupReader> {
        let response = self.get(&self.layout.file_key(file), None).await?;
        let stream = Box::pin(response.bytes_stream().map_err(std::io::Error::other));
        Ok(decode(StreamReader::new(stream), file.compression))
    }
}
