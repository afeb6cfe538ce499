//! S3-compatible object store over HTTP.
//!
//! Objects are addressed path-style as `{endpoint}/{bucket}/{key}`. Requests
//! are not SigV4-signed, so `endpoint` is required: point it at a signing
//! gateway, a MinIO-style service that accepts the bearer token, or a
//! bucket that is deliberately public.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::StatusCode;
use tracing::debug;

use super::{validate_key, ArtifactStore, StoreError};

/// Connection settings for the remote store
#[derive(Debug, Clone)]
pub struct RemoteStoreConfig {
    pub bucket: String,

    /// Service the bucket is reached through
    pub endpoint: Option<String>,

    /// Bearer token sent with every request
    pub token: Option<String>,

    pub timeout: Duration,
}

impl RemoteStoreConfig {
    /// Base URL objects are resolved against
    pub fn base_url(&self) -> anyhow::Result<String> {
        let endpoint = match self.endpoint.as_deref().map(str::trim) {
            Some(endpoint) if !endpoint.is_empty() => endpoint,
            _ => anyhow::bail!(
                "durable store requires an endpoint (set PATHWAYS_STORE_ENDPOINT or storage.endpoint)"
            ),
        };
        Ok(format!("{}/{}", endpoint.trim_end_matches('/'), self.bucket))
    }
}

/// HTTP object store client
pub struct RemoteObjectStore {
    base_url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl RemoteObjectStore {
    pub fn new(config: &RemoteStoreConfig) -> anyhow::Result<Self> {
        if config.bucket.trim().is_empty() {
            anyhow::bail!("durable store requires a bucket name (set AWS_BUCKET or storage.bucket)");
        }

        let base_url = config.base_url()?;
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(config.timeout)
            .build()?;

        Ok(Self {
            base_url,
            token: config.token.clone(),
            client,
        })
    }

    fn url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }
}

#[async_trait]
impl ArtifactStore for RemoteObjectStore {
    fn name(&self) -> &str {
        "durable-store"
    }

    async fn put(&self, key: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        let size = bytes.len();

        let response = self
            .authorize(self.client.put(self.url(key)))
            .header(CONTENT_TYPE, content_type)
            .body(bytes)
            .send()
            .await
            .map_err(|source| StoreError::Transport {
                key: key.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::Http {
                key: key.to_string(),
                status: status.as_u16(),
            });
        }

        debug!(key, size, "Stored object");
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, StoreError> {
        validate_key(key)?;
        let transport = |source| StoreError::Transport {
            key: key.to_string(),
            source,
        };

        let response = self
            .authorize(self.client.get(self.url(key)))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            status if status.is_success() => {
                let bytes = response.bytes().await.map_err(transport)?;
                Ok(bytes.to_vec())
            }
            StatusCode::NOT_FOUND => Err(StoreError::NotFound(key.to_string())),
            status => Err(StoreError::Http {
                key: key.to_string(),
                status: status.as_u16(),
            }),
        }
    }
}
