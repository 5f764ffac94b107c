use async_trait::async_trait;
use moka::future::Cache;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, error, info};

use crate::config::Config;
use crate::models::{DocumentIdentity, DocumentMetadata, SessionError};

/// Where a session gets document metadata from
#[async_trait]
pub trait MetadataSource: Send + Sync {
    /// `Ok(None)` when the document does not exist
    async fn fetch(&self, identity: &DocumentIdentity) -> Result<Option<DocumentMetadata>, SessionError>;
}

/// Fetches document metadata from the application's REST API
pub struct HttpMetadataSource {
    client: Client,
    base_url: String,
    auth_token: Option<String>,
    cache: Cache<DocumentIdentity, DocumentMetadata>,
}

impl HttpMetadataSource {
    pub fn new(base_url: String, auth_token: Option<String>, cache_ttl: Duration) -> Result<Self, SessionError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SessionError::Metadata(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            auth_token,
            cache: Cache::builder()
                .max_capacity(10_000)
                .time_to_live(cache_ttl)
                .build(),
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, SessionError> {
        Self::new(
            config.api_url.clone(),
            config.auth_token.clone(),
            Duration::from_secs(config.metadata_cache_ttl_secs),
        )
    }

    fn document_url(&self, identity: &DocumentIdentity) -> String {
        format!(
            "{}/v1/{}/documents/{}",
            self.base_url, identity.org_id, identity.doc_id
        )
    }

    async fn fetch_remote(&self, identity: &DocumentIdentity) -> Result<Option<DocumentMetadata>, SessionError> {
        let url = self.document_url(identity);
        let mut request = self.client.get(&url);
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            error!("Failed to fetch metadata from {}: {}", url, e);
            SessionError::Metadata(format!("Request failed: {}", e))
        })?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                info!("Document {}/{} not found", identity.org_id, identity.doc_id);
                Ok(None)
            }
            status if status.is_success() => {
                let metadata = response
                    .json::<DocumentMetadata>()
                    .await
                    .map_err(|e| SessionError::Metadata(format!("Invalid metadata body: {}", e)))?;
                Ok(Some(metadata))
            }
            status => Err(SessionError::Metadata(format!(
                "Metadata API answered {} for {}",
                status, url
            ))),
        }
    }
}

#[async_trait]
impl MetadataSource for HttpMetadataSource {
    async fn fetch(&self, identity: &DocumentIdentity) -> Result<Option<DocumentMetadata>, SessionError> {
        if let Some(metadata) = self.cache.get(identity).await {
            debug!("Metadata cache hit for {}/{}", identity.org_id, identity.doc_id);
            return Ok(Some(metadata));
        }

        let fetched = self.fetch_remote(identity).await?;
        if let Some(metadata) = &fetched {
            self.cache.insert(identity.clone(), metadata.clone()).await;
        }
        Ok(fetched)
    }
}
