//! Retrieval of transfer descriptor (`.torrent`) files

use crate::error::IsotrackError;
use crate::http::ensure_success;
use async_trait::async_trait;
use reqwest::Client;
use tracing::info;
use url::Url;

/// Fetches the bytes the engine needs to register a transfer
#[async_trait]
pub trait MetainfoFetcher: Send + Sync {
    async fn fetch(&self, source: &Url) -> Result<Vec<u8>, IsotrackError>;
}

/// Plain HTTP(S) GET
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MetainfoFetcher for HttpFetcher {
    async fn fetch(&self, source: &Url) -> Result<Vec<u8>, IsotrackError> {
        info!("Fetching transfer descriptor: {}", source);

        let response = self.client.get(source.clone()).send().await?;
        let bytes = ensure_success(response).await?.bytes().await?;
        if bytes.is_empty() {
            return Err(IsotrackError::ServerError {
                status: 200,
                message: format!("empty transfer descriptor at {source}"),
            });
        }

        Ok(bytes.to_vec())
    }
}
