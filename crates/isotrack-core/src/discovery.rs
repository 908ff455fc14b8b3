//! Release discovery
//!
//! Anything that can name the latest release implements [`ReleaseSource`];
//! the orchestrator only ever sees the resulting descriptor.

use crate::error::IsotrackError;
use crate::http::ensure_success;
use async_trait::async_trait;
use chrono::NaiveDate;
use isotrack_types::{DigestAlgorithm, ReleaseDescriptor, ReleaseInfo};
use reqwest::Client;
use serde::Deserialize;
use tracing::{debug, info};
use url::Url;

/// Pluggable discovery of the newest published release
#[async_trait]
pub trait ReleaseSource: Send + Sync {
    async fn latest(&self) -> Result<ReleaseInfo, IsotrackError>;
}

/// Arch Linux releng JSON feed
#[derive(Debug, Clone)]
pub struct ArchReleaseFeed {
    client: Client,
    feed_url: Url,
    algorithm: DigestAlgorithm,
}

#[derive(Debug, Deserialize)]
struct Feed {
    #[serde(default)]
    releases: Vec<FeedRelease>,
}

#[derive(Debug, Deserialize)]
struct FeedRelease {
    version: Option<String>,
    release_date: Option<String>,
    kernel_version: Option<String>,
    #[serde(default)]
    available: bool,
    info_hash: Option<String>,
    torrent_url: Option<String>,
    md5_sum: Option<String>,
    sha1_sum: Option<String>,
    sha256_sum: Option<String>,
}

fn require(value: Option<String>, field: &'static str) -> Result<String, IsotrackError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or(IsotrackError::MissingField(field))
}

impl ArchReleaseFeed {
    pub fn new(client: Client, feed_url: Url, algorithm: DigestAlgorithm) -> Self {
        Self {
            client,
            feed_url,
            algorithm,
        }
    }

    /// Turn one feed entry into release information
    fn parse_release(&self, release: FeedRelease) -> Result<ReleaseInfo, IsotrackError> {
        let version = require(release.version, "version")?;
        let release_date = require(release.release_date, "release_date")?;
        let release_date = NaiveDate::parse_from_str(&release_date, "%Y-%m-%d")
            .map_err(|_| IsotrackError::MissingField("release_date"))?;
        let kernel_version = require(release.kernel_version, "kernel_version")?;
        let swarm_id = require(release.info_hash, "info_hash")?;
        let torrent_url = require(release.torrent_url, "torrent_url")?;

        let expected_digest = match self.algorithm {
            DigestAlgorithm::Md5 => require(release.md5_sum, "md5_sum")?,
            DigestAlgorithm::Sha1 => require(release.sha1_sum, "sha1_sum")?,
            DigestAlgorithm::Sha256 => require(release.sha256_sum, "sha256_sum")?,
        };

        let descriptor = ReleaseDescriptor {
            digest_algorithm: self.algorithm,
            expected_digest: expected_digest.to_ascii_lowercase(),
            file_name: format!("archlinux-{version}-x86_64.iso"),
            swarm_id: swarm_id.to_ascii_lowercase(),
            source_uri: self.feed_url.join(&torrent_url)?,
        };
        descriptor.validate()?;

        Ok(ReleaseInfo {
            version,
            release_date,
            kernel_version,
            available: release.available,
            descriptor,
        })
    }
}

#[async_trait]
impl ReleaseSource for ArchReleaseFeed {
    async fn latest(&self) -> Result<ReleaseInfo, IsotrackError> {
        info!("Reading release feed: {}", self.feed_url);

        let response = self.client.get(self.feed_url.clone()).send().await?;
        let feed: Feed = ensure_success(response).await?.json().await?;
        debug!(releases = feed.releases.len(), "release feed parsed");

        let release = feed
            .releases
            .into_iter()
            .find(|r| r.available)
            .ok_or(IsotrackError::NoRelease)?;

        let info = self.parse_release(release)?;
        info!(
            version = %info.version,
            kernel = %info.kernel_version,
            file = %info.descriptor.file_name,
            "latest release discovered"
        );
        Ok(info)
    }
}
