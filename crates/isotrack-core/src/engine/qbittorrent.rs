//! qBittorrent WebUI (API v2) control client

use super::TransferControl;
use crate::error::IsotrackError;
use crate::http::ensure_success;
use async_trait::async_trait;
use isotrack_types::{HealthStatus, TransferStatus, ETA_UNBOUNDED};
use reqwest::multipart::{Form, Part};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use url::Url;

/// Body the engine returns when it refuses to add a torrent
const ADD_REJECTED: &str = "Fails.";

/// WebUI credentials
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// Client for a qBittorrent instance's control API
#[derive(Debug)]
pub struct QbittorrentClient {
    client: Client,
    base_url: Url,
    credentials: Option<Credentials>,
    /// Set once a login has succeeded for this client's cookie store
    logged_in: Mutex<bool>,
}

/// The subset of `/torrents/properties` the orchestrator needs
#[derive(Debug, Deserialize)]
struct TorrentProperties {
    completion_date: Option<i64>,
    pieces_have: Option<i64>,
    pieces_num: Option<i64>,
    eta: Option<i64>,
}

impl TorrentProperties {
    fn into_status(self) -> Result<TransferStatus, IsotrackError> {
        let completion_date = self.completion_date.ok_or_else(|| missing("completion_date"))?;
        let pieces_have = self.pieces_have.ok_or_else(|| missing("pieces_have"))?;
        let pieces_num = self.pieces_num.ok_or_else(|| missing("pieces_num"))?;
        let eta = self.eta.ok_or_else(|| missing("eta"))?;

        // -1 marks "not complete" / "unknown" for each of these fields.
        let eta_seconds = u64::try_from(eta).unwrap_or(ETA_UNBOUNDED);
        Ok(TransferStatus::new(
            completion_date >= 0,
            u64::try_from(pieces_have).unwrap_or(0),
            u64::try_from(pieces_num).unwrap_or(0),
            eta_seconds,
        ))
    }
}

fn missing(field: &str) -> IsotrackError {
    IsotrackError::MalformedResponse(format!("torrent properties lack `{field}`"))
}

impl QbittorrentClient {
    /// Create a client for the WebUI at `base_url`
    pub fn new(client: Client, base_url: Url, credentials: Option<Credentials>) -> Self {
        let mut base_url = base_url;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Self {
            client,
            base_url,
            credentials,
            logged_in: Mutex::new(false),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, IsotrackError> {
        Ok(self.base_url.join(path)?)
    }

    /// Log in once if credentials were configured
    async fn ensure_login(&self) -> Result<(), IsotrackError> {
        let Some(credentials) = self.credentials.as_ref() else {
            return Ok(());
        };

        let mut logged_in = self.logged_in.lock().await;
        if *logged_in {
            return Ok(());
        }

        let response = self
            .client
            .post(self.endpoint("api/v2/auth/login")?)
            // The WebUI rejects logins without a matching Referer.
            .header(reqwest::header::REFERER, self.base_url.as_str())
            .form(&[
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;
        if body.trim() != "Ok." {
            return Err(IsotrackError::Unauthorized(format!(
                "login refused for user {}",
                credentials.username
            )));
        }

        info!(user = %credentials.username, "logged in to qBittorrent");
        *logged_in = true;
        Ok(())
    }

    async fn get_text(&self, path: &str) -> Result<String, IsotrackError> {
        self.ensure_login().await?;
        let response = self.client.get(self.endpoint(path)?).send().await?;
        if response.status() == StatusCode::FORBIDDEN {
            return Err(IsotrackError::Unauthorized(path.to_string()));
        }
        Ok(ensure_success(response).await?.text().await?)
    }
}

#[async_trait]
impl TransferControl for QbittorrentClient {
    async fn health(&self) -> HealthStatus {
        match self.get_text("api/v2/app/version").await {
            Ok(version) => HealthStatus::Reachable {
                version: version.trim().to_string(),
            },
            Err(e) => {
                debug!(error = %e, url = %self.base_url, "engine health check failed");
                HealthStatus::Unreachable {
                    reason: e.to_string(),
                }
            }
        }
    }

    async fn status(&self, swarm_id: &str) -> Result<Option<TransferStatus>, IsotrackError> {
        self.ensure_login().await?;

        let mut url = self.endpoint("api/v2/torrents/properties")?;
        url.query_pairs_mut()
            .append_pair("hash", &swarm_id.to_ascii_lowercase());

        let response = self.client.get(url).send().await?;
        match response.status() {
            StatusCode::NOT_FOUND => return Ok(None),
            StatusCode::FORBIDDEN => {
                return Err(IsotrackError::Unauthorized("torrents/properties".into()))
            }
            _ => {}
        }

        let body = ensure_success(response).await?.text().await?;
        if body.trim().is_empty() {
            return Ok(None);
        }

        let properties: TorrentProperties = serde_json::from_str(&body)
            .map_err(|e| IsotrackError::MalformedResponse(e.to_string()))?;
        properties.into_status().map(Some)
    }

    async fn add(&self, descriptor: Vec<u8>, target_dir: &Path) -> Result<(), IsotrackError> {
        self.ensure_login().await?;

        let part = Part::bytes(descriptor)
            .file_name("release.torrent")
            .mime_str("application/x-bittorrent")?;
        let form = Form::new()
            .part("torrents", part)
            .text("savepath", target_dir.to_string_lossy().into_owned());

        let response = self
            .client
            .post(self.endpoint("api/v2/torrents/add")?)
            .multipart(form)
            .send()
            .await?;
        let body = ensure_success(response).await?.text().await?;

        if body.trim() == ADD_REJECTED {
            warn!(dir = %target_dir.display(), "engine refused to add torrent");
            return Err(IsotrackError::Rejected(body.trim().to_string()));
        }

        info!(dir = %target_dir.display(), "torrent submitted to engine");
        Ok(())
    }

    async fn default_save_path(&self) -> Result<PathBuf, IsotrackError> {
        let path = self.get_text("api/v2/app/defaultSavePath").await?;
        let path = path.trim();
        if path.is_empty() {
            return Err(IsotrackError::MalformedResponse(
                "empty default save path".to_string(),
            ));
        }
        Ok(PathBuf::from(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use serde_json::json;
    use std::time::Duration;

    const HASH: &str = "6F1B9CF5E2A4B2B1D0A8F3A4C2E1D0B9A8F7E6D5";

    fn client_for(server: &MockServer, credentials: Option<Credentials>) -> QbittorrentClient {
        QbittorrentClient::new(
            crate::http::build_client(Duration::from_secs(5)).unwrap(),
            server.base_url().parse().unwrap(),
            credentials,
        )
    }

    #[tokio::test]
    async fn test_health_reports_version() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET).path("/api/v2/app/version");
            then.status(200).body("v4.6.5");
        });

        let health = client_for(&server, None).health().await;
        mock.assert();
        assert_eq!(
            health,
            HealthStatus::Reachable {
                version: "v4.6.5".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_health_unreachable_when_nothing_listens() {
        let client = QbittorrentClient::new(
            crate::http::build_client(Duration::from_secs(2)).unwrap(),
            "http://127.0.0.1:1/".parse().unwrap(),
            None,
        );
        assert!(!client.health().await.is_reachable());
    }

    #[tokio::test]
    async fn test_status_in_progress() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(GET)
                .path("/api/v2/torrents/properties")
                .query_param("hash", HASH.to_ascii_lowercase());
            then.status(200).json_body(json!({
                "completion_date": -1,
                "pieces_have": 120,
                "pieces_num": 1600,
                "eta": 340,
                "save_path": "/downloads/"
            }));
        });

        let status = client_for(&server, None).status(HASH).await.unwrap().unwrap();
        mock.assert();
        assert_eq!(status, TransferStatus::new(false, 120, 1600, 340));
    }

    #[tokio::test]
    async fn test_status_complete() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/v2/torrents/properties");
            then.status(200).json_body(json!({
                "completion_date": 1717243200,
                "pieces_have": 1600,
                "pieces_num": 1600,
                "eta": 8640000
            }));
        });

        let status = client_for(&server, None).status(HASH).await.unwrap().unwrap();
        assert!(status.complete);
        assert_eq!(status.pieces_have, status.pieces_total);
    }

    #[tokio::test]
    async fn test_status_unknown_hash_is_none() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/v2/torrents/properties");
            then.status(404).body("Not Found");
        });

        assert!(client_for(&server, None).status(HASH).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_status_missing_field_is_malformed() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/v2/torrents/properties");
            then.status(200).json_body(json!({ "pieces_have": 1, "pieces_num": 2 }));
        });

        let err = client_for(&server, None).status(HASH).await.unwrap_err();
        assert!(matches!(err, IsotrackError::MalformedResponse(_)));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_add_uploads_torrent_with_save_path() {
        let server = MockServer::start_async().await;
        let mock = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v2/torrents/add")
                .body_contains("name=\"torrents\"")
                .body_contains("/srv/iso");
            then.status(200).body("Ok.");
        });

        client_for(&server, None)
            .add(b"d8:announce0:e".to_vec(), Path::new("/srv/iso"))
            .await
            .unwrap();
        mock.assert();
    }

    #[tokio::test]
    async fn test_add_rejection_is_reported() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/v2/torrents/add");
            then.status(200).body("Fails.");
        });

        let err = client_for(&server, None)
            .add(b"d8:announce0:e".to_vec(), Path::new("/srv/iso"))
            .await
            .unwrap_err();
        assert!(matches!(err, IsotrackError::Rejected(_)));
    }

    #[tokio::test]
    async fn test_login_happens_once() {
        let server = MockServer::start_async().await;
        let login = server.mock(|when, then| {
            when.method(POST)
                .path("/api/v2/auth/login")
                .body_contains("username=admin");
            then.status(200)
                .header("set-cookie", "SID=abc; path=/")
                .body("Ok.");
        });
        let version = server.mock(|when, then| {
            when.method(GET).path("/api/v2/app/version");
            then.status(200).body("v5.0.0");
        });

        let client = client_for(
            &server,
            Some(Credentials {
                username: "admin".to_string(),
                password: "adminadmin".to_string(),
            }),
        );
        assert!(client.health().await.is_reachable());
        assert!(client.health().await.is_reachable());

        login.assert_hits(1);
        version.assert_hits(2);
    }

    #[tokio::test]
    async fn test_bad_credentials_make_engine_unusable() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(POST).path("/api/v2/auth/login");
            then.status(200).body("Fails.");
        });

        let client = client_for(
            &server,
            Some(Credentials {
                username: "admin".to_string(),
                password: "wrong".to_string(),
            }),
        );
        assert!(!client.health().await.is_reachable());
    }

    #[tokio::test]
    async fn test_default_save_path() {
        let server = MockServer::start_async().await;
        server.mock(|when, then| {
            when.method(GET).path("/api/v2/app/defaultSavePath");
            then.status(200).body("/home/user/Downloads\n");
        });

        let path = client_for(&server, None).default_save_path().await.unwrap();
        assert_eq!(path, PathBuf::from("/home/user/Downloads"));
    }
}
