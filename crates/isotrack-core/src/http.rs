//! Shared HTTP client construction

use crate::error::IsotrackError;
use reqwest::Client;
use std::time::Duration;

/// User agent sent with every request
pub const USER_AGENT: &str = concat!("isotrack/", env!("CARGO_PKG_VERSION"));

/// Build the HTTP client used for the feed, descriptor fetches and the engine
pub fn build_client(timeout: Duration) -> Result<Client, IsotrackError> {
    let client = Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(10).min(timeout))
        .timeout(timeout)
        .cookie_store(true)
        .build()?;
    Ok(client)
}

/// Turn a non-success response into [`IsotrackError::ServerError`]
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, IsotrackError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = response.text().await.unwrap_or_default();
    Err(IsotrackError::ServerError {
        status: status.as_u16(),
        message: message.trim().to_string(),
    })
}
