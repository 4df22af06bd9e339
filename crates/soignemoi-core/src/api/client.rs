//! API client for authenticated requests to the SoigneMoi backend.
//!
//! Every request carries the bearer token handed out by the
//! `SessionTokenManager`. A 401 from the backend ends the session: the
//! manager is reset to empty so the next call logs in again.

use std::sync::Arc;
use std::time::Duration;

use reqwest::{header, Client};
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::auth::SessionTokenManager;
use crate::models::Profile;

use super::ApiError;

// ============================================================================
// Constants
// ============================================================================

/// Default HTTP request timeout in seconds.
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Profile of the logged-in staff member
const PROFILE_PATH: &str = "/api/profile";

/// Build the HTTP client shared by login and API requests.
pub fn build_http_client(timeout: Duration) -> reqwest::Result<Client> {
    Client::builder()
        .timeout(timeout)
        .default_headers(default_headers())
        .build()
}

fn default_headers() -> header::HeaderMap {
    let mut headers = header::HeaderMap::new();
    headers.insert(
        header::ACCEPT,
        header::HeaderValue::from_static("application/json"),
    );
    headers
}

/// API client for SoigneMoi.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ApiClient {
    client: Client,
    base_url: String,
    session: Arc<SessionTokenManager>,
}

impl ApiClient {
    pub fn new(client: Client, base_url: &str, session: Arc<SessionTokenManager>) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            session,
        }
    }

    pub fn session(&self) -> &Arc<SessionTokenManager> {
        &self.session
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Check if response is successful, returning an error with body if not.
    /// A 401 also ends the current session.
    async fn check_response(&self, response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            warn!(url = %response.url(), "Token rejected by backend, ending session");
            self.session.invalidate();
        }
        let body = response.text().await.unwrap_or_default();
        Err(ApiError::from_status(status, &body))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        let token = self.session.try_get_valid_token().await?;
        let url = self.url(path);
        debug!(url = %url, "GET");

        let response = self.client.get(&url).bearer_auth(token).send().await?;
        let response = self.check_response(response).await?;

        let body = response.bytes().await?;
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse JSON response from {}: {}", url, e))
        })
    }

    // ===== Data Fetching Methods =====

    /// Fetch the profile of the logged-in staff member
    pub async fn fetch_profile(&self) -> Result<Profile, ApiError> {
        self.get(PROFILE_PATH).await
    }
}
