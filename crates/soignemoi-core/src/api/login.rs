//! HTTP implementation of the credentials-for-token exchange.

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::auth::{AuthClient, AuthError};

/// Login endpoint, relative to the API base URL
const LOGIN_PATH: &str = "/api/login_check";

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    username: &'a str,
    password: &'a str,
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    token: String,
}

/// Posts credentials to the backend login endpoint.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct HttpAuthClient {
    client: Client,
    login_url: String,
}

impl HttpAuthClient {
    pub fn new(client: Client, base_url: &str) -> Self {
        Self {
            client,
            login_url: format!("{}{}", base_url.trim_end_matches('/'), LOGIN_PATH),
        }
    }
}

#[async_trait::async_trait]
impl AuthClient for HttpAuthClient {
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthError> {
        let response = self
            .client
            .post(&self.login_url)
            .json(&LoginRequest { username, password })
            .send()
            .await
            .map_err(|e| AuthError::ServerUnreachable(e.to_string()))?;

        let status = response.status();
        debug!(status = status.as_u16(), "Login response");

        match status.as_u16() {
            200 => {
                let body = response
                    .bytes()
                    .await
                    .map_err(|e| AuthError::ServerUnreachable(e.to_string()))?;
                let parsed: LoginResponse = serde_json::from_slice(&body)
                    .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
                if parsed.token.is_empty() {
                    return Err(AuthError::MalformedResponse("empty token".to_string()));
                }
                Ok(parsed.token)
            }
            401 => Err(AuthError::InvalidCredentials),
            code => Err(AuthError::Other(code)),
        }
    }
}
