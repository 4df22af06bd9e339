use thiserror::Error;

/// Why a credentials-for-token exchange failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("Authentication failed - invalid username or password")]
    InvalidCredentials,

    #[error("Cannot reach server: {0}")]
    ServerUnreachable(String),

    #[error("Malformed login response: {0}")]
    MalformedResponse(String),

    #[error("Unexpected login response status {0}")]
    Other(u16),
}

/// Exchanges credentials for a fresh token. One request, one outcome.
#[async_trait::async_trait]
pub trait AuthClient: Send + Sync {
    async fn login(&self, username: &str, password: &str) -> Result<String, AuthError>;
}
