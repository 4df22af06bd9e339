//! SoigneMoi core - session token lifecycle and API client for ward staff.
//!
//! The `auth` module keeps a bearer token valid for the lifetime of a login,
//! re-authenticating with the held credentials when it expires. The `api`
//! module talks to the backend with that token.

pub mod api;
pub mod auth;
pub mod config;
pub mod models;

pub use api::{ApiClient, ApiError, HttpAuthClient};
pub use auth::{
    AuthClient, AuthError, CredentialHolder, CredentialStore, SessionError, SessionTokenManager,
    TokenStatus,
};
pub use config::Config;
