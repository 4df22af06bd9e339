//! REST API client module for the SoigneMoi backend.
//!
//! This module provides the `HttpAuthClient` that exchanges credentials for
//! a JWT bearer token at the login endpoint, and the `ApiClient` that sends
//! authenticated requests with the token kept by the `SessionTokenManager`.

pub mod client;
pub mod error;
pub mod login;

pub use client::{build_http_client, ApiClient, DEFAULT_REQUEST_TIMEOUT_SECS};
pub use error::ApiError;
pub use login::HttpAuthClient;
