//! Authentication module for managing session tokens and credentials.
//!
//! This module provides:
//! - `SessionTokenManager`: owns the session token and refreshes it when expired
//! - `CredentialHolder`: in-memory credentials used for silent re-authentication
//! - `CredentialStore`: secure OS-level credential storage via keyring
//! - `AuthClient`: the credentials-for-token exchange seam
//! - `token`: decoding of the expiration embedded in a token
//!
//! Tokens carry their own expiration; an unreadable expiration counts as expired.

pub mod client;
pub mod clock;
pub mod credentials;
pub mod session;
pub mod token;

pub use client::{AuthClient, AuthError};
pub use clock::{Clock, SystemClock};
pub use credentials::{CredentialHolder, CredentialStore, Credentials};
pub use session::{SessionError, SessionState, SessionTokenManager, TokenStatus};
pub use token::{DecodeError, TokenClaims};
