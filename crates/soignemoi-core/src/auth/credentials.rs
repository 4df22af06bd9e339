use std::sync::{PoisonError, RwLock};

use anyhow::{Context, Result};
use keyring::Entry;
use secrecy::{ExposeSecret, SecretString};

const SERVICE_NAME: &str = "soignemoi";

/// Username/password pair used to obtain session tokens.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        let password: String = password.into();
        Self {
            username: username.into(),
            password: SecretString::from(password),
        }
    }

    pub fn empty() -> Self {
        Self::new("", "")
    }

    /// An empty pair cannot authenticate.
    pub fn is_empty(&self) -> bool {
        self.username.is_empty() || self.password.expose_secret().is_empty()
    }
}

/// Holds the credentials entered at login for silent re-authentication.
#[derive(Debug)]
pub struct CredentialHolder {
    current: RwLock<Credentials>,
}

impl Default for CredentialHolder {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialHolder {
    pub fn new() -> Self {
        Self {
            current: RwLock::new(Credentials::empty()),
        }
    }

    /// Replace the stored credentials. Last write wins.
    pub fn configure(&self, username: impl Into<String>, password: impl Into<String>) {
        let credentials = Credentials::new(username, password);
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = credentials;
    }

    /// The most recently configured pair, or an empty pair.
    pub fn current_credentials(&self) -> Credentials {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self.current.write().unwrap_or_else(PoisonError::into_inner) = Credentials::empty();
    }
}

/// OS keychain storage so a password survives between runs. Entries are
/// keyed by username under the `soignemoi` service.
pub struct CredentialStore;

impl CredentialStore {
    fn entry(username: &str) -> Result<Entry> {
        Entry::new(SERVICE_NAME, username)
            .with_context(|| format!("Failed to open keychain entry for {}", username))
    }

    pub fn store(username: &str, password: &str) -> Result<()> {
        Self::entry(username)?
            .set_password(password)
            .with_context(|| format!("Failed to save password for {} in keychain", username))
    }

    /// The remembered password, or `None` if nothing is stored for `username`.
    pub fn password(username: &str) -> Result<Option<String>> {
        match Self::entry(username)?.get_password() {
            Ok(password) => Ok(Some(password)),
            Err(keyring::Error::NoEntry) => Ok(None),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to read password for {} from keychain", username)),
        }
    }

    /// Forget the password for `username`. Returns false if none was stored.
    pub fn delete(username: &str) -> Result<bool> {
        match Self::entry(username)?.delete_credential() {
            Ok(()) => Ok(true),
            Err(keyring::Error::NoEntry) => Ok(false),
            Err(e) => Err(e)
                .with_context(|| format!("Failed to remove password for {} from keychain", username)),
        }
    }

    /// Configure `holder` from the keychain. Returns false, leaving `holder`
    /// untouched, if no password is stored for `username`.
    pub fn load_into(username: &str, holder: &CredentialHolder) -> Result<bool> {
        let Some(password) = Self::password(username)? else {
            return Ok(false);
        };
        holder.configure(username, password);
        Ok(true)
    }
}
