//! Session token lifecycle.
//!
//! `SessionTokenManager` owns the current token and its expiration. Callers
//! ask for a valid token; when the stored one is missing or expired the
//! manager re-authenticates with the held credentials. Concurrent callers
//! that find the token expired all await one shared refresh instead of each
//! logging in on their own.

use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard};

use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use secrecy::ExposeSecret;
use thiserror::Error;
use tracing::{debug, info, warn};

use super::client::{AuthClient, AuthError};
use super::clock::{Clock, SystemClock};
use super::credentials::CredentialHolder;
use super::token::{self, TokenClaims};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("No credentials configured - log in first")]
    NoCredentials,

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("Token refresh did not complete: {0}")]
    RefreshAborted(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenStatus {
    /// No token was ever obtained, or the session was invalidated.
    Empty,
    Valid,
    /// Past its expiration, or expiration unknown.
    Expired,
}

/// Token and expiration, always replaced together.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    fn from_token(token: String) -> Self {
        if token.is_empty() {
            return Self::default();
        }
        let expires_at = match token::decode(&token) {
            Ok(claims) => Some(claims.expires_at),
            Err(e) => {
                warn!(error = %e, "Token has no readable expiration, treating as expired");
                None
            }
        };
        Self { token, expires_at }
    }

    /// A token is valid strictly before its expiration instant.
    pub fn status_at(&self, now: DateTime<Utc>) -> TokenStatus {
        if self.token.is_empty() {
            return TokenStatus::Empty;
        }
        match self.expires_at {
            Some(expires_at) if now < expires_at => TokenStatus::Valid,
            _ => TokenStatus::Expired,
        }
    }
}

impl fmt::Debug for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = if self.token.is_empty() { "<empty>" } else { "<redacted>" };
        f.debug_struct("SessionState")
            .field("token", &token)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

type RefreshOutcome = Result<String, SessionError>;
type PendingRefresh = Shared<BoxFuture<'static, RefreshOutcome>>;

enum Ticket {
    Ready(String),
    Pending(PendingRefresh),
}

/// The refresh currently running, if any. `generation` identifies the most
/// recently started refresh; an older one that finishes late is ignored.
#[derive(Default)]
struct InFlight {
    generation: u64,
    pending: Option<PendingRefresh>,
}

pub struct SessionTokenManager {
    inner: Arc<Inner>,
}

struct Inner {
    state: RwLock<SessionState>,
    // Lock order: in_flight before state
    in_flight: Mutex<InFlight>,
    credentials: Arc<CredentialHolder>,
    auth: Arc<dyn AuthClient>,
    clock: Arc<dyn Clock>,
}

impl SessionTokenManager {
    pub fn new(auth: Arc<dyn AuthClient>, credentials: Arc<CredentialHolder>) -> Self {
        Self::with_clock(auth, credentials, Arc::new(SystemClock))
    }

    pub fn with_clock(
        auth: Arc<dyn AuthClient>,
        credentials: Arc<CredentialHolder>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(SessionState::default()),
                in_flight: Mutex::new(InFlight::default()),
                credentials,
                auth,
                clock,
            }),
        }
    }

    pub fn credentials(&self) -> &Arc<CredentialHolder> {
        &self.inner.credentials
    }

    /// Store a token obtained elsewhere. An undecodable token is kept but
    /// treated as expired.
    pub fn set_token(&self, token: impl Into<String>) {
        self.inner.store(token.into());
    }

    /// Drop the current token, e.g. after the backend answered 401.
    pub fn invalidate(&self) {
        self.inner.replace(SessionState::default());
        debug!("Session invalidated");
    }

    /// Consistent copy of the token and its expiration.
    pub fn snapshot(&self) -> SessionState {
        self.inner.read_state().clone()
    }

    pub fn status(&self) -> TokenStatus {
        self.inner.read_state().status_at(self.inner.clock.now())
    }

    pub fn claims(&self) -> Option<TokenClaims> {
        let state = self.inner.read_state();
        token::decode(&state.token).ok()
    }

    pub fn is_refreshing(&self) -> bool {
        self.inner.slot().pending.is_some()
    }

    /// A valid token, or an empty string if none could be obtained.
    pub async fn get_valid_token(&self) -> String {
        self.try_get_valid_token().await.unwrap_or_default()
    }

    /// A valid token, refreshing first if needed. Concurrent callers share
    /// a single refresh and all observe its outcome.
    ///
    /// The refresh runs as its own task: it completes even if every caller
    /// stops waiting. Must be called from within a Tokio runtime.
    pub async fn try_get_valid_token(&self) -> Result<String, SessionError> {
        match self.inner.ticket() {
            Ticket::Ready(token) => Ok(token),
            Ticket::Pending(pending) => pending.await,
        }
    }

    /// Log in with new credentials, replacing the current session.
    ///
    /// Always starts a fresh refresh with the new credentials. A refresh
    /// still running for the previous credentials is superseded and will
    /// not overwrite the session when it finishes.
    pub async fn login(
        &self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Result<String, SessionError> {
        let pending = {
            let mut slot = self.inner.slot();
            self.inner.credentials.configure(username, password);
            self.inner.replace(SessionState::default());
            self.inner.start_refresh(&mut slot)
        };
        pending.await
    }
}

impl Inner {
    fn read_state(&self) -> RwLockReadGuard<'_, SessionState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn replace(&self, state: SessionState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn store(&self, token: String) {
        let state = SessionState::from_token(token);
        if let Some(expires_at) = state.expires_at {
            debug!(%expires_at, "Session token stored");
        }
        self.replace(state);
    }

    fn slot(&self) -> MutexGuard<'_, InFlight> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn valid_token(&self) -> Option<String> {
        let state = self.read_state();
        (state.status_at(self.clock.now()) == TokenStatus::Valid).then(|| state.token.clone())
    }

    fn ticket(self: &Arc<Self>) -> Ticket {
        if let Some(token) = self.valid_token() {
            return Ticket::Ready(token);
        }

        let mut slot = self.slot();
        if let Some(pending) = slot.pending.as_ref() {
            return Ticket::Pending(pending.clone());
        }
        // A refresh may have completed between the check above and taking
        // the slot; it writes the state before clearing the slot.
        if let Some(token) = self.valid_token() {
            return Ticket::Ready(token);
        }

        Ticket::Pending(self.start_refresh(&mut slot))
    }

    /// Spawn a refresh and make it the one callers join. Caller holds the slot.
    fn start_refresh(self: &Arc<Self>, slot: &mut InFlight) -> PendingRefresh {
        slot.generation += 1;
        let handle = tokio::spawn(Arc::clone(self).refresh(slot.generation));
        let pending = handle
            .map(|joined| {
                joined.unwrap_or_else(|e| Err(SessionError::RefreshAborted(e.to_string())))
            })
            .boxed()
            .shared();
        slot.pending = Some(pending.clone());
        pending
    }

    async fn refresh(self: Arc<Self>, generation: u64) -> RefreshOutcome {
        let outcome = AssertUnwindSafe(self.exchange_credentials())
            .catch_unwind()
            .await
            .unwrap_or_else(|_| {
                warn!("Session token refresh panicked");
                Err(SessionError::RefreshAborted("auth client panicked".to_string()))
            });

        let mut slot = self.slot();
        if slot.generation != generation {
            debug!(generation, "Superseded refresh finished, session left untouched");
            return outcome;
        }
        if let Ok(token) = &outcome {
            self.store(token.clone());
        }
        slot.pending = None;
        outcome
    }

    async fn exchange_credentials(&self) -> RefreshOutcome {
        let credentials = self.credentials.current_credentials();
        if credentials.is_empty() {
            warn!("Token refresh requested but no credentials are configured");
            return Err(SessionError::NoCredentials);
        }

        debug!(username = %credentials.username, "Refreshing session token");
        match self
            .auth
            .login(&credentials.username, credentials.password.expose_secret())
            .await
        {
            Ok(token) => {
                info!(username = %credentials.username, "Session token refreshed");
                Ok(token)
            }
            Err(e) => {
                warn!(username = %credentials.username, error = %e, "Session token refresh failed");
                Err(e.into())
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration as StdDuration;

    use chrono::{Duration, TimeZone};
    use futures::future::join_all;

    use super::*;
    use crate::auth::clock::testing::ManualClock;
    use crate::auth::token::testing::{token_expiring_at, token_with_payload};

    struct FakeAuthClient {
        calls: AtomicUsize,
        result: Mutex<Result<String, AuthError>>,
        delay: StdDuration,
    }

    impl FakeAuthClient {
        fn returning(result: Result<String, AuthError>) -> Arc<Self> {
            Self::slow(result, StdDuration::ZERO)
        }

        fn slow(result: Result<String, AuthError>, delay: StdDuration) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                result: Mutex::new(result),
                delay,
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn set_result(&self, result: Result<String, AuthError>) {
            *self.result.lock().unwrap() = result;
        }
    }

    #[async_trait::async_trait]
    impl AuthClient for FakeAuthClient {
        async fn login(&self, _username: &str, _password: &str) -> Result<String, AuthError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.result.lock().unwrap().clone()
        }
    }

    /// Issues a token naming the user it was issued for. Logins for
    /// `slow_user` take longer than the others.
    struct EchoAuthClient {
        slow_user: &'static str,
    }

    #[async_trait::async_trait]
    impl AuthClient for EchoAuthClient {
        async fn login(&self, username: &str, _password: &str) -> Result<String, AuthError> {
            let delay = if username == self.slow_user { 100 } else { 10 };
            tokio::time::sleep(StdDuration::from_millis(delay)).await;
            let exp = (start() + Duration::hours(1)).timestamp();
            Ok(token_with_payload(&format!(
                r#"{{"exp":{},"username":"{}"}}"#,
                exp, username
            )))
        }
    }

    struct PanickingAuthClient;

    #[async_trait::async_trait]
    impl AuthClient for PanickingAuthClient {
        async fn login(&self, _username: &str, _password: &str) -> Result<String, AuthError> {
            panic!("auth backend bug");
        }
    }

    fn configured_manager(auth: Arc<dyn AuthClient>) -> SessionTokenManager {
        let credentials = Arc::new(CredentialHolder::new());
        credentials.configure("john.doe@x.com", "password");
        SessionTokenManager::with_clock(auth, credentials, Arc::new(ManualClock::at(start())))
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 22, 9, 0, 0).unwrap()
    }

    fn manager_with(
        auth: Arc<FakeAuthClient>,
        configured: bool,
    ) -> (SessionTokenManager, Arc<ManualClock>) {
        let credentials = Arc::new(CredentialHolder::new());
        if configured {
            credentials.configure("john.doe@x.com", "password");
        }
        let clock = Arc::new(ManualClock::at(start()));
        let manager = SessionTokenManager::with_clock(auth, credentials, clock.clone());
        (manager, clock)
    }

    fn token_valid_for(hours: i64) -> String {
        token_expiring_at((start() + Duration::hours(hours)).timestamp())
    }

    // -------------------------------------------------------------------------
    // State
    // -------------------------------------------------------------------------

    #[test]
    fn test_new_manager_is_empty() {
        let (manager, _) = manager_with(FakeAuthClient::returning(Ok("t".into())), true);
        assert_eq!(manager.status(), TokenStatus::Empty);
        assert_eq!(manager.snapshot(), SessionState::default());
        assert!(!manager.is_refreshing());
    }

    #[test]
    fn test_set_token_records_expiration() {
        let (manager, _) = manager_with(FakeAuthClient::returning(Ok("t".into())), true);
        let token = token_valid_for(1);
        manager.set_token(token.clone());

        let state = manager.snapshot();
        assert_eq!(state.token, token);
        assert_eq!(state.expires_at, Some(start() + Duration::hours(1)));
        assert_eq!(manager.status(), TokenStatus::Valid);
        assert!(manager.claims().is_some());
    }

    #[test]
    fn test_malformed_token_is_expired() {
        let (manager, _) = manager_with(FakeAuthClient::returning(Ok("t".into())), true);
        manager.set_token("not-a-valid-token");

        let state = manager.snapshot();
        assert_eq!(state.token, "not-a-valid-token");
        assert_eq!(state.expires_at, None);
        assert_eq!(manager.status(), TokenStatus::Expired);
        assert!(manager.claims().is_none());
    }

    #[test]
    fn test_expiry_boundary() {
        let (manager, clock) = manager_with(FakeAuthClient::returning(Ok("t".into())), true);
        manager.set_token(token_valid_for(1));

        clock.set(start() + Duration::hours(1) - Duration::seconds(1));
        assert_eq!(manager.status(), TokenStatus::Valid);

        clock.set(start() + Duration::hours(1));
        assert_eq!(manager.status(), TokenStatus::Expired);
    }

    #[test]
    fn test_invalidate_returns_to_empty() {
        let (manager, _) = manager_with(FakeAuthClient::returning(Ok("t".into())), true);
        manager.set_token(token_valid_for(1));
        manager.invalidate();
        assert_eq!(manager.status(), TokenStatus::Empty);
        assert_eq!(manager.snapshot().expires_at, None);
    }

    #[test]
    fn test_session_state_debug_redacts_token() {
        let state = SessionState::from_token(token_valid_for(1));
        let debug_output = format!("{:?}", state);
        assert!(!debug_output.contains(&state.token));
        assert!(debug_output.contains("<redacted>"));
    }

    #[test]
    fn test_concurrent_readers_never_see_mismatched_state() {
        let (manager, _) = manager_with(FakeAuthClient::returning(Ok("t".into())), true);
        let tokens: Vec<String> = (1..=4).map(token_valid_for).collect();
        manager.set_token(tokens[0].clone());

        std::thread::scope(|scope| {
            scope.spawn(|| {
                for i in 0..2_000 {
                    manager.set_token(tokens[i % tokens.len()].clone());
                }
            });
            for _ in 0..4 {
                scope.spawn(|| {
                    for _ in 0..2_000 {
                        let state = manager.snapshot();
                        let claims = token::decode(&state.token).unwrap();
                        assert_eq!(state.expires_at, Some(claims.expires_at));
                    }
                });
            }
        });
    }

    // -------------------------------------------------------------------------
    // Token retrieval
    // -------------------------------------------------------------------------

    #[tokio::test]
    async fn test_fast_path_skips_auth_client() {
        let auth = FakeAuthClient::returning(Ok("unused".into()));
        let (manager, _) = manager_with(auth.clone(), true);
        let token = token_valid_for(1);
        manager.set_token(token.clone());

        for _ in 0..5 {
            assert_eq!(manager.get_valid_token().await, token);
        }
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn test_empty_session_logs_in() {
        let auth = FakeAuthClient::returning(Ok("mockedToken".into()));
        let (manager, _) = manager_with(auth.clone(), true);

        assert_eq!(manager.get_valid_token().await, "mockedToken");
        assert_eq!(auth.calls(), 1);
        // Opaque token: stored, but its expiry is unknown
        assert_eq!(manager.snapshot().token, "mockedToken");
        assert_eq!(manager.status(), TokenStatus::Expired);
        assert!(!manager.is_refreshing());
    }

    #[tokio::test]
    async fn test_rejected_credentials_return_empty() {
        let auth = FakeAuthClient::returning(Err(AuthError::InvalidCredentials));
        let (manager, _) = manager_with(auth.clone(), true);

        assert_eq!(manager.get_valid_token().await, "");
        assert_eq!(manager.status(), TokenStatus::Empty);
        assert_eq!(
            manager.try_get_valid_token().await,
            Err(SessionError::Auth(AuthError::InvalidCredentials))
        );
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_expired_state() {
        let auth = FakeAuthClient::returning(Err(AuthError::ServerUnreachable("down".into())));
        let (manager, clock) = manager_with(auth.clone(), true);
        let stale = token_valid_for(1);
        manager.set_token(stale.clone());
        clock.advance(Duration::hours(2));

        assert_eq!(manager.get_valid_token().await, "");
        assert_eq!(manager.status(), TokenStatus::Expired);
        assert_eq!(manager.snapshot().token, stale);
    }

    #[tokio::test]
    async fn test_expired_token_is_refreshed() {
        let fresh = token_valid_for(3);
        let auth = FakeAuthClient::returning(Ok(fresh.clone()));
        let (manager, clock) = manager_with(auth.clone(), true);
        manager.set_token(token_valid_for(1));
        clock.advance(Duration::hours(2));

        assert_eq!(manager.get_valid_token().await, fresh);
        assert_eq!(manager.status(), TokenStatus::Valid);

        // Fresh token now served from the fast path
        assert_eq!(manager.get_valid_token().await, fresh);
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn test_token_at_expiry_instant_is_refreshed() {
        let fresh = token_valid_for(2);
        let auth = FakeAuthClient::returning(Ok(fresh.clone()));
        let (manager, clock) = manager_with(auth.clone(), true);
        manager.set_token(token_valid_for(1));
        clock.set(start() + Duration::hours(1));

        assert_eq!(manager.get_valid_token().await, fresh);
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn test_malformed_token_triggers_refresh() {
        let fresh = token_valid_for(1);
        let auth = FakeAuthClient::returning(Ok(fresh.clone()));
        let (manager, _) = manager_with(auth.clone(), true);
        manager.set_token("not-a-valid-token");

        assert_eq!(manager.get_valid_token().await, fresh);
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials_skip_auth_client() {
        let auth = FakeAuthClient::returning(Ok("unused".into()));
        let (manager, _) = manager_with(auth.clone(), false);

        assert_eq!(manager.get_valid_token().await, "");
        assert_eq!(
            manager.try_get_valid_token().await,
            Err(SessionError::NoCredentials)
        );
        assert_eq!(auth.calls(), 0);
    }

    #[tokio::test]
    async fn test_refresh_retried_after_failure() {
        let auth = FakeAuthClient::returning(Err(AuthError::Other(503)));
        let (manager, _) = manager_with(auth.clone(), true);
        assert_eq!(manager.get_valid_token().await, "");

        let fresh = token_valid_for(1);
        auth.set_result(Ok(fresh.clone()));
        assert_eq!(manager.get_valid_token().await, fresh);
        assert_eq!(auth.calls(), 2);
    }

    #[tokio::test]
    async fn test_login_replaces_valid_session() {
        let fresh = token_valid_for(2);
        let auth = FakeAuthClient::returning(Ok(fresh.clone()));
        let (manager, _) = manager_with(auth.clone(), false);
        manager.set_token(token_valid_for(1));

        let token = manager.login("jane.doe@x.com", "password").await.unwrap();
        assert_eq!(token, fresh);
        assert_eq!(manager.snapshot().token, fresh);
        assert_eq!(manager.credentials().current_credentials().username, "jane.doe@x.com");
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn test_failed_login_leaves_session_empty() {
        let auth = FakeAuthClient::returning(Err(AuthError::InvalidCredentials));
        let (manager, _) = manager_with(auth.clone(), false);
        manager.set_token(token_valid_for(1));

        let result = manager.login("john.doe@x.com", "bad_password").await;
        assert_eq!(result, Err(SessionError::Auth(AuthError::InvalidCredentials)));
        assert_eq!(manager.status(), TokenStatus::Empty);
    }

    // -------------------------------------------------------------------------
    // Single-flight
    // -------------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_refresh() {
        let fresh = token_valid_for(1);
        let auth = FakeAuthClient::slow(Ok(fresh.clone()), StdDuration::from_millis(50));
        let (manager, _) = manager_with(auth.clone(), true);

        let results = join_all((0..8).map(|_| manager.get_valid_token())).await;

        assert_eq!(auth.calls(), 1);
        assert!(results.iter().all(|token| *token == fresh));
        assert!(!manager.is_refreshing());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_callers_share_one_failure() {
        let auth = FakeAuthClient::slow(
            Err(AuthError::InvalidCredentials),
            StdDuration::from_millis(50),
        );
        let (manager, _) = manager_with(auth.clone(), true);
        manager.set_token("not-a-valid-token");

        let results = join_all((0..8).map(|_| manager.try_get_valid_token())).await;

        assert_eq!(auth.calls(), 1);
        assert!(results
            .iter()
            .all(|r| *r == Err(SessionError::Auth(AuthError::InvalidCredentials))));
        assert_eq!(manager.status(), TokenStatus::Expired);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_in_progress_is_visible() {
        let auth = FakeAuthClient::slow(Ok(token_valid_for(1)), StdDuration::from_millis(50));
        let (manager, _) = manager_with(auth.clone(), true);
        let manager = Arc::new(manager);

        let first = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.get_valid_token().await }
        });
        tokio::task::yield_now().await;
        assert!(manager.is_refreshing());

        let second = manager.get_valid_token().await;
        assert_eq!(first.await.unwrap(), second);
        assert_eq!(auth.calls(), 1);
        assert!(!manager.is_refreshing());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_spawned_callers_after_refresh_use_fast_path() {
        let fresh = token_valid_for(1);
        let auth = FakeAuthClient::slow(Ok(fresh.clone()), StdDuration::from_millis(200));
        let (manager, _) = manager_with(auth.clone(), true);
        let manager = Arc::new(manager);

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.get_valid_token().await })
            })
            .collect();

        for handle in handles {
            assert_eq!(handle.await.unwrap(), fresh);
        }
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_abandoned_refresh_still_completes() {
        let fresh = token_valid_for(1);
        let auth = FakeAuthClient::slow(Ok(fresh.clone()), StdDuration::from_millis(100));
        let (manager, _) = manager_with(auth.clone(), true);

        let waited =
            tokio::time::timeout(StdDuration::from_millis(10), manager.get_valid_token()).await;
        assert!(waited.is_err());
        assert!(manager.is_refreshing());

        // Nobody polls the manager while the refresh finishes
        tokio::time::sleep(StdDuration::from_millis(200)).await;
        assert!(!manager.is_refreshing());
        assert_eq!(manager.status(), TokenStatus::Valid);

        assert_eq!(manager.get_valid_token().await, fresh);
        assert_eq!(auth.calls(), 1);
    }

    #[tokio::test]
    async fn test_panicking_refresh_clears_slot() {
        let manager = configured_manager(Arc::new(PanickingAuthClient));

        let result = manager.try_get_valid_token().await;
        assert!(matches!(result, Err(SessionError::RefreshAborted(_))));
        assert!(!manager.is_refreshing());
        assert_eq!(manager.status(), TokenStatus::Empty);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_supersedes_refresh_with_old_credentials() {
        let manager = Arc::new(configured_manager(Arc::new(EchoAuthClient {
            slow_user: "john.doe@x.com",
        })));

        let stale = tokio::spawn({
            let manager = Arc::clone(&manager);
            async move { manager.try_get_valid_token().await }
        });
        tokio::task::yield_now().await;
        assert!(manager.is_refreshing());

        let token = manager.login("jane.doe@x.com", "password").await.unwrap();
        let claims = token::decode(&token).unwrap();
        assert_eq!(claims.username.as_deref(), Some("jane.doe@x.com"));
        assert!(!manager.is_refreshing());

        // The old refresh finishes last and must not overwrite the new session
        let stale_token = stale.await.unwrap().unwrap();
        assert_eq!(
            token::decode(&stale_token).unwrap().username.as_deref(),
            Some("john.doe@x.com")
        );
        assert_eq!(manager.snapshot().token, token);
        assert_eq!(
            manager.claims().and_then(|c| c.username).as_deref(),
            Some("jane.doe@x.com")
        );
    }
}
