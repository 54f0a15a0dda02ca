use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures::future::{BoxFuture, FutureExt, Shared};
use tokio::sync::Mutex;

use crate::error::AuthError;
use crate::metrics::TokenMetrics;

use super::{IdentityProvider, Session, TokenSet};

type RefreshFlight = Shared<BoxFuture<'static, Result<String, AuthError>>>;

/// Owns the authenticated session and hands out bearer tokens.
///
/// Cloning is cheap; every clone shares the same session. Construct one per
/// application and pass it to the REST client and the realtime manager.
#[derive(Clone)]
pub struct SessionTokenProvider {
    inner: Arc<ProviderInner>,
}

struct ProviderInner {
    identity: Arc<dyn IdentityProvider>,
    session: RwLock<Option<Session>>,
    /// Bumped whenever the session is replaced or invalidated
    epoch: AtomicU64,
    in_flight: Mutex<Option<(u64, RefreshFlight)>>,
    next_flight_id: AtomicU64,
}

impl SessionTokenProvider {
    pub fn new(identity: Arc<dyn IdentityProvider>) -> Self {
        Self {
            inner: Arc::new(ProviderInner {
                identity,
                session: RwLock::new(None),
                epoch: AtomicU64::new(0),
                in_flight: Mutex::new(None),
                next_flight_id: AtomicU64::new(0),
            }),
        }
    }

    /// Current bearer token, without refreshing
    pub fn get_token(&self) -> Result<String, AuthError> {
        self.inner
            .read_session()
            .as_ref()
            .map(|session| session.access_token().to_string())
            .ok_or(AuthError::NotAuthenticated)
    }

    /// Snapshot of the current session
    pub fn session(&self) -> Option<Session> {
        self.inner.read_session().clone()
    }

    /// Subject of the current session
    pub fn subject(&self) -> Option<String> {
        self.inner
            .read_session()
            .as_ref()
            .and_then(|session| session.subject().map(str::to_string))
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.read_session().is_some()
    }

    /// Return a token valid for at least `min_validity_secs`, refreshing if needed.
    ///
    /// Concurrent callers share a single in-flight exchange with the identity
    /// provider and all receive its result.
    pub async fn refresh(&self, min_validity_secs: u64) -> Result<String, AuthError> {
        let flight = {
            let mut in_flight = self.inner.in_flight.lock().await;
            match in_flight.as_ref() {
                Some((_, flight)) => flight.clone(),
                None => {
                    let (refresh_token, epoch) = {
                        let guard = self.inner.read_session();
                        let session = guard.as_ref().ok_or(AuthError::NotAuthenticated)?;

                        if !session.expires_within(min_validity_secs) {
                            return Ok(session.access_token().to_string());
                        }

                        let refresh_token = match session.refresh_token() {
                            Some(token) if session.can_refresh() => token.to_string(),
                            Some(_) => {
                                return Err(AuthError::Refresh("Refresh token expired".to_string()))
                            }
                            None => {
                                return Err(AuthError::Refresh(
                                    "No refresh token available".to_string(),
                                ))
                            }
                        };
                        (refresh_token, self.inner.epoch.load(Ordering::Acquire))
                    };

                    let flight_id = self.inner.next_flight_id.fetch_add(1, Ordering::Relaxed);
                    tracing::debug!(
                        flight_id = flight_id,
                        min_validity_secs = min_validity_secs,
                        "Token expires soon, refreshing"
                    );

                    let flight = exchange(self.inner.clone(), refresh_token, epoch, flight_id)
                        .boxed()
                        .shared();
                    *in_flight = Some((flight_id, flight.clone()));
                    flight
                }
            }
        };

        flight.await
    }

    /// Resource-owner password login; replaces any existing session
    pub async fn login(&self, username: &str, password: &str) -> Result<(), AuthError> {
        let tokens = self.inner.identity.password_grant(username, password).await?;
        self.set_session(tokens)?;
        tracing::info!(username = %username, "Logged in");
        Ok(())
    }

    /// Start a session from a stored refresh token
    pub async fn restore(&self, refresh_token: &str) -> Result<(), AuthError> {
        let tokens = self.inner.identity.refresh(refresh_token).await?;
        self.set_session(tokens)?;
        tracing::info!(subject = ?self.subject(), "Session restored");
        Ok(())
    }

    /// Install tokens obtained elsewhere
    pub fn set_session(&self, tokens: TokenSet) -> Result<(), AuthError> {
        let session = Session::from_token_set(tokens)?;
        let mut guard = self.inner.write_session();
        self.inner.epoch.fetch_add(1, Ordering::AcqRel);
        *guard = Some(session);
        Ok(())
    }

    /// Invalidate the session locally and end it at the identity provider
    pub async fn logout(&self) {
        let previous = {
            let mut guard = self.inner.write_session();
            self.inner.epoch.fetch_add(1, Ordering::AcqRel);
            guard.take()
        };
        self.inner.in_flight.lock().await.take();

        let Some(refresh_token) = previous.as_ref().and_then(|s| s.refresh_token()) else {
            return;
        };

        if let Err(e) = self.inner.identity.logout(refresh_token).await {
            tracing::warn!(error = %e, "Identity provider logout failed");
        } else {
            tracing::info!("Logged out");
        }
    }
}

impl ProviderInner {
    fn read_session(&self) -> RwLockReadGuard<'_, Option<Session>> {
        self.session.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write_session(&self) -> RwLockWriteGuard<'_, Option<Session>> {
        self.session.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Run one refresh exchange and store its result if the session was not
/// replaced in the meantime.
async fn exchange(
    inner: Arc<ProviderInner>,
    refresh_token: String,
    epoch: u64,
    flight_id: u64,
) -> Result<String, AuthError> {
    let result = match inner.identity.refresh(&refresh_token).await {
        Ok(tokens) => Session::from_token_set(tokens).and_then(|session| {
            let mut guard = inner.write_session();
            if inner.epoch.load(Ordering::Acquire) != epoch || guard.is_none() {
                return Err(AuthError::NotAuthenticated);
            }
            let token = session.access_token().to_string();
            *guard = Some(session);
            Ok(token)
        }),
        Err(e) => Err(e),
    };

    match &result {
        Ok(_) => {
            TokenMetrics::record_refreshed();
            tracing::debug!(flight_id = flight_id, "Token refreshed");
        }
        Err(e) => {
            TokenMetrics::record_failed();
            tracing::warn!(flight_id = flight_id, error = %e, "Token refresh failed");
        }
    }

    let mut in_flight = inner.in_flight.lock().await;
    if matches!(in_flight.as_ref(), Some((id, _)) if *id == flight_id) {
        *in_flight = None;
    }

    result
}
