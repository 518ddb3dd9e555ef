//! Resilient session guard
//!
//! Wraps the remote auth client (composition, not method patching) with
//! a short-lived session cache, a single-flight refresh lock, a
//! minimum-refresh-interval throttle, and filtering of spurious
//! sign-out notifications caused by rate limiting.
//!
//! The guard is the exclusive owner of the in-memory session snapshot;
//! nothing is persisted, so a stale session is always re-validated
//! against the network after a process restart. Every network call is
//! time-boxed, and every failure path lands on a safe fallback (the
//! current cached session) - never an unhandled error, never a forced
//! sign-out from a transient throttle.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::{mpsc, Mutex};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backend::AuthBackend;
use crate::error::CoreError;
use crate::models::{AuthEvent, DataResult, Session};

/// Tunable intervals, injectable for tests
#[derive(Debug, Clone)]
pub struct SessionGuardConfig {
    /// How long a cached snapshot satisfies `get_session` without a
    /// network call; also the grace past expiry before a returned
    /// session is considered unusable
    pub ttl: Duration,
    /// Minimum spacing between refresh attempts
    pub min_refresh_interval: Duration,
    /// How long concurrent callers wait for an in-flight refresh
    pub refresh_wait: Duration,
    /// Time box on the session fetch/refresh network calls
    pub network_timeout: Duration,
    /// At most one TOKEN_REFRESHED notification per window
    pub token_event_debounce: Duration,
    /// Pause before re-querying after a suspicious SIGNED_OUT
    pub signed_out_recheck_delay: Duration,
}

impl Default for SessionGuardConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(5 * 60),
            min_refresh_interval: Duration::from_secs(15 * 60),
            refresh_wait: Duration::from_secs(5),
            network_timeout: Duration::from_secs(5),
            token_event_debounce: Duration::from_secs(60),
            signed_out_recheck_delay: Duration::from_millis(500),
        }
    }
}

/// The one in-memory session snapshot per process
struct SessionSnapshot {
    session: Session,
    captured_at: Instant,
}

#[derive(Default)]
struct GuardState {
    snapshot: Option<SessionSnapshot>,
    last_refresh_attempt: Option<Instant>,
    last_token_event: Option<Instant>,
}

/// Resilient wrapper over the remote auth client
pub struct SessionGuard {
    auth: Arc<dyn AuthBackend>,
    config: SessionGuardConfig,
    state: StdMutex<GuardState>,
    /// Held for the duration of a refresh network call; concurrent
    /// callers queue on it instead of issuing their own call
    refresh_lock: Mutex<()>,
    event_tx: mpsc::UnboundedSender<AuthEvent>,
    event_rx: StdMutex<Option<mpsc::UnboundedReceiver<AuthEvent>>>,
}

impl SessionGuard {
    pub fn new(auth: Arc<dyn AuthBackend>, config: SessionGuardConfig) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            auth,
            config,
            state: StdMutex::new(GuardState::default()),
            refresh_lock: Mutex::new(()),
            event_tx,
            event_rx: StdMutex::new(Some(event_rx)),
        }
    }

    /// Take the filtered auth event receiver (can only be called once)
    pub fn take_events(&self) -> Option<mpsc::UnboundedReceiver<AuthEvent>> {
        self.event_rx.lock().ok()?.take()
    }

    /// The cached session, fresh or not, without any network traffic
    pub fn current_session(&self) -> Option<Session> {
        self.state
            .lock()
            .ok()?
            .snapshot
            .as_ref()
            .map(|s| s.session.clone())
    }

    /// Get the current session, served from cache while fresh
    pub async fn get_session(&self) -> DataResult<Session> {
        if let Some(session) = self.fresh_snapshot() {
            return DataResult::ok(session);
        }

        match timeout(self.config.network_timeout, self.auth.get_session()).await {
            Ok(Ok(Some(session))) => {
                // Sessions expired by more than the TTL are unusable;
                // anything newer is cached even if close to expiry.
                let expired_for = -session.expires_in(Utc::now());
                if expired_for > self.config.ttl.as_secs() as i64 {
                    debug!(expired_for, "session too stale to cache");
                    self.invalidate();
                    return DataResult {
                        data: None,
                        error: None,
                    };
                }
                self.cache(session.clone());
                DataResult::ok(session)
            }
            Ok(Ok(None)) => {
                self.invalidate();
                DataResult {
                    data: None,
                    error: None,
                }
            }
            Ok(Err(e)) => {
                self.invalidate();
                DataResult::failed(e)
            }
            Err(_) => {
                // Timed out: fall back to whatever we have rather than
                // surfacing a failure that could read as a sign-out
                warn!("session fetch timed out");
                match self.current_session() {
                    Some(session) => DataResult::ok(session),
                    None => DataResult::failed(CoreError::Session(
                        "session fetch timed out with no cached session".into(),
                    )),
                }
            }
        }
    }

    /// Refresh the session, with throttling and single-flight
    ///
    /// At most one refresh network call is in flight process-wide.
    /// Concurrent callers wait briefly for it and then fall back to the
    /// current session; so does any caller inside the minimum refresh
    /// interval. Rate-limit failures are swallowed entirely.
    pub async fn refresh_session(&self) -> DataResult<Session> {
        if self.inside_refresh_window() {
            debug!("refresh inside minimum interval, returning current session");
            return self.current_or_empty();
        }

        let _guard = match timeout(self.config.refresh_wait, self.refresh_lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                // The in-flight refresh did not finish in time
                warn!("refresh lock wait timed out, returning current session");
                return self.current_or_empty();
            }
        };

        // Another caller may have refreshed while we queued
        if self.inside_refresh_window() {
            return self.current_or_empty();
        }

        let Some(refresh_token) = self.current_session().map(|s| s.refresh_token) else {
            debug!("no session to refresh");
            return DataResult {
                data: None,
                error: None,
            };
        };

        self.mark_refresh_attempt();

        match timeout(
            self.config.network_timeout,
            self.auth.refresh_session(&refresh_token),
        )
        .await
        {
            Ok(Ok(Some(session))) => {
                info!("session refreshed");
                self.cache(session.clone());
                DataResult::ok(session)
            }
            Ok(Ok(None)) => {
                self.invalidate();
                DataResult {
                    data: None,
                    error: None,
                }
            }
            Ok(Err(e)) if e.is_connectivity() => {
                // Rate limiting (or a dead network) must never read as
                // "the user is logged out"
                warn!(error = %e, "refresh swallowed transient failure");
                self.current_or_empty()
            }
            Ok(Err(e)) => {
                self.invalidate();
                DataResult::failed(e)
            }
            Err(_) => {
                warn!("refresh timed out, returning current session");
                self.current_or_empty()
            }
        }
    }

    /// Feed a raw auth client notification through the filter
    pub async fn handle_auth_event(&self, event: AuthEvent) {
        match event {
            AuthEvent::TokenRefreshed => self.handle_token_refreshed(),
            AuthEvent::SignedOut { session: Some(_) } => {
                // An explicit sign-out with a session attached is real
                self.invalidate();
                self.forward(event);
            }
            AuthEvent::SignedOut { session: None } => {
                self.handle_suspicious_sign_out().await;
            }
        }
    }

    fn handle_token_refreshed(&self) {
        let forward = {
            let Ok(mut state) = self.state.lock() else {
                return;
            };
            let due = state
                .last_token_event
                .map(|at| at.elapsed() >= self.config.token_event_debounce)
                .unwrap_or(true);
            if due {
                state.last_token_event = Some(Instant::now());
                // Invalidation rides along with the forwarded event;
                // debounced duplicates keep the cache too
                state.snapshot = None;
            }
            due
        };

        if forward {
            self.forward(AuthEvent::TokenRefreshed);
        } else {
            debug!("TOKEN_REFRESHED debounced");
        }
    }

    /// A SIGNED_OUT with no session is how a rate-limited auth client
    /// cries wolf. Re-query after a short pause; only a confirmed
    /// absence is forwarded to listeners.
    async fn handle_suspicious_sign_out(&self) {
        tokio::time::sleep(self.config.signed_out_recheck_delay).await;

        match timeout(self.config.network_timeout, self.auth.get_session()).await {
            Ok(Ok(Some(session))) => {
                info!("sign-out suppressed, session still valid");
                self.cache(session);
            }
            Ok(Ok(None)) => {
                self.invalidate();
                self.forward(AuthEvent::SignedOut { session: None });
            }
            Ok(Err(e)) if e.is_connectivity() => {
                // Can't verify; keep the user signed in locally
                warn!(error = %e, "sign-out recheck throttled, suppressing event");
            }
            Ok(Err(e)) => {
                warn!(error = %e, "sign-out recheck failed");
                self.invalidate();
                self.forward(AuthEvent::SignedOut { session: None });
            }
            Err(_) => {
                warn!("sign-out recheck timed out, suppressing event");
            }
        }
    }

    // ==================== Internals ====================

    fn fresh_snapshot(&self) -> Option<Session> {
        let state = self.state.lock().ok()?;
        let snapshot = state.snapshot.as_ref()?;
        if snapshot.captured_at.elapsed() < self.config.ttl {
            Some(snapshot.session.clone())
        } else {
            None
        }
    }

    fn cache(&self, session: Session) {
        if let Ok(mut state) = self.state.lock() {
            state.snapshot = Some(SessionSnapshot {
                session,
                captured_at: Instant::now(),
            });
        }
    }

    fn invalidate(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.snapshot = None;
        }
    }

    fn inside_refresh_window(&self) -> bool {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.last_refresh_attempt)
            .map(|at| at.elapsed() < self.config.min_refresh_interval)
            .unwrap_or(false)
    }

    fn mark_refresh_attempt(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.last_refresh_attempt = Some(Instant::now());
        }
    }

    fn current_or_empty(&self) -> DataResult<Session> {
        DataResult {
            data: self.current_session(),
            error: None,
        }
    }

    fn forward(&self, event: AuthEvent) {
        let _ = self.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::{fresh_session, MockAuth, ScriptedFailure};
    use std::sync::atomic::Ordering;

    fn test_config() -> SessionGuardConfig {
        SessionGuardConfig {
            ttl: Duration::from_secs(300),
            min_refresh_interval: Duration::ZERO,
            refresh_wait: Duration::from_secs(1),
            network_timeout: Duration::from_secs(1),
            token_event_debounce: Duration::from_secs(1),
            signed_out_recheck_delay: Duration::from_millis(10),
        }
    }

    fn guard_with(auth: Arc<MockAuth>, config: SessionGuardConfig) -> Arc<SessionGuard> {
        Arc::new(SessionGuard::new(auth, config))
    }

    #[tokio::test]
    async fn test_get_session_serves_cache_while_fresh() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        let guard = guard_with(auth.clone(), test_config());

        let first = guard.get_session().await;
        assert_eq!(first.data.unwrap().access_token, "t1");

        let second = guard.get_session().await;
        assert_eq!(second.data.unwrap().access_token, "t1");

        // Only the first call hit the network
        assert_eq!(auth.get_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_get_session_refetches_after_ttl() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        let config = SessionGuardConfig {
            ttl: Duration::from_millis(20),
            ..test_config()
        };
        let guard = guard_with(auth.clone(), config);

        guard.get_session().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        guard.get_session().await;

        assert_eq!(auth.get_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_get_session_failure_invalidates_and_errors() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        let guard = guard_with(auth.clone(), test_config());

        guard.get_session().await;
        auth.set_failure(Some(ScriptedFailure::Rejected));

        // Force the snapshot stale so the network is consulted
        guard.invalidate();
        let result = guard.get_session().await;
        assert!(result.data.is_none());
        assert!(result.error.is_some());
        assert!(guard.current_session().is_none());
    }

    #[tokio::test]
    async fn test_long_expired_session_is_not_cached() {
        let mut session = fresh_session("old");
        session.expires_at = Utc::now().timestamp() - 400; // past ttl grace
        let auth = Arc::new(MockAuth::with_session(session));
        let guard = guard_with(auth.clone(), test_config());

        let result = guard.get_session().await;
        assert!(result.data.is_none());
        assert!(result.error.is_none());
        assert!(guard.current_session().is_none());
    }

    #[tokio::test]
    async fn test_recently_expired_session_is_still_cached() {
        let mut session = fresh_session("edge");
        session.expires_at = Utc::now().timestamp() - 60; // inside ttl grace
        let auth = Arc::new(MockAuth::with_session(session));
        let guard = guard_with(auth.clone(), test_config());

        let result = guard.get_session().await;
        assert_eq!(result.data.unwrap().access_token, "edge");
        assert!(guard.current_session().is_some());
    }

    #[tokio::test]
    async fn test_refresh_mutex_allows_one_network_call() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        auth.set_refresh_delay(Duration::from_millis(50));
        // A wide interval so late lock acquirers take the re-check path
        let config = SessionGuardConfig {
            min_refresh_interval: Duration::from_secs(600),
            ..test_config()
        };
        let guard = guard_with(auth.clone(), config);
        guard.get_session().await;

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let g = guard.clone();
            tasks.push(tokio::spawn(async move { g.refresh_session().await }));
        }
        for task in tasks {
            let result = task.await.unwrap();
            // Every caller ends with a usable session, old or new
            assert!(result.data.is_some());
            assert!(result.error.is_none());
        }

        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_throttled_inside_minimum_interval() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        let config = SessionGuardConfig {
            min_refresh_interval: Duration::from_secs(600),
            ..test_config()
        };
        let guard = guard_with(auth.clone(), config);
        guard.get_session().await;

        guard.refresh_session().await;
        let second = guard.refresh_session().await;

        assert_eq!(auth.refresh_calls.load(Ordering::SeqCst), 1);
        // Short-circuit returns the refreshed cached session
        assert!(second.data.unwrap().access_token.contains("refreshed"));
    }

    #[tokio::test]
    async fn test_rate_limited_refresh_masks_the_error() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        let guard = guard_with(auth.clone(), test_config());
        guard.get_session().await;
        let before = guard.current_session().unwrap();

        auth.set_failure(Some(ScriptedFailure::RateLimited));
        let result = guard.refresh_session().await;

        // Pre-refresh session, no error, still cached
        assert!(result.error.is_none());
        assert_eq!(result.data.unwrap(), before);
        assert_eq!(guard.current_session().unwrap(), before);
    }

    #[tokio::test]
    async fn test_refresh_timeout_falls_back_to_current() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        auth.set_refresh_delay(Duration::from_millis(200));
        let config = SessionGuardConfig {
            network_timeout: Duration::from_millis(30),
            ..test_config()
        };
        let guard = guard_with(auth.clone(), config);
        guard.get_session().await;

        let result = guard.refresh_session().await;
        assert!(result.error.is_none());
        assert_eq!(result.data.unwrap().access_token, "t1");
    }

    #[tokio::test]
    async fn test_refresh_rejected_invalidates() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        let guard = guard_with(auth.clone(), test_config());
        guard.get_session().await;

        auth.set_failure(Some(ScriptedFailure::Rejected));
        let result = guard.refresh_session().await;
        assert!(result.error.is_some());
        assert!(guard.current_session().is_none());
    }

    #[tokio::test]
    async fn test_token_refreshed_debounce() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        let guard = guard_with(auth.clone(), test_config());
        let mut events = guard.take_events().unwrap();

        for _ in 0..10 {
            guard.handle_auth_event(AuthEvent::TokenRefreshed).await;
        }

        let mut forwarded = 0;
        while events.try_recv().is_ok() {
            forwarded += 1;
        }
        assert_eq!(forwarded, 1);
    }

    #[tokio::test]
    async fn test_debounced_duplicate_keeps_cache() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        let guard = guard_with(auth.clone(), test_config());

        // First event invalidates; re-prime the cache, then duplicate
        guard.handle_auth_event(AuthEvent::TokenRefreshed).await;
        guard.get_session().await;
        guard.handle_auth_event(AuthEvent::TokenRefreshed).await;

        assert!(guard.current_session().is_some());
    }

    #[tokio::test]
    async fn test_false_sign_out_is_suppressed() {
        let auth = Arc::new(MockAuth::with_session(fresh_session("t1")));
        let guard = guard_with(auth.clone(), test_config());
        let mut events = guard.take_events().unwrap();

        guard
            .handle_auth_event(AuthEvent::SignedOut { session: None })
            .await;

        // Session was still there: nothing forwarded, snapshot cached
        assert!(events.try_recv().is_err());
        assert_eq!(guard.current_session().unwrap().access_token, "t1");
    }

    #[tokio::test]
    async fn test_genuine_sign_out_is_forwarded() {
        let auth = Arc::new(MockAuth::new());
        let guard = guard_with(auth.clone(), test_config());
        let mut events = guard.take_events().unwrap();

        guard
            .handle_auth_event(AuthEvent::SignedOut { session: None })
            .await;

        assert_eq!(
            events.try_recv().unwrap(),
            AuthEvent::SignedOut { session: None }
        );
        assert!(guard.current_session().is_none());
    }

    #[tokio::test]
    async fn test_sign_out_recheck_throttled_is_suppressed() {
        let auth = Arc::new(MockAuth::new());
        auth.set_failure(Some(ScriptedFailure::RateLimited));
        let guard = guard_with(auth.clone(), test_config());
        let mut events = guard.take_events().unwrap();

        guard
            .handle_auth_event(AuthEvent::SignedOut { session: None })
            .await;

        // Could not verify against a throttling backend: keep quiet
        assert!(events.try_recv().is_err());
    }
}
