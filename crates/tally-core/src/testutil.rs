//! Scripted backend doubles shared by the unit tests
//!
//! `MockBackend` plays the remote data service: an in-memory table map,
//! a recorded call log for ordering assertions, and a scriptable
//! failure mode. `MockAuth` plays the auth service with call counters
//! and an optional artificial delay for concurrency tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::backend::{AuthBackend, Filter, RemoteBackend};
use crate::error::{CoreError, CoreResult};
use crate::models::{row_id, Row, Session, ID_KEY};

/// Failure a mock operation should produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptedFailure {
    Network,
    RateLimited,
    Rejected,
}

impl ScriptedFailure {
    pub fn to_error(self) -> CoreError {
        match self {
            ScriptedFailure::Network => CoreError::NetworkUnavailable("scripted outage".into()),
            ScriptedFailure::RateLimited => CoreError::RateLimited("scripted 429".into()),
            ScriptedFailure::Rejected => CoreError::RemoteRejected {
                status: 422,
                message: "scripted constraint violation".into(),
            },
        }
    }
}

/// One recorded backend call, for ordering assertions
#[derive(Debug, Clone, PartialEq)]
pub enum MockCall {
    Select(String),
    Insert(String, Row),
    Update(String, String, Row),
    Delete(String, String),
}

/// In-memory remote data service double
#[derive(Default)]
pub struct MockBackend {
    tables: Mutex<HashMap<String, Vec<Row>>>,
    calls: Mutex<Vec<MockCall>>,
    failure: Mutex<Option<ScriptedFailure>>,
    delay: Mutex<Duration>,
    next_id: AtomicI64,
}

impl MockBackend {
    pub fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    /// Script every subsequent call to fail this way (None to clear)
    pub fn set_failure(&self, failure: Option<ScriptedFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Make every call take this long (single-flight tests)
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    async fn simulate_latency(&self) {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }

    /// Seed a server-side row
    pub fn seed(&self, table: &str, row: Row) {
        self.tables
            .lock()
            .unwrap()
            .entry(table.to_string())
            .or_default()
            .push(row);
    }

    /// Everything recorded so far
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    /// Server-side contents of a table
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .unwrap()
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn check_failure(&self) -> CoreResult<()> {
        match *self.failure.lock().unwrap() {
            Some(f) => Err(f.to_error()),
            None => Ok(()),
        }
    }

    fn record(&self, call: MockCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl RemoteBackend for MockBackend {
    async fn select(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Row>> {
        self.record(MockCall::Select(table.to_string()));
        self.simulate_latency().await;
        self.check_failure()?;

        let mut rows = self.rows(table);
        if let Some(filter) = filter {
            rows.retain(|row| filter.iter().all(|(k, v)| row.get(k) == Some(v)));
        }
        if let Some(limit) = limit {
            rows.truncate(limit);
        }
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: &Row) -> CoreResult<Row> {
        self.record(MockCall::Insert(table.to_string(), row.clone()));
        self.simulate_latency().await;
        self.check_failure()?;

        let mut stored = row.clone();
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        stored.insert(ID_KEY.to_string(), serde_json::json!(id.to_string()));
        self.seed(table, stored.clone());
        Ok(stored)
    }

    async fn update(&self, table: &str, id: &str, patch: &Row) -> CoreResult<Row> {
        self.record(MockCall::Update(
            table.to_string(),
            id.to_string(),
            patch.clone(),
        ));
        self.simulate_latency().await;
        self.check_failure()?;

        let mut tables = self.tables.lock().unwrap();
        let rows = tables.entry(table.to_string()).or_default();
        let row = rows
            .iter_mut()
            .find(|r| row_id(r).as_deref() == Some(id))
            .ok_or_else(|| CoreError::RemoteRejected {
                status: 404,
                message: format!("no row {} in {}", id, table),
            })?;
        for (k, v) in patch {
            row.insert(k.clone(), v.clone());
        }
        Ok(row.clone())
    }

    async fn delete(&self, table: &str, id: &str) -> CoreResult<()> {
        self.record(MockCall::Delete(table.to_string(), id.to_string()));
        self.simulate_latency().await;
        self.check_failure()?;

        let mut tables = self.tables.lock().unwrap();
        if let Some(rows) = tables.get_mut(table) {
            rows.retain(|r| row_id(r).as_deref() != Some(id));
        }
        Ok(())
    }
}

/// Auth service double with call counters
#[derive(Default)]
pub struct MockAuth {
    session: Mutex<Option<Session>>,
    failure: Mutex<Option<ScriptedFailure>>,
    refresh_delay: Mutex<Duration>,
    pub get_calls: AtomicU32,
    pub refresh_calls: AtomicU32,
}

impl MockAuth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_session(session: Session) -> Self {
        let auth = Self::default();
        *auth.session.lock().unwrap() = Some(session);
        auth
    }

    pub fn set_session(&self, session: Option<Session>) {
        *self.session.lock().unwrap() = session;
    }

    pub fn set_failure(&self, failure: Option<ScriptedFailure>) {
        *self.failure.lock().unwrap() = failure;
    }

    /// Make refresh calls take this long (refresh-mutex tests)
    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = delay;
    }

    fn check_failure(&self) -> CoreResult<()> {
        match *self.failure.lock().unwrap() {
            Some(f) => Err(f.to_error()),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl AuthBackend for MockAuth {
    async fn get_session(&self) -> CoreResult<Option<Session>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        self.check_failure()?;
        Ok(self.session.lock().unwrap().clone())
    }

    async fn refresh_session(&self, _refresh_token: &str) -> CoreResult<Option<Session>> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.refresh_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.check_failure()?;

        let mut guard = self.session.lock().unwrap();
        if let Some(session) = guard.as_mut() {
            session.access_token = format!("{}-refreshed", session.access_token);
            session.expires_at = Utc::now().timestamp() + 3600;
        }
        Ok(guard.clone())
    }
}

/// A session that expires an hour from now
pub fn fresh_session(token: &str) -> Session {
    Session {
        access_token: token.to_string(),
        refresh_token: format!("{}-refresh", token),
        user_id: "user-1".to_string(),
        expires_at: Utc::now().timestamp() + 3600,
    }
}
