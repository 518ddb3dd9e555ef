//! Remote backend seam
//!
//! The remote system is modeled as two abstract services: per-table
//! CRUD (`RemoteBackend`) and session issuance/refresh (`AuthBackend`).
//! The gateway, synchronizers, and session guard depend only on these
//! traits, so tests substitute scripted doubles and the application
//! wires in `HttpBackend`.

use async_trait::async_trait;
use reqwest::StatusCode;
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::models::{Row, Session};

/// Equality filter applied to a select, column name to expected value
pub type Filter = serde_json::Map<String, Value>;

/// Per-table CRUD operations of the remote service
#[async_trait]
pub trait RemoteBackend: Send + Sync {
    /// Query rows, optionally filtered and bounded
    async fn select(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Row>>;

    /// Insert a row; the response carries the server-assigned id
    async fn insert(&self, table: &str, row: &Row) -> CoreResult<Row>;

    /// Patch a row by id; the response is the updated row
    async fn update(&self, table: &str, id: &str, patch: &Row) -> CoreResult<Row>;

    /// Delete a row by id
    async fn delete(&self, table: &str, id: &str) -> CoreResult<()>;
}

/// Session operations of the remote auth service
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Fetch the current session, if one exists server-side
    async fn get_session(&self) -> CoreResult<Option<Session>>;

    /// Exchange a refresh token for a new session
    async fn refresh_session(&self, refresh_token: &str) -> CoreResult<Option<Session>>;
}

/// HTTP implementation of both backend traits
///
/// REST conventions: `GET/POST {base}/rest/{table}`,
/// `PATCH/DELETE {base}/rest/{table}/{id}`, `GET {base}/auth/session`,
/// `POST {base}/auth/refresh`.
pub struct HttpBackend {
    client: reqwest::Client,
    base_url: String,
    access_token: RwLock<Option<String>>,
}

impl HttpBackend {
    /// Create a backend for a base URL with a per-request timeout
    pub fn new(base_url: &str, timeout: Duration) -> CoreResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CoreError::NetworkUnavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            access_token: RwLock::new(None),
        })
    }

    /// Set the bearer token attached to subsequent requests
    pub fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/{}", self.base_url, table)
    }

    fn row_url(&self, table: &str, id: &str) -> String {
        format!("{}/rest/{}/{}", self.base_url, table, id)
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.access_token.read().ok().and_then(|g| g.clone()) {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn send(&self, req: reqwest::RequestBuilder) -> CoreResult<reqwest::Response> {
        let response = self
            .authorize(req)
            .send()
            .await
            .map_err(|e| CoreError::NetworkUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let message = response.text().await.unwrap_or_default();
        debug!(%status, message, "remote request failed");
        Err(classify_http_failure(status, message))
    }

    async fn json_row(response: reqwest::Response) -> CoreResult<Row> {
        let value: Value = response
            .json()
            .await
            .map_err(|e| CoreError::NetworkUnavailable(e.to_string()))?;
        match value {
            Value::Object(row) => Ok(row),
            // Some backends wrap single rows in a one-element array
            Value::Array(mut rows) if rows.len() == 1 => match rows.remove(0) {
                Value::Object(row) => Ok(row),
                other => Err(CoreError::RemoteRejected {
                    status: 200,
                    message: format!("expected a row object, got {}", other),
                }),
            },
            other => Err(CoreError::RemoteRejected {
                status: 200,
                message: format!("expected a row object, got {}", other),
            }),
        }
    }
}

/// Map a non-2xx response to the error taxonomy
///
/// 5xx means the server is unhealthy, which callers must treat the
/// same as no connectivity (fall back to cache/queue), not as a
/// business rejection.
fn classify_http_failure(status: StatusCode, message: String) -> CoreError {
    if status == StatusCode::TOO_MANY_REQUESTS
        || CoreError::looks_rate_limited(status.as_u16(), &message)
    {
        CoreError::RateLimited(message)
    } else if status.is_server_error() {
        CoreError::NetworkUnavailable(format!("server error {}: {}", status.as_u16(), message))
    } else {
        CoreError::RemoteRejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl RemoteBackend for HttpBackend {
    async fn select(
        &self,
        table: &str,
        filter: Option<&Filter>,
        limit: Option<usize>,
    ) -> CoreResult<Vec<Row>> {
        let mut req = self.client.get(self.table_url(table));

        if let Some(filter) = filter {
            for (column, value) in filter {
                let v = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                req = req.query(&[(column.as_str(), v)]);
            }
        }
        if let Some(limit) = limit {
            req = req.query(&[("limit", limit.to_string())]);
        }

        let response = self.send(req).await?;
        let rows: Vec<Row> = response
            .json()
            .await
            .map_err(|e| CoreError::NetworkUnavailable(e.to_string()))?;
        Ok(rows)
    }

    async fn insert(&self, table: &str, row: &Row) -> CoreResult<Row> {
        let req = self.client.post(self.table_url(table)).json(row);
        Self::json_row(self.send(req).await?).await
    }

    async fn update(&self, table: &str, id: &str, patch: &Row) -> CoreResult<Row> {
        let req = self.client.patch(self.row_url(table, id)).json(patch);
        Self::json_row(self.send(req).await?).await
    }

    async fn delete(&self, table: &str, id: &str) -> CoreResult<()> {
        let req = self.client.delete(self.row_url(table, id));
        self.send(req).await?;
        Ok(())
    }
}

#[async_trait]
impl AuthBackend for HttpBackend {
    async fn get_session(&self) -> CoreResult<Option<Session>> {
        let req = self.client.get(format!("{}/auth/session", self.base_url));
        let response = self.send(req).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let session: Option<Session> = response
            .json()
            .await
            .map_err(|e| CoreError::NetworkUnavailable(e.to_string()))?;
        Ok(session)
    }

    async fn refresh_session(&self, refresh_token: &str) -> CoreResult<Option<Session>> {
        let req = self
            .client
            .post(format!("{}/auth/refresh", self.base_url))
            .json(&serde_json::json!({ "refresh_token": refresh_token }));
        let response = self.send(req).await?;

        if response.status() == StatusCode::NO_CONTENT {
            return Ok(None);
        }
        let session: Option<Session> = response
            .json()
            .await
            .map_err(|e| CoreError::NetworkUnavailable(e.to_string()))?;
        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_layout() {
        let backend = HttpBackend::new("https://api.example.com/", Duration::from_secs(5)).unwrap();
        assert_eq!(
            backend.table_url("clients"),
            "https://api.example.com/rest/clients"
        );
        assert_eq!(
            backend.row_url("sales", "42"),
            "https://api.example.com/rest/sales/42"
        );
    }

    #[test]
    fn test_server_errors_classify_as_connectivity() {
        let err = classify_http_failure(StatusCode::SERVICE_UNAVAILABLE, "down".into());
        assert!(matches!(err, CoreError::NetworkUnavailable(_)));
        assert!(err.is_connectivity());

        let err = classify_http_failure(StatusCode::INTERNAL_SERVER_ERROR, "boom".into());
        assert!(err.is_connectivity());
    }

    #[test]
    fn test_client_errors_classify_as_rejection_or_throttle() {
        let err = classify_http_failure(StatusCode::UNPROCESSABLE_ENTITY, "duplicate".into());
        assert!(matches!(
            err,
            CoreError::RemoteRejected { status: 422, .. }
        ));

        let err = classify_http_failure(StatusCode::TOO_MANY_REQUESTS, "slow down".into());
        assert!(matches!(err, CoreError::RateLimited(_)));

        // Rate-limit shaped message with a different status
        let err = classify_http_failure(StatusCode::FORBIDDEN, "over_request_rate_limit".into());
        assert!(matches!(err, CoreError::RateLimited(_)));
    }

    #[test]
    fn test_token_is_replaceable() {
        let backend = HttpBackend::new("https://api.example.com", Duration::from_secs(5)).unwrap();
        backend.set_access_token(Some("abc".into()));
        assert_eq!(
            backend.access_token.read().unwrap().as_deref(),
            Some("abc")
        );
        backend.set_access_token(None);
        assert!(backend.access_token.read().unwrap().is_none());
    }
}
