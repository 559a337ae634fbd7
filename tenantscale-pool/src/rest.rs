//! REST backing-store connections over `reqwest`.

use crate::config::StoreCredentials;
use crate::factory::ConnectionFactory;
use crate::{PoolError, PoolResult};
use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use std::time::Duration;
use tracing::debug;

/// Table queried by the connectivity probe unless overridden.
pub const DEFAULT_PROBE_TABLE: &str = "tenants";

/// One authenticated HTTP client for the backing store.
#[derive(Debug, Clone)]
pub struct RestClient {
    http: reqwest::Client,
    base_url: String,
    connection_id: String,
}

impl RestClient {
    /// Underlying HTTP client, with auth headers already attached.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// Id sent in the `x-connection-id` header.
    pub fn connection_id(&self) -> &str {
        &self.connection_id
    }

    /// `{url}/rest/v1/{table}`
    pub fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Select `columns` from `table`, at most `limit` rows.
    pub async fn select(
        &self,
        table: &str,
        columns: &str,
        limit: usize,
    ) -> PoolResult<serde_json::Value> {
        let limit = limit.to_string();
        let response = self
            .http
            .get(self.table_url(table))
            .query(&[("select", columns), ("limit", limit.as_str())])
            .send()
            .await?
            .error_for_status()?;

        Ok(response.json().await?)
    }

    async fn probe_status(&self, table: &str) -> PoolResult<StatusCode> {
        let response = self
            .http
            .get(self.table_url(table))
            .query(&[("select", "id"), ("limit", "1")])
            .send()
            .await?;
        Ok(response.status())
    }
}

/// Builds [`RestClient`]s for the pool.
#[derive(Debug, Clone)]
pub struct RestStoreFactory {
    credentials: StoreCredentials,
    probe_table: String,
    request_timeout: Duration,
}

impl RestStoreFactory {
    pub fn new(credentials: StoreCredentials) -> Self {
        Self {
            credentials,
            probe_table: DEFAULT_PROBE_TABLE.to_string(),
            request_timeout: Duration::from_secs(30),
        }
    }

    /// Read credentials from `BACKING_STORE_URL` / `BACKING_STORE_KEY`.
    pub fn from_env() -> PoolResult<Self> {
        Ok(Self::new(StoreCredentials::from_env()?))
    }

    /// Set the table queried by the probe.
    pub fn with_probe_table(mut self, table: impl Into<String>) -> Self {
        self.probe_table = table.into();
        self
    }

    /// Set the per-request timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn credentials(&self) -> &StoreCredentials {
        &self.credentials
    }

    fn headers(&self, connection_id: &str) -> PoolResult<HeaderMap> {
        let key = &self.credentials.key;
        let header = |value: &str| {
            HeaderValue::from_str(value)
                .map_err(|e| PoolError::Config(format!("Invalid header value: {e}")))
        };

        let mut api_key = header(key)?;
        api_key.set_sensitive(true);
        let mut bearer = header(&format!("Bearer {key}"))?;
        bearer.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert("apikey", api_key);
        headers.insert(AUTHORIZATION, bearer);
        headers.insert("x-connection-id", header(connection_id)?);
        Ok(headers)
    }

    fn build_client(&self, connection_id: &str) -> PoolResult<RestClient> {
        let http = reqwest::Client::builder()
            .default_headers(self.headers(connection_id)?)
            .timeout(self.request_timeout)
            .build()?;

        Ok(RestClient {
            http,
            base_url: self.credentials.url.trim_end_matches('/').to_string(),
            connection_id: connection_id.to_string(),
        })
    }
}

/// Statuses that prove the store answered even though the probe query was refused.
fn reachable_status(status: StatusCode) -> bool {
    status.is_success()
        || matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        )
}

/// Health verdict for a probe response, using the same rule as create.
fn probe_outcome(status: StatusCode) -> PoolResult<()> {
    if reachable_status(status) {
        Ok(())
    } else {
        Err(PoolError::Probe(format!("probe query returned {status}")))
    }
}

#[async_trait]
impl ConnectionFactory for RestStoreFactory {
    type Connection = RestClient;

    async fn create(&self, connection_id: &str) -> PoolResult<RestClient> {
        let client = self.build_client(connection_id)?;
        let status = client.probe_status(&self.probe_table).await?;

        // A missing relation or permission still means the store is reachable.
        if !reachable_status(status) {
            return Err(PoolError::ConnectionFailed(format!(
                "backing store responded with {status}"
            )));
        }

        debug!(connection_id, status = status.as_u16(), "Backing store reachable");
        Ok(client)
    }

    async fn probe(&self, connection: &RestClient) -> PoolResult<()> {
        let status = connection.probe_status(&self.probe_table).await?;
        probe_outcome(status)
    }
}
