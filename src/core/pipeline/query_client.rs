// src/core/pipeline/query_client.rs

use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, error, info};

use crate::core::models::{QueryKind, RunState};

/// Base of the versioned lookup endpoint. The lookup kind selects the
/// sub-path: `ipv4/{address}` or `websites/{host}`.
pub const API_BASE: &str = "https://censys.io/api/v1/view";

const USER_AGENT: &str = "VantageRS/0.1";

/// HTTP status codes that mean the API key was rejected or the usage quota
/// is exhausted. Fatal for the remainder of the run, not retried per call.
const FATAL_STATUS: [u16; 4] = [400, 403, 429, 500];

/// A raw transport response: status code plus body text.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// The transport seam. The pipeline only needs authenticated GETs; TLS,
/// redirects and timeouts live behind this trait in the host environment.
#[async_trait]
pub trait HttpTransport {
    async fn get(
        &self,
        url: &str,
        key_id: &str,
        key_secret: &str,
    ) -> Result<HttpResponse, String>;
}

/// The production transport, backed by a single reqwest client.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> reqwest::Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .use_rustls_tls()
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn get(
        &self,
        url: &str,
        key_id: &str,
        key_secret: &str,
    ) -> Result<HttpResponse, String> {
        let response = self
            .client
            .get(url)
            .basic_auth(key_id, Some(key_secret))
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status().as_u16();
        let body = response.text().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse { status, body })
    }
}

/// Issues one authenticated lookup per call against the attribution API,
/// enforcing the API's fixed-rate quota with an unconditional delay after
/// every request, and classifying transport-level failures.
pub struct QueryClient<T: HttpTransport> {
    transport: T,
    key_id: String,
    key_secret: String,
    delay: Duration,
}

impl<T: HttpTransport> QueryClient<T> {
    pub fn new(transport: T, key_id: String, key_secret: String, delay_seconds: u64) -> Self {
        Self {
            transport,
            key_id,
            key_secret,
            delay: Duration::from_secs(delay_seconds),
        }
    }

    #[cfg(test)]
    pub(crate) fn transport_ref(&self) -> &T {
        &self.transport
    }

    fn lookup_url(kind: QueryKind, address: &str) -> String {
        match kind {
            QueryKind::Ip => format!("{API_BASE}/ipv4/{address}"),
            QueryKind::Host => format!("{API_BASE}/websites/{address}"),
        }
    }

    /// Looks up one address. Returns the parsed record, or `None` for all
    /// expected failure modes:
    /// - a fatal HTTP status latches the run's error flag;
    /// - an empty body means the API has nothing for this address;
    /// - a malformed JSON body is logged and skipped without latching.
    ///
    /// The caller must not invoke this once the error flag is latched, and
    /// must ensure credentials are configured before the run starts.
    pub async fn query(
        &self,
        address: &str,
        kind: QueryKind,
        state: &mut RunState,
    ) -> Option<Value> {
        let url = Self::lookup_url(kind, address);
        debug!(url = %url, "Querying attribution API.");

        let result = self.transport.get(&url, &self.key_id, &self.key_secret).await;

        // The API enforces a fixed-rate quota, so the delay applies after
        // every request, success or failure.
        tokio::time::sleep(self.delay).await;

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                error!(address, error = %e, "HTTP request failed.");
                return None;
            }
        };

        if FATAL_STATUS.contains(&response.status) {
            error!(
                status = response.status,
                "API key rejected or usage limits exceeded; halting queries for this run."
            );
            state.latch_error();
            return None;
        }

        if response.body.is_empty() {
            info!(address, "No attribution data found.");
            return None;
        }

        match serde_json::from_str::<Value>(&response.body) {
            Ok(record) => Some(record),
            Err(e) => {
                error!(address, error = %e, "Error processing JSON response.");
                None
            }
        }
    }
}
