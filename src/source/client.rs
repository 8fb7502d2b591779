//!
//! HTTP transport for chain data sources with endpoint failover.
//!
//! The client owns a shared `reqwest::Client` and a list of configured
//! endpoints. A request that fails at transport level (network error,
//! non-2xx status, unreadable body) falls through to the next endpoint
//! within the same call; only when every endpoint has failed does the call
//! return an error, leaving the retry cadence to the poll scheduler.

use super::types::{EndpointConfig, SourceError};

use reqwest::Client;
use std::time::Duration;
use tracing::{debug, warn};

/// Multi-endpoint HTTP client with per-endpoint API-key header injection.
#[derive(Clone)]
pub struct SourceClient {
    http_client: Client,
    endpoints: Vec<EndpointConfig>,
}

impl SourceClient {
    /// Create a new client over the given endpoints. Endpoints are tried in
    /// the configured order.
    pub fn new(endpoints: Vec<EndpointConfig>) -> Self {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http_client,
            endpoints,
        }
    }

    /// GET `path_and_query` against each configured endpoint until one
    /// returns a 2xx JSON body.
    pub async fn get_json(&self, path_and_query: &str) -> Result<serde_json::Value, SourceError> {
        let mut last_error = "no endpoints configured".to_string();

        for endpoint in &self.endpoints {
            let url = format!(
                "{}{}",
                endpoint.base_url.trim_end_matches('/'),
                path_and_query
            );
            debug!("Fetching {}", url);

            let mut request = self.http_client.get(&url);
            for (name, value) in &endpoint.headers {
                request = request.header(name, value);
            }

            match request.send().await {
                Ok(response) => {
                    let status = response.status();
                    if status.is_success() {
                        match response.json::<serde_json::Value>().await {
                            Ok(body) => return Ok(body),
                            Err(e) => {
                                warn!("Endpoint {} returned unreadable body: {}", url, e);
                                last_error = e.to_string();
                            }
                        }
                    } else {
                        let body = response.text().await.unwrap_or_default();
                        let error = SourceError::Status {
                            url: url.clone(),
                            status: status.as_u16(),
                            body: truncate(&body, 200),
                        };
                        warn!("Endpoint failed: {}", error);
                        last_error = error.to_string();
                    }
                }
                Err(e) => {
                    warn!("Request to {} failed: {}", url, e);
                    last_error = e.to_string();
                }
            }
        }

        Err(SourceError::AllEndpointsFailed {
            attempts: self.endpoints.len(),
            last_error,
        })
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        s.to_string()
    } else {
        let mut end = max;
        while !s.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}...", &s[..end])
    }
}
