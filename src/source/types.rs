//! Types for remote chain data source integration.

use crate::engine::types::SyncCursor;

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// One configured endpoint of a data source, with per-endpoint headers for
/// API keys.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub base_url: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
}

impl EndpointConfig {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            headers: HashMap::new(),
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }
}

/// One page of raw chain records plus a continuation token.
///
/// Records are opaque to the transport layer; schema validation belongs to
/// the record normalizer.
#[derive(Debug, Clone, Default)]
pub struct RecordPage {
    pub records: Vec<serde_json::Value>,
    pub next_page_token: Option<String>,
}

/// Capability contract for a remote chain data source.
///
/// Implementations may be REST indexers, RPC nodes, or chain-specific APIs;
/// the engine only depends on this interface.
#[async_trait::async_trait]
pub trait ChainSource: Send + Sync {
    /// Fetch one page of records starting at the cursor position,
    /// continuing via `page_token` within a pass.
    async fn fetch_page(
        &self,
        cursor: &SyncCursor,
        page_token: Option<&str>,
    ) -> Result<RecordPage, SourceError>;

    /// Authoritative per-asset balances for the wallet address.
    async fn fetch_balances(&self) -> Result<Vec<(String, i128)>, SourceError>;

    /// Current chain tip height.
    async fn fetch_block_height(&self) -> Result<u64, SourceError>;
}

/// Error types for data source operations
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("endpoint {url} returned status {status}: {body}")]
    Status {
        url: String,
        status: u16,
        body: String,
    },

    #[error("all {attempts} configured endpoints failed, last error: {last_error}")]
    AllEndpointsFailed { attempts: usize, last_error: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("JSON parse error: {0}")]
    JsonError(#[from] serde_json::Error),
}

/// Envelope of a Midgard-style actions response. Individual actions stay
/// opaque here; only the envelope shape is validated at transport level.
#[derive(Debug, Clone, Deserialize)]
pub struct ActionsResponse {
    pub actions: Vec<serde_json::Value>,
    pub meta: ActionsMeta,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ActionsMeta {
    #[serde(rename = "nextPageToken", default)]
    pub next_page_token: String,
}

/// One ledger action as delivered by a Midgard-style indexer.
#[derive(Debug, Clone, Deserialize)]
pub struct MidgardAction {
    /// Nanoseconds since epoch, decimal string.
    pub date: String,
    /// Block height, decimal string.
    pub height: String,
    #[serde(rename = "in", default)]
    pub in_legs: Vec<MidgardLeg>,
    #[serde(rename = "out", default)]
    pub out_legs: Vec<MidgardLeg>,
    /// Keyed by action type; ordered so that normalization stays
    /// deterministic when several entries are present.
    #[serde(default)]
    pub metadata: BTreeMap<String, MidgardActionMetadata>,
}

/// One inbound or outbound leg of an action.
#[derive(Debug, Clone, Deserialize)]
pub struct MidgardLeg {
    pub address: String,
    #[serde(rename = "txID", default)]
    pub tx_id: String,
    #[serde(default)]
    pub coins: Vec<MidgardCoin>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MidgardCoin {
    pub asset: String,
    /// Smallest-unit amount, decimal string.
    pub amount: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MidgardActionMetadata {
    #[serde(default)]
    pub memo: Option<String>,
    #[serde(rename = "networkFees", default)]
    pub network_fees: Vec<MidgardCoin>,
}

/// Balance response of a Midgard-style `/v2/balance/{address}` endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct BalanceResponse {
    #[serde(default)]
    pub coins: Vec<MidgardCoin>,
}

/// Health response carrying the indexer's scanner height.
#[derive(Debug, Clone, Deserialize)]
pub struct HealthResponse {
    #[serde(rename = "scannerHeight")]
    pub scanner_height: String,
}
