use crate::source::SourceError;

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Canonical wallet transaction, normalized from chain-native records.
///
/// `id` is the uniqueness key within one wallet. `amount` and `fee` are
/// immutable once ingested; `block_height` and `timestamp` may be upgraded
/// in place when a pending transaction finalizes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Stable chain transaction identifier.
    pub id: String,
    /// Seconds since epoch.
    pub timestamp: u64,
    /// Block height; 0 means unconfirmed/pending.
    pub block_height: u64,
    /// Signed amount in the asset's smallest unit; negative = net outgoing.
    pub amount: i128,
    /// Network fee in the asset's smallest unit.
    pub fee: u128,
    /// Optional free-text memo attached by the chain.
    pub memo: Option<String>,
    /// Opaque source record kept for audit, never reparsed.
    pub raw_payload: Option<String>,
}

/// One per-asset balance change produced while normalizing a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceDelta {
    pub asset: String,
    pub amount: i128,
}

/// Durable, resumable position describing how much history has been
/// processed.
///
/// `most_recent_height` is a monotonic high-water mark across successful
/// passes. `most_recent_txid` identifies the newest ingested transaction
/// and serves as the early-exit sentinel for newest-first feeds.
/// `page_token` carries in-pass pagination state only; it is cleared at
/// pass boundaries and never persisted non-empty.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncCursor {
    pub most_recent_height: u64,
    pub most_recent_txid: String,
    pub page_token: Option<String>,
}

/// Wallet-local mutable state owned by one engine instance.
///
/// The `dirty` flag marks in-memory state that differs from the last
/// persisted snapshot; it is never serialized.
#[derive(Debug, Clone, Default)]
pub struct WalletLocalState {
    pub cursor: SyncCursor,
    /// Last observed chain tip, advanced monotonically.
    pub block_height: u64,
    /// Asset code -> sync completion fraction in [0, 1].
    pub check_status: HashMap<String, f64>,
    pub dirty: bool,
}

/// Persisted snapshot of wallet-local state.
///
/// In-memory state is always reconstructible from the last snapshot plus
/// replay from the cursor forward.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WalletSnapshot {
    pub cursor: SyncCursor,
    pub block_height: u64,
    pub balances: HashMap<String, i128>,
    pub check_status: HashMap<String, f64>,
    pub transactions: Vec<Transaction>,
}

/// One spend output of a spend request.
#[derive(Debug, Clone)]
pub struct SpendTarget {
    pub address: String,
    /// Amount to send in the asset's smallest unit; must be positive.
    pub amount: i128,
}

/// Request to build an unsigned spend transaction.
#[derive(Debug, Clone)]
pub struct SpendRequest {
    pub asset: String,
    pub targets: Vec<SpendTarget>,
    pub memo: Option<String>,
}

/// Callback surface invoked by the engine when observable state changes.
///
/// Implementations must be cheap and non-blocking; they are called from
/// scheduled task context.
pub trait EngineCallbacks: Send + Sync {
    fn on_transactions_changed(&self, transactions: &[Transaction]);
    fn on_balance_changed(&self, asset: &str, balance: i128);
    fn on_block_height_changed(&self, height: u64);
    fn on_addresses_checked(&self, progress: f64);
}

/// Callback implementation that drops all notifications.
pub struct NoopCallbacks;

impl EngineCallbacks for NoopCallbacks {
    fn on_transactions_changed(&self, _transactions: &[Transaction]) {}
    fn on_balance_changed(&self, _asset: &str, _balance: i128) {}
    fn on_block_height_changed(&self, _height: u64) {}
    fn on_addresses_checked(&self, _progress: f64) {}
}

/// Error types for engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("source error: {0}")]
    Source(#[from] SourceError),

    #[error("insufficient funds: {asset} spend of {required} exceeds spendable {spendable}")]
    InsufficientFunds {
        asset: String,
        required: i128,
        spendable: i128,
    },

    #[error("invalid spend: {0}")]
    InvalidSpend(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("{0} is not implemented for this chain")]
    Unimplemented(&'static str),
}
