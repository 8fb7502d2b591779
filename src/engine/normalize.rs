//! Record normalization contract.
//!
//! A normalizer converts one source-specific raw record into the canonical
//! transaction/balance model. Normalizers are chain-specific; the sync pass
//! only depends on this trait, mirroring how sync strategies abstract over
//! their data source.

use crate::engine::types::{BalanceDelta, Transaction};

/// Result of normalizing a single raw record.
pub enum Normalized {
    /// The record is irrelevant to the tracked wallet (not a failure).
    Skip,
    /// The record produced a canonical transaction and its balance deltas.
    ///
    /// When one chain action expands to multiple wallet-relevant legs, all
    /// deltas attach to the same transaction id.
    Record {
        transaction: Transaction,
        deltas: Vec<BalanceDelta>,
    },
}

/// A single malformed record. The sync pass logs this and skips the record;
/// it never aborts the page.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct NormalizeError(pub String);

/// Converts raw source records into canonical transactions.
///
/// Implementations must be deterministic: the same raw record always
/// normalizes to the same canonical transaction id.
pub trait RecordNormalizer: Send + Sync {
    fn normalize(&self, record: &serde_json::Value) -> Result<Normalized, NormalizeError>;
}
