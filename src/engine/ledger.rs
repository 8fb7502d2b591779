//! Dedup/merge ledger for canonical transactions.
//!
//! The ledger is the idempotency boundary of the sync engine: applying the
//! same raw page twice yields the same transaction set and balances as
//! applying it once. It also accumulates a "changed since last drain" batch
//! that the engine reports upward after each successful pass.

use crate::engine::types::{BalanceDelta, Transaction};

use std::collections::HashMap;
use tracing::{debug, warn};

/// Outcome of applying one normalized transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The id was unseen; the transaction was inserted and its deltas folded
    /// into the running balances.
    Applied,
    /// The id existed with differing mutable fields (height, timestamp),
    /// which were upgraded in place. Deltas are not re-applied.
    Merged,
    /// The id existed and nothing changed.
    Duplicate,
}

/// In-memory transaction map plus per-asset running balances, owned
/// exclusively by one engine instance per wallet.
#[derive(Debug, Default)]
pub struct TxLedger {
    transactions: HashMap<String, Transaction>,
    balances: HashMap<String, i128>,
    changed: Vec<String>,
}

impl TxLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the ledger from a persisted snapshot.
    pub fn seed(&mut self, transactions: Vec<Transaction>, balances: HashMap<String, i128>) {
        self.transactions = transactions
            .into_iter()
            .map(|tx| (tx.id.clone(), tx))
            .collect();
        self.balances = balances;
        self.changed.clear();
    }

    /// Apply one normalized transaction idempotently.
    ///
    /// Immutable fields (amount, fee) never change: a re-ingested id with
    /// conflicting values keeps the existing entry and logs a warning.
    /// Height finalization of a pending transaction is merged in place and
    /// reported as changed.
    pub fn apply(&mut self, tx: Transaction, deltas: &[BalanceDelta]) -> ApplyOutcome {
        match self.transactions.get_mut(&tx.id) {
            Some(existing) => {
                if existing.amount != tx.amount || existing.fee != tx.fee {
                    warn!(
                        txid = %tx.id,
                        "re-ingested transaction with conflicting amount/fee, keeping existing entry"
                    );
                    return ApplyOutcome::Duplicate;
                }

                let mut merged = false;
                if existing.block_height == 0 && tx.block_height > 0 {
                    debug!(txid = %tx.id, height = tx.block_height, "pending transaction confirmed");
                    existing.block_height = tx.block_height;
                    merged = true;
                }
                if tx.timestamp != 0 && existing.timestamp != tx.timestamp {
                    existing.timestamp = tx.timestamp;
                    merged = true;
                }

                if merged {
                    self.mark_changed(&tx.id);
                    ApplyOutcome::Merged
                } else {
                    ApplyOutcome::Duplicate
                }
            }
            None => {
                for delta in deltas {
                    *self.balances.entry(delta.asset.clone()).or_insert(0) += delta.amount;
                }
                self.mark_changed(&tx.id);
                self.transactions.insert(tx.id.clone(), tx);
                ApplyOutcome::Applied
            }
        }
    }

    fn mark_changed(&mut self, id: &str) {
        if !self.changed.iter().any(|c| c == id) {
            self.changed.push(id.to_string());
        }
    }

    /// Drain the changed-since-last-drain batch, clearing it.
    pub fn drain_changed(&mut self) -> Vec<Transaction> {
        let ids = std::mem::take(&mut self.changed);
        ids.iter()
            .filter_map(|id| self.transactions.get(id).cloned())
            .collect()
    }

    /// Running balance for one asset; 0 when unknown.
    pub fn balance(&self, asset: &str) -> i128 {
        self.balances.get(asset).copied().unwrap_or(0)
    }

    /// Overwrite one asset balance with an authoritative figure from the
    /// data source. Returns true when the stored value changed.
    pub fn set_balance(&mut self, asset: &str, amount: i128) -> bool {
        if self.balance(asset) == amount {
            return false;
        }
        self.balances.insert(asset.to_string(), amount);
        true
    }

    pub fn balances(&self) -> HashMap<String, i128> {
        self.balances.clone()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transactions.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }

    /// All transactions, newest first.
    pub fn transactions(&self) -> Vec<Transaction> {
        let mut all: Vec<Transaction> = self.transactions.values().cloned().collect();
        all.sort_by(|a, b| {
            b.timestamp
                .cmp(&a.timestamp)
                .then_with(|| b.block_height.cmp(&a.block_height))
        });
        all
    }

    /// Drop everything. Balances recompute from scratch by replay after a
    /// full resync.
    pub fn clear(&mut self) {
        self.transactions.clear();
        self.balances.clear();
        self.changed.clear();
    }
}
