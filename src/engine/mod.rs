//! Wallet Synchronization Engine
//!
//! This module provides the core logic for keeping a local wallet
//! synchronized with a remote chain data source. It is composed of several
//! submodules, each responsible for one aspect of the engine:
//!
//! - `facade`: The engine facade wiring all services together and exposing
//!   the lifecycle and query operations.
//! - `sync`: The incremental transaction-synchronization pass with its
//!   newest-first sentinel and resumable cursor.
//! - `ledger`: The dedup/merge ledger applying normalized records
//!   idempotently and folding balance deltas.
//! - `scheduler`: The recurring-task driver with jittered start delays and
//!   race-free cancellation.
//! - `normalize`: The record-normalization contract chain adapters
//!   implement.
//! - `persistence`: Repository traits and implementations for wallet-local
//!   snapshots.
//! - `fees`: Rate-table fee estimation.
//! - `types`: Canonical transaction/balance/cursor types, the callback
//!   surface, and error types.

/// The engine facade and lifecycle
pub mod facade;
/// Rate-table fee estimation
pub mod fees;
/// Dedup/merge ledger for canonical transactions
pub mod ledger;
/// Record normalization contract
pub mod normalize;
/// Wallet-local state persistence
pub mod persistence;
/// Recurring-task scheduler
pub mod scheduler;
/// The incremental sync pass
pub mod sync;
/// Canonical types, callbacks, and errors
pub mod types;

pub use facade::{EngineConfig, WalletEngine};
pub use types::EngineError;
