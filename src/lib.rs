//! Incremental blockchain wallet synchronization engine.
//!
//! The crate keeps a local wallet's balance and transaction history in sync
//! with a remote chain data source and produces unsigned transactions ready
//! for signing. The `engine` module holds the chain-agnostic core (sync
//! pass, dedup/merge ledger, scheduler, persistence, fees, facade); the
//! `source` module holds the data source contract, the HTTP transport with
//! endpoint failover, and a Midgard-style reference adapter.
//!
//! Chain-specific concerns stay outside: a consumer supplies a
//! `ChainSource` + `RecordNormalizer` pair per asset, a state repository,
//! and a callback surface, then drives the engine through its lifecycle
//! operations.

pub mod engine;
pub mod source;
