//! Remote chain data source adapters.
//!
//! The transport client, the `ChainSource` capability contract, and the
//! Midgard-style reference adapter live here. Adapters validate nothing
//! beyond transport success and envelope shape; record-level schema
//! validation is the record normalizer's job.

pub mod client;
pub mod midgard;
pub mod types;

pub use client::SourceClient;
pub use midgard::{MidgardNormalizer, MidgardSource};
pub use types::{ChainSource, EndpointConfig, RecordPage, SourceError};
