//! Reference data source and normalizer for a Midgard-style actions API.
//!
//! Midgard delivers ledger actions newest to oldest, paginated with a
//! `nextPageToken`. One action can carry several inbound and outbound legs
//! sharing a single externally visible transaction id; the normalizer
//! collapses all legs into one canonical transaction with one balance delta
//! per touched asset.

use super::client::SourceClient;
use super::types::{
    ActionsResponse, BalanceResponse, ChainSource, HealthResponse, MidgardAction, MidgardLeg,
    RecordPage, SourceError,
};
use crate::engine::normalize::{NormalizeError, Normalized, RecordNormalizer};
use crate::engine::types::{BalanceDelta, SyncCursor, Transaction};

use std::collections::BTreeMap;
use tracing::debug;

/// Midgard-backed implementation of the chain source capability.
pub struct MidgardSource {
    client: SourceClient,
    address: String,
}

impl MidgardSource {
    pub fn new(client: SourceClient, address: impl Into<String>) -> Self {
        Self {
            client,
            address: address.into(),
        }
    }
}

#[async_trait::async_trait]
impl ChainSource for MidgardSource {
    async fn fetch_page(
        &self,
        cursor: &SyncCursor,
        page_token: Option<&str>,
    ) -> Result<RecordPage, SourceError> {
        let mut path = format!(
            "/v2/actions?address={}&fromHeight={}",
            self.address, cursor.most_recent_height
        );
        if let Some(token) = page_token {
            path.push_str(&format!("&nextPageToken={}", token));
        }

        let raw = self.client.get_json(&path).await?;
        let envelope: ActionsResponse = serde_json::from_value(raw)
            .map_err(|e| SourceError::MalformedResponse(format!("actions envelope: {}", e)))?;

        let next_page_token = if envelope.meta.next_page_token.is_empty() {
            None
        } else {
            Some(envelope.meta.next_page_token)
        };

        debug!(
            records = envelope.actions.len(),
            has_next = next_page_token.is_some(),
            "Fetched actions page"
        );

        Ok(RecordPage {
            records: envelope.actions,
            next_page_token,
        })
    }

    async fn fetch_balances(&self) -> Result<Vec<(String, i128)>, SourceError> {
        let raw = self
            .client
            .get_json(&format!("/v2/balance/{}", self.address))
            .await?;
        let response: BalanceResponse = serde_json::from_value(raw)
            .map_err(|e| SourceError::MalformedResponse(format!("balance response: {}", e)))?;

        let mut balances = Vec::with_capacity(response.coins.len());
        for coin in response.coins {
            let amount = coin.amount.parse::<i128>().map_err(|_| {
                SourceError::MalformedResponse(format!(
                    "balance amount {:?} for {}",
                    coin.amount, coin.asset
                ))
            })?;
            balances.push((coin.asset, amount));
        }
        Ok(balances)
    }

    async fn fetch_block_height(&self) -> Result<u64, SourceError> {
        let raw = self.client.get_json("/v2/health").await?;
        let health: HealthResponse = serde_json::from_value(raw)
            .map_err(|e| SourceError::MalformedResponse(format!("health response: {}", e)))?;
        health.scanner_height.parse::<u64>().map_err(|_| {
            SourceError::MalformedResponse(format!(
                "scanner height {:?} is not a number",
                health.scanner_height
            ))
        })
    }
}

/// Normalizes Midgard actions into canonical transactions for one wallet
/// address, with the configured native asset carrying the network fee.
pub struct MidgardNormalizer {
    asset: String,
    address: String,
}

impl MidgardNormalizer {
    pub fn new(asset: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            address: address.into(),
        }
    }

    /// Fold one side's legs into the per-asset net map. Spent legs are
    /// negative, received legs positive; legs of other addresses are
    /// ignored.
    fn fold_legs(&self, legs: &[MidgardLeg], sign: i128, net: &mut BTreeMap<String, i128>) {
        for leg in legs {
            if leg.address != self.address {
                continue;
            }
            for coin in &leg.coins {
                let Ok(amount) = coin.amount.parse::<i128>() else {
                    continue;
                };
                *net.entry(coin.asset.clone()).or_insert(0) += sign * amount.abs();
            }
        }
    }
}

impl RecordNormalizer for MidgardNormalizer {
    fn normalize(&self, record: &serde_json::Value) -> Result<Normalized, NormalizeError> {
        let action: MidgardAction = serde_json::from_value(record.clone())
            .map_err(|e| NormalizeError(format!("malformed action: {}", e)))?;

        let height = action
            .height
            .parse::<u64>()
            .map_err(|_| NormalizeError(format!("invalid height {:?}", action.height)))?;
        let date_nanos = action
            .date
            .parse::<u128>()
            .map_err(|_| NormalizeError(format!("invalid date {:?}", action.date)))?;
        let timestamp = (date_nanos / 1_000_000_000) as u64;

        // Multi-leg actions can carry truncated ids on some legs; the
        // longest one is the canonical chain transaction id.
        let txid = action
            .in_legs
            .iter()
            .chain(action.out_legs.iter())
            .map(|leg| leg.tx_id.as_str())
            .max_by_key(|id| id.len())
            .unwrap_or("")
            .to_string();
        if txid.is_empty() {
            return Err(NormalizeError("action without a transaction id".to_string()));
        }

        let (memo, network_fees) = action
            .metadata
            .values()
            .next()
            .map(|meta| (meta.memo.clone(), meta.network_fees.clone()))
            .unwrap_or_default();

        let mut net: BTreeMap<String, i128> = BTreeMap::new();
        self.fold_legs(&action.in_legs, -1, &mut net);
        self.fold_legs(&action.out_legs, 1, &mut net);
        net.retain(|_, amount| *amount != 0);

        if net.is_empty() {
            return Ok(Normalized::Skip);
        }

        let mut fee = 0u128;
        for network_fee in &network_fees {
            if network_fee.asset != self.asset {
                continue;
            }
            if let Ok(amount) = network_fee.amount.parse::<u128>() {
                fee += amount;
            }
        }

        // The spender pays the network fee on top of the transferred value.
        if let Some(native) = net.get_mut(&self.asset) {
            if *native < 0 {
                *native -= fee as i128;
            }
        }

        let amount = net.get(&self.asset).copied().unwrap_or(0);
        let deltas: Vec<BalanceDelta> = net
            .into_iter()
            .map(|(asset, amount)| BalanceDelta { asset, amount })
            .collect();

        let transaction = Transaction {
            id: txid,
            timestamp,
            block_height: height,
            amount,
            fee,
            memo,
            raw_payload: Some(record.to_string()),
        };

        Ok(Normalized::Record {
            transaction,
            deltas,
        })
    }
}
