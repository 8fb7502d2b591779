//! Rate-table fee estimation.
//!
//! Fees are simple arithmetic over an externally supplied rate table: a
//! flat component plus a proportional component per operation kind, with a
//! safety multiplier applied when the exact fee is not knowable until the
//! chain confirms the transaction. Estimation is deterministic and never
//! blocks.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const BPS_DENOMINATOR: u128 = 10_000;

/// Kinds of candidate operations a spend can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Plain value transfer to another address.
    Transfer,
    /// Chain-internal deposit (e.g. into a protocol module).
    Deposit,
}

/// Fee components for one operation kind.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct FeeRate {
    /// Flat fee in the asset's smallest unit.
    pub flat: u128,
    /// Proportional fee in basis points of the operation amount.
    pub proportional_bps: u128,
}

/// One candidate operation of a spend under estimation.
#[derive(Debug, Clone, Copy)]
pub struct SpendOperation {
    pub kind: OperationKind,
    pub amount: u128,
}

/// Deterministic fee estimator over a rate table.
#[derive(Debug, Clone)]
pub struct FeeEstimator {
    rates: HashMap<OperationKind, FeeRate>,
    /// Safety multiplier in basis points; 10_100 = 1.01x. Clamped to at
    /// least 10_000 so the estimate never undershoots the raw sum.
    safety_bps: u128,
}

impl FeeEstimator {
    pub fn new(rates: HashMap<OperationKind, FeeRate>, safety_bps: u128) -> Self {
        Self {
            rates,
            safety_bps: safety_bps.max(BPS_DENOMINATOR),
        }
    }

    /// Sum the applicable fees for the candidate operations. Operation
    /// kinds missing from the rate table contribute nothing.
    pub fn estimate(&self, operations: &[SpendOperation]) -> u128 {
        let mut fee = 0u128;
        for operation in operations {
            if let Some(rate) = self.rates.get(&operation.kind) {
                fee += rate.flat;
                fee += operation.amount * rate.proportional_bps / BPS_DENOMINATOR;
            }
        }
        // Round up so the safety margin never truncates to zero.
        fee.saturating_mul(self.safety_bps)
            .div_ceil(BPS_DENOMINATOR)
    }
}

impl Default for FeeEstimator {
    fn default() -> Self {
        Self::new(HashMap::new(), BPS_DENOMINATOR)
    }
}
