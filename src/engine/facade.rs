//! Wallet engine facade and lifecycle.
//!
//! `WalletEngine` wires the data source, normalizer, ledger, scheduler and
//! persistence together and exposes the lifecycle and query operations the
//! enclosing wallet consumes. One engine instance exclusively owns one
//! wallet's cursor, ledger and dirty flag.

use crate::engine::fees::{FeeEstimator, OperationKind, SpendOperation};
use crate::engine::ledger::TxLedger;
use crate::engine::normalize::RecordNormalizer;
use crate::engine::persistence::WalletStateRepository;
use crate::engine::scheduler::PollScheduler;
use crate::engine::sync::run_transaction_sync;
use crate::engine::types::{
    EngineCallbacks, EngineError, SpendRequest, Transaction, WalletLocalState, WalletSnapshot,
};
use crate::source::ChainSource;

use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, info, warn};

const BLOCKCHAIN_POLL_INTERVAL: Duration = Duration::from_secs(20);
const BALANCE_POLL_INTERVAL: Duration = Duration::from_secs(5);
const TRANSACTION_POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Static configuration for one wallet engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Native asset code (e.g. "THOR.RUNE").
    pub asset: String,
    /// Additional tracked asset codes sharing the same feed.
    pub tokens: Vec<String>,
    /// Wallet address on the chain.
    pub address: String,
    /// Minimum balance that must stay untouched by spends (existential
    /// deposit / chain reserve).
    pub reserve: i128,
    pub block_height_poll_interval: Duration,
    pub balance_poll_interval: Duration,
    pub transaction_poll_interval: Duration,
}

impl EngineConfig {
    pub fn new(asset: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            asset: asset.into(),
            tokens: Vec::new(),
            address: address.into(),
            reserve: 0,
            block_height_poll_interval: BLOCKCHAIN_POLL_INTERVAL,
            balance_poll_interval: BALANCE_POLL_INTERVAL,
            transaction_poll_interval: TRANSACTION_POLL_INTERVAL,
        }
    }

    fn tracked_assets(&self) -> Vec<String> {
        let mut assets = vec![self.asset.clone()];
        assets.extend(self.tokens.iter().cloned());
        assets
    }
}

struct EngineInner {
    config: EngineConfig,
    source: Arc<dyn ChainSource>,
    normalizer: Arc<dyn RecordNormalizer>,
    repository: Arc<dyn WalletStateRepository>,
    callbacks: Arc<dyn EngineCallbacks>,
    fee_estimator: FeeEstimator,
    state: Mutex<WalletLocalState>,
    ledger: Mutex<TxLedger>,
    scheduler: PollScheduler,
    /// Set while a kill is in progress; sync passes check it between pages.
    shutdown: AtomicBool,
}

/// The engine facade. Cheap to clone; all clones share one wallet's state.
#[derive(Clone)]
pub struct WalletEngine {
    inner: Arc<EngineInner>,
}

impl WalletEngine {
    pub fn new(
        config: EngineConfig,
        source: Arc<dyn ChainSource>,
        normalizer: Arc<dyn RecordNormalizer>,
        repository: Arc<dyn WalletStateRepository>,
        callbacks: Arc<dyn EngineCallbacks>,
        fee_estimator: FeeEstimator,
    ) -> Self {
        let mut state = WalletLocalState::default();
        for asset in config.tracked_assets() {
            state.check_status.insert(asset, 0.0);
        }

        Self {
            inner: Arc::new(EngineInner {
                config,
                source,
                normalizer,
                repository,
                callbacks,
                fee_estimator,
                state: Mutex::new(state),
                ledger: Mutex::new(TxLedger::new()),
                scheduler: PollScheduler::new(),
                shutdown: AtomicBool::new(false),
            }),
        }
    }

    /// Load persisted state and start the poll loops.
    pub async fn start_engine(&self) -> Result<(), EngineError> {
        info!(address = %self.inner.config.address, "Starting wallet engine");
        self.inner.shutdown.store(false, Ordering::SeqCst);

        if let Some(snapshot) = self.inner.repository.load().await? {
            let mut state = self.inner.state.lock().unwrap();
            state.cursor = snapshot.cursor;
            state.block_height = snapshot.block_height;
            for (asset, fraction) in snapshot.check_status {
                state.check_status.insert(asset, fraction);
            }
            state.dirty = false;
            drop(state);
            self.inner
                .ledger
                .lock()
                .unwrap()
                .seed(snapshot.transactions, snapshot.balances);
        }

        let engine = self.clone();
        self.inner.scheduler.schedule(
            "query_blockheight",
            self.inner.config.block_height_poll_interval,
            move || {
                let engine = engine.clone();
                async move { engine.query_blockheight().await }
            },
        );

        let engine = self.clone();
        self.inner.scheduler.schedule(
            "query_balance",
            self.inner.config.balance_poll_interval,
            move || {
                let engine = engine.clone();
                async move { engine.query_balance().await }
            },
        );

        let engine = self.clone();
        self.inner.scheduler.schedule(
            "query_transactions",
            self.inner.config.transaction_poll_interval,
            move || {
                let engine = engine.clone();
                async move { engine.query_transactions().await }
            },
        );

        Ok(())
    }

    /// Stop all poll loops, then flush pending state. An in-flight sync
    /// pass finishes its current page but starts no new one.
    pub async fn kill_engine(&self) -> Result<(), EngineError> {
        info!(address = %self.inner.config.address, "Stopping wallet engine");
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.scheduler.cancel_all().await;
        self.flush_if_dirty().await
    }

    /// Kill, clear all chain-derived caches, and start again. Balances and
    /// history recompute from scratch by replay from genesis.
    pub async fn resync_blockchain(&self) -> Result<(), EngineError> {
        info!(address = %self.inner.config.address, "Resyncing blockchain");
        self.kill_engine().await?;

        {
            let mut state = self.inner.state.lock().unwrap();
            state.cursor = Default::default();
            state.block_height = 0;
            state.dirty = false;
            for fraction in state.check_status.values_mut() {
                *fraction = 0.0;
            }
        }
        self.inner.ledger.lock().unwrap().clear();
        self.inner.repository.clear().await?;

        self.start_engine().await
    }

    /// Fetch the chain tip and advance the stored height monotonically.
    pub async fn query_blockheight(&self) -> Result<(), EngineError> {
        let height = self.inner.source.fetch_block_height().await?;

        let changed = {
            let mut state = self.inner.state.lock().unwrap();
            if height > state.block_height {
                state.block_height = height;
                state.dirty = true;
                true
            } else {
                false
            }
        };

        if changed {
            debug!(height, "Block height advanced");
            self.inner.callbacks.on_block_height_changed(height);
        }
        Ok(())
    }

    /// Reconcile ledger balances against the source's authoritative
    /// figures.
    pub async fn query_balance(&self) -> Result<(), EngineError> {
        let balances = self.inner.source.fetch_balances().await?;

        let mut changes = Vec::new();
        {
            let mut ledger = self.inner.ledger.lock().unwrap();
            for (asset, amount) in balances {
                if ledger.set_balance(&asset, amount) {
                    changes.push((asset, amount));
                }
            }
        }

        if !changes.is_empty() {
            self.inner.state.lock().unwrap().dirty = true;
            for (asset, amount) in &changes {
                debug!(asset = %asset, amount, "Balance changed");
                self.inner.callbacks.on_balance_changed(asset, *amount);
            }
            self.flush_if_dirty().await?;
        }
        Ok(())
    }

    /// Run one transaction sync pass: page through the source from the
    /// stored cursor, merge new records, advance the cursor, and report
    /// changes upward.
    pub async fn query_transactions(&self) -> Result<(), EngineError> {
        let start_cursor = {
            let mut state = self.inner.state.lock().unwrap();
            for asset in self.inner.config.tracked_assets() {
                state.check_status.insert(asset, 0.0);
            }
            state.cursor.clone()
        };

        let report = run_transaction_sync(
            self.inner.source.as_ref(),
            self.inner.normalizer.as_ref(),
            &start_cursor,
            &self.inner.ledger,
            &self.inner.shutdown,
        )
        .await?;

        if report.cancelled {
            return Ok(());
        }

        {
            let mut state = self.inner.state.lock().unwrap();
            if report.advanced {
                state.cursor = report.cursor.clone();
                state.dirty = true;
            }
            for asset in self.inner.config.tracked_assets() {
                state.check_status.insert(asset, 1.0);
            }
        }
        self.inner
            .callbacks
            .on_addresses_checked(self.check_progress());

        let changed = self.inner.ledger.lock().unwrap().drain_changed();
        if !changed.is_empty() {
            self.inner.callbacks.on_transactions_changed(&changed);
        }

        self.flush_if_dirty().await
    }

    /// Build an unsigned spend transaction after validating funds against
    /// the spendable balance (balance minus the configured reserve).
    pub async fn make_spend(&self, request: SpendRequest) -> Result<Transaction, EngineError> {
        if request.targets.len() != 1 {
            return Err(EngineError::InvalidSpend(
                "exactly one spend target is supported".to_string(),
            ));
        }
        let target = &request.targets[0];
        if target.amount <= 0 {
            return Err(EngineError::InvalidSpend(
                "spend amount must be positive".to_string(),
            ));
        }

        let balance = self.balance(&request.asset);
        let spendable = balance - self.inner.config.reserve;
        if target.amount > spendable {
            return Err(EngineError::InsufficientFunds {
                asset: request.asset,
                required: target.amount,
                spendable,
            });
        }

        let fee = self.inner.fee_estimator.estimate(&[SpendOperation {
            kind: OperationKind::Transfer,
            amount: target.amount as u128,
        }]);

        debug!(
            asset = %request.asset,
            amount = target.amount,
            fee,
            to = %target.address,
            "Built unsigned spend"
        );

        // Net effect on the wallet: the spent amount plus the fee leave.
        Ok(Transaction {
            id: String::new(),
            timestamp: 0,
            block_height: 0,
            amount: -(target.amount) - fee as i128,
            fee,
            memo: request.memo,
            raw_payload: None,
        })
    }

    /// Signing requires chain-specific cryptography supplied by an external
    /// collaborator.
    pub async fn sign_transaction(&self, _tx: &Transaction) -> Result<Transaction, EngineError> {
        Err(EngineError::Unimplemented("sign_transaction"))
    }

    /// Broadcast requires a chain-specific node connection supplied by an
    /// external collaborator.
    pub async fn broadcast_transaction(
        &self,
        _tx: &Transaction,
    ) -> Result<Transaction, EngineError> {
        Err(EngineError::Unimplemented("broadcast_transaction"))
    }

    pub fn balance(&self, asset: &str) -> i128 {
        self.inner.ledger.lock().unwrap().balance(asset)
    }

    /// All known transactions, newest first.
    pub fn transactions(&self) -> Vec<Transaction> {
        self.inner.ledger.lock().unwrap().transactions()
    }

    pub fn block_height(&self) -> u64 {
        self.inner.state.lock().unwrap().block_height
    }

    /// Aggregate sync completion fraction across tracked assets.
    pub fn check_progress(&self) -> f64 {
        let state = self.inner.state.lock().unwrap();
        if state.check_status.is_empty() {
            return 0.0;
        }
        state.check_status.values().sum::<f64>() / state.check_status.len() as f64
    }

    /// Persist a snapshot when in-memory state has diverged from the last
    /// one. The dirty flag is cleared only after a successful save.
    async fn flush_if_dirty(&self) -> Result<(), EngineError> {
        let snapshot = {
            let state = self.inner.state.lock().unwrap();
            if !state.dirty {
                return Ok(());
            }
            let ledger = self.inner.ledger.lock().unwrap();
            WalletSnapshot {
                cursor: state.cursor.clone(),
                block_height: state.block_height,
                balances: ledger.balances(),
                check_status: state.check_status.clone(),
                transactions: ledger.transactions(),
            }
        };

        if let Err(e) = self.inner.repository.save(&snapshot).await {
            warn!("Failed to persist wallet snapshot: {}", e);
            return Err(e);
        }
        self.inner.state.lock().unwrap().dirty = false;
        Ok(())
    }

    #[cfg(test)]
    fn is_dirty(&self) -> bool {
        self.inner.state.lock().unwrap().dirty
    }
}
