//! Wallet-local state persistence.
//!
//! The repository traits abstract where snapshots live so the engine can be
//! tested without a filesystem. The file-backed implementation writes a
//! JSON snapshot plus a small metadata sidecar, keyed by the hex-encoded
//! wallet address so arbitrary address strings stay filesystem-safe.

use crate::engine::types::{EngineError, WalletSnapshot};

use std::path::PathBuf;
use std::sync::Mutex;
use tracing::info;

/// Repository for wallet snapshot persistence
#[async_trait::async_trait]
pub trait WalletStateRepository: Send + Sync {
    async fn save(&self, snapshot: &WalletSnapshot) -> Result<(), EngineError>;
    async fn load(&self) -> Result<Option<WalletSnapshot>, EngineError>;
    async fn clear(&self) -> Result<(), EngineError>;
}

/// File-based implementation of WalletStateRepository
pub struct FileWalletStateRepository {
    data_dir: PathBuf,
    address: String,
}

impl FileWalletStateRepository {
    pub fn new(data_dir: PathBuf, address: impl Into<String>) -> Self {
        Self {
            data_dir,
            address: address.into(),
        }
    }

    fn snapshot_filename(&self) -> PathBuf {
        self.data_dir
            .join(format!("wallet_state_{}.json", hex::encode(&self.address)))
    }

    fn metadata_filename(&self) -> PathBuf {
        self.data_dir.join(format!(
            "wallet_state_{}.meta.json",
            hex::encode(&self.address)
        ))
    }
}

#[async_trait::async_trait]
impl WalletStateRepository for FileWalletStateRepository {
    async fn save(&self, snapshot: &WalletSnapshot) -> Result<(), EngineError> {
        tokio::fs::create_dir_all(&self.data_dir).await?;

        let metadata = serde_json::json!({
            "sync_height": snapshot.cursor.most_recent_height,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        tokio::fs::write(
            self.metadata_filename(),
            serde_json::to_string_pretty(&metadata)
                .map_err(|e| EngineError::Persistence(format!("serialize metadata: {}", e)))?,
        )
        .await?;

        let content = serde_json::to_string_pretty(snapshot)
            .map_err(|e| EngineError::Persistence(format!("serialize snapshot: {}", e)))?;
        let filename = self.snapshot_filename();
        tokio::fs::write(&filename, content).await?;

        info!(
            "Saved wallet snapshot to {:?} at height {}",
            filename, snapshot.cursor.most_recent_height
        );
        Ok(())
    }

    async fn load(&self) -> Result<Option<WalletSnapshot>, EngineError> {
        let filename = self.snapshot_filename();
        if !filename.exists() {
            return Ok(None);
        }

        let content = tokio::fs::read_to_string(&filename).await?;
        let snapshot: WalletSnapshot = serde_json::from_str(&content)
            .map_err(|e| EngineError::Persistence(format!("parse snapshot: {}", e)))?;

        info!(
            "Loaded wallet snapshot from {:?} at height {}",
            filename, snapshot.cursor.most_recent_height
        );
        Ok(Some(snapshot))
    }

    async fn clear(&self) -> Result<(), EngineError> {
        for path in [self.snapshot_filename(), self.metadata_filename()] {
            match tokio::fs::remove_file(&path).await {
                Ok(()) => info!("Removed {:?}", path),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

/// In-memory repository for ephemeral wallets and tests.
#[derive(Default)]
pub struct MemoryWalletStateRepository {
    snapshot: Mutex<Option<WalletSnapshot>>,
}

impl MemoryWalletStateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl WalletStateRepository for MemoryWalletStateRepository {
    async fn save(&self, snapshot: &WalletSnapshot) -> Result<(), EngineError> {
        *self.snapshot.lock().unwrap() = Some(snapshot.clone());
        Ok(())
    }

    async fn load(&self) -> Result<Option<WalletSnapshot>, EngineError> {
        Ok(self.snapshot.lock().unwrap().clone())
    }

    async fn clear(&self) -> Result<(), EngineError> {
        *self.snapshot.lock().unwrap() = None;
        Ok(())
    }
}
