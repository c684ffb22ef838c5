use crate::block::Block;
use crate::error::Result;
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};

/// Persistence seam for the node's chain. Storage layout is an implementation detail
/// of each store; the ledger only ever sees whole chains.
pub trait ChainStore {
    /// `Ok(None)` when nothing has been saved yet.
    fn load(&self) -> Result<Option<Vec<Block>>>;
    fn save(&self, chain: &[Block]) -> Result<()>;
}

/// Pretty-printed JSON at `<data_dir>/blockchain.json`.
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub const FILE_NAME: &'static str = "blockchain.json";

    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        JsonFileStore {
            path: data_dir.as_ref().join(Self::FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ChainStore for JsonFileStore {
    fn load(&self) -> Result<Option<Vec<Block>>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let data = fs::read_to_string(&self.path)?;
        let chain: Vec<Block> = serde_json::from_str(&data)?;
        log::info!(
            "Loaded {} blocks from {}",
            chain.len(),
            self.path.display()
        );
        Ok(Some(chain))
    }

    fn save(&self, chain: &[Block]) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            fs::create_dir_all(dir)?;
        }
        // write-then-rename so a crash never leaves a half-written chain
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serde_json::to_string_pretty(chain)?)?;
        fs::rename(&tmp, &self.path)?;
        log::debug!("Saved {} blocks to {}", chain.len(), self.path.display());
        Ok(())
    }
}

/// Keeps the last saved chain in memory. Used by tests and ephemeral nodes.
#[derive(Default)]
pub struct MemoryStore {
    chain: Mutex<Option<Vec<Block>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved_len(&self) -> Option<usize> {
        self.chain.lock().as_ref().map(Vec::len)
    }
}

impl ChainStore for MemoryStore {
    fn load(&self) -> Result<Option<Vec<Block>>> {
        Ok(self.chain.lock().clone())
    }

    fn save(&self, chain: &[Block]) -> Result<()> {
        *self.chain.lock() = Some(chain.to_vec());
        Ok(())
    }
}
