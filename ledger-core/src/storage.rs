//! Chain persistence
//!
//! The ledger consults a [`ChainStore`] once at startup and after every
//! committed mutation.
//!
//! # Column Families (RocksDB)
//!
//! - `blocks` - One JSON block per key (key: big-endian block index)
//! - `meta` - Chain metadata (key: `difficulty`)

use crate::{
    chain::Chain,
    error::{Error, Result},
    types::Block,
    Config,
};
use parking_lot::Mutex;
use rocksdb::{BoundColumnFamily, ColumnFamilyDescriptor, IteratorMode, Options, WriteBatch, DB};
use std::sync::Arc;

/// Column family names
const CF_BLOCKS: &str = "blocks";
const CF_META: &str = "meta";

const META_DIFFICULTY: &[u8] = b"difficulty";

/// Durable home for the local chain
pub trait ChainStore: Send + Sync {
    /// Load the persisted chain, `None` if nothing was ever saved
    fn load(&self) -> Result<Option<Chain>>;

    /// Persist the whole chain, replacing whatever was stored
    fn save(&self, chain: &Chain) -> Result<()>;
}

/// RocksDB-backed chain store
pub struct RocksStore {
    db: Arc<DB>,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore").field("path", &self.db.path()).finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(config: &Config) -> Result<Self> {
        let path = &config.data_dir;

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_BLOCKS, Self::cf_options_blocks()),
            ColumnFamilyDescriptor::new(CF_META, Options::default()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB chain store at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options_blocks() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<Arc<BoundColumnFamily<'_>>> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }
}

impl ChainStore for RocksStore {
    fn load(&self) -> Result<Option<Chain>> {
        let cf_meta = self.cf_handle(CF_META)?;
        let difficulty = match self.db.get_cf(&cf_meta, META_DIFFICULTY)? {
            Some(bytes) => {
                let raw: [u8; 8] = bytes
                    .as_slice()
                    .try_into()
                    .map_err(|_| Error::Storage("Corrupt difficulty record".to_string()))?;
                u64::from_be_bytes(raw) as usize
            }
            None => return Ok(None),
        };

        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let mut blocks = Vec::new();
        for item in self.db.iterator_cf(&cf_blocks, IteratorMode::Start) {
            let (_, value) = item?;
            let block: Block = serde_json::from_slice(&value)?;
            blocks.push(block);
        }

        tracing::debug!(blocks = blocks.len(), difficulty, "Loaded chain from RocksDB");
        Chain::from_blocks(blocks, difficulty).map(Some)
    }

    fn save(&self, chain: &Chain) -> Result<()> {
        let cf_blocks = self.cf_handle(CF_BLOCKS)?;
        let cf_meta = self.cf_handle(CF_META)?;

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_meta, META_DIFFICULTY, (chain.difficulty() as u64).to_be_bytes());

        for block in chain.blocks() {
            batch.put_cf(&cf_blocks, block.index.to_be_bytes(), serde_json::to_vec(block)?);
        }

        // Drop the tail left over from a longer chain that was replaced
        batch.delete_range_cf(
            &cf_blocks,
            (chain.len() as u64).to_be_bytes(),
            u64::MAX.to_be_bytes(),
        );

        // Atomic commit
        self.db.write(batch)?;

        tracing::trace!(blocks = chain.len(), "Chain written to RocksDB");
        Ok(())
    }
}

/// In-memory chain store
///
/// Clones share the same slot, so a test can keep a handle to inspect what
/// the ledger persisted.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    slot: Arc<Mutex<Option<Chain>>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-seeded with `chain`
    pub fn with_chain(chain: Chain) -> Self {
        Self {
            slot: Arc::new(Mutex::new(Some(chain))),
        }
    }

    /// Last saved chain
    pub fn snapshot(&self) -> Option<Chain> {
        self.slot.lock().clone()
    }
}

impl ChainStore for MemoryStore {
    fn load(&self) -> Result<Option<Chain>> {
        Ok(self.slot.lock().clone())
    }

    fn save(&self, chain: &Chain) -> Result<()> {
        *self.slot.lock() = Some(chain.clone());
        Ok(())
    }
}
