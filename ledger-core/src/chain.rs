//! The block chain and its wire snapshot

use crate::types::{Block, ChainStatus};
use crate::validation::{check_new_block, validate_chain, BlockViolation};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Default proof-of-work difficulty (leading zero hex digits)
pub const DEFAULT_DIFFICULTY: usize = 2;

/// Ordered, hash-linked sequence of blocks
///
/// A chain is never empty: it always starts with a genesis block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ChainRepr")]
pub struct Chain {
    /// Blocks in index order
    #[serde(rename = "chain")]
    blocks: Vec<Block>,

    /// Required leading zero hex digits
    difficulty: usize,
}

#[derive(Deserialize)]
struct ChainRepr {
    chain: Vec<Block>,
    difficulty: usize,
}

impl TryFrom<ChainRepr> for Chain {
    type Error = Error;

    fn try_from(repr: ChainRepr) -> Result<Self> {
        Chain::from_blocks(repr.chain, repr.difficulty)
    }
}

impl Chain {
    /// Genesis-only chain
    pub fn new(difficulty: usize) -> Self {
        Self {
            blocks: vec![Block::genesis()],
            difficulty,
        }
    }

    /// Build a chain from existing blocks without validating them
    pub fn from_blocks(blocks: Vec<Block>, difficulty: usize) -> Result<Self> {
        if blocks.is_empty() {
            return Err(Error::InvalidChain("chain has no genesis block".to_string()));
        }
        Ok(Self { blocks, difficulty })
    }

    /// All blocks in index order
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Head of the chain
    pub fn latest(&self) -> &Block {
        // Non-empty by construction
        &self.blocks[self.blocks.len() - 1]
    }

    /// Hash of the head block
    pub fn head_hash(&self) -> &str {
        &self.latest().hash
    }

    /// Number of blocks including genesis
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Always false; present for API symmetry with `len`
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Proof-of-work difficulty
    pub fn difficulty(&self) -> usize {
        self.difficulty
    }

    /// Check whether `block` may extend the head, without mutating
    pub fn check_append(&self, block: &Block) -> std::result::Result<(), BlockViolation> {
        check_new_block(self.latest(), block)
    }

    /// Append `block` if it links to the head, follows its index and carries
    /// a correct hash. Returns false and leaves the chain untouched otherwise.
    pub fn append(&mut self, block: Block) -> bool {
        match self.check_append(&block) {
            Ok(()) => {
                self.blocks.push(block);
                true
            }
            Err(violation) => {
                tracing::debug!(index = block.index, hash = %block.hash, %violation, "Block does not extend head");
                false
            }
        }
    }

    /// Validate every block hash and every link
    pub fn validate(&self) -> ChainStatus {
        validate_chain(&self.blocks)
    }

    /// Replace this chain wholesale.
    ///
    /// Callers must have checked `other.validate().valid` first; the chain
    /// itself never decides whether a replacement is acceptable.
    pub fn replace(&mut self, other: Chain) {
        *self = other;
    }

    /// Wire snapshot including the validation status
    pub fn snapshot(&self) -> ChainSnapshot {
        ChainSnapshot {
            chain: self.blocks.clone(),
            status: self.validate(),
            difficulty: self.difficulty,
        }
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new(DEFAULT_DIFFICULTY)
    }
}

/// Full chain as broadcast to peers and observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainSnapshot {
    /// Blocks in index order
    pub chain: Vec<Block>,

    /// Validation status as computed by the sender
    pub status: ChainStatus,

    /// Proof-of-work difficulty
    pub difficulty: usize,
}

impl ChainSnapshot {
    /// Convert into a chain. The sender's `status` is not trusted; callers
    /// re-validate.
    pub fn into_chain(self) -> Result<Chain> {
        Chain::from_blocks(self.chain, self.difficulty)
    }
}
