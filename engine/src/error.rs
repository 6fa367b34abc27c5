//! Error taxonomy for the block-and-ledger engine.
//!
//! Error *kinds* are policy, not a single flat enum: a malformed on-disk
//! file is `Format`, a peer object that is merely inconsistent is `Bad`,
//! one that is provably malicious is `Bad2`, a local disk/socket failure is
//! `Io`, and a terminal abort condition (e.g. an empty post-update ledger)
//! is `Empty`. `NotFound` is deliberately not an error — ledger lookups
//! return `Option`, not `Result`.
//!
//! [`EngineError`] carries those kinds. The block validator and ledger
//! updater each wrap it in their own outcome type so that callers (the sync
//! engine, a CLI) can route `Bad`/`Malicious` straight to peer punishment
//! without downcasting.

use thiserror::Error;

/// Crate-wide error kind.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Framing, size, sort order, or other on-disk invariant violation.
    #[error("bad format: {0}")]
    Format(String),

    /// A peer-supplied object is internally inconsistent but not provably
    /// malicious (bad linkage, a timestamp outside tolerance, and so on).
    #[error("bad: {0}")]
    Bad(String),

    /// A peer-supplied object is provably wrong (bad signature, Merkle root
    /// mismatch, a debit against a non-existent account, ...). Distinct from
    /// [`EngineError::Bad`] because it justifies pink-listing the peer.
    #[error("malicious: {0}")]
    Malicious(String),

    /// Local I/O failure. Never attributed to a peer.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// A terminal abort condition, such as a would-be-empty ledger after an
    /// update. Distinct from a format error: the inputs were individually
    /// well formed, but the operation must not be allowed to complete.
    #[error("empty result")]
    Empty,
}

/// Convenient result alias used throughout the crate.
pub type Result<T> = core::result::Result<T, EngineError>;

/// Classification returned by the block validator.
#[derive(Debug, Error)]
pub enum ValidatorError {
    /// Malformed but not provably malicious; may be a race or partial write.
    /// The candidate block is discarded; the peer is not punished.
    #[error("drop: {0}")]
    Drop(String),

    /// Provably malicious (bad signature, bad Merkle root, duplicate tx_id,
    /// debit without an account, and so on). The supplying peer should be
    /// pink-listed.
    #[error("bad-drop: {0}")]
    BadDrop(String),

    /// Local I/O or resource failure. Propagated upward; no peer penalty.
    #[error("bail: {0}")]
    Bail(#[from] std::io::Error),
}

impl ValidatorError {
    /// Maps a validator outcome onto a process-surface exit-code taxonomy
    /// (`0` valid, `1` local failure, `>= 2` protocol failure), for a CLI
    /// entry point that still shells out to validation.
    pub fn exit_code(&self) -> i32 {
        match self {
            ValidatorError::Bail(_) => 1,
            ValidatorError::Drop(_) => 2,
            ValidatorError::BadDrop(_) => 3,
        }
    }

    /// Whether this outcome justifies pink-listing the peer that supplied
    /// the block.
    pub fn is_malicious(&self) -> bool {
        matches!(self, ValidatorError::BadDrop(_))
    }
}

/// Result alias for the block validator.
pub type ValidatorResult<T> = core::result::Result<T, ValidatorError>;

/// Classification returned by the ledger updater.
#[derive(Debug, Error)]
pub enum UpdaterError {
    /// A delta is provably wrong: a debit against a non-existent account, or
    /// a debit amount that does not exactly match the balance.
    #[error("bad2: {0}")]
    Bad2(String),

    /// Any other failure: bad sort order, I/O, or an empty result.
    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// Result alias for the ledger updater.
pub type UpdaterResult<T> = core::result::Result<T, UpdaterError>;
