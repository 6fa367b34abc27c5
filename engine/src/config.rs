//! Consensus and runtime configuration for the block-and-ledger engine.
//!
//! [`Config`] centralises every tunable named in the engine's external
//! interface (version triggers, fee floor, buffer sizes, quorum bounds).
//! Fixed-size on-disk layouts (address length, tag length, signature field
//! widths) are **not** part of `Config` — they are compile-time `const`s
//! below, because they size arrays baked into the wire format and cannot
//! vary per network without changing the file format itself.
//!
//! `Config` is built with the same fluent-builder pattern as earlier engine
//! revisions, so callers can override only the fields they care about.

use serde::{Deserialize, Serialize};

/// Length in bytes of an on-disk [`crate::address::Address`].
pub const ADDR_LEN: usize = 64;
/// Length in bytes of the routing tag embedded in the last bytes of an address.
pub const TAG_LEN: usize = 12;
/// Width of a hash value (block hash, Merkle root, tx id).
pub const HASHLEN: usize = 32;
/// Width of the public-key material carried in a transaction's signature block.
pub const SIG_PUB_LEN: usize = 32;
/// Width of the signature bytes themselves.
pub const SIG_LEN: usize = 64;
/// Width of the per-transaction random suffix mixed into the signature message.
pub const RAND_LEN: usize = 32;
/// Maximum number of destinations an MTX may fan out to.
pub const MDST_NUM_DST: usize = 16;
/// Bytes needed for the dst-tag-resolved bitmap (one bit per destination).
pub const MTX_BITMAP_BYTES: usize = (MDST_NUM_DST + 7) / 8;
/// Size in bytes of the MTX destination table (tag + amount per entry, plus bitmap).
pub const MTX_TABLE_LEN: usize = MDST_NUM_DST * (TAG_LEN + 8) + MTX_BITMAP_BYTES;
/// Size of the overlay region shared by a plain `dst_addr` and an MTX table.
pub const OVERLAY_LEN: usize = if MTX_TABLE_LEN > ADDR_LEN { MTX_TABLE_LEN } else { ADDR_LEN };

/// Block number interval between neo-genesis checkpoints.
pub const NG_INTERVAL: u64 = 256;

/// Mochimo-compatible mainnet configuration values, overridable per network.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    /// Minimum transaction fee / dust threshold (`mfee`).
    pub mfee: u64,
    /// Maximum number of transactions in one block.
    pub max_bl_tx: u32,
    /// Block reward at genesis, before the inflation schedule kicks in.
    pub base_reward: u64,
    /// Maximum inter-block time window once `bridge_trigger` is crossed.
    pub bridge_seconds: u32,
    /// Block number past which the `bridge_seconds` window is enforced.
    pub bridge_trigger: u64,
    /// Wall-clock tolerance for a trailer's `stime` relative to `now`.
    pub clock_skew_seconds: u32,
    /// Block number past which memory-hard PoW replaces the legacy hash PoW.
    pub v24_trigger: u64,
    /// Block number past which MTX signature messages zero the resolved bitmap.
    pub mtx_trigger: u64,
    /// The one historical block number exempted from PoW verification.
    pub boxing_day_bnum: u64,
    /// The literal block hash required to satisfy the Boxing-Day exception.
    pub boxing_day_hash: [u8; HASHLEN],
    /// Buffer size used by the external merge sort of a delta file.
    pub le_bufsz: usize,
    /// Size of a peer-supplied trailer-proof array used in divergence checks.
    pub ntftx: usize,
    /// Maximum number of peers considered for a parallel catchup/quorum.
    pub max_quorum: usize,
    /// Per-block-number one-time balance reduction applied by `renew()`.
    pub sanctuary: u64,
    /// Block number at which the Sanctuary protocol fires, if `sanctuary > 0`.
    pub lastday: u64,
    /// Bounded retry count for a single block fetch during syncup.
    pub fetch_retries: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mfee: 500,
            max_bl_tx: 65_535,
            base_reward: 5_000_000_000,
            bridge_seconds: 4 * 60 * 60,
            bridge_trigger: 0,
            clock_skew_seconds: 300,
            v24_trigger: u64::MAX,
            mtx_trigger: 0,
            boxing_day_bnum: 0,
            boxing_day_hash: [0u8; HASHLEN],
            le_bufsz: 1 << 26,
            ntftx: 1024,
            max_quorum: 8,
            sanctuary: 0,
            lastday: 0,
            fetch_retries: 60,
        }
    }
}

/// Fluent builder for [`Config`].
pub struct ConfigBuilder {
    inner: Config,
}

impl ConfigBuilder {
    /// Starts a new builder pre-populated with [`Config::default`].
    pub fn new() -> Self {
        Self { inner: Config::default() }
    }

    pub fn mfee(mut self, mfee: u64) -> Self {
        self.inner.mfee = mfee;
        self
    }

    pub fn max_bl_tx(mut self, max: u32) -> Self {
        self.inner.max_bl_tx = max;
        self
    }

    pub fn base_reward(mut self, reward: u64) -> Self {
        self.inner.base_reward = reward;
        self
    }

    pub fn boxing_day(mut self, bnum: u64, hash: [u8; HASHLEN]) -> Self {
        self.inner.boxing_day_bnum = bnum;
        self.inner.boxing_day_hash = hash;
        self
    }

    pub fn v24_trigger(mut self, bnum: u64) -> Self {
        self.inner.v24_trigger = bnum;
        self
    }

    pub fn mtx_trigger(mut self, bnum: u64) -> Self {
        self.inner.mtx_trigger = bnum;
        self
    }

    pub fn sanctuary(mut self, sanctuary: u64, lastday: u64) -> Self {
        self.inner.sanctuary = sanctuary;
        self.inner.lastday = lastday;
        self
    }

    /// Consumes the builder, returning an immutable configuration value.
    pub fn finish(self) -> Config {
        self.inner
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
