//! The `Engine`: the single owner of chain state and the open ledger
//! handle. No ambient globals — every operation takes `&mut Engine` or
//! `&Engine`.

use crate::address::Address;
use crate::balance::Balance;
use crate::block::BlockTrailer;
use crate::chain_state::ChainState;
use crate::collab::{PeerTransport, PowVerifier, SignatureVerifier};
use crate::config::Config;
use crate::error::{EngineError, ValidatorResult};
use crate::fsutil;
use crate::ledger::Ledger;
use crate::sync::{self, Advertisement, SyncError};
use crate::validator::{self, ValidateOutcome};
use std::path::{Path, PathBuf};

/// A read-only summary of the chain tip and ledger size, the library
/// equivalent of the original interactive monitor's status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipSummary {
    pub bnum: u64,
    pub bhash: [u8; 32],
    pub mfee: Balance,
    pub difficulty: u32,
    pub time0: u32,
    pub ledger_entries: usize,
}

/// Owns the persistent state a node needs between block validations:
/// `ChainState`, the open `Ledger`, and the directories its file contracts
/// live in. `state_dir` holds `global.dat`/`ledger.dat`/`tfile.dat`;
/// `work_dir` holds the transient `rblock.dat`/`vblock.dat`/`ltran.dat`
/// files a single validation pass produces.
pub struct Engine {
    chain: ChainState,
    ledger: Ledger,
    cfg: Config,
    state_dir: PathBuf,
    work_dir: PathBuf,
}

impl Engine {
    /// Opens an existing node directory: reads `global.dat` and opens
    /// `ledger.dat`. Both must already exist; a fresh node is bootstrapped
    /// by [`Engine::bootstrap`].
    pub fn open(state_dir: impl AsRef<Path>, work_dir: impl AsRef<Path>, cfg: Config) -> Result<Self, EngineError> {
        let state_dir = state_dir.as_ref().to_path_buf();
        let work_dir = work_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&work_dir).map_err(EngineError::Io)?;
        let global_bytes = std::fs::read(state_dir.join("global.dat")).map_err(EngineError::Io)?;
        let mut cursor = &global_bytes[..];
        let chain = ChainState::read_from(&mut cursor).map_err(EngineError::Io)?;
        let ledger = Ledger::open(state_dir.join("ledger.dat"))?;
        Ok(Engine { chain, ledger, cfg, state_dir, work_dir })
    }

    /// Bootstraps a fresh node directory from a neo-genesis ledger snapshot
    /// already extracted to `ledger_path` (see [`crate::ledger::Ledger::extract`]).
    pub fn bootstrap(
        state_dir: impl AsRef<Path>,
        work_dir: impl AsRef<Path>,
        cfg: Config,
        chain: ChainState,
        ledger_path: &Path,
    ) -> Result<Self, EngineError> {
        let state_dir = state_dir.as_ref().to_path_buf();
        let work_dir = work_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&state_dir).map_err(EngineError::Io)?;
        std::fs::create_dir_all(&work_dir).map_err(EngineError::Io)?;
        let dest = state_dir.join("ledger.dat");
        if ledger_path != dest.as_path() {
            std::fs::copy(ledger_path, &dest).map_err(EngineError::Io)?;
        }
        let ledger = Ledger::open(&dest)?;
        let mut engine = Engine { chain, ledger, cfg, state_dir, work_dir };
        engine.persist_chain_state()?;
        Ok(engine)
    }

    pub fn chain(&self) -> &ChainState {
        &self.chain
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    pub fn describe_tip(&self) -> TipSummary {
        TipSummary {
            bnum: self.chain.cblocknum,
            bhash: self.chain.cblockhash,
            mfee: self.chain.mfee,
            difficulty: self.chain.difficulty,
            time0: self.chain.time0,
            ledger_entries: self.ledger.len(),
        }
    }

    /// Runs the Block Validator against `rblock_path`, then applies the
    /// resulting delta file to the ledger and advances chain state in
    /// lockstep — the in-process equivalent of the original `bval`
    /// subprocess call plus its caller applying `ltran.dat`.
    pub fn validate_block(
        &mut self,
        rblock_path: &Path,
        now: u32,
        pow: &dyn PowVerifier,
        sig: &dyn SignatureVerifier,
    ) -> ValidatorResult<ValidateOutcome> {
        let vblock = self.work_dir.join("vblock.dat");
        let ltran = self.work_dir.join("ltran.dat");
        let outcome = validator::validate_block(
            rblock_path,
            &vblock,
            &ltran,
            &self.chain,
            &self.ledger,
            &self.cfg,
            now,
            pow,
            sig,
        )?;
        self.ledger
            .update(&ltran, &self.cfg)
            .map_err(|e| crate::error::ValidatorError::Bail(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        self.advance_chain(&outcome);
        self.persist_chain_state()
            .map_err(|e| crate::error::ValidatorError::Bail(std::io::Error::new(std::io::ErrorKind::Other, e.to_string())))?;
        Ok(outcome)
    }

    /// Applies the Sanctuary protocol if due.
    pub fn renew(&mut self) -> Result<(), EngineError> {
        self.ledger.renew(&self.cfg, &mut self.chain)?;
        self.persist_chain_state()
    }

    /// Catches up to `target_cblock` from `peer` starting at the
    /// neo-genesis checkpoint `bnum_ng`.
    pub fn catchup<T>(
        &mut self,
        transport: &T,
        peer: &T::PeerId,
        bnum_ng: u64,
        target_cblock: u64,
        now: u32,
        pow: &dyn PowVerifier,
        sig: &dyn SignatureVerifier,
    ) -> Result<(), SyncError>
    where
        T: PeerTransport + Sync,
        T::PeerId: Send + Sync,
    {
        sync::catchup(
            transport,
            peer,
            &mut self.ledger,
            &mut self.chain,
            &self.cfg,
            bnum_ng,
            target_cblock,
            &self.work_dir,
            now,
            pow,
            sig,
        )?;
        self.persist_chain_state()?;
        Ok(())
    }

    /// Replays a divergent peer chain from `split_bnum` through
    /// `peer_cblock`, backing up state and rolling back on failure.
    pub fn syncup<T>(
        &mut self,
        transport: &T,
        peer: &T::PeerId,
        backup_dir: &Path,
        split_bnum: u64,
        peer_cblock: u64,
        now: u32,
        pow: &dyn PowVerifier,
        sig: &dyn SignatureVerifier,
    ) -> Result<(), SyncError>
    where
        T: PeerTransport + Sync,
        T::PeerId: Send + Sync,
    {
        let ledger_path = self.state_dir.join("ledger.dat");
        sync::syncup(
            transport,
            peer,
            &self.state_dir,
            backup_dir,
            &ledger_path,
            &mut self.chain,
            &self.cfg,
            split_bnum,
            peer_cblock,
            &self.work_dir,
            now,
            pow,
            sig,
        )?;
        self.ledger = Ledger::open(&ledger_path)?;
        self.persist_chain_state()?;
        Ok(())
    }

    /// Validates a freshly fetched `tfile_path` and confirms its final
    /// `(bnum, weight)` matches what the peer advertised, starting the walk
    /// from this engine's current chain state. Returns the validated
    /// `(bnum, weight)` on success.
    pub fn validate_fetched_tfile<P>(
        &self,
        tfile_path: &Path,
        advertisement: &Advertisement<P>,
        now: u32,
        pow: &dyn PowVerifier,
    ) -> Result<(u64, [u8; 32]), SyncError> {
        sync::validate_tfile_against_advertisement(tfile_path, &self.cfg, &self.chain, advertisement, now, pow)
    }

    /// Resolves a divergence against `advertisement`: validates the peer's
    /// trailer-proof array against our own tfile, locates the split point,
    /// and replays from there through the peer's advertised tip.
    #[allow(clippy::too_many_arguments)]
    pub fn resolve_divergence<T>(
        &mut self,
        transport: &T,
        advertisement: &Advertisement<T::PeerId>,
        peer_proof: &[BlockTrailer],
        backup_dir: &Path,
        now: u32,
        pow: &dyn PowVerifier,
        sig: &dyn SignatureVerifier,
    ) -> Result<(), SyncError>
    where
        T: PeerTransport + Sync,
        T::PeerId: Send + Sync,
    {
        let tfile_path = self.state_dir.join("tfile.dat");
        let ledger_path = self.state_dir.join("ledger.dat");
        sync::resolve_divergence(
            transport,
            advertisement,
            peer_proof,
            &tfile_path,
            &ledger_path,
            &mut self.chain,
            &self.cfg,
            &self.state_dir,
            backup_dir,
            &self.work_dir,
            now,
            pow,
            sig,
        )?;
        self.ledger = Ledger::open(&ledger_path)?;
        self.persist_chain_state()?;
        Ok(())
    }

    fn advance_chain(&mut self, outcome: &ValidateOutcome) {
        self.chain.prevhash = self.chain.cblockhash;
        self.chain.cblocknum = outcome.bnum;
        self.chain.cblockhash = outcome.bhash;
        self.chain.mfee = outcome.mfee;
        self.chain.difficulty = outcome.difficulty;
        self.chain.time0 = outcome.stime;
    }

    fn persist_chain_state(&self) -> Result<(), EngineError> {
        let mut bytes = Vec::new();
        self.chain.write_to(&mut bytes).map_err(EngineError::Io)?;
        fsutil::atomic_write(&self.state_dir.join("global.dat"), &bytes)
    }
}

/// Miner address placeholder used by callers that have not yet configured
/// their own reward address; not a consensus constant.
pub const NO_MINER: Address = Address::ZERO;
