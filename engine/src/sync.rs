//! The Sync Engine: trailer-file fetch and validation, neo-genesis
//! extraction, parallel catchup, and divergence/syncup replay.

use crate::block::BlockTrailer;
use crate::chain_state::ChainState;
use crate::collab::{PeerTransport, PowVerifier, SignatureVerifier};
use crate::config::{Config, NG_INTERVAL};
use crate::error::{EngineError, UpdaterError, ValidatorError};
use crate::fsutil;
use crate::ledger::Ledger;
use crate::trailer_gate;
use crate::validator::{self, ValidateOutcome};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::mpsc;
use thiserror::Error;

/// What a peer advertised: the tip it claims and that tip's cumulative
/// fork-choice weight. A quorum is a set of peers that independently
/// advertised the same `(cblock, weight)` tuple.
#[derive(Debug, Clone)]
pub struct Advertisement<P> {
    pub peer: P,
    pub cblock: u64,
    pub weight: [u8; 32],
}

/// Groups `ads` by their claimed `(cblock, weight)` tuple and returns the
/// tuple with the most independent agreement, along with the peers that
/// advertised it — `None` if no tuple reaches `min_agree` agreeing peers.
pub fn select_quorum<P: Clone + Eq>(ads: &[Advertisement<P>], min_agree: usize) -> Option<(u64, [u8; 32], Vec<P>)> {
    let mut groups: Vec<(u64, [u8; 32], Vec<P>)> = Vec::new();
    for ad in ads {
        match groups.iter_mut().find(|(c, w, _)| *c == ad.cblock && *w == ad.weight) {
            Some(group) => group.2.push(ad.peer.clone()),
            None => groups.push((ad.cblock, ad.weight, vec![ad.peer.clone()])),
        }
    }
    groups.into_iter().filter(|(_, _, peers)| peers.len() >= min_agree).max_by_key(|(_, _, peers)| peers.len())
}

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("peer transport failure: {0}")]
    Transport(String),
    #[error("quorum exhausted before a usable peer was found")]
    QuorumExhausted,
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Validator(#[from] ValidatorError),
    #[error(transparent)]
    Updater(#[from] UpdaterError),
    #[error("peer tfile disagrees with its own advertisement")]
    AdvertisementMismatch,
    #[error("no split point found in peer's trailer-proof array")]
    NoSplitPoint,
    #[error("peer's divergence proof is not exactly NTFTX trailers long")]
    ProofLengthMismatch,
    #[error("syncup failed and was rolled back: {0}")]
    SyncupFailed(String),
}

/// Block number of the last neo-genesis checkpoint at or before `cblock`.
pub fn neo_genesis_bnum(cblock: u64) -> u64 {
    (cblock / NG_INTERVAL) * NG_INTERVAL
}

/// Adds a 128-bit per-block contribution into a 256-bit big-endian
/// cumulative weight counter, propagating carry toward the most significant
/// byte.
pub fn add_weight(weight: &mut [u8; 32], contribution: u128) {
    let bytes = contribution.to_be_bytes();
    let mut carry: u16 = 0;
    for i in 0..32 {
        let idx = 31 - i;
        let add = if i < 16 { bytes[15 - i] as u16 } else { 0 };
        let sum = weight[idx] as u16 + add + carry;
        weight[idx] = (sum & 0xFF) as u8;
        carry = sum >> 8;
    }
}

/// A per-block weight contribution. The reference design weighs a block by
/// `2^difficulty`, clamped so the shift never overflows a `u128`.
fn weight_contribution(difficulty: u32) -> u128 {
    1u128.checked_shl(difficulty.min(127)).unwrap_or(u128::MAX)
}

/// **(a) Tfile fetch.** Tries each peer in order, writing into a temp file
/// and atomically renaming it over `tfile_path` on success. Drops a peer
/// that fails and tries the next; returns [`SyncError::QuorumExhausted`] if
/// none succeed.
pub fn fetch_tfile<T: PeerTransport>(
    transport: &T,
    peers: &mut Vec<T::PeerId>,
    tfile_path: &Path,
) -> Result<T::PeerId, SyncError> {
    while let Some(peer) = peers.first().cloned() {
        let tmp = fsutil::temp_sibling(tfile_path);
        match transport.fetch_tfile(&peer, &tmp) {
            Ok(()) => {
                fs::rename(&tmp, tfile_path).map_err(EngineError::Io)?;
                return Ok(peer);
            }
            Err(e) => {
                tracing::warn!(error = %e, "tfile fetch failed, dropping peer");
                transport.pink_list(&peer);
                peers.remove(0);
            }
        }
    }
    Err(SyncError::QuorumExhausted)
}

/// **(b) Tfile validation.** Walks every trailer in `tfile_path`, applying
/// the trailer gate between successive trailers and accumulating cumulative
/// weight. `starting_chain` is the chain state immediately preceding the
/// first trailer in the file. Returns the final `(bnum, weight)`.
pub fn validate_tfile(
    tfile_path: &Path,
    cfg: &Config,
    starting_chain: &ChainState,
    now: u32,
    pow: &dyn PowVerifier,
) -> Result<(u64, [u8; 32]), SyncError> {
    let bytes = fs::read(tfile_path).map_err(EngineError::Io)?;
    if bytes.len() % BlockTrailer::LEN != 0 {
        return Err(EngineError::Format("tfile size is not a multiple of the trailer size".into()).into());
    }
    let mut chain = starting_chain.clone();
    let mut weight = starting_chain.weight;
    let mut cursor = &bytes[..];
    while !cursor.is_empty() {
        let trailer = BlockTrailer::read_from(&mut cursor).map_err(EngineError::Io)?;
        trailer_gate::check(&trailer, &chain, cfg, now, pow)?;
        add_weight(&mut weight, weight_contribution(trailer.difficulty));
        chain.cblocknum = trailer.bnum;
        chain.prevhash = chain.cblockhash;
        chain.cblockhash = trailer.bhash;
        chain.mfee = trailer.mfee;
        chain.difficulty = trailer.difficulty;
        chain.time0 = trailer.stime;
    }
    Ok((chain.cblocknum, weight))
}

/// Validates `tfile_path` and checks the resulting `(bnum, weight)` against
/// what the peer advertised. A mismatch means the peer's tfile disagrees
/// with its own advertisement and the peer is bad.
pub fn validate_tfile_against_advertisement<P>(
    tfile_path: &Path,
    cfg: &Config,
    starting_chain: &ChainState,
    advertisement: &Advertisement<P>,
    now: u32,
    pow: &dyn PowVerifier,
) -> Result<(u64, [u8; 32]), SyncError> {
    let (bnum, weight) = validate_tfile(tfile_path, cfg, starting_chain, now, pow)?;
    if bnum != advertisement.cblock || weight != advertisement.weight {
        return Err(SyncError::AdvertisementMismatch);
    }
    Ok((bnum, weight))
}

/// Reduces a cumulative weight back to the value it held at `target_bnum`
/// (inclusive) by walking the tfile and subtracting every later trailer's
/// contribution back off.
pub fn past_weight(tfile_path: &Path, target_bnum: u64) -> Result<[u8; 32], SyncError> {
    let bytes = fs::read(tfile_path).map_err(EngineError::Io)?;
    if bytes.len() % BlockTrailer::LEN != 0 {
        return Err(EngineError::Format("tfile size is not a multiple of the trailer size".into()).into());
    }
    let mut weight = [0u8; 32];
    let mut cursor = &bytes[..];
    while !cursor.is_empty() {
        let trailer = BlockTrailer::read_from(&mut cursor).map_err(EngineError::Io)?;
        if trailer.bnum > target_bnum {
            break;
        }
        add_weight(&mut weight, weight_contribution(trailer.difficulty));
    }
    Ok(weight)
}

/// Reads the contiguous run of trailers starting at `low_bnum` out of a
/// tfile, for comparison against a peer's divergence proof.
fn read_tfile_window(tfile_path: &Path, low_bnum: u64, count: usize) -> Result<Vec<BlockTrailer>, SyncError> {
    let bytes = fs::read(tfile_path).map_err(EngineError::Io)?;
    if bytes.len() % BlockTrailer::LEN != 0 {
        return Err(EngineError::Format("tfile size is not a multiple of the trailer size".into()).into());
    }
    let mut window = Vec::with_capacity(count);
    let mut cursor = &bytes[..];
    while !cursor.is_empty() {
        let trailer = BlockTrailer::read_from(&mut cursor).map_err(EngineError::Io)?;
        if trailer.bnum >= low_bnum && window.len() < count {
            window.push(trailer);
        }
    }
    Ok(window)
}

/// **(c) Neo-genesis extraction.** Fetches the neo-genesis block at
/// `bnum_ng` from `peer` and extracts its embedded ledger snapshot into
/// `ledger_out_path`.
pub fn extract_neo_genesis<T: PeerTransport>(
    transport: &T,
    peer: &T::PeerId,
    bnum_ng: u64,
    work_dir: &Path,
    ledger_out_path: &Path,
) -> Result<(), SyncError> {
    let tmp = work_dir.join(format!("ngblock-{bnum_ng}.dat"));
    transport
        .fetch_neo_genesis(peer, bnum_ng, &tmp)
        .map_err(|e| SyncError::Transport(e.to_string()))?;
    Ledger::extract(&tmp, ledger_out_path)?;
    let _ = fsutil::remove_if_exists(&tmp);
    Ok(())
}

/// **(d) Catchup.** Downloads blocks `bnum_ng+1 ..= target_cblock` (skipping
/// neo-genesis checkpoints) using up to `cfg.max_quorum` parallel workers,
/// then applies them strictly in ascending order: a completed higher-bnum
/// download waits on disk until its predecessor has been validated and
/// merged.
pub fn catchup<T>(
    transport: &T,
    peer: &T::PeerId,
    ledger: &mut Ledger,
    chain: &mut ChainState,
    cfg: &Config,
    bnum_ng: u64,
    target_cblock: u64,
    work_dir: &Path,
    now: u32,
    pow: &dyn PowVerifier,
    sig: &dyn SignatureVerifier,
) -> Result<(), SyncError>
where
    T: PeerTransport + Sync,
    T::PeerId: Send + Sync,
{
    let targets: Vec<u64> = ((bnum_ng + 1)..=target_cblock).filter(|b| b % NG_INTERVAL != 0).collect();
    if targets.is_empty() {
        return Ok(());
    }
    let worker_count = cfg.max_quorum.max(1).min(targets.len());

    let next_index = AtomicUsize::new(0);
    let (tx, rx) = mpsc::channel::<(u64, PathBuf, Result<(), String>)>();

    std::thread::scope(|scope| -> Result<(), SyncError> {
        for _ in 0..worker_count {
            let tx = tx.clone();
            let next_index = &next_index;
            let targets = &targets;
            scope.spawn(move || loop {
                let i = next_index.fetch_add(1, AtomicOrdering::SeqCst);
                if i >= targets.len() {
                    break;
                }
                let bnum = targets[i];
                let tmp = work_dir.join(format!("rblock-{bnum}.dat"));
                let result = transport.fetch_block(peer, bnum, &tmp).map_err(|e| e.to_string());
                let _ = tx.send((bnum, tmp, result));
            });
        }
        drop(tx);

        let mut pending: BTreeMap<u64, (PathBuf, Result<(), String>)> = BTreeMap::new();
        let mut remaining = targets.iter().copied();
        let mut next_expected = remaining.next().expect("targets is non-empty");

        for (bnum, path, result) in rx {
            pending.insert(bnum, (path, result));
            while let Some((path, result)) = pending.remove(&next_expected) {
                result.map_err(SyncError::Transport)?;
                apply_one_block(transport, peer, ledger, chain, cfg, &path, work_dir, now, pow, sig)?;
                next_expected = match remaining.next() {
                    Some(n) => n,
                    None => break,
                };
            }
        }
        Ok(())
    })
}

fn apply_one_block<T: PeerTransport>(
    transport: &T,
    peer: &T::PeerId,
    ledger: &mut Ledger,
    chain: &mut ChainState,
    cfg: &Config,
    rblock_path: &Path,
    work_dir: &Path,
    now: u32,
    pow: &dyn PowVerifier,
    sig: &dyn SignatureVerifier,
) -> Result<(), SyncError> {
    let vblock = work_dir.join("vblock.dat");
    let ltran = work_dir.join("ltran.dat");
    match validator::validate_block(rblock_path, &vblock, &ltran, chain, ledger, cfg, now, pow, sig) {
        Ok(outcome) => {
            ledger.update(&ltran, cfg)?;
            advance_chain(chain, &outcome);
            Ok(())
        }
        Err(e) => {
            if e.is_malicious() {
                transport.pink_list(peer);
            }
            Err(e.into())
        }
    }
}

fn advance_chain(chain: &mut ChainState, outcome: &ValidateOutcome) {
    chain.prevhash = chain.cblockhash;
    chain.cblocknum = outcome.bnum;
    chain.cblockhash = outcome.bhash;
    chain.mfee = outcome.mfee;
    chain.difficulty = outcome.difficulty;
    chain.time0 = outcome.stime;
}

/// **(e) Divergence check.** Given a peer's trailer-proof array (size
/// `cfg.ntftx`) and our own stored trailer file, finds the first index `j`
/// at which the peer's trailer matches ours — the split point. Returns
/// `None` if the proof does not validate or no split is found.
pub fn find_split(our_tfile: &[BlockTrailer], peer_proof: &[BlockTrailer]) -> Option<usize> {
    our_tfile
        .iter()
        .zip(peer_proof.iter())
        .position(|(ours, theirs)| ours == theirs)
}

/// Whether a single-peer shortcut catchup applies: the peer's tip is within
/// `cfg.ntftx` blocks of ours, its proof array is a full `NTFTX` trailers
/// long, and the trailer at index `NTFTX - (peer_cblock - our_cblock)`
/// chains to our current tip hash.
pub fn can_catchup_directly(
    our_cblock: u64,
    our_cblockhash: [u8; 32],
    peer_cblock: u64,
    peer_proof: &[BlockTrailer],
    cfg: &Config,
) -> bool {
    let Some(gap) = peer_cblock.checked_sub(our_cblock) else {
        return false;
    };
    if gap == 0 || gap > cfg.ntftx as u64 || peer_proof.len() != cfg.ntftx {
        return false;
    }
    let idx = (cfg.ntftx as u64 - gap) as usize;
    peer_proof.get(idx).is_some_and(|t| t.phash == our_cblockhash)
}

/// Validates a peer's full trailer-proof array against our own stored
/// window of trailers starting at the same `bnum`: the low trailer must
/// equal ours, every subsequent trailer must pass the trailer gate against
/// its predecessor, and the cumulative weight walked forward from
/// `our_past_weight` must equal the peer's advertised weight. Returns the
/// split index into `our_window`/`proof` on success.
pub fn validate_divergence_proof<P>(
    proof: &[BlockTrailer],
    our_window: &[BlockTrailer],
    our_past_weight: [u8; 32],
    advertisement: &Advertisement<P>,
    cfg: &Config,
    now: u32,
    pow: &dyn PowVerifier,
) -> Result<usize, SyncError> {
    if proof.len() != cfg.ntftx {
        return Err(SyncError::ProofLengthMismatch);
    }
    let first = proof.first().ok_or(SyncError::NoSplitPoint)?;
    let our_first = our_window.first().ok_or(SyncError::NoSplitPoint)?;
    if first != our_first {
        return Err(SyncError::AdvertisementMismatch);
    }

    let mut weight = our_past_weight;
    add_weight(&mut weight, weight_contribution(first.difficulty));
    let mut chain = ChainState {
        cblocknum: our_first.bnum,
        cblockhash: first.bhash,
        prevhash: first.phash,
        difficulty: first.difficulty,
        time0: first.stime,
        mfee: first.mfee,
        weight,
        sanctuary_applied: false,
    };
    for trailer in &proof[1..] {
        trailer_gate::check(trailer, &chain, cfg, now, pow)?;
        add_weight(&mut weight, weight_contribution(trailer.difficulty));
        chain.cblocknum = trailer.bnum;
        chain.prevhash = chain.cblockhash;
        chain.cblockhash = trailer.bhash;
        chain.mfee = trailer.mfee;
        chain.difficulty = trailer.difficulty;
        chain.time0 = trailer.stime;
    }

    if weight != advertisement.weight {
        return Err(SyncError::AdvertisementMismatch);
    }

    find_split(our_window, proof).ok_or(SyncError::NoSplitPoint)
}

/// **syncup.** Backs up the current tfile/ledger directory, rewinds to the
/// neo-genesis before `split_bnum`, re-applies our own blocks up to (not
/// including) the split, then downloads and applies the peer's blocks from
/// the split through `peer_cblock`. On any failure the backup is restored
/// and the error propagated.
#[allow(clippy::too_many_arguments)]
pub fn syncup<T>(
    transport: &T,
    peer: &T::PeerId,
    state_dir: &Path,
    backup_dir: &Path,
    ledger_path: &Path,
    chain: &mut ChainState,
    cfg: &Config,
    split_bnum: u64,
    peer_cblock: u64,
    work_dir: &Path,
    now: u32,
    pow: &dyn PowVerifier,
    sig: &dyn SignatureVerifier,
) -> Result<(), SyncError>
where
    T: PeerTransport + Sync,
    T::PeerId: Send + Sync,
{
    backup_dir_all(state_dir, backup_dir).map_err(EngineError::Io)?;

    let result = (|| -> Result<(), SyncError> {
        let bnum_ng = neo_genesis_bnum(split_bnum);
        extract_neo_genesis(transport, peer, bnum_ng, work_dir, ledger_path)?;
        let mut ledger = Ledger::open(ledger_path)?;
        *chain = ChainState { cblocknum: bnum_ng, ..ChainState::genesis() };
        catchup(transport, peer, &mut ledger, chain, cfg, bnum_ng, peer_cblock, work_dir, now, pow, sig)
    })();

    if let Err(e) = result {
        restore_dir_all(backup_dir, state_dir).map_err(EngineError::Io)?;
        return Err(SyncError::SyncupFailed(e.to_string()));
    }
    let _ = fs::remove_dir_all(backup_dir);
    Ok(())
}

/// Orchestrates a full divergence resolution against a quorum-selected
/// peer: validates the peer's trailer-proof array against our own stored
/// window and the peer's advertisement, locates the split point, then runs
/// [`syncup`] from that point through the peer's advertised tip.
#[allow(clippy::too_many_arguments)]
pub fn resolve_divergence<T>(
    transport: &T,
    advertisement: &Advertisement<T::PeerId>,
    peer_proof: &[BlockTrailer],
    our_tfile_path: &Path,
    ledger_path: &Path,
    chain: &mut ChainState,
    cfg: &Config,
    state_dir: &Path,
    backup_dir: &Path,
    work_dir: &Path,
    now: u32,
    pow: &dyn PowVerifier,
    sig: &dyn SignatureVerifier,
) -> Result<(), SyncError>
where
    T: PeerTransport + Sync,
    T::PeerId: Send + Sync,
{
    if peer_proof.len() != cfg.ntftx {
        return Err(SyncError::ProofLengthMismatch);
    }
    let low_bnum = peer_proof.first().ok_or(SyncError::NoSplitPoint)?.bnum;
    let our_window = read_tfile_window(our_tfile_path, low_bnum, cfg.ntftx)?;
    let our_past_weight = past_weight(our_tfile_path, low_bnum.saturating_sub(1))?;
    let split_idx =
        validate_divergence_proof(peer_proof, &our_window, our_past_weight, advertisement, cfg, now, pow)?;
    let split_bnum = our_window[split_idx].bnum;
    syncup(
        transport,
        &advertisement.peer,
        state_dir,
        backup_dir,
        ledger_path,
        chain,
        cfg,
        split_bnum,
        advertisement.cblock,
        work_dir,
        now,
        pow,
        sig,
    )
}

fn backup_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            backup_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

fn restore_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    if dst.exists() {
        fs::remove_dir_all(dst)?;
    }
    backup_dir_all(src, dst)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::balance::Balance;
    use crate::config::HASHLEN;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    struct AcceptAll;
    impl PowVerifier for AcceptAll {
        fn verify_legacy(&self, _t: &BlockTrailer) -> bool {
            true
        }
        fn verify_memory_hard(&self, _t: &BlockTrailer) -> bool {
            true
        }
    }
    impl SignatureVerifier for AcceptAll {
        fn verify(&self, _m: &[u8; HASHLEN], _s: &[u8], _p: &[u8], _r: &[u8]) -> bool {
            true
        }
        fn derive_address(&self, pub_seed: &[u8], _rand_suffix: &[u8]) -> Address {
            let mut bytes = [0u8; crate::config::ADDR_LEN];
            let n = pub_seed.len().min(bytes.len());
            bytes[..n].copy_from_slice(&pub_seed[..n]);
            Address(bytes)
        }
    }

    #[test]
    fn neo_genesis_bnum_rounds_down_to_interval() {
        assert_eq!(neo_genesis_bnum(300), 256);
        assert_eq!(neo_genesis_bnum(256), 256);
        assert_eq!(neo_genesis_bnum(10), 0);
    }

    #[test]
    fn add_weight_carries_across_bytes() {
        let mut w = [0u8; 32];
        w[31] = 0xFF;
        add_weight(&mut w, 1);
        assert_eq!(w[31], 0);
        assert_eq!(w[30], 1);
    }

    fn trailer_at(bnum: u64, phash: [u8; HASHLEN], difficulty: u32) -> BlockTrailer {
        BlockTrailer {
            phash,
            bnum,
            mfee: Balance(1),
            tcount: 0,
            time0: bnum as u32 * 10,
            difficulty,
            mroot: [0u8; HASHLEN],
            nonce: [0u8; HASHLEN],
            stime: bnum as u32 * 10 + 10,
            bhash: [bnum as u8; HASHLEN],
        }
    }

    #[test]
    fn validate_tfile_walks_linked_trailers_and_accumulates_weight() {
        let dir = tempdir().unwrap();
        let tfile = dir.path().join("tfile.dat");
        let t1 = trailer_at(1, [0u8; HASHLEN], 2);
        let t2 = trailer_at(2, t1.bhash, 2);
        let mut bytes = Vec::new();
        t1.write_to(&mut bytes).unwrap();
        t2.write_to(&mut bytes).unwrap();
        fs::write(&tfile, bytes).unwrap();

        let mut chain = ChainState::genesis();
        chain.mfee = Balance(1);
        chain.difficulty = 2;
        let cfg = Config::default();
        let (bnum, weight) = validate_tfile(&tfile, &cfg, &chain, 1_000_000, &AcceptAll).unwrap();
        assert_eq!(bnum, 2);
        let mut expected = [0u8; 32];
        add_weight(&mut expected, 4);
        add_weight(&mut expected, 4);
        assert_eq!(weight, expected);
    }

    #[test]
    fn validate_tfile_rejects_broken_linkage() {
        let dir = tempdir().unwrap();
        let tfile = dir.path().join("tfile.dat");
        let t1 = trailer_at(1, [0u8; HASHLEN], 2);
        let t2 = trailer_at(2, [9u8; HASHLEN], 2); // wrong phash
        let mut bytes = Vec::new();
        t1.write_to(&mut bytes).unwrap();
        t2.write_to(&mut bytes).unwrap();
        fs::write(&tfile, bytes).unwrap();

        let mut chain = ChainState::genesis();
        chain.mfee = Balance(1);
        let cfg = Config::default();
        assert!(validate_tfile(&tfile, &cfg, &chain, 1_000_000, &AcceptAll).is_err());
    }

    #[test]
    fn find_split_locates_first_matching_trailer() {
        let ours = vec![trailer_at(1, [0u8; HASHLEN], 1), trailer_at(2, [1u8; HASHLEN], 1)];
        let mut theirs = ours.clone();
        theirs[1].nonce = [7u8; HASHLEN]; // diverges at index 1
        assert_eq!(find_split(&ours, &theirs), Some(0));
    }

    #[test]
    fn select_quorum_requires_minimum_agreement() {
        let ads = vec![
            Advertisement { peer: 1u32, cblock: 10, weight: [1u8; 32] },
            Advertisement { peer: 2u32, cblock: 10, weight: [1u8; 32] },
            Advertisement { peer: 3u32, cblock: 9, weight: [2u8; 32] },
        ];
        let (cblock, weight, peers) = select_quorum(&ads, 2).unwrap();
        assert_eq!(cblock, 10);
        assert_eq!(weight, [1u8; 32]);
        assert_eq!(peers.len(), 2);
        assert!(select_quorum(&ads, 3).is_none());
    }

    #[test]
    fn validate_tfile_against_advertisement_passes_when_weight_matches() {
        let dir = tempdir().unwrap();
        let tfile = dir.path().join("tfile.dat");
        let t1 = trailer_at(1, [0u8; HASHLEN], 2);
        let t2 = trailer_at(2, t1.bhash, 2);
        let mut bytes = Vec::new();
        t1.write_to(&mut bytes).unwrap();
        t2.write_to(&mut bytes).unwrap();
        fs::write(&tfile, bytes).unwrap();

        let mut chain = ChainState::genesis();
        chain.mfee = Balance(1);
        chain.difficulty = 2;
        let cfg = Config::default();
        let mut expected_weight = [0u8; 32];
        add_weight(&mut expected_weight, 4);
        add_weight(&mut expected_weight, 4);
        let ad = Advertisement { peer: 1u32, cblock: 2, weight: expected_weight };
        assert!(validate_tfile_against_advertisement(&tfile, &cfg, &chain, &ad, 1_000_000, &AcceptAll).is_ok());
    }

    #[test]
    fn validate_tfile_against_advertisement_rejects_weight_mismatch() {
        let dir = tempdir().unwrap();
        let tfile = dir.path().join("tfile.dat");
        let t1 = trailer_at(1, [0u8; HASHLEN], 2);
        let mut bytes = Vec::new();
        t1.write_to(&mut bytes).unwrap();
        fs::write(&tfile, bytes).unwrap();

        let mut chain = ChainState::genesis();
        chain.mfee = Balance(1);
        chain.difficulty = 2;
        let cfg = Config::default();
        let ad = Advertisement { peer: 1u32, cblock: 1, weight: [0xFFu8; 32] };
        assert!(matches!(
            validate_tfile_against_advertisement(&tfile, &cfg, &chain, &ad, 1_000_000, &AcceptAll),
            Err(SyncError::AdvertisementMismatch)
        ));
    }

    #[test]
    fn past_weight_reduces_to_value_at_target_bnum() {
        let dir = tempdir().unwrap();
        let tfile = dir.path().join("tfile.dat");
        let t1 = trailer_at(1, [0u8; HASHLEN], 2);
        let t2 = trailer_at(2, t1.bhash, 3);
        let mut bytes = Vec::new();
        t1.write_to(&mut bytes).unwrap();
        t2.write_to(&mut bytes).unwrap();
        fs::write(&tfile, bytes).unwrap();

        let mut expected = [0u8; 32];
        add_weight(&mut expected, 4); // 2^2, t2 excluded
        assert_eq!(past_weight(&tfile, 1).unwrap(), expected);
    }

    #[test]
    fn can_catchup_directly_true_when_proof_links_to_our_tip() {
        let cfg = Config { ntftx: 4, ..Config::default() };
        let our_hash = [5u8; HASHLEN];
        let mut proof = vec![trailer_at(1, [0u8; HASHLEN], 1); 4];
        proof[3].phash = our_hash; // index NTFTX - gap = 4 - 1
        assert!(can_catchup_directly(100, our_hash, 101, &proof, &cfg));
    }

    #[test]
    fn can_catchup_directly_false_when_gap_exceeds_ntftx() {
        let cfg = Config { ntftx: 4, ..Config::default() };
        let proof = vec![trailer_at(1, [0u8; HASHLEN], 1); 4];
        assert!(!can_catchup_directly(100, [0u8; HASHLEN], 200, &proof, &cfg));
    }

    #[test]
    fn validate_divergence_proof_locates_split_and_checks_weight() {
        let cfg = Config { ntftx: 2, ..Config::default() };
        let t1 = trailer_at(5, [9u8; HASHLEN], 2);
        let t2 = trailer_at(6, t1.bhash, 2);
        let our_window = vec![t1.clone(), t2.clone()];
        let proof = our_window.clone();

        let our_past_weight = [0u8; 32];
        let mut expected_final = our_past_weight;
        add_weight(&mut expected_final, 4);
        add_weight(&mut expected_final, 4);

        let ad = Advertisement { peer: 1u32, cblock: 6, weight: expected_final };
        let split =
            validate_divergence_proof(&proof, &our_window, our_past_weight, &ad, &cfg, 1_000_000, &AcceptAll).unwrap();
        assert_eq!(split, 0);
    }

    #[test]
    fn validate_divergence_proof_rejects_weight_mismatch() {
        let cfg = Config { ntftx: 2, ..Config::default() };
        let t1 = trailer_at(5, [9u8; HASHLEN], 2);
        let t2 = trailer_at(6, t1.bhash, 2);
        let our_window = vec![t1.clone(), t2.clone()];
        let proof = our_window.clone();
        let ad = Advertisement { peer: 1u32, cblock: 6, weight: [0xFFu8; 32] };
        assert!(matches!(
            validate_divergence_proof(&proof, &our_window, [0u8; 32], &ad, &cfg, 1_000_000, &AcceptAll),
            Err(SyncError::AdvertisementMismatch)
        ));
    }

    struct FakeTransport {
        blocks: Mutex<HashMap<u64, Vec<u8>>>,
    }

    impl PeerTransport for FakeTransport {
        type PeerId = u32;
        type Error = std::io::Error;

        fn fetch_tfile(&self, _peer: &u32, _dest: &Path) -> Result<(), Self::Error> {
            Ok(())
        }

        fn fetch_block(&self, _peer: &u32, bnum: u64, dest: &Path) -> Result<(), Self::Error> {
            let blocks = self.blocks.lock().unwrap();
            let bytes = blocks.get(&bnum).expect("test block present").clone();
            fs::write(dest, bytes)
        }

        fn fetch_neo_genesis(&self, _peer: &u32, _bnum: u64, _dest: &Path) -> Result<(), Self::Error> {
            Ok(())
        }
    }

    #[test]
    fn catchup_applies_blocks_in_ascending_order_despite_out_of_order_fetch() {
        use crate::block::{expected_reward, BlockHeader};
        use crate::config::{ADDR_LEN, RAND_LEN, SIG_LEN, SIG_PUB_LEN};
        use crate::record::LedgerEntry;
        use crate::tx::{Transaction, TxPayload};
        use blake2::{Blake2b512, Digest};

        fn addr(byte: u8) -> Address {
            let mut bytes = [0u8; ADDR_LEN];
            bytes[0] = byte;
            Address(bytes)
        }

        fn funding_tx(src: Address, chg: Address) -> Transaction {
            Transaction {
                src_addr: src,
                chg_addr: chg,
                send_total: Balance(0),
                change_total: Balance(5),
                tx_fee: Balance(1),
                sig_pub: {
                    let mut p = [0u8; SIG_PUB_LEN];
                    let n = SIG_PUB_LEN.min(ADDR_LEN);
                    p[..n].copy_from_slice(&src.0[..n]);
                    p
                },
                sig: [0u8; SIG_LEN],
                rand_suffix: [0u8; RAND_LEN],
                tx_id: Transaction::compute_tx_id(&src),
                payload: TxPayload::Single { dst_addr: Address::ZERO },
            }
        }

        let dir = tempdir().unwrap();
        let cfg = Config { base_reward: 0, mfee: 1, max_quorum: 4, ..Config::default() };
        let mut chain = ChainState::genesis();
        chain.mfee = Balance(1);

        let srcs = [addr(10), addr(20), addr(30)];
        let chgs = [addr(11), addr(21), addr(31)];

        let ledger_path = dir.path().join("ledger.dat");
        let mut entries: Vec<_> = srcs.iter().map(|s| LedgerEntry { addr: *s, balance: Balance(6) }).collect();
        entries.sort_by(|a, b| a.addr.cmp(&b.addr));
        let mut le_bytes = Vec::new();
        for e in &entries {
            e.write_to(&mut le_bytes).unwrap();
        }
        fs::write(&ledger_path, le_bytes).unwrap();
        let mut ledger = Ledger::open(&ledger_path).unwrap();

        let mut blocks = HashMap::new();
        let mut prev_chain = chain.clone();
        for (i, bnum) in (1..=3u64).enumerate() {
            let tx = funding_tx(srcs[i], chgs[i]);
            let header = BlockHeader::new(Address::ZERO, expected_reward(&cfg, bnum));
            let mut header_buf = Vec::new();
            header.write_to(&mut header_buf).unwrap();
            let mut block_ctx = Blake2b512::new();
            block_ctx.update(&header_buf);
            let mut merkle_ctx = Blake2b512::new();
            let mut tx_buf = Vec::new();
            let mut b = Vec::new();
            tx.write_to(&mut b).unwrap();
            block_ctx.update(&b);
            merkle_ctx.update(&b);
            tx_buf.extend_from_slice(&b);
            let mroot_digest = merkle_ctx.finalize();
            let mut mroot = [0u8; 32];
            mroot.copy_from_slice(&mroot_digest[..32]);

            let mut trailer = BlockTrailer {
                phash: prev_chain.cblockhash,
                bnum,
                mfee: prev_chain.mfee,
                tcount: 1,
                time0: prev_chain.time0,
                difficulty: prev_chain.difficulty,
                mroot,
                nonce: [0u8; 32],
                stime: prev_chain.time0 + 10,
                bhash: [0u8; 32],
            };
            let mut prefix = Vec::new();
            trailer.write_prefix_without_bhash(&mut prefix).unwrap();
            block_ctx.update(&prefix);
            let bhash_digest = block_ctx.finalize();
            trailer.bhash.copy_from_slice(&bhash_digest[..32]);

            let mut out = header_buf;
            out.extend_from_slice(&tx_buf);
            let mut trailer_buf = Vec::new();
            trailer.write_to(&mut trailer_buf).unwrap();
            out.extend_from_slice(&trailer_buf);
            blocks.insert(bnum, out);

            prev_chain.cblocknum = trailer.bnum;
            prev_chain.cblockhash = trailer.bhash;
            prev_chain.mfee = trailer.mfee;
            prev_chain.difficulty = trailer.difficulty;
            prev_chain.time0 = trailer.stime;
        }

        let transport = FakeTransport { blocks: Mutex::new(blocks) };
        let work_dir = dir.path().join("work");
        fs::create_dir_all(&work_dir).unwrap();

        catchup(&transport, &7u32, &mut ledger, &mut chain, &cfg, 0, 3, &work_dir, 1_000_000, &AcceptAll, &AcceptAll)
            .unwrap();

        assert_eq!(chain.cblocknum, 3);
        for c in &chgs {
            assert_eq!(ledger.find(c, ADDR_LEN).map(|e| e.balance), Some(Balance(5)));
        }
    }
}
