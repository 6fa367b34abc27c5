//! The Block Validator: the seven-pass, per-block end-to-end check that
//! turns a candidate `rblock` into a `vblock` plus a ledger-transaction
//! delta file.

use crate::address::Address;
use crate::balance::Balance;
use crate::block::{expected_reward, Block, BlockHeader, BlockTrailer};
use crate::chain_state::ChainState;
use crate::collab::{PowVerifier, SignatureVerifier};
use crate::config::Config;
use crate::error::{ValidatorError, ValidatorResult};
use crate::fsutil;
use crate::ledger::Ledger;
use crate::record::LedgerTx;
use crate::trailer_gate;
use crate::tx::{mtx_val, tag_valid, Transaction, TxPayload};
use blake2::{Blake2b512, Digest};
use std::fs;
use std::io;
use std::path::Path;

/// What a successful validation produced. Carries enough of the trailer for
/// a caller (chiefly [`crate::sync`]) to advance its [`ChainState`] without
/// re-reading the committed `vblock` file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidateOutcome {
    pub bnum: u64,
    pub bhash: [u8; 32],
    pub tcount: u32,
    pub mfee: Balance,
    pub difficulty: u32,
    /// The committed trailer's `stime`, which becomes the chain's next
    /// `time0` floor.
    pub stime: u32,
}

/// One transaction's working state through passes 1-4: the parsed record
/// plus the destination address as it currently stands (rewritten in
/// place by the cross-TX tag-rewrite pass).
struct Working {
    tx: Transaction,
    resolved_dst: Option<Address>,
}

fn bail(msg: impl Into<String>) -> ValidatorError {
    ValidatorError::Bail(io::Error::new(io::ErrorKind::Other, msg.into()))
}

/// Runs all seven passes against `rblock_path`. On success, `ltran_path` is
/// written (not yet applied — that is [`crate::updater::apply`]'s job) and
/// `rblock_path` is renamed to `vblock_path`. On failure, `rblock_path` is
/// removed.
pub fn validate_block(
    rblock_path: &Path,
    vblock_path: &Path,
    ltran_path: &Path,
    chain: &ChainState,
    ledger: &Ledger,
    cfg: &Config,
    now: u32,
    pow: &dyn PowVerifier,
    sig: &dyn SignatureVerifier,
) -> ValidatorResult<ValidateOutcome> {
    match validate_block_inner(rblock_path, ltran_path, chain, ledger, cfg, now, pow, sig) {
        Ok(outcome) => {
            fsutil::remove_if_exists(vblock_path).map_err(ValidatorError::Bail)?;
            fs::rename(rblock_path, vblock_path).map_err(ValidatorError::Bail)?;
            Ok(outcome)
        }
        Err(e) => {
            let _ = fsutil::remove_if_exists(rblock_path);
            let _ = fsutil::remove_if_exists(ltran_path.with_extension("tmp"));
            Err(e)
        }
    }
}

fn validate_block_inner(
    rblock_path: &Path,
    ltran_path: &Path,
    chain: &ChainState,
    ledger: &Ledger,
    cfg: &Config,
    now: u32,
    pow: &dyn PowVerifier,
    sig: &dyn SignatureVerifier,
) -> ValidatorResult<ValidateOutcome> {
    let bytes = fs::read(rblock_path).map_err(ValidatorError::Bail)?;

    // --- framing ----------------------------------------------------------
    if bytes.len() < BlockHeader::LEN + BlockTrailer::LEN {
        return Err(ValidatorError::Drop("file too short to hold a header and trailer".into()));
    }
    let mut header_cursor = &bytes[..BlockHeader::LEN];
    let header = BlockHeader::read_from(&mut header_cursor).map_err(ValidatorError::Bail)?;
    if header.hdrlen as usize != BlockHeader::LEN {
        return Err(ValidatorError::BadDrop("hdrlen does not match header size".into()));
    }

    let trailer_start = bytes.len() - BlockTrailer::LEN;
    let mut trailer_cursor = &bytes[trailer_start..];
    let trailer = BlockTrailer::read_from(&mut trailer_cursor).map_err(ValidatorError::Bail)?;

    trailer_gate::check(&trailer, chain, cfg, now, pow).map_err(engine_to_validator)?;

    let tcount = trailer.tcount as usize;
    if tcount == 0 {
        return Err(ValidatorError::Drop("tcount is zero".into()));
    }
    if tcount > cfg.max_bl_tx as usize {
        return Err(ValidatorError::BadDrop("tcount exceeds max_bl_tx".into()));
    }
    if bytes.len() != Block::expected_len(tcount) {
        return Err(ValidatorError::BadDrop("file length does not match hdrlen + tcount*txlen + trailer".into()));
    }

    if expected_reward(cfg, trailer.bnum) != header.mreward {
        return Err(ValidatorError::BadDrop("mreward does not match the expected reward schedule".into()));
    }
    if header.maddr.has_tag() {
        return Err(ValidatorError::BadDrop("miner address must not carry a tag".into()));
    }

    let is_new_year = trailer.is_neo_genesis() && trailer.bnum != 0;

    let mut block_ctx = Blake2b512::new();
    let mut header_buf = Vec::new();
    header.write_to(&mut header_buf).map_err(ValidatorError::Bail)?;
    block_ctx.update(&header_buf);

    let mut merkle_ctx = if is_new_year { block_ctx.clone() } else { Blake2b512::new() };

    // --- per-TX validation, streaming --------------------------------------
    let mut q: Vec<Working> = Vec::with_capacity(tcount);
    let mut prev_tx_id: Option<[u8; 32]> = None;
    let mut fee_sum = Balance::ZERO;
    let mut tx_cursor = &bytes[BlockHeader::LEN..BlockHeader::LEN + tcount * Transaction::LEN];

    for _ in 0..tcount {
        let tx_start = tx_cursor;
        let tx = Transaction::read_from(&mut tx_cursor).map_err(ValidatorError::Bail)?;
        let tx_bytes = &tx_start[..Transaction::LEN];
        block_ctx.update(tx_bytes);
        merkle_ctx.update(tx_bytes);

        if !tx.is_mtx() {
            if let Some(dst) = tx.dst_addr() {
                if tx.src_addr == dst {
                    return Err(ValidatorError::BadDrop("src_addr equals dst_addr".into()));
                }
            }
        }
        if tx.src_addr == tx.chg_addr {
            return Err(ValidatorError::BadDrop("src_addr equals chg_addr".into()));
        }
        if tx.tx_fee.0 < chain.mfee.0 {
            return Err(ValidatorError::BadDrop("tx_fee below chain mfee floor".into()));
        }

        let expected_tx_id = Transaction::compute_tx_id(&tx.src_addr);
        if expected_tx_id != tx.tx_id {
            return Err(ValidatorError::BadDrop("tx_id does not equal H(src_addr)".into()));
        }
        if let Some(prev) = prev_tx_id {
            match tx.tx_id.cmp(&prev) {
                std::cmp::Ordering::Greater => {}
                std::cmp::Ordering::Equal => return Err(ValidatorError::BadDrop("duplicate tx_id in block".into())),
                std::cmp::Ordering::Less => return Err(ValidatorError::BadDrop("tx array is not sorted by tx_id".into())),
            }
        }
        prev_tx_id = Some(tx.tx_id);

        let message = tx.signing_message(trailer.bnum, cfg.mtx_trigger);
        if !sig.verify(&message, &tx.sig, &tx.sig_pub, &tx.rand_suffix) {
            return Err(ValidatorError::BadDrop("signature does not verify".into()));
        }
        let derived = sig.derive_address(&tx.sig_pub, &tx.rand_suffix);
        if derived != tx.src_addr {
            return Err(ValidatorError::BadDrop("derived signing key does not match src_addr".into()));
        }

        let entry = ledger.find(&tx.src_addr, crate::config::ADDR_LEN);
        let bal = match entry {
            Some(e) => e.balance,
            None => return Err(ValidatorError::BadDrop("src_addr has no ledger entry".into())),
        };
        let total = tx
            .send_total
            .checked_add(tx.change_total)
            .and_then(|s| s.checked_add(tx.tx_fee))
            .ok_or_else(|| ValidatorError::BadDrop("send+change+fee overflows".into()))?;
        if bal != total {
            return Err(ValidatorError::BadDrop("src balance does not equal send+change+fee".into()));
        }

        match &tx.payload {
            TxPayload::Single { dst_addr } => {
                let tag_known = ledger.tag_find(dst_addr.tag()).is_some();
                tag_valid(&tx.src_addr, &tx.chg_addr, dst_addr, tag_known)
                    .map_err(|e| ValidatorError::BadDrop(e.to_string()))?;
            }
            TxPayload::Multi(overlay) => {
                mtx_val(overlay, tx.send_total, &tx.chg_addr, chain.mfee, tx.tx_fee)
                    .map_err(|e| ValidatorError::BadDrop(e.to_string()))?;
            }
        }

        fee_sum = fee_sum.checked_add(tx.tx_fee).ok_or_else(|| bail("fee sum overflow"))?;
        let resolved_dst = tx.dst_addr();
        q.push(Working { tx, resolved_dst });
    }

    // --- cross-TX tag rewrite -----------------------------------------------
    for j in 0..q.len() {
        if q[j].tx.is_mtx() {
            continue;
        }
        let dst_tag = match q[j].resolved_dst {
            Some(d) if d.has_tag() => *d.tag(),
            _ => continue,
        };
        let mut replacement: Option<Address> = None;
        for i in 0..q.len() {
            let src = q[i].tx.src_addr;
            let chg = q[i].tx.chg_addr;
            if src.has_tag() && src.tag_eq(&chg) && src.tag() == &dst_tag {
                replacement = Some(q[i].tx.chg_addr);
                break;
            }
        }
        if let Some(addr) = replacement {
            q[j].resolved_dst = Some(addr);
        }
    }

    // --- emit per-TX deltas -------------------------------------------------
    let mut deltas: Vec<LedgerTx> = Vec::new();
    for w in &q {
        let tx = &w.tx;
        let total = tx
            .send_total
            .checked_add(tx.change_total)
            .and_then(|s| s.checked_add(tx.tx_fee))
            .ok_or_else(|| bail("pass-3 send+change+fee overflow"))?;
        deltas.push(LedgerTx::debit(tx.src_addr, total));
        if !tx.is_mtx() && tx.send_total != Balance::ZERO {
            let dst = w.resolved_dst.expect("single-dst tx always has a resolved destination");
            deltas.push(LedgerTx::credit(dst, tx.send_total));
        }
        if tx.change_total != Balance::ZERO {
            deltas.push(LedgerTx::credit(tx.chg_addr, tx.change_total));
        }
    }

    // --- MTX destination expansion ------------------------------------------
    for (qi, w) in q.iter().enumerate() {
        let overlay = match &w.tx.payload {
            TxPayload::Multi(overlay) => overlay,
            TxPayload::Single { .. } => continue,
        };
        for dest in overlay.active() {
            let resolved = ledger.tag_find(&dest.tag).map(|e| e.addr);
            let addr = match resolved {
                None => {
                    deltas.push(LedgerTx::credit(w.tx.chg_addr, dest.amount));
                    continue;
                }
                Some(_) => {
                    let mut found_override = None;
                    for (qj, other) in q.iter().enumerate() {
                        if qj == qi {
                            continue;
                        }
                        let src = other.tx.src_addr;
                        let chg = other.tx.chg_addr;
                        if src.has_tag() && src.tag_eq(&chg) && src.tag() == &dest.tag {
                            found_override = Some(other.tx.chg_addr);
                            break;
                        }
                    }
                    found_override.unwrap_or_else(|| resolved.unwrap())
                }
            };
            deltas.push(LedgerTx::credit(addr, dest.amount));
        }
    }

    // --- miner reward --------------------------------------------------------
    let total_reward = fee_sum.checked_add(header.mreward).ok_or_else(|| bail("fee+reward overflow"))?;
    deltas.push(LedgerTx::credit(header.maddr, total_reward));

    // --- Merkle root and block hash -----------------------------------------
    if is_new_year {
        let mut seed = Vec::new();
        trailer.write_new_year_seed(&mut seed).map_err(ValidatorError::Bail)?;
        merkle_ctx.update(&seed);
    }
    let mroot_digest = merkle_ctx.finalize();
    let mut mroot = [0u8; 32];
    mroot.copy_from_slice(&mroot_digest[..32]);
    if mroot != trailer.mroot {
        return Err(ValidatorError::BadDrop("merkle root mismatch".into()));
    }

    let mut trailer_prefix = Vec::new();
    trailer.write_prefix_without_bhash(&mut trailer_prefix).map_err(ValidatorError::Bail)?;
    block_ctx.update(&trailer_prefix);
    let bhash_digest = block_ctx.finalize();
    let mut bhash = [0u8; 32];
    bhash.copy_from_slice(&bhash_digest[..32]);
    if bhash != trailer.bhash {
        return Err(ValidatorError::Drop("block hash mismatch".into()));
    }

    // --- commit the delta file (rename of rblock happens in the caller) ------
    let mut ltran_bytes = Vec::with_capacity(deltas.len() * LedgerTx::LEN);
    for d in &deltas {
        d.write_to(&mut ltran_bytes).map_err(ValidatorError::Bail)?;
    }
    fsutil::atomic_write(ltran_path, &ltran_bytes).map_err(ValidatorError::Bail)?;

    Ok(ValidateOutcome {
        bnum: trailer.bnum,
        bhash,
        tcount: trailer.tcount,
        mfee: trailer.mfee,
        difficulty: trailer.difficulty,
        stime: trailer.stime,
    })
}

fn engine_to_validator(e: crate::error::EngineError) -> ValidatorError {
    use crate::error::EngineError::*;
    match e {
        Bad(m) => ValidatorError::Drop(m),
        Malicious(m) => ValidatorError::BadDrop(m),
        Format(m) => ValidatorError::BadDrop(m),
        Io(io_err) => ValidatorError::Bail(io_err),
        Empty => ValidatorError::Bail(io::Error::new(io::ErrorKind::Other, "empty")),
    }
}
