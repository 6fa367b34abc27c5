//! The Trailer / PoW Gate: checks a candidate trailer against the current
//! chain state and dispatches to the right proof-of-work generation.

use crate::block::BlockTrailer;
use crate::chain_state::ChainState;
use crate::collab::PowVerifier;
use crate::config::Config;
use crate::error::EngineError;

/// Outcome of a trailer-gate check: either it passes, or it fails in a way
/// that is attributable to the peer (`Bad`) or purely local (`Io`/`Format`
/// via [`EngineError`]). A proof-of-work failure is always peer-attributable.
pub fn check(
    trailer: &BlockTrailer,
    chain: &ChainState,
    cfg: &Config,
    now: u32,
    pow: &dyn PowVerifier,
) -> Result<(), EngineError> {
    if trailer.mfee.0 < chain.mfee.0 {
        return Err(EngineError::Bad("trailer mfee below chain floor".into()));
    }
    if trailer.difficulty != chain.difficulty {
        return Err(EngineError::Bad("trailer difficulty does not match chain state".into()));
    }
    if trailer.stime <= chain.time0 {
        return Err(EngineError::Bad("trailer stime does not strictly advance chain time".into()));
    }
    if trailer.stime as u64 > now as u64 + cfg.clock_skew_seconds as u64 {
        return Err(EngineError::Bad("trailer stime is too far in the future".into()));
    }
    if trailer.bnum != chain.cblocknum + 1 {
        return Err(EngineError::Bad("trailer bnum is not chain tip + 1".into()));
    }
    if trailer.bnum > cfg.bridge_trigger && !trailer.is_pseudoblock() {
        let window = trailer.stime.saturating_sub(trailer.time0);
        if window > cfg.bridge_seconds {
            return Err(EngineError::Bad("inter-block window exceeds bridge limit".into()));
        }
    }
    if trailer.phash != chain.cblockhash {
        return Err(EngineError::Bad("trailer phash does not chain to current tip".into()));
    }

    if trailer.bnum == cfg.boxing_day_bnum {
        if trailer.bhash == cfg.boxing_day_hash {
            return Ok(());
        }
        return Err(EngineError::Bad("boxing-day block does not match the literal exemption hash".into()));
    }

    if trailer.is_pseudoblock() {
        return Ok(());
    }

    let pow_ok = if trailer.bnum > cfg.v24_trigger {
        pow.verify_memory_hard(trailer)
    } else {
        pow.verify_legacy(trailer)
    };
    if !pow_ok {
        return Err(EngineError::Bad("proof of work does not satisfy difficulty target".into()));
    }

    Ok(())
}

/// Header-only check used during catchup: a lighter pass that only
/// confirms the trailer's own internal time ordering, without access to
/// the full chain-state context.
pub fn check_header_only(trailer: &BlockTrailer) -> Result<(), EngineError> {
    if trailer.stime <= trailer.time0 {
        return Err(EngineError::Bad("trailer stime does not exceed trailer time0".into()));
    }
    Ok(())
}
