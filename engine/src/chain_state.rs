//! Chain state (`C`) and its `global.dat` persistence format.
//!
//! `global.dat` is exactly 89 bytes: `cblocknum(8) || cblockhash(32) ||
//! prevhash(32) || mfee(8) || difficulty(4) || time0(4) || bgflag(1)`.
//! Cumulative `weight` (used for fork-choice) is **not** part of that
//! 89-byte record — it is derived by walking the trailer file, so it lives
//! only in the in-memory [`ChainState`] and is recomputed by
//! [`crate::sync`] rather than trusted from disk.

use crate::balance::Balance;
use crate::config::HASHLEN;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// Size in bytes of the persisted `global.dat` record.
pub const GLOBAL_DAT_LEN: usize = 8 + HASHLEN + HASHLEN + 8 + 4 + 4 + 1;

/// In-memory chain state, `C`: the current tip and the parameters the next
/// block is validated against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainState {
    pub cblocknum: u64,
    pub cblockhash: [u8; HASHLEN],
    pub prevhash: [u8; HASHLEN],
    pub difficulty: u32,
    pub time0: u32,
    pub mfee: Balance,
    /// Cumulative difficulty-derived fork-choice weight. Not part of
    /// `global.dat`; recomputed from the trailer file on load.
    pub weight: [u8; HASHLEN],
    /// Set once the Sanctuary renewal has fired at or past
    /// `Config::lastday`, so a restart does not re-apply it.
    pub sanctuary_applied: bool,
}

impl ChainState {
    pub fn genesis() -> Self {
        ChainState {
            cblocknum: 0,
            cblockhash: [0u8; HASHLEN],
            prevhash: [0u8; HASHLEN],
            difficulty: 1,
            time0: 0,
            mfee: Balance::ZERO,
            weight: [0u8; HASHLEN],
            sanctuary_applied: false,
        }
    }

    /// Writes the 89-byte `global.dat` record. `weight` is intentionally
    /// excluded from the on-disk format.
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.cblocknum)?;
        w.write_all(&self.cblockhash)?;
        w.write_all(&self.prevhash)?;
        self.mfee.write_to(w)?;
        w.write_u32::<LittleEndian>(self.difficulty)?;
        w.write_u32::<LittleEndian>(self.time0)?;
        w.write_all(&[self.sanctuary_applied as u8])
    }

    /// Reads a `global.dat` record. `weight` defaults to zero; callers that
    /// need fork-choice weight must recompute it from the trailer file.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let cblocknum = r.read_u64::<LittleEndian>()?;
        let mut cblockhash = [0u8; HASHLEN];
        r.read_exact(&mut cblockhash)?;
        let mut prevhash = [0u8; HASHLEN];
        r.read_exact(&mut prevhash)?;
        let mfee = Balance::read_from(r)?;
        let difficulty = r.read_u32::<LittleEndian>()?;
        let time0 = r.read_u32::<LittleEndian>()?;
        let mut bgflag = [0u8; 1];
        r.read_exact(&mut bgflag)?;
        Ok(ChainState {
            cblocknum,
            cblockhash,
            prevhash,
            difficulty,
            time0,
            mfee,
            weight: [0u8; HASHLEN],
            sanctuary_applied: bgflag[0] != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_dat_is_exactly_89_bytes() {
        assert_eq!(GLOBAL_DAT_LEN, 89);
        let cs = ChainState::genesis();
        let mut buf = Vec::new();
        cs.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), 89);
    }

    #[test]
    fn round_trips_except_weight() {
        let mut cs = ChainState::genesis();
        cs.cblocknum = 42;
        cs.difficulty = 7;
        cs.sanctuary_applied = true;
        let mut buf = Vec::new();
        cs.write_to(&mut buf).unwrap();
        let mut cursor = &buf[..];
        let back = ChainState::read_from(&mut cursor).unwrap();
        assert_eq!(back.cblocknum, 42);
        assert_eq!(back.difficulty, 7);
        assert!(back.sanctuary_applied);
        assert_eq!(back.weight, [0u8; HASHLEN]);
    }
}
