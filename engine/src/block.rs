//! Block header, trailer, and whole-block file framing.

use crate::address::Address;
use crate::balance::Balance;
use crate::config::{Config, ADDR_LEN, HASHLEN};
use crate::tx::Transaction;
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// `BH`: the fixed-size block header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub hdrlen: u32,
    pub maddr: Address,
    pub mreward: Balance,
}

impl BlockHeader {
    pub const LEN: usize = 4 + ADDR_LEN + 8;

    pub fn new(maddr: Address, mreward: Balance) -> Self {
        BlockHeader { hdrlen: Self::LEN as u32, maddr, mreward }
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let hdrlen = r.read_u32::<LittleEndian>()?;
        let maddr = Address::read_from(r)?;
        let mreward = Balance::read_from(r)?;
        Ok(BlockHeader { hdrlen, maddr, mreward })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u32::<LittleEndian>(self.hdrlen)?;
        self.maddr.write_to(w)?;
        self.mreward.write_to(w)
    }
}

/// `BT`: the fixed-size block trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockTrailer {
    pub phash: [u8; HASHLEN],
    pub bnum: u64,
    pub mfee: Balance,
    pub tcount: u32,
    pub time0: u32,
    pub difficulty: u32,
    pub mroot: [u8; HASHLEN],
    pub nonce: [u8; HASHLEN],
    pub stime: u32,
    pub bhash: [u8; HASHLEN],
}

impl BlockTrailer {
    pub const LEN: usize = HASHLEN + 8 + 8 + 4 + 4 + 4 + HASHLEN + HASHLEN + 4 + HASHLEN;

    /// A pseudoblock (no transactions, emitted purely to bridge a long gap
    /// between real blocks) is identified by the low byte of `bnum` being
    /// `0xFE`. `bnum` is little-endian on disk, so its low byte is its
    /// first on-disk byte.
    pub fn is_pseudoblock(&self) -> bool {
        (self.bnum & 0xFF) as u8 == 0xFE
    }

    /// True for a block at a neo-genesis checkpoint boundary.
    pub fn is_neo_genesis(&self) -> bool {
        self.bnum % crate::config::NG_INTERVAL == 0
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut phash = [0u8; HASHLEN];
        r.read_exact(&mut phash)?;
        let bnum = r.read_u64::<LittleEndian>()?;
        let mfee = Balance::read_from(r)?;
        let tcount = r.read_u32::<LittleEndian>()?;
        let time0 = r.read_u32::<LittleEndian>()?;
        let difficulty = r.read_u32::<LittleEndian>()?;
        let mut mroot = [0u8; HASHLEN];
        r.read_exact(&mut mroot)?;
        let mut nonce = [0u8; HASHLEN];
        r.read_exact(&mut nonce)?;
        let stime = r.read_u32::<LittleEndian>()?;
        let mut bhash = [0u8; HASHLEN];
        r.read_exact(&mut bhash)?;
        Ok(BlockTrailer { phash, bnum, mfee, tcount, time0, difficulty, mroot, nonce, stime, bhash })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.phash)?;
        w.write_u64::<LittleEndian>(self.bnum)?;
        self.mfee.write_to(w)?;
        w.write_u32::<LittleEndian>(self.tcount)?;
        w.write_u32::<LittleEndian>(self.time0)?;
        w.write_u32::<LittleEndian>(self.difficulty)?;
        w.write_all(&self.mroot)?;
        w.write_all(&self.nonce)?;
        w.write_u32::<LittleEndian>(self.stime)?;
        w.write_all(&self.bhash)
    }

    /// Everything hashed into `bhash` except `bhash` itself: the block hash
    /// digests header || transaction array || this trailer prefix.
    pub fn write_prefix_without_bhash<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.phash)?;
        w.write_u64::<LittleEndian>(self.bnum)?;
        self.mfee.write_to(w)?;
        w.write_u32::<LittleEndian>(self.tcount)?;
        w.write_u32::<LittleEndian>(self.time0)?;
        w.write_u32::<LittleEndian>(self.difficulty)?;
        w.write_all(&self.mroot)?;
        w.write_all(&self.nonce)?;
        w.write_u32::<LittleEndian>(self.stime)
    }

    /// The New-Year-boundary Merkle seed: `phash || bnum || mfee || tcount
    /// || time0 || difficulty`.
    pub fn write_new_year_seed<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.phash)?;
        w.write_u64::<LittleEndian>(self.bnum)?;
        self.mfee.write_to(w)?;
        w.write_u32::<LittleEndian>(self.tcount)?;
        w.write_u32::<LittleEndian>(self.time0)?;
        w.write_u32::<LittleEndian>(self.difficulty)
    }
}

/// A fully parsed block file: header, transaction array, trailer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    pub trailer: BlockTrailer,
}

impl Block {
    /// Total length this block must occupy on disk: `sizeof(BH) + tcount *
    /// sizeof(TX) + sizeof(BT)`.
    pub fn expected_len(tcount: usize) -> usize {
        BlockHeader::LEN + tcount * Transaction::LEN + BlockTrailer::LEN
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.header.write_to(w)?;
        for tx in &self.transactions {
            tx.write_to(w)?;
        }
        self.trailer.write_to(w)
    }

    pub fn read_from<R: Read>(r: &mut R, tcount: usize) -> io::Result<Self> {
        let header = BlockHeader::read_from(r)?;
        let mut transactions = Vec::with_capacity(tcount);
        for _ in 0..tcount {
            transactions.push(Transaction::read_from(r)?);
        }
        let trailer = BlockTrailer::read_from(r)?;
        Ok(Block { header, transactions, trailer })
    }
}

/// Deterministic block-reward schedule. A from-scratch redesign could make
/// this a pluggable inflation curve; for now it is a flat `base_reward`,
/// matching the teacher's coinbase-subsidy model but keyed off `Config`
/// rather than a hard-coded constant.
pub fn expected_reward(cfg: &Config, _bnum: u64) -> Balance {
    Balance(cfg.base_reward)
}
