//! Overflow-checked account balances.
//!
//! Addition/subtraction must detect carry/borrow as overflow/underflow —
//! ordinary wrapping `u64` arithmetic is not acceptable anywhere near
//! consensus code, since a silently wrapped balance would let a block mint
//! or destroy value undetected.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};

/// A 64-bit unsigned ledger amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Balance(pub u64);

impl Balance {
    pub const ZERO: Balance = Balance(0);

    /// Checked addition; `None` on overflow.
    pub fn checked_add(self, other: Balance) -> Option<Balance> {
        self.0.checked_add(other.0).map(Balance)
    }

    /// Checked subtraction; `None` on underflow.
    pub fn checked_sub(self, other: Balance) -> Option<Balance> {
        self.0.checked_sub(other.0).map(Balance)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        Ok(Balance(r.read_u64::<LittleEndian>()?))
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_u64::<LittleEndian>(self.0)
    }
}

impl From<u64> for Balance {
    fn from(v: u64) -> Self {
        Balance(v)
    }
}

impl std::fmt::Display for Balance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
