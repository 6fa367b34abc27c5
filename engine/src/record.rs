//! On-disk ledger record types: the ledger entry (`L`) and the ledger
//! transaction / delta record (`LT`).

use crate::address::Address;
use crate::balance::Balance;
use std::io::{self, Read, Write};

/// Debit code, sorts before [`CREDIT`] (`'-'` is `0x2D`, `'A'` is `0x41`).
pub const DEBIT: u8 = b'-';
/// Credit code.
pub const CREDIT: u8 = b'A';

/// A ledger entry: `addr -> balance`. The ledger file is a contiguous,
/// strictly-ascending-by-`addr`, duplicate-free array of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerEntry {
    pub addr: Address,
    pub balance: Balance,
}

impl LedgerEntry {
    /// Size in bytes of the on-disk representation.
    pub const LEN: usize = crate::config::ADDR_LEN + 8;

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let addr = Address::read_from(r)?;
        let balance = Balance::read_from(r)?;
        Ok(LedgerEntry { addr, balance })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.addr.write_to(w)?;
        self.balance.write_to(w)
    }
}

/// Ordering a ledger entry by its address alone — the order the ledger
/// file is sorted in.
impl PartialOrd for LedgerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for LedgerEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.addr.cmp(&other.addr)
    }
}

/// A ledger transaction (delta) record: a debit or credit against one
/// address, consumed by the ledger updater.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerTx {
    pub addr: Address,
    pub code: u8,
    pub amount: Balance,
}

impl LedgerTx {
    /// Size in bytes of the on-disk representation.
    pub const LEN: usize = crate::config::ADDR_LEN + 1 + 8;

    pub fn debit(addr: Address, amount: Balance) -> Self {
        LedgerTx { addr, code: DEBIT, amount }
    }

    pub fn credit(addr: Address, amount: Balance) -> Self {
        LedgerTx { addr, code: CREDIT, amount }
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let addr = Address::read_from(r)?;
        let mut code_buf = [0u8; 1];
        r.read_exact(&mut code_buf)?;
        let amount = Balance::read_from(r)?;
        Ok(LedgerTx { addr, code: code_buf[0], amount })
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.addr.write_to(w)?;
        w.write_all(&[self.code])?;
        self.amount.write_to(w)
    }
}

/// Sort order for the `ltran.dat` file: ascending by `(addr, code)`, with
/// `'-'` sorting before `'A'` — which is simply their ASCII values, so
/// deriving the tuple ordering gives the right sort for free.
impl PartialOrd for LedgerTx {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for LedgerTx {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (self.addr, self.code).cmp(&(other.addr, other.code))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; crate::config::ADDR_LEN];
        bytes[0] = byte;
        Address(bytes)
    }

    #[test]
    fn debit_sorts_before_credit_same_addr() {
        let d = LedgerTx::debit(addr(1), Balance(1));
        let c = LedgerTx::credit(addr(1), Balance(1));
        assert!(d < c);
    }

    #[test]
    fn ledger_entry_round_trips() {
        let e = LedgerEntry { addr: addr(9), balance: Balance(12345) };
        let mut buf = Vec::new();
        e.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), LedgerEntry::LEN);
        let mut cursor = &buf[..];
        assert_eq!(LedgerEntry::read_from(&mut cursor).unwrap(), e);
    }

    #[test]
    fn ledger_tx_round_trips() {
        let t = LedgerTx::credit(addr(3), Balance(42));
        let mut buf = Vec::new();
        t.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), LedgerTx::LEN);
        let mut cursor = &buf[..];
        assert_eq!(LedgerTx::read_from(&mut cursor).unwrap(), t);
    }
}
