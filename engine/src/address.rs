//! Fixed-size addresses and their embedded routing tags.
//!
//! An [`Address`] is an opaque, fixed-width byte identifier. Its last
//! [`crate::config::TAG_LEN`] bytes form a **tag**: a routing label that
//! lets a multi-destination transaction (MTX) name a destination by label
//! rather than by full address. Two addresses are *tag-equal* iff those
//! trailing bytes match, regardless of the rest of the address.
//!
//! Ordering on `Address` is plain byte-lexicographic over the whole array —
//! this is the order the ledger file is sorted by. Tag comparisons are a
//! separate, narrower notion and must never be used to order the ledger
//! itself; the ledger is not tag-sorted, so a tag lookup is free to degrade
//! to a linear scan.

use crate::config::{ADDR_LEN, TAG_LEN};
use byteorder::{LittleEndian, WriteBytesExt};
use std::io::{self, Read, Write};

/// A fixed-size address, the unit of account ownership in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub [u8; ADDR_LEN]);

impl Address {
    /// The all-zero address. Used as `phash` of the genesis block and as a
    /// placeholder in tests.
    pub const ZERO: Address = Address([0u8; ADDR_LEN]);

    /// Returns the trailing tag region of this address.
    pub fn tag(&self) -> &[u8; TAG_LEN] {
        let start = ADDR_LEN - TAG_LEN;
        <&[u8; TAG_LEN]>::try_from(&self.0[start..]).expect("tag slice is TAG_LEN long")
    }

    /// An address "carries a tag" iff its tag region is not all zero. A
    /// zero tag is the convention for a tagless address.
    pub fn has_tag(&self) -> bool {
        self.tag().iter().any(|&b| b != 0)
    }

    /// Whether two addresses share the same tag. Two tagless addresses
    /// (all-zero tag) are never tag-equal, since an all-zero tag means
    /// "no tag", not "the zero tag".
    pub fn tag_eq(&self, other: &Address) -> bool {
        self.has_tag() && other.has_tag() && self.tag() == other.tag()
    }

    /// Builds an "implicit" address for a bare tag: a zeroed body with the
    /// tag written into the trailing region. Used by [`crate::ledger::Ledger::tag_find`]
    /// to construct a lookup key from a destination tag alone, and mirrors
    /// the original `addr_from_implicit` helper.
    pub fn from_tag(tag: &[u8; TAG_LEN]) -> Self {
        let mut bytes = [0u8; ADDR_LEN];
        bytes[ADDR_LEN - TAG_LEN..].copy_from_slice(tag);
        Address(bytes)
    }

    /// Derives an address from arbitrary public-key material by hashing it
    /// into the body and writing the low `TAG_LEN` bytes of the hash as the
    /// tag. This stands in for the original `addr_from_wots` derivation; the
    /// real signature scheme is a collaborator this engine never constructs.
    pub fn derive(pubkey_material: &[u8]) -> Self {
        use sha2::{Digest, Sha256};
        let digest = Sha256::digest(pubkey_material);
        let mut bytes = [0u8; ADDR_LEN];
        let n = digest.len().min(ADDR_LEN);
        bytes[..n].copy_from_slice(&digest[..n]);
        Address(bytes)
    }

    /// Reads an address from a little-endian byte stream.
    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; ADDR_LEN];
        r.read_exact(&mut buf)?;
        Ok(Address(buf))
    }

    /// Writes this address verbatim (addresses have no internal multi-byte
    /// integer fields, so there is no endianness to apply).
    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.0)
    }
}

impl Default for Address {
    fn default() -> Self {
        Address::ZERO
    }
}

/// Writes a `u64` as little-endian, matching every fixed-width integer field
/// in the on-disk layouts: little-endian, no padding.
pub fn write_u64<W: Write>(w: &mut W, v: u64) -> io::Result<()> {
    w.write_u64::<LittleEndian>(v)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr_with_tag(tag: [u8; TAG_LEN]) -> Address {
        Address::from_tag(&tag)
    }

    #[test]
    fn zero_address_has_no_tag() {
        assert!(!Address::ZERO.has_tag());
    }

    #[test]
    fn tag_eq_requires_both_sides_tagged() {
        let a = addr_with_tag([1; TAG_LEN]);
        let b = addr_with_tag([1; TAG_LEN]);
        assert!(a.tag_eq(&b));
        assert!(!Address::ZERO.tag_eq(&b));
    }

    #[test]
    fn ordering_is_byte_lexicographic() {
        let mut lo = [0u8; ADDR_LEN];
        let mut hi = [0u8; ADDR_LEN];
        lo[0] = 1;
        hi[0] = 2;
        assert!(Address(lo) < Address(hi));
    }

    #[test]
    fn round_trips_through_bytes() {
        let addr = addr_with_tag([7; TAG_LEN]);
        let mut buf = Vec::new();
        addr.write_to(&mut buf).unwrap();
        let mut cursor = &buf[..];
        let back = Address::read_from(&mut cursor).unwrap();
        assert_eq!(addr, back);
    }
}
