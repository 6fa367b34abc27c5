//! The Ledger Store: a sorted, binary-searchable, disk-backed map from
//! address to balance.

use crate::config::Config;
use crate::error::EngineError;
use crate::fsutil;
use crate::record::LedgerEntry;
use byteorder::{LittleEndian, ReadBytesExt};
use std::fs;
use std::path::{Path, PathBuf};

/// Header of `ngblock.dat`: `hdrlen(4) || lbytes(8)` followed by the ledger
/// snapshot itself.
const NG_HEADER_LEN: usize = 4 + 8;

/// An open ledger: the full, sorted entry set plus the path it was loaded
/// from. At most one ledger is open at a time; callers enforce that by
/// holding a single `Ledger` behind `&mut` (see [`crate::engine::Engine`]).
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    entries: Vec<LedgerEntry>,
}

impl Ledger {
    /// Opens `path` read-only, requiring `size > 0` and `size % sizeof(L)
    /// == 0`, and that entries are strictly ascending with no duplicates.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, EngineError> {
        let path = path.as_ref().to_path_buf();
        let bytes = fs::read(&path).map_err(EngineError::Io)?;
        if bytes.is_empty() || bytes.len() % LedgerEntry::LEN != 0 {
            return Err(EngineError::Format(format!(
                "ledger file size {} is not a positive multiple of {}",
                bytes.len(),
                LedgerEntry::LEN
            )));
        }
        let entries = parse_entries(&bytes)?;
        verify_sorted(&entries)?;
        Ok(Ledger { path, entries })
    }

    /// Idempotent close: drops the in-memory entry set. Calling this more
    /// than once, or calling it on an already-empty ledger, is harmless.
    pub fn close(&mut self) {
        self.entries.clear();
    }

    /// Number of entries currently held.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Iterates entries in ascending address order.
    pub fn iter(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.iter()
    }

    /// Binary search on the first `min(key_len, ADDR_LEN)` bytes of `addr`,
    /// returning the first entry whose prefix matches. Tag-only lookups go
    /// through `tag_find` below instead, which is intentionally a separate,
    /// non-prefix entry point.
    pub fn find(&self, addr: &crate::address::Address, key_len: usize) -> Option<LedgerEntry> {
        let key_len = key_len.min(crate::config::ADDR_LEN);
        let key = &addr.0[..key_len];
        let idx = self
            .entries
            .binary_search_by(|e| e.addr.0[..key_len].cmp(key))
            .ok()?;
        Some(self.entries[idx])
    }

    /// Looks up an entry by tag alone. The ledger is sorted by full address,
    /// not by tag, so this is a linear scan, trading off an extra index
    /// against O(n) tag lookups; the scan is fine since tag lookups are only
    /// needed for MTX destination resolution, which is already O(n) per
    /// block.
    pub fn tag_find(&self, tag: &[u8; crate::config::TAG_LEN]) -> Option<LedgerEntry> {
        let needle = crate::address::Address::from_tag(tag);
        self.entries.iter().find(|e| e.addr.tag_eq(&needle)).copied()
    }

    /// Reads a neo-genesis block's embedded ledger snapshot and copies it to
    /// `out_path`, verifying strict ascending order with no duplicates.
    pub fn extract(ngblock_path: impl AsRef<Path>, out_path: impl AsRef<Path>) -> Result<(), EngineError> {
        let bytes = fs::read(ngblock_path.as_ref()).map_err(EngineError::Io)?;
        if bytes.len() < NG_HEADER_LEN {
            return Err(EngineError::Format("neo-genesis file shorter than its header".into()));
        }
        let mut header = &bytes[..NG_HEADER_LEN];
        let _hdrlen = header.read_u32::<LittleEndian>().map_err(EngineError::Io)?;
        let lbytes = header.read_u64::<LittleEndian>().map_err(EngineError::Io)? as usize;
        let body = &bytes[NG_HEADER_LEN..];
        if lbytes > body.len() || lbytes % LedgerEntry::LEN != 0 {
            return Err(EngineError::Format("neo-genesis lbytes does not fit the ledger entry size".into()));
        }
        let entries = parse_entries(&body[..lbytes])?;
        verify_sorted(&entries).map_err(|_| EngineError::Format("neo-genesis ledger snapshot is not sorted".into()))?;
        fsutil::atomic_write(out_path.as_ref(), &body[..lbytes])?;
        Ok(())
    }

    /// The Sanctuary protocol: once per node, when `cfg.sanctuary > 0` and
    /// the chain has crossed `cfg.lastday`, subtract
    /// `cfg.sanctuary` from every balance (an underflowed row is dropped,
    /// not clamped — it has nothing left to contribute), then drop any row
    /// whose resulting balance is `<= mfee`. A no-op if already applied.
    pub fn renew(&mut self, cfg: &Config, chain: &mut crate::chain_state::ChainState) -> Result<(), EngineError> {
        if cfg.sanctuary == 0 || chain.cblocknum < cfg.lastday || chain.sanctuary_applied {
            return Ok(());
        }
        let sanctuary = crate::balance::Balance(cfg.sanctuary);
        let mfee = crate::balance::Balance(cfg.mfee);
        let mut kept = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            if let Some(reduced) = entry.balance.checked_sub(sanctuary) {
                if reduced > mfee {
                    kept.push(LedgerEntry { addr: entry.addr, balance: reduced });
                }
            }
        }
        self.replace_entries(kept)?;
        chain.sanctuary_applied = true;
        tracing::info!(block = chain.cblocknum, "sanctuary renewal applied");
        Ok(())
    }

    /// Applies a sorted (or to-be-sorted) delta file to this ledger,
    /// delegating to [`crate::updater`]. See that module for the merge
    /// algorithm.
    pub fn update(&mut self, ltran_path: impl AsRef<Path>, cfg: &Config) -> Result<(), crate::error::UpdaterError> {
        crate::updater::apply(self, ltran_path.as_ref(), cfg)
    }

    /// Replaces the in-memory entry set and atomically rewrites the backing
    /// file. Used by `renew` and by [`crate::updater::apply`].
    pub(crate) fn replace_entries(&mut self, entries: Vec<LedgerEntry>) -> Result<(), EngineError> {
        if entries.is_empty() {
            return Err(EngineError::Empty);
        }
        verify_sorted(&entries)?;
        let mut bytes = Vec::with_capacity(entries.len() * LedgerEntry::LEN);
        for e in &entries {
            e.write_to(&mut bytes).map_err(EngineError::Io)?;
        }
        fsutil::atomic_write(&self.path, &bytes)?;
        self.entries = entries;
        Ok(())
    }
}

fn parse_entries(bytes: &[u8]) -> Result<Vec<LedgerEntry>, EngineError> {
    let mut entries = Vec::with_capacity(bytes.len() / LedgerEntry::LEN);
    let mut cursor = bytes;
    while !cursor.is_empty() {
        entries.push(LedgerEntry::read_from(&mut cursor).map_err(EngineError::Io)?);
    }
    Ok(entries)
}

fn verify_sorted(entries: &[LedgerEntry]) -> Result<(), EngineError> {
    for w in entries.windows(2) {
        if w[0].addr >= w[1].addr {
            return Err(EngineError::Format("ledger entries are not strictly ascending by address".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::Address;
    use crate::balance::Balance;
    use crate::config::ADDR_LEN;
    use tempfile::tempdir;

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; ADDR_LEN];
        bytes[0] = byte;
        Address(bytes)
    }

    fn write_ledger(path: &Path, entries: &[LedgerEntry]) {
        let mut bytes = Vec::new();
        for e in entries {
            e.write_to(&mut bytes).unwrap();
        }
        fs::write(path, bytes).unwrap();
    }

    #[test]
    fn open_rejects_empty_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.dat");
        fs::write(&path, b"").unwrap();
        assert!(matches!(Ledger::open(&path), Err(EngineError::Format(_))));
    }

    #[test]
    fn open_rejects_misaligned_size() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.dat");
        fs::write(&path, vec![0u8; LedgerEntry::LEN - 1]).unwrap();
        assert!(matches!(Ledger::open(&path), Err(EngineError::Format(_))));
    }

    #[test]
    fn open_rejects_unsorted_entries() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.dat");
        let entries = vec![
            LedgerEntry { addr: addr(2), balance: Balance(10) },
            LedgerEntry { addr: addr(1), balance: Balance(10) },
        ];
        write_ledger(&path, &entries);
        assert!(matches!(Ledger::open(&path), Err(EngineError::Format(_))));
    }

    #[test]
    fn find_returns_exact_match() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.dat");
        let entries = vec![
            LedgerEntry { addr: addr(1), balance: Balance(10) },
            LedgerEntry { addr: addr(5), balance: Balance(20) },
        ];
        write_ledger(&path, &entries);
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.find(&addr(5), ADDR_LEN), Some(entries[1]));
        assert_eq!(ledger.find(&addr(9), ADDR_LEN), None);
    }

    #[test]
    fn tag_find_locates_by_trailing_tag() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.dat");
        let tagged = Address::from_tag(&[7; crate::config::TAG_LEN]);
        let entries = vec![LedgerEntry { addr: tagged, balance: Balance(99) }];
        write_ledger(&path, &entries);
        let ledger = Ledger::open(&path).unwrap();
        assert_eq!(ledger.tag_find(&[7; crate::config::TAG_LEN]), Some(entries[0]));
        assert_eq!(ledger.tag_find(&[8; crate::config::TAG_LEN]), None);
    }

    #[test]
    fn renew_drops_dust_and_marks_applied() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger.dat");
        let entries = vec![
            LedgerEntry { addr: addr(1), balance: Balance(100) },
            LedgerEntry { addr: addr(2), balance: Balance(5) },
        ];
        write_ledger(&path, &entries);
        let mut ledger = Ledger::open(&path).unwrap();
        let cfg = Config { sanctuary: 10, lastday: 0, mfee: 1, ..Config::default() };
        let mut chain = crate::chain_state::ChainState::genesis();
        ledger.renew(&cfg, &mut chain).unwrap();
        assert!(chain.sanctuary_applied);
        assert_eq!(ledger.len(), 1);
        assert_eq!(ledger.find(&addr(1), ADDR_LEN).unwrap().balance, Balance(90));

        // Second call is a no-op.
        let before = ledger.len();
        ledger.renew(&cfg, &mut chain).unwrap();
        assert_eq!(ledger.len(), before);
    }
}
