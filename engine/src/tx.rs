//! Transaction record (`TX`), its multi-destination overlay (`MTX`), and the
//! tag-resolution rulesets the block validator runs per transaction.

use crate::address::Address;
use crate::balance::Balance;
use crate::config::{ADDR_LEN, HASHLEN, MDST_NUM_DST, MTX_BITMAP_BYTES, OVERLAY_LEN, RAND_LEN, SIG_LEN, SIG_PUB_LEN, TAG_LEN};
use sha2::{Digest, Sha256};
use std::io::{self, Read, Write};

/// Bit set on [`Transaction::flags`] when the payload is an [`MtxOverlay`]
/// rather than a plain `dst_addr`.
pub const MTX_FLAG: u8 = 0x01;

/// One destination slot of an MTX: a routing tag plus the amount sent to
/// whichever address resolves that tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Destination {
    pub tag: [u8; TAG_LEN],
    pub amount: Balance,
}

impl Destination {
    fn is_empty(&self) -> bool {
        self.amount == Balance::ZERO && self.tag == [0u8; TAG_LEN]
    }
}

/// The MTX overlay: up to [`MDST_NUM_DST`] destinations plus a
/// dst-tag-resolved bitmap, occupying the same on-disk region a plain
/// transaction uses for `dst_addr`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MtxOverlay {
    pub destinations: [Destination; MDST_NUM_DST],
    pub resolved: [bool; MDST_NUM_DST],
}

impl Default for MtxOverlay {
    fn default() -> Self {
        MtxOverlay {
            destinations: [Destination::default(); MDST_NUM_DST],
            resolved: [false; MDST_NUM_DST],
        }
    }
}

impl MtxOverlay {
    /// Iterator over the non-empty destination slots.
    pub fn active(&self) -> impl Iterator<Item = &Destination> {
        self.destinations.iter().filter(|d| !d.is_empty())
    }

    fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let mut bitmap = [0u8; MTX_BITMAP_BYTES];
        for (i, resolved) in self.resolved.iter().enumerate() {
            if *resolved {
                bitmap[i / 8] |= 1 << (i % 8);
            }
        }
        w.write_all(&bitmap)?;
        for d in &self.destinations {
            w.write_all(&d.tag)?;
            d.amount.write_to(w)?;
        }
        Ok(())
    }

    fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let mut bitmap = [0u8; MTX_BITMAP_BYTES];
        r.read_exact(&mut bitmap)?;
        let mut resolved = [false; MDST_NUM_DST];
        for (i, flag) in resolved.iter_mut().enumerate() {
            *flag = bitmap[i / 8] & (1 << (i % 8)) != 0;
        }
        let mut destinations = [Destination::default(); MDST_NUM_DST];
        for d in destinations.iter_mut() {
            let mut tag = [0u8; TAG_LEN];
            r.read_exact(&mut tag)?;
            let amount = Balance::read_from(r)?;
            *d = Destination { tag, amount };
        }
        Ok(MtxOverlay { destinations, resolved })
    }

    /// Returns a copy with the resolved bitmap zeroed, used to build the
    /// deterministic signing message.
    pub fn with_resolved_zeroed(&self) -> Self {
        MtxOverlay { destinations: self.destinations, resolved: [false; MDST_NUM_DST] }
    }
}

/// The overlay region's payload: either a plain destination address, or a
/// multi-destination fan-out table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxPayload {
    Single { dst_addr: Address },
    Multi(Box<MtxOverlay>),
}

impl TxPayload {
    pub fn is_mtx(&self) -> bool {
        matches!(self, TxPayload::Multi(_))
    }
}

/// A transaction record as stored in a block file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub src_addr: Address,
    pub chg_addr: Address,
    pub send_total: Balance,
    pub change_total: Balance,
    pub tx_fee: Balance,
    pub sig_pub: [u8; SIG_PUB_LEN],
    pub sig: [u8; SIG_LEN],
    pub rand_suffix: [u8; RAND_LEN],
    pub tx_id: [u8; HASHLEN],
    pub payload: TxPayload,
}

impl Transaction {
    /// Size in bytes of the fixed on-disk TX record, identical whether or
    /// not the payload is an MTX (the overlay region is sized to the larger
    /// of the two cases; see `engine::config::OVERLAY_LEN`).
    pub const LEN: usize =
        2 * ADDR_LEN + 8 + 8 + 8 + 1 + SIG_PUB_LEN + SIG_LEN + RAND_LEN + HASHLEN + OVERLAY_LEN;

    pub fn is_mtx(&self) -> bool {
        self.payload.is_mtx()
    }

    pub fn dst_addr(&self) -> Option<Address> {
        match &self.payload {
            TxPayload::Single { dst_addr } => Some(*dst_addr),
            TxPayload::Multi(_) => None,
        }
    }

    /// `tx_id = H(src_addr)`, the value every stored `tx.tx_id` must equal.
    pub fn compute_tx_id(src_addr: &Address) -> [u8; HASHLEN] {
        let digest = Sha256::digest(src_addr.0);
        let mut out = [0u8; HASHLEN];
        out.copy_from_slice(&digest[..HASHLEN]);
        out
    }

    /// The deterministic message a signature must cover. For an MTX past
    /// `mtx_trigger`, the resolved bitmap is zeroed in a working copy first
    /// so that resolution performed by earlier validators does not change
    /// what later validators re-derive.
    pub fn signing_message(&self, bnum: u64, mtx_trigger: u64) -> [u8; HASHLEN] {
        let mut hasher = Sha256::new();
        hasher.update(self.src_addr.0);
        if let TxPayload::Multi(overlay) = &self.payload {
            if bnum >= mtx_trigger {
                let zeroed = overlay.with_resolved_zeroed();
                let mut buf = Vec::new();
                zeroed.write_to(&mut buf).expect("write to Vec cannot fail");
                hasher.update(&buf);
            }
        }
        let digest = hasher.finalize();
        let mut out = [0u8; HASHLEN];
        out.copy_from_slice(&digest[..HASHLEN]);
        out
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        self.src_addr.write_to(w)?;
        self.chg_addr.write_to(w)?;
        self.send_total.write_to(w)?;
        self.change_total.write_to(w)?;
        self.tx_fee.write_to(w)?;
        let flags = if self.is_mtx() { MTX_FLAG } else { 0 };
        w.write_all(&[flags])?;
        w.write_all(&self.sig_pub)?;
        w.write_all(&self.sig)?;
        w.write_all(&self.rand_suffix)?;
        w.write_all(&self.tx_id)?;

        let mut overlay_buf = vec![0u8; OVERLAY_LEN];
        match &self.payload {
            TxPayload::Single { dst_addr } => {
                overlay_buf[..ADDR_LEN].copy_from_slice(&dst_addr.0);
            }
            TxPayload::Multi(mtx) => {
                let mut cursor = io::Cursor::new(&mut overlay_buf[..]);
                mtx.write_to(&mut cursor)?;
            }
        }
        w.write_all(&overlay_buf)
    }

    pub fn read_from<R: Read>(r: &mut R) -> io::Result<Self> {
        let src_addr = Address::read_from(r)?;
        let chg_addr = Address::read_from(r)?;
        let send_total = Balance::read_from(r)?;
        let change_total = Balance::read_from(r)?;
        let tx_fee = Balance::read_from(r)?;
        let mut flags_buf = [0u8; 1];
        r.read_exact(&mut flags_buf)?;
        let mtx = flags_buf[0] & MTX_FLAG != 0;
        let mut sig_pub = [0u8; SIG_PUB_LEN];
        r.read_exact(&mut sig_pub)?;
        let mut sig = [0u8; SIG_LEN];
        r.read_exact(&mut sig)?;
        let mut rand_suffix = [0u8; RAND_LEN];
        r.read_exact(&mut rand_suffix)?;
        let mut tx_id = [0u8; HASHLEN];
        r.read_exact(&mut tx_id)?;

        let mut overlay_buf = vec![0u8; OVERLAY_LEN];
        r.read_exact(&mut overlay_buf)?;
        let payload = if mtx {
            let mut cursor = &overlay_buf[..];
            TxPayload::Multi(Box::new(MtxOverlay::read_from(&mut cursor)?))
        } else {
            let mut bytes = [0u8; ADDR_LEN];
            bytes.copy_from_slice(&overlay_buf[..ADDR_LEN]);
            TxPayload::Single { dst_addr: Address(bytes) }
        };

        Ok(Transaction {
            src_addr,
            chg_addr,
            send_total,
            change_total,
            tx_fee,
            sig_pub,
            sig,
            rand_suffix,
            tx_id,
            payload,
        })
    }
}

/// Reasons [`tag_valid`] or [`mtx_val`] reject a transaction, surfaced to the
/// validator's per-TX pass as `Bad`/`Malicious` classification input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TagError {
    #[error("destination tag conflicts with an existing, differently-owned tag")]
    TagConflict,
    #[error("a tagged source cannot introduce a new tag on a destination")]
    TaggedSourceCannotIntroduceTag,
    #[error("mtx destination amounts do not sum to send_total")]
    AmountMismatch,
    #[error("two mtx destinations share the same tag")]
    DuplicateDestinationTag,
    #[error("an mtx destination tag equals the change address tag")]
    DestinationEqualsChange,
}

/// Non-MTX tag-movement ruleset ("tag_valid"): a tag-bearing address can
/// never have its tag silently moved to an unrelated owner.
///
/// * if `src` and `chg` share a tag, `dst` must not carry a different,
///   pre-existing tag (that would splice one owner's tag onto another's);
/// * a tag carried by `dst` must not already exist in the ledger unless it
///   equals `src`'s tag;
/// * introducing a brand new tag (one not already tracked) is only allowed
///   when `src` itself is tagless.
pub fn tag_valid(src: &Address, chg: &Address, dst: &Address, tag_known_in_ledger: bool) -> Result<(), TagError> {
    if src.has_tag() && src.tag_eq(chg) && dst.has_tag() && !dst.tag_eq(src) && tag_known_in_ledger {
        return Err(TagError::TagConflict);
    }
    if dst.has_tag() && tag_known_in_ledger && !dst.tag_eq(src) {
        return Err(TagError::TagConflict);
    }
    if dst.has_tag() && !tag_known_in_ledger && src.has_tag() {
        return Err(TagError::TaggedSourceCannotIntroduceTag);
    }
    Ok(())
}

/// MTX ruleset ("mtx_val").
pub fn mtx_val(overlay: &MtxOverlay, send_total: Balance, chg: &Address, min_fee: Balance, tx_fee: Balance) -> Result<(), TagError> {
    if tx_fee < min_fee {
        return Err(TagError::AmountMismatch);
    }
    let mut sum = Balance::ZERO;
    let mut seen_tags: Vec<[u8; TAG_LEN]> = Vec::new();
    for d in overlay.active() {
        sum = sum.checked_add(d.amount).ok_or(TagError::AmountMismatch)?;
        if seen_tags.contains(&d.tag) {
            return Err(TagError::DuplicateDestinationTag);
        }
        if chg.has_tag() && chg.tag() == &d.tag {
            return Err(TagError::DestinationEqualsChange);
        }
        seen_tags.push(d.tag);
    }
    if sum != send_total {
        return Err(TagError::AmountMismatch);
    }
    Ok(())
}

/// Mempool intake check for a single transaction not yet part of any block
/// (supplemented from `original_source/src/gettx.c`'s `process_tx`): the
/// same per-TX predicate the Block Validator's first pass applies, run
/// against the current chain tip instead of a candidate block's trailer.
/// Does not perform the cross-TX tag rewrite or the delta-emission passes,
/// since those only make sense once a transaction is actually placed in a
/// block.
pub fn validate_standalone(
    tx: &Transaction,
    chain: &crate::chain_state::ChainState,
    ledger: &crate::ledger::Ledger,
    cfg: &crate::config::Config,
    sig: &dyn crate::collab::SignatureVerifier,
) -> Result<(), crate::error::ValidatorError> {
    use crate::error::ValidatorError;

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
    if tx.tx_fee.0 < cfg.mfee {
        return Err(ValidatorError::BadDrop("tx_fee below mfee floor".into()));
    }
    if Transaction::compute_tx_id(&tx.src_addr) != tx.tx_id {
        return Err(ValidatorError::BadDrop("tx_id does not equal H(src_addr)".into()));
    }

    let message = tx.signing_message(chain.cblocknum + 1, cfg.mtx_trigger);
    if !sig.verify(&message, &tx.sig, &tx.sig_pub, &tx.rand_suffix) {
        return Err(ValidatorError::BadDrop("signature does not verify".into()));
    }
    if sig.derive_address(&tx.sig_pub, &tx.rand_suffix) != tx.src_addr {
        return Err(ValidatorError::BadDrop("derived signing key does not match src_addr".into()));
    }

    let bal = ledger
        .find(&tx.src_addr, ADDR_LEN)
        .ok_or_else(|| ValidatorError::BadDrop("src_addr has no ledger entry".into()))?
        .balance;
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
            tag_valid(&tx.src_addr, &tx.chg_addr, dst_addr, tag_known).map_err(|e| ValidatorError::BadDrop(e.to_string()))?;
        }
        TxPayload::Multi(overlay) => {
            mtx_val(overlay, tx.send_total, &tx.chg_addr, chain.mfee, tx.tx_fee)
                .map_err(|e| ValidatorError::BadDrop(e.to_string()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(byte: u8) -> Address {
        let mut bytes = [0u8; ADDR_LEN];
        bytes[0] = byte;
        Address(bytes)
    }

    fn sample_single(src: u8, dst: u8, chg: u8) -> Transaction {
        let src_addr = addr(src);
        Transaction {
            src_addr,
            chg_addr: addr(chg),
            send_total: Balance(10),
            change_total: Balance(5),
            tx_fee: Balance(1),
            sig_pub: [0u8; SIG_PUB_LEN],
            sig: [0u8; SIG_LEN],
            rand_suffix: [0u8; RAND_LEN],
            tx_id: Transaction::compute_tx_id(&src_addr),
            payload: TxPayload::Single { dst_addr: addr(dst) },
        }
    }

    #[test]
    fn single_round_trips() {
        let tx = sample_single(1, 2, 3);
        let mut buf = Vec::new();
        tx.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Transaction::LEN);
        let mut cursor = &buf[..];
        let back = Transaction::read_from(&mut cursor).unwrap();
        assert_eq!(tx, back);
        assert!(!back.is_mtx());
    }

    #[test]
    fn mtx_round_trips() {
        let src_addr = addr(9);
        let mut overlay = MtxOverlay::default();
        overlay.destinations[0] = Destination { tag: [1; TAG_LEN], amount: Balance(4) };
        overlay.destinations[1] = Destination { tag: [2; TAG_LEN], amount: Balance(6) };
        overlay.resolved[0] = true;
        let tx = Transaction {
            src_addr,
            chg_addr: addr(3),
            send_total: Balance(10),
            change_total: Balance(0),
            tx_fee: Balance(1),
            sig_pub: [0u8; SIG_PUB_LEN],
            sig: [0u8; SIG_LEN],
            rand_suffix: [0u8; RAND_LEN],
            tx_id: Transaction::compute_tx_id(&src_addr),
            payload: TxPayload::Multi(Box::new(overlay.clone())),
        };
        let mut buf = Vec::new();
        tx.write_to(&mut buf).unwrap();
        assert_eq!(buf.len(), Transaction::LEN);
        let mut cursor = &buf[..];
        let back = Transaction::read_from(&mut cursor).unwrap();
        assert_eq!(tx, back);
        assert!(back.is_mtx());
        match back.payload {
            TxPayload::Multi(o) => assert_eq!(*o, overlay),
            _ => panic!("expected mtx payload"),
        }
    }

    #[test]
    fn mtx_val_sums_destinations() {
        let mut overlay = MtxOverlay::default();
        overlay.destinations[0] = Destination { tag: [1; TAG_LEN], amount: Balance(4) };
        overlay.destinations[1] = Destination { tag: [2; TAG_LEN], amount: Balance(6) };
        let chg = addr(0);
        assert!(mtx_val(&overlay, Balance(10), &chg, Balance(0), Balance(1)).is_ok());
        assert!(mtx_val(&overlay, Balance(11), &chg, Balance(0), Balance(1)).is_err());
    }

    #[test]
    fn mtx_val_rejects_duplicate_tags() {
        let mut overlay = MtxOverlay::default();
        overlay.destinations[0] = Destination { tag: [1; TAG_LEN], amount: Balance(4) };
        overlay.destinations[1] = Destination { tag: [1; TAG_LEN], amount: Balance(6) };
        let chg = addr(0);
        assert_eq!(
            mtx_val(&overlay, Balance(10), &chg, Balance(0), Balance(1)),
            Err(TagError::DuplicateDestinationTag)
        );
    }

    struct AcceptAll;
    impl crate::collab::SignatureVerifier for AcceptAll {
        fn verify(&self, _m: &[u8; HASHLEN], _s: &[u8], _p: &[u8], _r: &[u8]) -> bool {
            true
        }
        fn derive_address(&self, pub_seed: &[u8], _rand_suffix: &[u8]) -> Address {
            let mut bytes = [0u8; ADDR_LEN];
            let n = pub_seed.len().min(bytes.len());
            bytes[..n].copy_from_slice(&pub_seed[..n]);
            Address(bytes)
        }
    }

    fn funded_ledger(addr: Address, balance: Balance) -> (tempfile::TempDir, crate::ledger::Ledger) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.dat");
        let mut bytes = Vec::new();
        crate::record::LedgerEntry { addr, balance }.write_to(&mut bytes).unwrap();
        std::fs::write(&path, bytes).unwrap();
        let ledger = crate::ledger::Ledger::open(&path).unwrap();
        (dir, ledger)
    }

    #[test]
    fn validate_standalone_accepts_a_well_formed_mempool_tx() {
        let src = addr(1);
        let mut tx = sample_single(1, 2, 3);
        tx.sig_pub = {
            let mut p = [0u8; SIG_PUB_LEN];
            let n = SIG_PUB_LEN.min(ADDR_LEN);
            p[..n].copy_from_slice(&src.0[..n]);
            p
        };
        tx.send_total = Balance(10);
        tx.change_total = Balance(5);
        tx.tx_fee = Balance(1);

        let (_dir, ledger) = funded_ledger(src, Balance(16));
        let chain = crate::chain_state::ChainState::genesis();
        let cfg = crate::config::Config { mfee: 1, ..crate::config::Config::default() };
        assert!(validate_standalone(&tx, &chain, &ledger, &cfg, &AcceptAll).is_ok());
    }

    #[test]
    fn validate_standalone_rejects_balance_mismatch() {
        let src = addr(1);
        let mut tx = sample_single(1, 2, 3);
        tx.sig_pub = {
            let mut p = [0u8; SIG_PUB_LEN];
            let n = SIG_PUB_LEN.min(ADDR_LEN);
            p[..n].copy_from_slice(&src.0[..n]);
            p
        };
        let (_dir, ledger) = funded_ledger(src, Balance(999));
        let chain = crate::chain_state::ChainState::genesis();
        let cfg = crate::config::Config { mfee: 1, ..crate::config::Config::default() };
        assert!(validate_standalone(&tx, &chain, &ledger, &cfg, &AcceptAll).is_err());
    }
}
