//! Collaborator interfaces.
//!
//! The proof-of-work verifier, the post-quantum signature primitive, and
//! the network transport are kept out of this engine's scope — they are
//! collaborators whose interface the core uses. This module is that
//! interface: the engine calls these traits as predicates and never
//! depends on a concrete PoW algorithm, signature scheme, or transport.

use crate::address::Address;
use crate::block::BlockTrailer;
use crate::config::HASHLEN;
use std::path::Path;

/// A proof-of-work predicate over a block trailer.
///
/// Two generations exist: a legacy hash-based check and a memory-hard
/// check past `Config::v24_trigger`. The trailer gate dispatches between
/// them; this trait only needs to express "does this trailer's nonce
/// satisfy this difficulty", independent of which generation is live.
pub trait PowVerifier {
    /// Legacy hash-based proof of work, applied to `(mroot, difficulty
    /// low byte, bnum)`.
    fn verify_legacy(&self, trailer: &BlockTrailer) -> bool;

    /// Memory-hard proof of work, applied to the whole trailer.
    fn verify_memory_hard(&self, trailer: &BlockTrailer) -> bool;
}

/// A signature predicate over `(message, signature, public-seed material)`.
///
/// The post-quantum primitive itself is out of scope; this trait is the
/// seam a concrete implementation plugs into. It also derives the address
/// that should result from a given public-seed material, since the
/// validator must check that derivation matches the claimed `src_addr`.
pub trait SignatureVerifier {
    /// Returns `true` iff `sig` is a valid signature over `message` given
    /// `pub_seed` (the per-address public component) and `rand_suffix`.
    fn verify(&self, message: &[u8; HASHLEN], sig: &[u8], pub_seed: &[u8], rand_suffix: &[u8]) -> bool;

    /// Derives the address that `pub_seed` (plus any scheme-specific
    /// trailing material) should produce, for the "derived key equals
    /// `src_addr`" check the validator runs on every transaction.
    fn derive_address(&self, pub_seed: &[u8], rand_suffix: &[u8]) -> Address;
}

/// A minimal peer-transport seam for the sync engine. Network framing,
/// peer selection, and reputation tracking live entirely outside this
/// engine; `PeerTransport` is the narrow interface the sync engine drives.
pub trait PeerTransport {
    type PeerId: Clone + Eq + std::fmt::Debug;
    type Error: std::error::Error + 'static;

    /// Downloads a peer's trailer file into `dest`.
    fn fetch_tfile(&self, peer: &Self::PeerId, dest: &Path) -> Result<(), Self::Error>;

    /// Downloads a single block by number into `dest`.
    fn fetch_block(&self, peer: &Self::PeerId, bnum: u64, dest: &Path) -> Result<(), Self::Error>;

    /// Downloads the neo-genesis block at `bnum` (must satisfy `bnum %
    /// NG_INTERVAL == 0`) into `dest`.
    fn fetch_neo_genesis(&self, peer: &Self::PeerId, bnum: u64, dest: &Path) -> Result<(), Self::Error>;

    /// Marks a peer as malicious; a real implementation persists this to a
    /// pink list. The default no-op lets tests exercise the sync engine
    /// without a real reputation store.
    fn pink_list(&self, _peer: &Self::PeerId) {}
}
