//! Copy-or-skip decision for a scanned source key.

use super::fingerprint::ContentHash;
use super::index::ChecksumIndex;

/// What to do with one source key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Destination is missing the key or holds different content.
    Copy,
    /// Destination already holds identical content.
    Skip,
}

/// Compare a source key's content hash against the destination index.
///
/// Absent entries and empty (vanished-key) hashes always copy, so an
/// incomplete index can only cause redundant writes, never missed ones.
pub fn decide(index: &ChecksumIndex, key: &[u8], source_hash: &ContentHash) -> Decision {
    if source_hash.is_empty() {
        return Decision::Copy;
    }
    if index.matches(key, source_hash) {
        Decision::Skip
    } else {
        Decision::Copy
    }
}
