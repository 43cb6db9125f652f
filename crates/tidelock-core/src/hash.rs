use crate::Hash32;
use sha2::{Digest, Sha256};

/// Compute a deterministic SHA-256 hash of a byte slice.
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash32(bytes)
}

/// Compute a domain-separated SHA-256 hash: `H(domain || data)`.
pub fn sha256_domain(domain: &[u8], data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(domain);
    hasher.update(data);
    let result = hasher.finalize();
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&result);
    Hash32(bytes)
}

/// Domain separation tag for reward-stash claim leaves.
pub const STASH_LEAF_DOMAIN_V1: &[u8] = b"TIDELOCK_STASH_LEAF_V1";

/// Domain separation tag for interior Merkle nodes.
pub const STASH_NODE_DOMAIN_V1: &[u8] = b"TIDELOCK_STASH_NODE_V1";

/// Hash an interior Merkle node from a sorted pair of children.
///
/// Sorting makes proofs position-independent, so a proof is just the sibling
/// path without direction bits.
pub fn merkle_node(a: Hash32, b: Hash32) -> Hash32 {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    let mut bytes = Vec::with_capacity(64);
    bytes.extend_from_slice(&lo.0);
    bytes.extend_from_slice(&hi.0);
    sha256_domain(STASH_NODE_DOMAIN_V1, &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_is_deterministic() {
        assert_eq!(sha256(b"abc"), sha256(b"abc"));
        assert_ne!(sha256(b"abc"), sha256(b"abd"));
    }

    #[test]
    fn domain_separation_changes_hash() {
        assert_ne!(sha256_domain(b"A", b"x"), sha256_domain(b"B", b"x"));
    }

    #[test]
    fn merkle_node_is_commutative() {
        let a = sha256(b"left");
        let b = sha256(b"right");
        assert_eq!(merkle_node(a, b), merkle_node(b, a));
    }
}
