use crate::hash::hash256;

/// Merkle root computation over an ordered list of 32-byte hashes.
///
/// Levels with an odd node count duplicate their last hash, matching the
/// reference ledger. The tree itself is never materialized; block
/// verification only needs the root.
pub struct MerkleTree;

impl MerkleTree {
    /// Returns `None` for an empty list; a block with no transactions
    /// carries an all-zero merkle root, which is the caller's concern.
    pub fn compute_root(hashes: &[[u8; 32]]) -> Option<[u8; 32]> {
        match hashes {
            [] => None,
            [single] => Some(*single),
            _ => {
                let mut level: Vec<[u8; 32]> = hashes.to_vec();
                while level.len() > 1 {
                    level = Self::next_level(&level);
                }
                level.first().copied()
            }
        }
    }

    fn next_level(level: &[[u8; 32]]) -> Vec<[u8; 32]> {
        let mut parents = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = pair.get(1).copied().unwrap_or(left);
            let mut concat = [0u8; 64];
            concat[..32].copy_from_slice(&left);
            concat[32..].copy_from_slice(&right);
            parents.push(hash256(&concat));
        }
        parents
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(n: u8) -> [u8; 32] {
        [n; 32]
    }

    #[test]
    fn empty_list_has_no_root() {
        assert_eq!(MerkleTree::compute_root(&[]), None);
    }

    #[test]
    fn single_hash_is_its_own_root() {
        assert_eq!(MerkleTree::compute_root(&[leaf(7)]), Some(leaf(7)));
    }

    #[test]
    fn pair_hashes_concatenation() {
        let mut concat = [0u8; 64];
        concat[..32].copy_from_slice(&leaf(1));
        concat[32..].copy_from_slice(&leaf(2));
        assert_eq!(
            MerkleTree::compute_root(&[leaf(1), leaf(2)]),
            Some(hash256(&concat))
        );
    }

    #[test]
    fn odd_count_duplicates_last() {
        // [a, b, c] must equal [a, b, c, c].
        let odd = MerkleTree::compute_root(&[leaf(1), leaf(2), leaf(3)]);
        let padded = MerkleTree::compute_root(&[leaf(1), leaf(2), leaf(3), leaf(3)]);
        assert_eq!(odd, padded);
        assert!(odd.is_some());
    }

    #[test]
    fn root_depends_on_order() {
        let forward = MerkleTree::compute_root(&[leaf(1), leaf(2)]);
        let reversed = MerkleTree::compute_root(&[leaf(2), leaf(1)]);
        assert_ne!(forward, reversed);
    }
}
