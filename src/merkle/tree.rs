// Merkle Tree - Binary hash tree over a power-of-two number of leaves
//
// Layers are stored root first, leaves last. Parent nodes are
// Keccak256(left ++ right). Padding leaves up to a power of two is the
// caller's job.

use crate::merkle::hash::{keccak256, Hash32};
use thiserror::Error;

/// Merkle-related errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum MerkleError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Leaf index {index} out of range for {leaf_count} leaves")]
    IndexOutOfRange { index: usize, leaf_count: usize },
}

/// Sibling hashes from a leaf's sibling up to, excluding, the root
pub type MerkleProof = Vec<Hash32>;

/// A fully materialized binary Merkle tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MerkleTree {
    layers: Vec<Vec<Hash32>>,
}

impl MerkleTree {
    /// Build the tree by hashing adjacent pairs until a single root remains
    pub fn build(leaves: Vec<Hash32>) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::InvalidInput(
                "cannot build a tree without leaves".to_string(),
            ));
        }
        if !leaves.len().is_power_of_two() {
            return Err(MerkleError::InvalidInput(format!(
                "leaf count {} is not a power of two",
                leaves.len()
            )));
        }

        let mut layers = vec![leaves];
        while layers[layers.len() - 1].len() > 1 {
            let parent = hash_layer(&layers[layers.len() - 1]);
            layers.push(parent);
        }
        layers.reverse();

        Ok(Self { layers })
    }

    /// The root hash
    pub fn root(&self) -> Hash32 {
        self.layers[0][0]
    }

    /// Number of leaves
    pub fn leaf_count(&self) -> usize {
        self.leaves().len()
    }

    /// The bottom layer
    pub fn leaves(&self) -> &[Hash32] {
        &self.layers[self.layers.len() - 1]
    }

    /// Number of layers, root and leaves included
    pub fn depth(&self) -> usize {
        self.layers.len()
    }

    /// All layers, root first
    pub fn layers(&self) -> &[Vec<Hash32>] {
        &self.layers
    }
}

fn parent_hash(left: &Hash32, right: &Hash32) -> Hash32 {
    keccak256([left.as_bytes().as_slice(), right.as_bytes().as_slice()])
}

fn hash_layer(layer: &[Hash32]) -> Vec<Hash32> {
    layer
        .chunks_exact(2)
        .map(|pair| parent_hash(&pair[0], &pair[1]))
        .collect()
}

/// Hash each item into a leaf, then build the tree
pub fn calc_merkle_tree<I, T>(items: I) -> Result<MerkleTree, MerkleError>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    let leaves = items
        .into_iter()
        .map(|item| keccak256([item.as_ref()]))
        .collect();
    MerkleTree::build(leaves)
}

/// Indices of a node and its ancestors, `depth` entries, node first
pub fn branch_indices(node_index: usize, depth: usize) -> Vec<usize> {
    std::iter::successors(Some(node_index), |index| Some(index / 2))
        .take(depth)
        .collect()
}

/// Read off the inclusion proof for the leaf at `leaf_index`
pub fn get_proof(tree: &MerkleTree, leaf_index: usize) -> Result<MerkleProof, MerkleError> {
    let leaf_count = tree.leaf_count();
    if leaf_index >= leaf_count {
        return Err(MerkleError::IndexOutOfRange {
            index: leaf_index,
            leaf_count,
        });
    }

    // A root-only tree needs no siblings
    if tree.depth() == 1 {
        return Ok(Vec::new());
    }

    // Sibling = branch index with the lowest bit flipped; the root has none
    let siblings = branch_indices(leaf_index, tree.depth() - 1)
        .into_iter()
        .map(|index| index ^ 1);

    Ok(tree
        .layers()
        .iter()
        .rev()
        .zip(siblings)
        .map(|(layer, sibling)| layer[sibling])
        .collect())
}

/// Check that `leaf` sits at `leaf_index` under `root`
pub fn verify(proof: &[Hash32], leaf: Hash32, leaf_index: usize, root: Hash32) -> bool {
    let folded = proof
        .iter()
        .enumerate()
        .fold(leaf, |node, (level, sibling)| {
            if (leaf_index >> level) & 1 == 0 {
                parent_hash(&node, sibling)
            } else {
                parent_hash(sibling, &node)
            }
        });
    folded == root
}
