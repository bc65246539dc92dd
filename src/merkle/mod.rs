// Merkle module - AUTHENTICATED CONTENT
// Fixed hash function, binary hash trees, inclusion proofs and chunk roots

mod chunk;
mod hash;
mod tree;

pub use chunk::{calc_chunk_root, zpad_right, CHUNK_SIZE};
pub use hash::{keccak256, Hash32};
pub use tree::{
    branch_indices, calc_merkle_tree, get_proof, verify, MerkleError, MerkleProof, MerkleTree,
};
