// Chunk Commitment - Merkle root over a collation body
//
// The body is split into fixed-size chunks; each chunk is hashed into a
// leaf and the chunk root is the root of the resulting tree.

use crate::merkle::hash::Hash32;
use crate::merkle::tree::{calc_merkle_tree, MerkleError};

/// Size of one body chunk in bytes
pub const CHUNK_SIZE: usize = 32;

/// Compute the chunk root of a collation body
///
/// The body length must be a non-zero multiple of [`CHUNK_SIZE`] with a
/// power-of-two chunk count. Bodies are padded before they get here.
pub fn calc_chunk_root(body: &[u8]) -> Result<Hash32, MerkleError> {
    if body.is_empty() || body.len() % CHUNK_SIZE != 0 {
        return Err(MerkleError::InvalidInput(format!(
            "body length {} is not a non-zero multiple of {}",
            body.len(),
            CHUNK_SIZE
        )));
    }

    let tree = calc_merkle_tree(body.chunks_exact(CHUNK_SIZE))?;
    Ok(tree.root())
}

/// Right-pad `bytes` with zeros to exactly `size` bytes, truncating longer input
pub fn zpad_right(bytes: &[u8], size: usize) -> Vec<u8> {
    let mut padded = bytes[..bytes.len().min(size)].to_vec();
    padded.resize(size, 0);
    padded
}
