//! Checksum injection for blocks the upper layer has tagged as b-tree nodes.
//!
//! The cache does not know how to interpret a block's contents, but it
//! recognizes one convention: if the last byte of a block equals
//! [`BLK_MARKER_BNODE`], the four bytes at offset 8 hold a checksum that must
//! be refreshed immediately before the block is written back, since the
//! upper layer may have mutated the payload without updating it.

/// Marker byte (stored as the last byte of a block) identifying a b-tree node.
pub const BLK_MARKER_BNODE: u8 = 0xaa;

/// Offset and width of the checksum field inside a marked block.
const CHECKSUM_OFFSET: usize = 8;
const CHECKSUM_LEN: usize = 4;

/// Recompute and store the checksum of a b-tree-marked block.
///
/// The checksum field is first reset to `0xff` bytes, then a CRC32C is taken
/// over the whole block (checksum field included) and written back into that
/// same field. Panics if `block` is smaller than the checksum field requires
/// — that would mean the cache was configured with a nonsensical blocksize.
pub fn inject_bnode_checksum(block: &mut [u8]) {
    assert!(
        block.len() >= CHECKSUM_OFFSET + CHECKSUM_LEN,
        "block too small to hold a checksum field"
    );
    block[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN].fill(0xff);
    let crc = crc32c::crc32c(block);
    block[CHECKSUM_OFFSET..CHECKSUM_OFFSET + CHECKSUM_LEN].copy_from_slice(&crc.to_le_bytes());
}
