use crate::{block::{self, BlockInfo}, metainfo::MetaInfo, BLOCK_SIZE};

// Piece and block geometry of a torrent.
// Very widely used, often cloned but is cheap.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TorrentInfo {

    pub total_len: u64,

    pub piece_len: usize,

    pub last_piece_len: usize,

    pub num_pieces: u32,

}

impl TorrentInfo {

    pub fn new(metainfo: &MetaInfo) -> Self {
        Self::from_lengths(metainfo.total_len(), metainfo.piece_len())
    }

    // Callers guarantee piece_len > 0 and total_len > 0, metainfo rejects anything else.
    pub fn from_lengths(total_len: u64, piece_len: usize) -> Self {
        let num_pieces = ((total_len + piece_len as u64 - 1) / piece_len as u64) as u32;
        let last_piece_len = (total_len - (piece_len as u64 * (num_pieces as u64 - 1))) as usize;

        Self {
            total_len,
            piece_len,
            last_piece_len,
            num_pieces,
        }
    }

    // Returns length of piece given its index.
    pub fn piece_len(&self, idx: usize) -> usize {
        if idx as u32 == self.num_pieces - 1 {
            self.last_piece_len
        } else {
            self.piece_len
        }
    }

    pub fn num_blocks(&self, piece_idx: usize) -> usize {
        block::num_blocks(self.piece_len(piece_idx))
    }

    pub fn block_len(&self, piece_idx: usize, block_idx: usize) -> usize {
        block::block_len(self.piece_len(piece_idx), block_idx)
    }

    // Absolute byte offset of a piece within the torrent.
    pub fn piece_offset(&self, piece_idx: usize) -> u64 {
        piece_idx as u64 * self.piece_len as u64
    }

    // All blocks of a piece, in order.
    pub fn blocks(&self, piece_idx: usize) -> impl Iterator<Item = BlockInfo> + '_ {
        (0..self.num_blocks(piece_idx)).map(move |i| BlockInfo {
            piece_idx,
            offset: i * BLOCK_SIZE,
            len: self.block_len(piece_idx, i),
        })
    }

    // Whether the block lines up exactly with one of our blocks.
    pub fn is_valid_block(&self, block: &BlockInfo) -> bool {
        block.piece_idx < self.num_pieces as usize
            && block.offset % BLOCK_SIZE == 0
            && block.idx_in_piece() < self.num_blocks(block.piece_idx)
            && block.len == self.block_len(block.piece_idx, block.idx_in_piece())
    }
}
