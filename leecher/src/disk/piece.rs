use std::io::{Seek, SeekFrom, Write};
use sha1::{Sha1, Digest};
use crate::{block::{num_blocks, BlockData}, BLOCK_SIZE, ID};
use super::Result;

#[derive(Debug)]
pub struct PieceBuf {

    // Piece hash originally given in metainfo.
    pub hash: ID,

    // Length of piece in bytes.
    pub len: usize,

    // Piece data.
    pub data: Vec<u8>,

    // Indicates if a block has been received, checks for duplicates.
    pub blocks_received: Vec<bool>,

    // Number of blocks recieved.
    pub num_blocks_received: usize,

}

impl PieceBuf {

    pub fn new(hash: ID, len: usize) -> Self {
        Self {
            hash,
            len,
            data: vec![0; len],
            blocks_received: vec![false; num_blocks(len)],
            num_blocks_received: 0,
        }
    }

    pub fn add_block(&mut self, block: &BlockData) {
        let block_idx = block.offset / BLOCK_SIZE;
        let end = block.offset + block.data.len();
        if block.offset % BLOCK_SIZE != 0 || end > self.len {
            tracing::warn!("block out of piece bounds: {:?}", block.info());
            return;
        }
        if self.blocks_received[block_idx] {
            tracing::warn!("duplicate block in piece {} at offset {}", block.piece_idx, block.offset);
        } else {
            self.blocks_received[block_idx] = true;
            self.num_blocks_received += 1;
            self.data[block.offset..end].copy_from_slice(&block.data);
        }
    }

    pub fn is_complete(&self) -> bool {
        self.num_blocks_received == self.blocks_received.len()
    }

    // Hash the piece data and compare with hash given in metainfo (computationally expensive).
    pub fn verify_hash(&self) -> bool {
        let mut hasher = Sha1::new();
        hasher.update(&self.data);
        let hash = hasher.finalize();
        hash.as_slice() == self.hash
    }

    pub fn write(&self, offset: u64, file: &mut std::fs::File) -> Result<()> {
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(&self.data)?;
        Ok(())
    }
}
