use crate::{block::BlockInfo, info::TorrentInfo, Bitfield};

// Per piece, per block record of what has been requested and received.
// Shared by all sessions of a torrent, so always used behind a lock.
#[derive(Debug, Clone)]
pub struct PieceSet {

    // One row per piece, one bit per block.
    requested: Vec<Bitfield>,

    received: Vec<Bitfield>,

}

impl PieceSet {

    pub fn new(info: &TorrentInfo) -> Self {
        let rows: Vec<Bitfield> = (0..info.num_pieces as usize)
            .map(|idx| Bitfield::repeat(false, info.num_blocks(idx)))
            .collect();
        Self {
            requested: rows.clone(),
            received: rows,
        }
    }

    pub fn add_requested(&mut self, block: &BlockInfo) {
        set(&mut self.requested, block);
    }

    pub fn add_received(&mut self, block: &BlockInfo) {
        set(&mut self.received, block);
    }

    // Whether the block should still be requested.
    // Once every block has been requested at least once, requested is reset to what has actually
    // been received, so blocks that never arrived can be requested again from other peers.
    pub fn needed(&mut self, block: &BlockInfo) -> bool {
        if self.requested.iter().all(|p| p.all()) {
            tracing::debug!("all blocks requested, resetting to received");
            self.requested = self.received.clone();
        }
        matches!(get(&self.requested, block), Some(false))
    }

    pub fn is_done(&self) -> bool {
        self.received.iter().all(|p| p.all())
    }

    pub fn is_block_received(&self, block: &BlockInfo) -> bool {
        matches!(get(&self.received, block), Some(true))
    }

    pub fn is_piece_received(&self, piece_idx: usize) -> bool {
        self.received.get(piece_idx).map_or(false, |p| p.all())
    }

    pub fn num_pieces_received(&self) -> usize {
        self.received.iter().filter(|p| p.all()).count()
    }

    pub fn num_pieces(&self) -> usize {
        self.received.len()
    }

    // The piece is verified on disk, whatever was reset in the meantime.
    pub fn add_piece_received(&mut self, piece_idx: usize) {
        if let Some(p) = self.requested.get_mut(piece_idx) {
            p.fill(true);
        }
        if let Some(p) = self.received.get_mut(piece_idx) {
            p.fill(true);
        }
    }

    // Forget everything about a piece, used when its hash didn't match.
    pub fn reset_piece(&mut self, piece_idx: usize) {
        if let Some(p) = self.requested.get_mut(piece_idx) {
            p.fill(false);
        }
        if let Some(p) = self.received.get_mut(piece_idx) {
            p.fill(false);
        }
    }
}

fn get(rows: &[Bitfield], block: &BlockInfo) -> Option<bool> {
    rows.get(block.piece_idx)
        .and_then(|p| p.get(block.idx_in_piece()))
        .map(|b| *b)
}

fn set(rows: &mut [Bitfield], block: &BlockInfo) {
    if let Some(mut bit) = rows
        .get_mut(block.piece_idx)
        .and_then(|p| p.get_mut(block.idx_in_piece()))
    {
        *bit = true;
    } else {
        tracing::warn!("block out of range: {:?}", block);
    }
}
