use std::collections::VecDeque;
use crate::{block::BlockInfo, info::TorrentInfo, Bitfield};

// Blocks a single peer can serve, in the order the peer announced them.
#[derive(Debug)]
pub struct RequestQueue {

    queue: VecDeque<BlockInfo>,

    // Whether the peer is choking us, no requests can be made while it is.
    pub choked: bool,

}

impl RequestQueue {

    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            choked: true,
        }
    }

    // Queue every block of every piece the peer has.
    // Spare bits past the last piece are ignored.
    pub fn enqueue_bitfield(&mut self, bitfield: &Bitfield, info: &TorrentInfo) {
        for idx in bitfield.iter_ones() {
            if idx >= info.num_pieces as usize {
                break;
            }
            self.enqueue_piece(idx, info);
        }
    }

    pub fn enqueue_piece(&mut self, piece_idx: usize, info: &TorrentInfo) {
        if piece_idx >= info.num_pieces as usize {
            tracing::warn!("ignoring out of range piece {}", piece_idx);
            return;
        }
        self.queue.extend(info.blocks(piece_idx));
    }

    pub fn dequeue(&mut self) -> Option<BlockInfo> {
        self.queue.pop_front()
    }

    // Put a block back at the end of the queue.
    pub fn requeue(&mut self, block: BlockInfo) {
        self.queue.push_back(block);
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

impl Default for RequestQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::BLOCK_SIZE;

    #[test]
    fn test_enqueue_bitfield() {
        // 4 pieces with 4, 4, 4 and 1 blocks.
        let info = TorrentInfo::from_lengths(197_608, 65_536);
        let mut queue = RequestQueue::new();
        assert!(queue.choked);

        // Pieces 0 and 3, plus a spare bit set past the end.
        let bitfield = Bitfield::from_vec(vec![0b1001_0001]);
        queue.enqueue_bitfield(&bitfield, &info);
        assert_eq!(queue.len(), 5);

        let order: Vec<(usize, usize)> = std::iter::from_fn(|| queue.dequeue())
            .map(|b| (b.piece_idx, b.offset))
            .collect();
        assert_eq!(order, vec![
            (0, 0),
            (0, BLOCK_SIZE),
            (0, 2 * BLOCK_SIZE),
            (0, 3 * BLOCK_SIZE),
            (3, 0),
        ]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_enqueue_have_fifo() {
        let info = TorrentInfo::from_lengths(197_608, 65_536);
        let mut queue = RequestQueue::new();
        queue.enqueue_piece(3, &info);
        queue.enqueue_piece(1, &info);
        queue.enqueue_piece(10, &info);
        assert_eq!(queue.len(), 5);
        assert_eq!(queue.dequeue(), Some(BlockInfo { piece_idx: 3, offset: 0, len: 1000 }));
        assert_eq!(queue.dequeue().map(|b| b.piece_idx), Some(1));

        let block = queue.dequeue().unwrap();
        queue.requeue(block);
        assert_eq!(queue.len(), 3);
        assert_eq!(queue.dequeue().map(|b| b.offset), Some(2 * BLOCK_SIZE));
    }
}
