use std::{collections::HashMap, fs::{File, OpenOptions}, path::Path, sync::{Arc, Mutex}};
use tokio::{sync::mpsc, task};
use crate::{torrent::TorrentCommand, Bitfield};
use super::{piece::PieceBuf, *};

pub struct Disk {

    info: TorrentInfo,

    piece_hashes: Vec<ID>,

    // Place to collect pieces, idxed by piece idx.
    write_buf: HashMap<usize, PieceBuf>,

    // Pieces that have been verified and written.
    written: Bitfield,

    // Taken when the output is closed, so it is only closed once.
    file: Option<Arc<Mutex<File>>>,

    // Commands to the disk task.
    disk_rx: DiskRx,

    // Piece results go back to the torrent.
    torrent_tx: TorrentTx,

}

impl Disk {

    pub fn new(
        path: &Path,
        info: TorrentInfo,
        piece_hashes: Vec<ID>,
        torrent_tx: TorrentTx,
    ) -> Result<(Self, DiskTx)> {

        // Create the output directory if it doesn't exist.
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() && !dir.is_dir() {
                std::fs::create_dir_all(dir)?;
                tracing::info!("created missing output directory: {:?}", dir);
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        file.set_len(info.total_len)?;
        tracing::info!("created file: {:?}, {} bytes", path, info.total_len);

        let (disk_tx, disk_rx) = mpsc::unbounded_channel();
        let written = Bitfield::repeat(false, info.num_pieces as usize);
        Ok((
            Disk {
                info,
                piece_hashes,
                write_buf: HashMap::new(),
                written,
                file: Some(Arc::new(Mutex::new(file))),
                disk_rx,
                torrent_tx,
            },
            disk_tx,
        ))
    }

    pub async fn run(&mut self) -> Result<()> {

        let res = self.handle_commands().await;
        let closed = self.close();

        let res = res.and(closed);
        if let Err(e) = &res {
            tracing::error!("disk error: {}", e);
            self.torrent_tx.send(TorrentCommand::DiskFailure).ok();
        }
        res
    }

    async fn handle_commands(&mut self) -> Result<()> {
        while let Some(cmd) = self.disk_rx.recv().await {
            match cmd {

                DiskCommand::WriteBlock(block) => self.write_block(block).await?,

                DiskCommand::Shutdown => {
                    tracing::info!("disk shutdown");
                    break;
                },

            }
        }
        Ok(())
    }

    async fn write_block(&mut self, block: BlockData) -> Result<()> {
        // Block info is validated in the peer session.

        let piece_idx = block.piece_idx;
        match self.written.get(piece_idx).map(|b| *b) {
            None => {
                tracing::warn!("block for unknown piece {}", piece_idx);
                return Ok(());
            },
            // Late duplicate from another peer.
            Some(true) => {
                tracing::trace!("piece {} already written, dropping block", piece_idx);
                return Ok(());
            },
            Some(false) => {},
        }

        let piece = self.write_buf.entry(piece_idx).or_insert_with(|| {
            tracing::trace!("creating new piece {} in write buf", piece_idx);
            PieceBuf::new(self.piece_hashes[piece_idx], self.info.piece_len(piece_idx))
        });
        piece.add_block(&block);
        tracing::trace!(
            "piece {}: {} blocks received out of {}",
            piece_idx, piece.num_blocks_received, piece.blocks_received.len(),
        );
        if !piece.is_complete() {
            return Ok(());
        }

        // If we have all the blocks for this piece, write piece to disk.
        let (Some(piece), Some(file)) = (self.write_buf.remove(&piece_idx), self.file.clone()) else {
            return Ok(());
        };
        let offset = self.info.piece_offset(piece_idx);

        // Hashing and writing run off the async threads, one piece at a time.
        let valid = task::spawn_blocking(move || -> Result<bool> {
            if !piece.verify_hash() {
                return Ok(false);
            }
            let mut f = file.lock()?;
            piece.write(offset, &mut f)?;
            Ok(true)
        }).await??;

        if valid {
            self.written.set(piece_idx, true);
            tracing::debug!("piece {} verified and written", piece_idx);
        } else {
            tracing::warn!("piece {} failed hash verification", piece_idx);
        }
        self.torrent_tx.send(TorrentCommand::PieceWritten { idx: piece_idx, valid })?;
        Ok(())
    }

    // Flushes the output to storage and releases it.
    fn close(&mut self) -> Result<()> {
        if let Some(file) = self.file.take() {
            file.lock()?.sync_all()?;
            tracing::info!("output closed, {}/{} pieces written", self.written.count_ones(), self.written.len());
        }
        Ok(())
    }
}
