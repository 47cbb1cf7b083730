use std::path::Path;
use tokio::{sync::mpsc, task::{self, JoinHandle}};
use tracing::Instrument;
use crate::{block::BlockData, info::TorrentInfo, torrent::TorrentTx, ID};

mod piece;
mod disk;
#[cfg(test)]
mod tests;

#[derive(thiserror::Error, Debug)]
pub enum DiskError {

    #[error(transparent)]
    IoError(#[from] std::io::Error),

    // Usually relating to poisoned file locks.
    #[error("sync error: {0}")]
    SyncError(String),

    #[error("blocking task failed: {0}")]
    JoinError(#[from] task::JoinError),

    #[error("channel error: {0}")]
    Channel(String),

}

impl<T> From<std::sync::PoisonError<T>> for DiskError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        DiskError::SyncError(e.to_string())
    }
}

impl<T> From<mpsc::error::SendError<T>> for DiskError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        DiskError::Channel(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, DiskError>;
pub type DiskTx = mpsc::UnboundedSender<DiskCommand>;
type DiskRx = mpsc::UnboundedReceiver<DiskCommand>;

#[derive(Debug)]
pub enum DiskCommand {

    // From peers sending blocks, buffered until the piece is complete.
    WriteBlock(BlockData),

    // Flush and close the output, writes sent before this are still handled.
    Shutdown,

}

// Opens the output file sized to the torrent and spawns the disk task.
pub fn start_disk(
    path: &Path,
    info: TorrentInfo,
    piece_hashes: Vec<ID>,
    torrent_tx: TorrentTx,
) -> Result<(JoinHandle<Result<()>>, DiskTx)> {
    let (mut disk, disk_tx) = disk::Disk::new(path, info, piece_hashes, torrent_tx)?;
    let handle = task::spawn(async move {
        disk.run().await
    }.instrument(tracing::info_span!("disk")));
    Ok((handle, disk_tx))
}
