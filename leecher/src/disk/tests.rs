use bytes::Bytes;
use rand::{seq::SliceRandom, Rng};
use sha1::{Sha1, Digest};
use tokio::sync::mpsc;
use crate::{
    block::BlockData,
    info::TorrentInfo,
    torrent::{TorrentCommand, TorrentRx},
    BLOCK_SIZE,
    ID,
};
use super::{start_disk, DiskCommand, DiskError};

// 3 pieces of 32768, 32768 and 4464 bytes.
const TOTAL_LEN: u64 = 70_000;
const PIECE_LEN: usize = 32_768;

fn test_data() -> (TorrentInfo, Vec<u8>, Vec<ID>) {
    let info = TorrentInfo::from_lengths(TOTAL_LEN, PIECE_LEN);
    let mut data = vec![0u8; TOTAL_LEN as usize];
    rand::thread_rng().fill(&mut data[..]);
    let hashes = data
        .chunks(PIECE_LEN)
        .map(|piece| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(&Sha1::digest(piece));
            hash
        })
        .collect::<Vec<ID>>();
    (info, data, hashes)
}

fn blocks(info: &TorrentInfo, data: &[u8], piece_idx: usize) -> Vec<BlockData> {
    let start = info.piece_offset(piece_idx) as usize;
    info.blocks(piece_idx)
        .map(|b| BlockData {
            piece_idx,
            offset: b.offset,
            data: Bytes::copy_from_slice(&data[start + b.offset..start + b.offset + b.len]),
        })
        .collect()
}

async fn next_written(rx: &mut TorrentRx) -> (usize, bool) {
    match rx.recv().await {
        Some(TorrentCommand::PieceWritten { idx, valid }) => (idx, valid),
        other => panic!("expected piece written, got {:?}", other),
    }
}

#[tokio::test]
async fn test_disk_write() -> Result<(), Box<dyn std::error::Error>> {

    let (info, data, hashes) = test_data();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.bin");
    let (torrent_tx, mut torrent_rx) = mpsc::unbounded_channel();
    let (handle, disk_tx) = start_disk(&path, info.clone(), hashes, torrent_tx)?;

    // Output is sized up front.
    assert_eq!(std::fs::metadata(&path)?.len(), TOTAL_LEN);

    // Blocks arrive in any order across pieces.
    let mut all: Vec<BlockData> = (0..3).flat_map(|p| blocks(&info, &data, p)).collect();
    all.shuffle(&mut rand::thread_rng());
    for block in all {
        disk_tx.send(DiskCommand::WriteBlock(block))?;
    }

    let mut written = Vec::new();
    for _ in 0..3 {
        let (idx, valid) = next_written(&mut torrent_rx).await;
        assert!(valid);
        written.push(idx);
    }
    written.sort();
    assert_eq!(written, vec![0, 1, 2]);

    disk_tx.send(DiskCommand::Shutdown)?;
    handle.await??;
    assert_eq!(std::fs::read(&path)?, data);

    // Disk task is gone, later writes fail harmlessly.
    assert!(disk_tx.send(DiskCommand::Shutdown).is_err());
    Ok(())
}

#[tokio::test]
async fn test_disk_hash_mismatch() -> Result<(), Box<dyn std::error::Error>> {

    let (info, data, hashes) = test_data();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.bin");
    let (torrent_tx, mut torrent_rx) = mpsc::unbounded_channel();
    let (handle, disk_tx) = start_disk(&path, info.clone(), hashes, torrent_tx)?;

    // Corrupt the second block of piece 1.
    let mut bad = blocks(&info, &data, 1);
    bad[1].data = Bytes::from(vec![0xee; BLOCK_SIZE]);
    for block in bad {
        disk_tx.send(DiskCommand::WriteBlock(block))?;
    }
    assert_eq!(next_written(&mut torrent_rx).await, (1, false));

    // Downloaded again, this time intact.
    for block in blocks(&info, &data, 1) {
        disk_tx.send(DiskCommand::WriteBlock(block))?;
    }
    assert_eq!(next_written(&mut torrent_rx).await, (1, true));

    disk_tx.send(DiskCommand::Shutdown)?;
    handle.await??;

    let out = std::fs::read(&path)?;
    assert_eq!(&out[PIECE_LEN..2 * PIECE_LEN], &data[PIECE_LEN..2 * PIECE_LEN]);
    // Nothing else was written.
    assert!(out[..PIECE_LEN].iter().all(|b| *b == 0));
    Ok(())
}

#[tokio::test]
async fn test_disk_ignores_stale_blocks() -> Result<(), Box<dyn std::error::Error>> {

    let (info, data, hashes) = test_data();
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("out.bin");
    let (torrent_tx, mut torrent_rx) = mpsc::unbounded_channel();
    let (handle, disk_tx) = start_disk(&path, info.clone(), hashes, torrent_tx)?;

    for block in blocks(&info, &data, 2) {
        disk_tx.send(DiskCommand::WriteBlock(block))?;
    }
    assert_eq!(next_written(&mut torrent_rx).await, (2, true));

    // Duplicate of a written piece, and a piece that doesn't exist.
    for block in blocks(&info, &data, 2) {
        disk_tx.send(DiskCommand::WriteBlock(block))?;
    }
    disk_tx.send(DiskCommand::WriteBlock(BlockData {
        piece_idx: 7,
        offset: 0,
        data: Bytes::from_static(&[1, 2, 3]),
    }))?;
    disk_tx.send(DiskCommand::Shutdown)?;
    handle.await??;

    // Sender side of the torrent channel was dropped with the task.
    assert!(torrent_rx.recv().await.is_none());
    Ok(())
}

#[tokio::test]
async fn test_disk_open_error() -> Result<(), Box<dyn std::error::Error>> {
    let (info, _, hashes) = test_data();
    let dir = tempfile::tempdir()?;
    let (torrent_tx, _torrent_rx) = mpsc::unbounded_channel();
    // A directory can't be opened as the output file.
    let res = start_disk(dir.path(), info, hashes, torrent_tx);
    assert!(matches!(res, Err(DiskError::IoError(_))));
    Ok(())
}
