use std::path::PathBuf;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

mod config;
mod metainfo;
mod info;
mod torrent;
mod tracker;
mod p2p;
mod disk;
mod block;
mod pieces;
pub mod stats;

// Most commonly used block size - 16KB.
const BLOCK_SIZE: usize = 0x4000;

type Bitfield = bitvec::vec::BitVec<u8, bitvec::order::Msb0>;

// 20 byte SHA1 info hash.
pub type ID = [u8; 20];

// Messages the users of the client expect to recieve.
#[derive(Debug)]
pub enum UserCommand {

    // Sent periodically and whenever a piece completes.
    Progress(stats::Progress),

    // Every piece is verified and the output is closed.
    Finished,

    // The download stopped, with the reason.
    Failed(String),

}

pub type UserTx = mpsc::UnboundedSender<UserCommand>;
pub type UserRx = mpsc::UnboundedReceiver<UserCommand>;

// Re-exports
pub use config::{Config, PeerId};
pub use block::{BlockData, BlockInfo};
pub use info::TorrentInfo;
pub use metainfo::{MetaInfo, MetaInfoError};
pub use p2p::{Handshake, Message, MessageFramer, PeerError};
pub use p2p::state::{SessionState, ConnState};
pub use pieces::PieceSet;
pub use torrent::TorrentError;
pub use tracker::{announce, AnnounceParams, AnnounceResponse, Event, RetryPolicy, TrackerError};

// Starts downloading the torrent into the output file.
// Progress and the final outcome are sent on the returned receiver.
pub fn start_download(metainfo: MetaInfo, output: impl Into<PathBuf>, config: Option<Config>) -> (Handle, UserRx) {
    let (user_tx, user_rx) = mpsc::unbounded_channel();
    let cancel = CancellationToken::new();
    let params = torrent::TorrentParams {
        metainfo,
        output: output.into(),
        config: config.unwrap_or_default(),
        user_tx,
        cancel: cancel.clone(),
    };
    let torrent_handle = tokio::spawn(
        torrent::Torrent::start(params).instrument(tracing::info_span!("download"))
    );
    (
        Handle {
            cancel,
            torrent_handle,
        },
        user_rx
    )
}

// Handle returned to the user to interact with the download.
pub struct Handle {

    cancel: CancellationToken,

    torrent_handle: JoinHandle<Result<(), TorrentError>>,

}

impl Handle {

    // Waits for the download to finish.
    pub async fn join(self) -> Result<(), TorrentError> {
        self.torrent_handle.await.map_err(|_| TorrentError::Panic)?
    }

    // Cancels the download, sessions stop and the output is closed.
    pub async fn shutdown(self) -> Result<(), TorrentError> {
        self.cancel.cancel();
        match self.join().await {
            Err(TorrentError::Cancelled) => Ok(()),
            res => res,
        }
    }
}
