use std::{
    collections::{HashMap, VecDeque}, net::SocketAddr, path::PathBuf, sync::Arc, time::Duration,
};
use tokio::{sync::{mpsc, Mutex}, task::JoinHandle, time::{self, Instant}};
use tokio_util::sync::CancellationToken;
use crate::{
    config::{Config, PeerId},
    disk::{self, DiskCommand, DiskError, DiskTx},
    info::TorrentInfo,
    metainfo::MetaInfo,
    p2p::{state::{ConnState, SessionState}, PeerCommand, PeerHandle, PeerSession},
    pieces::PieceSet,
    stats::{Counter, Progress},
    tracker::{self, AnnounceParams, Event, RetryPolicy, TrackerError},
    Bitfield,
    UserCommand,
    UserTx,
    ID,
};

#[derive(Debug, thiserror::Error)]
pub enum TorrentError {

    #[error("tracker error: {0}")]
    Tracker(#[from] TrackerError),

    #[error("storage error: {0}")]
    Storage(#[from] DiskError),

    #[error("no peers left to download from")]
    NoPeers,

    #[error("download cancelled")]
    Cancelled,

    #[error("torrent task panicked")]
    Panic,

    #[error("channel error: {0}")]
    Channel(String),
}

impl<T> From<mpsc::error::SendError<T>> for TorrentError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        TorrentError::Channel(e.to_string())
    }
}

#[derive(Debug)]
pub enum TorrentCommand {

    // Sent by peer task whenever its connection state changes.
    PeerState { address: SocketAddr, state: SessionState },

    // Sent by disk task when a piece has been checked.
    PieceWritten { idx: usize, valid: bool },

    // Sent by disk task when it stops on an error.
    DiskFailure,

}

// Type aliases.
pub type Result<T> = std::result::Result<T, TorrentError>;
pub type TorrentTx = mpsc::UnboundedSender<TorrentCommand>;
pub type TorrentRx = mpsc::UnboundedReceiver<TorrentCommand>;

#[derive(Debug)]
pub struct TorrentContext {

    // The info hash for this torrent.
    pub info_hash: ID,

    // The client ID for this client.
    pub client_id: PeerId,

    // Torrent geometry.
    pub info: TorrentInfo,

    // What has been requested and received, shared by all sessions.
    pub pieces: Mutex<PieceSet>,

    // Commands to the torrent.
    pub torrent_tx: TorrentTx,

    // Commands to disk.
    pub disk_tx: DiskTx,

    pub config: Config,

}

pub struct TorrentParams {

    pub metainfo: MetaInfo,

    // File the content is written to.
    pub output: PathBuf,

    pub config: Config,

    pub user_tx: UserTx,

    pub cancel: CancellationToken,

}

pub struct Torrent {

    // Context is a read-only state accessible by peers in threads.
    ctx: Arc<TorrentContext>,

    // Peers we have active sessions with.
    peers: HashMap<SocketAddr, PeerHandle>,

    // Peers we know about but haven't had a session with.
    available: VecDeque<SocketAddr>,

    torrent_rx: TorrentRx,

    user_tx: UserTx,

    disk_handle: Option<JoinHandle<disk::Result<()>>>,

    // Parent of every session's token.
    cancel: CancellationToken,

    // Pieces verified and written by the disk task.
    verified: Bitfield,

    start_time: Instant,

    throughput: Counter,

}

impl Torrent {

    // Runs a download to the end and reports the outcome to the user.
    pub async fn start(params: TorrentParams) -> Result<()> {
        let user_tx = params.user_tx.clone();
        match Self::download(params).await {
            Ok(()) => {
                tracing::info!("torrent download complete");
                user_tx.send(UserCommand::Finished).ok();
                Ok(())
            },
            Err(e) => {
                tracing::error!("torrent failed: {}", e);
                user_tx.send(UserCommand::Failed(e.to_string())).ok();
                Err(e)
            },
        }
    }

    async fn download(params: TorrentParams) -> Result<()> {

        let TorrentParams { metainfo, output, config, user_tx, cancel } = params;
        tracing::info!("starting torrent {} ({})", metainfo.name(), metainfo.info_hash_hex());
        let info = TorrentInfo::new(&metainfo);

        let announce_params = AnnounceParams {
            info_hash: metainfo.info_hash(),
            client_id: config.client_id,
            port: config.port,
            uploaded: 0,
            downloaded: 0,
            left: info.total_len,
            event: Some(Event::Started),
            num_want: None,
        };
        let announce = tokio::select! {
            res = tracker::announce(metainfo.trackers(), announce_params, RetryPolicy::from_config(&config)) => res?,
            _ = cancel.cancelled() => return Err(TorrentError::Cancelled),
        };

        // Tracker lists may repeat peers.
        let mut available = VecDeque::with_capacity(announce.peers.len());
        for address in announce.peers {
            if !available.contains(&address) {
                available.push_back(address);
            }
        }
        if available.is_empty() {
            return Err(TorrentError::NoPeers);
        }
        tracing::info!("{} peers available", available.len());

        let (torrent_tx, torrent_rx) = mpsc::unbounded_channel();
        let (disk_handle, disk_tx) = disk::start_disk(
            &output,
            info.clone(),
            metainfo.piece_hashes().to_vec(),
            torrent_tx.clone(),
        )?;

        let verified = Bitfield::repeat(false, info.num_pieces as usize);
        let mut torrent = Torrent {
            ctx: Arc::new(TorrentContext {
                info_hash: metainfo.info_hash(),
                client_id: config.client_id,
                pieces: Mutex::new(PieceSet::new(&info)),
                info,
                torrent_tx,
                disk_tx,
                config,
            }),
            peers: HashMap::new(),
            available,
            torrent_rx,
            user_tx,
            disk_handle: Some(disk_handle),
            cancel,
            verified,
            start_time: Instant::now(),
            throughput: Counter::default(),
        };

        let res = torrent.run().await;
        let closed = torrent.shutdown().await;
        res?;
        closed.map_err(TorrentError::from)
    }

    #[tracing::instrument(skip_all, name = "torrent")]
    async fn run(&mut self) -> Result<()> {

        // interval panics on a zero period.
        let stagger = self.ctx.config.connect_stagger.max(Duration::from_millis(1));
        let mut connect_ticker = time::interval(stagger);
        let mut progress_ticker = time::interval(self.ctx.config.progress_interval.max(Duration::from_millis(1)));
        let mut last_tick = Instant::now();

        // Top level torrent loop.
        loop {
            tokio::select! {

                _ = self.cancel.cancelled() => return Err(TorrentError::Cancelled),

                // One new session per tick while there are free slots.
                _ = connect_ticker.tick() => self.connect_next_peer(),

                now = progress_ticker.tick() => {
                    self.throughput.reset(now.saturating_duration_since(last_tick));
                    last_tick = now;
                    self.send_progress().await;
                },

                Some(cmd) = self.torrent_rx.recv() => {
                    match cmd {

                        TorrentCommand::PeerState { address, state } => self.handle_peer_state(address, state),

                        TorrentCommand::PieceWritten { idx, valid } => {
                            if self.handle_piece_written(idx, valid).await {
                                return Ok(());
                            }
                        },

                        TorrentCommand::DiskFailure => return Err(self.disk_failure().await),

                    }
                },
            }

            if self.is_stalled().await {
                return Err(TorrentError::NoPeers);
            }
        }
    }

    fn connect_next_peer(&mut self) {
        if self.peers.len() >= self.ctx.config.max_connections {
            return;
        }
        let Some(address) = self.available.pop_front() else {
            return;
        };

        tracing::info!("connecting to peer {}", address);
        let (session, peer_tx) = PeerSession::new(address, self.ctx.clone());
        self.peers.insert(
            address,
            PeerHandle::start_session(session, peer_tx, self.cancel.child_token()),
        );
    }

    fn handle_peer_state(&mut self, address: SocketAddr, state: SessionState) {
        if let Some(peer) = self.peers.get_mut(&address) {
            peer.state = state;
            if state.is_closed() {
                tracing::debug!(
                    "session with {} closed, {} bytes downloaded, {} sessions left",
                    address, state.downloaded, self.peers.len() - 1,
                );
                self.peers.remove(&address);
            }
        } else {
            tracing::trace!("state for unknown peer: {}", address);
        }
    }

    // Returns whether the download is complete.
    async fn handle_piece_written(&mut self, idx: usize, valid: bool) -> bool {

        if valid {
            if idx < self.verified.len() && !self.verified[idx] {
                self.verified.set(idx, true);
                self.throughput += self.ctx.info.piece_len(idx) as u64;
            }
            // A failed copy of the same piece may have reset it since.
            self.ctx.pieces.lock().await.add_piece_received(idx);
            tracing::info!("piece {} verified, {} pieces remain", idx, self.verified.count_zeros());
            self.send_progress().await;

            if self.verified.all() {
                return true;
            }
        } else {
            // Download the piece again from whoever has it.
            self.ctx.pieces.lock().await.reset_piece(idx);
            for peer in self.peers.values() {
                peer.peer_tx.send(PeerCommand::PieceReset(idx)).ok();
            }
        }

        false
    }

    // No sessions and no peers left to try, while blocks are still missing.
    async fn is_stalled(&self) -> bool {
        self.peers.is_empty()
            && self.available.is_empty()
            && !self.ctx.pieces.lock().await.is_done()
    }

    async fn progress(&self) -> Progress {
        let pieces = self.ctx.pieces.lock().await;
        let total = pieces.num_pieces();
        let (completed, downloaded) = (0..total)
            .filter(|idx| pieces.is_piece_received(*idx))
            .fold((0usize, 0u64), |(n, bytes), idx| (n + 1, bytes + self.ctx.info.piece_len(idx) as u64));
        Progress {
            percent: if total > 0 { completed as f64 * 100.0 / total as f64 } else { 0.0 },
            completed,
            total,
            downloaded,
            verified: self.verified.count_ones(),
            verified_bytes: self.throughput.total(),
            num_peers: self.peers.len(),
            num_unchoked: self.peers.values()
                .filter(|p| p.state.conn_state == ConnState::Unchoked)
                .count(),
            num_seeders: self.peers.values()
                .filter(|p| total > 0 && p.state.num_pieces == total)
                .count(),
            time_elapsed: self.start_time.elapsed(),
            download_rate: self.throughput.avg(),
            peak_rate: self.throughput.peak(),
        }
    }

    async fn send_progress(&self) {
        let progress = self.progress().await;
        tracing::debug!("progress: {}", progress);
        self.user_tx.send(UserCommand::Progress(progress)).ok();
    }

    // The disk task stopped, its result says why.
    async fn disk_failure(&mut self) -> TorrentError {
        match self.close_disk().await {
            Err(e) => e.into(),
            Ok(()) => TorrentError::Channel("disk task stopped".to_string()),
        }
    }

    // Cancels every session and closes the output.
    async fn shutdown(&mut self) -> disk::Result<()> {

        tracing::info!("disconnecting from {} peers", self.peers.len());
        self.cancel.cancel();
        for (address, peer) in self.peers.drain() {
            if let Err(e) = peer.session_handle.await {
                tracing::warn!("session {} join error: {}", address, e);
            }
        }

        self.close_disk().await
    }

    // Waits for the disk task to finish its writes, only the first call does anything.
    async fn close_disk(&mut self) -> disk::Result<()> {
        let Some(handle) = self.disk_handle.take() else {
            return Ok(());
        };
        self.ctx.disk_tx.send(DiskCommand::Shutdown).ok();
        handle.await?
    }
}
