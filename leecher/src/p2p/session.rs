use std::{net::SocketAddr, sync::Arc};
use tokio::{sync::mpsc, net::TcpStream, time::{self, Instant}};
use tokio_util::{codec::Framed, sync::CancellationToken};
use futures::{SinkExt, StreamExt, stream::{SplitSink, SplitStream}};
use crate::{
    block::{BlockData, BlockInfo},
    disk::DiskCommand,
    torrent::{TorrentCommand, TorrentContext},
    Bitfield,
};
use super::{*, message::*, handshake::*, framer::*, state::*};

type MessageSink = SplitSink<Framed<TcpStream, MessageFramer>, Message>;
type FrameStream = SplitStream<Framed<TcpStream, MessageFramer>>;

#[derive(Debug)]
pub struct PeerSession {

    // The peer's IP address.
    address: SocketAddr,

    // Context is a read only state accessible by all peers.
    torrent_ctx: Arc<TorrentContext>,

    // Commands to the peer.
    peer_rx: PeerRx,

    // Blocks the peer can serve that we haven't requested from it yet.
    queue: RequestQueue,

    // The single request in flight to the peer.
    outstanding: Option<BlockInfo>,

    // Bitfield of pieces the peer currently has.
    bitfield: Bitfield,

    // Last time a frame was read from the peer.
    last_read: Instant,

    state: SessionState,

}

impl PeerSession {

    pub fn new(address: SocketAddr, torrent_ctx: Arc<TorrentContext>) -> (PeerSession, PeerTx) {

        let (peer_tx, peer_rx) = mpsc::unbounded_channel();
        let bitfield = Bitfield::repeat(false, torrent_ctx.info.num_pieces as usize);

        (
            PeerSession {
                address,
                torrent_ctx,
                peer_rx,
                queue: RequestQueue::new(),
                outstanding: None,
                bitfield,
                last_read: Instant::now(),
                state: SessionState::default(),
            },
            peer_tx,
        )
    }

    // Runs the session until it ends or is cancelled, then reports it closed.
    pub async fn start(mut self, cancel: CancellationToken) {
        let address = self.address;
        tokio::select! {
            res = self.start_session() => match res {
                Ok(()) => tracing::info!(%address, "session ended"),
                Err(e) if e.is_protocol() => tracing::warn!(%address, "protocol error: {}", e),
                Err(e) => tracing::info!(%address, "network error: {}", e),
            },
            _ = cancel.cancelled() => tracing::debug!(%address, "session cancelled"),
        }
        self.disconnect();
    }

    #[tracing::instrument(name = "peer", skip(self), fields(address = %self.address))]
    pub async fn start_session(&mut self) -> Result<()> {

        self.set_state(ConnState::Connecting);
        let stream = time::timeout(
            self.torrent_ctx.config.connect_timeout,
            TcpStream::connect(self.address),
        )
            .await
            .map_err(|_| PeerError::Timeout)??;
        tracing::trace!("outbound connection successful");

        let mut socket = Framed::new(stream, MessageFramer::new());
        self.exchange_handshake(&mut socket).await?;

        tracing::debug!("send: interested");
        socket.send(Message::Interested).await?;
        self.set_state(ConnState::Choked);

        self.run(socket).await
    }

    pub fn disconnect(&mut self) {
        self.outstanding = None;
        self.set_state(ConnState::Closed);
    }

    async fn exchange_handshake(&mut self, socket: &mut Framed<TcpStream, MessageFramer>) -> Result<()> {

        self.set_state(ConnState::Handshaking);
        let handshake = Handshake::new(self.torrent_ctx.info_hash, self.torrent_ctx.client_id.0);
        tracing::debug!("send handshake");
        socket.send(handshake).await?;

        tracing::trace!("waiting for handshake");
        let frame = match time::timeout(self.torrent_ctx.config.read_timeout, socket.next()).await {
            Err(_) => return Err(PeerError::Timeout),
            Ok(None) => return Err(PeerError::NoHandshake),
            Ok(Some(frame)) => frame?,
        };

        let handshake = Handshake::parse(&frame)?;
        if handshake.info_hash != self.torrent_ctx.info_hash {
            return Err(PeerError::IncorrectInfoHash);
        }

        tracing::info!("handshake successful, peer connected");
        Ok(())
    }

    async fn run(&mut self, socket: Framed<TcpStream, MessageFramer>) -> Result<()> {

        let (mut sink, mut stream): (MessageSink, FrameStream) = socket.split();
        let mut ticker = time::interval(time::Duration::from_secs(1));
        self.last_read = Instant::now();

        loop { tokio::select! {

            // Frame from peer.
            frame = stream.next() => {
                let frame = match frame {
                    Some(frame) => frame?,
                    None => {
                        tracing::info!("peer closed connection");
                        break;
                    },
                };
                self.last_read = Instant::now();
                let msg = Message::parse(frame)?;
                self.handle_msg(&mut sink, msg).await?;
            },

            // Command from the torrent.
            Some(cmd) = self.peer_rx.recv() => {
                match cmd {
                    PeerCommand::PieceReset(idx) => self.handle_piece_reset(&mut sink, idx).await?,
                }
            },

            t = ticker.tick() => self.tick(&mut sink, t).await?,

        }

        if self.state.is_closed() {
            break;
        }}

        Ok(())
    }

    // Logs a message and sends to peer.
    #[inline(always)]
    async fn send_message(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::debug!("send: {}", msg);
        sink.send(msg).await
    }

    async fn handle_msg(&mut self, sink: &mut MessageSink, msg: Message) -> Result<()> {
        tracing::debug!("read: {}", msg);

        match msg {

            Message::KeepAlive => {},

            Message::Choke => self.handle_choke(),

            Message::Unchoke => {
                if self.queue.choked {
                    self.queue.choked = false;
                    self.set_state(ConnState::Unchoked);
                    self.request_next(sink).await?;
                }
            },

            Message::Bitfield(bitfield) => self.handle_bitfield(sink, bitfield).await?,

            Message::Have { idx } => self.handle_have(sink, idx).await?,

            Message::Block(block) => self.handle_block(sink, block).await?,

            // We never upload, so requests from the peer go unanswered.
            Message::Interested
            | Message::NotInterested
            | Message::Request(_)
            | Message::Cancel(_)
            | Message::Port { .. } => tracing::trace!("ignoring message"),

        }

        Ok(())
    }

    fn handle_choke(&mut self) {
        if self.torrent_ctx.config.close_on_choke {
            tracing::info!("choked by peer, closing session");
            self.disconnect();
            return;
        }
        if !self.queue.choked {
            self.queue.choked = true;
            // The peer discards pending requests when it chokes.
            if let Some(block) = self.outstanding.take() {
                self.queue.requeue(block);
            }
            self.set_state(ConnState::Choked);
        }
    }

    async fn handle_bitfield(&mut self, sink: &mut MessageSink, mut bitfield: Bitfield) -> Result<()> {
        let num_pieces = self.torrent_ctx.info.num_pieces as usize;
        tracing::info!("peer has {}/{} pieces", bitfield.count_ones(), num_pieces);
        // Remove trailing bits.
        bitfield.resize(num_pieces, false);

        let was_empty = self.queue.is_empty();
        self.queue.enqueue_bitfield(&bitfield, &self.torrent_ctx.info);
        self.state.num_pieces = bitfield.count_ones();
        self.bitfield = bitfield;

        if was_empty {
            self.request_next(sink).await?;
        }
        Ok(())
    }

    async fn handle_have(&mut self, sink: &mut MessageSink, idx: u32) -> Result<()> {
        let idx = idx as usize;
        if idx >= self.bitfield.len() {
            tracing::warn!("have msg with invalid idx: {}", idx);
            return Ok(());
        }
        // Peer already has piece.
        if self.bitfield[idx] {
            return Ok(());
        }
        self.bitfield.set(idx, true);
        self.state.num_pieces += 1;

        let was_empty = self.queue.is_empty();
        self.queue.enqueue_piece(idx, &self.torrent_ctx.info);
        if was_empty {
            self.request_next(sink).await?;
        }
        Ok(())
    }

    async fn handle_block(&mut self, sink: &mut MessageSink, block: BlockData) -> Result<()> {

        let info = block.info();
        if !self.torrent_ctx.info.is_valid_block(&info) {
            tracing::warn!("invalid block: {:?}", info);
            return Ok(());
        }
        if self.outstanding != Some(info) {
            tracing::warn!("unexpected block: {:?}", info);
            return Ok(());
        }
        self.outstanding = None;
        self.state.downloaded += info.len as u64;

        self.torrent_ctx.disk_tx.send(DiskCommand::WriteBlock(block))?;
        let done = {
            let mut pieces = self.torrent_ctx.pieces.lock().await;
            pieces.add_received(&info);
            pieces.is_done()
        };

        if done {
            tracing::info!("all blocks received");
            return Ok(());
        }
        self.request_next(sink).await
    }

    // A piece failed verification, queue it again if the peer has it.
    async fn handle_piece_reset(&mut self, sink: &mut MessageSink, idx: usize) -> Result<()> {
        if !self.bitfield.get(idx).map_or(false, |b| *b) {
            return Ok(());
        }
        tracing::debug!("re-queueing piece {}", idx);
        self.queue.enqueue_piece(idx, &self.torrent_ctx.info);
        self.request_next(sink).await
    }

    // Request the next block from the queue that is still needed.
    // Only one request is in flight at a time.
    async fn request_next(&mut self, sink: &mut MessageSink) -> Result<()> {

        if self.queue.choked || self.outstanding.is_some() {
            return Ok(());
        }

        let request = {
            let mut pieces = self.torrent_ctx.pieces.lock().await;
            let mut request = None;
            for _ in 0..self.queue.len() {
                let Some(block) = self.queue.dequeue() else { break };
                if pieces.needed(&block) {
                    pieces.add_requested(&block);
                    request = Some(block);
                    break;
                }
                // In flight with another peer, keep it in case that peer never delivers.
                if !pieces.is_block_received(&block) {
                    self.queue.requeue(block);
                }
            }
            request
        };

        if let Some(block) = request {
            self.outstanding = Some(block);
            self.send_message(sink, Message::Request(block)).await?;
        }
        Ok(())
    }

    async fn tick(&mut self, sink: &mut MessageSink, time: Instant) -> Result<()> {

        if time.saturating_duration_since(self.last_read) >= self.torrent_ctx.config.read_timeout {
            tracing::warn!("disconnecting peer due to inactivity");
            return Err(PeerError::Timeout);
        }

        // Blocks other peers failed to deliver become needed again over time.
        if self.outstanding.is_none() && !self.queue.is_empty() {
            self.request_next(sink).await?;
        }
        Ok(())
    }

    fn set_state(&mut self, conn_state: ConnState) {
        if self.state.conn_state == conn_state {
            return;
        }
        tracing::trace!("state: {:?} -> {:?}", self.state.conn_state, conn_state);
        self.state.conn_state = conn_state;
        self.torrent_ctx.torrent_tx.send(TorrentCommand::PeerState {
            address: self.address,
            state: self.state,
        }).ok();
    }
}
