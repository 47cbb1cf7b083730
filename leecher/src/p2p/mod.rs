use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::sync::CancellationToken;

mod session;
mod message;
mod handshake;
mod framer;
mod queue;
pub mod state;

pub use session::PeerSession;
pub use message::Message;
pub use handshake::Handshake;
pub use framer::MessageFramer;
pub use queue::RequestQueue;

use self::state::SessionState;

type Result<T, E = PeerError> = std::result::Result<T, E>;
pub type PeerTx = mpsc::UnboundedSender<PeerCommand>;
pub type PeerRx = mpsc::UnboundedReceiver<PeerCommand>;

#[derive(thiserror::Error, Debug)]
pub enum PeerError {

    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("connection timeout")]
    Timeout,

    #[error("handshake provided incorrect protocol")]
    IncorrectProtocol,

    #[error("handshake has length {0}, expected 68")]
    HandshakeLength(usize),

    #[error("handshake provided incorrect info-hash")]
    IncorrectInfoHash,

    #[error("no handshake recieved")]
    NoHandshake,

    #[error("invalid message ID: {0}")]
    InvalidMessageId(u8),

    #[error("message with id {id} too short, payload has {len} bytes")]
    ShortMessage {
        id: u8,
        len: usize,
    },

    #[error("invalid message payload")]
    InvalidMessage,

    #[error("frame of {0} bytes exceeds limit")]
    FrameTooLarge(usize),

    #[error("channel error: {0}")]
    Channel(String),
}

impl PeerError {
    // Whether the peer broke the protocol, as opposed to the connection failing.
    pub fn is_protocol(&self) -> bool {
        !matches!(self, PeerError::Io(_) | PeerError::Timeout | PeerError::Channel(_))
    }
}

impl<T> From<mpsc::error::SendError<T>> for PeerError {
    fn from(e: mpsc::error::SendError<T>) -> Self {
        PeerError::Channel(e.to_string())
    }
}

// Commands that can be sent to a peer.
#[derive(Debug)]
pub enum PeerCommand {

    // A piece failed its hash check and has to be downloaded again.
    PieceReset(usize),

}

#[derive(Debug)]
pub struct PeerHandle {

    // Sends commands to the session.
    pub peer_tx: PeerTx,

    // Last state reported by the session.
    pub state: SessionState,

    // Handle to the peer session.
    pub session_handle: JoinHandle<()>,

}

impl PeerHandle {

    pub fn start_session(
        session: PeerSession,
        peer_tx: PeerTx,
        cancel: CancellationToken,
    ) -> PeerHandle {
        let session_handle = tokio::spawn(session.start(cancel));
        PeerHandle {
            peer_tx,
            state: SessionState::default(),
            session_handle,
        }
    }
}
