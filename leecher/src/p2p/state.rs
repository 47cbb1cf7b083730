#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum ConnState {
    #[default]
    Connecting,
    Handshaking,
    // Handshake done, waiting for the peer to unchoke us.
    Choked,
    Unchoked,
    Closed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SessionState {

    pub conn_state: ConnState,

    // Number of pieces the peer has told us about.
    pub num_pieces: usize,

    // Bytes of block data received from the peer.
    pub downloaded: u64,

}

impl SessionState {

    pub fn is_closed(&self) -> bool {
        self.conn_state == ConnState::Closed
    }
}
