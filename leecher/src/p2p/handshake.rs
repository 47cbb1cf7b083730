use bytes::{BufMut, BytesMut};
use crate::ID;
use super::{PeerError, Result};

pub const PROTOCOL: [u8; 19] = *b"BitTorrent protocol";
pub const HANDSHAKE_LEN: usize = 68;

#[derive(Clone, PartialEq, Eq)]
pub struct Handshake {
    pub reserved:   [u8; 8],
    pub info_hash:  ID,
    pub peer_id:    ID,
}

impl Handshake {
    pub fn new(info_hash: ID, peer_id: ID) -> Self {
        Self {
            reserved:   [0; 8],
            info_hash,
            peer_id,
        }
    }

    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HANDSHAKE_LEN);
        dst.put_u8(PROTOCOL.len() as u8);
        dst.extend_from_slice(&PROTOCOL);
        dst.extend_from_slice(&self.reserved);
        dst.extend_from_slice(&self.info_hash);
        dst.extend_from_slice(&self.peer_id);
    }

    // Parses and validates a complete handshake frame.
    pub fn parse(frame: &[u8]) -> Result<Handshake> {
        if frame.len() != HANDSHAKE_LEN {
            return Err(PeerError::HandshakeLength(frame.len()));
        }
        if frame[0] as usize != PROTOCOL.len() || frame[1..20] != PROTOCOL {
            return Err(PeerError::IncorrectProtocol);
        }

        let mut reserved = [0; 8];
        reserved.copy_from_slice(&frame[20..28]);
        let mut info_hash = [0; 20];
        info_hash.copy_from_slice(&frame[28..48]);
        let mut peer_id = [0; 20];
        peer_id.copy_from_slice(&frame[48..68]);

        Ok(Handshake {
            reserved,
            info_hash,
            peer_id,
        })
    }
}

impl std::fmt::Debug for Handshake {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Handshake")
            .field("reserved", &self.reserved)
            .field("info_hash", &hex::encode(self.info_hash))
            .field("peer_id", &String::from_utf8_lossy(&self.peer_id))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(protocol: &[u8]) -> BytesMut {
        let mut src = BytesMut::new();
        src.put_u8(19);
        src.extend_from_slice(protocol);
        src.extend_from_slice(&[0; 8]);
        src.extend_from_slice(&[1; 20]);
        src.extend_from_slice(&[2; 20]);
        src
    }

    #[test]
    fn test_handshake_encoding() {
        let mut dst = BytesMut::new();
        Handshake::new([1; 20], [2; 20]).encode(&mut dst);
        assert_eq!(dst.len(), HANDSHAKE_LEN);
        assert_eq!(dst, raw(b"BitTorrent protocol"));
    }

    #[test]
    fn test_handshake_parse() {
        let handshake = Handshake::parse(&raw(b"BitTorrent protocol")).unwrap();
        assert_eq!(handshake.reserved, [0; 8]);
        assert_eq!(handshake.info_hash, [1; 20]);
        assert_eq!(handshake.peer_id, [2; 20]);
    }

    #[test]
    fn test_handshake_wrong_protocol() {
        // Right length, wrong protocol string.
        let src = raw(b"BitTorrent protocoL");
        assert_eq!(src.len(), HANDSHAKE_LEN);
        assert!(matches!(Handshake::parse(&src), Err(PeerError::IncorrectProtocol)));
    }

    #[test]
    fn test_handshake_wrong_protocol_len() {
        let mut src = raw(b"BitTorrent protocol");
        src[0] = 20;
        assert!(matches!(Handshake::parse(&src), Err(PeerError::IncorrectProtocol)));
    }

    #[test]
    fn test_handshake_wrong_length() {
        let src = raw(b"BitTorrent protocol");
        assert!(matches!(Handshake::parse(&src[..67]), Err(PeerError::HandshakeLength(67))));
        let mut long = src.clone();
        long.put_u8(0);
        assert!(matches!(Handshake::parse(&long), Err(PeerError::HandshakeLength(69))));
    }
}
