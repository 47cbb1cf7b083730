use bytes::{Buf, BufMut, Bytes, BytesMut};
use crate::{block::{BlockData, BlockInfo}, Bitfield};
use super::{PeerError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {

    // The keep alive message advises peers not to close the connection,
    // even if they haven’t received a message in some time.
    KeepAlive,

    // A choke message tells a peer that no further requests will be satisfied.
    Choke,

    // Conversely unchoke signifies that requests from the peer will be served.
    Unchoke,

    // Notifies a peer that the client is interested in making requests for blocks.
    Interested,

    // Notifies a peer the client is no longer interested in requesting blocks.
    NotInterested,

    // Tells a peer that the client has a piece, referenced by the piece index.
    Have { idx: u32 },

    // The bitfield message is a short form method of communicating to a peer what pieces
    // a client has usually sent after the handshake has been completed.
    Bitfield(Bitfield),

    // When a client wants to request data, they reference the index of the piece, the index
    // of the start of the block within the piece, and the length of the block (usually 16KB).
    Request(BlockInfo),

    // Clients send blocks in the piece message, referencing piece index and block offset.
    Block(BlockData),

    // The cancel message is sent to cancel a request for a block.
    Cancel(BlockInfo),

    // The port message is sent to inform the peer of the port number that the client is listening on.
    Port { port: u16 },
}

impl Message {

    pub fn encode(&self, dst: &mut BytesMut) {
        match self {

            // [0, 0, 0, 0]
            Message::KeepAlive => dst.put_u32(0),

            // [0, 0, 0, 1, 0]
            Message::Choke => {
                dst.put_u32(1);
                dst.put_u8(0);
            },

            // [0, 0, 0, 1, 1]
            Message::Unchoke => {
                dst.put_u32(1);
                dst.put_u8(1);
            },

            // [0, 0, 0, 1, 2]
            Message::Interested => {
                dst.put_u32(1);
                dst.put_u8(2);
            },

            // [0, 0, 0, 1, 3]
            Message::NotInterested => {
                dst.put_u32(1);
                dst.put_u8(3);
            },

            // have: <len=0005><id=4><piece index>
            Message::Have { idx } => {
                dst.put_u32(5);
                dst.put_u8(4);
                dst.put_u32(*idx);
            },

            // bitfield: <len=0001+X><id=5><bitfield>
            Message::Bitfield(bitfield) => {
                let raw = bitfield.as_raw_slice();
                dst.put_u32(1 + raw.len() as u32);
                dst.put_u8(5);
                dst.extend_from_slice(raw);
            },

            // request: <len=0013><id=6><index><begin><length>
            Message::Request(block) => {
                dst.put_u32(13);
                dst.put_u8(6);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            },

            // piece: <len=0009+X><id=7><index><begin><block>
            Message::Block(block) => {
                dst.put_u32(9 + block.data.len() as u32);
                dst.put_u8(7);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.extend_from_slice(&block.data);
            },

            // cancel: <len=0013><id=8><index><begin><length>
            Message::Cancel(block) => {
                dst.put_u32(13);
                dst.put_u8(8);
                dst.put_u32(block.piece_idx as u32);
                dst.put_u32(block.offset as u32);
                dst.put_u32(block.len as u32);
            },

            // port: <len=0003><id=9><listen-port>
            Message::Port { port } => {
                dst.put_u32(3);
                dst.put_u8(9);
                dst.put_u16(*port);
            },
        }
    }

    // Parses one complete frame, length prefix included.
    pub fn parse(mut frame: Bytes) -> Result<Message> {

        if frame.len() < 4 {
            return Err(PeerError::InvalidMessage);
        }
        let msg_len = frame.get_u32() as usize;
        if msg_len != frame.len() {
            return Err(PeerError::InvalidMessage);
        }
        if msg_len == 0 {
            return Ok(Message::KeepAlive);
        }

        let id = frame.get_u8();
        let msg = match id {
            0 => Message::Choke,
            1 => Message::Unchoke,
            2 => Message::Interested,
            3 => Message::NotInterested,
            4 => {
                expect_len(id, &frame, 4)?;
                Message::Have { idx: frame.get_u32() }
            },
            5 => Message::Bitfield(Bitfield::from_vec(frame.to_vec())),
            6 => {
                expect_len(id, &frame, 12)?;
                Message::Request(get_block_info(&mut frame))
            },
            7 => {
                if frame.len() < 8 {
                    return Err(PeerError::ShortMessage { id, len: frame.len() });
                }
                let piece_idx = frame.get_u32() as usize;
                let offset = frame.get_u32() as usize;
                // Remainder is the block, no copy.
                Message::Block(BlockData { piece_idx, offset, data: frame })
            },
            8 => {
                expect_len(id, &frame, 12)?;
                Message::Cancel(get_block_info(&mut frame))
            },
            9 => {
                expect_len(id, &frame, 2)?;
                Message::Port { port: frame.get_u16() }
            },
            id => return Err(PeerError::InvalidMessageId(id)),
        };

        Ok(msg)
    }
}

fn expect_len(id: u8, payload: &Bytes, len: usize) -> Result<()> {
    if payload.len() < len {
        Err(PeerError::ShortMessage { id, len: payload.len() })
    } else if payload.len() > len {
        Err(PeerError::InvalidMessage)
    } else {
        Ok(())
    }
}

fn get_block_info(payload: &mut Bytes) -> BlockInfo {
    let piece_idx = payload.get_u32() as usize;
    let offset = payload.get_u32() as usize;
    let len = payload.get_u32() as usize;
    BlockInfo { piece_idx, offset, len }
}

impl std::fmt::Display for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Message::KeepAlive => write!(f, "keep alive"),
            Message::Choke => write!(f, "choke"),
            Message::Unchoke => write!(f, "unchoke"),
            Message::Interested => write!(f, "interested"),
            Message::NotInterested => write!(f, "not interested"),
            Message::Have { idx } => write!(f, "have piece idx: {}", idx),
            Message::Bitfield(bf) => write!(f, "bitfield with {} pieces", bf.count_ones()),
            Message::Request(block) => write!(f, "request for block {{ piece idx: {}, offset {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.len,
            ),
            Message::Block(block) => write!(f, "block data {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.data.len(),
            ),
            Message::Cancel(block) => write!(f, "cancel for block {{ piece idx: {}, offset: {}, length: {} }}",
                block.piece_idx,
                block.offset,
                block.len
            ),
            Message::Port { port } => write!(f, "port {}", port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bitvec::prelude::*;

    fn encoded(msg: &Message) -> Bytes {
        let mut buf = BytesMut::new();
        msg.encode(&mut buf);
        buf.freeze()
    }

    #[test]
    fn test_msg_encoding() {
        let cases: Vec<(Message, Vec<u8>)> = vec![
            (Message::KeepAlive, vec![0, 0, 0, 0]),
            (Message::Choke, vec![0, 0, 0, 1, 0]),
            (Message::Unchoke, vec![0, 0, 0, 1, 1]),
            (Message::Interested, vec![0, 0, 0, 1, 2]),
            (Message::NotInterested, vec![0, 0, 0, 1, 3]),
            (Message::Have { idx: 0xb }, vec![0, 0, 0, 5, 4, 0, 0, 0, 0xb]),
            (
                Message::Bitfield(BitVec::<u8, Msb0>::from_slice(&[0x1, 0x2, 0x3])),
                vec![0, 0, 0, 4, 5, 0x1, 0x2, 0x3],
            ),
            (
                Message::Request(BlockInfo { piece_idx: 0xb, offset: 0x134000, len: 0x4000 }),
                vec![0, 0, 0, 0xd, 0x6, 0, 0, 0, 0xb, 0, 0x13, 0x40, 0, 0, 0, 0x40, 0],
            ),
            (
                Message::Block(BlockData { piece_idx: 0xb, offset: 0x134000, data: Bytes::from_static(&[0x1, 0x2, 0x3]) }),
                vec![0, 0, 0, 12, 0x7, 0, 0, 0, 0xb, 0, 0x13, 0x40, 0, 0x1, 0x2, 0x3],
            ),
            (
                Message::Cancel(BlockInfo { piece_idx: 1, offset: 0, len: 0x4000 }),
                vec![0, 0, 0, 0xd, 0x8, 0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0x40, 0],
            ),
            (Message::Port { port: 6881 }, vec![0, 0, 0, 3, 9, 0x1a, 0xe1]),
        ];

        for (msg, raw) in cases {
            assert_eq!(encoded(&msg).as_ref(), raw.as_slice(), "encoding of {}", msg);
            let parsed = Message::parse(Bytes::from(raw)).unwrap();
            assert_eq!(parsed, msg, "decoded message does not match expected");
        }
    }

    #[test]
    fn test_request_layout() {
        let raw = encoded(&Message::Request(BlockInfo { piece_idx: 2, offset: 16_384, len: 16_384 }));
        assert_eq!(raw.len(), 17);
        assert_eq!(raw[0..4], 13u32.to_be_bytes());
        assert_eq!(raw[4], 6);
        assert_eq!(raw[5..9], 2u32.to_be_bytes());
        assert_eq!(raw[9..13], 16_384u32.to_be_bytes());
        assert_eq!(raw[13..17], 16_384u32.to_be_bytes());
    }

    #[test]
    fn test_empty_payloads() {
        // Bitfield with no bytes, block with no data.
        let empty_bf = Message::Bitfield(Bitfield::new());
        assert_eq!(encoded(&empty_bf).as_ref(), &[0, 0, 0, 1, 5]);
        assert_eq!(Message::parse(encoded(&empty_bf)).unwrap(), empty_bf);

        let empty_block = Message::Block(BlockData { piece_idx: 7, offset: 16_384, data: Bytes::new() });
        assert_eq!(encoded(&empty_block).len(), 13);
        assert_eq!(Message::parse(encoded(&empty_block)).unwrap(), empty_block);
    }

    #[test]
    fn test_bitfield_bit_order() {
        // Bit 7 - j of byte i is piece i * 8 + j.
        let msg = Message::parse(Bytes::from_static(&[0, 0, 0, 3, 5, 0b1000_0001, 0b0100_0000])).unwrap();
        match msg {
            Message::Bitfield(bf) => {
                let pieces: Vec<usize> = bf.iter_ones().collect();
                assert_eq!(pieces, vec![0, 7, 9]);
            },
            other => panic!("expected bitfield, got {}", other),
        }
    }

    #[test]
    fn test_msg_parse_short() {
        // Have with 3 byte index.
        let result = Message::parse(Bytes::from_static(&[0, 0, 0, 4, 4, 0, 0, 1]));
        assert!(matches!(result, Err(PeerError::ShortMessage { id: 4, len: 3 })));

        // Piece without its begin field.
        let result = Message::parse(Bytes::from_static(&[0, 0, 0, 5, 7, 0, 0, 0, 1]));
        assert!(matches!(result, Err(PeerError::ShortMessage { id: 7, len: 4 })));

        // Request missing length.
        let result = Message::parse(Bytes::from_static(&[0, 0, 0, 9, 6, 0, 0, 0, 1, 0, 0, 0, 0]));
        assert!(matches!(result, Err(PeerError::ShortMessage { id: 6, len: 8 })));
    }

    #[test]
    fn test_msg_parse_length_mismatch() {
        let result = Message::parse(Bytes::from_static(&[0, 0, 0, 2, 1]));
        assert!(matches!(result, Err(PeerError::InvalidMessage)));
    }

    #[test]
    fn test_msg_decode_invalid_id() {
        match Message::parse(Bytes::from_static(&[0, 0, 0, 1, 255])) {
            Err(PeerError::InvalidMessageId(id)) => assert_eq!(id, 255),
            other => panic!("expected PeerError::InvalidMessageId, got {:?}", other),
        }
    }
}
