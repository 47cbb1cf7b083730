use bytes::{Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};
use super::{handshake::{Handshake, HANDSHAKE_LEN}, message::Message, PeerError};

// Largest frame we accept, a 1MiB block plus piece message header.
pub const MAX_FRAME_LEN: usize = (1 << 20) + 13;

// Splits the byte stream of a connection into complete frames.
// The first frame is the 68 byte handshake, every frame after that is length prefixed.
#[derive(Debug)]
pub struct MessageFramer {
    awaiting_handshake: bool,
}

impl MessageFramer {
    pub fn new() -> Self {
        Self { awaiting_handshake: true }
    }
}

impl Default for MessageFramer {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for MessageFramer {

    type Item = Bytes;
    type Error = PeerError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {

        let frame_len = if self.awaiting_handshake {
            HANDSHAKE_LEN
        } else {
            // Can't read message length.
            if src.len() < 4 {
                return Ok(None);
            }
            let msg_len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
            4 + msg_len
        };

        if frame_len > MAX_FRAME_LEN {
            return Err(PeerError::FrameTooLarge(frame_len));
        }

        if src.len() < frame_len {
            // Haven't received all of the frame.
            src.reserve(frame_len - src.len());
            return Ok(None);
        }

        self.awaiting_handshake = false;
        Ok(Some(src.split_to(frame_len).freeze()))
    }
}

impl Encoder<Handshake> for MessageFramer {

    type Error = PeerError;

    fn encode(&mut self, item: Handshake, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}

impl Encoder<Message> for MessageFramer {

    type Error = PeerError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode(dst);
        Ok(())
    }
}
