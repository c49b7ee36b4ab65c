//! Streaming framing shared by all three inbound sub-protocols.
//!
//! Socket reads are not packet aligned, so bytes accumulate in a [`BytesMut`]
//! until a whole `opcode [size] body` frame is present. Nothing is consumed
//! for a partial frame. Which opcodes are legal, and how their bodies are
//! sized, depends on the [`Catalog`] the decoder is currently set to.

use bytes::{Buf, BytesMut};
use thiserror::Error;
use tokio_util::codec::Decoder;

use crate::packet::Packet;
use crate::prot::{ClientProt, Js5Prot, LoginProt, PacketSize};

/// Errors raised while framing.
#[derive(Error, Debug)]
pub enum FrameError {
    /// The active catalog does not recognise this opcode. Only the opcode
    /// byte has been consumed.
    #[error("unknown opcode {0}")]
    UnknownOpcode(u8),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opcode table used to size inbound frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Catalog {
    Login,
    CacheTransfer,
    Lobby,
}

impl Catalog {
    pub fn size_of(self, opcode: u8) -> Option<PacketSize> {
        match self {
            Catalog::Login => LoginProt::from_opcode(opcode).map(LoginProt::size),
            // Every cache request has the same body, known opcode or not
            Catalog::CacheTransfer => Some(Js5Prot::size()),
            Catalog::Lobby => ClientProt::from_opcode(opcode).map(ClientProt::size),
        }
    }
}

/// One complete inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub opcode: u8,
    pub body: Packet,
}

/// Cuts frames out of a read buffer according to the current [`Catalog`].
#[derive(Debug, Clone)]
pub struct FrameDecoder {
    catalog: Catalog,
}

impl FrameDecoder {
    pub fn new(catalog: Catalog) -> Self {
        Self { catalog }
    }

    pub fn catalog(&self) -> Catalog {
        self.catalog
    }

    /// Switches the opcode table; takes effect from the next frame.
    pub fn set_catalog(&mut self, catalog: Catalog) {
        self.catalog = catalog;
    }
}

impl Decoder for FrameDecoder {
    type Item = Frame;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, FrameError> {
        let Some(&opcode) = src.first() else {
            return Ok(None);
        };

        let Some(size) = self.catalog.size_of(opcode) else {
            src.advance(1);
            return Err(FrameError::UnknownOpcode(opcode));
        };

        let header = 1 + size.prefix_len();
        if src.len() < header {
            src.reserve(header - src.len());
            return Ok(None);
        }

        let body_len = match size {
            PacketSize::Fixed(n) => n,
            PacketSize::VarByte => usize::from(src[1]),
            PacketSize::VarShort => usize::from(u16::from_be_bytes([src[1], src[2]])),
        };

        if src.len() < header + body_len {
            src.reserve(header + body_len - src.len());
            return Ok(None);
        }

        src.advance(header);
        let body = src.split_to(body_len);

        Ok(Some(Frame {
            opcode,
            body: Packet::wrap(body.to_vec()),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby() -> FrameDecoder {
        FrameDecoder::new(Catalog::Lobby)
    }

    fn decode_all(decoder: &mut FrameDecoder, buf: &mut BytesMut) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Some(frame) = decoder.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_waits_for_complete_body() {
        let mut decoder = lobby();
        // WINDOW_STATUS has a fixed six byte body
        let mut buf = BytesMut::from(&[18u8, 1, 0, 2][..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        assert_eq!(buf.len(), 4);

        buf.extend_from_slice(&[0, 3, 4]);
        let frame = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(frame.opcode, 18);
        assert_eq!(frame.body.as_slice(), &[1, 0, 2, 0, 3, 4]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_var_byte_and_var_short_prefixes() {
        let mut decoder = lobby();
        let mut buf = BytesMut::from(&[71u8, 3, 1, 0][..]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&[0, 54, 0, 2, 9, 9, 16]);

        let cheat = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(cheat.opcode, 71);
        assert_eq!(cheat.body.len(), 3);

        let keyboard = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(keyboard.opcode, 54);
        assert_eq!(keyboard.body.as_slice(), &[9, 9]);

        let keepalive = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(keepalive.opcode, 16);
        assert!(keepalive.body.is_empty());
        assert!(decoder.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn test_unknown_opcode_consumes_one_byte() {
        let mut decoder = lobby();
        let mut buf = BytesMut::from(&[250u8, 16][..]);
        assert!(matches!(
            decoder.decode(&mut buf),
            Err(FrameError::UnknownOpcode(250))
        ));
        assert_eq!(buf.len(), 1);
    }

    #[test]
    fn test_catalog_switch_applies_to_next_frame() {
        // A login handshake followed by a cache request in the same read
        let mut buf = BytesMut::from(&[14u8, 1, 5, 0, 0, 0, 9][..]);
        let mut decoder = FrameDecoder::new(Catalog::Login);

        let init = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(init.opcode, 14);
        assert!(init.body.is_empty());

        decoder.set_catalog(Catalog::CacheTransfer);
        let request = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(request.opcode, 1);
        assert_eq!(request.body.as_slice(), &[5, 0, 0, 0, 9]);
        assert_eq!(decoder.catalog(), Catalog::CacheTransfer);
    }

    #[test]
    fn test_cache_catalog_sizes_every_opcode() {
        assert_eq!(Catalog::CacheTransfer.size_of(200), Some(PacketSize::Fixed(5)));
        assert_eq!(Catalog::Login.size_of(200), None);
    }

    #[test]
    fn test_split_delivery_matches_whole_delivery() {
        let stream: Vec<u8> = vec![71, 5, 0, 1, b'a', b'b', 0, 18, 1, 3, 0, 2, 88, 0, 33, 16];

        let mut whole = BytesMut::from(&stream[..]);
        let expected = decode_all(&mut lobby(), &mut whole);
        assert_eq!(expected.len(), 4);

        // Every combination of two split points
        for a in 0..=stream.len() {
            for b in a..=stream.len() {
                let mut decoder = lobby();
                let mut buf = BytesMut::new();
                let mut frames = Vec::new();
                for chunk in [&stream[..a], &stream[a..b], &stream[b..]] {
                    buf.extend_from_slice(chunk);
                    frames.extend(decode_all(&mut decoder, &mut buf));
                }
                assert_eq!(frames, expected, "split at {} and {}", a, b);
            }
        }
    }
}
