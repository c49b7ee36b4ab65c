//! Wire-level building blocks shared by the lobby server and its tests.
//!
//! - [`packet`]: the big-endian, position-tracked [`Packet`] buffer
//! - [`prot`]: opcode catalogs for the login, cache-transfer and lobby phases
//! - [`frame`]: streaming framing over non packet-aligned socket reads

pub mod frame;
pub mod packet;
pub mod prot;

pub use frame::{Catalog, Frame, FrameDecoder, FrameError};
pub use packet::{Packet, PacketError};
pub use prot::{ClientProt, Js5Prot, LoginProt, PacketSize, ServerProt};

/// Client build the handshake accepts.
pub const BUILD_MAJOR: u32 = 910;
pub const BUILD_MINOR: u32 = 1;

/// First byte of the encrypted credential block in a lobby login.
pub const LOGIN_BLOCK_MAGIC: u8 = 10;

/// Single-byte handshake replies.
pub const REPLY_OK: u8 = 0;
pub const REPLY_LOGIN_SUCCESS: u8 = 2;
pub const REPLY_OUT_OF_DATE: u8 = 6;
pub const REPLY_BAD_LOGIN_BLOCK: u8 = 11;

/// Largest cache payload carried by one transfer frame.
pub const JS5_FRAME_PAYLOAD: usize = 100_000;

/// Set on the group id of a transfer frame answering a prefetch request.
pub const JS5_PREFETCH_BIT: u32 = 0x8000_0000;

/// Number of archive checksums appended to a lobby login.
pub const LOGIN_CRC_COUNT: usize = 42;
