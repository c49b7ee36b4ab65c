use crate::connection::Phase;
use shared::PacketError;

#[derive(Debug, thiserror::Error)]
pub enum LobbyError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed packet: {0}")]
    Packet(#[from] PacketError),

    #[error("unknown opcode {opcode} in {phase:?} phase")]
    UnknownOpcode { phase: Phase, opcode: u8 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("cache error: {0}")]
    Cache(String),
}

pub type Result<T> = std::result::Result<T, LobbyError>;
