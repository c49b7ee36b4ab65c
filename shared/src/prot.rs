//! Opcode catalogs for the three inbound sub-protocols and the outbound lobby packets.
//!
//! Every catalog is a closed enum; lookups by opcode return `None` for values
//! outside the catalog so the caller decides how fatal that is.

/// Declared body size of a packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketSize {
    /// Exactly this many body bytes follow the opcode.
    Fixed(usize),
    /// A `u8` length follows the opcode.
    VarByte,
    /// A `u16` length follows the opcode.
    VarShort,
}

impl PacketSize {
    /// Number of length-prefix bytes between the opcode and the body.
    pub fn prefix_len(self) -> usize {
        match self {
            PacketSize::Fixed(_) => 0,
            PacketSize::VarByte => 1,
            PacketSize::VarShort => 2,
        }
    }
}

/// Packets accepted while a connection is in the login phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginProt {
    InitGameConnection,
    InitJs5RemoteConnection,
    GameLogin,
    LobbyLogin,
}

impl LoginProt {
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            14 => Some(LoginProt::InitGameConnection),
            15 => Some(LoginProt::InitJs5RemoteConnection),
            16 => Some(LoginProt::GameLogin),
            19 => Some(LoginProt::LobbyLogin),
            _ => None,
        }
    }

    pub fn opcode(self) -> u8 {
        match self {
            LoginProt::InitGameConnection => 14,
            LoginProt::InitJs5RemoteConnection => 15,
            LoginProt::GameLogin => 16,
            LoginProt::LobbyLogin => 19,
        }
    }

    pub fn size(self) -> PacketSize {
        match self {
            LoginProt::InitGameConnection => PacketSize::Fixed(0),
            LoginProt::InitJs5RemoteConnection => PacketSize::VarByte,
            LoginProt::GameLogin | LoginProt::LobbyLogin => PacketSize::VarShort,
        }
    }
}

/// Requests accepted while a connection is in the cache-transfer phase.
///
/// Every request carries a five-byte body regardless of opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Js5Prot {
    RequestPrefetch,
    RequestUrgent,
    LoggedIn,
    LoggedOut,
    EncryptionKey,
    Housekeeping,
    Disconnect,
}

impl Js5Prot {
    pub const BODY_SIZE: usize = 5;

    pub fn from_opcode(opcode: u8) -> Option<Self> {
        match opcode {
            0 => Some(Js5Prot::RequestPrefetch),
            1 => Some(Js5Prot::RequestUrgent),
            2 => Some(Js5Prot::LoggedIn),
            3 => Some(Js5Prot::LoggedOut),
            4 => Some(Js5Prot::EncryptionKey),
            6 => Some(Js5Prot::Housekeeping),
            7 => Some(Js5Prot::Disconnect),
            _ => None,
        }
    }

    pub fn size() -> PacketSize {
        PacketSize::Fixed(Self::BODY_SIZE)
    }
}

/// Packets a client may send once it has reached the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ClientProt {
    NoTimeout,
    WindowStatus,
    WorldlistFetch,
    ClientCheat,
    EventAppletFocus,
    EventMouseMove,
    EventMouseClick,
    EventKeyboard,
    EventCameraPosition,
    SendPingReply,
    TransmitVarVerify,
}

impl ClientProt {
    pub fn from_opcode(opcode: u8) -> Option<Self> {
        let prot = match opcode {
            16 => ClientProt::NoTimeout,
            18 => ClientProt::WindowStatus,
            33 => ClientProt::WorldlistFetch,
            71 => ClientProt::ClientCheat,
            85 => ClientProt::EventAppletFocus,
            6 => ClientProt::EventMouseMove,
            31 => ClientProt::EventMouseClick,
            54 => ClientProt::EventKeyboard,
            100 => ClientProt::EventCameraPosition,
            109 => ClientProt::SendPingReply,
            120 => ClientProt::TransmitVarVerify,
            _ => return None,
        };
        Some(prot)
    }

    pub fn opcode(self) -> u8 {
        match self {
            ClientProt::NoTimeout => 16,
            ClientProt::WindowStatus => 18,
            ClientProt::WorldlistFetch => 33,
            ClientProt::ClientCheat => 71,
            ClientProt::EventAppletFocus => 85,
            ClientProt::EventMouseMove => 6,
            ClientProt::EventMouseClick => 31,
            ClientProt::EventKeyboard => 54,
            ClientProt::EventCameraPosition => 100,
            ClientProt::SendPingReply => 109,
            ClientProt::TransmitVarVerify => 120,
        }
    }

    pub fn size(self) -> PacketSize {
        match self {
            ClientProt::NoTimeout | ClientProt::WorldlistFetch => PacketSize::Fixed(0),
            ClientProt::WindowStatus => PacketSize::Fixed(6),
            ClientProt::ClientCheat | ClientProt::EventMouseMove => PacketSize::VarByte,
            ClientProt::EventAppletFocus => PacketSize::Fixed(1),
            ClientProt::EventMouseClick => PacketSize::Fixed(6),
            ClientProt::EventKeyboard => PacketSize::VarShort,
            ClientProt::EventCameraPosition => PacketSize::Fixed(4),
            ClientProt::SendPingReply => PacketSize::Fixed(8),
            ClientProt::TransmitVarVerify => PacketSize::Fixed(4),
        }
    }

    pub fn debug_name(self) -> &'static str {
        match self {
            ClientProt::NoTimeout => "NO_TIMEOUT",
            ClientProt::WindowStatus => "WINDOW_STATUS",
            ClientProt::WorldlistFetch => "WORLDLIST_FETCH",
            ClientProt::ClientCheat => "CLIENT_CHEAT",
            ClientProt::EventAppletFocus => "EVENT_APPLET_FOCUS",
            ClientProt::EventMouseMove => "EVENT_MOUSE_MOVE",
            ClientProt::EventMouseClick => "EVENT_MOUSE_CLICK",
            ClientProt::EventKeyboard => "EVENT_KEYBOARD",
            ClientProt::EventCameraPosition => "EVENT_CAMERA_POSITION",
            ClientProt::SendPingReply => "SEND_PING_REPLY",
            ClientProt::TransmitVarVerify => "TRANSMITVAR_VERIFY",
        }
    }
}

/// Packets the lobby sends to the client through the outbound queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServerProt {
    NoTimeout,
    WorldlistFetchReply,
    Js5Reload,
    UpdateRebootTimer,
    ResetClientVarcache,
    VarpSmall,
    VarpLarge,
    VarbitSmall,
    VarbitLarge,
    ClientSetvarcSmall,
    ClientSetvarcLarge,
    IfOpenTop,
    IfOpenSub,
    RunClientScript,
}

impl ServerProt {
    pub fn opcode(self) -> u8 {
        match self {
            ServerProt::NoTimeout => 67,
            ServerProt::WorldlistFetchReply => 88,
            ServerProt::Js5Reload => 23,
            ServerProt::UpdateRebootTimer => 114,
            ServerProt::ResetClientVarcache => 89,
            ServerProt::VarpSmall => 59,
            ServerProt::VarpLarge => 60,
            ServerProt::VarbitSmall => 37,
            ServerProt::VarbitLarge => 24,
            ServerProt::ClientSetvarcSmall => 92,
            ServerProt::ClientSetvarcLarge => 111,
            ServerProt::IfOpenTop => 80,
            ServerProt::IfOpenSub => 46,
            ServerProt::RunClientScript => 119,
        }
    }

    pub fn size(self) -> PacketSize {
        match self {
            ServerProt::NoTimeout | ServerProt::Js5Reload | ServerProt::ResetClientVarcache => {
                PacketSize::Fixed(0)
            }
            ServerProt::WorldlistFetchReply | ServerProt::RunClientScript => PacketSize::VarShort,
            ServerProt::UpdateRebootTimer => PacketSize::Fixed(2),
            ServerProt::VarpSmall | ServerProt::VarbitSmall | ServerProt::ClientSetvarcSmall => {
                PacketSize::Fixed(3)
            }
            ServerProt::VarpLarge | ServerProt::VarbitLarge | ServerProt::ClientSetvarcLarge => {
                PacketSize::Fixed(6)
            }
            ServerProt::IfOpenTop => PacketSize::Fixed(2),
            ServerProt::IfOpenSub => PacketSize::Fixed(7),
        }
    }
}
