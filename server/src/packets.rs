//! Outgoing lobby packets.
//!
//! Each helper encodes one [`ServerProt`] message and queues it on the
//! connection's outbound queue, to be flushed on the next tick. A body too
//! large for its length prefix is an error and nothing is queued.

use shared::{Packet, PacketError, PacketSize, ServerProt};

use crate::config::WorldEntry;
use crate::connection::Connection;
use crate::error::Result;

/// A server packet under construction.
#[derive(Debug, Clone)]
pub struct ServerMessage {
    pub prot: ServerProt,
    pub body: Packet,
}

impl ServerMessage {
    /// Starts an empty body for `prot`.
    pub fn new(prot: ServerProt) -> Self {
        Self {
            prot,
            body: Packet::new(),
        }
    }

    /// Frames the body as `opcode [size] body`.
    ///
    /// Fails if a variable-size body does not fit its length prefix.
    pub fn encode(self) -> std::result::Result<Vec<u8>, PacketError> {
        let body = self.body.into_inner();
        let oversize = |max: usize| PacketError::Oversize {
            len: body.len(),
            max,
        };

        let mut out = Packet::alloc(3 + body.len());
        out.p1(self.prot.opcode());
        match self.prot.size() {
            PacketSize::Fixed(n) => debug_assert_eq!(n, body.len(), "{:?} body size", self.prot),
            PacketSize::VarByte => {
                let len = u8::try_from(body.len()).map_err(|_| oversize(usize::from(u8::MAX)))?;
                out.p1(len);
            }
            PacketSize::VarShort => {
                let len =
                    u16::try_from(body.len()).map_err(|_| oversize(usize::from(u16::MAX)))?;
                out.p2(len);
            }
        }
        out.pdata(&body);
        Ok(out.into_inner())
    }
}

/// Argument to a client script invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptArg {
    Int(i32),
    Str(String),
}

fn queue(connection: &mut Connection, message: ServerMessage) -> Result<()> {
    connection.queue(message.encode()?);
    Ok(())
}

fn fits_small(value: i32) -> bool {
    (i32::from(i8::MIN)..=i32::from(i8::MAX)).contains(&value)
}

fn var_message(small: ServerProt, large: ServerProt, id: u16, value: i32) -> ServerMessage {
    if fits_small(value) {
        let mut message = ServerMessage::new(small);
        message.body.p2(id);
        message.body.p1(value as i8 as u8);
        message
    } else {
        let mut message = ServerMessage::new(large);
        message.body.p2(id);
        message.body.p4(value as u32);
        message
    }
}

/// Keepalive, queued every keepalive interval on lobby connections.
pub fn no_timeout(connection: &mut Connection) -> Result<()> {
    queue(connection, ServerMessage::new(ServerProt::NoTimeout))
}

/// Tells the client to drop its cached archives and fetch them again.
pub fn js5_reload(connection: &mut Connection) -> Result<()> {
    queue(connection, ServerMessage::new(ServerProt::Js5Reload))
}

/// Starts the client's system update countdown, in ticks.
pub fn update_reboot_timer(connection: &mut Connection, ticks: u16) -> Result<()> {
    let mut message = ServerMessage::new(ServerProt::UpdateRebootTimer);
    message.body.p2(ticks);
    queue(connection, message)
}

/// Clears every client variable before the lobby state is pushed.
pub fn reset_client_varcache(connection: &mut Connection) -> Result<()> {
    queue(connection, ServerMessage::new(ServerProt::ResetClientVarcache))
}

/// Sets a player variable.
///
/// Values that fit a signed byte use the short packet, anything else the
/// four byte form. The same rule applies to varbits and client variables.
pub fn update_var(connection: &mut Connection, id: u16, value: i32) -> Result<()> {
    queue(
        connection,
        var_message(ServerProt::VarpSmall, ServerProt::VarpLarge, id, value),
    )
}

pub fn update_varbit(connection: &mut Connection, id: u16, value: i32) -> Result<()> {
    queue(
        connection,
        var_message(ServerProt::VarbitSmall, ServerProt::VarbitLarge, id, value),
    )
}

pub fn update_varc(connection: &mut Connection, id: u16, value: i32) -> Result<()> {
    queue(
        connection,
        var_message(
            ServerProt::ClientSetvarcSmall,
            ServerProt::ClientSetvarcLarge,
            id,
            value,
        ),
    )
}

/// Opens the root interface.
pub fn if_open_top(connection: &mut Connection, interface: u16) -> Result<()> {
    let mut message = ServerMessage::new(ServerProt::IfOpenTop);
    message.body.p2(interface);
    queue(connection, message)
}

/// Opens `interface` in slot `component` of `parent`.
pub fn if_open_sub(
    connection: &mut Connection,
    parent: u16,
    component: u16,
    interface: u16,
) -> Result<()> {
    let mut message = ServerMessage::new(ServerProt::IfOpenSub);
    message.body.p4((u32::from(parent) << 16) | u32::from(component));
    message.body.p2(interface);
    message.body.p1(0);
    queue(connection, message)
}

/// Runs client script `script`.
///
/// The body starts with a signature of one type character per argument,
/// then the argument values, then the script id.
pub fn run_client_script(
    connection: &mut Connection,
    script: u32,
    args: &[ScriptArg],
) -> Result<()> {
    let mut message = ServerMessage::new(ServerProt::RunClientScript);
    let signature: String = args
        .iter()
        .map(|arg| match arg {
            ScriptArg::Int(_) => 'i',
            ScriptArg::Str(_) => 's',
        })
        .collect();
    message.body.pjstr(&signature);
    // The client pops arguments off a stack, last argument first
    for arg in args.iter().rev() {
        match arg {
            ScriptArg::Int(value) => message.body.p4(*value as u32),
            ScriptArg::Str(value) => message.body.pjstr(value),
        }
    }
    message.body.p4(script);
    queue(connection, message)
}

/// Encodes the body of a full world list reply.
pub fn worldlist_body(worlds: &[WorldEntry]) -> std::result::Result<Packet, PacketError> {
    let count = u16::try_from(worlds.len()).map_err(|_| PacketError::Oversize {
        len: worlds.len(),
        max: usize::from(u16::MAX),
    })?;

    let mut body = Packet::new();
    body.p1(1); // status ok
    body.p1(1); // full list, not a delta
    body.p2(count);
    for world in worlds {
        body.p2(world.id);
        body.p1(world.location);
        body.p4(u32::from(world.members));
        body.pjstr2(&world.activity);
        body.pjstr2(&world.host);
        body.p2(world.players);
    }
    Ok(body)
}

/// Sends the full world list in one frame.
pub fn worldlist_fetch_reply(connection: &mut Connection, worlds: &[WorldEntry]) -> Result<()> {
    let mut message = ServerMessage::new(ServerProt::WorldlistFetchReply);
    message.body = worldlist_body(worlds)?;
    queue(connection, message)
}
