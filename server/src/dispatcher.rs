//! Executes queued lobby messages on the tick.
//!
//! Packets in the lobby catalog that have no handler yet are logged and
//! dropped; the connection stays up.

use log::{debug, info, trace, warn};
use shared::ClientProt;

use crate::config::LobbyConfig;
use crate::connection::{Connection, LobbyMessage};
use crate::error::Result;
use crate::packets;

/// Debug commands understood by the lobby.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheatCommand {
    Js5Reload,
    RebootTimer,
}

impl CheatCommand {
    pub fn parse(command: &str) -> Option<Self> {
        match command {
            "js5_reload" => Some(CheatCommand::Js5Reload),
            "reboottimer" => Some(CheatCommand::RebootTimer),
            _ => None,
        }
    }
}

/// Runs one lobby message against its connection.
///
/// A body too short for its packet kind is an error; the caller closes the
/// connection.
pub fn dispatch(
    connection: &mut Connection,
    message: LobbyMessage,
    config: &LobbyConfig,
) -> Result<()> {
    let LobbyMessage { prot, mut body } = message;

    match prot {
        ClientProt::WorldlistFetch => {
            packets::worldlist_fetch_reply(connection, &config.worlds)?;
        }
        ClientProt::ClientCheat => {
            let scripted = body.gbool()?;
            let suggest = body.gbool()?;
            let command = body.gjstr()?;
            trace!(
                "Connection {} cheat {:?} (scripted={}, suggest={})",
                connection.id,
                command,
                scripted,
                suggest
            );

            if !config.allow_cheats {
                warn!(
                    "Connection {} sent cheat {:?} while cheats are disabled",
                    connection.id, command
                );
                return Ok(());
            }

            match CheatCommand::parse(&command) {
                Some(CheatCommand::Js5Reload) => packets::js5_reload(connection)?,
                Some(CheatCommand::RebootTimer) => {
                    packets::update_reboot_timer(connection, config.reboot_timer_ticks)?
                }
                None => info!("Unknown command: {}", command),
            }
        }
        ClientProt::WindowStatus => {
            let mode = body.g1()?;
            let width = body.g2()?;
            let height = body.g2()?;
            let antialiasing = body.g1()?;
            // TODO: keep the window size on the connection once the game hand-off needs it
            trace!(
                "Connection {} window mode={} {}x{} aa={}",
                connection.id,
                mode,
                width,
                height,
                antialiasing
            );
        }
        ClientProt::NoTimeout => {}
        other => {
            debug!(
                "Connection {} unhandled packet {}",
                connection.id,
                other.debug_name()
            );
        }
    }

    Ok(())
}
