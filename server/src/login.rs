//! Login-phase handshake.
//!
//! Three packet kinds are accepted here. Each is handled synchronously as it
//! arrives, replies are written straight to the socket, and any version or
//! login-block check failure closes the connection after a one byte reply.
//!
//! The lobby login block is decoded field by field at fixed offsets. Bytes
//! the lobby never inspects are skipped with the named lengths below so the
//! layout stays byte-exact with the client.

use log::{debug, info, warn};
use rand::Rng;
use shared::{
    Frame, LoginProt, Packet, BUILD_MAJOR, BUILD_MINOR, LOGIN_BLOCK_MAGIC, LOGIN_CRC_COUNT,
    REPLY_BAD_LOGIN_BLOCK, REPLY_LOGIN_SUCCESS, REPLY_OK, REPLY_OUT_OF_DATE,
};

use crate::config::LobbyConfig;
use crate::connection::{Connection, Phase};
use crate::error::Result;
use crate::packets::{self, ScriptArg};

/// Always-zero flag following the authenticator code.
const SKIP_AUTH_TRAILER: usize = 1;
/// Padding after a three byte authenticator code.
const SKIP_AUTH_SHORT_PAD: usize = 1;
/// Unread authenticator code for unrecognised methods.
const SKIP_AUTH_UNKNOWN: usize = 4;
/// 192-bit machine uid.
const SKIP_MACHINE_UID: usize = 24;
/// Length byte in front of the preferences block.
const SKIP_PREFERENCES_LENGTH: usize = 1;
const SKIP_PREFERENCES_PAD: usize = 1;
const SKIP_PREFERENCES_RESERVED: usize = 16;
/// Hardware block version, always 8.
const SKIP_HARDWARE_VERSION: usize = 1;
const SKIP_HARDWARE_PAD: usize = 1;
/// Always-zero flag in front of the checksum table.
const SKIP_CRC_PREFIX: usize = 1;

/// Account name as sent by the client: typed text or a base-37 encoded id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Username {
    Name(String),
    Encoded(u64),
}

const BASE37_TABLE: &[u8; 37] = b"_abcdefghijklmnopqrstuvwxyz0123456789";

impl Username {
    /// Text shown to the player for this username.
    pub fn display_name(&self) -> String {
        match self {
            Username::Name(name) => name.clone(),
            Username::Encoded(value) => {
                decode_base37(*value).unwrap_or_else(|| value.to_string())
            }
        }
    }
}

/// Decodes a base-37 name, `None` if the value cannot be a valid name.
pub fn decode_base37(mut value: u64) -> Option<String> {
    // 37^12, names are at most twelve characters
    const LIMIT: u64 = 6_582_952_005_840_035_281;
    if value == 0 || value >= LIMIT || value % 37 == 0 {
        return None;
    }

    let mut chars = Vec::with_capacity(12);
    while value != 0 {
        chars.push(BASE37_TABLE[(value % 37) as usize]);
        value /= 37;
    }
    chars.reverse();
    Some(
        chars
            .into_iter()
            .map(|c| if c == b'_' { ' ' } else { char::from(c) })
            .collect(),
    )
}

/// Authenticator code accompanying the password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthCode {
    pub method: u8,
    pub value: Option<u32>,
}

/// Graphics and audio settings from the preferences block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientPreferences {
    pub version: u8,
    pub bloom: u8,
    pub brightness: u8,
    pub build_area: u8,
    pub build_area_size: u8,
    pub flickering_effects: u8,
    pub fog: u8,
    pub ground_blending: u8,
    pub ground_decoration: u8,
    pub idle_animations: u8,
    pub lighting_detail: u8,
    pub scenery_shadows: u8,
    pub particles: u8,
    pub remove_roofs: u8,
    pub screen_size: u8,
    pub skyboxes: u8,
    pub character_shadows: u8,
    pub textures: u8,
    pub display_mode: u8,
    pub water_detail: u8,
    pub max_screen_size: u8,
    pub custom_cursors: u8,
    pub preset: u8,
    pub cpu_usage: u8,
    pub volumes: [u8; 5],
    /// Settings the client sends whose meaning is not yet mapped, in wire order.
    pub unmapped: [u8; 9],
}

/// Machine description from the hardware block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareInfo {
    pub operating_system: u8,
    pub os_64bit: bool,
    pub os_version: u16,
    pub java_vendor: u8,
    pub java_version: (u8, u8, u8),
    pub max_memory: u16,
    pub available_processors: u8,
    pub cpu_ram: u32,
    pub cpu_speed: u16,
    pub gpu_description: String,
    pub dx_driver_version: String,
    pub dx_driver_date: (u8, u16),
    pub cpu_vendor: String,
    pub cpu_description: String,
    pub cpu_processors: (u8, u8),
    pub cpu_features: [u32; 3],
    pub cpu_signature: u32,
}

/// Everything extracted from one lobby login. Nothing here is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeSession {
    pub build: (u32, u32),
    pub seed: [u32; 4],
    pub session_id: u64,
    pub auth: AuthCode,
    pub password: String,
    pub sso_key: u64,
    pub sso_random: u64,
    pub username: Username,
    pub game: u8,
    pub lang: u8,
    pub window_mode: u8,
    pub width: u16,
    pub height: u16,
    pub antialiasing: u8,
    pub settings: String,
    pub preferences: ClientPreferences,
    pub hardware: HardwareInfo,
    pub verify_id: u32,
    pub client_version: String,
    pub affiliate: u32,
    pub token_id: u32,
    pub client_token: String,
    pub client_flag: u8,
    pub crcs: Vec<u32>,
}

/// Result of checking the fixed header of a lobby login.
#[derive(Debug, PartialEq, Eq)]
pub enum LobbyLogin {
    Accepted(Box<HandshakeSession>),
    /// Rejected with this reply code; the connection must close.
    Rejected(u8),
}

/// Decodes a lobby login body, stopping at the first failed check.
pub fn decode_lobby_login(buf: &mut Packet) -> Result<LobbyLogin> {
    let build = (buf.g4()?, buf.g4()?);
    if build != (BUILD_MAJOR, BUILD_MINOR) {
        return Ok(LobbyLogin::Rejected(REPLY_OUT_OF_DATE));
    }

    if buf.g1()? != LOGIN_BLOCK_MAGIC {
        return Ok(LobbyLogin::Rejected(REPLY_BAD_LOGIN_BLOCK));
    }

    let seed = [buf.g4()?, buf.g4()?, buf.g4()?, buf.g4()?];
    let session_id = buf.g8()?;

    let method = buf.g1()?;
    let auth = match method {
        0 => AuthCode {
            method,
            value: Some(buf.g4()?),
        },
        1 | 3 => {
            let value = buf.g3()?;
            buf.skip(SKIP_AUTH_SHORT_PAD)?;
            AuthCode {
                method,
                value: Some(value),
            }
        }
        _ => {
            buf.skip(SKIP_AUTH_UNKNOWN)?;
            AuthCode {
                method,
                value: None,
            }
        }
    };

    buf.skip(SKIP_AUTH_TRAILER)?;
    let password = buf.gjstr()?;
    let sso_key = buf.g8()?;
    let sso_random = buf.g8()?;

    let username = if buf.gbool()? {
        Username::Name(buf.gjstr()?)
    } else {
        Username::Encoded(buf.g8()?)
    };

    let game = buf.g1()?;
    let lang = buf.g1()?;
    let window_mode = buf.g1()?;
    let width = buf.g2()?;
    let height = buf.g2()?;
    let antialiasing = buf.g1()?;
    buf.skip(SKIP_MACHINE_UID)?;
    let settings = buf.gjstr()?;

    let preferences = decode_preferences(buf)?;
    let hardware = decode_hardware(buf)?;

    let verify_id = buf.g4()?;
    let client_version = buf.gjstr()?;
    let affiliate = buf.g4()?;
    let token_id = buf.g4()?;
    let client_token = buf.gjstr()?;
    let client_flag = buf.g1()?;
    buf.skip(SKIP_CRC_PREFIX)?;

    let mut crcs = Vec::with_capacity(LOGIN_CRC_COUNT);
    for _ in 0..LOGIN_CRC_COUNT {
        crcs.push(buf.g4()?);
    }

    Ok(LobbyLogin::Accepted(Box::new(HandshakeSession {
        build,
        seed,
        session_id,
        auth,
        password,
        sso_key,
        sso_random,
        username,
        game,
        lang,
        window_mode,
        width,
        height,
        antialiasing,
        settings,
        preferences,
        hardware,
        verify_id,
        client_version,
        affiliate,
        token_id,
        client_token,
        client_flag,
        crcs,
    })))
}

fn decode_preferences(buf: &mut Packet) -> Result<ClientPreferences> {
    let mut prefs = ClientPreferences::default();
    buf.skip(SKIP_PREFERENCES_LENGTH)?;
    prefs.version = buf.g1()?;
    prefs.unmapped[0] = buf.g1()?;
    prefs.unmapped[1] = buf.g1()?;
    buf.skip(SKIP_PREFERENCES_PAD)?;
    prefs.bloom = buf.g1()?;
    prefs.brightness = buf.g1()?;
    prefs.build_area = buf.g1()?;
    prefs.build_area_size = buf.g1()?;
    prefs.flickering_effects = buf.g1()?;
    prefs.fog = buf.g1()?;
    prefs.ground_blending = buf.g1()?;
    prefs.ground_decoration = buf.g1()?;
    prefs.idle_animations = buf.g1()?;
    prefs.lighting_detail = buf.g1()?;
    prefs.scenery_shadows = buf.g1()?;
    prefs.unmapped[2] = buf.g1()?;
    buf.skip(SKIP_PREFERENCES_PAD)?;
    prefs.unmapped[3] = buf.g1()?;
    prefs.particles = buf.g1()?;
    prefs.remove_roofs = buf.g1()?;
    prefs.screen_size = buf.g1()?;
    prefs.skyboxes = buf.g1()?;
    prefs.character_shadows = buf.g1()?;
    prefs.textures = buf.g1()?;
    prefs.display_mode = buf.g1()?;
    buf.skip(SKIP_PREFERENCES_PAD)?;
    prefs.water_detail = buf.g1()?;
    prefs.max_screen_size = buf.g1()?;
    buf.skip(SKIP_PREFERENCES_RESERVED)?;
    prefs.custom_cursors = buf.g1()?;
    prefs.preset = buf.g1()?;
    prefs.cpu_usage = buf.g1()?;
    prefs.unmapped[4] = buf.g1()?;
    prefs.unmapped[5] = buf.g1()?;
    prefs.unmapped[6] = buf.g1()?;
    buf.skip(SKIP_PREFERENCES_PAD)?;
    prefs.unmapped[7] = buf.g1()?;
    for volume in prefs.volumes.iter_mut() {
        *volume = buf.g1()?;
    }
    prefs.unmapped[8] = buf.g1()?;
    Ok(prefs)
}

fn decode_hardware(buf: &mut Packet) -> Result<HardwareInfo> {
    buf.skip(SKIP_HARDWARE_VERSION)?;
    let operating_system = buf.g1()?;
    let os_64bit = buf.gbool()?;
    let os_version = buf.g2()?;
    let java_vendor = buf.g1()?;
    let java_version = (buf.g1()?, buf.g1()?, buf.g1()?);
    buf.skip(SKIP_HARDWARE_PAD)?;
    let max_memory = buf.g2()?;
    let available_processors = buf.g1()?;
    let cpu_ram = buf.g3()?;
    let cpu_speed = buf.g2()?;
    let gpu_description = buf.gjstr2()?;
    buf.gjstr2()?;
    let dx_driver_version = buf.gjstr2()?;
    buf.gjstr2()?;
    let dx_driver_date = (buf.g1()?, buf.g2()?);
    let cpu_vendor = buf.gjstr2()?;
    let cpu_description = buf.gjstr2()?;
    let cpu_processors = (buf.g1()?, buf.g1()?);
    let cpu_features = [buf.g4()?, buf.g4()?, buf.g4()?];
    let cpu_signature = buf.g4()?;
    buf.gjstr2()?;

    Ok(HardwareInfo {
        operating_system,
        os_64bit,
        os_version,
        java_vendor,
        java_version,
        max_memory,
        available_processors,
        cpu_ram,
        cpu_speed,
        gpu_description,
        dx_driver_version,
        dx_driver_date,
        cpu_vendor,
        cpu_description,
        cpu_processors,
        cpu_features,
        cpu_signature,
    })
}

/// Builds the login-success reply: `[2, size, account block]`.
///
/// Field order and widths are fixed by the client. The size is a single
/// byte, so a display name or world host long enough to push the block past
/// 255 bytes is an error rather than a corrupt reply.
pub fn login_reply(session: &HandshakeSession, config: &LobbyConfig) -> Result<Vec<u8>> {
    let mut reply = Packet::new();
    reply.p1(REPLY_LOGIN_SUCCESS);
    reply.p1(0);
    let start = reply.pos;

    reply.p1(0); // totp token
    reply.p1(2); // staff mod level
    reply.p1(0); // player mod level
    reply.p1(0); // quick chat
    reply.p3(0); // date of birth
    reply.p1(0); // gender
    reply.p1(0); // quick chat
    reply.p1(0); // quick chat
    reply.p8(u64::MAX); // membership start
    reply.p5(12); // membership remaining
    reply.p1(2); // subscription flags
    reply.p4(1); // jcoins
    reply.p4(0); // loyalty
    reply.p2(1); // recovery questions
    reply.p2(0); // unread messages
    reply.p2(0); // last login
    reply.p4(0); // last address
    reply.p1(0); // email status
    reply.p2(53791); // credit card expiry
    reply.p2(53791); // grace expiry
    reply.p1(0); // dob requested
    reply.pjstr2(&session.username.display_name());
    reply.p1(0); // members stats
    reply.p4(1); // play age
    reply.p2(0); // world index
    reply.pjstr2(&config.world_host);
    for port in config.world_ports {
        reply.p2(port);
    }

    reply.psize1(reply.pos - start)?;
    Ok(reply.into_inner())
}

/// News script run once per configured entry.
const SCRIPT_NEWS_ENTRY: u32 = 10931;
/// Script run after the last news entry.
const SCRIPT_NEWS_DONE: u32 = 10936;
const LOBBY_TOP_INTERFACE: u16 = 906;
const LOBBY_SUB_INTERFACES: [(u16, u16); 9] = [
    (107, 907),
    (108, 910),
    (109, 909),
    (110, 589),
    (111, 912),
    (112, 911),
    (280, 914),
    (298, 915),
    (307, 913),
];
const LOBBY_VARPS: [(u16, i32); 5] = [
    (1750, 5412518),
    (1751, 5412518),
    (1752, 9259915),
    (1753, 110),
    (1754, 41),
];
const LOBBY_VARBITS: [(u16, i32); 2] = [(16464, 1), (16465, 0)];
const LOBBY_VARCS: [(u16, i32); 8] = [
    (3905, 0),  // enable banner
    (4366, 0),  // treasure hunter keys
    (4367, 0),  // treasure hunter hearts
    (4368, -1), // treasure hunter banner
    (4364, -1), // boss pets
    (4365, -1), // second right banner
    (4360, 0),  // loyalty points
    (4359, 0),  // runecoin
];

/// Queues the lobby screen's starting state; it goes out on the next tick.
pub fn push_initial_state(connection: &mut Connection, config: &LobbyConfig) -> Result<()> {
    packets::reset_client_varcache(connection)?;

    for (id, value) in LOBBY_VARPS {
        packets::update_var(connection, id, value)?;
    }

    packets::if_open_top(connection, LOBBY_TOP_INTERFACE)?;
    for (component, interface) in LOBBY_SUB_INTERFACES {
        packets::if_open_sub(connection, LOBBY_TOP_INTERFACE, component, interface)?;
    }

    for (id, value) in LOBBY_VARBITS {
        packets::update_varbit(connection, id, value)?;
    }
    for (id, value) in LOBBY_VARCS {
        packets::update_varc(connection, id, value)?;
    }

    for (index, entry) in config.news.iter().enumerate() {
        let args = [
            ScriptArg::Int(i32::from(index == 0)),
            ScriptArg::Int(0),
            ScriptArg::Int(1),
            ScriptArg::Int(0),
            ScriptArg::Int(index as i32 + 1),
            ScriptArg::Str(entry.date.clone()),
            ScriptArg::Str("unk".to_string()),
            ScriptArg::Str(entry.summary.clone()),
            ScriptArg::Str(entry.title.clone()),
        ];
        packets::run_client_script(connection, SCRIPT_NEWS_ENTRY, &args)?;
    }
    packets::run_client_script(connection, SCRIPT_NEWS_DONE, &[])
}

/// Handles one login-phase frame.
///
/// Protocol rejections are not errors: they reply, close, and return `Ok`.
/// Malformed bodies return `Err` and the caller closes the connection.
pub fn handle(
    connection: &mut Connection,
    mut frame: Frame,
    prefetches: &[u32],
    config: &LobbyConfig,
) -> Result<()> {
    let Some(prot) = LoginProt::from_opcode(frame.opcode) else {
        warn!(
            "Connection {} sent unknown login opcode {}",
            connection.id, frame.opcode
        );
        connection.close();
        return Ok(());
    };

    let buf = &mut frame.body;
    match prot {
        LoginProt::InitJs5RemoteConnection => {
            // The build decides the reply on its own; the rest may be garbage
            let build = (buf.g4()?, buf.g4()?);
            if build != (BUILD_MAJOR, BUILD_MINOR) {
                info!(
                    "Connection {} rejected: cache client build {}.{}",
                    connection.id, build.0, build.1
                );
                connection.write_now(vec![REPLY_OUT_OF_DATE]);
                connection.close();
                return Ok(());
            }

            let token = buf.gjstr()?;
            let lang = buf.g1()?;
            debug!(
                "Connection {} cache session token={:?} lang={}",
                connection.id, token, lang
            );
            connection.advance(Phase::CacheTransfer);

            let mut reply = Packet::alloc(1 + prefetches.len() * 4);
            reply.p1(REPLY_OK);
            for archive in prefetches {
                reply.p4(*archive);
            }
            connection.write_now(reply.into_inner());
        }
        LoginProt::InitGameConnection => {
            let mut rng = rand::thread_rng();
            let mut reply = Packet::alloc(9);
            reply.p1(REPLY_OK);
            reply.p4(rng.gen());
            reply.p4(rng.gen());
            connection.write_now(reply.into_inner());
        }
        LoginProt::LobbyLogin => match decode_lobby_login(buf)? {
            LobbyLogin::Rejected(code) => {
                info!("Connection {} lobby login rejected ({})", connection.id, code);
                connection.write_now(vec![code]);
                connection.close();
            }
            LobbyLogin::Accepted(session) => {
                // Built first so a reply that cannot be encoded leaves the phase alone
                let reply = login_reply(&session, config)?;
                info!(
                    "Connection {} logged in to lobby as {}",
                    connection.id,
                    session.username.display_name()
                );
                connection.advance(Phase::Lobby);
                connection.write_now(reply);
                push_initial_state(connection, config)?;
            }
        },
        LoginProt::GameLogin => {
            debug!(
                "Connection {} sent a game login to the lobby, ignoring",
                connection.id
            );
        }
    }

    Ok(())
}
