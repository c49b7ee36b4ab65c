//! Lobby configuration.
//!
//! Every field has a default matching the live protocol, so an empty file (or
//! no file at all) yields a working lobby. Values are read from TOML and the
//! command line overrides them in `main`.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{LobbyError, Result};
use crate::packets;

/// Longest world host the login reply's one-byte size leaves room for,
/// alongside a twelve character display name.
pub const MAX_WORLD_HOST_LEN: usize = 100;
/// Longest news field; a news entry is sent as one script frame.
pub const MAX_NEWS_FIELD_LEN: usize = 4096;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LobbyConfig {
    pub host: String,
    pub port: u16,
    pub max_connections: usize,
    /// Root of the on-disk cache pack.
    pub cache_path: PathBuf,
    /// Scheduler period in milliseconds.
    pub tick_ms: u64,
    /// A keepalive is queued on ticks that are a multiple of this.
    pub keepalive_interval_ticks: u64,
    /// Connections silent for more than this many ticks are reclaimed.
    pub idle_timeout_ticks: u64,
    /// Transport-level read timeout, independent of the tick policy.
    pub socket_timeout_secs: u64,
    pub tcp_keepalive_secs: u64,
    /// Concurrent prefetch-priority cache reads.
    pub prefetch_concurrency: usize,
    /// Cache fetches one connection may have queued or in flight. Reading
    /// from the socket pauses while the limit is reached.
    pub max_pending_fetches: usize,
    /// Debug commands run with server privileges and are not authenticated here.
    pub allow_cheats: bool,
    pub reboot_timer_ticks: u16,
    /// Game world advertised in the login reply.
    pub world_host: String,
    pub world_ports: [u16; 3],
    pub worlds: Vec<WorldEntry>,
    pub news: Vec<NewsEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldEntry {
    pub id: u16,
    pub host: String,
    pub activity: String,
    #[serde(default)]
    pub location: u8,
    #[serde(default)]
    pub members: bool,
    #[serde(default)]
    pub players: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewsEntry {
    pub date: String,
    pub title: String,
    pub summary: String,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 43594,
            max_connections: 2000,
            cache_path: PathBuf::from("data/pack"),
            tick_ms: 50,
            keepalive_interval_ticks: 100,
            idle_timeout_ticks: 300,
            socket_timeout_secs: 15,
            tcp_keepalive_secs: 5,
            prefetch_concurrency: 4,
            max_pending_fetches: 32,
            allow_cheats: true,
            reboot_timer_ticks: 1200,
            world_host: "localhost".to_string(),
            world_ports: [43595; 3],
            worlds: vec![WorldEntry {
                id: 1,
                host: "localhost".to_string(),
                activity: "Lobby".to_string(),
                location: 0,
                members: true,
                players: 0,
            }],
            news: vec![
                NewsEntry {
                    date: "02-Dec-2019".to_string(),
                    title: "Game Update: Farming & Herblore 120 Fixes".to_string(),
                    summary: "This week we've fixed a few cheeky bugs that had cropped up!"
                        .to_string(),
                },
                NewsEntry {
                    date: "09-Dec-2019".to_string(),
                    title: "Game Update: Smooth Movement".to_string(),
                    summary: "While you've been gliding about on the ice outside, we've been working on some smooth moves of our own.".to_string(),
                },
                NewsEntry {
                    date: "09-Dec-2019".to_string(),
                    title: "Patch Notes - 9/12".to_string(),
                    summary: "The Patch Notes for December 9th!".to_string(),
                },
            ],
        }
    }
}

impl LobbyConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| LobbyError::Config(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: LobbyConfig = toml::from_str(content)
            .map_err(|e| LobbyError::Config(format!("Failed to parse config file: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(LobbyError::Config("tick_ms must be positive".to_string()));
        }
        if self.keepalive_interval_ticks == 0 {
            return Err(LobbyError::Config(
                "keepalive_interval_ticks must be positive".to_string(),
            ));
        }
        if self.max_connections == 0 {
            return Err(LobbyError::Config(
                "max_connections must be positive".to_string(),
            ));
        }
        if self.prefetch_concurrency == 0 {
            return Err(LobbyError::Config(
                "prefetch_concurrency must be positive".to_string(),
            ));
        }
        if self.max_pending_fetches == 0 {
            return Err(LobbyError::Config(
                "max_pending_fetches must be positive".to_string(),
            ));
        }
        if self.world_host.len() > MAX_WORLD_HOST_LEN {
            return Err(LobbyError::Config(format!(
                "world_host is longer than {} bytes",
                MAX_WORLD_HOST_LEN
            )));
        }
        let worldlist = packets::worldlist_body(&self.worlds)?;
        if worldlist.len() > usize::from(u16::MAX) {
            return Err(LobbyError::Config(format!(
                "world list encodes to {} bytes, more than one frame holds",
                worldlist.len()
            )));
        }
        for entry in &self.news {
            if [&entry.date, &entry.title, &entry.summary]
                .iter()
                .any(|field| field.len() > MAX_NEWS_FIELD_LEN)
            {
                return Err(LobbyError::Config(format!(
                    "news entry {:?} has a field longer than {} bytes",
                    entry.title, MAX_NEWS_FIELD_LEN
                )));
            }
        }
        Ok(())
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn socket_timeout(&self) -> Duration {
        Duration::from_secs(self.socket_timeout_secs)
    }

    pub fn tcp_keepalive(&self) -> Duration {
        Duration::from_secs(self.tcp_keepalive_secs)
    }
}
