//! # Lobby Server Library
//!
//! This library implements the pre-game lobby of the game server: the socket
//! frontend every client connects to before it enters a world. It performs
//! the login handshake, streams cache data to clients that need to update,
//! and drives the lobby screen through a fixed-period tick loop.
//!
//! ## Core Responsibilities
//!
//! ### Login Handshake
//! A fresh connection starts in the login phase. Its first frame decides what
//! it becomes:
//! - A cache transfer connection after a version-checked JS5 handshake
//! - A lobby connection after a successful credential login
//! - Nothing at all: rejected connections get a single status byte and close
//!
//! ### Cache Transfer
//! Cache requests are served out of band. Each request resolves its group
//! through a [`cache::CacheStore`] in its own task and writes the result as
//! frames of at most 100 000 bytes straight to the socket.
//!
//! ### Lobby Dispatch
//! Lobby packets are framed as they arrive but only executed on the tick, in
//! arrival order, so every reply a client sees is produced by the tick loop.
//!
//! ## Architecture Design
//!
//! ### Phase-Driven Framing
//! Each socket is read by its own task, which frames bytes with the opcode
//! catalog of the connection's current phase. A handshake can switch the
//! phase halfway through a read buffer, so the phase is re-read between
//! frames.
//!
//! ### Single Write Path
//! Sockets are only ever written by their writer task. Handshake replies,
//! cache frames and tick flushes all go through the same channel and reach
//! the client in the order they were issued.
//!
//! ### Tick Loop
//! Every 50ms the scheduler:
//! - Drains queued lobby messages through the dispatcher
//! - Queues a keepalive for lobby connections every 100 ticks
//! - Reclaims connections silent for more than 300 ticks
//! - Flushes every remaining outbound queue
//!
//! ## Module Organization
//!
//! - `cache`: cache stores resolving `(archive, group)` to bytes
//! - `cache_transfer`: cache request decoding and reply framing
//! - `config`: TOML configuration with protocol defaults
//! - `connection`: per-socket state and the write channel
//! - `connection_manager`: registry of live connections
//! - `dispatcher`: lobby message execution
//! - `error`: the crate error type
//! - `login`: handshake decoding and the lobby's initial state
//! - `network`: the TCP frontend and [`network::Lobby`] entry point
//! - `packets`: outgoing lobby packet builders
//! - `scheduler`: the tick loop
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use server::cache::DiskCacheStore;
//! use server::config::LobbyConfig;
//! use server::network::Lobby;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = LobbyConfig::default();
//!     let store = DiskCacheStore::load(&config.cache_path, config.prefetch_concurrency).await?;
//!
//!     // Binds immediately; connections are accepted once `run` is awaited
//!     let lobby = Lobby::bind(config, store).await?;
//!     lobby.run().await?;
//!
//!     Ok(())
//! }
//! ```

pub mod cache;
pub mod cache_transfer;
pub mod config;
pub mod connection;
pub mod connection_manager;
pub mod dispatcher;
pub mod error;
pub mod login;
pub mod network;
pub mod packets;
pub mod scheduler;

pub use error::{LobbyError, Result};
