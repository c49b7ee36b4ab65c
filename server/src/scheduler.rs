//! Fixed-period tick loop.
//!
//! Each tick drains every connection's lobby messages through the
//! dispatcher, applies the keepalive and idle policies, and flushes the
//! outbound queues. The next tick is scheduled one period after the current
//! one finishes, so ticks never overlap.

use log::{debug, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, RwLock};

use crate::config::LobbyConfig;
use crate::connection::{Connection, Phase, SharedConnection};
use crate::connection_manager::ConnectionManager;
use crate::dispatcher;
use crate::packets;

/// What happened to a single connection during one tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TickOutcome {
    Live,
    Reclaimed,
}

/// Drives every registered connection once per tick.
///
/// The tick counter is shared with the socket readers, which stamp inbound
/// activity with it.
pub struct Scheduler {
    connections: Arc<RwLock<ConnectionManager>>,
    tick: Arc<AtomicU64>,
    config: Arc<LobbyConfig>,
}

impl Scheduler {
    pub fn new(
        connections: Arc<RwLock<ConnectionManager>>,
        tick: Arc<AtomicU64>,
        config: Arc<LobbyConfig>,
    ) -> Self {
        Self {
            connections,
            tick,
            config,
        }
    }

    /// The tick the next [`Scheduler::cycle`] will run.
    pub fn current_tick(&self) -> u64 {
        self.tick.load(Ordering::Acquire)
    }

    /// Runs one tick and advances the counter.
    pub async fn cycle(&self) {
        let tick = self.current_tick();
        let live = {
            let connections = self.connections.read().await;
            connections.snapshot()
        };

        for connection in &live {
            self.process_inbound(connection).await;
        }

        let mut reclaimed = Vec::new();
        for connection in &live {
            let mut connection = connection.lock().await;
            if self.process_outbound(&mut connection, tick) == TickOutcome::Reclaimed {
                reclaimed.push(connection.id);
            }
        }

        if !reclaimed.is_empty() {
            let mut connections = self.connections.write().await;
            for id in reclaimed {
                connections.remove(id);
            }
        }

        if tick % 1200 == 0 && !live.is_empty() {
            debug!("Tick {}: {} connections", tick, live.len());
        }

        self.tick.store(tick + 1, Ordering::Release);
    }

    async fn process_inbound(&self, connection: &SharedConnection) {
        let mut connection = connection.lock().await;
        for message in connection.take_inbound() {
            let prot = message.prot;
            if let Err(e) = dispatcher::dispatch(&mut connection, message, &self.config) {
                warn!(
                    "Connection {} sent a malformed {}: {}",
                    connection.id,
                    prot.debug_name(),
                    e
                );
                connection.close();
                break;
            }
        }
    }

    /// Keepalive, idle policy and flush for one connection.
    ///
    /// Both policies apply to lobby connections only. Login and cache-transfer
    /// sockets are left to the transport timeout, which also spares a cache
    /// client that is busy reading a long download.
    fn process_outbound(&self, connection: &mut Connection, tick: u64) -> TickOutcome {
        if connection.is_closing() {
            return TickOutcome::Reclaimed;
        }

        if connection.phase() != Phase::Lobby {
            connection.flush();
            return TickOutcome::Live;
        }

        if tick % self.config.keepalive_interval_ticks == 0 {
            if let Err(e) = packets::no_timeout(connection) {
                warn!("Connection {} keepalive not queued: {}", connection.id, e);
            }
        }

        // Reclamation wins over flushing: nothing more is sent once idle
        if connection.idle_ticks(tick) > self.config.idle_timeout_ticks {
            info!(
                "Connection {} idle for {} ticks, closing",
                connection.id,
                connection.idle_ticks(tick)
            );
            connection.close();
            return TickOutcome::Reclaimed;
        }

        connection.flush();
        TickOutcome::Live
    }

    /// Ticks until `shutdown` flips or its sender is dropped.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = self.config.tick_duration();
        info!("Tick loop started ({}ms period)", period.as_millis());

        while !*shutdown.borrow() {
            self.cycle().await;

            tokio::select! {
                _ = tokio::time::sleep(period) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        info!("Tick loop stopped at tick {}", self.current_tick());
    }
}
