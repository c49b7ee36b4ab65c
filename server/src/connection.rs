//! Per-socket connection record.
//!
//! A [`Connection`] is shared between the socket task that feeds it and the
//! tick scheduler that drains it, behind a [`SharedConnection`] mutex. Its
//! writes never touch the socket directly: they go through a
//! [`ConnectionWriter`] channel drained by the socket's writer task, which
//! keeps direct replies and tick flushes in one FIFO order.

use log::debug;
use shared::{ClientProt, Packet};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Which sub-protocol consumes the next inbound byte.
///
/// Ordered by progression; a connection never moves to a smaller phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    Login,
    CacheTransfer,
    Lobby,
    Game,
}

impl Phase {
    /// Whether `self -> next` is a legal step of the connection state machine.
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Phase::Login, Phase::CacheTransfer)
                | (Phase::Login, Phase::Lobby)
                | (Phase::Lobby, Phase::Game)
        )
    }
}

/// Commands consumed by a socket's writer task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outgoing {
    /// Bytes to write as-is.
    Data(Vec<u8>),
    /// Every frame of one cache fetch has been queued ahead of this marker.
    FetchDone,
    /// Shut the socket; anything queued after this is never written.
    Close,
}

/// A fully framed lobby packet awaiting the next tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LobbyMessage {
    pub prot: ClientProt,
    pub body: Packet,
}

/// Cloneable write side of a connection.
///
/// Writes after the socket has gone away are dropped silently, so late cache
/// replies to a closed connection are harmless.
#[derive(Debug, Clone)]
pub struct ConnectionWriter {
    id: u32,
    tx: mpsc::UnboundedSender<Outgoing>,
}

impl ConnectionWriter {
    /// Wraps the sending half of a writer task's channel.
    pub fn new(id: u32, tx: mpsc::UnboundedSender<Outgoing>) -> Self {
        Self { id, tx }
    }

    /// Queues raw bytes behind everything already sent to the writer task.
    pub fn write(&self, bytes: Vec<u8>) {
        if self.tx.send(Outgoing::Data(bytes)).is_err() {
            debug!("Dropped write to closed connection {}", self.id);
        }
    }

    /// Marks the end of one cache fetch's frames.
    ///
    /// The writer task frees the fetch slot once it reaches this marker, so a
    /// client that stops reading cannot queue unbounded cache data.
    pub fn fetch_done(&self) {
        let _ = self.tx.send(Outgoing::FetchDone);
    }

    /// Asks the writer task to shut the socket after what is already queued.
    pub fn close(&self) {
        let _ = self.tx.send(Outgoing::Close);
    }

    /// Whether the writer task has gone away.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub type SharedConnection = Arc<Mutex<Connection>>;

/// State of one accepted socket.
///
/// Owned by the registry and locked by both the socket's reader task and
/// the tick scheduler.
#[derive(Debug)]
pub struct Connection {
    pub id: u32,
    pub addr: SocketAddr,
    phase: Phase,
    /// Lobby messages in arrival order, drained once per tick
    inbound: Vec<LobbyMessage>,
    /// Encoded frames in enqueue order, flushed once per tick
    outbound: Vec<Vec<u8>>,
    last_activity_tick: u64,
    writer: ConnectionWriter,
    closing: bool,
}

impl Connection {
    /// Creates a connection in the login phase, active as of `tick`.
    pub fn new(id: u32, addr: SocketAddr, tick: u64, writer: ConnectionWriter) -> Self {
        Self {
            id,
            addr,
            phase: Phase::Login,
            inbound: Vec::new(),
            outbound: Vec::new(),
            last_activity_tick: tick,
            writer,
            closing: false,
        }
    }

    /// Wraps the connection for sharing between tasks.
    pub fn into_shared(self) -> SharedConnection {
        Arc::new(Mutex::new(self))
    }

    /// Sub-protocol the next inbound byte belongs to.
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Moves to `next` if the state machine allows it. Returns whether it moved.
    pub fn advance(&mut self, next: Phase) -> bool {
        if self.phase.can_advance_to(next) {
            debug!("Connection {} {:?} -> {:?}", self.id, self.phase, next);
            self.phase = next;
            true
        } else {
            false
        }
    }

    /// Queues a framed lobby packet for the next tick.
    pub fn push_inbound(&mut self, message: LobbyMessage) {
        self.inbound.push(message);
    }

    /// Takes every queued lobby message, leaving the queue empty.
    pub fn take_inbound(&mut self) -> Vec<LobbyMessage> {
        std::mem::take(&mut self.inbound)
    }

    /// Number of lobby packets waiting for the next tick.
    pub fn inbound_len(&self) -> usize {
        self.inbound.len()
    }

    /// Queues an encoded frame for the next tick flush.
    pub fn queue(&mut self, frame: Vec<u8>) {
        self.outbound.push(frame);
    }

    /// Number of encoded frames waiting for the next flush.
    pub fn outbound_len(&self) -> usize {
        self.outbound.len()
    }

    /// Hands every queued frame to the socket in order and clears the queue.
    pub fn flush(&mut self) {
        for frame in self.outbound.drain(..) {
            self.writer.write(frame);
        }
    }

    /// Writes immediately, ahead of anything still queued.
    pub fn write_now(&self, bytes: Vec<u8>) {
        self.writer.write(bytes);
    }

    /// A write handle usable outside the connection lock, for cache replies.
    pub fn writer(&self) -> ConnectionWriter {
        self.writer.clone()
    }

    /// Records inbound activity at `tick`.
    ///
    /// The stamp never moves backwards, so a late touch from a reader that
    /// raced the tick counter cannot extend an idle connection.
    pub fn touch(&mut self, tick: u64) {
        self.last_activity_tick = self.last_activity_tick.max(tick);
    }

    pub fn last_activity_tick(&self) -> u64 {
        self.last_activity_tick
    }

    /// Ticks elapsed since the last inbound activity.
    pub fn idle_ticks(&self, current_tick: u64) -> u64 {
        current_tick.saturating_sub(self.last_activity_tick)
    }

    /// Asks the writer task to shut the socket; queued frames are discarded.
    pub fn close(&mut self) {
        if !self.closing {
            self.closing = true;
            self.outbound.clear();
            self.writer.close();
        }
    }

    /// True once closed here or once the writer task has exited.
    pub fn is_closing(&self) -> bool {
        self.closing || self.writer.is_closed()
    }
}
