//! TCP frontend routing socket bytes by connection phase.
//!
//! Every accepted socket gets two tasks: a reader that frames inbound bytes
//! according to the connection's current phase, and a writer that drains the
//! connection's [`Outgoing`] channel onto the socket. The tick loop runs
//! alongside the accept loop until [`ShutdownHandle::shutdown`] is called.

use bytes::BytesMut;
use log::{debug, error, info, warn};
use shared::{Catalog, ClientProt, Frame, FrameDecoder, FrameError};
use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, oneshot, watch, RwLock, Semaphore};
use tokio::time::timeout;
use tokio_util::codec::Decoder;

use crate::cache::{CacheStore, Priority};
use crate::cache_transfer::{self, Js5Request};
use crate::config::LobbyConfig;
use crate::connection::{
    Connection, ConnectionWriter, LobbyMessage, Outgoing, Phase, SharedConnection,
};
use crate::connection_manager::ConnectionManager;
use crate::error::{LobbyError, Result};
use crate::login;
use crate::scheduler::Scheduler;

const READ_BUFFER_SIZE: usize = 5000;

/// Stops a running [`Lobby`] from another task.
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn shutdown(&self) {
        let _ = self.tx.send(true);
    }
}

/// The lobby server: listener, connection registry and tick loop.
pub struct Lobby<S: CacheStore> {
    listener: TcpListener,
    config: Arc<LobbyConfig>,
    store: Arc<S>,
    connections: Arc<RwLock<ConnectionManager>>,
    tick: Arc<AtomicU64>,
    shutdown_tx: Arc<watch::Sender<bool>>,
}

impl<S: CacheStore> Lobby<S> {
    /// Binds the listening socket. Nothing is accepted until [`Lobby::run`].
    pub async fn bind(config: LobbyConfig, store: S) -> Result<Self> {
        config.validate()?;

        let address = config.bind_address();
        let addr = tokio::net::lookup_host(&address)
            .await?
            .next()
            .ok_or_else(|| LobbyError::Config(format!("cannot resolve {}", address)))?;
        let listener = create_listener(addr)?;

        let (shutdown_tx, _) = watch::channel(false);
        let max_connections = config.max_connections;

        Ok(Self {
            listener,
            config: Arc::new(config),
            store: Arc::new(store),
            connections: Arc::new(RwLock::new(ConnectionManager::new(max_connections))),
            tick: Arc::new(AtomicU64::new(0)),
            shutdown_tx: Arc::new(shutdown_tx),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            tx: Arc::clone(&self.shutdown_tx),
        }
    }

    /// Accepts connections and runs the tick loop until shutdown.
    pub async fn run(self) -> Result<()> {
        info!("Lobby listening on {}", self.local_addr()?);

        let scheduler = Scheduler::new(
            Arc::clone(&self.connections),
            Arc::clone(&self.tick),
            Arc::clone(&self.config),
        );
        let tick_shutdown = self.shutdown_tx.subscribe();
        let tick_handle = tokio::spawn(async move { scheduler.run(tick_shutdown).await });

        let mut shutdown = self.shutdown_tx.subscribe();
        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept(stream, addr).await,
                    Err(e) => {
                        error!("Failed to accept connection: {}", e);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                    }
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("Shutting down lobby");
        let live = self.connections.read().await.snapshot();
        for connection in live {
            connection.lock().await.close();
        }

        if let Err(e) = tick_handle.await {
            error!("Tick loop panicked: {}", e);
        }
        Ok(())
    }

    async fn accept(&self, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = configure_stream(&stream, self.config.tcp_keepalive()) {
            warn!("Failed to configure socket from {}: {}", addr, e);
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let tick = self.tick.load(Ordering::Acquire);
        let registered = {
            let mut connections = self.connections.write().await;
            connections.register(addr, tick, |id| ConnectionWriter::new(id, tx))
        };
        let Some(connection) = registered else {
            warn!("Rejecting {}: connection limit reached", addr);
            return;
        };

        let id = connection.lock().await.id;
        let (reader, writer) = stream.into_split();
        let (closed_tx, closed_rx) = oneshot::channel();
        let fetches = Arc::new(Semaphore::new(self.config.max_pending_fetches));

        tokio::spawn(write_loop(id, writer, rx, Arc::clone(&fetches), closed_tx));

        let session = Session {
            id,
            connection,
            connections: Arc::clone(&self.connections),
            tick: Arc::clone(&self.tick),
            store: Arc::clone(&self.store),
            config: Arc::clone(&self.config),
            fetches,
        };
        tokio::spawn(session.read_loop(reader, closed_rx));
    }
}

/// Binds a non-blocking listener with `SO_REUSEADDR` so restarts do not wait
/// out `TIME_WAIT`.
fn create_listener(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

fn configure_stream(stream: &TcpStream, keepalive: Duration) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    SockRef::from(stream).set_tcp_keepalive(&TcpKeepalive::new().with_time(keepalive))
}

/// Drains one connection's outgoing channel onto its socket.
///
/// A [`Outgoing::FetchDone`] marker hands a fetch slot back once every frame
/// queued ahead of it has reached the socket. Signals `closed` on exit so the
/// reader stops even if the peer keeps its half open.
async fn write_loop(
    id: u32,
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Outgoing>,
    fetches: Arc<Semaphore>,
    closed: oneshot::Sender<()>,
) {
    while let Some(outgoing) = rx.recv().await {
        match outgoing {
            Outgoing::Data(bytes) => {
                if let Err(e) = writer.write_all(&bytes).await {
                    debug!("Connection {} write failed: {}", id, e);
                    break;
                }
            }
            Outgoing::FetchDone => fetches.add_permits(1),
            Outgoing::Close => break,
        }
    }

    // Wakes a reader waiting for a fetch slot
    fetches.close();
    let _ = writer.shutdown().await;
    let _ = closed.send(());
}

/// Reader side of one accepted socket.
struct Session<S: CacheStore> {
    id: u32,
    connection: SharedConnection,
    connections: Arc<RwLock<ConnectionManager>>,
    tick: Arc<AtomicU64>,
    store: Arc<S>,
    config: Arc<LobbyConfig>,
    /// Cache fetches this connection may have in flight.
    fetches: Arc<Semaphore>,
}

/// A cache request waiting for a fetch slot.
#[derive(Debug, Clone, Copy)]
struct PendingFetch {
    archive: u8,
    group: u32,
    priority: Priority,
}

impl<S: CacheStore> Session<S> {
    async fn read_loop(self, mut reader: OwnedReadHalf, mut closed: oneshot::Receiver<()>) {
        let mut decoder = FrameDecoder::new(Catalog::Login);
        let mut buf = BytesMut::with_capacity(READ_BUFFER_SIZE);
        let mut fetches = Vec::new();
        let writer = self.connection.lock().await.writer();

        'session: loop {
            let read = tokio::select! {
                _ = &mut closed => break,
                read = timeout(self.config.socket_timeout(), reader.read_buf(&mut buf)) => read,
            };

            match read {
                Ok(Ok(0)) => {
                    debug!("Connection {} closed by peer", self.id);
                    break;
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => {
                    debug!("Connection {} read failed: {}", self.id, e);
                    break;
                }
                // A client waiting on its own downloads is not idle
                Err(_) if self.downloading() => continue,
                Err(_) => {
                    info!("Connection {} timed out", self.id);
                    break;
                }
            }

            {
                let mut connection = self.connection.lock().await;
                connection.touch(self.tick.load(Ordering::Acquire));
                self.route(&mut connection, &mut decoder, &mut buf, &mut fetches);
                if connection.is_closing() {
                    break;
                }
            }

            // Waiting here stops reads, which pushes back on the client
            for fetch in fetches.drain(..) {
                let permit = tokio::select! {
                    _ = &mut closed => break 'session,
                    permit = Arc::clone(&self.fetches).acquire_owned() => permit,
                };
                let Ok(permit) = permit else {
                    break 'session;
                };
                // Returned by the writer task on FetchDone
                permit.forget();
                self.spawn_fetch(fetch, writer.clone());
            }
        }

        self.connection.lock().await.close();
        self.connections.write().await.remove(self.id);
    }

    fn downloading(&self) -> bool {
        self.fetches.available_permits() < self.config.max_pending_fetches
    }

    fn spawn_fetch(&self, fetch: PendingFetch, writer: ConnectionWriter) {
        let store = Arc::clone(&self.store);
        tokio::spawn(async move {
            cache_transfer::serve(
                store.as_ref(),
                &writer,
                fetch.archive,
                fetch.group,
                fetch.priority,
            )
            .await;
        });
    }

    /// Frames and handles everything buffered, re-reading the phase between
    /// frames since a handshake may switch it mid-buffer.
    fn route(
        &self,
        connection: &mut Connection,
        decoder: &mut FrameDecoder,
        buf: &mut BytesMut,
        fetches: &mut Vec<PendingFetch>,
    ) {
        loop {
            if connection.is_closing() {
                buf.clear();
                return;
            }

            let phase = connection.phase();
            let catalog = match phase {
                Phase::Login => Catalog::Login,
                Phase::CacheTransfer => Catalog::CacheTransfer,
                Phase::Lobby => Catalog::Lobby,
                Phase::Game => {
                    buf.clear();
                    return;
                }
            };
            decoder.set_catalog(catalog);

            let frame = match decoder.decode(buf) {
                Ok(Some(frame)) => frame,
                Ok(None) => return,
                Err(FrameError::UnknownOpcode(opcode)) => {
                    let e = LobbyError::UnknownOpcode { phase, opcode };
                    warn!("Connection {}: {}", self.id, e);
                    if phase == Phase::Lobby {
                        // Its length is unknown, so nothing after it can be framed
                        buf.clear();
                    } else {
                        connection.close();
                    }
                    return;
                }
                Err(FrameError::Io(e)) => {
                    warn!("Connection {} closed: {}", self.id, e);
                    connection.close();
                    return;
                }
            };

            if let Err(e) = self.handle_frame(connection, phase, frame, fetches) {
                warn!("Connection {} closed: {}", self.id, e);
                connection.close();
                return;
            }
        }
    }

    fn handle_frame(
        &self,
        connection: &mut Connection,
        phase: Phase,
        frame: Frame,
        fetches: &mut Vec<PendingFetch>,
    ) -> Result<()> {
        match phase {
            Phase::Login => {
                login::handle(connection, frame, self.store.prefetches(), &self.config)?;
            }
            Phase::CacheTransfer => match cache_transfer::decode_request(frame)? {
                Js5Request::Fetch {
                    archive,
                    group,
                    priority,
                } => fetches.push(PendingFetch {
                    archive,
                    group,
                    priority,
                }),
                Js5Request::Ignore => {}
                Js5Request::Disconnect => {
                    debug!("Connection {} ended cache transfer", self.id);
                    connection.close();
                }
            },
            Phase::Lobby => {
                let opcode = frame.opcode;
                let prot = ClientProt::from_opcode(opcode)
                    .ok_or(LobbyError::UnknownOpcode { phase, opcode })?;
                connection.push_inbound(LobbyMessage {
                    prot,
                    body: frame.body,
                });
            }
            Phase::Game => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheStore;

    fn local_config() -> LobbyConfig {
        LobbyConfig {
            host: "127.0.0.1".to_string(),
            port: 0,
            ..LobbyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_bind_ephemeral_port() {
        let lobby = Lobby::bind(local_config(), MemoryCacheStore::default())
            .await
            .unwrap();
        let addr = lobby.local_addr().unwrap();
        assert!(addr.ip().is_loopback());
        assert_ne!(addr.port(), 0);
    }

    #[tokio::test]
    async fn test_bind_rejects_invalid_config() {
        let config = LobbyConfig {
            tick_ms: 0,
            ..local_config()
        };
        let result = Lobby::bind(config, MemoryCacheStore::default()).await;
        assert!(matches!(result, Err(LobbyError::Config(_))));
    }

    #[tokio::test]
    async fn test_shutdown_stops_run() {
        let lobby = Lobby::bind(local_config(), MemoryCacheStore::default())
            .await
            .unwrap();
        let handle = lobby.shutdown_handle();
        let server = tokio::spawn(lobby.run());

        tokio::time::sleep(Duration::from_millis(20)).await;
        handle.shutdown();

        let result = tokio::time::timeout(Duration::from_secs(2), server)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_fetch_slot_returned_once_written() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let mut client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (server, _) = listener.accept().await.unwrap();
        let (_reader, writer) = server.into_split();

        let fetches = Arc::new(Semaphore::new(1));
        Arc::clone(&fetches).acquire_owned().await.unwrap().forget();
        let (tx, rx) = mpsc::unbounded_channel();
        let (closed_tx, _closed_rx) = oneshot::channel();
        tokio::spawn(write_loop(1, writer, rx, Arc::clone(&fetches), closed_tx));

        let out = ConnectionWriter::new(1, tx);
        out.write(vec![1, 2, 3]);
        out.fetch_done();

        let mut buf = [0u8; 3];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [1, 2, 3]);
        let permit = timeout(Duration::from_secs(2), fetches.acquire())
            .await
            .unwrap();
        assert!(permit.is_ok());
        drop(permit);

        // Closing the writer fails anyone still waiting for a slot
        out.close();
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);
        assert!(fetches.acquire().await.is_err());
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let config = LobbyConfig {
            max_connections: 1,
            ..local_config()
        };
        let lobby = Lobby::bind(config, MemoryCacheStore::default())
            .await
            .unwrap();
        let addr = lobby.local_addr().unwrap();
        let handle = lobby.shutdown_handle();
        tokio::spawn(lobby.run());

        let _first = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        let mut second = TcpStream::connect(addr).await.unwrap();

        let mut byte = [0u8; 1];
        let read = tokio::time::timeout(Duration::from_secs(2), second.read(&mut byte))
            .await
            .unwrap();
        // Dropped without a reply
        assert!(matches!(read, Ok(0) | Err(_)));
        handle.shutdown();
    }
}
