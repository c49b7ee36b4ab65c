//! Integration tests for the lobby server
//!
//! These tests run a real lobby on a loopback socket and talk to it the way a
//! client does, one raw byte stream per connection.

use server::cache::MemoryCacheStore;
use server::config::LobbyConfig;
use server::network::{Lobby, ShutdownHandle};
use shared::{ClientProt, Js5Prot, LoginProt, Packet, PacketSize, ServerProt};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Starts a lobby on an ephemeral loopback port
async fn start_lobby(store: MemoryCacheStore) -> (SocketAddr, ShutdownHandle) {
    start_lobby_with(LobbyConfig::default(), store).await
}

async fn start_lobby_with(
    config: LobbyConfig,
    store: MemoryCacheStore,
) -> (SocketAddr, ShutdownHandle) {
    let config = LobbyConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        ..config
    };
    let lobby = Lobby::bind(config, store).await.unwrap();
    let addr = lobby.local_addr().unwrap();
    let handle = lobby.shutdown_handle();
    tokio::spawn(lobby.run());
    (addr, handle)
}

/// Frames a body as `opcode [size] body`
fn framed(opcode: u8, size: PacketSize, body: &[u8]) -> Vec<u8> {
    let mut out = Packet::new();
    out.p1(opcode);
    match size {
        PacketSize::Fixed(n) => assert_eq!(n, body.len()),
        PacketSize::VarByte => out.p1(body.len() as u8),
        PacketSize::VarShort => out.p2(body.len() as u16),
    }
    out.pdata(body);
    out.into_inner()
}

fn js5_init(major: u32, minor: u32) -> Vec<u8> {
    let mut body = Packet::new();
    body.p4(major);
    body.p4(minor);
    body.pjstr("");
    body.p1(0);
    let prot = LoginProt::InitJs5RemoteConnection;
    framed(prot.opcode(), prot.size(), body.as_slice())
}

fn js5_request(opcode: u8, archive: u8, group: u32) -> Vec<u8> {
    let mut body = Packet::new();
    body.p1(archive);
    body.p4(group);
    framed(opcode, Js5Prot::size(), body.as_slice())
}

/// A complete lobby login for the supported build
fn lobby_login(name: &str) -> Vec<u8> {
    let mut buf = Packet::new();
    buf.p4(shared::BUILD_MAJOR);
    buf.p4(shared::BUILD_MINOR);
    buf.p1(shared::LOGIN_BLOCK_MAGIC);
    buf.pdata(&[0; 16]); // seed
    buf.p8(1); // session id
    buf.p1(0); // four byte authenticator
    buf.p4(0);
    buf.p1(0);
    buf.pjstr("password");
    buf.p8(0);
    buf.p8(0);
    buf.pbool(true);
    buf.pjstr(name);
    buf.pdata(&[1, 0, 2]); // game, lang, window mode
    buf.p2(1024);
    buf.p2(768);
    buf.p1(0);
    buf.pdata(&[0; 24]); // machine uid
    buf.pjstr("");
    buf.pdata(&[0; 59]); // preferences
    buf.pdata(&[8, 1, 1, 0, 10, 1, 1, 8, 0, 0]); // os and java
    buf.p2(2048);
    buf.p1(4);
    buf.p3(8192);
    buf.p2(3000);
    for _ in 0..4 {
        buf.pjstr2("");
    }
    buf.p1(1);
    buf.p2(2020);
    buf.pjstr2("");
    buf.pjstr2("");
    buf.pdata(&[4, 8]);
    buf.pdata(&[0; 16]); // cpu features and signature
    buf.pjstr2("");
    buf.p4(0);
    buf.pjstr("");
    buf.p4(0);
    buf.p4(0);
    buf.pjstr("");
    buf.p1(0);
    buf.p1(0);
    buf.pdata(&[0; shared::LOGIN_CRC_COUNT * 4]);

    let prot = LoginProt::LobbyLogin;
    framed(prot.opcode(), prot.size(), buf.as_slice())
}

async fn read_n(stream: &mut TcpStream, n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    timeout(READ_TIMEOUT, stream.read_exact(&mut buf))
        .await
        .expect("read timed out")
        .expect("read failed");
    buf
}

async fn assert_closed(stream: &mut TcpStream) {
    let mut buf = [0u8; 1];
    let read = timeout(READ_TIMEOUT, stream.read(&mut buf))
        .await
        .expect("connection stayed open");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected bytes {:?}", read);
}

/// LOGIN HANDSHAKE TESTS
mod login_tests {
    use super::*;

    #[tokio::test]
    async fn remote_cache_init_lists_prefetches() {
        let (addr, handle) = start_lobby(MemoryCacheStore::new(vec![7, 11])).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&js5_init(910, 1)).await.unwrap();
        assert_eq!(read_n(&mut stream, 9).await, vec![0, 0, 0, 0, 7, 0, 0, 0, 11]);

        handle.shutdown();
    }

    #[tokio::test]
    async fn remote_cache_init_wrong_build() {
        let (addr, handle) = start_lobby(MemoryCacheStore::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&js5_init(909, 1)).await.unwrap();
        assert_eq!(read_n(&mut stream, 1).await, vec![shared::REPLY_OUT_OF_DATE]);
        assert_closed(&mut stream).await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn lobby_login_bad_magic() {
        let (addr, handle) = start_lobby(MemoryCacheStore::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        let mut body = Packet::new();
        body.p4(910);
        body.p4(1);
        body.p1(99);
        let prot = LoginProt::LobbyLogin;
        stream
            .write_all(&framed(prot.opcode(), prot.size(), body.as_slice()))
            .await
            .unwrap();

        assert_eq!(read_n(&mut stream, 1).await, vec![shared::REPLY_BAD_LOGIN_BLOCK]);
        assert_closed(&mut stream).await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn game_connection_init_sends_seeds() {
        let (addr, handle) = start_lobby(MemoryCacheStore::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream
            .write_all(&[LoginProt::InitGameConnection.opcode()])
            .await
            .unwrap();
        let reply = read_n(&mut stream, 9).await;
        assert_eq!(reply[0], shared::REPLY_OK);

        handle.shutdown();
    }

    #[tokio::test]
    async fn unknown_login_opcode_closes_silently() {
        let (addr, handle) = start_lobby(MemoryCacheStore::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&[200, 1, 2, 3]).await.unwrap();
        assert_closed(&mut stream).await;

        handle.shutdown();
    }

    #[tokio::test]
    async fn handshake_split_across_writes() {
        let (addr, handle) = start_lobby(MemoryCacheStore::new(vec![3])).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        for byte in js5_init(910, 1) {
            stream.write_all(&[byte]).await.unwrap();
            sleep(Duration::from_millis(2)).await;
        }
        assert_eq!(read_n(&mut stream, 5).await, vec![0, 0, 0, 0, 3]);

        handle.shutdown();
    }

    #[tokio::test]
    async fn lobby_login_then_initial_state() {
        let (addr, handle) = start_lobby(MemoryCacheStore::default()).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();

        stream.write_all(&lobby_login("zezima")).await.unwrap();

        let header = read_n(&mut stream, 2).await;
        assert_eq!(header[0], shared::REPLY_LOGIN_SUCCESS);
        let block = read_n(&mut stream, usize::from(header[1])).await;
        let name = b"zezima\0";
        assert!(block.windows(name.len()).any(|w| w == name));

        // The queued lobby state follows on the next tick
        let first = read_n(&mut stream, 1).await;
        assert_eq!(first[0], ServerProt::ResetClientVarcache.opcode());

        handle.shutdown();
    }
}

/// CACHE TRANSFER TESTS
mod cache_transfer_tests {
    use super::*;

    fn group_bytes(size: usize) -> Vec<u8> {
        (0..size).map(|i| (i % 251) as u8).collect()
    }

    async fn cache_connection(store: MemoryCacheStore) -> (TcpStream, ShutdownHandle) {
        let (addr, handle) = start_lobby(store).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&js5_init(910, 1)).await.unwrap();
        assert_eq!(read_n(&mut stream, 1).await, vec![shared::REPLY_OK]);
        (stream, handle)
    }

    #[tokio::test]
    async fn large_group_split_into_frames() {
        let data = group_bytes(250_000);
        let mut store = MemoryCacheStore::new(vec![]);
        store.insert(5, 100, data.clone());
        let (mut stream, handle) = cache_connection(store).await;

        stream
            .write_all(&js5_request(1, 5, 100))
            .await
            .unwrap();

        let mut received = Vec::new();
        for payload in [100_000, 100_000, 50_000] {
            let frame = read_n(&mut stream, 5 + payload).await;
            assert_eq!(&frame[..5], &[5, 0, 0, 0, 100]);
            received.extend_from_slice(&frame[5..]);
        }
        assert_eq!(received, data);

        handle.shutdown();
    }

    #[tokio::test]
    async fn prefetch_reply_sets_top_bit() {
        let mut store = MemoryCacheStore::new(vec![]);
        store.insert(2, 9, vec![1, 2, 3]);
        let (mut stream, handle) = cache_connection(store).await;

        stream
            .write_all(&js5_request(0, 2, 9))
            .await
            .unwrap();
        assert_eq!(
            read_n(&mut stream, 8).await,
            vec![2, 0x80, 0, 0, 9, 1, 2, 3]
        );

        handle.shutdown();
    }

    #[tokio::test]
    async fn missing_group_is_skipped() {
        let mut store = MemoryCacheStore::new(vec![]);
        store.insert(1, 1, vec![42]);
        let (mut stream, handle) = cache_connection(store).await;

        let mut requests = js5_request(1, 1, 2);
        requests.extend(js5_request(2, 0, 0));
        stream.write_all(&requests).await.unwrap();
        sleep(Duration::from_millis(50)).await;
        stream
            .write_all(&js5_request(1, 1, 1))
            .await
            .unwrap();

        assert_eq!(read_n(&mut stream, 6).await, vec![1, 0, 0, 0, 1, 42]);

        handle.shutdown();
    }

    #[tokio::test]
    async fn fetch_limit_serves_requests_in_order() {
        let mut store = MemoryCacheStore::new(vec![]);
        for group in 1..=5u32 {
            store.insert(3, group, vec![group as u8; 120_000]);
        }
        let config = LobbyConfig {
            max_pending_fetches: 1,
            ..LobbyConfig::default()
        };
        let (addr, handle) = start_lobby_with(config, store).await;
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&js5_init(910, 1)).await.unwrap();
        assert_eq!(read_n(&mut stream, 1).await, vec![shared::REPLY_OK]);

        let mut requests = Vec::new();
        for group in 1..=5u32 {
            requests.extend(js5_request(1, 3, group));
        }
        stream.write_all(&requests).await.unwrap();

        // One fetch at a time, so groups arrive whole and in request order
        for group in 1..=5u32 {
            for payload in [100_000, 20_000] {
                let frame = read_n(&mut stream, 5 + payload).await;
                assert_eq!(&frame[..5], &[3, 0, 0, 0, group as u8]);
                assert!(frame[5..].iter().all(|b| *b == group as u8));
            }
        }

        handle.shutdown();
    }

    #[tokio::test]
    async fn disconnect_request_closes() {
        let (mut stream, handle) = cache_connection(MemoryCacheStore::default()).await;

        stream
            .write_all(&js5_request(7, 0, 0))
            .await
            .unwrap();
        assert_closed(&mut stream).await;

        handle.shutdown();
    }
}

/// LOBBY PHASE TESTS
mod lobby_tests {
    use super::*;

    /// Reads one outbound lobby frame, returning its opcode and body
    async fn read_frame(stream: &mut TcpStream) -> (u8, Vec<u8>) {
        let opcode = read_n(stream, 1).await[0];
        let size = [
            ServerProt::NoTimeout,
            ServerProt::WorldlistFetchReply,
            ServerProt::Js5Reload,
            ServerProt::UpdateRebootTimer,
            ServerProt::ResetClientVarcache,
            ServerProt::VarpSmall,
            ServerProt::VarpLarge,
            ServerProt::VarbitSmall,
            ServerProt::VarbitLarge,
            ServerProt::ClientSetvarcSmall,
            ServerProt::ClientSetvarcLarge,
            ServerProt::IfOpenTop,
            ServerProt::IfOpenSub,
            ServerProt::RunClientScript,
        ]
        .into_iter()
        .find(|prot| prot.opcode() == opcode)
        .map(ServerProt::size)
        .expect("unknown server opcode");

        let len = match size {
            PacketSize::Fixed(n) => n,
            PacketSize::VarByte => usize::from(read_n(stream, 1).await[0]),
            PacketSize::VarShort => {
                let bytes = read_n(stream, 2).await;
                usize::from(u16::from_be_bytes([bytes[0], bytes[1]]))
            }
        };
        (opcode, read_n(stream, len).await)
    }

    async fn logged_in(addr: SocketAddr) -> TcpStream {
        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&lobby_login("player")).await.unwrap();
        let header = read_n(&mut stream, 2).await;
        assert_eq!(header[0], shared::REPLY_LOGIN_SUCCESS);
        read_n(&mut stream, usize::from(header[1])).await;
        stream
    }

    #[tokio::test]
    async fn initial_state_ends_with_news_done() {
        let (addr, handle) = start_lobby(MemoryCacheStore::default()).await;
        let mut stream = logged_in(addr).await;

        let mut opcodes = Vec::new();
        loop {
            let (opcode, _) = read_frame(&mut stream).await;
            opcodes.push(opcode);
            if opcodes.len() == 30 {
                break;
            }
        }
        assert_eq!(opcodes[0], ServerProt::ResetClientVarcache.opcode());
        assert_eq!(opcodes[29], ServerProt::RunClientScript.opcode());

        handle.shutdown();
    }

    #[tokio::test]
    async fn worldlist_fetch_answered_on_tick() {
        let (addr, handle) = start_lobby(MemoryCacheStore::default()).await;
        let mut stream = logged_in(addr).await;

        stream
            .write_all(&[ClientProt::WorldlistFetch.opcode()])
            .await
            .unwrap();

        let mut found = false;
        for _ in 0..40 {
            let (opcode, _) = read_frame(&mut stream).await;
            if opcode == ServerProt::WorldlistFetchReply.opcode() {
                found = true;
                break;
            }
        }
        assert!(found);

        handle.shutdown();
    }

    #[tokio::test]
    async fn unknown_lobby_opcode_keeps_connection() {
        let (addr, handle) = start_lobby(MemoryCacheStore::default()).await;
        let mut stream = logged_in(addr).await;

        // Let the initial state go out first
        for _ in 0..30 {
            read_frame(&mut stream).await;
        }

        stream.write_all(&[250, 1, 2, 3]).await.unwrap();
        sleep(Duration::from_millis(100)).await;

        let mut cheat = Packet::new();
        cheat.pbool(false);
        cheat.pbool(false);
        cheat.pjstr("js5_reload");
        let prot = ClientProt::ClientCheat;
        stream
            .write_all(&framed(prot.opcode(), prot.size(), cheat.as_slice()))
            .await
            .unwrap();

        let (mut opcode, mut body) = read_frame(&mut stream).await;
        while opcode == ServerProt::NoTimeout.opcode() {
            (opcode, body) = read_frame(&mut stream).await;
        }
        assert_eq!(opcode, ServerProt::Js5Reload.opcode());
        assert!(body.is_empty());

        handle.shutdown();
    }
}
