//! End-to-end tests against a running proxy.
//!
//! Each test spawns a real [`ProxyServer`] on ephemeral loopback ports and
//! talks to it over TCP, playing the engine on one socket and the IDE on the
//! other. Translation fixtures are a throwaway project directory; the cache
//! root never has to exist because cache paths are only parsed, not read.

use std::future::Future;
use std::path::PathBuf;
use std::time::Duration;

use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use dbgp_proto::{CommandDecoder, Document, IdeCommand, PacketDecoder};
use dbgp_proxy::config::{ListenConfig, ProxyConfig};
use dbgp_proxy::server::ProxyServer;
use dbgp_proxy::ContentHash;

mod registration;
mod relay;

pub const IDEKEY: &str = "testkey";

pub struct ProxyFixture {
    pub server: ProxyServer,
    pub project: TempDir,
    pub cache_root: PathBuf,
}

pub async fn spawn_proxy() -> ProxyFixture {
    spawn_proxy_with(|_| {}).await
}

pub async fn spawn_proxy_with(tune: impl FnOnce(&mut ProxyConfig)) -> ProxyFixture {
    let project = TempDir::new().unwrap();
    std::fs::create_dir_all(project.path().join("src")).unwrap();
    std::fs::write(project.path().join("src/foo.php"), "<?php echo 1;\n").unwrap();

    let cache_root = PathBuf::from("/tmp/mocks-cache");

    let mut config = ProxyConfig::default();
    config.listen = ListenConfig {
        registration: "127.0.0.1:0".to_string(),
        debug: "127.0.0.1:0".to_string(),
    };
    config.paths.cache_root = cache_root.clone();
    config.paths.project_root = project.path().to_path_buf();
    tune(&mut config);

    let server = ProxyServer::spawn(config).await.unwrap();
    ProxyFixture {
        server,
        project,
        cache_root,
    }
}

/// Bounds an await so a broken relay fails the test instead of hanging it.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(Duration::from_secs(5), future)
        .await
        .expect("test timed out")
}

pub fn project_url(fixture: &ProxyFixture, rel: &str) -> String {
    format!("file://{}/{rel}", fixture.project.path().display())
}

/// The cache filename the current content of `rel` corresponds to.
pub fn cache_url(fixture: &ProxyFixture, rel: &str) -> String {
    let content = ContentHash::from_file(fixture.project.path().join(rel)).unwrap();
    let compound = ContentHash::compound(rel, &content);
    format!("file://{}/{rel}_{compound}.php", fixture.cache_root.display())
}

pub fn init_xml(idekey: &str) -> String {
    format!(
        r#"<init xmlns="urn:debugger_protocol_v1" xmlns:xdebug="https://xdebug.org/dbgp/xdebug" fileuri="file:///tmp/mocks-cache/start.php_0123456789abcdef0123456789abcdef.php" language="PHP" protocol_version="1.0" appid="31337" idekey="{idekey}"/>"#
    )
}

pub fn init_packet(idekey: &str) -> Vec<u8> {
    dbgp_proto::engine::encode(&Document::parse(&init_xml(idekey)).unwrap())
}

pub async fn read_packet(stream: &mut TcpStream, decoder: &mut PacketDecoder) -> Option<Document> {
    let mut buf = [0_u8; 4096];
    loop {
        if let Some(packet) = decoder.next_packet().unwrap() {
            return Some(packet);
        }
        let count = stream.read(&mut buf).await.unwrap();
        if count == 0 {
            return None;
        }
        decoder.feed(&buf[..count]);
    }
}

pub async fn read_command(
    stream: &mut TcpStream,
    decoder: &mut CommandDecoder,
) -> Option<IdeCommand> {
    let mut buf = [0_u8; 4096];
    loop {
        if let Some(command) = decoder.next_command().unwrap() {
            return Some(command);
        }
        let count = stream.read(&mut buf).await.unwrap();
        if count == 0 {
            return None;
        }
        decoder.feed(&buf[..count]);
    }
}

pub async fn expect_closed(stream: &mut TcpStream) {
    let mut buf = [0_u8; 64];
    let count = within(stream.read(&mut buf)).await.unwrap();
    assert_eq!(count, 0, "expected the peer to close the connection");
}

/// Registers the test idekey over the wire and checks the acknowledgement.
pub async fn register_ide(fixture: &ProxyFixture, ide_port: u16) {
    let mut stream = TcpStream::connect(fixture.server.registration_addr())
        .await
        .unwrap();
    stream
        .write_all(format!("proxyinit -p {ide_port} -k {IDEKEY} -m 1\0").as_bytes())
        .await
        .unwrap();
    let mut decoder = PacketDecoder::new();
    let ack = within(read_packet(&mut stream, &mut decoder))
        .await
        .expect("registration was not acknowledged");
    assert_eq!(ack.root.name, "proxyinit");
    assert_eq!(ack.root.attribute("success"), Some("1"));
}

pub struct PairedSession {
    pub engine: TcpStream,
    /// Decodes IDE commands arriving at the engine.
    pub engine_decoder: CommandDecoder,
    pub ide: TcpStream,
    /// Decodes engine packets arriving at the IDE.
    pub ide_decoder: PacketDecoder,
    /// The init packet as the IDE received it.
    pub init: Document,
}

/// Runs the full pairing flow: wire registration, engine connect, init
/// forwarding, IDE accept.
pub async fn pair(fixture: &ProxyFixture) -> PairedSession {
    let ide_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let ide_port = ide_listener.local_addr().unwrap().port();
    register_ide(fixture, ide_port).await;

    let mut engine = TcpStream::connect(fixture.server.debug_addr()).await.unwrap();
    engine.write_all(&init_packet(IDEKEY)).await.unwrap();

    let (mut ide, _) = within(ide_listener.accept()).await.unwrap();
    let mut ide_decoder = PacketDecoder::new();
    let init = within(read_packet(&mut ide, &mut ide_decoder))
        .await
        .expect("the init packet was not forwarded");

    PairedSession {
        engine,
        engine_decoder: CommandDecoder::new(),
        ide,
        ide_decoder,
        init,
    }
}
