//! Per-connection relay between a debugger engine and its IDE.
//!
//! A session starts when an engine connects to the debug listener. Its first
//! packet carries the `idekey` used to pair it with a registered IDE; once
//! paired, packets flow both ways with filenames rewritten in flight:
//! engine-side cache paths become original project paths on the way to the
//! IDE, and `breakpoint_set` filenames become cache paths on the way back.
//! Either side closing tears the whole session down.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use dbgp_proto::{CommandArgs, CommandDecoder, Document, IdeCommand, PacketDecoder};

use crate::registry::IdeRegistry;
use crate::translate::FilenameTranslator;

/// Namespace URIs Xdebug has used for its `message` elements.
const XDEBUG_NAMESPACES: [&str; 2] = [
    "https://xdebug.org/dbgp/xdebug",
    "http://xdebug.org/dbgp/xdebug",
];

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("engine i/o failed: {0}")]
    EngineIo(#[source] std::io::Error),
    #[error("ide i/o failed: {0}")]
    IdeIo(#[source] std::io::Error),
    #[error("could not connect to ide at {addr}: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("timed out connecting to ide at {addr}")]
    ConnectTimeout { addr: String },
    #[error("timed out waiting for the engine init packet")]
    HandshakeTimeout,
    #[error(transparent)]
    Proto(#[from] dbgp_proto::ProtoError),
    #[error("breakpoint_set arguments were malformed: {0}")]
    BreakpointArgs(#[source] dbgp_proto::ArgsError),
    #[error("breakpoint_set carried no -f filename")]
    BreakpointMissingFile,
}

/// Shared state handed to every relay task.
#[derive(Clone)]
pub struct RelayContext {
    pub registry: Arc<IdeRegistry>,
    pub translator: Arc<FilenameTranslator>,
    pub connect_timeout: Duration,
    pub first_packet_timeout: Option<Duration>,
    pub shutdown: CancellationToken,
}

/// Drives one engine connection to completion.
///
/// Returns `Ok` for the expected ends of a session (either peer closing, no
/// IDE registered for the key, shutdown) and `Err` for protocol or transport
/// failures. In every case all sockets are closed on return.
pub async fn run_relay(context: RelayContext, engine: TcpStream) -> Result<(), SessionError> {
    let peer = engine.peer_addr().map_err(SessionError::EngineIo)?;
    info!(target: "dbgp.session", %peer, "engine connected");

    let (mut engine_read, mut engine_write) = engine.into_split();
    let mut engine_decoder = PacketDecoder::new();

    let handshake = tokio::select! {
        packet = await_handshake(&mut engine_read, &mut engine_decoder, context.first_packet_timeout) => packet?,
        _ = context.shutdown.cancelled() => return Ok(()),
    };
    let Some(handshake) = handshake else {
        info!(target: "dbgp.session", %peer, "engine disconnected before its init packet");
        return Ok(());
    };

    // Pairing key: the idekey attribute of the init packet's root element.
    // A missing attribute pairs like an empty key, i.e. not at all unless
    // someone registered one.
    let idekey = handshake
        .root
        .attribute("idekey")
        .unwrap_or_default()
        .to_string();
    let Some(endpoint) = context.registry.lookup(&idekey) else {
        warn!(target: "dbgp.session", %peer, %idekey, "no ide registered for session key");
        return Ok(());
    };

    let addr = format!("{}:{}", endpoint.host, endpoint.port);
    let ide = connect_ide(&addr, context.connect_timeout).await?;
    info!(target: "dbgp.session", %peer, %idekey, ide = %addr, "session paired");
    let (mut ide_read, mut ide_write) = ide.into_split();
    let mut ide_decoder = CommandDecoder::new();

    // The init packet itself is forwarded untouched; translation starts with
    // the packet after it.
    ide_write
        .write_all(&dbgp_proto::engine::encode(&handshake))
        .await
        .map_err(SessionError::IdeIo)?;
    // The engine may have pipelined more packets behind the init.
    while let Some(packet) = engine_decoder.next_packet()? {
        relay_engine_packet(&context.translator, packet, &mut ide_write).await?;
    }

    let mut engine_buf = [0_u8; 8 * 1024];
    let mut ide_buf = [0_u8; 8 * 1024];
    loop {
        tokio::select! {
            read = engine_read.read(&mut engine_buf) => {
                let count = read.map_err(SessionError::EngineIo)?;
                if count == 0 {
                    info!(target: "dbgp.session", %peer, %idekey, "engine disconnected");
                    break;
                }
                engine_decoder.feed(&engine_buf[..count]);
                while let Some(packet) = engine_decoder.next_packet()? {
                    relay_engine_packet(&context.translator, packet, &mut ide_write).await?;
                }
            }
            read = ide_read.read(&mut ide_buf) => {
                let count = read.map_err(SessionError::IdeIo)?;
                if count == 0 {
                    info!(target: "dbgp.session", %peer, %idekey, "ide disconnected");
                    break;
                }
                ide_decoder.feed(&ide_buf[..count]);
                while let Some(command) = ide_decoder.next_command()? {
                    relay_ide_command(&context.translator, command, &mut engine_write).await?;
                }
            }
            _ = context.shutdown.cancelled() => break,
        }
    }
    Ok(())
}

async fn read_packet(
    read: &mut OwnedReadHalf,
    decoder: &mut PacketDecoder,
) -> Result<Option<Document>, SessionError> {
    let mut buf = [0_u8; 8 * 1024];
    loop {
        if let Some(packet) = decoder.next_packet()? {
            return Ok(Some(packet));
        }
        let count = read.read(&mut buf).await.map_err(SessionError::EngineIo)?;
        if count == 0 {
            return Ok(None);
        }
        decoder.feed(&buf[..count]);
    }
}

async fn await_handshake(
    read: &mut OwnedReadHalf,
    decoder: &mut PacketDecoder,
    limit: Option<Duration>,
) -> Result<Option<Document>, SessionError> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, read_packet(read, decoder)).await {
            Ok(result) => result,
            Err(_) => Err(SessionError::HandshakeTimeout),
        },
        None => read_packet(read, decoder).await,
    }
}

async fn connect_ide(addr: &str, limit: Duration) -> Result<TcpStream, SessionError> {
    match tokio::time::timeout(limit, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => Ok(stream),
        Ok(Err(source)) => Err(SessionError::Connect {
            addr: addr.to_string(),
            source,
        }),
        Err(_) => Err(SessionError::ConnectTimeout {
            addr: addr.to_string(),
        }),
    }
}

async fn relay_engine_packet(
    translator: &FilenameTranslator,
    mut packet: Document,
    ide_write: &mut OwnedWriteHalf,
) -> Result<(), SessionError> {
    translate_engine_packet(translator, &mut packet);
    ide_write
        .write_all(&dbgp_proto::engine::encode(&packet))
        .await
        .map_err(SessionError::IdeIo)
}

/// Rewrites cache filenames back to original project paths on the direct
/// children that carry them: `stack` elements and Xdebug `message` elements.
///
/// Translation failures are per-node; the node keeps its filename and the
/// rest of the packet is still processed.
pub(crate) fn translate_engine_packet(translator: &FilenameTranslator, packet: &mut Document) {
    for child in packet.root.child_elements_mut() {
        let is_stack = child.prefix.is_none() && child.name == "stack";
        let is_xdebug_message = child.name == "message"
            && (child.prefix.as_deref() == Some("xdebug")
                || child
                    .namespace
                    .as_deref()
                    .is_some_and(|ns| XDEBUG_NAMESPACES.contains(&ns)));
        if !is_stack && !is_xdebug_message {
            continue;
        }
        let Some(filename) = child.attribute("filename").map(str::to_owned) else {
            continue;
        };
        if filename.is_empty() || !translator.should_attempt(&filename) {
            continue;
        }
        match translator.to_original(&filename) {
            Ok(original) => {
                child.set_attribute("filename", format!("file://{}", original.display()));
            }
            Err(error) => {
                debug!(target: "dbgp.translate", %filename, %error, "leaving filename untranslated");
            }
        }
    }
}

async fn relay_ide_command(
    translator: &FilenameTranslator,
    command: IdeCommand,
    engine_write: &mut OwnedWriteHalf,
) -> Result<(), SessionError> {
    let wire = match command.name.as_str() {
        "breakpoint_set" => rewrite_breakpoint_command(translator, &command)?,
        _ => dbgp_proto::ide::encode(&command.name, &command.args),
    };
    engine_write
        .write_all(&wire)
        .await
        .map_err(SessionError::EngineIo)
}

/// Rewrites the `-f` filename of a `breakpoint_set` to its cache path.
///
/// Unparseable arguments and a missing `-f` are session-fatal; the IDE and
/// the engine disagree about where breakpoints live, so continuing would set
/// them in files the engine never executes. A filename that merely fails to
/// translate (outside the project, skip-listed, missing locally) is forwarded
/// as sent.
pub(crate) fn rewrite_breakpoint_command(
    translator: &FilenameTranslator,
    command: &IdeCommand,
) -> Result<Vec<u8>, SessionError> {
    let mut args = CommandArgs::parse(&command.args).map_err(SessionError::BreakpointArgs)?;
    let Some(filename) = args.get("f").map(str::to_owned) else {
        return Err(SessionError::BreakpointMissingFile);
    };
    match translator.to_cache(&filename) {
        Ok(cache) => {
            args.set("f", format!("file://{}", cache.display()));
            Ok(dbgp_proto::ide::encode(&command.name, &args.to_wire()))
        }
        Err(error) => {
            warn!(
                target: "dbgp.translate",
                %filename,
                %error,
                "forwarding breakpoint with untranslated filename"
            );
            Ok(dbgp_proto::ide::encode(&command.name, &command.args))
        }
    }
}
