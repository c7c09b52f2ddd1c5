//! The IDE registration listener protocol.

use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use dbgp_proto::{CommandArgs, CommandDecoder, Document, Element, IdeCommand};

use crate::registry::IdeRegistry;

#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("registration i/o failed: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Proto(#[from] dbgp_proto::ProtoError),
}

/// Serves one connection on the registration listener.
///
/// Exactly one command is read. A well-formed `proxyinit` registers the IDE
/// under its `-k` key, with the connection's peer address as host and `-p` as
/// port, and is acknowledged with a length-prefixed `<proxyinit success="1">`
/// packet. Anything else closes the connection without a response.
pub async fn run_registration(
    registry: &IdeRegistry,
    mut stream: TcpStream,
    shutdown: CancellationToken,
) -> Result<(), RegistrationError> {
    let peer = stream.peer_addr()?;
    info!(target: "dbgp.registry", %peer, "registration connection");

    let command = tokio::select! {
        command = read_command(&mut stream) => command?,
        _ = shutdown.cancelled() => return Ok(()),
    };
    let Some(command) = command else {
        info!(target: "dbgp.registry", %peer, "registration connection closed without a command");
        return Ok(());
    };

    if command.name != "proxyinit" {
        warn!(target: "dbgp.registry", %peer, command = %command.name, "unsupported registration command");
        return Ok(());
    }
    let (idekey, port) = match registration_args(&command) {
        Ok(parsed) => parsed,
        Err(reason) => {
            warn!(target: "dbgp.registry", %peer, %reason, "rejecting proxyinit");
            return Ok(());
        }
    };

    // The IDE's host is where it connected from, not something it claims.
    let host = peer.ip().to_string();
    registry.register(idekey.clone(), host.clone(), port);

    let ack = acknowledgement(&idekey, &host, port);
    stream.write_all(&dbgp_proto::engine::encode(&ack)).await?;
    Ok(())
}

async fn read_command(stream: &mut TcpStream) -> Result<Option<IdeCommand>, RegistrationError> {
    let mut decoder = CommandDecoder::new();
    let mut buf = [0_u8; 1024];
    loop {
        if let Some(command) = decoder.next_command()? {
            return Ok(Some(command));
        }
        let count = stream.read(&mut buf).await?;
        if count == 0 {
            return Ok(None);
        }
        decoder.feed(&buf[..count]);
    }
}

fn registration_args(command: &IdeCommand) -> Result<(String, u16), String> {
    let args = CommandArgs::parse(&command.args).map_err(|error| error.to_string())?;
    let Some(idekey) = args.get("k") else {
        return Err("missing -k idekey".to_string());
    };
    let port = args.get("p").ok_or_else(|| "missing -p port".to_string())?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("port {port} is not a valid tcp port"))?;
    Ok((idekey.to_string(), port))
}

fn acknowledgement(idekey: &str, address: &str, port: u16) -> Document {
    let mut root = Element::new("proxyinit");
    root.set_attribute("success", "1");
    root.set_attribute("idekey", idekey);
    root.set_attribute("address", address);
    root.set_attribute("port", port.to_string());
    Document::new(root)
}
