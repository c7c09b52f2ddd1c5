//! Listener setup and accept loops.

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::{ConfigError, ProxyConfig};
use crate::registration;
use crate::registry::IdeRegistry;
use crate::session::{self, RelayContext};
use crate::translate::FilenameTranslator;

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("failed to bind the {which} listener on {addr}: {source}")]
    Bind {
        which: &'static str,
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// A running proxy: both listeners bound, accept loops spawned.
///
/// Dropping the server (or calling [`shutdown`](Self::shutdown)) stops the
/// accept loops and cancels every active session.
#[derive(Debug)]
pub struct ProxyServer {
    registration_addr: SocketAddr,
    debug_addr: SocketAddr,
    shutdown: CancellationToken,
}

impl ProxyServer {
    pub async fn spawn(config: ProxyConfig) -> Result<Self, ServerError> {
        config.validate()?;

        let registry = Arc::new(IdeRegistry::new());
        for entry in &config.prereg {
            registry.register(entry.key.clone(), entry.host.clone(), entry.port);
        }
        if !config.prereg.is_empty() {
            info!(
                target: "dbgp.proxy",
                count = config.prereg.len(),
                "loaded pre-registered ides"
            );
        }

        let translator = Arc::new(FilenameTranslator::new(config.paths.translator_config()?));

        let (registration_listener, registration_addr) =
            bind("registration", &config.listen.registration).await?;
        let (debug_listener, debug_addr) = bind("debug", &config.listen.debug).await?;

        let shutdown = CancellationToken::new();
        let context = RelayContext {
            registry: Arc::clone(&registry),
            translator,
            connect_timeout: config.limits.connect_timeout(),
            first_packet_timeout: config.limits.first_packet_timeout(),
            shutdown: shutdown.clone(),
        };

        tokio::spawn(accept_registrations(
            registration_listener,
            registry,
            shutdown.clone(),
        ));
        tokio::spawn(accept_engines(debug_listener, context));

        info!(
            target: "dbgp.proxy",
            registration = %registration_addr,
            debug = %debug_addr,
            "listening"
        );

        Ok(ProxyServer {
            registration_addr,
            debug_addr,
            shutdown,
        })
    }

    /// Where IDEs register, as actually bound.
    pub fn registration_addr(&self) -> SocketAddr {
        self.registration_addr
    }

    /// Where engines connect, as actually bound.
    pub fn debug_addr(&self) -> SocketAddr {
        self.debug_addr
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

impl Drop for ProxyServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn bind(
    which: &'static str,
    addr: &str,
) -> Result<(TcpListener, SocketAddr), ServerError> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind {
            which,
            addr: addr.to_string(),
            source,
        })?;
    let local = listener
        .local_addr()
        .map_err(|source| ServerError::Bind {
            which,
            addr: addr.to_string(),
            source,
        })?;
    Ok((listener, local))
}

async fn accept_registrations(
    listener: TcpListener,
    registry: Arc<IdeRegistry>,
    shutdown: CancellationToken,
) {
    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(error) => {
                    warn!(target: "dbgp.proxy", %error, "registration accept failed");
                    continue;
                }
            },
            _ = shutdown.cancelled() => return,
        };
        let registry = Arc::clone(&registry);
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if let Err(error) = registration::run_registration(&registry, stream, shutdown).await {
                warn!(target: "dbgp.registry", %error, "registration connection failed");
            }
        });
    }
}

async fn accept_engines(listener: TcpListener, context: RelayContext) {
    loop {
        let stream = tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(error) => {
                    warn!(target: "dbgp.proxy", %error, "debug accept failed");
                    continue;
                }
            },
            _ = context.shutdown.cancelled() => return,
        };
        let context = context.clone();
        tokio::spawn(async move {
            if let Err(error) = session::run_relay(context, stream).await {
                warn!(target: "dbgp.session", %error, "session ended with an error");
            }
        });
    }
}
