//! Session-key to IDE endpoint table.

use std::collections::HashMap;

use parking_lot::Mutex;
use tracing::info;

/// Where a registered IDE listens for relayed debug traffic.
///
/// The host stays textual so pre-registered hostnames resolve at connect
/// time, not at registration time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdeEndpoint {
    pub key: String,
    pub host: String,
    pub port: u16,
}

/// Shared key -> endpoint table.
///
/// Registrations arrive on the registration listener while lookups come from
/// relay sessions, so the map sits behind a mutex and the registry is shared
/// as an `Arc`. Re-registering a key replaces the previous endpoint.
#[derive(Debug, Default)]
pub struct IdeRegistry {
    entries: Mutex<HashMap<String, IdeEndpoint>>,
}

impl IdeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, key: impl Into<String>, host: impl Into<String>, port: u16) {
        let endpoint = IdeEndpoint {
            key: key.into(),
            host: host.into(),
            port,
        };
        let previous = self
            .entries
            .lock()
            .insert(endpoint.key.clone(), endpoint.clone());
        match previous {
            Some(previous) if previous != endpoint => info!(
                target: "dbgp.registry",
                key = %endpoint.key,
                host = %endpoint.host,
                port = endpoint.port,
                previous_host = %previous.host,
                previous_port = previous.port,
                "ide registration replaced"
            ),
            _ => info!(
                target: "dbgp.registry",
                key = %endpoint.key,
                host = %endpoint.host,
                port = endpoint.port,
                "ide registered"
            ),
        }
    }

    pub fn lookup(&self, key: &str) -> Option<IdeEndpoint> {
        self.entries.lock().get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
