//! An intercepting DBGp proxy for debugging through a rewritten-code cache.
//!
//! Test-instrumentation rewriters execute content-hashed copies of project
//! files out of a cache directory, so a debugger engine reports paths like
//! `/tmp/mocks/.../src/foo.php_<md5>.php` while the IDE only knows
//! `/project/src/foo.php`. This proxy sits between the two and relays DBGp
//! traffic unchanged except for filenames: engine-side cache paths are mapped
//! back to the original tree, and IDE-side `breakpoint_set` filenames are
//! mapped forward to the cache, with the embedded content hash verified
//! against the file on disk so stale cache entries are never silently mapped.
//!
//! Two TCP listeners are served: a registration port where IDEs announce
//! themselves with `proxyinit -k <idekey> -p <port>`, and a debug port where
//! engines connect. An engine's first packet names its `idekey`, which pairs
//! the session with a registered IDE.

pub mod config;
mod registration;
pub mod registry;
pub mod server;
mod session;
pub mod translate;

pub use config::{ConfigError, ProxyConfig};
pub use registry::{IdeEndpoint, IdeRegistry};
pub use server::{ProxyServer, ServerError};
pub use translate::{ContentHash, FilenameTranslator, TranslateError, TranslatorConfig};
