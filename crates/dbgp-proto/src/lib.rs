//! DBGp wire protocol support.
//!
//! DBGp runs two different framings over plain TCP:
//!
//! * the debugger engine sends length-prefixed XML packets,
//!   `<ascii-decimal-length>\0<xml>\0`;
//! * the IDE sends NUL-terminated command lines, `command -flag value ...\0`.
//!
//! Both directions are implemented here as incremental, transport-free codecs:
//! feed raw socket bytes in, drain complete packets/commands out. Partial
//! frames survive across calls, so callers can read in arbitrary chunks. The
//! crate also carries a small mutable XML tree ([`xml::Document`]) so packet
//! attributes can be rewritten before re-serialization, and an ordered
//! argument list ([`args::CommandArgs`]) for the `-flag value` syntax of IDE
//! commands.
//!
//! Socket handling is deliberately out of scope; the proxy crate owns all I/O.

pub mod args;
pub mod engine;
pub mod ide;
pub mod xml;

use thiserror::Error;

pub use args::{ArgsError, CommandArgs};
pub use engine::PacketDecoder;
pub use ide::{CommandDecoder, IdeCommand};
pub use xml::{Attribute, Document, Element, Node};

/// Errors produced by the framing codecs.
///
/// Every variant means the byte stream can no longer be trusted: once a frame
/// header or payload fails to parse there is no way to resynchronize, so
/// callers are expected to drop the connection.
#[derive(Debug, Error)]
pub enum ProtoError {
    /// A length prefix or frame terminator did not match the engine framing.
    #[error("malformed frame: {0}")]
    Frame(String),

    /// A framed payload was not parseable XML.
    #[error("malformed packet xml: {source}")]
    Xml {
        #[from]
        source: roxmltree::Error,
    },

    /// Bytes that must be text were not UTF-8.
    #[error("{0} is not valid utf-8")]
    Utf8(&'static str),

    /// A declared packet length or buffered command line blew past the hard
    /// size limit.
    #[error("{what} of {actual} bytes exceeds the {limit} byte limit")]
    Oversized {
        what: &'static str,
        limit: usize,
        actual: usize,
    },
}

pub type Result<T> = std::result::Result<T, ProtoError>;
