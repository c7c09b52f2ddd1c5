//! IDE-side framing: NUL-terminated command lines.
//!
//! A line is `command -flag value ...`; the decoder splits off the command
//! name and keeps the argument tail raw (still quoted/escaped), since most
//! commands are relayed without ever parsing their arguments. See
//! [`crate::args`] for the argument syntax.

use crate::{ProtoError, Result};

/// Hard cap on a single buffered command line.
pub const MAX_COMMAND_BYTES: usize = 1024 * 1024;

/// One decoded IDE command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdeCommand {
    pub name: String,
    /// Raw argument tail, without the leading separator. Empty when the
    /// command came with no arguments.
    pub args: String,
}

/// Incremental decoder for NUL-terminated IDE command lines.
#[derive(Debug, Default)]
pub struct CommandDecoder {
    buffer: Vec<u8>,
}

impl CommandDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    pub fn next_command(&mut self) -> Result<Option<IdeCommand>> {
        let Some(end) = self.buffer.iter().position(|&byte| byte == 0) else {
            if self.buffer.len() > MAX_COMMAND_BYTES {
                return Err(ProtoError::Oversized {
                    what: "ide command line",
                    limit: MAX_COMMAND_BYTES,
                    actual: self.buffer.len(),
                });
            }
            return Ok(None);
        };
        let line = std::str::from_utf8(&self.buffer[..end])
            .map_err(|_| ProtoError::Utf8("ide command line"))?;
        let line = line.trim();
        if line.is_empty() {
            return Err(ProtoError::Frame("empty ide command line".to_string()));
        }
        let command = match line.split_once(' ') {
            Some((name, args)) => IdeCommand {
                name: name.to_string(),
                args: args.to_string(),
            },
            None => IdeCommand {
                name: line.to_string(),
                args: String::new(),
            },
        };
        self.buffer.drain(..=end);
        Ok(Some(command))
    }
}

/// Serializes a command line with its trailing NUL. `args` is emitted
/// verbatim, so it may be a raw relayed tail or the output of
/// [`crate::args::CommandArgs::to_wire`].
pub fn encode(name: &str, args: &str) -> Vec<u8> {
    let mut line = Vec::with_capacity(name.len() + args.len() + 2);
    line.extend_from_slice(name.as_bytes());
    if !args.is_empty() {
        line.push(b' ');
        line.extend_from_slice(args.as_bytes());
    }
    line.push(0);
    line
}
