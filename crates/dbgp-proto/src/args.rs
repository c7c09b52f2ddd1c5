//! DBGp command argument lists.
//!
//! Arguments are ordered `-flag value` pairs, optionally followed by an
//! opaque data tail after a bare `--` (base64 in the protocol; treated as a
//! verbatim string here). Values may be single- or double-quoted with
//! backslash escapes, or unquoted up to the next space.
//!
//! Duplicate flags are rejected outright rather than last-one-wins: for the
//! commands the proxy actually parses, a duplicated flag makes the command
//! ambiguous, and guessing could rewrite the wrong value.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ArgsError {
    #[error("expected a -flag token, found {0:?}")]
    ExpectedFlag(String),
    #[error("flag -{0} is missing its value")]
    MissingValue(String),
    #[error("flag -{0} appears more than once")]
    DuplicateFlag(String),
    #[error("unterminated quoted value")]
    UnterminatedQuote,
}

/// Ordered `-flag value` pairs plus an optional data tail.
///
/// Order is preserved so a rewritten command serializes with its arguments in
/// the positions the IDE sent them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandArgs {
    pairs: Vec<(String, String)>,
    data: Option<String>,
}

impl CommandArgs {
    pub fn parse(raw: &str) -> Result<Self, ArgsError> {
        let (tokens, data) = tokenize(raw)?;
        let mut pairs: Vec<(String, String)> = Vec::new();
        let mut tokens = tokens.into_iter();
        while let Some(token) = tokens.next() {
            let flag = match token.strip_prefix('-') {
                Some(flag) if !flag.is_empty() && !flag.starts_with('-') => flag,
                _ => return Err(ArgsError::ExpectedFlag(token)),
            };
            let Some(value) = tokens.next() else {
                return Err(ArgsError::MissingValue(flag.to_string()));
            };
            if pairs.iter().any(|(existing, _)| existing == flag) {
                return Err(ArgsError::DuplicateFlag(flag.to_string()));
            }
            pairs.push((flag.to_string(), value));
        }
        Ok(CommandArgs { pairs, data })
    }

    pub fn get(&self, flag: &str) -> Option<&str> {
        self.pairs
            .iter()
            .find(|(name, _)| name == flag)
            .map(|(_, value)| value.as_str())
    }

    /// Overwrites the flag's value in place, or appends the pair when absent.
    pub fn set(&mut self, flag: &str, value: impl Into<String>) {
        let value = value.into();
        match self.pairs.iter_mut().find(|(name, _)| name == flag) {
            Some(pair) => pair.1 = value,
            None => self.pairs.push((flag.to_string(), value)),
        }
    }

    pub fn data(&self) -> Option<&str> {
        self.data.as_deref()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.pairs
            .iter()
            .map(|(flag, value)| (flag.as_str(), value.as_str()))
    }

    /// Re-serializes the argument list in wire syntax, double-quoting values
    /// that need it.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        for (flag, value) in &self.pairs {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push('-');
            out.push_str(flag);
            out.push(' ');
            push_value(&mut out, value);
        }
        if let Some(data) = &self.data {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str("--");
            if !data.is_empty() {
                out.push(' ');
                out.push_str(data);
            }
        }
        out
    }
}

/// Splits the raw tail into tokens, stopping at a bare `--`; everything after
/// it is returned verbatim as the data tail.
fn tokenize(raw: &str) -> Result<(Vec<String>, Option<String>), ArgsError> {
    let mut tokens = Vec::new();
    let mut chars = raw.chars().peekable();
    loop {
        while chars.peek() == Some(&' ') {
            chars.next();
        }
        let Some(&first) = chars.peek() else {
            return Ok((tokens, None));
        };
        if first == '"' || first == '\'' {
            chars.next();
            let mut value = String::new();
            let mut terminated = false;
            while let Some(ch) = chars.next() {
                if ch == '\\' {
                    match chars.next() {
                        Some(escaped) => value.push(escaped),
                        None => return Err(ArgsError::UnterminatedQuote),
                    }
                } else if ch == first {
                    terminated = true;
                    break;
                } else {
                    value.push(ch);
                }
            }
            if !terminated {
                return Err(ArgsError::UnterminatedQuote);
            }
            tokens.push(value);
        } else {
            let mut value = String::new();
            while let Some(&ch) = chars.peek() {
                if ch == ' ' {
                    break;
                }
                value.push(ch);
                chars.next();
            }
            if value == "--" {
                let tail: String = chars.collect();
                let tail = tail.trim_start_matches(' ').to_string();
                return Ok((tokens, Some(tail)));
            }
            tokens.push(value);
        }
    }
}

fn push_value(out: &mut String, value: &str) {
    let needs_quoting = value.is_empty()
        || value
            .chars()
            .any(|ch| matches!(ch, ' ' | '"' | '\'' | '\\'));
    if !needs_quoting {
        out.push_str(value);
        return;
    }
    out.push('"');
    for ch in value.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('"');
}
