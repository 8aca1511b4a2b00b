/// IRC message parsing and serialization.
///
/// RFC 2812 shape: [`:`prefix SPACE] command [SPACE params] [SPACE `:`trailing].
/// The gateway only speaks the subset of replies it needs, but the wire form
/// is the standard one so any IRC client can talk to it.
use std::fmt;

/// A parsed IRC message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Optional prefix (server name or `nick!user@host`).
    pub prefix: Option<String>,
    /// Command token (e.g. `PRIVMSG`, `001`, `NICK`).
    pub command: String,
    /// Parameters; the last may carry spaces (trailing param).
    pub params: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty message")]
    Empty,
    #[error("prefix present but missing command")]
    MissingCommand,
}

impl Message {
    /// Build a message with no prefix.
    pub fn new(command: impl Into<String>, params: Vec<String>) -> Self {
        Self {
            prefix: None,
            command: command.into(),
            params,
        }
    }

    /// Build a message carrying a prefix.
    pub fn with_prefix(
        prefix: impl Into<String>,
        command: impl Into<String>,
        params: Vec<String>,
    ) -> Self {
        Self {
            prefix: Some(prefix.into()),
            command: command.into(),
            params,
        }
    }

    /// Parse a single message from a line (without the trailing `\r\n`).
    pub fn parse(input: &str) -> Result<Self, ParseError> {
        let input = input.trim_end_matches(['\r', '\n']);
        if input.is_empty() {
            return Err(ParseError::Empty);
        }

        let (prefix, rest) = match input.strip_prefix(':') {
            Some(prefixed) => {
                let (prefix, rest) =
                    prefixed.split_once(' ').ok_or(ParseError::MissingCommand)?;
                (Some(prefix.to_owned()), rest)
            }
            None => (None, input),
        };

        let (command, mut remaining) = match rest.split_once(' ') {
            Some((cmd, rem)) => (cmd, rem),
            None => (rest, ""),
        };
        if command.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        let mut params = Vec::new();
        while !remaining.is_empty() {
            if let Some(trailing) = remaining.strip_prefix(':') {
                // Trailing parameter: the rest of the line, spaces included.
                params.push(trailing.to_owned());
                break;
            }
            match remaining.split_once(' ') {
                Some((param, rest)) => {
                    params.push(param.to_owned());
                    remaining = rest;
                }
                None => {
                    params.push(remaining.to_owned());
                    break;
                }
            }
        }

        Ok(Message {
            prefix,
            command: command.to_owned(),
            params,
        })
    }

    /// Serialize to the wire format (without trailing `\r\n`).
    ///
    /// The last parameter is always written with a `:` — valid per RFC 2812
    /// and sidesteps ambiguity when it contains spaces or is empty.
    pub fn to_wire(&self) -> String {
        let mut out = String::new();
        if let Some(ref prefix) = self.prefix {
            out.push(':');
            out.push_str(prefix);
            out.push(' ');
        }
        out.push_str(&self.command);
        if !self.params.is_empty() {
            let last = self.params.len() - 1;
            for (i, param) in self.params.iter().enumerate() {
                out.push(' ');
                if i == last {
                    out.push(':');
                }
                out.push_str(param);
            }
        }
        out
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_wire())
    }
}
