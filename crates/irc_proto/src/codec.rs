//! Framing and parsing of a single IRC wire line (spec.md section 4.1).
//!
//! A line here never includes the trailing "\r\n"; the caller's line splitter (a
//! `tokio_util::codec::LinesCodec`-style framer, or the buffer-draining loop in `irc_client`) is
//! responsible for finding the CRLF boundary.

use std::fmt;

use crate::names::CiStr;

pub const MAX_PARAMS: usize = 15;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("message has no command")]
    InvalidCommand,
    #[error("message has more than {MAX_PARAMS} parameters")]
    TooManyParameters,
}

/// A parsed IRC message: optional prefix, a command (textual or numeric), and up to 15
/// parameters. The last parameter may contain spaces (the "trailing" parameter).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub prefix: Option<String>,
    pub command: String,
    pub params: Vec<String>,
}

impl Message {
    pub fn new(
        prefix: Option<impl Into<String>>,
        command: impl Into<String>,
        params: Vec<String>,
    ) -> Result<Self, CodecError> {
        let command = command.into();
        if command.is_empty() {
            return Err(CodecError::InvalidCommand);
        }
        if params.len() > MAX_PARAMS {
            return Err(CodecError::TooManyParameters);
        }
        Ok(Message {
            prefix: prefix.map(Into::into),
            command,
            params,
        })
    }

    /// Is this command a three-digit numeric reply?
    pub fn numeric(&self) -> Option<u16> {
        if self.command.len() == 3 && self.command.bytes().all(|b| b.is_ascii_digit()) {
            self.command.parse().ok()
        } else {
            None
        }
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(prefix) = &self.prefix {
            write!(f, ":{} ", prefix)?;
        }
        if self.numeric().is_some() {
            write!(f, "{}", self.command)?;
        } else {
            write!(f, "{}", self.command.to_ascii_uppercase())?;
        }
        if let Some((last, init)) = self.params.split_last() {
            for p in init {
                write!(f, " {}", p)?;
            }
            write!(f, " :{}", last)?;
        }
        Ok(())
    }
}

/// Parse one line (without "\r\n") into a [`Message`].
///
/// Implements the params grammar from RFC 2812 section 2.3.1: up to 14 "middle" parameters
/// separated by single spaces, followed optionally by one "trailing" parameter introduced by
/// `:` (or forced at the 15th slot) that runs to the end of the line, spaces included.
pub fn parse(line: &str) -> Result<Message, CodecError> {
    let mut rest = line;

    let prefix = if let Some(stripped) = rest.strip_prefix(':') {
        let (pfx, after) = split_once_space(stripped);
        rest = after;
        Some(pfx.to_owned())
    } else {
        None
    };

    let (command, after_command) = split_once_space(rest);
    if command.is_empty() {
        return Err(CodecError::InvalidCommand);
    }
    rest = after_command;

    let params = parse_params(rest);
    if params.len() > MAX_PARAMS {
        return Err(CodecError::TooManyParameters);
    }

    Ok(Message {
        prefix,
        command: command.to_owned(),
        params,
    })
}

/// Split on the first ASCII space. If there is none, the whole string is the first half and the
/// second half is empty.
fn split_once_space(s: &str) -> (&str, &str) {
    match s.find(' ') {
        Some(idx) => (&s[..idx], &s[idx + 1..]),
        None => (s, ""),
    }
}

fn parse_params(mut rest: &str) -> Vec<String> {
    let mut params = Vec::new();
    loop {
        if rest.is_empty() {
            break;
        }
        if let Some(trailing) = rest.strip_prefix(':') {
            params.push(trailing.to_owned());
            break;
        }
        if params.len() == MAX_PARAMS - 1 {
            // 15th parameter: consumes the rest verbatim even without a leading ':'.
            params.push(rest.to_owned());
            break;
        }
        match rest.find(' ') {
            Some(idx) => {
                params.push(rest[..idx].to_owned());
                rest = &rest[idx + 1..];
            }
            None => {
                params.push(rest.to_owned());
                break;
            }
        }
    }
    params
}

/// Format a message into a wire line, *without* the trailing "\r\n" (callers append that when
/// writing to the socket, so that in-memory formatting stays testable without bytes).
pub fn format(msg: &Message) -> String {
    msg.to_string()
}

/// The sender of a message, resolved from the raw prefix string per spec.md section 4.1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Source {
    /// `nick[!user][@host]` — a user (possibly with only a bare nick known).
    User {
        nick: String,
        user: Option<String>,
        host: Option<String>,
    },
    /// A prefix that looks like a server host name (contains '.', no '!' or '@').
    Server(String),
}

/// Resolve a raw prefix string into a [`Source`]. Returns `None` for `prefix == None` (messages
/// with no prefix are assumed to originate from the connection itself, per RFC 2812).
pub fn resolve_source(prefix: Option<&str>) -> Option<Source> {
    let pfx = prefix?;

    if let Some(bang) = pfx.find('!') {
        let nick = &pfx[..bang];
        let rest = &pfx[bang + 1..];
        return Some(match rest.find('@') {
            Some(at) => Source::User {
                nick: nick.to_owned(),
                user: Some(rest[..at].to_owned()),
                host: Some(rest[at + 1..].to_owned()),
            },
            None => Source::User {
                nick: nick.to_owned(),
                user: Some(rest.to_owned()),
                host: None,
            },
        });
    }

    if let Some(at) = pfx.find('@') {
        return Some(Source::User {
            nick: pfx[..at].to_owned(),
            user: None,
            host: Some(pfx[at + 1..].to_owned()),
        });
    }

    if pfx.contains('.') {
        return Some(Source::Server(pfx.to_owned()));
    }

    Some(Source::User {
        nick: pfx.to_owned(),
        user: None,
        host: None,
    })
}

impl Source {
    pub fn nick(&self) -> Option<&CiStr> {
        match self {
            Source::User { nick, .. } => Some(CiStr::new(nick)),
            Source::Server(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_basic_command() {
        let msg = parse("JOIN #d").unwrap();
        assert_eq!(msg.prefix, None);
        assert_eq!(msg.command, "JOIN");
        assert_eq!(msg.params, vec!["#d"]);
    }

    #[test]
    fn parse_prefix_and_trailing() {
        let msg = parse(":Rincewind!rw@host PRIVMSG #d :Hello there").unwrap();
        assert_eq!(msg.prefix.as_deref(), Some("Rincewind!rw@host"));
        assert_eq!(msg.command, "PRIVMSG");
        assert_eq!(msg.params, vec!["#d", "Hello there"]);
    }

    #[test]
    fn parse_empty_trailing_is_present_not_absent() {
        let msg = parse("QUIT :").unwrap();
        assert_eq!(msg.params, vec![""]);
        let msg = parse("QUIT").unwrap();
        assert!(msg.params.is_empty());
    }

    #[test]
    fn parse_numeric_command() {
        let msg = parse(":srv 001 Rincewind :Welcome").unwrap();
        assert_eq!(msg.numeric(), Some(1));
    }

    #[test]
    fn parse_caps_params_at_fifteen() {
        let line = "CMD 1 2 3 4 5 6 7 8 9 10 11 12 13 14 trailing with spaces";
        let msg = parse(line).unwrap();
        assert_eq!(msg.params.len(), 15);
        assert_eq!(msg.params[14], "trailing with spaces");
    }

    #[test]
    fn invalid_command_rejected() {
        assert_eq!(parse("").unwrap_err(), CodecError::InvalidCommand);
        assert_eq!(parse(":prefix-only").unwrap_err(), CodecError::InvalidCommand);
    }

    #[test]
    fn format_round_trip_preserves_spacey_trailing() {
        let msg = Message::new(
            Some("nick!u@h"),
            "PRIVMSG",
            vec!["#chan".to_owned(), "a message  with   spaces".to_owned()],
        )
        .unwrap();
        let line = format(&msg);
        let reparsed = parse(&line).unwrap();
        assert_eq!(reparsed, msg);
    }

    #[test]
    fn format_uppercases_textual_commands_not_numerics() {
        let msg = Message::new(None::<String>, "join", vec!["#d".to_owned()]).unwrap();
        assert_eq!(format(&msg), "JOIN :#d");
        let msg = Message::new(Some("srv"), "001", vec!["nick".to_owned()]).unwrap();
        assert_eq!(format(&msg), ":srv 001 :nick");
    }

    #[test]
    fn too_many_parameters_rejected() {
        let params: Vec<String> = (0..16).map(|i| i.to_string()).collect();
        assert_eq!(
            Message::new(None::<String>, "CMD", params).unwrap_err(),
            CodecError::TooManyParameters
        );
    }

    #[test]
    fn resolve_source_variants() {
        assert_eq!(
            resolve_source(Some("nick!user@host")),
            Some(Source::User {
                nick: "nick".into(),
                user: Some("user".into()),
                host: Some("host".into()),
            })
        );
        assert_eq!(
            resolve_source(Some("nick@host")),
            Some(Source::User {
                nick: "nick".into(),
                user: None,
                host: Some("host".into()),
            })
        );
        assert_eq!(
            resolve_source(Some("irc.example.org")),
            Some(Source::Server("irc.example.org".into()))
        );
        assert_eq!(
            resolve_source(Some("Rincewind")),
            Some(Source::User {
                nick: "Rincewind".into(),
                user: None,
                host: None,
            })
        );
        assert_eq!(resolve_source(None), None);
    }
}
