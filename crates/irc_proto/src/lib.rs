//! Wire-level IRC protocol support: line framing/parsing, prefix (source) resolution, numeric
//! reply/error name tables, mode-string folding, CTCP quoting, and case-insensitive names.
//!
//! This crate has no I/O of its own; `irc_client` builds the stateful connection engine on top
//! of it. Incomplete by design: it implements the subset of RFC 1459/2812 that an IRC *client*
//! needs, not a general-purpose parser for every message a server or service might emit.

pub mod codec;
pub mod ctcp;
pub mod mode;
pub mod names;
pub mod reply;

pub use codec::{format, parse, CodecError, Message, Source};
pub use names::{CiStr, CiString};
pub use reply::{IrcError, IrcReply};
