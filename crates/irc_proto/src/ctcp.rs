//! CTCP tagged-data quoting primitives (spec.md section 4.5).
//!
//! Two independent quoting layers are defined by the CTCP spec:
//!
//! - "low-level quoting" escapes bytes that would otherwise be misinterpreted by the IRC wire
//!   format itself (NUL, newline, carriage return), using `0x10` as the escape byte.
//! - "CTCP quoting" escapes the tagged-data delimiter `0x01`, using `\` (`0x5C`) as the escape
//!   byte.
//!
//! Encoding applies CTCP quoting first, then low-level quoting (the low-level layer is "closer
//! to the wire"); decoding reverses that order.

use thiserror::Error;

const LOW_LEVEL_ESCAPE: char = '\u{10}';
const CTCP_ESCAPE: char = '\\';
pub const TAGGED_DATA_DELIM: char = '\u{1}';

#[derive(Debug, Error, PartialEq, Eq)]
pub enum QuoteError {
    #[error("unrecognized low-level quote escape: {0:?}")]
    UnrecognizedLowLevelEscape(char),
    #[error("unrecognized CTCP quote escape: {0:?}")]
    UnrecognizedCtcpEscape(char),
}

fn low_level_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            LOW_LEVEL_ESCAPE => {
                out.push(LOW_LEVEL_ESCAPE);
                out.push(LOW_LEVEL_ESCAPE);
            }
            '\u{0}' => {
                out.push(LOW_LEVEL_ESCAPE);
                out.push('0');
            }
            '\n' => {
                out.push(LOW_LEVEL_ESCAPE);
                out.push('n');
            }
            '\r' => {
                out.push(LOW_LEVEL_ESCAPE);
                out.push('r');
            }
            c => out.push(c),
        }
    }
    out
}

fn low_level_dequote(s: &str) -> Result<String, QuoteError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == LOW_LEVEL_ESCAPE {
            match chars.next() {
                Some(LOW_LEVEL_ESCAPE) => out.push(LOW_LEVEL_ESCAPE),
                Some('0') => out.push('\u{0}'),
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some(other) => return Err(QuoteError::UnrecognizedLowLevelEscape(other)),
                None => return Err(QuoteError::UnrecognizedLowLevelEscape(LOW_LEVEL_ESCAPE)),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

fn ctcp_quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            CTCP_ESCAPE => {
                out.push(CTCP_ESCAPE);
                out.push(CTCP_ESCAPE);
            }
            TAGGED_DATA_DELIM => {
                out.push(CTCP_ESCAPE);
                out.push('a');
            }
            c => out.push(c),
        }
    }
    out
}

fn ctcp_dequote(s: &str) -> Result<String, QuoteError> {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == CTCP_ESCAPE {
            match chars.next() {
                Some(CTCP_ESCAPE) => out.push(CTCP_ESCAPE),
                Some('a') => out.push(TAGGED_DATA_DELIM),
                Some(other) => return Err(QuoteError::UnrecognizedCtcpEscape(other)),
                None => return Err(QuoteError::UnrecognizedCtcpEscape(CTCP_ESCAPE)),
            }
        } else {
            out.push(c);
        }
    }
    Ok(out)
}

/// Encode a CTCP payload: CTCP-quote then low-level-quote, per spec.md section 4.5.
pub fn encode(payload: &str) -> String {
    low_level_quote(&ctcp_quote(payload))
}

/// Decode a CTCP payload: low-level-dequote then CTCP-dequote (the reverse order of [`encode`]).
pub fn decode(payload: &str) -> Result<String, QuoteError> {
    let low_level_clean = low_level_dequote(payload)?;
    ctcp_dequote(&low_level_clean)
}

/// Does this PRIVMSG/NOTICE body look like tagged CTCP data? First and last bytes both
/// `0x01` (spec.md section 4.5).
pub fn is_tagged(body: &str) -> bool {
    let bytes = body.as_bytes();
    bytes.len() >= 2
        && bytes[0] == TAGGED_DATA_DELIM as u8
        && bytes[bytes.len() - 1] == TAGGED_DATA_DELIM as u8
}

/// Strip the tagged-data delimiters, assuming [`is_tagged`] returned true.
pub fn strip_delims(body: &str) -> &str {
    &body[1..body.len() - 1]
}

/// Split a decoded CTCP payload into `(tag, data)`. The tag is uppercased; `data` has its
/// leading single space and an optional leading `:` removed, per spec.md section 4.5.
pub fn split_tag(decoded: &str) -> (String, Option<String>) {
    match decoded.find(' ') {
        Some(idx) => {
            let tag = decoded[..idx].to_ascii_uppercase();
            let mut data = &decoded[idx + 1..];
            if let Some(stripped) = data.strip_prefix(':') {
                data = stripped;
            }
            (tag, Some(data.to_owned()))
        }
        None => (decoded.to_ascii_uppercase(), None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_dequote_idempotence() {
        let samples = [
            "plain text",
            "has\na newline",
            "has\ra carriage return",
            "has a nul \u{0} byte",
            "has a backslash \\ in it",
            "mix: \\ \n \r \u{0}",
        ];
        for s in samples {
            let encoded = encode(s);
            let decoded = decode(&encoded).unwrap();
            assert_eq!(decoded, s, "round trip failed for {:?}", s);
        }
    }

    #[test]
    fn unrecognized_escape_is_an_error() {
        // A lone low-level escape followed by an unmapped character.
        assert!(matches!(
            decode("\u{10}z"),
            Err(QuoteError::UnrecognizedLowLevelEscape('z'))
        ));
        assert!(matches!(
            decode("\\z"),
            Err(QuoteError::UnrecognizedCtcpEscape('z'))
        ));
    }

    #[test]
    fn tagged_detection_and_split() {
        let body = "\u{1}ACTION waves\u{1}";
        assert!(is_tagged(body));
        let inner = strip_delims(body);
        assert_eq!(inner, "ACTION waves");
        let (tag, data) = split_tag(inner);
        assert_eq!(tag, "ACTION");
        assert_eq!(data.as_deref(), Some("waves"));
    }

    #[test]
    fn split_tag_with_no_data() {
        let (tag, data) = split_tag("VERSION");
        assert_eq!(tag, "VERSION");
        assert_eq!(data, None);
    }
}
