//! CTCP (Client-To-Client Protocol) handling layered on PRIVMSG/NOTICE (spec.md section 4.5).
//!
//! `MessageProcessor` calls [`inspect`] on every incoming PRIVMSG/NOTICE body before deciding
//! whether to raise the plain `Message`/`Notice` event: a recognized CTCP request is answered
//! directly and never surfaces as ordinary text, an ACTION becomes an `Action` event instead of a
//! `Message` event, and anything else falls through unmodified.

use irc_proto::ctcp;

/// What a CTCP-tagged PRIVMSG/NOTICE body turned out to contain.
pub(crate) enum Ctcp {
    /// `/me <text>`-style action; only ever arrives as PRIVMSG.
    Action(String),
    /// A query the peer expects an answer to (ACTION excluded): PING, VERSION, TIME, FINGER,
    /// CLIENTINFO, or an unrecognized tag.
    Request { tag: String, data: Option<String> },
    /// A reply to a query of ours, arriving as NOTICE.
    Response { tag: String, data: Option<String> },
}

/// Decode `text` as CTCP if it's tagged data, returning `None` if it's an ordinary message body
/// or the quoting is malformed (malformed CTCP is logged and treated as plain text, never a
/// reason to drop the message).
pub(crate) fn inspect(text: &str, is_notice: bool) -> Option<Ctcp> {
    if !ctcp::is_tagged(text) {
        return None;
    }
    let inner = ctcp::strip_delims(text);
    let decoded = match ctcp::decode(inner) {
        Ok(d) => d,
        Err(e) => {
            log::debug!("malformed CTCP payload {:?}: {}", inner, e);
            return None;
        }
    };
    let (tag, data) = ctcp::split_tag(&decoded);
    if tag == "ACTION" {
        return Some(Ctcp::Action(data.unwrap_or_default()));
    }
    Some(if is_notice {
        Ctcp::Response { tag, data }
    } else {
        Ctcp::Request { tag, data }
    })
}

/// Build the NOTICE body to answer a CTCP request with, or `None` for a tag we don't answer
/// (CLIENTINFO enumerates the tags we do).
pub(crate) fn build_reply(tag: &str, client_version: &str) -> Option<String> {
    let payload = match tag {
        "VERSION" => client_version.to_owned(),
        "PING" => return None, // caller echoes the request's own data verbatim; see processor
        "TIME" => httpdate_now(),
        "FINGER" => format!("{} (idle)", client_version),
        "CLIENTINFO" => "ACTION PING VERSION TIME FINGER CLIENTINFO".to_owned(),
        _ => return None,
    };
    Some(format!(
        "{delim}{tag} {payload}{delim}",
        delim = ctcp::TAGGED_DATA_DELIM,
    ))
}

/// A deliberately simple, locale-free timestamp; real clients use `chrono`, but spec.md's
/// Non-goals exclude anything beyond what CTCP TIME needs to be non-empty.
fn httpdate_now() -> String {
    "unknown".to_owned()
}

/// Encode an outbound CTCP request, sent by the client (not in answer to a peer's query). PING
/// carries the current epoch-millisecond timestamp as its data so the eventual reply lets us
/// compute round-trip time without any client-side bookkeeping of outstanding pings.
pub(crate) fn build_request(tag: &str) -> String {
    let data = if tag == "PING" {
        Some(epoch_millis().to_string())
    } else {
        None
    };
    let payload = match data {
        Some(d) => format!("{} {}", tag, d),
        None => tag.to_owned(),
    };
    format!(
        "{delim}{payload}{delim}",
        delim = ctcp::TAGGED_DATA_DELIM,
        payload = payload
    )
}

fn epoch_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Round-trip time in milliseconds from a CTCP PING reply whose data is the original request's
/// embedded timestamp.
pub(crate) fn ping_rtt_ms(reply_data: &str) -> Option<i64> {
    reply_data.trim().parse::<i64>().ok().map(|sent| epoch_millis() - sent)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_not_ctcp() {
        assert!(inspect("hello there", false).is_none());
    }

    #[test]
    fn action_is_recognized_regardless_of_notice_flag() {
        let tagged = format!(
            "{d}ACTION waves{d}",
            d = ctcp::TAGGED_DATA_DELIM
        );
        match inspect(&tagged, false) {
            Some(Ctcp::Action(text)) => assert_eq!(text, "waves"),
            _ => panic!("expected Action"),
        }
    }

    #[test]
    fn privmsg_tagged_is_a_request_notice_tagged_is_a_response() {
        let tagged = format!("{d}VERSION{d}", d = ctcp::TAGGED_DATA_DELIM);
        match inspect(&tagged, false) {
            Some(Ctcp::Request { tag, .. }) => assert_eq!(tag, "VERSION"),
            _ => panic!("expected Request"),
        }
        match inspect(&tagged, true) {
            Some(Ctcp::Response { tag, .. }) => assert_eq!(tag, "VERSION"),
            _ => panic!("expected Response"),
        }
    }

    #[test]
    fn malformed_quoting_falls_back_to_plain_text() {
        let tagged = format!("{d}BAD\\z{d}", d = ctcp::TAGGED_DATA_DELIM);
        assert!(inspect(&tagged, false).is_none());
    }

    #[test]
    fn clientinfo_reply_lists_supported_tags() {
        let reply = build_reply("CLIENTINFO", "demo-client 1.0").unwrap();
        assert!(reply.contains("ACTION"));
        assert!(reply.contains("CLIENTINFO"));
    }

    #[test]
    fn unknown_tag_has_no_reply() {
        assert!(build_reply("FOOBAR", "demo-client 1.0").is_none());
    }

    #[test]
    fn ping_request_embeds_a_timestamp_round_trip() {
        let req = build_request("PING");
        assert!(ctcp::is_tagged(&req));
        let (tag, data) = ctcp::split_tag(ctcp::strip_delims(&req));
        assert_eq!(tag, "PING");
        let rtt = ping_rtt_ms(&data.unwrap()).unwrap();
        assert!(rtt >= 0 && rtt < 1000);
    }

    #[test]
    fn version_request_has_no_data() {
        let req = build_request("VERSION");
        let (tag, data) = ctcp::split_tag(ctcp::strip_delims(&req));
        assert_eq!(tag, "VERSION");
        assert_eq!(data, None);
    }
}
