//! `MessageProcessor`: turns parsed wire messages into entity-table mutations and events
//! (spec.md section 4.3). One function per textual command, plus a numeric dispatch table.

use std::rc::Rc;
use std::time::Duration;

use irc_proto::mode::{fold_modes, split_mode_tail, Sign};
use irc_proto::names::{is_channel_name, is_target_mask};
use irc_proto::{CiStr, CiString, IrcError, IrcReply, Message};

use crate::client::ClientState;
use crate::ctcp_client::{self, Ctcp};
use crate::events::{
    BanEntry, ChannelEvent, ClientEvent, EventSource, ListedChannel, LocalUserEvent,
    ProtocolError, StatsKind, UserEvent,
};
use crate::model::ChannelType;

/// The value sent back for CTCP VERSION/CLIENTINFO replies. Not user-configurable yet; spec.md
/// doesn't call out a way to override it.
const CLIENT_VERSION: &str = "irc_client (spec.md section 4.5 reference implementation)";

/// Dispatch one parsed message against `state`. Never fails: malformed or unrecognized input is
/// logged and dropped rather than propagated, per spec.md section 7's "the processor never
/// returns an error to the caller" rule.
pub(crate) fn process(state: &mut ClientState, msg: Message) {
    if let Some(code) = msg.numeric() {
        process_numeric(state, code, msg);
        return;
    }

    match msg.command.to_ascii_uppercase().as_str() {
        "PING" => handle_ping(state, msg),
        "PONG" => handle_pong(state, msg),
        "NICK" => handle_nick(state, msg),
        "QUIT" => handle_quit(state, msg),
        "JOIN" => handle_join(state, msg),
        "PART" => handle_part(state, msg),
        "MODE" => handle_mode(state, msg),
        "TOPIC" => handle_topic(state, msg),
        "KICK" => handle_kick(state, msg),
        "INVITE" => handle_invite(state, msg),
        "PRIVMSG" => handle_privmsg_notice(state, msg, false),
        "NOTICE" => handle_privmsg_notice(state, msg, true),
        "ERROR" => handle_error(state, msg),
        other => log::debug!("unhandled command {:?}: {:?}", other, msg.params),
    }
}

fn resolve_source(state: &mut ClientState, msg: &Message) -> EventSource {
    match irc_proto::codec::resolve_source(msg.prefix.as_deref()) {
        Some(src) => state.resolve_event_source(&src),
        None => {
            let host = state.connect_host.clone();
            EventSource::Server(state.get_server_from_host(&host))
        }
    }
}

fn handle_ping(state: &mut ClientState, msg: Message) {
    let token = msg.params.first().cloned().unwrap_or_default();
    state.send_command("PONG", vec![token.clone()]);
    state.emit_client_event(ClientEvent::Ping { server: token });
}

fn handle_pong(state: &mut ClientState, msg: Message) {
    let server = msg.params.last().cloned().unwrap_or_default();
    state.emit_client_event(ClientEvent::Pong { server });
}

fn handle_nick(state: &mut ClientState, msg: Message) {
    let Some(new_nick_raw) = msg.params.first() else {
        return;
    };
    let source = resolve_source(state, &msg);
    let EventSource::User(user_ref) = source else {
        return;
    };
    let old_nick = user_ref.borrow().nick_name.clone();
    let new_nick = CiString::new(new_nick_raw.clone());

    state.users.remove(old_nick.as_ref());
    user_ref.borrow_mut().nick_name = new_nick.clone();
    state.users.insert(new_nick.clone(), Rc::clone(&user_ref));

    if state.is_local_nick(old_nick.as_ref()) {
        if let Some(lu) = state.local_user.as_mut() {
            lu.nick_name = new_nick.clone();
            lu.events.emit(LocalUserEvent::NickChanged {
                old: old_nick.to_string(),
                new: new_nick.to_string(),
            });
        }
    }
}

fn handle_quit(state: &mut ClientState, msg: Message) {
    let source = resolve_source(state, &msg);
    let EventSource::User(user_ref) = source else {
        return;
    };
    let nick = user_ref.borrow().nick_name.clone();
    let comment = msg.params.first().cloned();
    for chan in state.channels.values() {
        chan.borrow_mut().user_quit(nick.as_ref(), comment.clone());
    }
    user_ref.borrow_mut().is_online = false;
    state.users.remove(nick.as_ref());
}

fn handle_join(state: &mut ClientState, msg: Message) {
    let Some(chan_name) = msg.params.first() else {
        return;
    };
    let source = resolve_source(state, &msg);
    let EventSource::User(user_ref) = source else {
        return;
    };
    let chan_ref = state.get_channel_from_name(CiStr::new(chan_name));
    chan_ref
        .borrow_mut()
        .user_joined(&chan_ref, Rc::clone(&user_ref));

    if state.is_local_nick(user_ref.borrow().nick_name.as_ref()) {
        if let Some(lu) = state.local_user.as_mut() {
            lu.events
                .emit(LocalUserEvent::JoinedChannel(Rc::clone(&chan_ref)));
        }
    }
}

fn handle_part(state: &mut ClientState, msg: Message) {
    let Some(chan_name) = msg.params.first() else {
        return;
    };
    let source = resolve_source(state, &msg);
    let EventSource::User(user_ref) = source else {
        return;
    };
    let nick = user_ref.borrow().nick_name.clone();
    let comment = msg.params.get(1).cloned();
    let chan_ref = state.get_channel_from_name(CiStr::new(chan_name));
    chan_ref.borrow_mut().user_left(nick.as_ref(), comment);

    if state.is_local_nick(nick.as_ref()) {
        state.channels.remove(chan_ref.borrow().name.as_ref());
        if let Some(lu) = state.local_user.as_mut() {
            lu.events
                .emit(LocalUserEvent::PartedChannel(Rc::clone(&chan_ref)));
        }
    }
}

fn handle_topic(state: &mut ClientState, msg: Message) {
    let Some(chan_name) = msg.params.first() else {
        return;
    };
    let topic = msg.params.get(1).cloned();
    let source = resolve_source(state, &msg);
    let chan_ref = state.get_channel_from_name(CiStr::new(chan_name));
    chan_ref.borrow_mut().set_topic(Some(source), topic);
}

fn handle_kick(state: &mut ClientState, msg: Message) {
    let (Some(chan_name), Some(kicked_nick)) = (msg.params.first(), msg.params.get(1)) else {
        return;
    };
    let reason = msg.params.get(2).cloned();
    let source = resolve_source(state, &msg);
    let chan_ref = state.get_channel_from_name(CiStr::new(chan_name));
    let kicked_ci = CiString::new(kicked_nick.clone());
    chan_ref
        .borrow_mut()
        .user_kicked(kicked_ci.as_ref(), source.clone(), reason.clone());

    if state.is_local_nick(kicked_ci.as_ref()) {
        state.channels.remove(chan_ref.borrow().name.as_ref());
        if let Some(lu) = state.local_user.as_mut() {
            lu.events.emit(LocalUserEvent::Kicked {
                channel: Rc::clone(&chan_ref),
                source,
                reason,
            });
        }
    }
}

fn handle_invite(state: &mut ClientState, msg: Message) {
    let (Some(invitee), Some(chan_name)) = (msg.params.first(), msg.params.get(1)) else {
        return;
    };
    let source = resolve_source(state, &msg);
    if state.is_local_nick(CiStr::new(invitee)) {
        state.emit_client_event(ClientEvent::Invite {
            source: source.clone(),
            channel: chan_name.clone(),
        });
    }
    let chan_ref = state.get_channel_from_name(CiStr::new(chan_name));
    chan_ref.borrow_mut().events.emit(ChannelEvent::UserInvite {
        source,
        invitee: invitee.clone(),
    });
}

/// Is `mode` a per-user status mode (the PREFIX table), vs a channel mode?
fn is_status_mode(state: &ClientState, mode: char) -> bool {
    state.channel_user_modes.contains(&mode)
}

fn takes_param(state: &ClientState, mode: char, sign: Sign) -> bool {
    if is_status_mode(state, mode) {
        return true;
    }
    if state.chanmodes_a.contains(&mode) || state.chanmodes_b.contains(&mode) {
        return true;
    }
    if state.chanmodes_c.contains(&mode) {
        return matches!(sign, Sign::Add);
    }
    false
}

fn handle_mode(state: &mut ClientState, msg: Message) {
    let Some(target) = msg.params.first().cloned() else {
        return;
    };
    let (mode_str, params) = split_mode_tail(&msg.params[1..]);
    let source = resolve_source(state, &msg);

    if !is_channel_name(&target) {
        if state.is_local_nick(CiStr::new(&target)) {
            if let Some(lu) = state.local_user.as_mut() {
                lu.modes_changed(mode_str);
            }
        } else {
            // MODE for a foreign user is a protocol violation (spec.md section 4.3/4.7): emit
            // an error and do not mutate any entity.
            state.emit_client_event(ClientEvent::Error(format!(
                "protocol violation: MODE for foreign user {:?}",
                target
            )));
        }
        return;
    }

    let changes = fold_modes(mode_str, params, |m, s| takes_param(state, m, s));
    let chan_ref = state.get_channel_from_name(CiStr::new(&target));

    let mut channel_level = Vec::new();
    for change in changes {
        if is_status_mode(state, change.mode) {
            if let Some(param) = &change.param {
                let nick = CiString::new(param.clone());
                if let Some(cu) = chan_ref.borrow().find_user(nick.as_ref()) {
                    cu.borrow_mut().modes_changed(std::slice::from_ref(&change));
                }
            }
        } else {
            let mut chan = chan_ref.borrow_mut();
            match change.sign {
                Sign::Add => {
                    chan.modes.insert(change.mode);
                }
                Sign::Remove => {
                    chan.modes.remove(&change.mode);
                }
            }
            channel_level.push(change);
        }
    }

    if !channel_level.is_empty() {
        chan_ref.borrow_mut().events.emit(ChannelEvent::Modes {
            source,
            changes: channel_level,
        });
    }
}

fn handle_error(state: &mut ClientState, msg: Message) {
    let reason = msg.params.first().cloned().unwrap_or_default();
    state.emit_client_event(ClientEvent::Error(reason));
}

fn handle_privmsg_notice(state: &mut ClientState, msg: Message, is_notice: bool) {
    if msg.params.len() < 2 {
        return;
    }
    let targets = msg.params[0].clone();
    let text = msg.params[1].clone();

    // Pre-registration "NOTICE AUTH :..." lines have no real target entity (spec.md section
    // 4.3); route them straight to the connection-wide event instead of interning a bogus user.
    if is_notice && targets.eq_ignore_ascii_case("AUTH") {
        state.emit_client_event(ClientEvent::AuthNotice(text));
        return;
    }

    let source = resolve_source(state, &msg);
    for target in targets.split(',').filter(|t| !t.is_empty()) {
        deliver_to_target(state, &source, target, &text, is_notice);
    }
}

fn deliver_to_target(
    state: &mut ClientState,
    source: &EventSource,
    target: &str,
    text: &str,
    is_notice: bool,
) {
    if is_target_mask(target) && !is_channel_name(target) {
        log::debug!("message to target mask {:?} dropped, no owning entity", target);
        return;
    }

    let ctcp = ctcp_client::inspect(text, is_notice);

    if is_channel_name(target) {
        let chan_ref = state.get_channel_from_name(CiStr::new(target));
        let handled = ctcp.is_some();
        let preview = chan_ref.borrow_mut().events.emit(if is_notice {
            ChannelEvent::PreviewNotice {
                source: source.clone(),
                text: text.to_owned(),
                handled,
            }
        } else {
            ChannelEvent::PreviewMessage {
                source: source.clone(),
                text: text.to_owned(),
                handled,
            }
        });
        let handled = match preview {
            ChannelEvent::PreviewMessage { handled, .. }
            | ChannelEvent::PreviewNotice { handled, .. } => handled,
            _ => handled,
        };

        match ctcp {
            Some(Ctcp::Action(text)) => {
                chan_ref.borrow_mut().events.emit(ChannelEvent::Action {
                    source: source.clone(),
                    text,
                });
            }
            Some(Ctcp::Request { tag, data }) => {
                respond_to_ctcp_request(state, source, &tag, data.as_deref());
            }
            Some(Ctcp::Response { tag, data }) => {
                handle_ctcp_response(state, source, &tag, data.as_deref());
            }
            None => {
                if !handled {
                    chan_ref.borrow_mut().events.emit(if is_notice {
                        ChannelEvent::Notice {
                            source: source.clone(),
                            text: text.to_owned(),
                        }
                    } else {
                        ChannelEvent::Message {
                            source: source.clone(),
                            text: text.to_owned(),
                        }
                    });
                }
            }
        }
    } else {
        let user_ref = state.get_user_from_nick(CiStr::new(target));
        let handled = ctcp.is_some();
        let preview = user_ref.borrow_mut().events.emit(if is_notice {
            UserEvent::PreviewNotice {
                source: source.clone(),
                text: text.to_owned(),
                handled,
            }
        } else {
            UserEvent::PreviewMessage {
                source: source.clone(),
                text: text.to_owned(),
                handled,
            }
        });
        let handled = match preview {
            UserEvent::PreviewMessage { handled, .. } | UserEvent::PreviewNotice { handled, .. } => {
                handled
            }
            _ => handled,
        };

        match ctcp {
            Some(Ctcp::Action(text)) => {
                user_ref.borrow_mut().events.emit(UserEvent::Action {
                    source: source.clone(),
                    text,
                });
            }
            Some(Ctcp::Request { tag, data }) => {
                respond_to_ctcp_request(state, source, &tag, data.as_deref());
            }
            Some(Ctcp::Response { tag, data }) => {
                handle_ctcp_response(state, source, &tag, data.as_deref());
            }
            None => {
                if !handled {
                    user_ref.borrow_mut().events.emit(if is_notice {
                        UserEvent::Notice {
                            source: source.clone(),
                            text: text.to_owned(),
                        }
                    } else {
                        UserEvent::Message {
                            source: source.clone(),
                            text: text.to_owned(),
                        }
                    });
                }
            }
        }
    }
}

/// Answer a CTCP request (spec.md section 4.5): PING echoes the request's own data verbatim,
/// everything else goes through [`ctcp_client::build_reply`].
fn respond_to_ctcp_request(state: &ClientState, source: &EventSource, tag: &str, data: Option<&str>) {
    let Some(nick) = source.nick() else {
        return;
    };
    let reply = if tag == "PING" {
        Some(format!(
            "{d}PING {data}{d}",
            d = irc_proto::ctcp::TAGGED_DATA_DELIM,
            data = data.unwrap_or_default()
        ))
    } else {
        ctcp_client::build_reply(tag, CLIENT_VERSION)
    };
    if let Some(reply) = reply {
        state.send_command("NOTICE", vec![nick, reply]);
    }
}

/// Surface a reply to one of our own outbound CTCP requests (spec.md section 4.5: "responses are
/// surfaced as events"). Unknown reply tags are logged, not fatal.
fn handle_ctcp_response(state: &ClientState, source: &EventSource, tag: &str, data: Option<&str>) {
    match tag {
        "VERSION" => state.emit_client_event(ClientEvent::CtcpVersion {
            source: source.clone(),
            version: data.unwrap_or_default().to_owned(),
        }),
        "PING" => {
            if let Some(rtt_ms) = data.and_then(ctcp_client::ping_rtt_ms) {
                state.emit_client_event(ClientEvent::CtcpPing {
                    source: source.clone(),
                    rtt_ms,
                });
            }
        }
        "TIME" => state.emit_client_event(ClientEvent::CtcpTime {
            source: source.clone(),
            time: data.unwrap_or_default().to_owned(),
        }),
        "FINGER" => state.emit_client_event(ClientEvent::CtcpFinger {
            source: source.clone(),
            info: data.unwrap_or_default().to_owned(),
        }),
        "CLIENTINFO" => state.emit_client_event(ClientEvent::CtcpClientInfo {
            source: source.clone(),
            info: data.unwrap_or_default().to_owned(),
        }),
        other => log::debug!("unhandled CTCP reply tag {:?}: {:?}", other, data),
    }
}

fn process_numeric(state: &mut ClientState, code: u16, msg: Message) {
    if IrcError::from_u16(code).is_some() || irc_proto::reply::is_error_range(code) {
        handle_protocol_error(state, code, msg);
        return;
    }

    let Some(reply) = IrcReply::from_u16(code) else {
        log::debug!("unrecognized numeric {}: {:?}", code, msg.params);
        return;
    };

    match reply {
        IrcReply::RPL_WELCOME => handle_welcome(state, msg),
        IrcReply::RPL_YOURHOST | IrcReply::RPL_CREATED | IrcReply::RPL_BOUNCE => {
            log::debug!("{}: {:?}", reply.name(), msg.params)
        }
        IrcReply::RPL_MYINFO => handle_myinfo(state, msg),
        IrcReply::RPL_ISUPPORT => handle_isupport(state, msg),
        IrcReply::RPL_UMODEIS => {
            if let Some(mode_str) = msg.params.get(1) {
                if let Some(lu) = state.local_user.as_mut() {
                    lu.modes_changed(mode_str);
                }
            }
        }
        IrcReply::RPL_STATSLINKINFO => record_stat(state, StatsKind::Connection, &msg),
        IrcReply::RPL_STATSCOMMANDS => record_stat(state, StatsKind::Command, &msg),
        IrcReply::RPL_STATSUPTIME => record_stat(state, StatsKind::Uptime, &msg),
        IrcReply::RPL_STATSOLINE => record_stat(state, StatsKind::AllowedOperator, &msg),
        IrcReply::RPL_ENDOFSTATS => {
            let entries = std::mem::take(&mut state.listed_stats_entries);
            state.emit_client_event(ClientEvent::ServerStatistics { entries });
        }
        IrcReply::RPL_LUSERCLIENT => {
            if let (Some(visible), Some(invisible)) = (
                parse_luserclient_visible(&msg),
                parse_luserclient_invisible(&msg),
            ) {
                state.network_info.visible_users = Some(visible);
                state.network_info.invisible_users = Some(invisible);
            }
            emit_network_info(state);
        }
        IrcReply::RPL_LUSEROP => {
            state.network_info.operators = msg.params.get(1).and_then(|s| s.parse().ok());
            emit_network_info(state);
        }
        IrcReply::RPL_LUSERUNKNOWN => {
            state.network_info.unknown_connections = msg.params.get(1).and_then(|s| s.parse().ok());
            emit_network_info(state);
        }
        IrcReply::RPL_LUSERCHANNELS => {
            state.network_info.channels = msg.params.get(1).and_then(|s| s.parse().ok());
            emit_network_info(state);
        }
        IrcReply::RPL_LUSERME => {
            if let Some(text) = msg.params.last() {
                state.network_info.server_client_pairs = text
                    .split_whitespace()
                    .position(|w| w.eq_ignore_ascii_case("clients"))
                    .and_then(|idx| text.split_whitespace().nth(idx.checked_sub(1)?))
                    .and_then(|n| n.parse().ok());
                state.network_info.servers = text
                    .split_whitespace()
                    .position(|w| w.eq_ignore_ascii_case("servers"))
                    .and_then(|idx| text.split_whitespace().nth(idx.checked_sub(1)?))
                    .and_then(|n| n.parse().ok());
            }
            emit_network_info(state);
        }
        IrcReply::RPL_AWAY => {
            if let (Some(nick), Some(away_message)) = (msg.params.get(0), msg.params.get(1)) {
                let user_ref = state.get_user_from_nick(CiStr::new(nick));
                let mut u = user_ref.borrow_mut();
                u.is_away = true;
                u.away_message = Some(away_message.clone());
            }
        }
        IrcReply::RPL_USERHOST | IrcReply::RPL_ISON => {
            log::debug!("{}: {:?}", reply.name(), msg.params)
        }
        IrcReply::RPL_UNAWAY => {
            if let Some(lu) = state.local_user.as_mut() {
                lu.is_away = false;
            }
        }
        IrcReply::RPL_NOWAWAY => {
            if let Some(lu) = state.local_user.as_mut() {
                lu.is_away = true;
            }
        }
        IrcReply::RPL_WHOISUSER => handle_whois_user(state, msg),
        IrcReply::RPL_WHOISSERVER => {
            if let (Some(nick), Some(server), Some(info)) =
                (msg.params.get(0), msg.params.get(1), msg.params.get(2))
            {
                let user_ref = state.get_user_from_nick(CiStr::new(nick));
                let mut u = user_ref.borrow_mut();
                u.server_name = Some(server.clone());
                u.server_info = Some(info.clone());
            }
        }
        IrcReply::RPL_WHOISOPERATOR => {
            if let Some(nick) = msg.params.first() {
                state.get_user_from_nick(CiStr::new(nick)).borrow_mut().is_operator = true;
            }
        }
        IrcReply::RPL_WHOWASUSER => handle_whois_user(state, msg),
        IrcReply::RPL_ENDOFWHO => log::debug!("end of WHO: {:?}", msg.params),
        IrcReply::RPL_WHOISIDLE => {
            if let (Some(nick), Some(secs)) = (msg.params.get(0), msg.params.get(1)) {
                if let Ok(secs) = secs.parse::<u64>() {
                    state
                        .get_user_from_nick(CiStr::new(nick))
                        .borrow_mut()
                        .idle_duration = Some(Duration::from_secs(secs));
                }
            }
        }
        IrcReply::RPL_ENDOFWHOIS => {
            if let Some(nick) = msg.params.first() {
                state.emit_client_event(ClientEvent::WhoIsReply { nick: nick.clone() });
            }
        }
        IrcReply::RPL_WHOISCHANNELS => handle_whois_channels(state, msg),
        IrcReply::RPL_LISTSTART => state.listed_channels.clear(),
        IrcReply::RPL_LIST => {
            if let (Some(name), Some(count), Some(topic)) =
                (msg.params.get(0), msg.params.get(1), msg.params.get(2))
            {
                state.listed_channels.push(ListedChannel {
                    name: name.clone(),
                    visible_user_count: count.parse().unwrap_or(0),
                    topic: topic.clone(),
                });
            }
        }
        IrcReply::RPL_LISTEND => {
            let channels = std::mem::take(&mut state.listed_channels);
            state.emit_client_event(ClientEvent::ChannelList(channels));
        }
        IrcReply::RPL_CHANNELMODEIS => handle_channelmodeis(state, msg),
        IrcReply::RPL_NOTOPIC => {
            if let Some(chan_name) = msg.params.get(1) {
                state
                    .get_channel_from_name(CiStr::new(chan_name))
                    .borrow_mut()
                    .set_topic(None, None);
            }
        }
        IrcReply::RPL_TOPIC => {
            if let (Some(chan_name), Some(topic)) = (msg.params.get(1), msg.params.get(2)) {
                state
                    .get_channel_from_name(CiStr::new(chan_name))
                    .borrow_mut()
                    .set_topic(None, Some(topic.clone()));
            }
        }
        IrcReply::RPL_INVITING => log::debug!("invite acknowledged: {:?}", msg.params),
        IrcReply::RPL_VERSION => {
            if let Some(version) = msg.params.get(1) {
                state.emit_client_event(ClientEvent::ServerVersion {
                    version: version.clone(),
                    debug_level: msg.params.get(3).cloned(),
                });
            }
        }
        IrcReply::RPL_WHOREPLY => handle_who_reply(state, msg),
        IrcReply::RPL_NAMREPLY => handle_names_reply(state, msg),
        IrcReply::RPL_LINKS | IrcReply::RPL_ENDOFLINKS => {
            log::debug!("{}: {:?}", reply.name(), msg.params)
        }
        IrcReply::RPL_ENDOFNAMES => {
            if let Some(chan_name) = msg.params.get(1) {
                state
                    .get_channel_from_name(CiStr::new(chan_name))
                    .borrow_mut()
                    .events
                    .emit(ChannelEvent::UserList);
            }
        }
        IrcReply::RPL_BANLIST => {
            if let (Some(chan_name), Some(mask)) = (msg.params.get(0), msg.params.get(1)) {
                let entry = BanEntry {
                    mask: mask.clone(),
                    set_by: msg.params.get(2).cloned(),
                    set_at: msg.params.get(3).and_then(|s| s.parse().ok()),
                };
                state
                    .ban_accum
                    .entry(CiString::new(chan_name.clone()))
                    .or_default()
                    .push(entry);
            }
        }
        IrcReply::RPL_ENDOFBANLIST => {
            if let Some(chan_name) = msg.params.first() {
                let entries = state
                    .ban_accum
                    .remove(CiStr::new(chan_name))
                    .unwrap_or_default();
                let chan_ref = state.get_channel_from_name(CiStr::new(chan_name));
                let mut chan = chan_ref.borrow_mut();
                chan.ban_list = entries.clone();
                chan.events.emit(ChannelEvent::BanList(entries));
            }
        }
        IrcReply::RPL_ENDOFWHOWAS => {
            if let Some(nick) = msg.params.first() {
                state.emit_client_event(ClientEvent::WhoWasReply { nick: nick.clone() });
            }
        }
        IrcReply::RPL_MOTD => {
            if let Some(line) = msg.params.get(1) {
                state.motd_buffer.push_str(line);
                state.motd_buffer.push('\n');
            }
        }
        IrcReply::RPL_MOTDSTART => state.motd_buffer.clear(),
        IrcReply::RPL_ENDOFMOTD => {
            let motd = std::mem::take(&mut state.motd_buffer);
            state.emit_client_event(ClientEvent::Motd(motd));
        }
        IrcReply::RPL_YOUREOPER => {
            if let Some(lu) = state.local_user.as_mut() {
                lu.is_operator = true;
            }
        }
        IrcReply::RPL_TIME => {
            if let Some(time) = msg.params.last() {
                state.emit_client_event(ClientEvent::ServerTime(time.clone()));
            }
        }
    }
}

fn record_stat(state: &mut ClientState, kind: StatsKind, msg: &Message) {
    let line = msg.params.last().cloned().unwrap_or_default();
    state.listed_stats_entries.push((kind, line));
}

fn emit_network_info(state: &ClientState) {
    state.emit_client_event(ClientEvent::NetworkInfo(state.network_info.clone()));
}

fn parse_luserclient_visible(msg: &Message) -> Option<u32> {
    let text = msg.params.last()?;
    text.split_whitespace()
        .position(|w| w.eq_ignore_ascii_case("users"))
        .and_then(|idx| text.split_whitespace().nth(idx.checked_sub(1)?))
        .and_then(|n| n.parse().ok())
}

fn parse_luserclient_invisible(msg: &Message) -> Option<u32> {
    let text = msg.params.last()?;
    text.split_whitespace()
        .position(|w| w.eq_ignore_ascii_case("invisible"))
        .and_then(|idx| text.split_whitespace().nth(idx.checked_sub(1)?))
        .and_then(|n| n.parse().ok())
}

/// 001 RPL_WELCOME: registration completes here. The welcome text typically embeds the server's
/// view of our own hostmask ("Welcome to the network Nick!user@host"); pull it out and fill in
/// `local_user` before telling observers registration finished (spec.md section 4.2/4.3).
fn handle_welcome(state: &mut ClientState, msg: Message) {
    if let Some(text) = msg.params.last() {
        if let Some(mask) = text.split_whitespace().find(|w| w.contains('!') && w.contains('@')) {
            if let Some((nick, rest)) = mask.split_once('!') {
                if let Some((user, host)) = rest.split_once('@') {
                    if let Some(lu) = state.local_user.as_mut() {
                        if lu.nick_name.as_str().eq_ignore_ascii_case(nick) {
                            lu.user_name = Some(user.to_owned());
                            lu.host_name = Some(host.to_owned());
                        }
                    }
                }
            }
        }
    }
    state.emit_client_event(ClientEvent::Registered);
}

fn handle_myinfo(state: &mut ClientState, msg: Message) {
    if let (Some(server_name), Some(version)) = (msg.params.get(1), msg.params.get(2)) {
        state.emit_client_event(ClientEvent::ClientInfo {
            server_name: server_name.clone(),
            version: version.clone(),
            user_modes: msg.params.get(3).cloned().unwrap_or_default(),
            channel_modes: msg.params.get(4).cloned().unwrap_or_default(),
        });
    }
}

/// Parse the `PREFIX=(modes)symbols` and `CHANMODES=A,B,C,D` tokens out of an ISUPPORT line
/// (spec.md section 9's Open Question, resolved: tracked for class-aware MODE parsing).
fn handle_isupport(state: &mut ClientState, msg: Message) {
    for token in &msg.params[1..] {
        if let Some(rest) = token.strip_prefix("PREFIX=") {
            if let Some(close) = rest.find(')') {
                let modes: Vec<char> = rest[1..close].chars().collect();
                let symbols: Vec<char> = rest[close + 1..].chars().collect();
                if modes.len() == symbols.len() {
                    state.channel_user_modes = modes.clone();
                    state.channel_user_modes_prefixes = symbols
                        .into_iter()
                        .zip(modes)
                        .map(|(sym, m)| (sym, m))
                        .collect();
                }
            }
        } else if let Some(rest) = token.strip_prefix("CHANMODES=") {
            let mut classes = rest.split(',');
            state.chanmodes_a = classes.next().unwrap_or("").chars().collect();
            state.chanmodes_b = classes.next().unwrap_or("").chars().collect();
            state.chanmodes_c = classes.next().unwrap_or("").chars().collect();
            state.chanmodes_d = classes.next().unwrap_or("").chars().collect();
        }
    }
}

fn handle_whois_user(state: &mut ClientState, msg: Message) {
    if let (Some(nick), Some(user_name), Some(host_name), Some(real_name)) = (
        msg.params.get(0),
        msg.params.get(1),
        msg.params.get(2),
        msg.params.get(4),
    ) {
        let user_ref = state.get_user_from_nick(CiStr::new(nick));
        let mut u = user_ref.borrow_mut();
        u.user_name = Some(user_name.clone());
        u.host_name = Some(host_name.clone());
        u.real_name = Some(real_name.clone());
        u.is_online = true;
    }
}

fn handle_who_reply(state: &mut ClientState, msg: Message) {
    // 352: me channel user host server nick flags :hopcount realname
    if let (Some(user_name), Some(host_name), Some(server_name), Some(nick)) = (
        msg.params.get(1),
        msg.params.get(2),
        msg.params.get(3),
        msg.params.get(4),
    ) {
        let user_ref = state.get_user_from_nick(CiStr::new(nick));
        let mut u = user_ref.borrow_mut();
        u.user_name = Some(user_name.clone());
        u.host_name = Some(host_name.clone());
        u.server_name = Some(server_name.clone());
        if let Some(flags) = msg.params.get(5) {
            u.is_away = flags.contains('G');
            u.is_operator = flags.contains('*');
        }
        if let Some(hop_realname) = msg.params.get(6) {
            if let Some((hops, realname)) = hop_realname.split_once(' ') {
                u.hop_count = hops.parse().ok();
                u.real_name = Some(realname.to_owned());
            }
        }
    }
}

/// 319 RPL_WHOISCHANNELS: `<nick> :[status]#chan1 [status]#chan2 ...`. Merges the WHOIS subject's
/// channel memberships, creating channels/channel-users as needed (spec.md section 4.3), the same
/// way 353 RPL_NAMREPLY merges one channel's membership list.
fn handle_whois_channels(state: &mut ClientState, msg: Message) {
    let (Some(nick), Some(channels)) = (msg.params.get(0), msg.params.get(1)) else {
        return;
    };
    let user_ref = state.get_user_from_nick(CiStr::new(nick));

    for token in channels.split_whitespace() {
        let mut rest = token;
        let mut status_modes = Vec::new();
        while let Some(&sym) = rest.as_bytes().first() {
            let sym = sym as char;
            match state.channel_user_modes_prefixes.get(&sym) {
                Some(&mode) => {
                    status_modes.push(mode);
                    rest = &rest[1..];
                }
                None => break,
            }
        }
        if rest.is_empty() {
            continue;
        }
        let chan_ref = state.get_channel_from_name(CiStr::new(rest));
        chan_ref
            .borrow_mut()
            .user_name_reply(&chan_ref, Rc::clone(&user_ref), &status_modes);
    }
}

/// 353 RPL_NAMREPLY: `<client> <chantype> <channel> :<nick>[ <nick>...]`, each nick optionally
/// prefixed with a PREFIX status symbol (spec.md section 4.3).
fn handle_names_reply(state: &mut ClientState, msg: Message) {
    let (Some(type_flag), Some(chan_name), Some(names)) =
        (msg.params.get(1), msg.params.get(2), msg.params.get(3))
    else {
        return;
    };
    let chan_ref = state.get_channel_from_name(CiStr::new(chan_name));
    match type_flag.as_str() {
        "=" => chan_ref.borrow_mut().set_type(ChannelType::Public),
        "*" => chan_ref.borrow_mut().set_type(ChannelType::Private),
        "@" => chan_ref.borrow_mut().set_type(ChannelType::Secret),
        _ => {}
    }

    for token in names.split_whitespace() {
        let mut status_modes = Vec::new();
        let mut rest = token;
        while let Some(&sym) = rest.as_bytes().first() {
            let sym = sym as char;
            match state.channel_user_modes_prefixes.get(&sym) {
                Some(&mode) => {
                    status_modes.push(mode);
                    rest = &rest[1..];
                }
                None => break,
            }
        }
        if rest.is_empty() {
            continue;
        }
        let user_ref = state.get_user_from_nick(CiStr::new(rest));
        chan_ref
            .borrow_mut()
            .user_name_reply(&chan_ref, user_ref, &status_modes);
    }
}

fn handle_channelmodeis(state: &mut ClientState, msg: Message) {
    let Some(chan_name) = msg.params.first().cloned() else {
        return;
    };
    let (mode_str, params) = split_mode_tail(&msg.params[1..]);
    let changes = fold_modes(mode_str, params, |m, s| takes_param(state, m, s));
    let chan_ref = state.get_channel_from_name(CiStr::new(&chan_name));
    let mut chan = chan_ref.borrow_mut();
    for change in &changes {
        if !is_status_mode(state, change.mode) {
            chan.modes.insert(change.mode);
        }
    }
}

fn handle_protocol_error(state: &mut ClientState, code: u16, msg: Message) {
    let error_name = IrcError::from_u16(code).map(IrcError::name);
    let message = msg.params.last().cloned().unwrap_or_default();
    state.emit_client_event(ClientEvent::ProtocolError(ProtocolError {
        command_code: code,
        error_name,
        parameters: msg.params.clone(),
        message: message.clone(),
    }));
    state.emit_client_event(ClientEvent::Error(message));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientState;
    use crate::model::{IrcLocalUser, IrcUser};
    use tokio::sync::mpsc;

    fn state_with_local_user(nick: &str) -> (ClientState, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel(32);
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let mut state = ClientState::new("irc.example.org".to_owned(), events_tx, outbound_tx);
        state.local_user = Some(IrcLocalUser::new(IrcUser::new(CiString::new(nick))));
        (state, events_rx)
    }

    /// S1 (spec.md section 8): RPL_WELCOME extracts the final nick!user@host hostmask.
    #[test]
    fn welcome_extracts_hostmask_and_emits_registered() {
        let (mut state, mut events) = state_with_local_user("Rincewind");
        let msg = irc_proto::parse(
            ":srv 001 Rincewind :Welcome to the network Rincewind!rw@host",
        )
        .unwrap();
        process(&mut state, msg);

        let lu = state.local_user.as_ref().unwrap();
        assert_eq!(lu.user_name.as_deref(), Some("rw"));
        assert_eq!(lu.host_name.as_deref(), Some("host"));
        assert!(matches!(events.try_recv(), Ok(ClientEvent::Registered)));
    }

    /// S5 (spec.md section 8): a CTCP ACTION never surfaces as a plain message.
    #[test]
    fn ctcp_action_preempts_plain_message_event() {
        let (mut state, _events) = state_with_local_user("Rincewind");
        let chan_ref = state.get_channel_from_name(CiStr::new("#d"));
        let actions = Rc::new(std::cell::RefCell::new(Vec::new()));
        let messages = Rc::new(std::cell::RefCell::new(0));
        let (a, m) = (Rc::clone(&actions), Rc::clone(&messages));
        chan_ref.borrow_mut().events.subscribe(move |e| match e {
            ChannelEvent::Action { text, .. } => a.borrow_mut().push(text.clone()),
            ChannelEvent::Message { .. } => *m.borrow_mut() += 1,
            _ => {}
        });

        let msg = irc_proto::parse(
            ":A!u@h PRIVMSG #d :\u{1}ACTION waves\u{1}",
        )
        .unwrap();
        process(&mut state, msg);

        assert_eq!(*actions.borrow(), vec!["waves".to_owned()]);
        assert_eq!(*messages.borrow(), 0);
    }

    /// A CTCP PING response (arriving as NOTICE) surfaces as a `CtcpPing` client event carrying a
    /// non-negative round-trip time, per spec.md section 4.5.
    #[test]
    fn ctcp_ping_response_surfaces_as_client_event() {
        let (mut state, mut events) = state_with_local_user("Rincewind");
        let request = ctcp_client::build_request("PING");
        let (_tag, data) = irc_proto::ctcp::split_tag(irc_proto::ctcp::strip_delims(&request));
        let notice = format!(
            ":Other!u@h NOTICE Rincewind :{d}PING {data}{d}",
            d = irc_proto::ctcp::TAGGED_DATA_DELIM,
            data = data.unwrap()
        );
        let msg = irc_proto::parse(&notice).unwrap();
        process(&mut state, msg);

        match events.try_recv() {
            Ok(ClientEvent::CtcpPing { rtt_ms, .. }) => assert!(rtt_ms >= 0),
            other => panic!("expected CtcpPing event, got {:?}", other.err()),
        }
    }

    /// S4 (spec.md section 8): PREFIX-mapped MODE changes land on the channel-user, not the
    /// channel's own modes set.
    #[test]
    fn mode_with_prefix_applies_to_channel_user_only() {
        let (mut state, _events) = state_with_local_user("Rincewind");
        state.channel_user_modes = vec!['o', 'v'];
        state.channel_user_modes_prefixes = [('@', 'o'), ('+', 'v')].into_iter().collect();

        let chan_ref = state.get_channel_from_name(CiStr::new("#d"));
        let alice = state.get_user_from_nick(CiStr::new("Alice"));
        let bob = state.get_user_from_nick(CiStr::new("Bob"));
        chan_ref.borrow_mut().user_joined(&chan_ref, alice);
        chan_ref.borrow_mut().user_joined(&chan_ref, bob);

        let msg = irc_proto::parse(":op MODE #d +o-v Alice Bob").unwrap();
        process(&mut state, msg);

        let chan = chan_ref.borrow();
        let cu_alice = chan.find_user(CiStr::new("Alice")).unwrap();
        let cu_bob = chan.find_user(CiStr::new("Bob")).unwrap();
        assert!(cu_alice.borrow().modes.contains(&'o'));
        assert!(!cu_bob.borrow().modes.contains(&'v'));
        assert!(chan.modes.is_empty());
    }

    /// P2 (spec.md section 8): after a QUIT, the user is gone from every channel's roster *and*
    /// from `client.users`.
    #[test]
    fn quit_removes_user_from_channels_and_from_the_users_table() {
        let (mut state, _events) = state_with_local_user("Rincewind");
        let chan_ref = state.get_channel_from_name(CiStr::new("#d"));
        let alice = state.get_user_from_nick(CiStr::new("Alice"));
        chan_ref.borrow_mut().user_joined(&chan_ref, alice);
        assert!(state.users.contains_key(CiStr::new("Alice")));

        let msg = irc_proto::parse(":Alice!u@h QUIT :bye").unwrap();
        process(&mut state, msg);

        assert!(chan_ref.borrow().find_user(CiStr::new("Alice")).is_none());
        assert!(!state.users.contains_key(CiStr::new("Alice")));
    }

    /// Spec.md section 4.3 PART: a local-user PART also removes the channel from the client's
    /// channels table (not just the roster entry).
    #[test]
    fn local_part_removes_channel_from_channels_table() {
        let (mut state, _events) = state_with_local_user("Rincewind");
        let chan_ref = state.get_channel_from_name(CiStr::new("#d"));
        let local = state.get_user_from_nick(CiStr::new("Rincewind"));
        chan_ref.borrow_mut().user_joined(&chan_ref, local);
        assert!(state.channels.contains_key(CiStr::new("#d")));

        let msg = irc_proto::parse(":Rincewind!rw@host PART #d :later").unwrap();
        process(&mut state, msg);

        assert!(!state.channels.contains_key(CiStr::new("#d")));
    }

    /// S3 (spec.md section 8): KICK self removes the channel from `client.channels`.
    #[test]
    fn local_kick_removes_channel_from_channels_table() {
        let (mut state, _events) = state_with_local_user("Rincewind");
        let chan_ref = state.get_channel_from_name(CiStr::new("#d"));
        let local = state.get_user_from_nick(CiStr::new("Rincewind"));
        chan_ref.borrow_mut().user_joined(&chan_ref, local);
        assert!(state.channels.contains_key(CiStr::new("#d")));

        let msg = irc_proto::parse(":op!u@h KICK #d Rincewind :bye").unwrap();
        process(&mut state, msg);

        assert!(!state.channels.contains_key(CiStr::new("#d")));
    }

    /// A KICK of a non-local user leaves the channel interned.
    #[test]
    fn foreign_kick_does_not_remove_the_channel() {
        let (mut state, _events) = state_with_local_user("Rincewind");
        let chan_ref = state.get_channel_from_name(CiStr::new("#d"));
        let local = state.get_user_from_nick(CiStr::new("Rincewind"));
        let alice = state.get_user_from_nick(CiStr::new("Alice"));
        chan_ref.borrow_mut().user_joined(&chan_ref, local);
        chan_ref.borrow_mut().user_joined(&chan_ref, alice);

        let msg = irc_proto::parse(":op!u@h KICK #d Alice :bye").unwrap();
        process(&mut state, msg);

        assert!(state.channels.contains_key(CiStr::new("#d")));
    }

    /// 319 RPL_WHOISCHANNELS merges channel memberships for the WHOIS subject, creating the
    /// channel and channel-user if they don't already exist, with status modes from PREFIX.
    #[test]
    fn whois_channels_merges_membership_with_status_modes() {
        let (mut state, _events) = state_with_local_user("Rincewind");
        state.channel_user_modes_prefixes = [('@', 'o'), ('+', 'v')].into_iter().collect();

        let msg = irc_proto::parse(":srv 319 Rincewind Alice :@#d +#e #f").unwrap();
        process(&mut state, msg);

        assert!(state.channels.contains_key(CiStr::new("#d")));
        assert!(state.channels.contains_key(CiStr::new("#e")));
        assert!(state.channels.contains_key(CiStr::new("#f")));

        let chan_d = state.get_channel_from_name(CiStr::new("#d"));
        let cu = chan_d.borrow().find_user(CiStr::new("Alice")).unwrap().clone();
        assert!(cu.borrow().modes.contains(&'o'));

        let chan_e = state.get_channel_from_name(CiStr::new("#e"));
        let cu = chan_e.borrow().find_user(CiStr::new("Alice")).unwrap().clone();
        assert!(cu.borrow().modes.contains(&'v'));

        let chan_f = state.get_channel_from_name(CiStr::new("#f"));
        assert!(chan_f.borrow().find_user(CiStr::new("Alice")).is_some());
    }

    /// Spec.md section 4.7: MODE targeting a foreign user (neither a channel nor the local nick)
    /// is a protocol violation — emit an error, mutate nothing.
    #[test]
    fn mode_for_foreign_user_emits_error_and_does_not_mutate() {
        let (mut state, mut events) = state_with_local_user("Rincewind");
        let other = state.get_user_from_nick(CiStr::new("Alice"));
        other.borrow_mut().is_operator = false;

        let msg = irc_proto::parse(":op MODE Alice +i").unwrap();
        process(&mut state, msg);

        assert!(!other.borrow().is_operator);
        let mut saw_error = false;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, ClientEvent::Error(_)) {
                saw_error = true;
            }
        }
        assert!(saw_error);
    }
}
