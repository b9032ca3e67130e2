//! `IrcClient`: transport, registration, entity interning, and the outbound send pipeline
//! (spec.md section 4.2). Structured after the reference client's `connect`/main-loop split:
//! a cheap, cloneable handle (`IrcClient`) holds channels into a single task that owns the
//! socket and the entity tables, exactly the single-threaded cooperative model spec.md section 5
//! requires.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

use irc_proto::{CiStr, CiString, Message, Source};

use crate::error::IrcClientError;
use crate::events::{BanEntry, ClientEvent, EventSource, ListedChannel, NetworkInfo, StatsKind};
use crate::flood::{FloodPreventer, FloodPreventerConfig};
use crate::model::{ChannelRef, IrcChannel, IrcLocalUser, IrcUser, ServerRef, UserRef};
use crate::pinger::{Pinger, PingerEvent};
use crate::processor;

/// Fields the caller supplies to [`IrcClient::connect`] (spec.md section 6's "registration
/// record").
#[derive(Debug, Clone)]
pub struct Registration {
    pub nick_name: String,
    pub user_name: String,
    pub real_name: String,
    pub password: Option<String>,
    /// Subset of `{'w', 'i'}`, folded into the numeric USER mode per spec.md section 4.2.
    pub user_modes: Vec<char>,
}

/// Maps `reg.user_modes` to the numeric USER command mode mask: 'w' -> 0x02, 'i' -> 0x04,
/// combined by OR (spec.md section 4.2).
fn numeric_user_mode(modes: &[char]) -> u32 {
    modes.iter().fold(0u32, |acc, m| {
        acc | match m {
            'w' => 0x02,
            'i' => 0x04,
            _ => 0,
        }
    })
}

/// All mutable connection state: the three interning tables, the local user, PREFIX/CHANMODES
/// bookkeeping, and the accumulators for multi-line replies (STATS, LUSER, LIST, MOTD, BANLIST).
/// Owned by the single task that drives the connection; `IrcClient`'s public methods only ever
/// touch it through `Rc<RefCell<_>>`, never across an await point that could observe a torn state
/// (spec.md section 5's ordering guarantees).
pub(crate) struct ClientState {
    pub(crate) users: HashMap<CiString, UserRef>,
    pub(crate) channels: HashMap<CiString, ChannelRef>,
    pub(crate) servers: HashMap<String, ServerRef>,
    pub(crate) local_user: Option<IrcLocalUser>,

    /// Status mode characters in PREFIX order, e.g. `['o', 'v']`.
    pub(crate) channel_user_modes: Vec<char>,
    /// PREFIX symbol -> mode character, e.g. `{'@': 'o', '+': 'v'}` (invariant I6).
    pub(crate) channel_user_modes_prefixes: HashMap<char, char>,

    /// ISUPPORT CHANMODES classes A-D (spec.md section 9's Open Question, resolved in
    /// SPEC_FULL.md section F.2: class-aware parameter consumption).
    pub(crate) chanmodes_a: HashSet<char>,
    pub(crate) chanmodes_b: HashSet<char>,
    pub(crate) chanmodes_c: HashSet<char>,
    pub(crate) chanmodes_d: HashSet<char>,

    pub(crate) listed_stats_entries: Vec<(StatsKind, String)>,
    pub(crate) network_info: NetworkInfo,
    pub(crate) listed_channels: Vec<ListedChannel>,
    pub(crate) motd_buffer: String,
    pub(crate) ban_accum: HashMap<CiString, Vec<BanEntry>>,

    /// The host the socket is connected to, used as the PING target (spec.md section 4.6's
    /// keep-alive); simpler than waiting on 002 RPL_YOURHOST to learn a servername.
    pub(crate) connect_host: String,

    pub(crate) events: mpsc::Sender<ClientEvent>,
    pub(crate) outbound: mpsc::UnboundedSender<String>,
}

impl ClientState {
    pub(crate) fn new(
        connect_host: String,
        events: mpsc::Sender<ClientEvent>,
        outbound: mpsc::UnboundedSender<String>,
    ) -> Self {
        ClientState {
            users: HashMap::new(),
            channels: HashMap::new(),
            servers: HashMap::new(),
            local_user: None,
            // RFC 2812 baseline; overridden once ISUPPORT PREFIX arrives.
            channel_user_modes: vec!['o', 'v'],
            channel_user_modes_prefixes: HashMap::from([('@', 'o'), ('+', 'v')]),
            chanmodes_a: HashSet::from(['b']),
            chanmodes_b: HashSet::from(['k']),
            chanmodes_c: HashSet::from(['l']),
            chanmodes_d: HashSet::from(['i', 'm', 'n', 'p', 's', 't', 'r']),
            listed_stats_entries: Vec::new(),
            network_info: NetworkInfo::default(),
            listed_channels: Vec::new(),
            motd_buffer: String::new(),
            ban_accum: HashMap::new(),
            connect_host,
            events,
            outbound,
        }
    }

    /// `get_server_from_host` (spec.md section 4.2): create-or-return, keyed case-sensitively.
    pub(crate) fn get_server_from_host(&mut self, host: &str) -> ServerRef {
        if let Some(existing) = self.servers.get(host) {
            return Rc::clone(existing);
        }
        let server = Rc::new(RefCell::new(crate::model::IrcServer::new(host.to_owned())));
        self.servers.insert(host.to_owned(), Rc::clone(&server));
        server
    }

    /// `get_channel_from_name` (spec.md section 4.2): create-or-return, keyed case-insensitively.
    pub(crate) fn get_channel_from_name(&mut self, name: &CiStr) -> ChannelRef {
        if let Some(existing) = self.channels.get(name) {
            return Rc::clone(existing);
        }
        let channel = Rc::new(RefCell::new(IrcChannel::new(name.to_owned())));
        self.channels.insert(name.to_owned(), Rc::clone(&channel));
        channel
    }

    /// `get_user_from_nick` (spec.md section 4.2): create-or-return, keyed case-insensitively.
    pub(crate) fn get_user_from_nick(&mut self, nick: &CiStr) -> UserRef {
        if let Some(existing) = self.users.get(nick) {
            return Rc::clone(existing);
        }
        let user = Rc::new(RefCell::new(IrcUser::new(nick.to_owned())));
        self.users.insert(nick.to_owned(), Rc::clone(&user));
        user
    }

    /// Resolve a wire [`Source`] into an [`EventSource`], interning and refreshing `user_name`/
    /// `host_name` along the way (spec.md section 4.1's source resolution, used by every handler
    /// in `processor`).
    pub(crate) fn resolve_event_source(&mut self, source: &Source) -> EventSource {
        match source {
            Source::Server(host) => EventSource::Server(self.get_server_from_host(host)),
            Source::User { nick, user, host } => {
                let user_ref = self.get_user_from_nick(CiStr::new(nick));
                {
                    let mut u = user_ref.borrow_mut();
                    if let Some(user_name) = user {
                        u.user_name = Some(user_name.clone());
                    }
                    if let Some(host_name) = host {
                        u.host_name = Some(host_name.clone());
                    }
                }
                EventSource::User(user_ref)
            }
        }
    }

    pub(crate) fn is_local_nick(&self, nick: &CiStr) -> bool {
        self.local_user
            .as_ref()
            .map(|lu| lu.nick_name.as_ref() == nick)
            .unwrap_or(false)
    }

    /// Enqueue a line built from a command and parameter list (spec.md section 4.1's
    /// formatting rule: trailing parameter is always colon-prefixed).
    pub(crate) fn send_command(&self, command: &str, params: Vec<String>) {
        let msg = Message::new(None::<String>, command, params)
            .expect("internally constructed commands are always well-formed");
        let _ = self.outbound.send(msg.to_string());
    }

    pub(crate) fn emit_client_event(&self, event: ClientEvent) {
        // A full event-channel buffer or a dropped receiver both just mean nobody's listening
        // right now; neither is a reason to stall the connection task.
        if let Err(e) = self.events.try_send(event) {
            log::debug!("dropped client event, channel unavailable: {}", e);
        }
    }
}

/// A running, single connection to an IRC server. Cheap to clone; all clones share the same
/// underlying state and send queue.
#[derive(Clone)]
pub struct IrcClient {
    state: Rc<RefCell<ClientState>>,
    disconnect: mpsc::Sender<()>,
}

impl IrcClient {
    /// Open a connection and start the registration flow (spec.md section 4.2). Returns
    /// immediately; connection lifecycle and server messages are reported on the returned
    /// channel. Must be called from within a `tokio::task::LocalSet` (the connection task uses
    /// `Rc<RefCell<_>>` state, per spec.md section 5's single-threaded cooperative model).
    pub fn connect(
        host: String,
        port: u16,
        reg: Registration,
    ) -> (IrcClient, mpsc::Receiver<ClientEvent>) {
        let (events_tx, events_rx) = mpsc::channel(256);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (disconnect_tx, disconnect_rx) = mpsc::channel(1);

        let state = Rc::new(RefCell::new(ClientState::new(
            host.clone(),
            events_tx,
            outbound_tx.clone(),
        )));

        let client = IrcClient {
            state: Rc::clone(&state),
            disconnect: disconnect_tx,
        };

        tokio::task::spawn_local(run_connection(
            host,
            port,
            reg,
            state,
            outbound_tx,
            outbound_rx,
            disconnect_rx,
        ));

        (client, events_rx)
    }

    /// Hard, immediate transport close: queued outbound messages are discarded, observer
    /// registrations are severed by dropping the entity tables (spec.md section 5's cancellation
    /// semantics). Unlike `quit`, does not wait for the server.
    pub fn disconnect(&self) {
        let _ = self.disconnect.try_send(());
    }

    pub fn get_nick(&self) -> Option<String> {
        self.state
            .borrow()
            .local_user
            .as_ref()
            .map(|lu| lu.nick_name.as_str().to_owned())
    }

    pub fn is_connected(&self) -> bool {
        self.state.borrow().local_user.is_some()
    }

    fn send(&self, command: &str, params: Vec<String>) {
        self.state.borrow().send_command(command, params);
    }

    pub fn list_channels(&self, names: Option<Vec<String>>) {
        match names {
            Some(names) => self.send("LIST", vec![names.join(",")]),
            None => self.send("LIST", vec![]),
        }
    }

    pub fn get_motd(&self) {
        self.send("MOTD", vec![]);
    }

    pub fn get_network_info(&self) {
        self.send("LUSERS", vec![]);
    }

    pub fn get_server_version(&self) {
        self.send("VERSION", vec![]);
    }

    pub fn get_server_stats(&self, query: Option<&str>) {
        match query {
            Some(q) => self.send("STATS", vec![q.to_owned()]),
            None => self.send("STATS", vec![]),
        }
    }

    pub fn get_server_links(&self) {
        self.send("LINKS", vec![]);
    }

    pub fn get_server_time(&self) {
        self.send("TIME", vec![]);
    }

    pub fn ping(&self, server: Option<&str>) {
        let target = server
            .map(str::to_owned)
            .unwrap_or_else(|| self.state.borrow().connect_host.clone());
        self.send("PING", vec![target]);
    }

    pub fn query_who(&self, mask: &str) {
        self.send("WHO", vec![mask.to_owned()]);
    }

    pub fn query_who_is(&self, nick: &str) {
        self.send("WHOIS", vec![nick.to_owned()]);
    }

    pub fn query_who_was(&self, nick: &str) {
        self.send("WHOWAS", vec![nick.to_owned()]);
    }

    pub fn join_channel(&self, name: &str) -> Result<(), IrcClientError> {
        if name.is_empty() {
            return Err(IrcClientError::ArgumentNull("name"));
        }
        self.send("JOIN", vec![name.to_owned()]);
        Ok(())
    }

    pub fn leave_channel(&self, name: &str, comment: Option<&str>) -> Result<(), IrcClientError> {
        if name.is_empty() {
            return Err(IrcClientError::ArgumentNull("name"));
        }
        let mut params = vec![name.to_owned()];
        if let Some(c) = comment {
            params.push(c.to_owned());
        }
        self.send("PART", params);
        Ok(())
    }

    pub fn set_nick(&self, nick: &str) -> Result<(), IrcClientError> {
        if nick.is_empty() {
            return Err(IrcClientError::ArgumentNull("nick"));
        }
        self.send("NICK", vec![nick.to_owned()]);
        Ok(())
    }

    pub fn set_topic(&self, channel: &str, topic: &str) {
        self.send("TOPIC", vec![channel.to_owned(), topic.to_owned()]);
    }

    pub fn kick(
        &self,
        channel: &str,
        nicks: &[&str],
        reason: Option<&str>,
    ) -> Result<(), IrcClientError> {
        if nicks.is_empty() {
            return Err(IrcClientError::ArgumentNull("nicks"));
        }
        let mut params = vec![channel.to_owned(), nicks.join(",")];
        if let Some(r) = reason {
            params.push(r.to_owned());
        }
        self.send("KICK", params);
        Ok(())
    }

    pub fn invite(&self, channel: &str, nick: &str) {
        self.send("INVITE", vec![nick.to_owned(), channel.to_owned()]);
    }

    pub fn get_channel_modes(&self, channel: &str) {
        self.send("MODE", vec![channel.to_owned()]);
    }

    pub fn set_channel_modes(&self, channel: &str, mode_str: &str, params: &[&str]) {
        let mut args = vec![channel.to_owned(), mode_str.to_owned()];
        args.extend(params.iter().map(|s| s.to_string()));
        self.send("MODE", args);
    }

    /// Maximum byte length of one outbound line, RFC 1459/2812 and SPEC_FULL.md section E.
    pub const MAX_LINE_LEN: usize = 512;

    /// Split `text` into chunks that will fit in one PRIVMSG/NOTICE line after the server
    /// re-adds the sender's hostmask. Never called automatically; callers decide whether to
    /// split (SPEC_FULL.md section E).
    pub fn split_message<'a>(&self, target: &str, text: &'a str) -> Vec<&'a str> {
        let overhead = 1 // ':'
            + self.get_nick().map(|n| n.len()).unwrap_or(9)
            + 1 // '!'
            + 9 // max username
            + 1 // '@'
            + 64 // max hostname
            + " PRIVMSG ".len()
            + target.len()
            + " :".len()
            + 2; // CRLF
        let max = Self::MAX_LINE_LEN.saturating_sub(overhead).max(1);
        split_into_chunks(text, max)
    }

    pub fn send_message(&self, targets: &[&str], text: &str) {
        self.send("PRIVMSG", vec![targets.join(","), text.to_owned()]);
    }

    pub fn send_notice(&self, targets: &[&str], text: &str) {
        self.send("NOTICE", vec![targets.join(","), text.to_owned()]);
    }

    /// Send a CTCP ACTION ("/me ...") to one or more targets (spec.md section 4.5). Requests go
    /// out over PRIVMSG, per the wire-level send rule.
    pub fn ctcp_action(&self, targets: &[&str], text: &str) {
        let payload = format!(
            "{delim}ACTION {text}{delim}",
            delim = irc_proto::ctcp::TAGGED_DATA_DELIM
        );
        self.send("PRIVMSG", vec![targets.join(","), payload]);
    }

    fn send_ctcp_request(&self, nick: &str, tag: &str) {
        let payload = crate::ctcp_client::build_request(tag);
        self.send("PRIVMSG", vec![nick.to_owned(), payload]);
    }

    pub fn ctcp_version(&self, nick: &str) {
        self.send_ctcp_request(nick, "VERSION");
    }

    pub fn ctcp_ping(&self, nick: &str) {
        self.send_ctcp_request(nick, "PING");
    }

    pub fn ctcp_time(&self, nick: &str) {
        self.send_ctcp_request(nick, "TIME");
    }

    pub fn ctcp_finger(&self, nick: &str) {
        self.send_ctcp_request(nick, "FINGER");
    }

    pub fn ctcp_client_info(&self, nick: &str) {
        self.send_ctcp_request(nick, "CLIENTINFO");
    }

    pub fn quit(&self, comment: Option<&str>) {
        match comment {
            Some(c) => self.send("QUIT", vec![c.to_owned()]),
            None => self.send("QUIT", vec![]),
        }
    }

    pub fn send_raw(&self, line: &str) {
        let _ = self.state.borrow().outbound.send(line.to_owned());
    }
}

fn split_into_chunks(text: &str, max: usize) -> Vec<&str> {
    if text.is_empty() {
        return vec![text];
    }
    let bytes = text.as_bytes();
    let mut chunks = Vec::new();
    let mut start = 0;
    while start < bytes.len() {
        let end = (start + max).min(bytes.len());
        // Don't split a UTF-8 codepoint in half.
        let mut end = end;
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        chunks.push(&text[start..end]);
        start = end;
    }
    chunks
}

async fn run_connection(
    host: String,
    port: u16,
    reg: Registration,
    state: Rc<RefCell<ClientState>>,
    outbound_tx: mpsc::UnboundedSender<String>,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    mut disconnect_rx: mpsc::Receiver<()>,
) {
    state.borrow().emit_client_event(ClientEvent::Connecting);

    let stream = match TcpStream::connect((host.as_str(), port)).await {
        Ok(stream) => stream,
        Err(io_err) => {
            state
                .borrow()
                .emit_client_event(ClientEvent::ConnectionError(io_err.to_string()));
            state
                .borrow()
                .emit_client_event(ClientEvent::ConnectionClosed { had_error: true });
            return;
        }
    };

    let (mut read_half, mut write_half) = stream.into_split();

    {
        let mut st = state.borrow_mut();
        if let Some(pass) = &reg.password {
            st.send_command("PASS", vec![pass.clone()]);
        }
        st.send_command("NICK", vec![reg.nick_name.clone()]);
        st.send_command(
            "USER",
            vec![
                reg.user_name.clone(),
                numeric_user_mode(&reg.user_modes).to_string(),
                "*".to_owned(),
                reg.real_name.clone(),
            ],
        );

        let mut local_user = IrcLocalUser::new(IrcUser::new(CiString::new(reg.nick_name.clone())));
        local_user.user.user_name = Some(reg.user_name.clone());
        local_user.user.real_name = Some(reg.real_name.clone());
        st.local_user = Some(local_user);
        st.emit_client_event(ClientEvent::Connected);
    }

    let (mut pinger, rcv_ping_evs) = Pinger::new();
    let mut rcv_ping_evs = ReceiverStream::new(rcv_ping_evs).fuse();

    let mut flood = FloodPreventer::new(FloodPreventerConfig::default());
    let mut read_buf = [0u8; 4096];
    let mut acc = String::new();

    loop {
        let tick = flood.send_delay().max(Duration::from_millis(50));

        tokio::select! {
            _ = disconnect_rx.recv() => {
                state.borrow_mut().local_user = None;
                state.borrow().emit_client_event(ClientEvent::ConnectionClosed { had_error: false });
                return;
            }

            _ = tokio::time::sleep(tick) => {
                if flood.send_delay() == Duration::ZERO {
                    if let Ok(line) = outbound_rx.try_recv() {
                        let mut full = line;
                        full.push_str("\r\n");
                        if let Err(io_err) = write_half.write_all(full.as_bytes()).await {
                            state.borrow_mut().local_user = None;
                            state.borrow().emit_client_event(ClientEvent::ConnectionError(io_err.to_string()));
                            state.borrow().emit_client_event(ClientEvent::ConnectionClosed { had_error: true });
                            return;
                        }
                        flood.message_sent();
                    }
                }
            }

            bytes = read_half.read(&mut read_buf) => {
                match bytes {
                    Ok(0) => {
                        state.borrow_mut().local_user = None;
                        state.borrow().emit_client_event(ClientEvent::ConnectionClosed { had_error: false });
                        return;
                    }
                    Ok(n) => {
                        pinger.reset();
                        acc.push_str(&String::from_utf8_lossy(&read_buf[..n]));
                        while let Some(pos) = acc.find("\r\n") {
                            let line: String = acc.drain(..pos + 2).collect();
                            let line = line.trim_end_matches("\r\n");
                            if line.is_empty() {
                                continue;
                            }
                            match irc_proto::parse(line) {
                                Ok(msg) => processor::process(&mut state.borrow_mut(), msg),
                                Err(err) => log::warn!("malformed line {:?}: {}", line, err),
                            }
                        }
                    }
                    Err(io_err) => {
                        state.borrow_mut().local_user = None;
                        state.borrow().emit_client_event(ClientEvent::ConnectionError(io_err.to_string()));
                        state.borrow().emit_client_event(ClientEvent::ConnectionClosed { had_error: true });
                        return;
                    }
                }
            }

            ping_ev = rcv_ping_evs.next() => {
                match ping_ev {
                    Some(PingerEvent::SendPing) => {
                        let target = state.borrow().connect_host.clone();
                        let _ = outbound_tx.send(
                            Message::new(None::<String>, "PING", vec![target]).unwrap().to_string(),
                        );
                    }
                    Some(PingerEvent::Disconnect) => {
                        state.borrow_mut().local_user = None;
                        state.borrow().emit_client_event(ClientEvent::ConnectionClosed { had_error: true });
                        return;
                    }
                    None => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_user_mode_combines_flags() {
        assert_eq!(numeric_user_mode(&[]), 0);
        assert_eq!(numeric_user_mode(&['w']), 0x02);
        assert_eq!(numeric_user_mode(&['i']), 0x04);
        assert_eq!(numeric_user_mode(&['w', 'i']), 0x06);
    }

    #[test]
    fn split_into_chunks_respects_max_len_and_char_boundaries() {
        let text = "hello world, this is a test";
        let chunks = split_into_chunks(text, 10);
        assert!(chunks.iter().all(|c| c.len() <= 10));
        assert_eq!(chunks.concat(), text);
    }

    #[test]
    fn interning_is_idempotent_and_case_insensitive() {
        let (tx, _rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::unbounded_channel();
        let mut state = ClientState::new("irc.example.org".to_owned(), tx, out_tx);
        let u1 = state.get_user_from_nick(CiStr::new("Rincewind"));
        let u2 = state.get_user_from_nick(CiStr::new("rincewind"));
        assert!(Rc::ptr_eq(&u1, &u2));
        assert_eq!(state.users.len(), 1);
    }
}
