//! A single-connection, asynchronous IRC client engine implementing the client side of RFC
//! 1459/2812: line framing (via [`irc_proto`]), numeric/textual command dispatch, an in-memory
//! entity graph (servers, users, channels, channel memberships), flood-safe sending, keep-alive
//! pinging, and CTCP.
//!
//! Entry point: [`IrcClient::connect`]. Must run inside a `tokio::task::LocalSet` — the
//! connection task and every entity it owns use `Rc<RefCell<_>>`, not `Arc<Mutex<_>>`, since
//! spec.md section 5 models exactly one task driving exactly one connection.

mod client;
mod ctcp_client;
mod error;
mod events;
mod flood;
mod model;
mod pinger;
mod processor;

pub use client::{IrcClient, Registration};
pub use error::IrcClientError;
pub use events::{
    BanEntry, ChannelEvent, ClientEvent, EventSource, ListedChannel, LocalUserEvent,
    MessageTarget, NetworkInfo, ProtocolError, StatsKind, UserEvent,
};
pub use flood::{FloodPreventer, FloodPreventerConfig};
pub use model::{
    ChannelRef, ChannelType, ChannelUserRef, IrcChannel, IrcChannelUser, IrcLocalUser, IrcServer,
    IrcUser, ServerRef, UserRef,
};

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    /// End-to-end smoke test for scenario S1 (spec.md section 8): parse a JOIN line, fold it
    /// through the processor, and observe the channel roster without a real socket.
    #[test]
    fn join_line_populates_roster_via_processor() {
        use tokio::sync::mpsc;

        let (events_tx, _events_rx) = mpsc::channel(8);
        let (outbound_tx, _outbound_rx) = mpsc::unbounded_channel();
        let mut state = client::ClientState::new("irc.example.org".to_owned(), events_tx, outbound_tx);

        let joined = Rc::new(RefCell::new(0u32));
        let joined2 = Rc::clone(&joined);

        let chan_ref = state.get_channel_from_name(irc_proto::CiStr::new("#discworld"));
        chan_ref.borrow_mut().events.subscribe(move |e| {
            if let ChannelEvent::UserJoinedChannel { .. } = e {
                *joined2.borrow_mut() += 1;
            }
        });

        let msg = irc_proto::parse(":Rincewind!rw@unseen.edu JOIN #discworld").unwrap();
        processor::process(&mut state, msg);

        assert_eq!(*joined.borrow(), 1);
        assert_eq!(chan_ref.borrow().users.len(), 1);
    }
}
