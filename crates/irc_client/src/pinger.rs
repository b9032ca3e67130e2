//! Two-state keep-alive task: sends a PING after 60 seconds of silence, and signals the
//! connection dead if no traffic (in particular no PONG) arrives within another 60 seconds.
//! Structure and timings carried over from the reference client's own pinger task.

use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::timeout;
use futures_util::StreamExt;
use tokio_stream::wrappers::ReceiverStream;

const PING_TIMEOUT: Duration = Duration::from_secs(60);

pub(crate) struct Pinger {
    snd_rst: mpsc::Sender<()>,
}

#[derive(Debug)]
pub(crate) enum PingerEvent {
    SendPing,
    Disconnect,
}

enum PingerState {
    /// Signal `SendPing` on timeout, then move to `ExpectPong`.
    SendPing,
    /// Signal `Disconnect` on timeout: 60 more seconds passed with no reply.
    ExpectPong,
}

async fn pinger_task(rcv_rst: mpsc::Receiver<()>, snd_ev: mpsc::Sender<PingerEvent>) {
    let mut rcv_rst = ReceiverStream::new(rcv_rst).fuse();
    let mut state = PingerState::SendPing;
    loop {
        match timeout(PING_TIMEOUT, rcv_rst.next()).await {
            Err(_) => match state {
                PingerState::SendPing => {
                    state = PingerState::ExpectPong;
                    if snd_ev.try_send(PingerEvent::SendPing).is_err() {
                        return;
                    }
                }
                PingerState::ExpectPong => {
                    let _ = snd_ev.try_send(PingerEvent::Disconnect);
                    return;
                }
            },
            Ok(None) => return,
            Ok(Some(())) => {
                state = PingerState::SendPing;
            }
        }
    }
}

impl Pinger {
    pub(crate) fn new() -> (Pinger, mpsc::Receiver<PingerEvent>) {
        let (snd_ev, rcv_ev) = mpsc::channel(1);
        let (snd_rst, rcv_rst) = mpsc::channel(1);
        tokio::task::spawn_local(pinger_task(rcv_rst, snd_ev));
        (Pinger { snd_rst }, rcv_ev)
    }

    /// Reset the idle timer: any traffic from the server (not just PONG) counts as liveness.
    pub(crate) fn reset(&mut self) {
        let _ = self.snd_rst.try_send(());
    }
}
