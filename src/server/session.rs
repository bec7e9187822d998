// SPDX-License-Identifier: AGPL-3.0-or-later
// Copyright (C) 2012-2025 Andrei Maltsev

use std::{collections::BTreeSet, sync::Arc, time::Duration};

use anyhow::Result;
use bytes::Bytes;
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf},
    sync::mpsc,
    time::Instant,
};
use tokio_stream::StreamExt;
use tokio_util::{
    codec::{FramedRead, LinesCodec},
    sync::CancellationToken,
};
use tracing::{debug, warn};

use crate::{
    cfg::config::SessionLimits,
    proto::{
        command::{Command, DEFAULT_P2P_MAX_CONNECTIONS},
        header::{DEFAULT_TIMEOUT_MS, HeaderEvent, HeaderParser},
        xeid::XeidMatcher,
    },
    server::{
        handle::{SessionHandle, SessionMsg},
        registry::ServerHandle,
    },
};

/// How long a closing session may spend flushing its write queue.
const FLUSH_GRACE: Duration = Duration::from_secs(5);

/// One positive or negative subscription.
struct Subscription {
    id: u64,
    matcher: XeidMatcher,
    minperiod: Option<Duration>,
    last_delivery: Option<Instant>,
}

impl Subscription {
    /// Whether the rate limit permits a delivery at `now`.
    fn ready(&self, now: Instant) -> bool {
        match (self.minperiod, self.last_delivery) {
            (Some(period), Some(last)) => now.duration_since(last) >= period,
            _ => true,
        }
    }
}

/// Peer-to-peer bookkeeping. Channel plumbing is not wired up; the session
/// only tracks what the commands declare.
struct P2pState {
    accepting: bool,
    max_connections: u64,
    channels: BTreeSet<u64>,
}

impl Default for P2pState {
    fn default() -> Self {
        Self {
            accepting: false,
            max_connections: DEFAULT_P2P_MAX_CONNECTIONS,
            channels: BTreeSet::new(),
        }
    }
}

/// Per-session state once the header round-trip is over.
struct ActiveState {
    handle: Arc<SessionHandle>,
    name: String,
    dtype: String,
    subs: Vec<Subscription>,
    negsubs: Vec<Subscription>,
    next_sub_id: u64,
    next_negsub_id: u64,
    paused: bool,
    p2p: P2pState,
}

/// Spawns the actor task pair (reader + writer) for one accepted stream.
pub fn spawn<S>(stream: S, server: ServerHandle, limits: SessionLimits)
where S: AsyncRead + AsyncWrite + Send + 'static {
    tokio::spawn(async move {
        if let Err(e) = run(stream, server, limits).await {
            debug!("session ended: {e:#}");
        }
    });
}

async fn run<S>(stream: S, server: ServerHandle, limits: SessionLimits) -> Result<()>
where S: AsyncRead + AsyncWrite + Send + 'static {
    let (r, w) = tokio::io::split(stream);
    let mut frames =
        FramedRead::new(r, LinesCodec::new_with_max_length(limits.max_line_len));

    // a server stop cancels every session, registered or not
    let cancel = server.shutdown_token().child_token();
    let (write_tx, write_rx) = mpsc::channel::<Bytes>(limits.write_queue_depth);
    let mut writer = tokio::spawn(write_loop(w, write_rx, cancel.clone()));

    let result = drive(&mut frames, &write_tx, &server, &cancel, &limits).await;

    // closing the queue lets the writer flush queued replies before the
    // stream goes away; the token bounds how long that may take
    drop(write_tx);
    if tokio::time::timeout(FLUSH_GRACE, &mut writer).await.is_err() {
        cancel.cancel();
        let _ = writer.await;
    }
    result
}

/// FIFO drain of the write queue: at most one write is in flight, and a
/// failed write tears the session down.
async fn write_loop<S>(
    mut w: WriteHalf<S>,
    mut rx: mpsc::Receiver<Bytes>,
    cancel: CancellationToken,
) where
    S: AsyncRead + AsyncWrite + Send,
{
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            buf = rx.recv() => match buf {
                Some(buf) => {
                    if let Err(e) = w.write_all(&buf).await {
                        debug!("write failed: {e}");
                        cancel.cancel();
                        break;
                    }
                },
                None => break,
            },
        }
    }
    let _ = w.shutdown().await;
}

type Frames<S> = FramedRead<ReadHalf<S>, LinesCodec>;

async fn drive<S>(
    frames: &mut Frames<S>,
    write_tx: &mpsc::Sender<Bytes>,
    server: &ServerHandle,
    cancel: &CancellationToken,
    limits: &SessionLimits,
) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Send,
{
    // ---- newborn: read the header block ----
    let mut parser = HeaderParser::new();
    let header_idle = Some(Duration::from_millis(DEFAULT_TIMEOUT_MS));
    loop {
        let Some(line) = next_line(frames, cancel, header_idle).await else {
            return Ok(());
        };
        if parser.feed_line(&line) == HeaderEvent::Done {
            break;
        }
    }

    if let Some(err) = parser.error() {
        send_line(write_tx, &format!("ERROR {err}")).await;
        return Ok(());
    }
    if let Some(field) = parser.missing_required() {
        send_line(write_tx, &format!("ERROR argument not initialized : {field}"))
            .await;
        return Ok(());
    }

    let fields = parser.into_fields();
    let idle = fields.idle_timeout();

    // ---- registration round-trip; reads stay parked until it resolves ----
    let (mb_tx, mut mailbox) = mpsc::channel::<SessionMsg>(limits.mailbox_depth);
    let handle = SessionHandle::new(fields, mb_tx, cancel.clone());
    let assigned = match server.register(handle.clone()).await {
        None => return Ok(()), // server is gone; die silently
        Some(Err(refusal)) => {
            send_line(write_tx, &format!("ERROR {refusal}")).await;
            return Ok(());
        },
        Some(Ok(name)) => name,
    };
    send_line(write_tx, &format!("OK {assigned}")).await;

    // ---- active: commands and deliveries ----
    let mut st = ActiveState {
        name: assigned,
        dtype: handle.header().dtype.clone(),
        handle,
        subs: Vec::new(),
        negsubs: Vec::new(),
        next_sub_id: 1,
        next_negsub_id: 1,
        paused: false,
        p2p: P2pState::default(),
    };

    let mut deadline = idle.map(|d| Instant::now() + d);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = idle_wait(deadline) => {
                debug!(name = %st.name, "idle timeout");
                return Ok(());
            },
            msg = mailbox.recv() => {
                if let Some(msg) = msg {
                    st.on_message(msg, write_tx, cancel);
                }
            },
            line = frames.next() => {
                let Some(Ok(line)) = line else {
                    // EOF, oversized line or transport error
                    return Ok(());
                };
                deadline = idle.map(|d| Instant::now() + d);
                st.on_line(&line, write_tx, server).await;
            },
        }
    }
}

impl ActiveState {
    async fn on_line(
        &mut self,
        line: &str,
        write_tx: &mpsc::Sender<Bytes>,
        server: &ServerHandle,
    ) {
        let cmd = match Command::parse(line) {
            Ok(cmd) => cmd,
            Err(e) => {
                send_line(write_tx, &format!("ERROR {e}")).await;
                return;
            },
        };
        match cmd {
            Command::Empty => {},
            Command::Trig { xeids } => {
                if !xeids.is_empty() {
                    server.dispatch(self.handle.clone(), xeids).await;
                }
            },
            Command::Sub { xeids, minperiod } => {
                for matcher in xeids {
                    self.subs.push(Subscription {
                        id: self.next_sub_id,
                        matcher,
                        minperiod: minperiod.map(Duration::from_millis),
                        last_delivery: None,
                    });
                    self.next_sub_id += 1;
                }
            },
            Command::Unsub { ids, all } => {
                if all {
                    self.subs.clear();
                } else {
                    // unknown IDs are silently ignored
                    self.subs.retain(|s| !ids.contains(&s.id));
                }
            },
            Command::Negsub { xeids } => {
                for matcher in xeids {
                    self.negsubs.push(Subscription {
                        id: self.next_negsub_id,
                        matcher,
                        minperiod: None,
                        last_delivery: None,
                    });
                    self.next_negsub_id += 1;
                }
            },
            Command::Unnegsub { ids, all } => {
                if all {
                    self.negsubs.clear();
                } else {
                    self.negsubs.retain(|s| !ids.contains(&s.id));
                }
            },
            Command::Pause => self.paused = true,
            Command::Continue => self.paused = false,
            Command::P2pAccept { max_connections } => {
                self.p2p.accepting = true;
                self.p2p.max_connections = max_connections;
                debug!(
                    name = %self.name,
                    max_connections = self.p2p.max_connections,
                    "accepting p2p channels"
                );
            },
            Command::P2pStopAccept => {
                self.p2p.accepting = false;
            },
            Command::P2pDisconnect { ids, all } => {
                if all {
                    self.p2p.channels.clear();
                } else {
                    for id in ids {
                        self.p2p.channels.remove(&id);
                    }
                }
            },
            Command::P2pSend { .. } => {
                // no channels are ever established, so there is nothing to
                // forward yet
                debug!(
                    name = %self.name,
                    accepting = self.p2p.accepting,
                    channels = self.p2p.channels.len(),
                    "p2p-send with no open channels"
                );
            },
        }
    }

    fn on_message(
        &mut self,
        msg: SessionMsg,
        write_tx: &mpsc::Sender<Bytes>,
        cancel: &CancellationToken,
    ) {
        match msg {
            SessionMsg::Trigger {
                publisher_name,
                publisher_type,
                xeid,
            } => self.on_trigger(&publisher_name, &publisher_type, &xeid, write_tx, cancel),
        }
    }

    /// Applies the subscription rules to one published event and, when they
    /// pass, enqueues the delivery frame.
    fn on_trigger(
        &mut self,
        publisher_name: &str,
        publisher_type: &str,
        xeid: &XeidMatcher,
        write_tx: &mpsc::Sender<Bytes>,
        cancel: &CancellationToken,
    ) {
        if self.paused {
            return;
        }
        // the trigger's device filter selects the receivers
        if !xeid.device_matches(&self.name, &self.dtype) {
            return;
        }
        if self
            .negsubs
            .iter()
            .any(|n| n.matcher.matches(&xeid.eid, publisher_name, publisher_type))
        {
            return;
        }

        let now = Instant::now();
        let Some(sub) = self.subs.iter_mut().find(|s| {
            s.matcher.matches(&xeid.eid, publisher_name, publisher_type)
                && s.ready(now)
        }) else {
            return;
        };
        sub.last_delivery = Some(now);

        let frame = format!(
            "trig {}@{publisher_name}#{publisher_type}\n",
            xeid.eid
        );
        if write_tx.try_send(Bytes::from(frame)).is_err() {
            // slowest-subscriber policy: a full queue disconnects the session
            warn!(name = %self.name, "write queue overflow, disconnecting");
            cancel.cancel();
        }
    }
}

/// Reads one line, bounded by the idle deadline and the cancellation token.
/// `None` means the session is over (EOF, error, timeout or stop).
async fn next_line<S>(
    frames: &mut Frames<S>,
    cancel: &CancellationToken,
    idle: Option<Duration>,
) -> Option<String>
where
    S: AsyncRead + AsyncWrite + Send,
{
    let deadline = idle.map(|d| Instant::now() + d);
    tokio::select! {
        _ = cancel.cancelled() => None,
        _ = idle_wait(deadline) => None,
        line = frames.next() => match line {
            Some(Ok(line)) => Some(line),
            Some(Err(e)) => {
                debug!("read failed: {e}");
                None
            },
            None => None,
        },
    }
}

/// Pends forever when no deadline is set.
async fn idle_wait(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending().await,
    }
}

async fn send_line(write_tx: &mpsc::Sender<Bytes>, text: &str) {
    let _ = write_tx.send(Bytes::from(format!("{text}\n"))).await;
}
