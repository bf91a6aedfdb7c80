use crate::config::{Role, SessionConfig};
use crate::error::MuxError;
use crate::stream::{Delivery, MuxStream, StreamSlot};
use futures::{SinkExt, StreamExt};
use rsocks_proto::{Frame, FrameCodec, FrameType, GoAwayCode, StreamId, SESSION_STREAM_ID};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, trace, warn};

/// Whether the reader keeps going after a frame
enum Flow {
    Continue,
    Stop,
}

/// State shared by the session handle, its streams and its background tasks
pub(crate) struct Shared {
    role: Role,
    config: SessionConfig,
    next_stream_id: AtomicU32,
    streams: Mutex<HashMap<StreamId, Arc<StreamSlot>>>,
    outbound: mpsc::UnboundedSender<Frame>,
    closed: AtomicBool,
    closed_tx: watch::Sender<bool>,
}

impl Shared {
    pub(crate) fn role(&self) -> Role {
        self.role
    }

    pub(crate) fn frame_payload_limit(&self) -> usize {
        self.config.frame_payload_limit()
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn lock_streams(&self) -> MutexGuard<'_, HashMap<StreamId, Arc<StreamSlot>>> {
        self.streams.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Queue a frame for the writer task
    pub(crate) fn send_frame(&self, frame: Frame) -> Result<(), MuxError> {
        if self.is_closed() {
            return Err(MuxError::SessionClosed);
        }
        self.outbound
            .send(frame)
            .map_err(|_| MuxError::SessionClosed)
    }

    pub(crate) fn remove_stream(&self, stream_id: StreamId) {
        self.lock_streams().remove(&stream_id);
    }

    fn slot(&self, stream_id: StreamId) -> Option<Arc<StreamSlot>> {
        self.lock_streams().get(&stream_id).cloned()
    }

    /// Close the session once: tell the peer, then reset every live stream
    fn shutdown(&self, code: GoAwayCode) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let _ = self.outbound.send(Frame::go_away(code));

        let slots: Vec<Arc<StreamSlot>> = self.lock_streams().values().cloned().collect();
        for slot in &slots {
            slot.lock().reset();
        }

        self.closed_tx.send_replace(true);
        debug!(role = %self.role, ?code, streams = slots.len(), "Session closed");
    }

    fn open_stream(self: &Arc<Self>) -> Result<MuxStream, MuxError> {
        let slot = Arc::new(StreamSlot::new());

        let stream_id = {
            let mut streams = self.lock_streams();
            if self.is_closed() {
                return Err(MuxError::SessionClosed);
            }

            let stream_id = self
                .next_stream_id
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |id| id.checked_add(2))
                .map_err(|_| MuxError::StreamIdsExhausted)?;
            streams.insert(stream_id, slot.clone());
            stream_id
        };

        // Dropping the handle on failure removes the slot again
        let stream = MuxStream::new(stream_id, slot, self.clone());
        self.send_frame(Frame::syn(stream_id))?;

        trace!(role = %self.role, stream_id, "Opened stream");
        Ok(stream)
    }

    /// Register a stream the peer opened and hand it to `accept()`
    fn accept_inbound(
        self: &Arc<Self>,
        stream_id: StreamId,
        accept_tx: &mpsc::Sender<MuxStream>,
    ) -> Option<Arc<StreamSlot>> {
        if self.role.allocates(stream_id) {
            warn!(role = %self.role, stream_id, "Peer opened a stream in our ID space");
            let _ = self.send_frame(Frame::rst(stream_id));
            return None;
        }

        let slot = {
            let mut streams = self.lock_streams();
            if self.is_closed() {
                return None;
            }
            if let Some(existing) = streams.get(&stream_id) {
                return Some(existing.clone());
            }
            let slot = Arc::new(StreamSlot::new());
            streams.insert(stream_id, slot.clone());
            slot
        };

        let stream = MuxStream::new(stream_id, slot.clone(), self.clone());
        match accept_tx.try_send(stream) {
            Ok(()) => {
                trace!(role = %self.role, stream_id, "Accepted stream");
                Some(slot)
            }
            Err(rejected) => {
                // The rejected handle resets the stream when dropped
                warn!(role = %self.role, stream_id, "Accept backlog full, resetting stream");
                drop(rejected);
                None
            }
        }
    }

    fn dispatch(
        self: &Arc<Self>,
        frame: Frame,
        accept_tx: &mpsc::Sender<MuxStream>,
    ) -> Result<Flow, MuxError> {
        match frame.frame_type {
            FrameType::Ping => {
                if !frame.flags.has_ack() {
                    let _ = self.send_frame(Frame::pong(frame.u32_payload()?));
                }
                Ok(Flow::Continue)
            }
            FrameType::GoAway => {
                let code = GoAwayCode::from_u32(frame.u32_payload()?);
                debug!(role = %self.role, ?code, "Peer is going away");
                Ok(Flow::Stop)
            }
            FrameType::Data | FrameType::WindowUpdate => {
                self.dispatch_stream(frame, accept_tx)?;
                Ok(Flow::Continue)
            }
        }
    }

    fn dispatch_stream(
        self: &Arc<Self>,
        frame: Frame,
        accept_tx: &mpsc::Sender<MuxStream>,
    ) -> Result<(), MuxError> {
        let stream_id = frame.stream_id;
        if stream_id == SESSION_STREAM_ID {
            return Err(MuxError::Protocol(format!(
                "{:?} frame on the session stream",
                frame.frame_type
            )));
        }

        let slot = if frame.flags.has_syn() {
            self.accept_inbound(stream_id, accept_tx)
        } else {
            self.slot(stream_id)
        };

        let Some(slot) = slot else {
            trace!(role = %self.role, stream_id, "Dropping frame for unknown stream");
            return Ok(());
        };

        let mut state = slot.lock();

        match frame.frame_type {
            FrameType::WindowUpdate => state.grant_send_window(frame.u32_payload()?),
            _ => {
                if state.push_data(frame.payload) == Delivery::WindowExceeded {
                    warn!(role = %self.role, stream_id, "Peer overran the receive window");
                    state.reset();
                    let _ = self.send_frame(Frame::rst(stream_id));
                    return Ok(());
                }
            }
        }

        if frame.flags.has_rst() {
            state.reset();
        } else if frame.flags.has_fin() {
            state.remote_finished();
        }

        Ok(())
    }
}

async fn wait_closed(mut closed_rx: watch::Receiver<bool>) {
    loop {
        if *closed_rx.borrow_and_update() {
            return;
        }
        if closed_rx.changed().await.is_err() {
            return;
        }
    }
}

async fn writer_task<W>(
    mut sink: FramedWrite<W, FrameCodec>,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
    shared: Weak<Shared>,
) where
    W: AsyncWrite + Unpin,
{
    while let Some(frame) = outbound.recv().await {
        let going_away = frame.frame_type == FrameType::GoAway;

        if let Err(e) = sink.send(frame).await {
            debug!("Session write failed: {}", e);
            if let Some(shared) = shared.upgrade() {
                shared.shutdown(GoAwayCode::InternalError);
            }
            break;
        }

        if going_away {
            break;
        }
    }

    let _ = sink.close().await;
    trace!("Session writer finished");
}

async fn reader_task<R>(
    mut frames: FramedRead<R, FrameCodec>,
    shared: Arc<Shared>,
    accept_tx: mpsc::Sender<MuxStream>,
    closed_rx: watch::Receiver<bool>,
) where
    R: AsyncRead + Unpin,
{
    let closed = wait_closed(closed_rx);
    tokio::pin!(closed);

    let code = loop {
        tokio::select! {
            _ = &mut closed => break GoAwayCode::Normal,
            next = frames.next() => match next {
                Some(Ok(frame)) => match shared.dispatch(frame, &accept_tx) {
                    Ok(Flow::Continue) => {}
                    Ok(Flow::Stop) => break GoAwayCode::Normal,
                    Err(e) => {
                        warn!(role = %shared.role, "Protocol error: {}", e);
                        break GoAwayCode::ProtocolError;
                    }
                },
                Some(Err(e)) => {
                    debug!(role = %shared.role, "Session read failed: {}", e);
                    break GoAwayCode::ProtocolError;
                }
                None => {
                    debug!(role = %shared.role, "Transport closed by peer");
                    break GoAwayCode::Normal;
                }
            }
        }
    };

    shared.shutdown(code);
}

async fn keepalive_task(shared: Weak<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    ticker.tick().await;

    let mut nonce: u32 = 0;
    loop {
        ticker.tick().await;

        let Some(shared) = shared.upgrade() else {
            break;
        };
        nonce = nonce.wrapping_add(1);
        if shared.send_frame(Frame::ping(nonce)).is_err() {
            break;
        }
    }
}

/// A multiplexed session over one transport connection
///
/// Cloning is not supported; share it behind an `Arc`. Dropping the handle
/// does not close the session: streams already handed out keep working until
/// the transport goes away or [`close`](MuxSession::close) is called.
pub struct MuxSession {
    shared: Arc<Shared>,
    incoming: tokio::sync::Mutex<mpsc::Receiver<MuxStream>>,
    closed_rx: watch::Receiver<bool>,
}

impl MuxSession {
    /// Start a session over `io` and spawn its background tasks
    ///
    /// Must be called from within a tokio runtime.
    pub fn new<T>(io: T, role: Role, config: SessionConfig) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (read_half, write_half) = tokio::io::split(io);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (accept_tx, accept_rx) = mpsc::channel(config.accept_backlog.max(1));
        let (closed_tx, closed_rx) = watch::channel(false);
        let keepalive = config.keepalive_interval;

        let shared = Arc::new(Shared {
            role,
            config,
            next_stream_id: AtomicU32::new(role.first_stream_id()),
            streams: Mutex::new(HashMap::new()),
            outbound: outbound_tx,
            closed: AtomicBool::new(false),
            closed_tx,
        });

        tokio::spawn(writer_task(
            FramedWrite::new(write_half, FrameCodec),
            outbound_rx,
            Arc::downgrade(&shared),
        ));
        tokio::spawn(reader_task(
            FramedRead::new(read_half, FrameCodec),
            shared.clone(),
            accept_tx,
            closed_rx.clone(),
        ));
        if let Some(period) = keepalive {
            tokio::spawn(keepalive_task(Arc::downgrade(&shared), period));
        }

        debug!(role = %role, "Session started");

        Self {
            shared,
            incoming: tokio::sync::Mutex::new(accept_rx),
            closed_rx,
        }
    }

    /// Session that opens streams, with default tuning
    pub fn client<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::new(io, Role::Client, SessionConfig::default())
    }

    /// Session that accepts streams, with default tuning
    pub fn server<T>(io: T) -> Self
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        Self::new(io, Role::Server, SessionConfig::default())
    }

    pub fn role(&self) -> Role {
        self.shared.role
    }

    /// Open a new outbound stream
    ///
    /// The peer learns about the stream from its SYN; there is no round trip.
    pub async fn open(&self) -> Result<MuxStream, MuxError> {
        self.shared.open_stream()
    }

    /// Wait for the next stream opened by the peer
    ///
    /// Returns [`MuxError::SessionClosed`] once the session is gone.
    pub async fn accept(&self) -> Result<MuxStream, MuxError> {
        let mut incoming = self.incoming.lock().await;
        incoming.recv().await.ok_or(MuxError::SessionClosed)
    }

    /// Close the session, resetting all of its streams
    pub fn close(&self) {
        self.shared.shutdown(GoAwayCode::Normal);
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Resolves once the session has closed, for whatever reason
    pub async fn closed(&self) {
        wait_closed(self.closed_rx.clone()).await;
    }

    /// Number of streams currently open on this session
    pub fn active_streams(&self) -> usize {
        self.shared.lock_streams().len()
    }
}

impl fmt::Debug for MuxSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxSession")
            .field("role", &self.shared.role)
            .field("closed", &self.is_closed())
            .field("active_streams", &self.active_streams())
            .finish()
    }
}
