//! Logical streams carried inside a session

use crate::session::Shared;
use bytes::{Buf, Bytes};
use rsocks_proto::{Frame, StreamId, INITIAL_WINDOW_SIZE};
use std::collections::VecDeque;
use std::fmt;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

/// Outcome of handing an inbound data frame to a stream
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Queued,
    WindowExceeded,
}

/// Per-stream state shared between the stream handle and the reader task
#[derive(Debug)]
pub(crate) struct StreamState {
    /// Received chunks not yet read
    recv_queue: VecDeque<Bytes>,
    /// Bytes the peer may still send before waiting for a window update
    recv_window: u32,
    /// Bytes read since the last window update we sent
    unacked: u32,
    /// Bytes we may still send before the peer grants more
    send_window: u32,
    remote_fin: bool,
    local_fin: bool,
    reset: bool,
    read_waker: Option<Waker>,
    write_waker: Option<Waker>,
}

impl StreamState {
    fn new() -> Self {
        Self {
            recv_queue: VecDeque::new(),
            recv_window: INITIAL_WINDOW_SIZE,
            unacked: 0,
            send_window: INITIAL_WINDOW_SIZE,
            remote_fin: false,
            local_fin: false,
            reset: false,
            read_waker: None,
            write_waker: None,
        }
    }

    pub(crate) fn push_data(&mut self, payload: Bytes) -> Delivery {
        let len = payload.len();
        if len > self.recv_window as usize {
            return Delivery::WindowExceeded;
        }

        if len > 0 && !self.remote_fin && !self.reset {
            self.recv_window -= len as u32;
            self.recv_queue.push_back(payload);
            self.wake_reader();
        }

        Delivery::Queued
    }

    pub(crate) fn grant_send_window(&mut self, delta: u32) {
        self.send_window = self.send_window.saturating_add(delta);
        self.wake_writer();
    }

    pub(crate) fn remote_finished(&mut self) {
        self.remote_fin = true;
        self.wake_reader();
    }

    pub(crate) fn reset(&mut self) {
        self.reset = true;
        self.wake_reader();
        self.wake_writer();
    }

    fn wake_reader(&mut self) {
        if let Some(waker) = self.read_waker.take() {
            waker.wake();
        }
    }

    fn wake_writer(&mut self) {
        if let Some(waker) = self.write_waker.take() {
            waker.wake();
        }
    }
}

#[derive(Debug)]
pub(crate) struct StreamSlot {
    state: Mutex<StreamState>,
}

impl StreamSlot {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(StreamState::new()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// One bidirectional byte channel inside a [`MuxSession`](crate::MuxSession)
///
/// `shutdown()` half-closes the write direction; the peer reads EOF once it
/// has drained what was sent. Dropping a stream the peer is still writing to
/// resets it.
pub struct MuxStream {
    id: StreamId,
    slot: Arc<StreamSlot>,
    shared: Arc<Shared>,
}

impl MuxStream {
    pub(crate) fn new(id: StreamId, slot: Arc<StreamSlot>, shared: Arc<Shared>) -> Self {
        Self { id, slot, shared }
    }

    /// Stream ID (unique within the session)
    pub fn id(&self) -> StreamId {
        self.id
    }
}

impl fmt::Debug for MuxStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MuxStream")
            .field("id", &self.id)
            .field("role", &self.shared.role())
            .finish()
    }
}

fn reset_error() -> io::Error {
    io::Error::new(io::ErrorKind::ConnectionReset, "stream reset")
}

impl AsyncRead for MuxStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut state = this.slot.lock();

        if !state.recv_queue.is_empty() {
            let mut copied = 0usize;
            while buf.remaining() > 0 {
                let Some(chunk) = state.recv_queue.front_mut() else {
                    break;
                };
                let n = chunk.len().min(buf.remaining());
                buf.put_slice(&chunk[..n]);
                chunk.advance(n);
                if chunk.is_empty() {
                    state.recv_queue.pop_front();
                }
                copied += n;
            }

            // Hand credit back once half the window has been consumed
            state.unacked += copied as u32;
            if state.unacked >= INITIAL_WINDOW_SIZE / 2 && !state.remote_fin && !state.reset {
                let delta = std::mem::take(&mut state.unacked);
                state.recv_window += delta;
                let _ = this.shared.send_frame(Frame::window_update(this.id, delta));
            }

            return Poll::Ready(Ok(()));
        }

        if state.remote_fin {
            return Poll::Ready(Ok(()));
        }

        if state.reset {
            return Poll::Ready(Err(reset_error()));
        }

        state.read_waker = Some(cx.waker().clone());
        Poll::Pending
    }
}

impl AsyncWrite for MuxStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        let mut state = this.slot.lock();

        if state.reset {
            return Poll::Ready(Err(reset_error()));
        }

        if state.local_fin {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "write after shutdown",
            )));
        }

        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }

        if state.send_window == 0 {
            state.write_waker = Some(cx.waker().clone());
            return Poll::Pending;
        }

        let n = buf
            .len()
            .min(state.send_window as usize)
            .min(this.shared.frame_payload_limit());
        let frame = Frame::data(this.id, Bytes::copy_from_slice(&buf[..n]));

        if this.shared.send_frame(frame).is_err() {
            state.reset();
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "session closed",
            )));
        }

        state.send_window -= n as u32;
        Poll::Ready(Ok(n))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Frames are queued for the writer task as soon as they are produced
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        let this = self.get_mut();
        let mut state = this.slot.lock();

        if !state.local_fin && !state.reset {
            state.local_fin = true;
            let _ = this.shared.send_frame(Frame::fin(this.id));
        }

        Poll::Ready(Ok(()))
    }
}

impl Drop for MuxStream {
    fn drop(&mut self) {
        {
            let mut state = self.slot.lock();
            if !state.reset {
                if !state.remote_fin {
                    state.reset = true;
                    let _ = self.shared.send_frame(Frame::rst(self.id));
                } else if !state.local_fin {
                    state.local_fin = true;
                    let _ = self.shared.send_frame(Frame::fin(self.id));
                }
            }
        }

        self.shared.remove_stream(self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_data_respects_window() {
        let mut state = StreamState::new();

        let chunk = Bytes::from(vec![0u8; INITIAL_WINDOW_SIZE as usize]);
        assert_eq!(state.push_data(chunk), Delivery::Queued);
        assert_eq!(state.recv_window, 0);

        assert_eq!(
            state.push_data(Bytes::from_static(b"x")),
            Delivery::WindowExceeded
        );
    }

    #[test]
    fn test_data_after_fin_is_dropped() {
        let mut state = StreamState::new();
        state.remote_finished();

        assert_eq!(state.push_data(Bytes::from_static(b"late")), Delivery::Queued);
        assert!(state.recv_queue.is_empty());
        assert_eq!(state.recv_window, INITIAL_WINDOW_SIZE);
    }

    #[test]
    fn test_grant_send_window_saturates() {
        let mut state = StreamState::new();
        state.grant_send_window(u32::MAX);
        assert_eq!(state.send_window, u32::MAX);
    }
}
