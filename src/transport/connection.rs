//! Per-connection plumbing
//!
//! Each accepted socket gets a bounded send queue drained by a dedicated
//! writer task, so one slow consumer never blocks the session lock or other
//! connections. Overflowing the queue kills the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::codec::{Framed, LinesCodec};

use crate::router::event::Envelope;
use crate::router::event::ServerEvent;
use crate::router::handler::{ConnCtx, EventRouter};
use crate::types::ConnId;

/// Send-side handle of one connection.
///
/// Clones live in session member tables; enqueueing is non-blocking so it
/// is safe under a session lock.
#[derive(Debug, Clone)]
pub struct ConnHandle {
    id: ConnId,
    frames: mpsc::Sender<String>,
    shutdown: mpsc::Sender<()>,
    stats: Arc<TransportStats>,
}

impl ConnHandle {
    /// Connection id.
    #[must_use]
    pub fn id(&self) -> ConnId {
        self.id
    }

    /// Enqueue a serialized frame.
    ///
    /// A full queue means the consumer is hopelessly behind; the frame is
    /// dropped and the connection is signalled to terminate.
    pub fn send_frame(&self, frame: String) {
        match self.frames.try_send(frame) {
            Ok(()) => {
                self.stats.frames_out.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(conn = %self.id, "send queue overflow, terminating connection");
                self.stats.overflows.fetch_add(1, Ordering::Relaxed);
                self.signal_shutdown();
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {}
        }
    }

    /// Serialize and enqueue an event.
    pub fn send_event(&self, event: &ServerEvent) {
        self.send_frame(event.to_frame());
    }

    /// Ask the connection to close.
    pub fn signal_shutdown(&self) {
        let _ = self.shutdown.try_send(());
    }

    /// Handle wired to in-memory channels instead of a socket.
    #[cfg(test)]
    pub(crate) fn test_pair(
        id: u64,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<String>, mpsc::Receiver<()>) {
        let (frames, frames_rx) = mpsc::channel(capacity);
        let (shutdown, shutdown_rx) = mpsc::channel(1);
        let handle = Self {
            id: ConnId(id),
            frames,
            shutdown,
            stats: Arc::new(TransportStats::default()),
        };
        (handle, frames_rx, shutdown_rx)
    }
}

/// Process-wide transport counters.
#[derive(Debug, Default)]
pub struct TransportStats {
    /// Frames decoded from clients
    pub frames_in: AtomicU64,
    /// Frames enqueued to clients
    pub frames_out: AtomicU64,
    /// Frames that failed envelope decode and were dropped
    pub malformed: AtomicU64,
    /// Connections accepted
    pub connections: AtomicU64,
    /// Connections terminated for send-queue overflow
    pub overflows: AtomicU64,
}

/// Point-in-time view of [`TransportStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Frames decoded from clients
    pub frames_in: u64,
    /// Frames enqueued to clients
    pub frames_out: u64,
    /// Dropped malformed frames
    pub malformed: u64,
    /// Connections accepted
    pub connections: u64,
    /// Overflow terminations
    pub overflows: u64,
}

impl TransportStats {
    /// Snapshot the counters.
    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            frames_out: self.frames_out.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            overflows: self.overflows.load(Ordering::Relaxed),
        }
    }
}

/// Drive one accepted connection to completion.
///
/// Owns the read half inline and spawns the writer task; returns when the
/// peer disconnects, a codec error occurs, or shutdown is signalled. The
/// disconnect handler runs before return.
pub(crate) async fn run_connection(
    stream: TcpStream,
    conn_id: ConnId,
    router: Arc<EventRouter>,
    stats: Arc<TransportStats>,
) {
    let config = router.config();
    let framed = Framed::new(stream, LinesCodec::new_with_max_length(config.max_frame_len));
    let (mut sink, mut lines) = framed.split();

    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(config.send_queue_capacity);
    let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);

    let handle = ConnHandle {
        id: conn_id,
        frames: frame_tx,
        shutdown: shutdown_tx,
        stats: Arc::clone(&stats),
    };

    stats.connections.fetch_add(1, Ordering::Relaxed);

    // Writer: drains the queue until every sender is dropped or the socket
    // dies. It must not hold a ConnHandle of its own, or the frame channel
    // would never close.
    let writer_shutdown = handle.shutdown.clone();
    let writer = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = sink.send(frame).await {
                tracing::debug!(conn = %conn_id, "write failed: {e}");
                let _ = writer_shutdown.try_send(());
                break;
            }
        }
    });

    let mut ctx = ConnCtx::new(handle.clone(), config);

    loop {
        tokio::select! {
            maybe_line = lines.next() => {
                match maybe_line {
                    Some(Ok(line)) => {
                        stats.frames_in.fetch_add(1, Ordering::Relaxed);
                        let received_ms = router.clock().now_wall_ms();
                        match serde_json::from_str::<Envelope>(&line) {
                            Ok(envelope) => {
                                if let Some(reply) =
                                    router.dispatch(&mut ctx, envelope, received_ms).await
                                {
                                    handle.send_frame(reply);
                                }
                            }
                            Err(e) => {
                                stats.malformed.fetch_add(1, Ordering::Relaxed);
                                tracing::debug!(conn = %conn_id, "malformed frame dropped: {e}");
                            }
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(conn = %conn_id, "codec error, closing: {e}");
                        break;
                    }
                    None => break,
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    router.handle_disconnect(&mut ctx).await;
    drop(ctx);
    drop(handle);
    // All frame senders for this connection are gone once the member entry
    // is removed; the writer drains what is queued and exits.
    let _ = writer.await;
}
