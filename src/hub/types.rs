use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::{mpsc, Notify};
use uuid::Uuid;

/// An opaque unit of client data relayed through the hub.
///
/// The hub never inspects or transforms content; text and binary frames
/// pass through byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Text(String),
    Binary(Vec<u8>),
}

impl Payload {
    pub fn len(&self) -> usize {
        match self {
            Payload::Text(text) => text.len(),
            Payload::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A message waiting on the intake queue, tagged with its origin so the
/// fan-out loop can apply the echo policy.
#[derive(Debug, Clone)]
pub struct Envelope {
    pub origin: Uuid,
    pub payload: Arc<Payload>,
}

/// Why an enqueue onto a connection's outbound buffer failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ForwardError {
    /// The outbound buffer is full: the client is not draining its writes
    /// fast enough.
    #[error("outbound buffer full")]
    BufferFull,
    /// The writer task is gone; the connection is already closing.
    #[error("connection closed")]
    Closed,
}

/// Handle for a single WebSocket connection.
///
/// The handle never touches the socket itself. It owns the sending half of
/// the connection's bounded outbound buffer; the socket is written and
/// closed exclusively by the connection's own writer task, so a forward
/// can never race with the socket being released.
pub struct ConnectionHandle {
    pub id: Uuid,
    pub peer: Option<SocketAddr>,
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Arc<Payload>>,
    shutdown: Notify,
}

impl ConnectionHandle {
    pub fn new(peer: Option<SocketAddr>, sender: mpsc::Sender<Arc<Payload>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            peer,
            connected_at: Utc::now(),
            sender,
            shutdown: Notify::new(),
        }
    }

    /// Enqueue a frame onto this connection's outbound buffer without
    /// waiting. The buffer bounds how far a slow client may lag.
    pub fn try_forward(&self, frame: Arc<Payload>) -> Result<(), ForwardError> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => ForwardError::BufferFull,
            mpsc::error::TrySendError::Closed(_) => ForwardError::Closed,
        })
    }

    /// Tell the connection's writer task to shut down. Idempotent; safe to
    /// call before the writer has started waiting.
    pub fn close(&self) {
        self.shutdown.notify_one();
    }

    /// Resolves once `close` has been called.
    pub async fn closed(&self) {
        self.shutdown.notified().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::{assert_pending, assert_ready, task};

    fn test_handle(buffer: usize) -> (Arc<ConnectionHandle>, mpsc::Receiver<Arc<Payload>>) {
        let (tx, rx) = mpsc::channel(buffer);
        (Arc::new(ConnectionHandle::new(None, tx)), rx)
    }

    #[test]
    fn forward_fills_bounded_buffer() {
        let (handle, mut rx) = test_handle(2);
        let frame = Arc::new(Payload::Text("hi".into()));

        assert!(handle.try_forward(frame.clone()).is_ok());
        assert!(handle.try_forward(frame.clone()).is_ok());
        assert_eq!(handle.try_forward(frame.clone()), Err(ForwardError::BufferFull));

        // Draining makes room again.
        assert!(rx.try_recv().is_ok());
        assert!(handle.try_forward(frame).is_ok());
    }

    #[test]
    fn forward_after_receiver_dropped_is_closed() {
        let (handle, rx) = test_handle(2);
        drop(rx);

        let frame = Arc::new(Payload::Binary(vec![1, 2, 3]));
        assert_eq!(handle.try_forward(frame), Err(ForwardError::Closed));
    }

    #[test]
    fn close_wakes_waiter() {
        let (handle, _rx) = test_handle(1);

        let mut closed = task::spawn(handle.closed());
        assert_pending!(closed.poll());

        handle.close();
        assert_ready!(closed.poll());
    }

    #[test]
    fn close_before_wait_is_not_lost() {
        let (handle, _rx) = test_handle(1);
        handle.close();

        let mut closed = task::spawn(handle.closed());
        assert_ready!(closed.poll());
    }

    #[test]
    fn payload_len() {
        assert_eq!(Payload::Text("abc".into()).len(), 3);
        assert_eq!(Payload::Binary(vec![0; 5]).len(), 5);
        assert!(Payload::Text(String::new()).is_empty());
    }
}
