/*
  link.rs - Raw peer links and the driver abstraction

  A RawLink is one reliable, ordered, bidirectional frame channel to one
  remote endpoint. It knows nothing about identities or encryption: the
  engine seals every frame before it gets here and binds the link to a peer
  only after the first (encrypted) Hello frame has been read from it.

  Dropping the outbound sender closes the link; the remote side then sees
  its inbound stream end.

  Drivers:
    • MemoryDriver - in-process links with partition/heal controls
    • TcpDriver    - length-prefixed frames over TCP
*/

use super::errors::TransportResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

/// Frames buffered per direction on a link
pub const LINK_BUFFER: usize = 256;

/// How an endpoint can be reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CandidateKind {
    /// Directly reachable socket address
    Host,
    /// In-process endpoint
    Memory,
}

impl fmt::Display for CandidateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CandidateKind::Host => f.write_str("host"),
            CandidateKind::Memory => f.write_str("memory"),
        }
    }
}

/// Connection-setup metadata exchanged over signaling
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Candidate {
    pub kind: CandidateKind,
    pub address: String,
}

impl Candidate {
    pub fn new(kind: CandidateKind, address: impl Into<String>) -> Self {
        Candidate {
            kind,
            address: address.into(),
        }
    }
}

/// Identifier of one link instance (a reconnect gets a new one)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(pub u64);

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "link-{}", self.0)
    }
}

/// One open link
#[derive(Debug)]
pub struct RawLink {
    pub local: Candidate,
    pub remote: Candidate,
    pub outbound: mpsc::Sender<Vec<u8>>,
    pub inbound: mpsc::Receiver<Vec<u8>>,
}

/// Source of links: dials out and accepts incoming ones
#[async_trait]
pub trait LinkDriver: Send + Sync {
    /// Where this endpoint can be reached
    fn local_candidates(&self) -> Vec<Candidate>;

    /// Open a link to a remote candidate
    async fn dial(&self, remote: &Candidate) -> TransportResult<RawLink>;

    /// Wait for the next incoming link
    async fn accept(&self) -> TransportResult<RawLink>;
}

/// What a link reader reports
#[derive(Debug)]
pub enum LinkEvent {
    Frame { link_id: LinkId, bytes: Vec<u8> },
    Closed { link_id: LinkId },
}

/// Pump a link's inbound frames into `events` until the link closes or
/// `cancel` fires. A `Closed` event is emitted only when the remote side
/// went away, not on cancellation.
pub fn spawn_link_reader(
    link_id: LinkId,
    mut inbound: mpsc::Receiver<Vec<u8>>,
    events: mpsc::Sender<LinkEvent>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    trace!(%link_id, "Link reader cancelled");
                    return;
                }
                frame = inbound.recv() => match frame {
                    Some(bytes) => {
                        if events.send(LinkEvent::Frame { link_id, bytes }).await.is_err() {
                            return;
                        }
                    }
                    None => {
                        let _ = events.send(LinkEvent::Closed { link_id }).await;
                        return;
                    }
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reader_forwards_frames_then_close() {
        let (tx, rx) = mpsc::channel(4);
        let (events_tx, mut events_rx) = mpsc::channel(4);
        spawn_link_reader(LinkId(7), rx, events_tx, CancellationToken::new());

        tx.send(b"one".to_vec()).await.unwrap();
        drop(tx);

        match events_rx.recv().await.unwrap() {
            LinkEvent::Frame { link_id, bytes } => {
                assert_eq!(link_id, LinkId(7));
                assert_eq!(bytes, b"one");
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            events_rx.recv().await.unwrap(),
            LinkEvent::Closed { link_id: LinkId(7) }
        ));
    }

    #[tokio::test]
    async fn test_cancelled_reader_is_silent() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(4);
        let (events_tx, mut events_rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();
        let handle = spawn_link_reader(LinkId(1), rx, events_tx, cancel.clone());

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(events_rx.recv().await.is_none());
    }
}
