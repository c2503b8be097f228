/*
  memory.rs - In-process link fabric

  Every endpoint registers a name on a shared MemoryNetwork. Dialing a name
  creates a pair of forwarder tasks (one per direction) between the two
  endpoints. partition(a, b) cuts every live link between a and b and
  refuses new dials until heal(a, b); both ends of a cut link observe it as
  a normal close, exactly like a dropped socket.
*/

use super::errors::{TransportError, TransportResult};
use super::link::{Candidate, CandidateKind, LinkDriver, RawLink, LINK_BUFFER};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

struct LiveLink {
    a: String,
    b: String,
    cancel: CancellationToken,
}

#[derive(Default)]
struct NetworkState {
    endpoints: HashMap<String, mpsc::Sender<RawLink>>,
    partitions: HashSet<(String, String)>,
    links: Vec<LiveLink>,
}

fn pair(a: &str, b: &str) -> (String, String) {
    if a <= b {
        (a.to_string(), b.to_string())
    } else {
        (b.to_string(), a.to_string())
    }
}

/// Shared in-memory network
#[derive(Clone, Default)]
pub struct MemoryNetwork {
    state: Arc<Mutex<NetworkState>>,
}

impl MemoryNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an endpoint and get its driver. Registering a name again
    /// replaces the previous endpoint.
    pub fn endpoint(&self, name: impl Into<String>) -> MemoryDriver {
        let name = name.into();
        let (tx, rx) = mpsc::channel(LINK_BUFFER);
        self.lock().endpoints.insert(name.clone(), tx);
        debug!(endpoint = %name, "Memory endpoint registered");
        MemoryDriver {
            name,
            network: self.clone(),
            incoming: AsyncMutex::new(rx),
        }
    }

    /// Cut all links between `a` and `b` and refuse new ones
    pub fn partition(&self, a: &str, b: &str) {
        let key = pair(a, b);
        let mut state = self.lock();
        state.links.retain(|link| {
            if pair(&link.a, &link.b) == key {
                link.cancel.cancel();
                false
            } else {
                !link.cancel.is_cancelled()
            }
        });
        state.partitions.insert(key);
        info!(a, b, "Memory network partitioned");
    }

    /// Allow links between `a` and `b` again
    pub fn heal(&self, a: &str, b: &str) {
        self.lock().partitions.remove(&pair(a, b));
        info!(a, b, "Memory network healed");
    }

    /// Drop an endpoint; later dials to it fail
    pub fn remove_endpoint(&self, name: &str) {
        self.lock().endpoints.remove(name);
    }

    /// Number of live links touching `name`
    pub fn link_count(&self, name: &str) -> usize {
        let state = self.lock();
        state
            .links
            .iter()
            .filter(|l| !l.cancel.is_cancelled() && (l.a == name || l.b == name))
            .count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, NetworkState> {
        // A poisoned lock only means a test panicked mid-update; keep going
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn connect(&self, from: &str, to: &str) -> TransportResult<RawLink> {
        let (acceptor, cancel) = {
            let mut state = self.lock();
            if state.partitions.contains(&pair(from, to)) {
                return Err(TransportError::Unreachable(format!("{} (partitioned)", to)));
            }
            let acceptor = state
                .endpoints
                .get(to)
                .cloned()
                .ok_or_else(|| TransportError::Unreachable(to.to_string()))?;
            let cancel = CancellationToken::new();
            state.links.retain(|l| !l.cancel.is_cancelled());
            state.links.push(LiveLink {
                a: from.to_string(),
                b: to.to_string(),
                cancel: cancel.clone(),
            });
            (acceptor, cancel)
        };

        let (a_out_tx, a_out_rx) = mpsc::channel(LINK_BUFFER);
        let (a_in_tx, a_in_rx) = mpsc::channel(LINK_BUFFER);
        let (b_out_tx, b_out_rx) = mpsc::channel(LINK_BUFFER);
        let (b_in_tx, b_in_rx) = mpsc::channel(LINK_BUFFER);

        spawn_forwarder(a_out_rx, b_in_tx, cancel.clone());
        spawn_forwarder(b_out_rx, a_in_tx, cancel.clone());

        let local = Candidate::new(CandidateKind::Memory, from);
        let remote = Candidate::new(CandidateKind::Memory, to);

        let accepted = RawLink {
            local: remote.clone(),
            remote: local.clone(),
            outbound: b_out_tx,
            inbound: b_in_rx,
        };
        if acceptor.send(accepted).await.is_err() {
            cancel.cancel();
            return Err(TransportError::Unreachable(to.to_string()));
        }

        debug!(from, to, "Memory link established");
        Ok(RawLink {
            local,
            remote,
            outbound: a_out_tx,
            inbound: a_in_rx,
        })
    }
}

/// Move frames one way until either side closes or the link is cut; then
/// cut the link so the other direction closes too
fn spawn_forwarder(
    mut from: mpsc::Receiver<Vec<u8>>,
    to: mpsc::Sender<Vec<u8>>,
    cancel: CancellationToken,
) {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                frame = from.recv() => match frame {
                    Some(bytes) => {
                        if to.send(bytes).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
        cancel.cancel();
    });
}

/// One endpoint on a [`MemoryNetwork`]
pub struct MemoryDriver {
    name: String,
    network: MemoryNetwork,
    incoming: AsyncMutex<mpsc::Receiver<RawLink>>,
}

impl MemoryDriver {
    pub fn name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl LinkDriver for MemoryDriver {
    fn local_candidates(&self) -> Vec<Candidate> {
        vec![Candidate::new(CandidateKind::Memory, self.name.clone())]
    }

    async fn dial(&self, remote: &Candidate) -> TransportResult<RawLink> {
        if remote.kind != CandidateKind::Memory {
            return Err(TransportError::Unreachable(format!(
                "{} candidate on memory network",
                remote.kind
            )));
        }
        self.network.connect(&self.name, &remote.address).await
    }

    async fn accept(&self) -> TransportResult<RawLink> {
        self.incoming
            .lock()
            .await
            .recv()
            .await
            .ok_or(TransportError::Shutdown)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    fn memory(name: &str) -> Candidate {
        Candidate::new(CandidateKind::Memory, name)
    }

    #[tokio::test]
    async fn test_dial_accept_and_exchange() {
        let net = MemoryNetwork::new();
        let a = net.endpoint("a");
        let b = net.endpoint("b");

        let mut a_link = a.dial(&memory("b")).await.unwrap();
        let mut b_link = b.accept().await.unwrap();
        assert_eq!(b_link.remote.address, "a");

        a_link.outbound.send(b"ping".to_vec()).await.unwrap();
        assert_eq!(b_link.inbound.recv().await.unwrap(), b"ping");
        b_link.outbound.send(b"pong".to_vec()).await.unwrap();
        assert_eq!(a_link.inbound.recv().await.unwrap(), b"pong");
    }

    #[tokio::test]
    async fn test_dropping_one_side_closes_the_other() {
        let net = MemoryNetwork::new();
        let a = net.endpoint("a");
        let b = net.endpoint("b");

        let a_link = a.dial(&memory("b")).await.unwrap();
        let mut b_link = b.accept().await.unwrap();
        drop(a_link);

        let closed = timeout(Duration::from_secs(1), b_link.inbound.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_partition_cuts_and_heal_restores() {
        let net = MemoryNetwork::new();
        let a = net.endpoint("a");
        let b = net.endpoint("b");

        let mut a_link = a.dial(&memory("b")).await.unwrap();
        let mut b_link = b.accept().await.unwrap();
        assert_eq!(net.link_count("a"), 1);

        net.partition("b", "a");
        let a_closed = timeout(Duration::from_secs(1), a_link.inbound.recv()).await.unwrap();
        let b_closed = timeout(Duration::from_secs(1), b_link.inbound.recv()).await.unwrap();
        assert!(a_closed.is_none() && b_closed.is_none());
        assert!(matches!(
            a.dial(&memory("b")).await,
            Err(TransportError::Unreachable(_))
        ));

        net.heal("a", "b");
        assert!(a.dial(&memory("b")).await.is_ok());
    }

    #[tokio::test]
    async fn test_unknown_endpoint() {
        let net = MemoryNetwork::new();
        let a = net.endpoint("a");
        assert!(a.dial(&memory("ghost")).await.is_err());
        assert!(a
            .dial(&Candidate::new(CandidateKind::Host, "127.0.0.1:1"))
            .await
            .is_err());
    }
}
