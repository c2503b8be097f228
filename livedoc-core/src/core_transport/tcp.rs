/*
  tcp.rs - Socket link driver

  Frames travel as a 4-byte big-endian length prefix followed by the frame
  bytes. Each link gets a writer task (drains the outbound queue onto the
  socket) and a reader task (parses frames into the inbound queue).

  ┌──────────────┐       ┌──────────────┐       ┌──────────────┐
  │   Listener   │       │   Link #1    │       │   Link #2    │
  │    Task      │──────►│ reader/writer│       │ reader/writer│
  │ (accept loop)│       │              │       │              │
  └──────────────┘       └──────────────┘       └──────────────┘

  Frames larger than `max_frame_size` are refused on write and treated as a
  protocol violation (link closed) on read.
*/

use super::errors::{TransportError, TransportResult};
use super::link::{Candidate, CandidateKind, LinkDriver, RawLink, LINK_BUFFER};
use async_trait::async_trait;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub struct TcpDriver {
    local_addr: SocketAddr,
    max_frame_size: usize,
    incoming: Mutex<mpsc::Receiver<RawLink>>,
    cancel: CancellationToken,
}

impl TcpDriver {
    /// Bind a listener and start accepting links
    pub async fn bind(addr: &str, max_frame_size: usize) -> TransportResult<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Io(format!("Failed to bind to {}: {}", addr, e)))?;
        let local_addr = listener.local_addr()?;
        let (tx, rx) = mpsc::channel(LINK_BUFFER);
        let cancel = CancellationToken::new();

        let accept_cancel = cancel.clone();
        tokio::spawn(async move {
            loop {
                let accepted = tokio::select! {
                    _ = accept_cancel.cancelled() => break,
                    accepted = listener.accept() => accepted,
                };
                match accepted {
                    Ok((socket, peer_addr)) => {
                        debug!(%peer_addr, "Accepted TCP link");
                        let link = spawn_link(socket, local_addr, peer_addr, max_frame_size);
                        if tx.send(link).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(error = %e, "Failed to accept connection");
                    }
                }
            }
            debug!(%local_addr, "TCP accept loop stopped");
        });

        info!(%local_addr, "TCP link driver listening");
        Ok(TcpDriver {
            local_addr,
            max_frame_size,
            incoming: Mutex::new(rx),
            cancel,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

impl Drop for TcpDriver {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[async_trait]
impl LinkDriver for TcpDriver {
    fn local_candidates(&self) -> Vec<Candidate> {
        vec![Candidate::new(CandidateKind::Host, self.local_addr.to_string())]
    }

    async fn dial(&self, remote: &Candidate) -> TransportResult<RawLink> {
        if remote.kind != CandidateKind::Host {
            return Err(TransportError::Unreachable(format!(
                "{} candidate over TCP",
                remote.kind
            )));
        }
        let socket = TcpStream::connect(&remote.address)
            .await
            .map_err(|e| TransportError::Unreachable(format!("{}: {}", remote.address, e)))?;
        let peer_addr = socket.peer_addr()?;
        debug!(%peer_addr, "Dialed TCP link");
        Ok(spawn_link(socket, self.local_addr, peer_addr, self.max_frame_size))
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

fn spawn_link(
    socket: TcpStream,
    local_addr: SocketAddr,
    peer_addr: SocketAddr,
    max_frame_size: usize,
) -> RawLink {
    let _ = socket.set_nodelay(true);
    let (reader, writer) = socket.into_split();
    let (out_tx, out_rx) = mpsc::channel(LINK_BUFFER);
    let (in_tx, in_rx) = mpsc::channel(LINK_BUFFER);

    tokio::spawn(write_loop(writer, out_rx, max_frame_size));
    tokio::spawn(read_loop(reader, in_tx, max_frame_size));

    RawLink {
        local: Candidate::new(CandidateKind::Host, local_addr.to_string()),
        remote: Candidate::new(CandidateKind::Host, peer_addr.to_string()),
        outbound: out_tx,
        inbound: in_rx,
    }
}

async fn write_loop(mut writer: OwnedWriteHalf, mut out_rx: mpsc::Receiver<Vec<u8>>, max: usize) {
    while let Some(frame) = out_rx.recv().await {
        if frame.len() > max {
            warn!(size = frame.len(), max, "Refusing to write oversized frame");
            continue;
        }
        if let Err(e) = write_frame(&mut writer, &frame).await {
            debug!(error = %e, "TCP write failed");
            break;
        }
    }
    let _ = writer.shutdown().await;
}

async fn read_loop(mut reader: OwnedReadHalf, in_tx: mpsc::Sender<Vec<u8>>, max: usize) {
    loop {
        match read_frame(&mut reader, max).await {
            Ok(Some(frame)) => {
                if in_tx.send(frame).await.is_err() {
                    break;
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!(error = %e, "TCP read failed");
                break;
            }
        }
    }
}

/// Write one length-prefixed frame
pub async fn write_frame<W>(writer: &mut W, frame: &[u8]) -> TransportResult<()>
where
    W: AsyncWrite + Unpin,
{
    let len = u32::try_from(frame.len()).map_err(|_| TransportError::FrameTooLarge {
        size: frame.len(),
        max: u32::MAX as usize,
    })?;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame; `Ok(None)` on clean EOF
pub async fn read_frame<R>(reader: &mut R, max: usize) -> TransportResult<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > max {
        return Err(TransportError::FrameTooLarge { size: len, max });
    }
    let mut frame = vec![0u8; len];
    reader.read_exact(&mut frame).await?;
    Ok(Some(frame))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::time::timeout;

    #[tokio::test]
    async fn test_frame_codec() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, b"hello").await.unwrap();
        write_frame(&mut client, b"").await.unwrap();
        drop(client);

        assert_eq!(read_frame(&mut server, 64).await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(read_frame(&mut server, 64).await.unwrap(), Some(Vec::new()));
        assert_eq!(read_frame(&mut server, 64).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        write_frame(&mut client, &[0u8; 100]).await.unwrap();
        assert_eq!(
            read_frame(&mut server, 10).await,
            Err(TransportError::FrameTooLarge { size: 100, max: 10 })
        );
    }

    #[tokio::test]
    async fn test_tcp_links_exchange_frames() {
        let a = TcpDriver::bind("127.0.0.1:0", 1024).await.unwrap();
        let b = TcpDriver::bind("127.0.0.1:0", 1024).await.unwrap();
        let target = b.local_candidates().remove(0);

        let mut a_link = a.dial(&target).await.unwrap();
        let mut b_link = timeout(Duration::from_secs(2), b.accept()).await.unwrap().unwrap();

        a_link.outbound.send(b"over tcp".to_vec()).await.unwrap();
        let got = timeout(Duration::from_secs(2), b_link.inbound.recv()).await.unwrap();
        assert_eq!(got.unwrap(), b"over tcp");

        b_link.outbound.send(b"reply".to_vec()).await.unwrap();
        let got = timeout(Duration::from_secs(2), a_link.inbound.recv()).await.unwrap();
        assert_eq!(got.unwrap(), b"reply");

        drop(a_link);
        let closed = timeout(Duration::from_secs(2), b_link.inbound.recv()).await.unwrap();
        assert!(closed.is_none());
    }

    #[tokio::test]
    async fn test_bind_invalid_address() {
        assert!(TcpDriver::bind("invalid:address", 1024).await.is_err());
    }
}
