//! One task per peer. A peer owns its socket, its bounded send queue, and
//! its known-hash LRU; nothing here is shared between peers.

use std::net::SocketAddr;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use lru::LruCache;
use neorex_common::types::UInt256;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::error::NetworkError;
use crate::message::{Message, PAYLOAD_MAX_SIZE};
use crate::payloads::{NodeCapability, VersionPayload};

/// Outbound messages queued per peer; overflow disconnects.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Per-peer duplicate-suppression window.
pub const KNOWN_HASHES_CAPACITY: usize = 1024;

/// Deadline on any single socket read or write.
pub const IO_DEADLINE: Duration = Duration::from_secs(30);

/// Deadline for the whole version/verack exchange.
pub const HANDSHAKE_DEADLINE: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Shared handle to a connected, handshaken peer.
pub struct PeerHandle {
    pub addr: SocketAddr,
    pub direction: Direction,
    pub user_agent: String,
    pub nonce: u32,
    pub compression_disabled: bool,
    last_known_height: AtomicU32,
    sender: mpsc::Sender<Message>,
    known_hashes: Mutex<LruCache<UInt256, ()>>,
}

impl std::fmt::Debug for PeerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerHandle")
            .field("addr", &self.addr)
            .field("direction", &self.direction)
            .field("height", &self.last_known_height.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}

impl PeerHandle {
    pub fn new(
        addr: SocketAddr,
        direction: Direction,
        version: &VersionPayload,
        sender: mpsc::Sender<Message>,
    ) -> Self {
        #[allow(clippy::unwrap_used)]
        let capacity = NonZeroUsize::new(KNOWN_HASHES_CAPACITY).unwrap();
        Self {
            addr,
            direction,
            user_agent: version.user_agent.clone(),
            nonce: version.nonce,
            compression_disabled: version.compression_disabled(),
            last_known_height: AtomicU32::new(version.start_height().unwrap_or(0)),
            sender,
            known_hashes: Mutex::new(LruCache::new(capacity)),
        }
    }

    pub fn last_known_height(&self) -> u32 {
        self.last_known_height.load(Ordering::Relaxed)
    }

    pub fn update_height(&self, height: u32) {
        self.last_known_height.fetch_max(height, Ordering::Relaxed);
    }

    /// Non-blocking enqueue; a full queue is the backpressure signal to
    /// drop the peer.
    pub fn try_send(&self, message: Message) -> Result<(), NetworkError> {
        self.sender
            .try_send(message)
            .map_err(|_| NetworkError::SendQueueFull)
    }

    /// Records that the peer knows `hash`; returns false if it already did.
    pub fn mark_known(&self, hash: UInt256) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut cache = self.known_hashes.lock().unwrap();
        cache.put(hash, ()).is_none()
    }

    pub fn is_known(&self, hash: &UInt256) -> bool {
        #[allow(clippy::unwrap_used)]
        let mut cache = self.known_hashes.lock().unwrap();
        cache.get(hash).is_some()
    }
}

/// Raw frame envelope as read off the socket.
pub struct RawFrame {
    pub flags: u8,
    pub command: u8,
    pub payload: Vec<u8>,
}

/// Reads one complete frame with the IO deadline applied to every await.
pub async fn read_frame(stream: &mut OwnedReadHalf) -> Result<RawFrame, NetworkError> {
    let mut head = [0u8; 2];
    read_exact(stream, &mut head).await?;
    let (flags, command) = (head[0], head[1]);

    let mut marker = [0u8; 1];
    read_exact(stream, &mut marker).await?;
    let length = match marker[0] {
        len @ 0x00..=0xfc => u64::from(len),
        0xfd => {
            let mut bytes = [0u8; 2];
            read_exact(stream, &mut bytes).await?;
            u64::from(u16::from_le_bytes(bytes))
        }
        0xfe => {
            let mut bytes = [0u8; 4];
            read_exact(stream, &mut bytes).await?;
            u64::from(u32::from_le_bytes(bytes))
        }
        0xff => {
            let mut bytes = [0u8; 8];
            read_exact(stream, &mut bytes).await?;
            u64::from_le_bytes(bytes)
        }
    };
    if length > PAYLOAD_MAX_SIZE as u64 {
        return Err(NetworkError::OversizeFrame {
            cap: PAYLOAD_MAX_SIZE,
        });
    }
    let mut payload = vec![0u8; length as usize];
    read_exact(stream, &mut payload).await?;
    Ok(RawFrame {
        flags,
        command,
        payload,
    })
}

async fn read_exact(stream: &mut OwnedReadHalf, buf: &mut [u8]) -> Result<(), NetworkError> {
    match timeout(IO_DEADLINE, stream.read_exact(buf)).await {
        Ok(Ok(_)) => Ok(()),
        Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            Err(NetworkError::ConnectionClosed)
        }
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(NetworkError::Timeout),
    }
}

pub async fn write_frame(
    stream: &mut OwnedWriteHalf,
    message: &Message,
    allow_compression: bool,
) -> Result<(), NetworkError> {
    let frame = message.to_frame(allow_compression);
    match timeout(IO_DEADLINE, stream.write_all(&frame)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(NetworkError::Timeout),
    }
}

/// Drains a peer's send queue onto its socket until the channel closes or
/// a write fails.
pub async fn writer_loop(
    mut stream: OwnedWriteHalf,
    mut queue: mpsc::Receiver<Message>,
    allow_compression: bool,
) {
    while let Some(message) = queue.recv().await {
        trace!(command = ?message.command(), "sending");
        if let Err(error) = write_frame(&mut stream, &message, allow_compression).await {
            debug!(%error, "peer write failed, dropping writer");
            break;
        }
    }
}

/// Runs the version/verack exchange on a fresh connection and returns the
/// remote's version payload. A peer is usable only after this completes.
pub async fn handshake(
    stream: &mut TcpStream,
    local_version: &VersionPayload,
) -> Result<VersionPayload, NetworkError> {
    let deadline = tokio::time::Instant::now() + HANDSHAKE_DEADLINE;

    let version_frame = Message::Version(local_version.clone()).to_frame(false);
    timed(deadline, stream.write_all(&version_frame)).await??;

    let remote_version = match read_handshake_message(stream, deadline).await? {
        Message::Version(payload) => payload,
        other => {
            return Err(NetworkError::Handshake(format!(
                "expected version, got {:?}",
                other.command()
            )))
        }
    };
    if remote_version.magic != local_version.magic {
        return Err(NetworkError::MagicMismatch {
            expected: local_version.magic,
            got: remote_version.magic,
        });
    }
    if remote_version.nonce == local_version.nonce {
        return Err(NetworkError::SelfConnection);
    }

    let verack_frame = Message::Verack.to_frame(false);
    timed(deadline, stream.write_all(&verack_frame)).await??;

    match read_handshake_message(stream, deadline).await? {
        Message::Verack => Ok(remote_version),
        other => Err(NetworkError::Handshake(format!(
            "expected verack, got {:?}",
            other.command()
        ))),
    }
}

async fn read_handshake_message(
    stream: &mut TcpStream,
    deadline: tokio::time::Instant,
) -> Result<Message, NetworkError> {
    let mut head = [0u8; 3];
    timed(deadline, stream.read_exact(&mut head)).await??;
    let (flags, command, marker) = (head[0], head[1], head[2]);
    let length = match marker {
        len @ 0x00..=0xfc => u64::from(len),
        0xfd => {
            let mut bytes = [0u8; 2];
            timed(deadline, stream.read_exact(&mut bytes)).await??;
            u64::from(u16::from_le_bytes(bytes))
        }
        _ => {
            // No handshake payload is remotely that large.
            return Err(NetworkError::Handshake("oversize handshake frame".into()));
        }
    };
    if length > 4_096 {
        return Err(NetworkError::Handshake("oversize handshake frame".into()));
    }
    let mut payload = vec![0u8; length as usize];
    timed(deadline, stream.read_exact(&mut payload)).await??;
    Message::from_parts(flags, command, payload)
}

async fn timed<T, E>(
    deadline: tokio::time::Instant,
    future: impl std::future::Future<Output = Result<T, E>>,
) -> Result<Result<T, NetworkError>, NetworkError>
where
    E: Into<std::io::Error>,
{
    match tokio::time::timeout_at(deadline, future).await {
        Ok(result) => Ok(result.map_err(|e| NetworkError::Io(e.into()))),
        Err(_) => Err(NetworkError::Timeout),
    }
}

/// Our own version payload for new connections.
pub fn local_version(
    magic: u32,
    nonce: u32,
    user_agent: &str,
    listen_port: Option<u16>,
    start_height: u32,
) -> VersionPayload {
    let mut capabilities = vec![NodeCapability::FullNode { start_height }];
    if let Some(port) = listen_port {
        capabilities.push(NodeCapability::TcpServer { port });
    }
    VersionPayload {
        magic,
        version: 0,
        timestamp: std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0),
        nonce,
        user_agent: user_agent.to_string(),
        capabilities,
    }
}
