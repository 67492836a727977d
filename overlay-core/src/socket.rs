use std::net::SocketAddr;

use socket2::{Domain, Socket as Socket2, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{CoreError, Result};

/// A multi-queue UDP transport. `UdpTransport` is the real provider;
/// `MockSocket` stands in for it in tests.
pub trait Socket: Send + Sync {
    fn queue_count(&self) -> usize;

    /// Blocks until one datagram arrives on queue `q`, writing it into `buf`
    /// starting at offset 0. Returns the datagram length, or `None` on I/O
    /// error.
    fn read(
        &self,
        q: usize,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = Option<usize>> + Send;

    /// Sends `datagram` to `dest` on queue `q`. Returns `false` on error.
    fn write(
        &self,
        q: usize,
        dest: SocketAddr,
        datagram: &[u8],
    ) -> impl std::future::Future<Output = bool> + Send;
}

/// N independently-bound UDP sockets sharing one local address via
/// `SO_REUSEPORT`, so each queue's reads progress without contention.
pub struct UdpTransport {
    queues: Vec<UdpSocket>,
}

impl UdpTransport {
    pub fn bind(addr: SocketAddr, queue_count: usize) -> Result<Self> {
        if queue_count == 0 {
            return Err(CoreError::Config("queue_count must be >= 1".into()));
        }
        let mut queues = Vec::with_capacity(queue_count);
        for _ in 0..queue_count {
            let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
            let sock = Socket2::new(domain, Type::DGRAM, None)?;
            sock.set_reuse_address(true)?;
            #[cfg(unix)]
            sock.set_reuse_port(true)?;
            sock.set_nonblocking(true)?;
            sock.bind(&addr.into())?;
            let std_sock: std::net::UdpSocket = sock.into();
            queues.push(UdpSocket::from_std(std_sock)?);
        }
        Ok(Self { queues })
    }
}

impl Socket for UdpTransport {
    fn queue_count(&self) -> usize {
        self.queues.len()
    }

    async fn read(&self, q: usize, buf: &mut [u8]) -> Option<usize> {
        match self.queues[q].recv_from(buf).await {
            Ok((n, _from)) => Some(n),
            Err(e) => {
                warn!(queue = q, error = %e, "udp read failed");
                None
            }
        }
    }

    async fn write(&self, q: usize, dest: SocketAddr, datagram: &[u8]) -> bool {
        self.queues[q].send_to(datagram, dest).await.is_ok()
    }
}

/// An in-memory transport for tests: each queue reads from an inbound mpsc
/// channel and records outbound writes as `(dest, datagram)` pairs.
pub struct MockSocket {
    inbound: Vec<tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>>,
    outbound: Vec<mpsc::Sender<(SocketAddr, Vec<u8>)>>,
}

pub struct MockSocketHandle {
    pub inbound_tx: Vec<mpsc::Sender<Vec<u8>>>,
    pub outbound_rx: Vec<mpsc::Receiver<(SocketAddr, Vec<u8>)>>,
}

impl MockSocket {
    pub fn new(queue_count: usize) -> (Self, MockSocketHandle) {
        let mut inbound = Vec::with_capacity(queue_count);
        let mut inbound_tx = Vec::with_capacity(queue_count);
        let mut outbound = Vec::with_capacity(queue_count);
        let mut outbound_rx = Vec::with_capacity(queue_count);
        for _ in 0..queue_count {
            let (tx, rx) = mpsc::channel(64);
            inbound.push(tokio::sync::Mutex::new(rx));
            inbound_tx.push(tx);
            let (tx, rx) = mpsc::channel(64);
            outbound.push(tx);
            outbound_rx.push(rx);
        }
        (Self { inbound, outbound }, MockSocketHandle { inbound_tx, outbound_rx })
    }
}

impl Socket for MockSocket {
    fn queue_count(&self) -> usize {
        self.inbound.len()
    }

    async fn read(&self, q: usize, buf: &mut [u8]) -> Option<usize> {
        let mut rx = self.inbound[q].lock().await;
        let datagram = rx.recv().await?;
        if datagram.len() > buf.len() {
            return None;
        }
        buf[..datagram.len()].copy_from_slice(&datagram);
        Some(datagram.len())
    }

    async fn write(&self, q: usize, dest: SocketAddr, datagram: &[u8]) -> bool {
        self.outbound[q].send((dest, datagram.to_vec())).await.is_ok()
    }
}
