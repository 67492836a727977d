use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::warn;

use crate::error::{CoreError, Result};

/// A multi-queue packet source/sink. `TunDevice` is the real provider;
/// `MockDevice` stands in for it in tests. The pipeline only ever talks to
/// this trait, never to a concrete backend.
pub trait Device: Send + Sync {
    /// Number of independently-readable queues this device exposes.
    fn queue_count(&self) -> usize;

    /// Blocks until one IP packet is available on queue `q`, writing it into
    /// `buf` starting at offset `crate::payload::HEADER_SIZE`. Returns the
    /// packet length, or `None` on I/O error (never panics).
    fn read(
        &self,
        q: usize,
        buf: &mut [u8],
    ) -> impl std::future::Future<Output = Option<usize>> + Send;

    /// Writes `packet` to queue `q`. Returns `false` on error.
    fn write(&self, q: usize, packet: &[u8]) -> impl std::future::Future<Output = bool> + Send;
}

/// A real multi-queue TUN interface, one `tun::AsyncDevice` per queue index
/// opened against the same interface name with the multi-queue flag set.
pub struct TunDevice {
    queues: Vec<tokio::sync::Mutex<tun::AsyncDevice>>,
}

impl TunDevice {
    pub fn open(name: &str, overlay_ip: std::net::Ipv4Addr, queue_count: usize) -> Result<Self> {
        if queue_count == 0 {
            return Err(CoreError::Config("queue_count must be >= 1".into()));
        }
        let mut queues = Vec::with_capacity(queue_count);
        for _ in 0..queue_count {
            let mut config = tun::Configuration::default();
            config.name(name).address(overlay_ip).netmask((255, 255, 255, 0)).up();
            #[cfg(target_os = "linux")]
            config.platform(|platform| {
                platform.packet_information(false);
            });
            let dev = tun::create_as_async(&config).map_err(|e| CoreError::Io(std::io::Error::other(e)))?;
            queues.push(tokio::sync::Mutex::new(dev));
        }
        Ok(Self { queues })
    }
}

impl Device for TunDevice {
    fn queue_count(&self) -> usize {
        self.queues.len()
    }

    async fn read(&self, q: usize, buf: &mut [u8]) -> Option<usize> {
        let mut dev = self.queues[q].lock().await;
        match dev.read(buf).await {
            Ok(n) => Some(n),
            Err(e) => {
                warn!(queue = q, error = %e, "tun read failed");
                None
            }
        }
    }

    async fn write(&self, q: usize, packet: &[u8]) -> bool {
        let mut dev = self.queues[q].lock().await;
        dev.write_all(packet).await.is_ok()
    }
}

/// An in-memory device for tests: each queue is a pair of mpsc channels so
/// tests can inject device reads and observe device writes.
pub struct MockDevice {
    inbound: Vec<tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>>,
    outbound: Vec<mpsc::Sender<Vec<u8>>>,
}

pub struct MockDeviceHandle {
    pub inbound_tx: Vec<mpsc::Sender<Vec<u8>>>,
    pub outbound_rx: Vec<mpsc::Receiver<Vec<u8>>>,
}

impl MockDevice {
    pub fn new(queue_count: usize) -> (Self, MockDeviceHandle) {
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
        (Self { inbound, outbound }, MockDeviceHandle { inbound_tx, outbound_rx })
    }
}

impl Device for MockDevice {
    fn queue_count(&self) -> usize {
        self.inbound.len()
    }

    async fn read(&self, q: usize, buf: &mut [u8]) -> Option<usize> {
        let mut rx = self.inbound[q].lock().await;
        let packet = rx.recv().await?;
        if packet.len() > buf.len() {
            return None;
        }
        buf[..packet.len()].copy_from_slice(&packet);
        Some(packet.len())
    }

    async fn write(&self, q: usize, packet: &[u8]) -> bool {
        self.outbound[q].send(packet.to_vec()).await.is_ok()
    }
}
