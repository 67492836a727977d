use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::device::Device;
use crate::mapping::MappingStore;
use crate::pipeline::{run_incoming_worker, run_outgoing_worker};
use crate::socket::Socket;
use crate::stats::{Aggregator, Stats};

/// Owns the running data plane. Dropping a `Handle` does not stop the
/// workers; call `shutdown` and `join` explicitly.
pub struct Handle {
    shutdown_tx: watch::Sender<bool>,
    workers: Vec<JoinHandle<()>>,
    aggregator: JoinHandle<()>,
    stats: Arc<Stats>,
}

impl Handle {
    pub fn stats(&self) -> Arc<Stats> {
        self.stats.clone()
    }

    /// Broadcasts the stop signal. Workers finish their in-flight packet and
    /// return; this does not wait for them (see `join`).
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Waits for every worker and the aggregator to finish. Call `shutdown`
    /// first, or this blocks until the device/socket are closed externally.
    pub async fn join(self) {
        for worker in self.workers {
            let _ = worker.await;
        }
        let _ = self.aggregator.await;
    }
}

/// Starts N outgoing workers, N incoming workers, and the aggregator
/// consumer, where N is `device.queue_count()` (device and socket must agree
/// on queue count; `run` panics if they don't, since that indicates a
/// misconfigured pair of providers rather than a runtime condition).
pub fn run<D, S, M>(device: Arc<D>, socket: Arc<S>, store: Arc<M>, own_overlay_ipv4: [u8; 4]) -> Handle
where
    D: Device + 'static,
    S: Socket + 'static,
    M: MappingStore + 'static,
{
    run_with_metrics(device, socket, store, own_overlay_ipv4, None)
}

/// Like `run`, but also folds every stat event into `metrics`' OTel counters.
pub fn run_with_metrics<D, S, M>(
    device: Arc<D>,
    socket: Arc<S>,
    store: Arc<M>,
    own_overlay_ipv4: [u8; 4],
    metrics: Option<Arc<crate::telemetry::Metrics>>,
) -> Handle
where
    D: Device + 'static,
    S: Socket + 'static,
    M: MappingStore + 'static,
{
    let n = device.queue_count();
    assert_eq!(n, socket.queue_count(), "device and socket queue counts must match");

    let mut aggregator = Aggregator::new(n);
    if let Some(metrics) = metrics {
        aggregator = aggregator.with_metrics(metrics);
    }
    let stats = aggregator.stats();
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = Vec::with_capacity(2 * n);
    for q in 0..n {
        let (device, socket, store, handle, shutdown) =
            (device.clone(), socket.clone(), store.clone(), aggregator.handle(), shutdown_rx.clone());
        workers.push(tokio::spawn(async move {
            run_outgoing_worker(q, &*device, &*socket, &*store, own_overlay_ipv4, handle, shutdown).await;
        }));
    }
    for q in 0..n {
        let (device, socket, store, handle, shutdown) =
            (device.clone(), socket.clone(), store.clone(), aggregator.handle(), shutdown_rx.clone());
        workers.push(tokio::spawn(async move {
            run_incoming_worker(q, &*device, &*socket, &*store, handle, shutdown).await;
        }));
    }

    let aggregator_task = tokio::spawn(aggregator.run());

    Handle { shutdown_tx, workers, aggregator: aggregator_task, stats }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::MockDevice;
    use crate::mapping::{ipv4_key, ArcSwapMappingStore, Mapping};
    use crate::socket::MockSocket;
    use std::net::SocketAddr;

    #[tokio::test]
    async fn shutdown_drains_in_flight_work_and_joins() {
        let (device, mut device_handle) = MockDevice::new(1);
        let (socket, mut socket_handle) = MockSocket::new(1);
        let peer = Mapping {
            overlay_ipv4: ipv4_key([10, 8, 0, 1]),
            public_addr: "127.0.0.1:9000".parse::<SocketAddr>().unwrap(),
            cipher: None,
        };
        let store = Arc::new(ArcSwapMappingStore::new(vec![peer]));

        let handle = run(Arc::new(device), Arc::new(socket), store, [10, 1, 1, 1]);

        let mut packet = vec![0u8; 20];
        packet[16] = 10;
        packet[17] = 8;
        packet[18] = 0;
        packet[19] = 1;
        device_handle.inbound_tx[0].send(packet).await.unwrap();

        let (_dest, _datagram) = socket_handle.outbound_rx[0].recv().await.unwrap();

        handle.shutdown();
        handle.join().await;
    }
}
