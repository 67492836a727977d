use std::collections::HashMap;
use std::sync::Mutex;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

/// Capacity of the stat event channel. Producers use `try_send`; a full
/// channel increments `overflow` rather than blocking a pipeline worker.
pub const CHANNEL_CAPACITY: usize = 1_048_576;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    Rx,
    Tx,
}

/// Emitted once per packet as it leaves a pipeline stage.
#[derive(Clone, Debug)]
pub struct StatEvent {
    pub direction: Direction,
    pub queue_index: usize,
    pub bytes: usize,
    pub dropped: bool,
    pub peer_overlay_ipv4: Option<u32>,
}

#[derive(Clone, Default, Serialize)]
pub struct Counters {
    #[serde(rename = "Packets")]
    pub packets: u64,
    #[serde(rename = "Bytes")]
    pub bytes: u64,
    #[serde(rename = "DroppedPackets")]
    pub dropped_packets: u64,
    #[serde(rename = "DroppedBytes")]
    pub dropped_bytes: u64,
}

impl Counters {
    fn apply(&mut self, bytes: usize, dropped: bool) {
        if dropped {
            self.dropped_packets += 1;
            self.dropped_bytes += bytes as u64;
        } else {
            self.packets += 1;
            self.bytes += bytes as u64;
        }
    }
}

#[derive(Clone, Serialize)]
pub struct DirectionStats {
    #[serde(flatten)]
    pub total: Counters,
    #[serde(rename = "Queues")]
    pub queues: Vec<Counters>,
    #[serde(rename = "Links")]
    pub links: HashMap<String, Counters>,
}

impl DirectionStats {
    fn new(queue_count: usize) -> Self {
        Self { total: Counters::default(), queues: vec![Counters::default(); queue_count], links: HashMap::new() }
    }

    fn apply(&mut self, queue_index: usize, bytes: usize, dropped: bool, peer: Option<u32>) {
        self.total.apply(bytes, dropped);
        self.queues[queue_index].apply(bytes, dropped);
        if let Some(ip) = peer {
            self.links.entry(ipv4_to_string(ip)).or_default().apply(bytes, dropped);
        }
    }
}

fn ipv4_to_string(key: u32) -> String {
    let octets = key.to_le_bytes();
    format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
}

struct StatsInner {
    rx: DirectionStats,
    tx: DirectionStats,
    overflow: u64,
}

/// Live statistics tree. Owned by the aggregator's consumer task; snapshots
/// are taken by copying the whole tree under a mutex, acceptable given the
/// low snapshot rate relative to the packet rate.
pub struct Stats {
    inner: Mutex<StatsInner>,
}

#[derive(Serialize)]
pub struct StatsSnapshot {
    #[serde(rename = "RxStats")]
    pub rx_stats: DirectionStats,
    #[serde(rename = "TxStats")]
    pub tx_stats: DirectionStats,
}

impl Stats {
    pub fn new(queue_count: usize) -> Self {
        Self {
            inner: Mutex::new(StatsInner {
                rx: DirectionStats::new(queue_count),
                tx: DirectionStats::new(queue_count),
                overflow: 0,
            }),
        }
    }

    fn apply(&self, event: &StatEvent) {
        let mut inner = self.inner.lock().expect("stats mutex poisoned");
        let stats = match event.direction {
            Direction::Rx => &mut inner.rx,
            Direction::Tx => &mut inner.tx,
        };
        stats.apply(event.queue_index, event.bytes, event.dropped, event.peer_overlay_ipv4);
    }

    fn record_overflow(&self) {
        self.inner.lock().expect("stats mutex poisoned").overflow += 1;
    }

    pub fn overflow_count(&self) -> u64 {
        self.inner.lock().expect("stats mutex poisoned").overflow
    }

    /// Point-in-time copy of the whole tree, consistent within each
    /// direction's totals since it is taken under one mutex acquisition.
    pub fn to_snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock().expect("stats mutex poisoned");
        StatsSnapshot { rx_stats: inner.rx.clone(), tx_stats: inner.tx.clone() }
    }

    pub fn snapshot_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.to_snapshot())
    }
}

/// Handle pipeline workers use to report packet outcomes. Cheap to clone;
/// `try_send` never blocks the data plane.
#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::Sender<StatEvent>,
    stats: std::sync::Arc<Stats>,
}

impl StatsHandle {
    pub fn report(&self, event: StatEvent) {
        if self.tx.try_send(event).is_err() {
            self.stats.record_overflow();
            warn!("stat event channel full, dropping event");
        }
    }
}

/// Owns the consumer task that folds events into the live `Stats` tree.
pub struct Aggregator {
    stats: std::sync::Arc<Stats>,
    tx: mpsc::Sender<StatEvent>,
    rx: Option<mpsc::Receiver<StatEvent>>,
    metrics: Option<std::sync::Arc<crate::telemetry::Metrics>>,
}

impl Aggregator {
    pub fn new(queue_count: usize) -> Self {
        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        Self { stats: std::sync::Arc::new(Stats::new(queue_count)), tx, rx: Some(rx), metrics: None }
    }

    /// Also folds every event into the OTel counters in `metrics`.
    pub fn with_metrics(mut self, metrics: std::sync::Arc<crate::telemetry::Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn handle(&self) -> StatsHandle {
        StatsHandle { tx: self.tx.clone(), stats: self.stats.clone() }
    }

    pub fn stats(&self) -> std::sync::Arc<Stats> {
        self.stats.clone()
    }

    /// Runs the single consumer loop until the channel is closed (every
    /// `StatsHandle` and the aggregator's own sender half dropped), draining
    /// whatever is already queued before returning.
    pub async fn run(mut self) {
        let mut rx = self.rx.take().expect("Aggregator::run called twice");
        drop(self.tx);
        while let Some(event) = rx.recv().await {
            self.stats.apply(&event);
            if let Some(metrics) = &self.metrics {
                metrics.record(&event);
            }
        }
    }
}
