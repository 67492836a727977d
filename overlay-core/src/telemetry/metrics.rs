use opentelemetry::global;
use opentelemetry::metrics::{Counter, Meter};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use prometheus::Registry;
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    pub rx_packets_total: Counter<u64>,
    pub rx_bytes_total: Counter<u64>,
    pub rx_dropped_packets_total: Counter<u64>,
    pub rx_dropped_bytes_total: Counter<u64>,

    pub tx_packets_total: Counter<u64>,
    pub tx_bytes_total: Counter<u64>,
    pub tx_dropped_packets_total: Counter<u64>,
    pub tx_dropped_bytes_total: Counter<u64>,

    pub stat_channel_overflow_total: Counter<u64>,
}

impl Metrics {
    fn new(meter: Meter) -> Self {
        Self {
            rx_packets_total: meter
                .u64_counter("overlay_rx_packets_total")
                .with_description("Total packets received from peers and injected into the device")
                .build(),
            rx_bytes_total: meter
                .u64_counter("overlay_rx_bytes_total")
                .with_description("Total bytes received from peers and injected into the device")
                .build(),
            rx_dropped_packets_total: meter
                .u64_counter("overlay_rx_dropped_packets_total")
                .with_description("Total inbound packets dropped (unknown peer, malformed, failed auth, or write error)")
                .build(),
            rx_dropped_bytes_total: meter
                .u64_counter("overlay_rx_dropped_bytes_total")
                .with_description("Total bytes of inbound packets dropped")
                .build(),

            tx_packets_total: meter
                .u64_counter("overlay_tx_packets_total")
                .with_description("Total packets read from the device and sent to peers")
                .build(),
            tx_bytes_total: meter
                .u64_counter("overlay_tx_bytes_total")
                .with_description("Total bytes read from the device and sent to peers")
                .build(),
            tx_dropped_packets_total: meter
                .u64_counter("overlay_tx_dropped_packets_total")
                .with_description("Total outbound packets dropped (unknown peer, seal failure, or write error)")
                .build(),
            tx_dropped_bytes_total: meter
                .u64_counter("overlay_tx_dropped_bytes_total")
                .with_description("Total bytes of outbound packets dropped")
                .build(),

            stat_channel_overflow_total: meter
                .u64_counter("overlay_stat_channel_overflow_total")
                .with_description("Total stat events dropped because the aggregator channel was full")
                .build(),
        }
    }

    /// Folds one `StatEvent` into the OTel counters, mirroring the fold the
    /// in-process `Stats` tree performs.
    pub fn record(&self, event: &crate::stats::StatEvent) {
        use crate::stats::Direction;
        let (packets, bytes, dropped_packets, dropped_bytes) = match event.direction {
            Direction::Rx => (&self.rx_packets_total, &self.rx_bytes_total, &self.rx_dropped_packets_total, &self.rx_dropped_bytes_total),
            Direction::Tx => (&self.tx_packets_total, &self.tx_bytes_total, &self.tx_dropped_packets_total, &self.tx_dropped_bytes_total),
        };
        if event.dropped {
            dropped_packets.add(1, &[]);
            dropped_bytes.add(event.bytes as u64, &[]);
        } else {
            packets.add(1, &[]);
            bytes.add(event.bytes as u64, &[]);
        }
    }
}

pub fn init_metrics() -> Result<(Arc<Metrics>, Registry), Box<dyn std::error::Error + Send + Sync>> {
    let registry = Registry::default();

    let exporter = opentelemetry_prometheus::exporter().with_registry(registry.clone()).build()?;
    let meter_provider = SdkMeterProvider::builder().with_reader(exporter).build();
    global::set_meter_provider(meter_provider);

    let meter = global::meter("overlayd");
    let metrics = Arc::new(Metrics::new(meter));

    Ok((metrics, registry))
}
