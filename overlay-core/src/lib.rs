#![forbid(unsafe_code)]

pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod mapping;
pub mod payload;
pub mod pipeline;
pub mod socket;
pub mod stats;
pub mod supervisor;
pub mod telemetry;

pub use config::{load_from_path, Config, PeerConfig};
pub use crypto::{CryptoError, SealingKey};
pub use device::{Device, MockDevice, TunDevice};
pub use error::{CoreError, Result};
pub use mapping::{ipv4_key, ArcSwapMappingStore, Mapping, MappingStore};
pub use payload::Payload;
pub use socket::{MockSocket, Socket, UdpTransport};
pub use stats::{Aggregator, Direction, StatEvent, Stats, StatsHandle};
pub use supervisor::{run, run_with_metrics, Handle};
pub use telemetry::{init_metrics, Metrics};
