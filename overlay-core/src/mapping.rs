use std::net::SocketAddr;
use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::crypto::SealingKey;

/// One configured peer: where to send its packets and how to protect them.
#[derive(Clone)]
pub struct Mapping {
    pub overlay_ipv4: u32,
    pub public_addr: SocketAddr,
    pub cipher: Option<Arc<SealingKey>>,
}

impl Mapping {
    pub fn unencrypted(&self) -> bool {
        self.cipher.is_none()
    }
}

/// Little-endian u32 encoding of an overlay IPv4 address, the lookup key
/// convention shared with the wire peers this daemon talks to.
pub fn ipv4_key(octets: [u8; 4]) -> u32 {
    u32::from_le_bytes(octets)
}

/// Lookup surface the pipelines depend on; `ArcSwapMappingStore` is the only
/// implementation, but the trait keeps pipeline code test-mockable.
pub trait MappingStore: Send + Sync {
    fn lookup(&self, overlay_ipv4: u32) -> Option<Mapping>;
}

type Table = std::collections::HashMap<u32, Mapping, ahash::RandomState>;

/// RCU-style mapping table: readers never block, writers install a whole new
/// snapshot atomically.
pub struct ArcSwapMappingStore {
    inner: ArcSwap<Table>,
}

impl ArcSwapMappingStore {
    pub fn new(mappings: Vec<Mapping>) -> Self {
        let table = Self::build_table(mappings);
        Self { inner: ArcSwap::from_pointee(table) }
    }

    fn build_table(mappings: Vec<Mapping>) -> Table {
        let mut table = Table::default();
        for mapping in mappings {
            table.insert(mapping.overlay_ipv4, mapping);
        }
        table
    }

    /// Atomically replaces the entire table with a fresh snapshot.
    pub fn replace(&self, mappings: Vec<Mapping>) {
        self.inner.store(Arc::new(Self::build_table(mappings)));
    }

    pub fn len(&self) -> usize {
        self.inner.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl MappingStore for ArcSwapMappingStore {
    fn lookup(&self, overlay_ipv4: u32) -> Option<Mapping> {
        self.inner.load().get(&overlay_ipv4).cloned()
    }
}
