use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;

use base64::Engine;
use serde::Deserialize;

use crate::crypto::{SealingKey, KEY_LEN};
use crate::error::{CoreError, Result};
use crate::mapping::{ipv4_key, Mapping};

#[derive(Debug, Deserialize, Clone)]
pub struct PeerConfig {
    pub overlay_ip: Ipv4Addr,
    pub public_addr: SocketAddr,
    #[serde(default)]
    pub key: Option<String>,
    #[serde(default)]
    pub unencrypted: bool,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub listen: SocketAddr,
    pub overlay_ip: Ipv4Addr,
    #[serde(default = "default_device_name")]
    pub device_name: String,
    #[serde(default)]
    pub queues: Option<usize>,
    #[serde(default)]
    pub peers: Vec<PeerConfig>,
}

fn default_device_name() -> String {
    "overlay0".to_string()
}

impl Config {
    /// Resolves the configured queue count, defaulting to the host's
    /// available parallelism.
    pub fn queue_count(&self) -> usize {
        self.queues.unwrap_or_else(|| std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1))
    }

    /// Builds the mapping records this config's peer table describes.
    pub fn mappings(&self) -> Result<Vec<Mapping>> {
        self.peers.iter().map(peer_to_mapping).collect()
    }
}

fn peer_to_mapping(peer: &PeerConfig) -> Result<Mapping> {
    let cipher = if peer.unencrypted {
        None
    } else {
        let encoded = peer
            .key
            .as_ref()
            .ok_or_else(|| CoreError::InvalidKey(format!("peer {} has no key and is not unencrypted", peer.overlay_ip)))?;
        let raw = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .map_err(|e| CoreError::InvalidKey(e.to_string()))?;
        if raw.len() != KEY_LEN {
            return Err(CoreError::InvalidKey(format!("key for {} must decode to {KEY_LEN} bytes, got {}", peer.overlay_ip, raw.len())));
        }
        Some(std::sync::Arc::new(SealingKey::new(&raw).map_err(|e| CoreError::InvalidKey(e.to_string()))?))
    };
    Ok(Mapping { overlay_ipv4: ipv4_key(peer.overlay_ip.octets()), public_addr: peer.public_addr, cipher })
}

pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Config> {
    let text = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&text).map_err(|e| CoreError::Config(e.to_string()))?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &Config) -> Result<()> {
    if config.peers.is_empty() {
        return Err(CoreError::NoPeers);
    }
    if config.overlay_ip.is_unspecified() {
        return Err(CoreError::InvalidOverlayIp(config.overlay_ip.to_string()));
    }
    config.mappings().map(|_| ())
}
