use tokio::sync::watch;
use tracing::warn;

use crate::device::Device;
use crate::mapping::{ipv4_key, MappingStore};
use crate::payload::{Payload, MAX_PACKET_LENGTH, TAG_LEN};
use crate::socket::Socket;
use crate::stats::{Direction, StatEvent, StatsHandle};

/// Runs one incoming worker for queue `q` until `shutdown` fires.
pub async fn run_incoming_worker<D, S, M>(
    q: usize,
    device: &D,
    socket: &S,
    store: &M,
    stats: StatsHandle,
    mut shutdown: watch::Receiver<bool>,
) where
    D: Device,
    S: Socket,
    M: MappingStore,
{
    let mut buf = vec![0u8; MAX_PACKET_LENGTH];

    loop {
        if *shutdown.borrow() {
            return;
        }

        let m = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            m = socket.read(q, &mut buf) => m,
        };
        let Some(m) = m else { continue };

        let Some(mut payload) = Payload::from_socket_read(&mut buf, m) else {
            stats.report(StatEvent { direction: Direction::Rx, queue_index: q, bytes: m, dropped: true, peer_overlay_ipv4: None });
            continue;
        };

        let sip = ipv4_key(payload.ip_address().try_into().unwrap());

        let Some(mapping) = store.lookup(sip) else {
            stats.report(StatEvent { direction: Direction::Rx, queue_index: q, bytes: payload.length(), dropped: true, peer_overlay_ipv4: None });
            continue;
        };

        if let Some(cipher) = &mapping.cipher {
            if payload.length() < TAG_LEN {
                stats.report(StatEvent { direction: Direction::Rx, queue_index: q, bytes: payload.length(), dropped: true, peer_overlay_ipv4: Some(mapping.overlay_ipv4) });
                continue;
            }
            let (nonce, ciphertext, tag) = payload.open_parts();
            if cipher.open_in_place(nonce, ciphertext, tag).is_err() {
                warn!(queue = q, peer = mapping.overlay_ipv4, "authentication failed, dropping");
                stats.report(StatEvent { direction: Direction::Rx, queue_index: q, bytes: payload.length(), dropped: true, peer_overlay_ipv4: Some(mapping.overlay_ipv4) });
                continue;
            }
            payload.set_length(payload.length() - TAG_LEN);
        }

        let bytes = payload.length();
        let written = device.write(q, payload.packet()).await;
        stats.report(StatEvent { direction: Direction::Rx, queue_index: q, bytes, dropped: !written, peer_overlay_ipv4: Some(mapping.overlay_ipv4) });
    }
}
