use tokio::sync::watch;
use tracing::error;

use crate::crypto::{NONCE_LEN, TAG_LEN};
use crate::device::Device;
use crate::mapping::MappingStore;
use crate::payload::{Payload, HEADER_SIZE, MAX_PACKET_LENGTH, MTU};
use crate::socket::Socket;
use crate::stats::{Direction, StatEvent, StatsHandle};

/// IPv4 header offset of the destination address field, relative to the
/// start of `packet` (the IP datagram itself).
const IPV4_DEST_OFFSET: usize = 16;

/// Runs one outgoing worker for queue `q` until `shutdown` fires. The worker
/// owns `buf` for its entire lifetime; no per-packet allocation occurs.
pub async fn run_outgoing_worker<D, S, M>(
    q: usize,
    device: &D,
    socket: &S,
    store: &M,
    own_overlay_ipv4: [u8; 4],
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

        let n = tokio::select! {
            biased;
            _ = shutdown.changed() => return,
            n = device.read(q, &mut buf[HEADER_SIZE..HEADER_SIZE + MTU]) => n,
        };
        let Some(n) = n else { continue };

        let Some(mut payload) = Payload::from_device_read(&mut buf, n) else {
            continue;
        };

        if payload.packet().len() < IPV4_DEST_OFFSET + 4 {
            stats.report(StatEvent { direction: Direction::Tx, queue_index: q, bytes: n, dropped: true, peer_overlay_ipv4: None });
            continue;
        }
        let dest_bytes: [u8; 4] = payload.packet()[IPV4_DEST_OFFSET..IPV4_DEST_OFFSET + 4].try_into().unwrap();
        let dip = u32::from_le_bytes(dest_bytes);

        let Some(mapping) = store.lookup(dip) else {
            stats.report(StatEvent { direction: Direction::Tx, queue_index: q, bytes: n, dropped: true, peer_overlay_ipv4: None });
            continue;
        };

        payload.ip_address_mut().copy_from_slice(&own_overlay_ipv4);

        let mut nonce_buf = [0u8; NONCE_LEN];
        crate::crypto::SealingKey::random_nonce(&mut nonce_buf);
        payload.nonce_mut().copy_from_slice(&nonce_buf);

        if let Some(cipher) = &mapping.cipher {
            let (nonce, packet, tag_out) = payload.seal_parts();
            match cipher.seal_in_place(nonce, packet, tag_out) {
                Ok(()) => payload.set_length(payload.length() + TAG_LEN),
                Err(_) => {
                    error!(queue = q, peer = mapping.overlay_ipv4, "seal failed");
                    stats.report(StatEvent { direction: Direction::Tx, queue_index: q, bytes: n, dropped: true, peer_overlay_ipv4: Some(mapping.overlay_ipv4) });
                    continue;
                }
            }
        }

        let sent = socket.write(q, mapping.public_addr, payload.raw()).await;
        let bytes = payload.raw().len();
        stats.report(StatEvent { direction: Direction::Tx, queue_index: q, bytes, dropped: !sent, peer_overlay_ipv4: Some(mapping.overlay_ipv4) });
    }
}
