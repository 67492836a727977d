#![forbid(unsafe_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use overlay_core::device::MockDevice;
use overlay_core::mapping::{ipv4_key, ArcSwapMappingStore, Mapping};
use overlay_core::socket::MockSocket;
use overlay_core::SealingKey;
use tokio::time::timeout;

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const LOCAL_IP: [u8; 4] = [10, 1, 1, 1];
const PEER_IP: [u8; 4] = [10, 8, 0, 1];
const KEY: [u8; 32] = [42u8; 32];

fn encrypted_peer(public_addr: &str) -> Mapping {
    Mapping {
        overlay_ipv4: ipv4_key(PEER_IP),
        public_addr: public_addr.parse::<SocketAddr>().unwrap(),
        cipher: Some(Arc::new(SealingKey::new(&KEY).unwrap())),
    }
}

fn unencrypted_peer(public_addr: &str) -> Mapping {
    Mapping { overlay_ipv4: ipv4_key(PEER_IP), public_addr: public_addr.parse::<SocketAddr>().unwrap(), cipher: None }
}

fn ip_packet_to(dest: [u8; 4], body_len: usize) -> Vec<u8> {
    let mut packet = vec![0u8; 20 + body_len];
    packet[0] = 0x45;
    packet[16..20].copy_from_slice(&dest);
    for (i, b) in packet[20..].iter_mut().enumerate() {
        *b = (i % 251) as u8;
    }
    packet
}

#[tokio::test]
async fn local_to_peer_seals_and_addresses_correctly() -> TestResult<()> {
    let (device, mut device_handle) = MockDevice::new(1);
    let (socket, mut socket_handle) = MockSocket::new(1);
    let store = Arc::new(ArcSwapMappingStore::new(vec![encrypted_peer("198.51.100.7:1099")]));

    let handle = overlay_core::run(Arc::new(device), Arc::new(socket), store, LOCAL_IP);

    let plaintext = ip_packet_to(PEER_IP, 980);
    device_handle.inbound_tx[0].send(plaintext.clone()).await?;

    let (dest, datagram) = timeout(Duration::from_secs(1), socket_handle.outbound_rx[0].recv()).await?.unwrap();
    assert_eq!(dest, "198.51.100.7:1099".parse::<SocketAddr>()?);
    assert_eq!(datagram.len(), 16 + plaintext.len() + 16);
    assert_eq!(&datagram[0..4], &LOCAL_IP);

    let key = SealingKey::new(&KEY)?;
    let mut body = datagram[16..].to_vec();
    let body_len = body.len();
    let (ciphertext, tag) = body.split_at_mut(body_len - 16);
    let tag = tag.to_vec();
    key.open_in_place(&datagram[4..16], ciphertext, &tag)?;
    assert_eq!(ciphertext, &plaintext[..]);

    handle.shutdown();
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn peer_to_local_opens_and_injects_plaintext() -> TestResult<()> {
    let (device, mut device_handle) = MockDevice::new(1);
    let (socket, mut socket_handle) = MockSocket::new(1);
    let store = Arc::new(ArcSwapMappingStore::new(vec![encrypted_peer("198.51.100.7:1099")]));

    let handle = overlay_core::run(Arc::new(device), Arc::new(socket), store, LOCAL_IP);

    let plaintext = ip_packet_to([10, 1, 1, 1], 980);
    let key = SealingKey::new(&KEY)?;
    let mut nonce = [0u8; 12];
    SealingKey::random_nonce(&mut nonce);
    let mut sealed = plaintext.clone();
    let mut tag = [0u8; 16];
    key.seal_in_place(&nonce, &mut sealed, &mut tag)?;

    let mut datagram = Vec::with_capacity(16 + sealed.len() + 16);
    datagram.extend_from_slice(&PEER_IP);
    datagram.extend_from_slice(&nonce);
    datagram.extend_from_slice(&sealed);
    datagram.extend_from_slice(&tag);

    socket_handle.inbound_tx[0].send(datagram).await?;
    let written = timeout(Duration::from_secs(1), device_handle.outbound_rx[0].recv()).await?.unwrap();
    assert_eq!(written, plaintext);

    handle.shutdown();
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn unknown_peer_is_dropped_with_no_socket_write() -> TestResult<()> {
    let (device, mut device_handle) = MockDevice::new(1);
    let (socket, mut socket_handle) = MockSocket::new(1);
    let store = Arc::new(ArcSwapMappingStore::new(vec![encrypted_peer("198.51.100.7:1099")]));
    let stats = {
        let handle = overlay_core::run(Arc::new(device), Arc::new(socket), store, LOCAL_IP);
        let stats = handle.stats();

        let plaintext = ip_packet_to([10, 8, 0, 2], 980);
        device_handle.inbound_tx[0].send(plaintext).await?;

        assert!(timeout(Duration::from_millis(200), socket_handle.outbound_rx[0].recv()).await.is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;
        let snap = stats.to_snapshot();
        handle.shutdown();
        handle.join().await;
        snap
    };

    assert_eq!(stats.tx_stats.total.dropped_packets, 1);
    assert_eq!(stats.tx_stats.total.dropped_bytes, 1000);
    assert!(stats.tx_stats.links.is_empty());
    Ok(())
}

#[tokio::test]
async fn undersized_datagram_is_dropped_with_unknown_peer_stat() -> TestResult<()> {
    let (device, _device_handle) = MockDevice::new(1);
    let (socket, mut socket_handle) = MockSocket::new(1);
    let store = Arc::new(ArcSwapMappingStore::new(vec![encrypted_peer("198.51.100.7:1099")]));

    let handle = overlay_core::run(Arc::new(device), Arc::new(socket), store, LOCAL_IP);
    let stats = handle.stats();

    socket_handle.inbound_tx[0].send(vec![0u8; 10]).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snap = stats.to_snapshot();
    assert_eq!(snap.rx_stats.total.dropped_packets, 1);
    assert_eq!(snap.rx_stats.total.dropped_bytes, 10);
    assert!(snap.rx_stats.links.is_empty());

    handle.shutdown();
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn tampered_ciphertext_is_dropped_and_attributed() -> TestResult<()> {
    let (device, _device_handle) = MockDevice::new(1);
    let (socket, mut socket_handle) = MockSocket::new(1);
    let store = Arc::new(ArcSwapMappingStore::new(vec![encrypted_peer("198.51.100.7:1099")]));

    let handle = overlay_core::run(Arc::new(device), Arc::new(socket), store, LOCAL_IP);
    let stats = handle.stats();

    let plaintext = ip_packet_to([10, 1, 1, 1], 980);
    let key = SealingKey::new(&KEY)?;
    let mut nonce = [0u8; 12];
    SealingKey::random_nonce(&mut nonce);
    let mut sealed = plaintext.clone();
    let mut tag = [0u8; 16];
    key.seal_in_place(&nonce, &mut sealed, &mut tag)?;
    sealed[0] ^= 0xff;

    let mut datagram = Vec::with_capacity(16 + sealed.len() + 16);
    datagram.extend_from_slice(&PEER_IP);
    datagram.extend_from_slice(&nonce);
    datagram.extend_from_slice(&sealed);
    datagram.extend_from_slice(&tag);

    socket_handle.inbound_tx[0].send(datagram).await?;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let snap = stats.to_snapshot();
    assert_eq!(snap.rx_stats.total.dropped_packets, 1);
    assert_eq!(snap.rx_stats.links.get("10.8.0.1").unwrap().dropped_packets, 1);

    handle.shutdown();
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn unencrypted_mode_passes_cleartext() -> TestResult<()> {
    let (device, mut device_handle) = MockDevice::new(1);
    let (socket, mut socket_handle) = MockSocket::new(1);
    let store = Arc::new(ArcSwapMappingStore::new(vec![unencrypted_peer("198.51.100.7:1099")]));

    let handle = overlay_core::run(Arc::new(device), Arc::new(socket), store, LOCAL_IP);

    let plaintext = ip_packet_to(PEER_IP, 980);
    device_handle.inbound_tx[0].send(plaintext.clone()).await?;

    let (_dest, datagram) = timeout(Duration::from_secs(1), socket_handle.outbound_rx[0].recv()).await?.unwrap();
    assert_eq!(datagram.len(), 16 + plaintext.len());
    assert_eq!(&datagram[16..], &plaintext[..]);

    handle.shutdown();
    handle.join().await;
    Ok(())
}

#[tokio::test]
async fn shutdown_drains_ten_thousand_packets() -> TestResult<()> {
    const N: usize = 10_000;
    let (device, mut device_handle) = MockDevice::new(2);
    let (socket, mut socket_handle) = MockSocket::new(2);
    let store = Arc::new(ArcSwapMappingStore::new(vec![unencrypted_peer("198.51.100.7:1099")]));

    let handle = overlay_core::run(Arc::new(device), Arc::new(socket), store, LOCAL_IP);
    let stats = handle.stats();

    let sender = tokio::spawn(async move {
        for i in 0..N {
            let packet = ip_packet_to(PEER_IP, 64);
            device_handle.inbound_tx[i % 2].send(packet).await.unwrap();
        }
        device_handle
    });
    let drain = tokio::spawn(async move {
        let mut received = 0usize;
        let (rx0, rest) = socket_handle.outbound_rx.split_at_mut(1);
        let rx0 = &mut rx0[0];
        let rx1 = &mut rest[0];
        while received < N {
            tokio::select! {
                Some(_) = rx0.recv() => received += 1,
                Some(_) = rx1.recv() => received += 1,
            }
        }
    });

    let _device_handle = sender.await?;
    drain.await?;

    handle.shutdown();
    handle.join().await;

    let snap = stats.to_snapshot();
    assert_eq!(snap.tx_stats.total.packets + snap.tx_stats.total.dropped_packets, N as u64);
    Ok(())
}
