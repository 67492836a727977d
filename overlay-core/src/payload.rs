//! Zero-copy packet framing over one per-worker buffer.

/// Max size of a plaintext IP datagram carried end to end.
pub const MTU: usize = 65475;

/// Bytes reserved ahead of the packet: source/dest overlay IPv4 + AEAD nonce.
pub const HEADER_SIZE: usize = 16;

/// Bytes reserved after the packet for the AEAD tag.
pub const FOOTER_SIZE: usize = 16;

/// Size of the per-worker buffer: header + MTU + footer.
pub const MAX_PACKET_LENGTH: usize = HEADER_SIZE + MTU + FOOTER_SIZE;

/// Size of an AES-GCM authentication tag.
pub const TAG_LEN: usize = 16;

const IP_START: usize = 0;
const IP_END: usize = 4;
const NONCE_START: usize = 4;
const NONCE_END: usize = 16;
const PACKET_START: usize = 16;

/// A view over one `MAX_PACKET_LENGTH` buffer with named sub-slices.
///
/// Rust's borrow rules don't let a struct hold four simultaneously-aliasing
/// `&mut` fields, so `Payload` owns the buffer and carves out `ip_address`,
/// `nonce`, `packet` and `raw` as accessor methods instead of fields. Every
/// accessor is a plain slice over the same backing buffer — no allocation,
/// no copy.
pub struct Payload<'a> {
    buf: &'a mut [u8],
    length: usize,
}

impl<'a> Payload<'a> {
    /// Build a Payload from a device (TUN) read of `n` plaintext bytes
    /// starting at offset `HEADER_SIZE`. `ip_address` is left as whatever the
    /// buffer already held; the outgoing pipeline's Resolve step fills it in.
    pub fn from_device_read(buf: &'a mut [u8], n: usize) -> Option<Self> {
        if n > MTU {
            return None;
        }
        Some(Self { buf, length: n })
    }

    /// Build a Payload from a socket (UDP) read of `m` wire bytes starting at
    /// offset 0. `ip_address` and `nonce` are the sender's claims; `packet`
    /// is ciphertext+tag (or cleartext, in unencrypted mode).
    pub fn from_socket_read(buf: &'a mut [u8], m: usize) -> Option<Self> {
        if m < HEADER_SIZE + 1 || m > MAX_PACKET_LENGTH {
            return None;
        }
        Some(Self { buf, length: m - HEADER_SIZE })
    }

    /// Wrap an already-framed buffer (used by workers reusing their buffer
    /// across iterations once the header has already been populated).
    pub fn new(buf: &'a mut [u8], length: usize) -> Self {
        Self { buf, length }
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn set_length(&mut self, length: usize) {
        self.length = length;
    }

    pub fn ip_address(&self) -> &[u8] {
        &self.buf[IP_START..IP_END]
    }

    pub fn ip_address_mut(&mut self) -> &mut [u8] {
        &mut self.buf[IP_START..IP_END]
    }

    pub fn nonce(&self) -> &[u8] {
        &self.buf[NONCE_START..NONCE_END]
    }

    pub fn nonce_mut(&mut self) -> &mut [u8] {
        &mut self.buf[NONCE_START..NONCE_END]
    }

    /// The plaintext (device side) or ciphertext+tag (socket side).
    pub fn packet(&self) -> &[u8] {
        &self.buf[PACKET_START..PACKET_START + self.length]
    }

    pub fn packet_mut(&mut self) -> &mut [u8] {
        &mut self.buf[PACKET_START..PACKET_START + self.length]
    }

    /// The full datagram as it travels the wire: header + nonce + packet.
    pub fn raw(&self) -> &[u8] {
        &self.buf[..PACKET_START + self.length]
    }

    /// Splits the buffer into the three disjoint regions an in-place seal
    /// touches: the nonce (already drawn by the caller), the plaintext to
    /// encrypt in place, and the footer slot the detached tag lands in.
    /// `split_at_mut` makes this safe since the regions never overlap.
    pub fn seal_parts(&mut self) -> (&[u8], &mut [u8], &mut [u8]) {
        let length = self.length;
        let (head, rest) = self.buf.split_at_mut(PACKET_START);
        let nonce: &[u8] = &head[NONCE_START..NONCE_END];
        let (packet, tag_out) = rest.split_at_mut(length);
        (nonce, packet, &mut tag_out[..TAG_LEN])
    }

    /// Splits the buffer into the three disjoint regions an in-place open
    /// touches: the nonce, the ciphertext to decrypt in place, and the
    /// detached tag trailing it inside `packet`.
    pub fn open_parts(&mut self) -> (&[u8], &mut [u8], &[u8]) {
        let length = self.length;
        let (head, rest) = self.buf.split_at_mut(PACKET_START);
        let nonce: &[u8] = &head[NONCE_START..NONCE_END];
        let (ciphertext, tag) = rest[..length].split_at_mut(length - TAG_LEN);
        (nonce, ciphertext, tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_read_frames_packet_and_ip() {
        let mut buf = vec![0u8; MAX_PACKET_LENGTH];
        buf[0..4].copy_from_slice(&[1, 1, 1, 1]);
        buf[16] = 3;
        buf[17] = 3;
        let payload = Payload::from_device_read(&mut buf, 2).unwrap();
        assert_eq!(payload.ip_address(), &[1, 1, 1, 1]);
        assert_eq!(payload.packet(), &[3, 3]);
        assert_eq!(payload.length(), 2);
    }

    #[test]
    fn socket_read_frames_packet_and_length() {
        let mut buf = vec![0u8; MAX_PACKET_LENGTH];
        buf[0..4].copy_from_slice(&[1, 1, 1, 1]);
        buf[16] = 3;
        buf[17] = 3;
        let payload = Payload::from_socket_read(&mut buf, 18).unwrap();
        assert_eq!(payload.ip_address(), &[1, 1, 1, 1]);
        assert_eq!(payload.packet(), &[3, 3]);
        assert_eq!(payload.length(), 2);
    }

    #[test]
    fn device_read_rejects_oversize() {
        let mut buf = vec![0u8; MAX_PACKET_LENGTH];
        assert!(Payload::from_device_read(&mut buf, MTU + 1).is_none());
    }

    #[test]
    fn socket_read_rejects_undersize() {
        let mut buf = vec![0u8; MAX_PACKET_LENGTH];
        assert!(Payload::from_socket_read(&mut buf, HEADER_SIZE).is_none());
    }

    #[test]
    fn seal_parts_expose_disjoint_nonce_packet_and_tag_slot() {
        let mut buf = vec![0u8; MAX_PACKET_LENGTH];
        buf[NONCE_START..NONCE_END].copy_from_slice(&[9u8; 12]);
        let mut payload = Payload::from_device_read(&mut buf, 4).unwrap();
        let (nonce, packet, tag_out) = payload.seal_parts();
        assert_eq!(nonce, &[9u8; 12]);
        assert_eq!(packet.len(), 4);
        assert_eq!(tag_out.len(), TAG_LEN);
        tag_out.fill(0xaa);
        payload.set_length(4 + TAG_LEN);
        assert_eq!(&payload.packet()[4..], &[0xaa; TAG_LEN]);
    }

    #[test]
    fn open_parts_split_ciphertext_from_trailing_tag() {
        let mut buf = vec![0u8; MAX_PACKET_LENGTH];
        buf[PACKET_START..PACKET_START + 4].copy_from_slice(&[1, 2, 3, 4]);
        buf[PACKET_START + 4..PACKET_START + 4 + TAG_LEN].copy_from_slice(&[0xbb; TAG_LEN]);
        let mut payload = Payload::new(&mut buf, 4 + TAG_LEN);
        let (_nonce, ciphertext, tag) = payload.open_parts();
        assert_eq!(ciphertext, &[1, 2, 3, 4]);
        assert_eq!(tag, &[0xbb; TAG_LEN]);
    }
}
