use std::net::SocketAddr;

/// Four ASCII bytes packed big-endian into a `what`/magic code, matching the
/// convention `telegraph-core` uses for field type codes.
pub const fn pack_code(s: &[u8; 4]) -> u32 {
    ((s[0] as u32) << 24) | ((s[1] as u32) << 16) | ((s[2] as u32) << 8) | (s[3] as u32)
}

/// `what` code for a Message carrying one or more opaque byte chunks in `rd`
/// fields, used by [`crate::RawDataMessageIOGateway`], the SLIP-framed
/// variant, and WebSocket binary frames.
pub const RAW_DATA_WHAT: u32 = pack_code(b"rddc");
pub const RAW_DATA_FIELD: &str = "rd";

/// `what` code for a Message carrying one or more text lines in string
/// fields, used by WebSocket text frames.
pub const TEXT_DATA_WHAT: u32 = pack_code(b"rdtx");
pub const TEXT_DATA_FIELD: &str = "ln";

pub const PACKET_REMOTE_LOCATION_FIELD: &str = "from";

/// Out-of-band context a gateway attaches to a Message it delivers, when the
/// underlying transport is packet-oriented.
#[derive(Clone, Copy, Debug, Default)]
pub struct PacketContext {
    pub remote: Option<SocketAddr>,
    pub packet_id: Option<u32>,
}

/// A transport able to both read and write a byte stream (TCP, a pipe, an
/// in-memory buffer for tests).
pub trait StreamIo: std::io::Read + std::io::Write {}
impl<T: std::io::Read + std::io::Write> StreamIo for T {}

/// A transport able to exchange discrete datagrams with a known peer (UDP).
pub trait PacketIo {
    fn recv_from(&mut self, buf: &mut [u8]) -> std::io::Result<(usize, SocketAddr)>;
    fn send_to(&mut self, buf: &[u8], dest: SocketAddr) -> std::io::Result<usize>;
}
