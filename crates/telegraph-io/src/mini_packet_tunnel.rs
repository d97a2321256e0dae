use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;

use telegraph_codec::ZLibCodec;
use telegraph_core::Message;

use crate::common::{PacketContext, PacketIo, pack_code};
use crate::error::GatewayResult;
use crate::raw_data::make_raw_message;

const HEADER_SIZE: usize = 12;
const DEFAULT_MAGIC: u32 = pack_code(b"mtgm");
const MAX_DATAGRAM: usize = 64 * 1024;
const PACKET_ID_MASK: u32 = 0x00FF_FFFF;

/// Packs several small flattened Messages into one packet-sized datagram.
/// Wire format (§4.5.3): 12-byte header (magic, source-exclusion id,
/// `(compression_level << 24) | packet_id`) followed by repeated `{u32 len,
/// bytes}` flattened sub-Messages until the datagram ends.
pub struct MiniPacketTunnelIOGateway<IO> {
    io: IO,
    magic: u32,
    source_exclusion_id: u32,
    packet_id: u32,
    mtu: usize,
    compression_level: u8,
    codec: ZLibCodec,
    outgoing: VecDeque<Message>,
    dest: Option<SocketAddr>,
    pass_through_misc_data: bool,
}

impl<IO: PacketIo> MiniPacketTunnelIOGateway<IO> {
    pub fn new(io: IO, mtu: usize) -> Self {
        Self {
            io,
            magic: DEFAULT_MAGIC,
            source_exclusion_id: 0,
            packet_id: 0,
            mtu,
            compression_level: 0,
            codec: ZLibCodec::default(),
            outgoing: VecDeque::new(),
            dest: None,
            pass_through_misc_data: false,
        }
    }

    pub fn with_magic(mut self, magic: u32) -> Self {
        self.magic = magic;
        self
    }

    pub fn with_source_exclusion_id(mut self, id: u32) -> Self {
        self.source_exclusion_id = id;
        self
    }

    pub fn with_compression_level(mut self, level: u8) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_destination(mut self, dest: SocketAddr) -> Self {
        self.dest = Some(dest);
        self
    }

    pub fn with_misc_data_pass_through(mut self, enabled: bool) -> Self {
        self.pass_through_misc_data = enabled;
        self
    }

    pub fn add_outgoing_message(&mut self, msg: Message) {
        self.outgoing.push_back(msg);
    }

    pub fn has_bytes_to_output(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub fn do_input(
        &mut self,
        receiver: &mut dyn FnMut(Message, Option<&PacketContext>),
        max_bytes: usize,
    ) -> GatewayResult<usize> {
        let mut total = 0;
        let mut buf = vec![0u8; MAX_DATAGRAM];
        while total < max_bytes {
            match self.io.recv_from(&mut buf) {
                Ok((0, _)) => break,
                Ok((n, from)) => {
                    total += n;
                    self.process_datagram(&buf[..n], from, receiver);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn process_datagram(
        &mut self,
        datagram: &[u8],
        from: SocketAddr,
        receiver: &mut dyn FnMut(Message, Option<&PacketContext>),
    ) {
        if datagram.len() < 4 || u32::from_le_bytes(datagram[0..4].try_into().unwrap()) != self.magic {
            if self.pass_through_misc_data {
                let ctx = PacketContext { remote: Some(from), packet_id: None };
                receiver(make_raw_message(datagram.to_vec()), Some(&ctx));
            } else {
                tracing::debug!(?from, "dropping datagram with unrecognized magic");
            }
            return;
        }
        if datagram.len() < HEADER_SIZE {
            tracing::debug!(?from, "dropping datagram shorter than tunnel header");
            return;
        }
        let source_exclusion_id = u32::from_le_bytes(datagram[4..8].try_into().unwrap());
        if self.source_exclusion_id != 0 && source_exclusion_id == self.source_exclusion_id {
            return;
        }
        let comp_and_id = u32::from_le_bytes(datagram[8..12].try_into().unwrap());
        let compression_level = (comp_and_id >> 24) as u8;
        let packet_id = comp_and_id & PACKET_ID_MASK;

        let body = &datagram[HEADER_SIZE..];
        let inflated;
        let payload: &[u8] = if compression_level != 0 {
            match self.codec.inflate_raw_to_end(body, true) {
                Ok(bytes) => {
                    inflated = bytes;
                    inflated.as_slice()
                }
                Err(err) => {
                    tracing::warn!(?err, ?from, "failed to inflate tunnel payload");
                    return;
                }
            }
        } else {
            body
        };

        let mut pos = 0;
        while pos + 4 <= payload.len() {
            let chunk_size = u32::from_le_bytes(payload[pos..pos + 4].try_into().unwrap()) as usize;
            pos += 4;
            if pos + chunk_size > payload.len() {
                tracing::debug!(?from, "truncated sub-message in tunnel payload, stopping");
                break;
            }
            let chunk = &payload[pos..pos + chunk_size];
            pos += chunk_size;
            match Message::unflatten(chunk) {
                Ok(msg) => {
                    let ctx = PacketContext { remote: Some(from), packet_id: Some(packet_id) };
                    receiver(msg, Some(&ctx));
                }
                Err(err) => tracing::warn!(?err, ?from, "dropping unparsable tunneled sub-message"),
            }
        }
    }

    pub fn do_output(&mut self, max_bytes: usize) -> GatewayResult<usize> {
        let Some(dest) = self.dest else {
            return Ok(0);
        };
        let mut total = 0;
        while total < max_bytes && !self.outgoing.is_empty() {
            let packet = self.build_packet()?;
            if packet.is_empty() {
                break;
            }
            self.io.send_to(&packet, dest)?;
            total += packet.len();
        }
        Ok(total)
    }

    fn build_packet(&mut self) -> GatewayResult<Vec<u8>> {
        let max_payload = self.mtu.saturating_sub(HEADER_SIZE);
        let mut payload = Vec::new();
        while let Some(msg) = self.outgoing.front() {
            let flat = msg.flatten()?;
            let entry_len = 4 + flat.num_bytes();
            if entry_len > max_payload {
                tracing::error!(bytes = flat.num_bytes(), mtu = self.mtu, "sub-message dropped: exceeds MTU");
                self.outgoing.pop_front();
                continue;
            }
            if payload.len() + entry_len > max_payload {
                break;
            }
            payload.extend_from_slice(&(flat.num_bytes() as u32).to_le_bytes());
            payload.extend_from_slice(flat.as_slice());
            self.outgoing.pop_front();
        }
        if payload.is_empty() {
            return Ok(Vec::new());
        }

        let mut compression_level = self.compression_level;
        let mut body = payload.clone();
        if compression_level != 0 {
            let compressed = self.codec.deflate_raw(&payload, true)?;
            if compressed.num_bytes() < payload.len() {
                body = compressed.into();
            } else {
                compression_level = 0;
            }
        }

        let mut packet = Vec::with_capacity(HEADER_SIZE + body.len());
        packet.extend_from_slice(&self.magic.to_le_bytes());
        packet.extend_from_slice(&self.source_exclusion_id.to_le_bytes());
        let comp_and_id = ((compression_level as u32) << 24) | (self.packet_id & PACKET_ID_MASK);
        packet.extend_from_slice(&comp_and_id.to_le_bytes());
        packet.extend_from_slice(&body);
        self.packet_id = (self.packet_id + 1) & PACKET_ID_MASK;
        Ok(packet)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque as Deque;

    struct LoopbackPacketIo {
        inbox: Deque<(Vec<u8>, SocketAddr)>,
        sent: Vec<(Vec<u8>, SocketAddr)>,
    }
    impl PacketIo for LoopbackPacketIo {
        fn recv_from(&mut self, buf: &mut [u8]) -> io::Result<(usize, SocketAddr)> {
            match self.inbox.pop_front() {
                Some((data, from)) => {
                    let n = data.len().min(buf.len());
                    buf[..n].copy_from_slice(&data[..n]);
                    Ok((n, from))
                }
                None => Err(io::Error::from(io::ErrorKind::WouldBlock)),
            }
        }
        fn send_to(&mut self, buf: &[u8], dest: SocketAddr) -> io::Result<usize> {
            self.sent.push((buf.to_vec(), dest));
            Ok(buf.len())
        }
    }

    fn addr() -> SocketAddr {
        "127.0.0.1:9000".parse().unwrap()
    }

    #[test]
    fn three_small_messages_pack_into_one_datagram() {
        let io = LoopbackPacketIo { inbox: Deque::new(), sent: Vec::new() };
        let mut gw = MiniPacketTunnelIOGateway::new(io, 1024).with_destination(addr());
        for i in 0..3u32 {
            let mut msg = Message::new(1);
            msg.add_int32("i", i as i32).unwrap();
            gw.add_outgoing_message(msg);
        }
        gw.do_output(4096).unwrap();
        assert_eq!(gw.io.sent.len(), 1);

        let (packet, _) = gw.io.sent[0].clone();
        let loopback = LoopbackPacketIo { inbox: Deque::from([(packet, addr())]), sent: Vec::new() };
        let mut reader = MiniPacketTunnelIOGateway::new(loopback, 1024);
        let mut received = Vec::new();
        reader.do_input(&mut |msg, _ctx| received.push(msg), 4096).unwrap();
        assert_eq!(received.len(), 3);
        assert_eq!(received[0].find_int32("i"), Some(0));
        assert_eq!(received[2].find_int32("i"), Some(2));
    }

    #[test]
    fn compressed_packet_round_trips() {
        let io = LoopbackPacketIo { inbox: Deque::new(), sent: Vec::new() };
        let mut gw = MiniPacketTunnelIOGateway::new(io, 4096).with_destination(addr()).with_compression_level(6);
        let mut msg = Message::new(1);
        msg.add_string("text", "x".repeat(500)).unwrap();
        gw.add_outgoing_message(msg);
        gw.do_output(8192).unwrap();

        let (packet, _) = gw.io.sent[0].clone();
        let loopback = LoopbackPacketIo { inbox: Deque::from([(packet, addr())]), sent: Vec::new() };
        let mut reader = MiniPacketTunnelIOGateway::new(loopback, 4096);
        let mut received = Vec::new();
        reader.do_input(&mut |msg, _ctx| received.push(msg), 8192).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].find_string("text"), Some("x".repeat(500).as_str()));
    }

    #[test]
    fn datagram_with_wrong_magic_is_dropped() {
        let bogus = vec![0u8; 16];
        let io = LoopbackPacketIo { inbox: Deque::from([(bogus, addr())]), sent: Vec::new() };
        let mut gw = MiniPacketTunnelIOGateway::new(io, 1024);
        let mut received = Vec::new();
        gw.do_input(&mut |msg, _ctx| received.push(msg), 4096).unwrap();
        assert!(received.is_empty());
    }

    #[test]
    fn packet_id_wraps_at_24_bits() {
        let io = LoopbackPacketIo { inbox: Deque::new(), sent: Vec::new() };
        let mut gw = MiniPacketTunnelIOGateway::new(io, 1024).with_destination(addr());
        gw.packet_id = PACKET_ID_MASK;
        let mut msg = Message::new(1);
        msg.add_int32("i", 1).unwrap();
        gw.add_outgoing_message(msg);
        gw.do_output(4096).unwrap();
        assert_eq!(gw.packet_id, 0);
    }
}
