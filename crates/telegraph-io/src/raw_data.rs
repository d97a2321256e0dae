use std::collections::VecDeque;
use std::io::{self, Read, Write};

use telegraph_core::Message;

use crate::common::{RAW_DATA_FIELD, RAW_DATA_WHAT, StreamIo};
use crate::error::GatewayResult;

const DEFAULT_SCRATCH_SIZE: usize = 8 * 1024;

/// Shuttles opaque byte chunks through Messages over a stream transport. If
/// `min_chunk_size` is non-zero, input bytes are accumulated until a full
/// chunk is available before a Message is delivered; otherwise every read is
/// delivered as its own Message.
pub struct RawDataMessageIOGateway<IO> {
    io: IO,
    min_chunk_size: usize,
    scratch: Vec<u8>,
    partial: Vec<u8>,
    outgoing: VecDeque<Message>,
    bytes_queued_for_output: usize,
}

impl<IO: StreamIo> RawDataMessageIOGateway<IO> {
    pub fn new(io: IO) -> Self {
        Self::with_min_chunk_size(io, 0)
    }

    pub fn with_min_chunk_size(io: IO, min_chunk_size: usize) -> Self {
        Self {
            io,
            min_chunk_size,
            scratch: vec![0u8; DEFAULT_SCRATCH_SIZE],
            partial: Vec::new(),
            outgoing: VecDeque::new(),
            bytes_queued_for_output: 0,
        }
    }

    pub fn add_outgoing_message(&mut self, msg: Message) {
        self.bytes_queued_for_output += raw_chunk_bytes(&msg);
        self.outgoing.push_back(msg);
    }

    /// Total bytes across all queued-but-not-yet-written chunks, for
    /// backpressure decisions.
    pub fn bytes_queued_for_output(&self) -> usize {
        self.bytes_queued_for_output
    }

    pub fn has_bytes_to_output(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub fn do_input(&mut self, receiver: &mut dyn FnMut(Message), max_bytes: usize) -> GatewayResult<usize> {
        let mut total = 0;
        while total < max_bytes {
            let want = (max_bytes - total).min(self.scratch.len());
            match self.io.read(&mut self.scratch[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    self.deliver_chunk(&self.scratch[..n].to_vec(), receiver);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn deliver_chunk(&mut self, bytes: &[u8], receiver: &mut dyn FnMut(Message)) {
        if self.min_chunk_size == 0 {
            receiver(make_raw_message(bytes.to_vec()));
            return;
        }
        self.partial.extend_from_slice(bytes);
        while self.partial.len() >= self.min_chunk_size {
            let chunk: Vec<u8> = self.partial.drain(..self.min_chunk_size).collect();
            receiver(make_raw_message(chunk));
        }
    }

    pub fn do_output(&mut self, max_bytes: usize) -> GatewayResult<usize> {
        let mut total = 0;
        while total < max_bytes {
            let Some(msg) = self.outgoing.front() else { break };
            let chunks = raw_chunks(msg);
            for chunk in chunks {
                self.io.write_all(&chunk)?;
                total += chunk.len();
                self.bytes_queued_for_output = self.bytes_queued_for_output.saturating_sub(chunk.len());
            }
            self.outgoing.pop_front();
        }
        Ok(total)
    }
}

pub(crate) fn make_raw_message(bytes: Vec<u8>) -> Message {
    let mut msg = Message::new(RAW_DATA_WHAT);
    msg.add_raw(RAW_DATA_FIELD, bytes).expect("fresh message, field cannot already exist with a mismatched type");
    msg
}

pub(crate) fn raw_chunks(msg: &Message) -> Vec<Vec<u8>> {
    match msg.field(RAW_DATA_FIELD) {
        Some(telegraph_core::FieldValue::Raw(chunks)) => chunks.to_vec(),
        _ => Vec::new(),
    }
}

fn raw_chunk_bytes(msg: &Message) -> usize {
    raw_chunks(msg).iter().map(Vec::len).sum()
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
    fn each_read_becomes_its_own_message_without_min_chunk() {
        let io = DuplexBuf { read_src: Cursor::new(b"hello world".to_vec()), written: Vec::new() };
        let mut gw = RawDataMessageIOGateway::new(io);
        let mut received = Vec::new();
        gw.do_input(&mut |msg| received.push(msg), 4096).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].find_raw("rd").unwrap(), b"hello world");
    }

    #[test]
    fn min_chunk_size_accumulates_before_delivering() {
        let io = DuplexBuf { read_src: Cursor::new(b"abcdefgh".to_vec()), written: Vec::new() };
        let mut gw = RawDataMessageIOGateway::with_min_chunk_size(io, 4);
        let mut received = Vec::new();
        gw.do_input(&mut |msg| received.push(msg), 4096).unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].find_raw("rd").unwrap(), b"abcd");
        assert_eq!(received[1].find_raw("rd").unwrap(), b"efgh");
    }

    #[test]
    fn outgoing_messages_are_written_in_order() {
        let io = DuplexBuf { read_src: Cursor::new(Vec::new()), written: Vec::new() };
        let mut gw = RawDataMessageIOGateway::new(io);
        gw.add_outgoing_message(make_raw_message(b"one".to_vec()));
        gw.add_outgoing_message(make_raw_message(b"two".to_vec()));
        assert_eq!(gw.bytes_queued_for_output(), 6);
        gw.do_output(4096).unwrap();
        assert_eq!(gw.io.written, b"onetwo");
        assert_eq!(gw.bytes_queued_for_output(), 0);
    }
}
