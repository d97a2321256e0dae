use std::collections::VecDeque;
use std::io::{self, Read, Write};

use telegraph_core::Message;

use crate::common::StreamIo;
use crate::error::GatewayResult;
use crate::raw_data::make_raw_message;

const END: u8 = 0xC0;
const ESC: u8 = 0xDB;
const ESC_END: u8 = 0xDC;
const ESC_ESC: u8 = 0xDD;

const READ_SCRATCH_SIZE: usize = 4 * 1024;

/// Delimits the raw-data gateway's byte stream with RFC 1055 SLIP framing:
/// each outgoing chunk becomes `END + escape(chunk) + END`, and each `END`
/// seen on input seals the accumulated bytes into one chunk.
pub struct SlipFramedIOGateway<IO> {
    io: IO,
    outgoing: VecDeque<Message>,
    read_scratch: [u8; READ_SCRATCH_SIZE],
    accum: Vec<u8>,
    in_escape: bool,
}

impl<IO: StreamIo> SlipFramedIOGateway<IO> {
    pub fn new(io: IO) -> Self {
        Self {
            io,
            outgoing: VecDeque::new(),
            read_scratch: [0u8; READ_SCRATCH_SIZE],
            accum: Vec::new(),
            in_escape: false,
        }
    }

    pub fn add_outgoing_message(&mut self, msg: Message) {
        self.outgoing.push_back(msg);
    }

    pub fn has_bytes_to_output(&self) -> bool {
        !self.outgoing.is_empty()
    }

    pub fn do_input(&mut self, receiver: &mut dyn FnMut(Message), max_bytes: usize) -> GatewayResult<usize> {
        let mut total = 0;
        while total < max_bytes {
            let want = (max_bytes - total).min(self.read_scratch.len());
            match self.io.read(&mut self.read_scratch[..want]) {
                Ok(0) => break,
                Ok(n) => {
                    total += n;
                    for i in 0..n {
                        self.feed_byte(self.read_scratch[i], receiver);
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(total)
    }

    fn feed_byte(&mut self, b: u8, receiver: &mut dyn FnMut(Message)) {
        if self.in_escape {
            self.in_escape = false;
            match b {
                ESC_END => self.accum.push(END),
                ESC_ESC => self.accum.push(ESC),
                // a lone ESC not followed by a valid escape code is passed through literally
                _ => {
                    self.accum.push(ESC);
                    self.accum.push(b);
                }
            }
            return;
        }
        match b {
            END => {
                if !self.accum.is_empty() {
                    receiver(make_raw_message(std::mem::take(&mut self.accum)));
                }
            }
            ESC => self.in_escape = true,
            _ => self.accum.push(b),
        }
    }

    pub fn do_output(&mut self, max_bytes: usize) -> GatewayResult<usize> {
        let mut total = 0;
        while total < max_bytes {
            let Some(msg) = self.outgoing.pop_front() else { break };
            for chunk in crate::raw_data::raw_chunks(&msg) {
                let mut framed = Vec::with_capacity(chunk.len() + 4);
                framed.push(END);
                escape_into(&chunk, &mut framed);
                framed.push(END);
                self.io.write_all(&framed)?;
                total += framed.len();
            }
        }
        Ok(total)
    }
}

fn escape_into(chunk: &[u8], out: &mut Vec<u8>) {
    for &b in chunk {
        match b {
            END => {
                out.push(ESC);
                out.push(ESC_END);
            }
            ESC => {
                out.push(ESC);
                out.push(ESC_ESC);
            }
            other => out.push(other),
        }
    }
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
    fn encode_then_decode_recovers_chunk_with_special_bytes() {
        let payload = vec![1, END, 2, ESC, 3];
        let io = DuplexBuf { read_src: Cursor::new(Vec::new()), written: Vec::new() };
        let mut encoder = SlipFramedIOGateway::new(io);
        encoder.add_outgoing_message(make_raw_message(payload.clone()));
        encoder.do_output(4096).unwrap();
        let framed = encoder.io.written;
        assert_eq!(framed[0], END);
        assert_eq!(*framed.last().unwrap(), END);

        let decoder_io = DuplexBuf { read_src: Cursor::new(framed), written: Vec::new() };
        let mut decoder = SlipFramedIOGateway::new(decoder_io);
        let mut received = Vec::new();
        decoder.do_input(&mut |msg| received.push(msg), 4096).unwrap();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].find_raw("rd").unwrap(), payload.as_slice());
    }

    #[test]
    fn two_chunks_in_one_stream_are_separated_by_end_bytes() {
        let io = DuplexBuf { read_src: Cursor::new(Vec::new()), written: Vec::new() };
        let mut encoder = SlipFramedIOGateway::new(io);
        encoder.add_outgoing_message(make_raw_message(b"first".to_vec()));
        encoder.add_outgoing_message(make_raw_message(b"second".to_vec()));
        encoder.do_output(4096).unwrap();

        let decoder_io = DuplexBuf { read_src: Cursor::new(encoder.io.written), written: Vec::new() };
        let mut decoder = SlipFramedIOGateway::new(decoder_io);
        let mut received = Vec::new();
        decoder.do_input(&mut |msg| received.push(msg), 4096).unwrap();
        assert_eq!(received.len(), 2);
        assert_eq!(received[0].find_raw("rd").unwrap(), b"first");
        assert_eq!(received[1].find_raw("rd").unwrap(), b"second");
    }
}
