//! Streaming zlib deflate/inflate with an independence flag, matching the block
//! format: an 8-byte header (4-byte magic, 4-byte little-endian original size) followed
//! by a raw deflate stream. A block marked independent resets the deflater first, so it
//! can be inflated without replaying any prior block.

mod error;

use std::io::{Read, Write};

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use telegraph_core::ByteBuffer;

pub use error::{CodecError, CodecResult};

const HEADER_SIZE: usize = 8;
// Written little-endian, so these are the literal wire bytes (spec §6), not a
// big-endian reading of 'zlib'/'zlic'.
const MAGIC_INDEPENDENT: [u8; 4] = [0x62, 0x69, 0x6C, 0x7A];
const MAGIC_DEPENDENT: [u8; 4] = [0x63, 0x69, 0x6C, 0x7A];

const IN_CHUNK: usize = 32 * 1024;
const OUT_CHUNK: usize = 64 * 1024;

fn write_header(out: &mut Vec<u8>, independent: bool, original_size: u32) {
    let magic = if independent { MAGIC_INDEPENDENT } else { MAGIC_DEPENDENT };
    out.extend_from_slice(&magic);
    out.extend_from_slice(&original_size.to_le_bytes());
}

struct Header {
    independent: bool,
    original_size: u32,
}

fn read_header(bytes: &[u8]) -> CodecResult<Header> {
    if bytes.len() < HEADER_SIZE {
        return Err(CodecError::BadData("block shorter than header".into()));
    }
    let magic: [u8; 4] = bytes[0..4].try_into().unwrap();
    let independent = match magic {
        MAGIC_DEPENDENT => false,
        MAGIC_INDEPENDENT => true,
        other => return Err(CodecError::BadData(format!("bad zlib-codec magic {other:02x?}"))),
    };
    let original_size = u32::from_le_bytes(bytes[4..8].try_into().unwrap());
    Ok(Header { independent, original_size })
}

/// Holds one inflater and one deflater, each of which may be reused across many
/// blocks. A dependent block requires its decoder to have processed every preceding
/// dependent block in order; an independent block resets the decoder first.
pub struct ZLibCodec {
    compress: Compress,
    decompress: Decompress,
}

impl Default for ZLibCodec {
    fn default() -> Self {
        Self::new(Compression::default())
    }
}

impl ZLibCodec {
    pub fn new(level: Compression) -> Self {
        Self { compress: Compress::new(level, true), decompress: Decompress::new(true) }
    }

    /// Deflates `raw` into a single header-prefixed block.
    pub fn deflate(&mut self, raw: &[u8], independent: bool) -> CodecResult<ByteBuffer> {
        if independent {
            self.compress.reset();
        }
        let mut out = Vec::with_capacity(HEADER_SIZE + raw.len() / 2 + 64);
        write_header(&mut out, independent, raw.len() as u32);
        if !raw.is_empty() {
            drain_compress(&mut self.compress, raw, &mut out)?;
        }
        Ok(ByteBuffer::adopt_buffer(out))
    }

    /// Inflates a single header-prefixed block produced by [`Self::deflate`].
    pub fn inflate(&mut self, block: &[u8]) -> CodecResult<ByteBuffer> {
        let header = read_header(block)?;
        if header.independent {
            self.decompress.reset(true);
        }
        let compressed = &block[HEADER_SIZE..];
        let mut out = Vec::with_capacity(header.original_size as usize);
        if header.original_size > 0 {
            drain_decompress(&mut self.decompress, compressed, &mut out)?;
        }
        if out.len() as u32 != header.original_size {
            return Err(CodecError::BadData(format!(
                "inflated {} bytes, header claimed {}",
                out.len(),
                header.original_size
            )));
        }
        Ok(ByteBuffer::adopt_buffer(out))
    }

    /// Returns the original (uncompressed) size recorded in a block's header, without
    /// inflating it.
    pub fn inflated_size(block: &[u8]) -> CodecResult<u32> {
        Ok(read_header(block)?.original_size)
    }

    /// Deflates `raw` into a bare deflate stream, with no 8-byte header. For
    /// transports (like the packet tunnel) that already record compression
    /// state in their own header and would find ours redundant.
    pub fn deflate_raw(&mut self, raw: &[u8], independent: bool) -> CodecResult<ByteBuffer> {
        if independent {
            self.compress.reset();
        }
        let mut out = Vec::with_capacity(raw.len() / 2 + 64);
        if !raw.is_empty() {
            drain_compress(&mut self.compress, raw, &mut out)?;
        }
        Ok(ByteBuffer::adopt_buffer(out))
    }

    /// Inflates a bare deflate stream produced by [`Self::deflate_raw`]. The
    /// caller must already know `original_size` from its own framing.
    pub fn inflate_raw(&mut self, compressed: &[u8], independent: bool, original_size: u32) -> CodecResult<ByteBuffer> {
        if independent {
            self.decompress.reset(true);
        }
        let mut out = Vec::with_capacity(original_size as usize);
        if original_size > 0 {
            drain_decompress(&mut self.decompress, compressed, &mut out)?;
        }
        if out.len() as u32 != original_size {
            return Err(CodecError::BadData(format!(
                "inflated {} bytes, caller claimed {}",
                out.len(),
                original_size
            )));
        }
        Ok(ByteBuffer::adopt_buffer(out))
    }

    /// Inflates a bare deflate stream until all `compressed` bytes are
    /// consumed, without knowing the decompressed size ahead of time. For
    /// framing (like the packet tunnel) where the uncompressed region's own
    /// contents determine where it ends, rather than a size recorded up front.
    pub fn inflate_raw_to_end(&mut self, compressed: &[u8], independent: bool) -> CodecResult<ByteBuffer> {
        if independent {
            self.decompress.reset(true);
        }
        let mut out = Vec::new();
        if !compressed.is_empty() {
            drain_decompress(&mut self.decompress, compressed, &mut out)?;
        }
        Ok(ByteBuffer::adopt_buffer(out))
    }

    /// Deflates `source` into `dest`, writing the header first. Intended for use with
    /// transports that want to stream a large payload without buffering it twice.
    pub fn deflate_stream<R: Read, W: Write>(
        &mut self,
        mut source: R,
        mut dest: W,
        independent: bool,
    ) -> CodecResult<()> {
        let mut raw = Vec::new();
        source.read_to_end(&mut raw)?;
        let block = self.deflate(&raw, independent)?;
        dest.write_all(block.as_slice())?;
        Ok(())
    }

    /// Inflates a full header-prefixed block read from `source` into `dest`.
    pub fn inflate_stream<R: Read, W: Write>(&mut self, mut source: R, mut dest: W) -> CodecResult<()> {
        let mut block = Vec::new();
        source.read_to_end(&mut block)?;
        let raw = self.inflate(&block)?;
        dest.write_all(raw.as_slice())?;
        Ok(())
    }
}

fn drain_compress(compress: &mut Compress, mut input: &[u8], out: &mut Vec<u8>) -> CodecResult<()> {
    let mut scratch = vec![0u8; OUT_CHUNK];
    loop {
        let chunk = &input[..input.len().min(IN_CHUNK)];
        let before_in = compress.total_in();
        let before_out = compress.total_out();
        compress
            .compress(chunk, &mut scratch, FlushCompress::Sync)
            .map_err(|e| CodecError::Zlib(e.to_string()))?;
        let consumed = (compress.total_in() - before_in) as usize;
        let produced = (compress.total_out() - before_out) as usize;
        out.extend_from_slice(&scratch[..produced]);
        input = &input[consumed..];
        if input.is_empty() && produced < scratch.len() {
            break;
        }
        if consumed == 0 && produced == 0 {
            return Err(CodecError::Zlib("deflate made no progress".into()));
        }
    }
    Ok(())
}

fn drain_decompress(decompress: &mut Decompress, mut input: &[u8], out: &mut Vec<u8>) -> CodecResult<()> {
    let mut scratch = vec![0u8; OUT_CHUNK];
    loop {
        let chunk = &input[..input.len().min(IN_CHUNK)];
        let before_in = decompress.total_in();
        let before_out = decompress.total_out();
        decompress
            .decompress(chunk, &mut scratch, FlushDecompress::Sync)
            .map_err(|e| CodecError::Zlib(e.to_string()))?;
        let consumed = (decompress.total_in() - before_in) as usize;
        let produced = (decompress.total_out() - before_out) as usize;
        out.extend_from_slice(&scratch[..produced]);
        input = &input[consumed..];
        if input.is_empty() && produced < scratch.len() {
            break;
        }
        if consumed == 0 && produced == 0 {
            return Err(CodecError::Zlib("inflate made no progress".into()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_small_payload() {
        let mut codec = ZLibCodec::default();
        let raw = b"hello telegraph";
        let block = codec.deflate(raw, true).unwrap();
        let back = codec.inflate(block.as_slice()).unwrap();
        assert_eq!(back.as_slice(), raw);
    }

    #[test]
    fn round_trip_large_payload() {
        let mut codec = ZLibCodec::default();
        let raw = vec![b'A'; 100 * 1024];
        let block = codec.deflate(&raw, true).unwrap();
        assert!(block.num_bytes() < raw.len());
        let back = codec.inflate(block.as_slice()).unwrap();
        assert_eq!(back.as_slice(), raw.as_slice());
    }

    #[test]
    fn dependent_blocks_chain() {
        let mut enc = ZLibCodec::default();
        let mut dec = ZLibCodec::default();

        let block1 = enc.deflate(b"first chunk of data", true).unwrap();
        let block2 = enc.deflate(b"second chunk of data", false).unwrap();

        let out1 = dec.inflate(block1.as_slice()).unwrap();
        assert_eq!(out1.as_slice(), b"first chunk of data");
        let out2 = dec.inflate(block2.as_slice()).unwrap();
        assert_eq!(out2.as_slice(), b"second chunk of data");
    }

    #[test]
    fn independent_block_is_decodable_alone() {
        let mut enc = ZLibCodec::default();
        let _ = enc.deflate(b"warm up the dictionary with some text", false).unwrap();
        let indep = enc.deflate(b"standalone payload", true).unwrap();

        let mut dec = ZLibCodec::default();
        let out = dec.inflate(indep.as_slice()).unwrap();
        assert_eq!(out.as_slice(), b"standalone payload");
    }

    #[test]
    fn raw_round_trip_has_no_header() {
        let mut codec = ZLibCodec::default();
        let raw = b"no header needed here, the caller already knows the size";
        let block = codec.deflate_raw(raw, true).unwrap();
        let back = codec.inflate_raw(block.as_slice(), true, raw.len() as u32).unwrap();
        assert_eq!(back.as_slice(), raw);
    }

    #[test]
    fn raw_inflate_to_end_needs_no_size_hint() {
        let mut codec = ZLibCodec::default();
        let raw = b"concatenated sub-messages of unknown total length to the decoder";
        let block = codec.deflate_raw(raw, true).unwrap();
        let back = codec.inflate_raw_to_end(block.as_slice(), true).unwrap();
        assert_eq!(back.as_slice(), raw);
    }

    #[test]
    fn empty_payload_short_circuits() {
        let mut codec = ZLibCodec::default();
        let block = codec.deflate(b"", true).unwrap();
        assert_eq!(block.num_bytes(), HEADER_SIZE);
        let out = codec.inflate(block.as_slice()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut codec = ZLibCodec::default();
        let mut bogus = vec![0u8; HEADER_SIZE];
        assert!(codec.inflate(&mut bogus).is_err());
    }
}
