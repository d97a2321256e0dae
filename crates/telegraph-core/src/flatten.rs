use crate::error::{CoreError, CoreResult};

/// Byte order used by a [`DataFlattener`]/[`DataUnflattener`] pair. The wire format
/// default, used throughout this crate, is `Little`.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Default)]
pub enum Endian {
    #[default]
    Little,
    Big,
    Native,
}

macro_rules! impl_scalar_io {
    ($write_name:ident, $read_name:ident, $ty:ty) => {
        pub fn $write_name(&mut self, v: $ty) {
            if self.failed {
                return;
            }
            let bytes = match self.endian {
                Endian::Little => v.to_le_bytes(),
                Endian::Big => v.to_be_bytes(),
                Endian::Native => v.to_ne_bytes(),
            };
            self.out.extend_from_slice(&bytes);
        }
    };
    (@read $read_name:ident, $ty:ty) => {
        pub fn $read_name(&mut self) -> $ty {
            const N: usize = std::mem::size_of::<$ty>();
            if self.failed || self.remaining() < N {
                self.failed = true;
                return Default::default();
            }
            let bytes: [u8; N] = self.buf[self.pos..self.pos + N].try_into().unwrap();
            self.pos += N;
            match self.endian {
                Endian::Little => <$ty>::from_le_bytes(bytes),
                Endian::Big => <$ty>::from_be_bytes(bytes),
                Endian::Native => <$ty>::from_ne_bytes(bytes),
            }
        }
    };
}

/// A growable write cursor over an owned byte vector. A checked flattener latches a
/// sticky failure flag on overflow rather than panicking; callers should check
/// [`DataFlattener::status`] after a batch of writes if they used `try_reserve`-style
/// fallible growth upstream.
pub struct DataFlattener {
    out: Vec<u8>,
    endian: Endian,
    failed: bool,
}

impl DataFlattener {
    pub fn new(endian: Endian) -> Self {
        Self { out: Vec::new(), endian, failed: false }
    }

    pub fn with_capacity(endian: Endian, cap: usize) -> Self {
        Self { out: Vec::with_capacity(cap), endian, failed: false }
    }

    pub fn status(&self) -> CoreResult<()> {
        if self.failed { Err(CoreError::BadData("flatten overflow".into())) } else { Ok(()) }
    }

    pub fn into_bytes(self) -> CoreResult<Vec<u8>> {
        self.status()?;
        Ok(self.out)
    }

    pub fn current_write_pointer(&self) -> usize {
        self.out.len()
    }

    pub fn seek_to(&mut self, pos: usize) {
        if pos > self.out.len() {
            self.out.resize(pos, 0);
        }
        // writes continue to append; seeking backward for in-place patch is done via
        // `patch_at` rather than truncation, to avoid silently discarding tail bytes.
    }

    pub fn patch_u32_at(&mut self, pos: usize, v: u32) {
        let bytes = match self.endian {
            Endian::Little => v.to_le_bytes(),
            Endian::Big => v.to_be_bytes(),
            Endian::Native => v.to_ne_bytes(),
        };
        if pos + 4 <= self.out.len() {
            self.out[pos..pos + 4].copy_from_slice(&bytes);
        }
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) {
        if self.failed {
            return;
        }
        self.out.extend_from_slice(bytes);
    }

    pub fn write_u8(&mut self, v: u8) {
        self.out.push(v);
    }

    pub fn write_i8(&mut self, v: i8) {
        self.out.push(v as u8);
    }

    pub fn write_bool(&mut self, v: bool) {
        self.out.push(u8::from(v));
    }

    impl_scalar_io!(write_i16, read_i16, i16);
    impl_scalar_io!(write_u16, read_u16, u16);
    impl_scalar_io!(write_i32, read_i32, i32);
    impl_scalar_io!(write_u32, read_u32, u32);
    impl_scalar_io!(write_i64, read_i64, i64);
    impl_scalar_io!(write_u64, read_u64, u64);
    impl_scalar_io!(write_f32, read_f32, f32);
    impl_scalar_io!(write_f64, read_f64, f64);

    /// Writes `s` followed by a terminating NUL, as the wire format's CString encoding
    /// requires.
    pub fn write_cstring(&mut self, s: &str) {
        self.write_bytes(s.as_bytes());
        self.write_u8(0);
    }

    /// Writes a 4-byte length-prefixed, NUL-terminated string: `{u32 len_incl_nul, bytes}`.
    pub fn write_string(&mut self, s: &str) {
        self.write_u32((s.len() + 1) as u32);
        self.write_cstring(s);
    }
}

/// A bounds-checked read cursor over a borrowed byte slice.
pub struct DataUnflattener<'a> {
    buf: &'a [u8],
    pos: usize,
    endian: Endian,
    failed: bool,
}

impl<'a> DataUnflattener<'a> {
    pub fn new(buf: &'a [u8], endian: Endian) -> Self {
        Self { buf, pos: 0, endian, failed: false }
    }

    pub fn status(&self) -> CoreResult<()> {
        if self.failed { Err(CoreError::BadData("unflatten truncated".into())) } else { Ok(()) }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn num_bytes_available(&self) -> usize {
        self.remaining()
    }

    pub fn current_read_pointer(&self) -> usize {
        self.pos
    }

    pub fn seek_to(&mut self, pos: usize) -> CoreResult<()> {
        if pos > self.buf.len() {
            self.failed = true;
            return Err(CoreError::BadData("seek past end".into()));
        }
        self.pos = pos;
        Ok(())
    }

    pub fn seek_relative(&mut self, delta: i64) -> CoreResult<()> {
        let target = self.pos as i64 + delta;
        if target < 0 || target as usize > self.buf.len() {
            self.failed = true;
            return Err(CoreError::BadData("seek out of range".into()));
        }
        self.pos = target as usize;
        Ok(())
    }

    pub fn read_bytes(&mut self, n: usize) -> &'a [u8] {
        if self.failed || self.remaining() < n {
            self.failed = true;
            return &[];
        }
        let s = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        s
    }

    pub fn read_u8(&mut self) -> u8 {
        if self.failed || self.remaining() < 1 {
            self.failed = true;
            return 0;
        }
        let v = self.buf[self.pos];
        self.pos += 1;
        v
    }

    pub fn read_i8(&mut self) -> i8 {
        self.read_u8() as i8
    }

    pub fn read_bool(&mut self) -> bool {
        self.read_u8() != 0
    }

    impl_scalar_io!(@read read_i16, i16);
    impl_scalar_io!(@read read_u16, u16);
    impl_scalar_io!(@read read_i32, i32);
    impl_scalar_io!(@read read_u32, u32);
    impl_scalar_io!(@read read_i64, i64);
    impl_scalar_io!(@read read_u64, u64);
    impl_scalar_io!(@read read_f32, f32);
    impl_scalar_io!(@read read_f64, f64);

    /// Reads bytes up to (and consuming) the next NUL byte, as a UTF-8 string.
    pub fn read_cstring(&mut self) -> CoreResult<String> {
        if self.failed {
            return Err(CoreError::BadData("already failed".into()));
        }
        let nul_offset = self.buf[self.pos..].iter().position(|&b| b == 0).ok_or_else(|| {
            self.failed = true;
            CoreError::BadData("unterminated cstring".into())
        })?;
        let s = std::str::from_utf8(&self.buf[self.pos..self.pos + nul_offset])
            .map_err(|e| {
                self.failed = true;
                CoreError::BadData(format!("invalid utf8: {e}"))
            })?
            .to_owned();
        self.pos += nul_offset + 1;
        Ok(s)
    }

    /// Reads a `{u32 len_incl_nul, bytes}` string field as written by `write_string`.
    pub fn read_string(&mut self) -> CoreResult<String> {
        let len = self.read_u32() as usize;
        if self.failed || len == 0 || self.remaining() < len {
            self.failed = true;
            return Err(CoreError::BadData("bad string length".into()));
        }
        let bytes = self.read_bytes(len);
        let without_nul = bytes.strip_suffix(&[0]).unwrap_or(bytes);
        std::str::from_utf8(without_nul).map(str::to_owned).map_err(|e| {
            self.failed = true;
            CoreError::BadData(format!("invalid utf8: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_round_trip_little_endian() {
        let mut f = DataFlattener::new(Endian::Little);
        f.write_u32(0xDEAD_BEEF);
        f.write_i64(-42);
        f.write_f64(3.5);
        let bytes = f.into_bytes().unwrap();
        let mut u = DataUnflattener::new(&bytes, Endian::Little);
        assert_eq!(u.read_u32(), 0xDEAD_BEEF);
        assert_eq!(u.read_i64(), -42);
        assert_eq!(u.read_f64(), 3.5);
        u.status().unwrap();
    }

    #[test]
    fn string_round_trip() {
        let mut f = DataFlattener::new(Endian::Little);
        f.write_string("hello");
        let bytes = f.into_bytes().unwrap();
        let mut u = DataUnflattener::new(&bytes, Endian::Little);
        assert_eq!(u.read_string().unwrap(), "hello");
    }

    #[test]
    fn truncated_read_sets_sticky_failure() {
        let bytes = [0u8; 2];
        let mut u = DataUnflattener::new(&bytes, Endian::Little);
        let _ = u.read_u32();
        assert!(u.status().is_err());
        assert_eq!(u.read_u8(), 0);
        assert!(u.status().is_err());
    }

    #[test]
    fn big_endian_differs_from_little() {
        let mut f = DataFlattener::new(Endian::Big);
        f.write_u32(1);
        let bytes = f.into_bytes().unwrap();
        assert_eq!(bytes, [0, 0, 0, 1]);
    }
}
