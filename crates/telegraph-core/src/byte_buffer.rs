use crate::error::{CoreError, CoreResult};

const SMALL_BUFFER_THRESHOLD: usize = 64;
const LARGE_BUFFER_THRESHOLD: usize = 64 * 1024;
const LARGE_BUFFER_ROUNDING: usize = 4096;

/// Rounds `needed` up per the hybrid growth policy: exact below
/// [`SMALL_BUFFER_THRESHOLD`], next-power-of-two below [`LARGE_BUFFER_THRESHOLD`],
/// and rounded up to a multiple of [`LARGE_BUFFER_ROUNDING`] above that.
fn grown_capacity(needed: usize) -> usize {
    if needed <= SMALL_BUFFER_THRESHOLD {
        needed
    } else if needed <= LARGE_BUFFER_THRESHOLD {
        needed.next_power_of_two()
    } else {
        needed.div_ceil(LARGE_BUFFER_ROUNDING) * LARGE_BUFFER_ROUNDING
    }
}

/// An owning byte array with a growth policy tuned for Message-sized payloads:
/// exact allocation for small buffers, power-of-two for medium ones, and
/// 4096-byte-multiple rounding for large ones, so that repeated small appends don't
/// reallocate on every call but huge buffers don't waste half their allocation either.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ByteBuffer {
    data: Vec<u8>,
}

impl ByteBuffer {
    pub fn new() -> Self {
        Self { data: Vec::new() }
    }

    pub fn with_capacity(cap: usize) -> Self {
        Self { data: Vec::with_capacity(grown_capacity(cap)) }
    }

    pub fn adopt_buffer(data: Vec<u8>) -> Self {
        Self { data }
    }

    pub fn release_buffer(self) -> Vec<u8> {
        self.data
    }

    pub fn num_bytes(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Resizes the valid length to `n`. If growing and `retain_data` is true, new bytes
    /// are zero-filled; if growing and `retain_data` is false, new bytes are
    /// uninitialized-equivalent garbage from the caller's point of view (we still zero
    /// them, since Rust offers no safe uninitialized `Vec<u8>` growth, but callers must
    /// not rely on the value).
    pub fn set_num_bytes(&mut self, n: usize, retain_data: bool) -> CoreResult<()> {
        if n == 0 {
            self.data.clear();
            self.data.shrink_to_fit();
            return Ok(());
        }
        if !retain_data {
            self.data.clear();
        }
        if n > self.data.capacity() {
            let target = grown_capacity(n);
            self.data.try_reserve(target.saturating_sub(self.data.len())).map_err(|_| {
                CoreError::OutOfMemory { requested: target }
            })?;
        }
        self.data.resize(n, 0);
        Ok(())
    }

    pub fn append_bytes(&mut self, bytes: &[u8]) -> CoreResult<()> {
        let needed = self.data.len() + bytes.len();
        if needed > self.data.capacity() {
            let target = grown_capacity(needed);
            self.data
                .try_reserve(target - self.data.len())
                .map_err(|_| CoreError::OutOfMemory { requested: target })?;
        }
        self.data.extend_from_slice(bytes);
        Ok(())
    }

    pub fn free_extra_bytes(&mut self) {
        self.data.shrink_to_fit();
    }

    pub fn swap_contents(&mut self, other: &mut Self) {
        std::mem::swap(&mut self.data, &mut other.data);
    }
}

impl From<Vec<u8>> for ByteBuffer {
    fn from(data: Vec<u8>) -> Self {
        Self::adopt_buffer(data)
    }
}

impl From<ByteBuffer> for Vec<u8> {
    fn from(buf: ByteBuffer) -> Self {
        buf.release_buffer()
    }
}

impl AsRef<[u8]> for ByteBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn growth_policy_thresholds() {
        assert_eq!(grown_capacity(10), 10);
        assert_eq!(grown_capacity(100), 128);
        assert_eq!(grown_capacity(100_000), 102400);
    }

    #[test]
    fn set_num_bytes_retains_prefix() {
        let mut b = ByteBuffer::new();
        b.append_bytes(&[1, 2, 3, 4]).unwrap();
        b.set_num_bytes(2, true).unwrap();
        assert_eq!(b.as_slice(), &[1, 2]);
        b.set_num_bytes(4, true).unwrap();
        assert_eq!(&b.as_slice()[..2], &[1, 2]);
    }

    #[test]
    fn zero_num_bytes_releases() {
        let mut b = ByteBuffer::new();
        b.append_bytes(&[1, 2, 3]).unwrap();
        b.set_num_bytes(0, true).unwrap();
        assert!(b.is_empty());
        assert_eq!(b.as_slice().len(), 0);
    }

    #[test]
    fn swap_contents_exchanges_buffers() {
        let mut a = ByteBuffer::from(vec![1, 2, 3]);
        let mut b = ByteBuffer::from(vec![9, 9]);
        a.swap_contents(&mut b);
        assert_eq!(a.as_slice(), &[9, 9]);
        assert_eq!(b.as_slice(), &[1, 2, 3]);
    }
}
