//! Incremental MD5/SHA-1 hashing. Used directly by the WebSocket handshake's
//! `Sec-WebSocket-Accept` computation, and available generically elsewhere.

use md5::{Digest, Md5};
use sha1::Sha1;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashAlgorithm {
    Md5,
    Sha1,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum HashResult {
    Md5([u8; 16]),
    Sha1([u8; 20]),
}

impl HashResult {
    pub fn as_bytes(&self) -> &[u8] {
        match self {
            HashResult::Md5(b) => b,
            HashResult::Sha1(b) => b,
        }
    }

    pub fn to_hex(&self) -> String {
        self.as_bytes().iter().map(|b| format!("{b:02x}")).collect()
    }
}

enum Inner {
    Md5(Md5),
    Sha1(Sha1),
}

/// Wraps one of the two hash algorithms behind a single `update`/`finish` API,
/// so callers that accumulate bytes over multiple reads don't need to branch
/// on which algorithm they asked for.
pub struct IncrementalHashCalculator {
    inner: Inner,
}

impl IncrementalHashCalculator {
    pub fn new(algorithm: HashAlgorithm) -> Self {
        let inner = match algorithm {
            HashAlgorithm::Md5 => Inner::Md5(Md5::new()),
            HashAlgorithm::Sha1 => Inner::Sha1(Sha1::new()),
        };
        Self { inner }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        match &mut self.inner {
            Inner::Md5(h) => h.update(bytes),
            Inner::Sha1(h) => h.update(bytes),
        }
    }

    pub fn finish(self) -> HashResult {
        match self.inner {
            Inner::Md5(h) => HashResult::Md5(h.finalize().into()),
            Inner::Sha1(h) => HashResult::Sha1(h.finalize().into()),
        }
    }
}

/// Convenience one-shot: `new` + `update` + `finish` in a single call.
pub fn hash_single_shot(algorithm: HashAlgorithm, bytes: &[u8]) -> HashResult {
    let mut calc = IncrementalHashCalculator::new(algorithm);
    calc.update(bytes);
    calc.finish()
}
