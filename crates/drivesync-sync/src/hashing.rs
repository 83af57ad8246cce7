//! Content digests
//!
//! Local and remote sides are compared by digest, so the algorithm must
//! match the one the remote store reports. md5 is the default because it
//! is the checksum most object stores expose.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest, Sha256};

use drivesync_core::domain::ContentHash;

/// Supported digest algorithms
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Md5 => "md5",
            Self::Sha256 => "sha256",
        }
    }

    /// Starts an incremental digest
    pub fn hasher(&self) -> ContentHasher {
        match self {
            Self::Md5 => ContentHasher::Md5(md5::Context::new()),
            Self::Sha256 => ContentHasher::Sha256(Sha256::new()),
        }
    }

    /// Digest of an in-memory buffer
    pub fn digest(&self, data: &[u8]) -> ContentHash {
        let mut hasher = self.hasher();
        hasher.update(data);
        hasher.finish()
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "md5" => Ok(Self::Md5),
            "sha256" => Ok(Self::Sha256),
            other => Err(format!("unknown hash algorithm '{other}'; valid: md5, sha256")),
        }
    }
}

/// Incremental digest state, fed chunk by chunk while streaming a file
pub enum ContentHasher {
    Md5(md5::Context),
    Sha256(Sha256),
}

impl ContentHasher {
    pub fn update(&mut self, chunk: &[u8]) {
        match self {
            Self::Md5(ctx) => ctx.consume(chunk),
            Self::Sha256(hasher) => hasher.update(chunk),
        }
    }

    pub fn finish(self) -> ContentHash {
        match self {
            Self::Md5(ctx) => ContentHash::from_digest(&ctx.compute().0),
            Self::Sha256(hasher) => ContentHash::from_digest(hasher.finalize().as_slice()),
        }
    }
}
