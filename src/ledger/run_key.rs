/*!
 * Run key derivation.
 *
 * A run key identifies one logical run: the same inputs with the same
 * chunking and language pair always map to the same key, and any change
 * to them starts a different run.
 */

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Identity of one input file: where it came from and what it contained
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct InputFingerprint {
    pub source_ref: String,
    pub content_hash: String,
}

/// Parameters that change the segment set and therefore the run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunParameters {
    pub chunk_size: usize,
    pub source_language: String,
    pub target_language: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunKey(String);

impl RunKey {
    pub fn derive(inputs: &[InputFingerprint], params: &RunParameters) -> Self {
        let mut sorted: Vec<&InputFingerprint> = inputs.iter().collect();
        sorted.sort();

        let mut hasher = Sha256::new();
        for input in sorted {
            hasher.update(input.source_ref.as_bytes());
            hasher.update([0u8]);
            hasher.update(input.content_hash.as_bytes());
            hasher.update([0u8]);
        }
        hasher.update(params.chunk_size.to_le_bytes());
        hasher.update(params.source_language.as_bytes());
        hasher.update([0u8]);
        hasher.update(params.target_language.as_bytes());

        Self(format!("{:x}", hasher.finalize()))
    }

    /// Wrap a key read back from storage
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First twelve hex digits, for log lines
    pub fn short(&self) -> &str {
        &self.0[..self.0.len().min(12)]
    }

    /// Seed for anything that must be reproducible per run
    pub fn seed(&self) -> u64 {
        let digest = Sha256::digest(self.0.as_bytes());
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&digest[..8]);
        u64::from_le_bytes(bytes)
    }
}

impl fmt::Display for RunKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
