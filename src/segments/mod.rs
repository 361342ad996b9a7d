/*!
 * Segments and canonical translation units.
 *
 * A segment is a fixed-size span of words cut from a cleaned document; its
 * ordinal is its position across the whole run. Segments with identical
 * text share one canonical unit, so every distinct text is translated
 * exactly once:
 * - `chunker`: splits cleaned text into segments
 * - `store`: deduplicates segments and rebuilds the ordered dataset
 */

pub mod chunker;
pub mod store;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::ledger::{UnitRecord, UnitStatus};

pub use chunker::chunk_text;
pub use store::{ExpandedSegment, SegmentStore};

/// SHA-256 hex digest used as the dedup key
pub fn content_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// An immutable span of source text with its run-wide position
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub ordinal: u64,
    pub text: String,
    pub content_hash: String,
    pub source_ref: String,
}

impl Segment {
    pub fn new(ordinal: u64, text: impl Into<String>, source_ref: impl Into<String>) -> Self {
        let text = text.into();
        Self {
            ordinal,
            content_hash: content_hash(&text),
            text,
            source_ref: source_ref.into(),
        }
    }
}

/// The single translation target shared by every segment with the same hash
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalUnit {
    pub content_hash: String,
    pub source_text: String,
    /// Ordinal of the earliest segment carrying this text
    pub first_ordinal: u64,
    pub status: UnitStatus,
    pub translated_text: Option<String>,
}

impl CanonicalUnit {
    pub fn pending(segment: &Segment) -> Self {
        Self {
            content_hash: segment.content_hash.clone(),
            source_text: segment.text.clone(),
            first_ordinal: segment.ordinal,
            status: UnitStatus::Pending,
            translated_text: None,
        }
    }

    pub fn word_count(&self) -> usize {
        word_count(&self.source_text)
    }

    /// Translated text, only once the unit has succeeded
    pub fn translation(&self) -> Option<&str> {
        match self.status {
            UnitStatus::Succeeded => self.translated_text.as_deref(),
            _ => None,
        }
    }
}

impl From<UnitRecord> for CanonicalUnit {
    fn from(record: UnitRecord) -> Self {
        Self {
            content_hash: record.content_hash,
            source_text: record.source_text,
            first_ordinal: record.first_ordinal,
            status: record.status,
            translated_text: record.translated_text,
        }
    }
}
