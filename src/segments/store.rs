/*!
 * Segment store: deduplication and ordered reconstruction.
 */

use std::collections::{BTreeMap, HashMap};

use serde::Serialize;

use crate::errors::SegmentError;

use super::{CanonicalUnit, Segment};

/// One dataset row rebuilt from a segment and its unit's translation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpandedSegment {
    pub ordinal: u64,
    pub content_hash: String,
    pub source_text: String,
    pub translated_text: String,
    pub source_ref: String,
    /// True for every occurrence after the first of the same text
    pub is_duplicate: bool,
}

/// All segments of a run, keyed by ordinal, plus their canonical units
#[derive(Debug, Clone, Default)]
pub struct SegmentStore {
    segments: BTreeMap<u64, Segment>,
    units: HashMap<String, CanonicalUnit>,
}

impl SegmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild a store from segments persisted by an earlier invocation
    pub fn from_segments(segments: impl IntoIterator<Item = Segment>) -> Result<Self, SegmentError> {
        let mut store = Self::new();
        for segment in segments {
            store.insert(segment)?;
        }
        Ok(store)
    }

    /// Add a segment of cleaned text at `ordinal`
    pub fn add(
        &mut self,
        text: &str,
        ordinal: u64,
        source_ref: &str,
    ) -> Result<Segment, SegmentError> {
        let segment = Segment::new(ordinal, text, source_ref);
        self.insert(segment.clone())?;
        Ok(segment)
    }

    pub fn insert(&mut self, segment: Segment) -> Result<(), SegmentError> {
        if self.segments.contains_key(&segment.ordinal) {
            return Err(SegmentError::DuplicateOrdinal(segment.ordinal));
        }

        self.units
            .entry(segment.content_hash.clone())
            .and_modify(|unit| unit.first_ordinal = unit.first_ordinal.min(segment.ordinal))
            .or_insert_with(|| CanonicalUnit::pending(&segment));

        self.segments.insert(segment.ordinal, segment);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Segments in ordinal order
    pub fn segments(&self) -> impl Iterator<Item = &Segment> {
        self.segments.values()
    }

    /// One unit per distinct text, ordered by the ordinal it was first seen at
    pub fn unique_units(&self) -> Vec<CanonicalUnit> {
        let mut units: Vec<CanonicalUnit> = self.units.values().cloned().collect();
        units.sort_by_key(|unit| unit.first_ordinal);
        units
    }

    /// Map every segment to its unit's translation, in ordinal order.
    ///
    /// Fails on the first segment whose unit has not succeeded. Calling it
    /// twice with the same units yields the same result.
    pub fn expand(&self, translated: &[CanonicalUnit]) -> Result<Vec<(u64, String)>, SegmentError> {
        let by_hash = index_by_hash(translated);

        self.segments
            .values()
            .map(|segment| {
                by_hash
                    .get(segment.content_hash.as_str())
                    .and_then(|unit| unit.translation())
                    .map(|text| (segment.ordinal, text.to_string()))
                    .ok_or_else(|| SegmentError::MissingTranslation {
                        ordinal: segment.ordinal,
                        content_hash: segment.content_hash.clone(),
                    })
            })
            .collect()
    }

    /// Like `expand`, but skips segments whose unit has no translation yet
    pub fn expand_available(&self, translated: &[CanonicalUnit]) -> Vec<ExpandedSegment> {
        let by_hash = index_by_hash(translated);

        self.segments
            .values()
            .filter_map(|segment| {
                let text = by_hash.get(segment.content_hash.as_str())?.translation()?;
                let first_ordinal = self
                    .units
                    .get(&segment.content_hash)
                    .map_or(segment.ordinal, |unit| unit.first_ordinal);

                Some(ExpandedSegment {
                    ordinal: segment.ordinal,
                    content_hash: segment.content_hash.clone(),
                    source_text: segment.text.clone(),
                    translated_text: text.to_string(),
                    source_ref: segment.source_ref.clone(),
                    is_duplicate: segment.ordinal != first_ordinal,
                })
            })
            .collect()
    }
}

fn index_by_hash(units: &[CanonicalUnit]) -> HashMap<&str, &CanonicalUnit> {
    units
        .iter()
        .map(|unit| (unit.content_hash.as_str(), unit))
        .collect()
}
