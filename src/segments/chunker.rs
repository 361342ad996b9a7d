use crate::errors::SegmentError;

use super::Segment;

/// Split cleaned text into `chunk_size`-word segments numbered from `first_ordinal`.
///
/// Words are re-joined with single spaces so that identical word runs hash
/// identically regardless of the original spacing.
pub fn chunk_text(
    text: &str,
    chunk_size: usize,
    source_ref: &str,
    first_ordinal: u64,
) -> Result<Vec<Segment>, SegmentError> {
    if chunk_size == 0 {
        return Err(SegmentError::InvalidChunkSize);
    }

    let words: Vec<&str> = text.split_whitespace().collect();

    Ok(words
        .chunks(chunk_size)
        .enumerate()
        .map(|(i, chunk)| Segment::new(first_ordinal + i as u64, chunk.join(" "), source_ref))
        .collect())
}
