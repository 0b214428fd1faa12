use crate::subtitle::{SubtitleEntry, SubtitleLibrary, Track};

use std::time::Duration;

/// Finds the entry on screen at `at`.
///
/// `entries` must be sorted by start and free of overlaps, as produced by the
/// parser. Gaps between entries and zero length entries yield `None`.
pub fn caption_at(entries: &[SubtitleEntry], at: Duration) -> Option<&SubtitleEntry> {
    // Number of entries starting at or before `at`; the candidate is the last of them.
    let idx = entries.partition_point(|e| e.start <= at);
    let candidate = entries.get(idx.checked_sub(1)?)?;
    if at < candidate.end {
        Some(candidate)
    } else {
        None
    }
}

/// Matches `at` against every track of `library` on its own.
pub fn captions_at(library: &SubtitleLibrary, at: Duration) -> Vec<(&Track, &SubtitleEntry)> {
    library
        .tracks()
        .filter_map(|track| caption_at(track.entries(), at).map(|entry| (track, entry)))
        .collect()
}
