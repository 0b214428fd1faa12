use crate::subtitle::{EntryKind, SubtitleEntry, Track};

use once_cell::sync::Lazy;
use regex::Regex;

static MARKUP: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\{\s*[^}]*\s*\}|\\N|\\[a-zA-Z]+\d*|\\c&H[0-9A-Fa-f]+&|</?[a-zA-Z][^>]*>").unwrap()
});
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

const CAPTION_HEADER: &str = "Subtitles:";

/// Strips ASS override blocks, escape codes and HTML-like tags, and squeezes
/// the remaining whitespace. Removed markup separates words.
pub fn remove_tags(message: &str) -> String {
    let stripped = MARKUP.replace_all(message, " ");
    WHITESPACE.replace_all(&stripped, " ").trim().to_string()
}

fn decorate(entry: &SubtitleEntry) -> String {
    match entry.kind() {
        EntryKind::Dialogue => entry.text().to_string(),
        EntryKind::Sign => format!("【 {} 】", entry.text()),
        EntryKind::Lyrics => format!("♪ {} ♪", entry.text()),
    }
}

/// Builds the caption posted alongside a frame from the entries matched in
/// each track. Layers of one language share a section, dialogue first.
/// Returns `None` when nothing matched.
pub fn compose<'a, I>(matches: I) -> Option<String>
where
    I: IntoIterator<Item = (&'a Track, &'a SubtitleEntry)>,
{
    let mut sections: Vec<(&'a Track, Vec<&'a SubtitleEntry>)> = Vec::new();
    for (track, entry) in matches {
        if entry.text().trim().is_empty() {
            continue;
        }
        match sections
            .iter_mut()
            .find(|(first, _)| first.language_tag() == track.language_tag())
        {
            Some((_, entries)) => entries.push(entry),
            None => sections.push((track, vec![entry])),
        }
    }

    if sections.is_empty() {
        return None;
    }
    let sections: Vec<String> = sections
        .into_iter()
        .map(|(track, mut entries)| {
            entries.sort_by_key(|e| e.kind());
            let lines: Vec<String> = entries.into_iter().map(decorate).collect();
            format!("[{}]\n{}", track.language(), lines.join("\n"))
        })
        .collect();
    Some(format!("{}\n{}", CAPTION_HEADER, sections.join("\n\n")))
}
