use crate::error::ParseError;
use crate::parser;

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};

const SUBTITLE_EXTENSIONS: &[&str] = &["srt", "vtt", "ass", "ssa"];

const LANGUAGE_NAMES: &[(&str, &str)] = &[
    ("en", "English"),
    ("pt", "Português"),
    ("es", "Español"),
    ("spa", "Español"),
    ("ja", "Japanese"),
    ("ko", "Korean"),
    ("zh-cn", "Chinese (Simplified)"),
    ("zh-tw", "Chinese (Traditional)"),
    ("fr", "Français"),
    ("de", "Deutsch"),
    ("it", "Italiano"),
    ("ru", "Русский (Russian)"),
    ("tr", "Türkçe (Turkish)"),
    ("vi", "Tiếng Việt (Vietnamese)"),
    ("nl", "Nederlands (Dutch)"),
    ("uk", "Українська (Ukrainian)"),
    ("id", "Bahasa Indonesia (Indonesian)"),
    ("tl", "Tagalog (Filipino)"),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EntryKind {
    Dialogue,
    /// On-screen text, such as a sign or a letter.
    Sign,
    Lyrics,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubtitleEntry {
    pub(crate) start: Duration,
    pub(crate) end: Duration,
    /// Display lines joined with `\n`.
    pub(crate) text: String,
    pub(crate) kind: EntryKind,
}

impl SubtitleEntry {
    pub fn new(start: Duration, end: Duration, text: impl Into<String>) -> Self {
        Self {
            start,
            end,
            text: text.into(),
            kind: EntryKind::Dialogue,
        }
    }

    pub fn with_kind(mut self, kind: EntryKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn start(&self) -> Duration {
        self.start
    }

    pub fn end(&self) -> Duration {
        self.end
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn kind(&self) -> EntryKind {
        self.kind
    }

    /// Zero length entries are valid, but can never contain a timestamp.
    pub fn is_zero_duration(&self) -> bool {
        self.start == self.end
    }
}

/// A single language of an episode's subtitles, or one layer of it.
///
/// Signs and lyrics of ASS scripts live in layers of their own, tagged
/// `en.signs` and `en.lyrics` next to the `en` dialogue.
#[derive(Debug, Clone)]
pub struct Track {
    tag: String,
    entries: Vec<SubtitleEntry>,
}

impl Track {
    pub fn new(tag: impl Into<String>, entries: Vec<SubtitleEntry>) -> Self {
        Self {
            tag: tag.into(),
            entries,
        }
    }

    /// Parses a subtitle file into one track per layer, dialogue first.
    pub fn parse_layers(tag: &str, content: &str) -> Result<Vec<Self>, ParseError> {
        Ok(parser::parse_layers(content)?
            .into_iter()
            .map(|(kind, entries)| Self::new(layer_tag(tag, kind), entries))
            .collect())
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The tag without its layer suffix.
    pub fn language_tag(&self) -> &str {
        self.tag.split('.').next().unwrap_or("")
    }

    pub fn language(&self) -> &'static str {
        language_name(self.language_tag())
    }

    pub fn entries(&self) -> &[SubtitleEntry] {
        &self.entries
    }
}

pub fn language_name(tag: &str) -> &'static str {
    let tag = tag.to_lowercase();
    LANGUAGE_NAMES
        .iter()
        .find(|(code, _)| *code == tag)
        .map_or("Unknown", |(_, name)| *name)
}

fn layer_tag(tag: &str, kind: EntryKind) -> String {
    match kind {
        EntryKind::Dialogue => tag.to_string(),
        EntryKind::Sign => format!("{}.signs", tag),
        EntryKind::Lyrics => format!("{}.lyrics", tag),
    }
}

/// Track tag of a subtitle file: `episode01.en.ass` is tagged `en`.
pub(crate) fn track_tag(path: &Path) -> Option<String> {
    let stem = path.file_stem()?.to_str()?;
    let tag = stem.rsplit('.').next().unwrap_or(stem);
    Some(tag.to_string())
}

/// All subtitle tracks available for one episode, keyed by track tag.
#[derive(Debug, Clone, Default)]
pub struct SubtitleLibrary {
    tracks: BTreeMap<String, Track>,
}

impl SubtitleLibrary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, track: Track) {
        self.tracks.insert(track.tag.clone(), track);
    }

    /// Loads every subtitle file in `dir`.
    ///
    /// A file that cannot be read or parsed is left out with an error in the
    /// log, the remaining tracks are still usable. A missing directory yields
    /// an empty library.
    pub fn load_dir<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref();
        let mut library = Self::new();
        if !dir.is_dir() {
            log::warn!("Subtitle directory '{}' does not exist", dir.display());
            return Ok(library);
        }

        let mut paths = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Failed to list subtitle directory: '{}'", dir.display()))?
        {
            let path = match entry {
                Ok(entry) => entry.path(),
                Err(err) => {
                    log::error!("Failed to list an entry of '{}': {}", dir.display(), err);
                    continue;
                }
            };
            let is_subtitle = path
                .extension()
                .and_then(|e| e.to_str())
                .map_or(false, |e| SUBTITLE_EXTENSIONS.contains(&e.to_lowercase().as_str()));
            if path.is_file() && is_subtitle {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let tag = match track_tag(&path) {
                Some(tag) => tag,
                None => continue,
            };
            if library.tracks.contains_key(&tag) {
                log::warn!(
                    "Ignoring '{}', track '{}' is already loaded",
                    path.display(),
                    tag
                );
                continue;
            }
            let content = match std::fs::read_to_string(&path) {
                Ok(content) => content,
                Err(err) => {
                    log::error!("Failed to read subtitle file '{}': {}", path.display(), err);
                    continue;
                }
            };
            match Track::parse_layers(&tag, &content) {
                Ok(tracks) => {
                    for track in tracks {
                        log::debug!(
                            "Loaded track '{}' ({} entries) from '{}'",
                            track.tag(),
                            track.entries().len(),
                            path.display()
                        );
                        library.insert(track);
                    }
                }
                Err(err) => log::error!("Rejected subtitle track '{}': {}", path.display(), err),
            }
        }
        Ok(library)
    }

    pub fn track(&self, tag: &str) -> Option<&[SubtitleEntry]> {
        self.tracks.get(tag).map(|t| t.entries())
    }

    pub fn tracks(&self) -> impl Iterator<Item = &Track> {
        self.tracks.values()
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }
}
