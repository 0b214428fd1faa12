use crate::caption::remove_tags;
use crate::error::ParseError;
use crate::subtitle::{EntryKind, SubtitleEntry};
use crate::timecode::{parse_timecode, timestamp};

use std::time::Duration;

use nom::bytes::complete::{tag, take_while, take_while1};
use nom::character::complete::{line_ending, multispace0, space0, space1};
use nom::combinator::{opt, verify};
use nom::error::{convert_error, ErrorKind, VerboseError};
use nom::multi::many_till;
use nom::sequence::terminated;
use nom::{branch::alt, error_position, Err, IResult};
use once_cell::sync::Lazy;
use regex::Regex;

static SIGN_STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)^\s*signs?").unwrap());
static LYRICS_STYLE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)lyrics?|songs?").unwrap());

/// Blocks of a WebVTT file that never carry cues.
const VTT_META_BLOCKS: &[&str] = &["WEBVTT", "NOTE", "STYLE", "REGION"];

/// Parses one subtitle track.
///
/// SRT and WebVTT cues are expected in order. ASS/SSA events have no defined
/// order and are sorted by their start time first.
pub fn parse_track(input: &str) -> Result<Vec<SubtitleEntry>, ParseError> {
    let input = input.trim_start_matches('\u{FEFF}');
    if is_ass(input) {
        let mut entries = ass_events(input)?;
        entries.sort_by_key(|(_, e)| e.start);
        validate(entries)
    } else {
        match cue_file(input) {
            Ok((_, entries)) => validate(entries.into_iter().enumerate().collect()),
            Err(Err::Error(err)) | Err(Err::Failure(err)) => {
                Err(ParseError::Malformed(convert_error(input, err)))
            }
            Err(Err::Incomplete(_)) => {
                unreachable!("Incomplete data received by non-streaming parser.")
            }
        }
    }
}

/// Parses one subtitle file into layers that are each a valid track on their
/// own.
///
/// SRT and WebVTT files have a single dialogue layer. ASS/SSA scripts commonly
/// show signs and lyrics at the same time as dialogue, so their events are
/// split by kind and every kind is validated separately. The dialogue layer is
/// always present, the others only when the script has such events.
pub fn parse_layers(input: &str) -> Result<Vec<(EntryKind, Vec<SubtitleEntry>)>, ParseError> {
    let input = input.trim_start_matches('\u{FEFF}');
    if !is_ass(input) {
        return Ok(vec![(EntryKind::Dialogue, parse_track(input)?)]);
    }

    let events = ass_events(input)?;
    let mut layers = Vec::new();
    for &kind in &[EntryKind::Dialogue, EntryKind::Sign, EntryKind::Lyrics] {
        let mut layer: Vec<(usize, SubtitleEntry)> = events
            .iter()
            .filter(|(_, e)| e.kind == kind)
            .cloned()
            .collect();
        if layer.is_empty() && kind != EntryKind::Dialogue {
            continue;
        }
        layer.sort_by_key(|(_, e)| e.start);
        layers.push((kind, validate(layer)?));
    }
    Ok(layers)
}

/// Checks the track invariants. Positions in errors are 1-based and refer to
/// the order of the entries in the file.
fn validate(entries: Vec<(usize, SubtitleEntry)>) -> Result<Vec<SubtitleEntry>, ParseError> {
    let mut valid: Vec<SubtitleEntry> = Vec::with_capacity(entries.len());
    for (pos, entry) in entries {
        let entry_no = pos + 1;
        if entry.end < entry.start {
            return Err(ParseError::EndBeforeStart { entry: entry_no });
        }
        if let Some(prev) = valid.last() {
            if entry.start < prev.start {
                return Err(ParseError::OutOfOrder { entry: entry_no });
            }
            if entry.start < prev.end {
                return Err(ParseError::Overlap { entry: entry_no });
            }
        }
        valid.push(entry);
    }
    Ok(valid)
}

fn is_ass(input: &str) -> bool {
    input
        .lines()
        .map(str::trim)
        .any(|l| l.eq_ignore_ascii_case("[script info]") || l.eq_ignore_ascii_case("[events]"))
}

fn cue_file(input: &str) -> IResult<&str, Vec<SubtitleEntry>, VerboseError<&str>> {
    let (input, subs) = all_cues(input)?;
    let (input, _) = end_of_file(input)?;
    Ok((input, subs))
}

fn all_cues(input: &str) -> IResult<&str, Vec<SubtitleEntry>, VerboseError<&str>> {
    let mut parsed_subs = Vec::new();
    let (mut input, _) = multispace0(input)?;
    loop {
        if VTT_META_BLOCKS.iter().any(|b| input.starts_with(b)) {
            let (rem_input, _) = sub_text(input)?;
            let (rem_input, _) = multispace0(rem_input)?;
            input = rem_input;
            continue;
        }
        match cue(input) {
            Ok((rem_input, subtitle)) => {
                parsed_subs.push(subtitle);
                let (rem_input, _) = multispace0(rem_input)?;
                input = rem_input;
            }
            Err(err) => {
                if input.is_empty() {
                    return Ok((input, parsed_subs));
                } else {
                    return Err(err);
                }
            }
        }
    }
}

fn cue(input: &str) -> IResult<&str, SubtitleEntry, VerboseError<&str>> {
    let (input, _) = opt(terminated(cue_identifier, line_ending))(input)?;
    let (input, (start, end)) = terminated(show_hide, line_ending)(input)?;
    let (input, lines) = sub_text(input)?;
    let text = lines
        .into_iter()
        .map(remove_tags)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok((input, SubtitleEntry::new(start, end, text)))
}

/// The sequence number of an SRT cue, or the optional identifier of a VTT cue.
fn cue_identifier(input: &str) -> IResult<&str, &str, VerboseError<&str>> {
    verify(take_while1(|c: char| c != '\n' && c != '\r'), |s: &str| {
        !s.contains("-->")
    })(input)
}

fn end_of_file(input: &str) -> IResult<&str, &str, VerboseError<&str>> {
    if input.is_empty() {
        Ok((input, input))
    } else {
        std::result::Result::Err(Err::Error(error_position!(input, ErrorKind::Eof)))
    }
}

fn sub_text(input: &str) -> IResult<&str, Vec<&str>, VerboseError<&str>> {
    let line = terminated(
        take_while1(|c: char| c != '\n' && c != '\r'),
        alt((line_ending, end_of_file)),
    );

    let (input, (lines, _)) = many_till(line, alt((line_ending, end_of_file)))(input)?;

    Ok((input, lines))
}

fn show_hide(input: &str) -> IResult<&str, (Duration, Duration), VerboseError<&str>> {
    let (input, show_at) = timestamp(input)?;
    let (input, _) = space1(input)?;
    let (input, _) = tag("-->")(input)?;
    let (input, _) = space1(input)?;
    let (input, hide_at) = timestamp(input)?;
    let (input, _) = space0(input)?;
    // VTT cue settings, e.g. `align:center position:50%`
    let (input, _) = take_while(|c: char| c != '\n' && c != '\r')(input)?;

    Ok((input, (show_at, hide_at)))
}

struct EventFormat {
    fields: usize,
    start: usize,
    end: usize,
    style: Option<usize>,
    name: Option<usize>,
    text: usize,
}

impl Default for EventFormat {
    fn default() -> Self {
        // Layer, Start, End, Style, Name, MarginL, MarginR, MarginV, Effect, Text
        Self {
            fields: 10,
            start: 1,
            end: 2,
            style: Some(3),
            name: Some(4),
            text: 9,
        }
    }
}

impl EventFormat {
    fn parse(line: &str) -> Result<Self, ParseError> {
        let names: Vec<String> = line.split(',').map(|f| f.trim().to_lowercase()).collect();
        let position = |name: &str| names.iter().position(|n| n == name);
        let missing = |name: &str| ParseError::Malformed(format!("event format lacks '{}'", name));

        let text = position("text").ok_or_else(|| missing("Text"))?;
        if text != names.len() - 1 {
            return Err(ParseError::Malformed(
                "'Text' must be the last event field".to_string(),
            ));
        }
        Ok(Self {
            fields: names.len(),
            start: position("start").ok_or_else(|| missing("Start"))?,
            end: position("end").ok_or_else(|| missing("End"))?,
            style: position("style"),
            name: position("name"),
            text,
        })
    }
}

/// Reads the `Dialogue` events of an ASS/SSA script, paired with their position
/// among the dialogue lines.
fn ass_events(input: &str) -> Result<Vec<(usize, SubtitleEntry)>, ParseError> {
    let mut in_events = false;
    let mut format = EventFormat::default();
    let mut entries = Vec::new();

    for line in input.lines().map(str::trim) {
        if line.starts_with('[') && line.ends_with(']') {
            in_events = line.eq_ignore_ascii_case("[events]");
            continue;
        }
        if !in_events {
            continue;
        }
        if let Some(rest) = line.strip_prefix("Format:") {
            format = EventFormat::parse(rest)?;
        } else if let Some(rest) = line.strip_prefix("Dialogue:") {
            let pos = entries.len();
            entries.push((pos, dialogue(rest, &format, pos + 1)?));
        }
    }
    Ok(entries)
}

fn dialogue(line: &str, format: &EventFormat, entry: usize) -> Result<SubtitleEntry, ParseError> {
    // The text is the last field and may contain commas itself.
    let fields: Vec<&str> = line.trim_start().splitn(format.fields, ',').collect();
    if fields.len() != format.fields {
        return Err(ParseError::Malformed(format!(
            "dialogue {} has {} fields, expected {}",
            entry,
            fields.len(),
            format.fields
        )));
    }
    let time = |idx: usize| {
        parse_timecode(fields[idx]).map_err(|err| {
            ParseError::Malformed(format!("dialogue {}: {}", entry, err))
        })
    };
    let start = time(format.start)?;
    let end = time(format.end)?;

    let style = format.style.map_or("", |i| fields[i]);
    let name = format.name.map_or("", |i| fields[i]);
    let kind = if SIGN_STYLE.is_match(style) || SIGN_STYLE.is_match(name) {
        EntryKind::Sign
    } else if LYRICS_STYLE.is_match(style) || LYRICS_STYLE.is_match(name) {
        EntryKind::Lyrics
    } else {
        EntryKind::Dialogue
    };

    let text = fields[format.text]
        .split("\\N")
        .flat_map(|l| l.split("\\n"))
        .map(remove_tags)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join("\n");

    Ok(SubtitleEntry::new(start, end, text).with_kind(kind))
}
