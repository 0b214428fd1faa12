use crate::error::FramebotError;

use std::time::Duration;

use nom::bytes::complete::{tag, take_while1, take_while_m_n};
use nom::character::complete::one_of;
use nom::combinator::{map_res, opt, verify};
use nom::error::VerboseError;
use nom::sequence::preceded;
use nom::IResult;

/// Parses a timecode such as `01:02:03,456`, `1:02:03.45` or `02:03.456`.
///
/// Both `,` and `.` are accepted in front of the fractional part. Hours may be
/// left out entirely.
pub(crate) fn timestamp(input: &str) -> IResult<&str, Duration, VerboseError<&str>> {
    const MILLIS_MIN: usize = 0;
    const MILLIS_MAX: usize = 3;
    let take_millis = || {
        map_res(
            take_while_m_n(MILLIS_MIN, MILLIS_MAX, |c: char| c.is_ascii_digit()),
            move |s: &str| {
                if s.len() < MILLIS_MAX {
                    // `,2` is read as `,200`. This also turns the centiseconds of
                    // ASS files (`0:00:01.50`) into the right amount of millis.
                    format!("{:0<3}", s).parse::<u64>()
                } else {
                    s.parse()
                }
            },
        )
    };

    const MS_MIN: usize = 1;
    const MS_MAX: usize = 2;
    let take_ms = || {
        verify(
            map_res(
                take_while_m_n(MS_MIN, MS_MAX, |c: char| c.is_ascii_digit()),
                |s: &str| s.parse::<u64>(),
            ),
            |v: &u64| *v < 60,
        )
    };
    let (input, first) = map_res(take_while1(|c: char| c.is_ascii_digit()), |s: &str| {
        s.parse::<u64>()
    })(input)?;
    let (input, _) = tag(":")(input)?;
    let (input, second) = take_ms()(input)?;
    let (input, third) = opt(preceded(tag(":"), take_ms()))(input)?;
    let (input, _) = one_of(",.")(input)?;
    let (input, millis) = take_millis()(input)?;

    let out_of_range = || -> nom::Err<VerboseError<&str>> {
        nom::Err::Error(nom::error::make_error(
            input,
            nom::error::ErrorKind::Verify,
        ))
    };
    let (hours, minutes, seconds) = match third {
        Some(seconds) => (first, second, seconds),
        None if first < 60 => (0, first, second),
        None => return Err(out_of_range()),
    };

    // Any number of hour digits is accepted, so the total has to be checked.
    let total = hours
        .checked_mul(60)
        .and_then(|m| m.checked_add(minutes))
        .and_then(|m| m.checked_mul(60))
        .and_then(|s| s.checked_add(seconds))
        .and_then(|s| s.checked_mul(1000))
        .and_then(|ms| ms.checked_add(millis))
        .ok_or_else(out_of_range)?;

    Ok((input, Duration::from_millis(total)))
}

pub fn parse_timecode(input: &str) -> Result<Duration, FramebotError> {
    let trimmed = input.trim();
    match timestamp(trimmed) {
        Ok(("", duration)) => Ok(duration),
        _ => Err(FramebotError::Timecode(input.to_string())),
    }
}

pub fn format_timecode(timestamp: Duration) -> String {
    let total_secs = timestamp.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    let millis = timestamp.subsec_millis();
    format!("{:02}:{:02}:{:02}.{:03}", hours, minutes, seconds, millis)
}

/// First whole millisecond at which `frame` is on screen in a video running at
/// `fps` frames per second.
pub fn frame_to_offset(frame: u64, fps: f64) -> Option<Duration> {
    if !fps.is_finite() || fps <= 0.0 {
        return None;
    }
    let millis = (frame as f64 * 1000.0 / fps - 1e-6).ceil().max(0.0);
    Some(Duration::from_millis(millis as u64))
}

/// The frame on screen at `offset`.
pub fn offset_to_frame(offset: Duration, fps: f64) -> Option<u64> {
    if !fps.is_finite() || fps <= 0.0 {
        return None;
    }
    // Offsets are whole millis, nudge so that round trips land on the same frame.
    let frame = offset.as_millis() as f64 * fps / 1000.0 + 1e-6;
    Some(frame.floor() as u64)
}

/// Serde adapter storing a `Duration` as a human readable timecode.
pub mod serde_timecode {
    use super::{format_timecode, parse_timecode};

    use std::time::Duration;

    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format_timecode(*value))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse_timecode(&raw).map_err(de::Error::custom)
    }
}
