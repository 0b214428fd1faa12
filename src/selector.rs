use crate::error::FramebotError;

use std::time::Duration;

use rand::Rng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCandidate {
    pub offset: Duration,
}

/// Half-open millisecond interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: u64,
    end: u64,
}

/// Parts of `[0, duration)` outside every exclusion window, in order.
fn eligible_spans<I>(duration: u64, used: I, window: u64) -> Vec<Span>
where
    I: IntoIterator<Item = Duration>,
{
    let mut excluded: Vec<Span> = used
        .into_iter()
        .map(|offset| {
            let at = offset.as_millis() as u64;
            Span {
                start: at.saturating_sub(window),
                // A zero window still excludes the used millisecond itself.
                end: at.saturating_add(window.max(1)).min(duration),
            }
        })
        .filter(|s| s.start < s.end)
        .collect();
    excluded.sort_by_key(|s| s.start);

    let mut spans = Vec::new();
    let mut cursor = 0;
    for span in excluded {
        if span.start > cursor {
            spans.push(Span {
                start: cursor,
                end: span.start,
            });
        }
        cursor = cursor.max(span.end);
    }
    if cursor < duration {
        spans.push(Span {
            start: cursor,
            end: duration,
        });
    }
    spans
}

/// Picks an offset in `[0, duration)`, uniformly among the milliseconds that
/// are at least `window` away from every offset in `used`.
///
/// Windows are half-open: a used offset `r` excludes `[r - window, r + window)`.
pub fn select_frame<I, R>(
    duration: Duration,
    used: I,
    window: Duration,
    rng: &mut R,
) -> Result<FrameCandidate, FramebotError>
where
    I: IntoIterator<Item = Duration>,
    R: Rng + ?Sized,
{
    let total_millis = duration.as_millis() as u64;
    let spans = eligible_spans(total_millis, used, window.as_millis() as u64);
    let eligible: u64 = spans.iter().map(|s| s.end - s.start).sum();
    if eligible == 0 {
        return Err(FramebotError::NoEligibleFrame { duration, window });
    }

    let mut pick = rng.gen_range(0..eligible);
    for span in &spans {
        let len = span.end - span.start;
        if pick < len {
            return Ok(FrameCandidate {
                offset: Duration::from_millis(span.start + pick),
            });
        }
        pick -= len;
    }
    unreachable!("pick is below the sum of the span lengths")
}
