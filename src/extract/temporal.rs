//! Temporal reference rewriting.
//!
//! Extracted content like "call me tomorrow at 3 pm" is only useful later if
//! "tomorrow" is pinned to a calendar date at extraction time. The first
//! relative reference found is annotated in place with the absolute date,
//! and the parsed datetime is returned for `context.scheduled_date`.

use chrono::{DateTime, Duration, Timelike, Utc};
use regex::Regex;

enum Offset {
    /// Fixed day offset from the reference date.
    Days(i64),
    /// Day offset captured from the text, scaled by this many days per unit.
    CapturedUnits(i64),
}

fn patterns() -> Vec<(Regex, Offset)> {
    // Compiled per call; extraction volume is a few candidates per turn.
    let table: [(&str, Offset); 8] = [
        (r"(?i)\btomorrow\b", Offset::Days(1)),
        (r"(?i)\btoday\b", Offset::Days(0)),
        (r"(?i)\byesterday\b", Offset::Days(-1)),
        (r"(?i)\bnext week\b", Offset::Days(7)),
        (r"(?i)\bnext month\b", Offset::Days(30)),
        (r"(?i)\bin (\d+) days?\b", Offset::CapturedUnits(1)),
        (r"(?i)\bin (\d+) weeks?\b", Offset::CapturedUnits(7)),
        (r"(?i)\bin (\d+) months?\b", Offset::CapturedUnits(30)),
    ];
    table.into_iter()
        .filter_map(|(pattern, offset)| Regex::new(pattern).ok().map(|re| (re, offset)))
        .collect()
}

/// Rewrite the first relative temporal reference in `text` to carry an
/// absolute date, resolved against `reference`.
///
/// Returns the enhanced text and the parsed absolute datetime, when one was
/// found.
pub fn rewrite_temporal(
    text: &str,
    reference: DateTime<Utc>,
) -> (String, Option<DateTime<Utc>>) {
    for (regex, offset) in patterns() {
        let Some(captures) = regex.captures(text) else {
            continue;
        };

        let days = match offset {
            Offset::Days(days) => days,
            Offset::CapturedUnits(per_unit) => {
                let Some(n) = captures.get(1).and_then(|m| m.as_str().parse::<i64>().ok()) else {
                    continue;
                };
                n.saturating_mul(per_unit)
            }
        };

        let mut target = reference + Duration::days(days);

        // Pin an explicit clock time when one is present ("at 3 pm").
        let time = parse_clock_time(text);
        if let Some((hour, minute)) = time {
            target = target
                .with_hour(hour)
                .and_then(|t| t.with_minute(minute))
                .and_then(|t| t.with_second(0))
                .unwrap_or(target);
        }

        let date_str = target.format("%B %d, %Y").to_string();
        let annotation = if time.is_some() {
            format!("{date_str} at {}", target.format("%I:%M %p"))
        } else {
            date_str
        };

        let matched = captures
            .get(0)
            .map(|m| m.as_str().to_owned())
            .unwrap_or_default();
        let enhanced = regex
            .replace(text, format!("{matched} ({annotation})").as_str())
            .into_owned();

        return (enhanced, Some(target));
    }

    (text.to_owned(), None)
}

fn parse_clock_time(text: &str) -> Option<(u32, u32)> {
    let regex = Regex::new(r"(?i)at (\d{1,2})(?::(\d{2}))?\s*(am|pm)?").ok()?;
    let captures = regex.captures(text)?;

    let mut hour: u32 = captures.get(1)?.as_str().parse().ok()?;
    let minute: u32 = captures
        .get(2)
        .and_then(|m| m.as_str().parse().ok())
        .unwrap_or(0);

    if let Some(meridiem) = captures.get(3) {
        match meridiem.as_str().to_lowercase().as_str() {
            "pm" if hour < 12 => hour += 12,
            "am" if hour == 12 => hour = 0,
            _ => {}
        }
    }

    if hour > 23 || minute > 59 {
        return None;
    }
    Some((hour, minute))
}
