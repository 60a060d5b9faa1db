//! Tests for `src/extract/temporal.rs` — relative-date rewriting.

use chrono::{Datelike, TimeZone, Timelike, Utc};
use mnemon::extract::temporal::rewrite_temporal;

fn reference() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 8, 1, 12, 0, 0)
        .single()
        .expect("valid reference date")
}

#[test]
fn tomorrow_is_pinned_to_the_next_day() {
    let (text, parsed) = rewrite_temporal("Call the dentist tomorrow", reference());
    assert!(
        text.contains("tomorrow (August 02, 2026)"),
        "got: {text}"
    );
    let parsed = parsed.expect("a date should be extracted");
    assert_eq!((parsed.year(), parsed.month(), parsed.day()), (2026, 8, 2));
}

#[test]
fn in_n_days_uses_the_captured_count() {
    let (text, parsed) = rewrite_temporal("Follow up in 3 days", reference());
    assert!(text.contains("(August 04, 2026)"), "got: {text}");
    assert_eq!(parsed.expect("date").day(), 4);
}

#[test]
fn in_n_weeks_scales_by_seven() {
    let (_, parsed) = rewrite_temporal("Review again in 2 weeks", reference());
    assert_eq!(parsed.expect("date").day(), 15);
}

#[test]
fn explicit_clock_time_is_applied() {
    let (text, parsed) = rewrite_temporal("Meeting tomorrow at 3 pm", reference());
    let parsed = parsed.expect("date");
    assert_eq!(parsed.hour(), 15);
    assert_eq!(parsed.minute(), 0);
    assert!(text.contains("at 03:00 PM"), "got: {text}");
}

#[test]
fn midnight_and_noon_meridiem_edge_cases() {
    let (_, parsed) = rewrite_temporal("wake me today at 12 am", reference());
    assert_eq!(parsed.expect("date").hour(), 0);

    let (_, parsed) = rewrite_temporal("lunch today at 12 pm", reference());
    assert_eq!(parsed.expect("date").hour(), 12);
}

#[test]
fn text_without_temporal_references_is_unchanged() {
    let original = "User prefers dark roast coffee";
    let (text, parsed) = rewrite_temporal(original, reference());
    assert_eq!(text, original);
    assert!(parsed.is_none());
}

#[test]
fn only_the_first_reference_is_rewritten() {
    let (text, _) = rewrite_temporal("tomorrow or maybe today", reference());
    assert!(text.contains("tomorrow (August 02, 2026)"), "got: {text}");
    assert!(!text.contains("today ("), "second reference untouched: {text}");
}

#[test]
fn next_week_and_yesterday_offsets() {
    let (_, next_week) = rewrite_temporal("ship it next week", reference());
    assert_eq!(next_week.expect("date").day(), 8);

    let (_, yesterday) = rewrite_temporal("we met yesterday", reference());
    assert_eq!(yesterday.expect("date").day(), 31);
}
