//! Pure string cleanup applied to raw text scraped from listing pages.

use chrono::{Duration, Local, Months, NaiveDateTime, Timelike};

/// Output format for [`ListingRecord::date_posted`](crate::models::ListingRecord).
pub const POSTED_TIME_FORMAT: &str = "%Y-%m-%d %H:00";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimeUnit {
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

// Keeps every unit inside chrono's representable range.
const MAX_QUANTITY: u32 = 100_000;

// "hour" is tested first so that "hours" never falls through to another unit.
const UNIT_KEYWORDS: [(&str, TimeUnit); 6] = [
    ("hour", TimeUnit::Hour),
    ("minute", TimeUnit::Minute),
    ("day", TimeUnit::Day),
    ("week", TimeUnit::Week),
    ("month", TimeUnit::Month),
    ("year", TimeUnit::Year),
];

/// Convert a relative time such as "5 hours ago" into an absolute timestamp
/// truncated to the hour, relative to the local clock.
pub fn normalize_posted_time(raw: &str) -> NaiveDateTime {
    normalize_posted_time_at(raw, Local::now().naive_local())
}

/// Same as [`normalize_posted_time`] with an explicit "now".
///
/// A missing number counts as zero and a missing unit yields "now" truncated
/// to the hour; there is no failure path.
pub fn normalize_posted_time_at(raw: &str, now: NaiveDateTime) -> NaiveDateTime {
    let now = truncate_to_hour(now);
    let lowered = raw.to_lowercase();
    let quantity = leading_number(&lowered).min(MAX_QUANTITY);

    let unit = UNIT_KEYWORDS
        .iter()
        .find(|(keyword, _)| lowered.contains(keyword))
        .map(|(_, unit)| *unit);

    let shifted = match unit {
        Some(TimeUnit::Minute) => now.checked_sub_signed(Duration::minutes(quantity as i64)),
        Some(TimeUnit::Hour) => now.checked_sub_signed(Duration::hours(quantity as i64)),
        Some(TimeUnit::Day) => now.checked_sub_signed(Duration::days(quantity as i64)),
        Some(TimeUnit::Week) => now.checked_sub_signed(Duration::weeks(quantity as i64)),
        Some(TimeUnit::Month) => now.checked_sub_months(Months::new(quantity)),
        Some(TimeUnit::Year) => quantity
            .checked_mul(12)
            .and_then(|months| now.checked_sub_months(Months::new(months))),
        None => Some(now),
    };

    truncate_to_hour(shifted.unwrap_or(now))
}

/// Format a normalized posted time the way it is written to the snapshot.
pub fn format_posted_time(time: NaiveDateTime) -> String {
    time.format(POSTED_TIME_FORMAT).to_string()
}

fn truncate_to_hour(time: NaiveDateTime) -> NaiveDateTime {
    time.date()
        .and_hms_opt(time.hour(), 0, 0)
        .unwrap_or(time)
}

// A run of digits too long for u32 saturates rather than reading as zero.
fn leading_number(text: &str) -> u32 {
    text.split(|c: char| !c.is_ascii_digit())
        .find(|chunk| !chunk.is_empty())
        .map(|digits| digits.parse().unwrap_or(MAX_QUANTITY))
        .unwrap_or(0)
}

/// Street portion of an address: text up to the first comma, trimmed and
/// title-cased.
pub fn clean_address(raw: &str) -> String {
    let flattened = raw.replace('\n', " ");
    let street = flattened.split(',').next().unwrap_or("").trim();
    title_case(street)
}

/// Split a raw agent name into capitalized first and last names.
///
/// Only the first and last tokens are kept; a single token has no last name.
pub fn split_agent_name(raw: &str) -> (String, String) {
    let tokens: Vec<&str> = raw.split_whitespace().collect();
    match tokens.as_slice() {
        [] => (String::new(), String::new()),
        [only] => (capitalize(only), String::new()),
        [first, .., last] => (capitalize(first), capitalize(last)),
    }
}

/// Key used by the per-agent listing counter.
pub fn agent_key(first_name: &str, last_name: &str) -> String {
    format!("{} {}", first_name, last_name)
}

fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

// Every letter that follows a non-letter starts a new word.
fn title_case(text: &str) -> String {
    let mut result = String::with_capacity(text.len());
    let mut previous_is_letter = false;
    for c in text.chars() {
        if c.is_alphabetic() {
            if previous_is_letter {
                result.extend(c.to_lowercase());
            } else {
                result.extend(c.to_uppercase());
            }
            previous_is_letter = true;
        } else {
            result.push(c);
            previous_is_letter = false;
        }
    }
    result
}
