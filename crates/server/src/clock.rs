use std::sync::LazyLock;

use chrono::{DateTime, Datelike, Local, Timelike};
use regex::Regex;

static CLOCK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"what time|current time|time is it|time right now|kitne baje|samay kya|kya samay|time kya|what('s| is) the date|current date|date today|today's date|aaj ki (date|tareekh)|aaj (kya|kaun sa) din|which day is (it|today)|din kaun sa",
    )
    .unwrap()
});

/// Date/time questions are answered from the local wall clock without any
/// outbound call.
pub fn clock_intent(normalized: &str) -> bool {
    CLOCK_RE.is_match(normalized)
}

const HINDI_WEEKDAYS: [&str; 7] = [
    "Raviwar", "Somwar", "Mangalwar", "Budhwar", "Guruwar", "Shukrawar", "Shaniwar",
];

fn twelve_hour(now: &DateTime<Local>) -> String {
    let (is_pm, hour) = now.hour12();
    format!(
        "{}:{:02} {}",
        hour,
        now.minute(),
        if is_pm { "PM" } else { "AM" }
    )
}

pub fn clock_answer(hindi: bool, now: DateTime<Local>) -> String {
    let time = twelve_hour(&now);
    let local = now.format("%A, %d %B %Y, %H:%M:%S").to_string();
    if hindi {
        let weekday = HINDI_WEEKDAYS[now.weekday().num_days_from_sunday() as usize];
        format!(
            "Abhi samay {} hai, {} (local time: {}).",
            time, weekday, local
        )
    } else {
        format!("The current time is {} (local time: {}).", time, local)
    }
}
