//! Birth moment parsing.
//!
//! Users describe their birth in free text ("March 15, 1990", "3:30 PM",
//! "around midnight"). This module normalizes those into a concrete date
//! and clock time. Unparseable input is an explicit validation error so a
//! persona can ask again; nothing here silently defaults.

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};

use crate::error::{AgentError, Result};

/// Approximate-time keywords and their canonical clock times.
///
/// Matched by substring, longest keyword first, so compounds always win
/// over the words they contain ("midnight" over "night", "afternoon" over
/// "noon"). Order entries by descending length when adding new ones.
const TIME_KEYWORDS: [(&str, u32, u32); 8] = [
    ("afternoon", 15, 0),
    ("midnight", 0, 0),
    ("morning", 9, 0),
    ("evening", 18, 0),
    ("night", 21, 0),
    ("noon", 12, 0),
    ("dawn", 6, 0),
    ("dusk", 18, 0),
];

/// Date formats accepted, in trial order. Day-first beats month-first for
/// ambiguous slashed dates, matching how users phrase places of birth in
/// this product's markets.
const DATE_FORMATS: [&str; 10] = [
    "%B %d, %Y",
    "%b %d, %Y",
    "%B %d %Y",
    "%b %d %Y",
    "%Y-%m-%d",
    "%d %B %Y",
    "%d %b %Y",
    "%d/%m/%Y",
    "%m/%d/%Y",
    "%d-%m-%Y",
];

/// Clock-time formats accepted, in trial order.
const TIME_FORMATS: [&str; 5] = ["%I:%M %p", "%I:%M%p", "%I %p", "%I%p", "%H:%M"];

/// A parsed birth date and clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BirthMoment {
    pub date: NaiveDate,
    pub time: NaiveTime,
}

impl BirthMoment {
    /// Parse free-text date and time strings.
    ///
    /// # Errors
    ///
    /// [`AgentError::Validation`] when either string cannot be understood.
    pub fn parse(date_of_birth: &str, time_of_birth: &str) -> Result<Self> {
        let date = parse_date(date_of_birth)?;
        let time = parse_time(time_of_birth)?;
        Ok(Self { date, time })
    }

    /// The birth moment as a naive local datetime.
    pub fn naive_datetime(&self) -> NaiveDateTime {
        self.date.and_time(self.time)
    }

    pub fn year(&self) -> i32 {
        use chrono::Datelike;
        self.date.year()
    }

    pub fn month(&self) -> u32 {
        use chrono::Datelike;
        self.date.month()
    }

    pub fn day(&self) -> u32 {
        use chrono::Datelike;
        self.date.day()
    }

    pub fn hour(&self) -> u32 {
        use chrono::Timelike;
        self.time.hour()
    }

    pub fn minute(&self) -> u32 {
        use chrono::Timelike;
        self.time.minute()
    }
}

fn parse_date(input: &str) -> Result<NaiveDate> {
    let cleaned = strip_ordinal_suffixes(input.trim());
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
            return Ok(date);
        }
    }
    Err(AgentError::Validation(format!(
        "could not parse date of birth: {input:?}"
    )))
}

fn parse_time(input: &str) -> Result<NaiveTime> {
    let lowered = input.trim().to_lowercase();
    for (keyword, hour, minute) in TIME_KEYWORDS {
        if lowered.contains(keyword) {
            return NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
                AgentError::Validation(format!("keyword time out of range: {keyword}"))
            });
        }
    }
    let uppered = input.trim().to_uppercase();
    for format in TIME_FORMATS {
        if let Ok(time) = NaiveTime::parse_from_str(&uppered, format) {
            return Ok(time);
        }
    }
    Err(AgentError::Validation(format!(
        "could not parse time of birth: {input:?}"
    )))
}

/// Drop English ordinal suffixes: "March 15th, 1990" -> "March 15, 1990".
fn strip_ordinal_suffixes(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let chars: Vec<char> = input.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        out.push(c);
        if c.is_ascii_digit() {
            let rest: String = chars[i + 1..].iter().take(2).collect();
            let suffix = rest.to_ascii_lowercase();
            if (suffix == "st" || suffix == "nd" || suffix == "rd" || suffix == "th")
                && chars
                    .get(i + 3)
                    .is_none_or(|next| !next.is_ascii_alphanumeric())
            {
                i += 2;
            }
        }
        i += 1;
    }
    out
}
