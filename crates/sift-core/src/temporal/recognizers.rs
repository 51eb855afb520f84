//! Independent date/time recognizers.
//!
//! Each recognizer scans the whole expression and reports every match as a
//! [`RawHit`] with its byte span. Anchored recognizers (dates, day words,
//! weekdays) consume a following day part or clock; bare clocks are
//! reported separately and reconciled by the resolver.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

use super::clock::{clock_from_captures, parse_tail, DayPart, CLOCK_ANYWHERE};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HitKind {
    /// A date, possibly with a time. `explicit_time` is false when the time
    /// came from a day-part default.
    Anchored { explicit_time: bool },
    /// A clock time with no date of its own.
    BareClock { time: NaiveTime, carry: i64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RawHit {
    pub start: usize,
    pub end: usize,
    pub at: NaiveDateTime,
    pub kind: HitKind,
}

static ZH_MONTH_DAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d{1,2})\s*月\s*(\d{1,2})\s*[日号]").unwrap());

static NUMERIC_DATE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?-u:\b)(?:(\d{4})[/-])?(\d{1,2})[/-](\d{1,2})(?-u:\b)").unwrap()
});

const MONTHS_EN: &str = r"jan(?:uary)?|feb(?:ruary)?|mar(?:ch)?|apr(?:il)?|may|june?|july?|aug(?:ust)?|sep(?:t(?:ember)?)?|oct(?:ober)?|nov(?:ember)?|dec(?:ember)?";

static EN_MONTH_DAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b({})\.?\s+(\d{{1,2}})(?:st|nd|rd|th)?\b",
        MONTHS_EN
    ))
    .unwrap()
});

static EN_DAY_MONTH: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)\b(\d{{1,2}})(?:st|nd|rd|th)?\s+(?:of\s+)?({})\b",
        MONTHS_EN
    ))
    .unwrap()
});

static ZH_RELATIVE_DAY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(今天|今日|明天|明日|后天)").unwrap());

static EN_RELATIVE_DAY: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(day after tomorrow|tomorrow|today)\b").unwrap());

static ZH_COMPOUND: Lazy<Regex> = Lazy::new(|| Regex::new(r"(今早|今晚|今夜|明早|明晚)").unwrap());

static EN_COMPOUND: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(tonight|this morning|this afternoon|this evening|tomorrow morning|tomorrow afternoon|tomorrow evening|tomorrow night)\b",
    )
    .unwrap()
});

static ZH_WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(本|这|下)个?)?(?:周|星期|礼拜)([一二三四五六日天])").unwrap()
});

static EN_WEEKDAY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)\b(?:(this|next)\s+)?(monday|tuesday|wednesday|thursday|friday|saturday|sunday)\b",
    )
    .unwrap()
});

static ZH_WEEKEND: Lazy<Regex> = Lazy::new(|| Regex::new(r"(本|这|下)?周末").unwrap());

static EN_WEEKEND: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(?:(this|next)\s+)?weekend\b").unwrap());

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WeekScope {
    Unscoped,
    This,
    Next,
}

impl WeekScope {
    fn parse(word: Option<&str>) -> Self {
        match word.map(|w| w.to_lowercase()) {
            None => Self::Unscoped,
            Some(w) if w == "next" || w.starts_with('下') => Self::Next,
            Some(_) => Self::This,
        }
    }
}

/// Emit an anchored hit for `date`, reading a day part and clock after `end`.
fn anchored(text: &str, start: usize, end: usize, date: NaiveDate) -> Option<RawHit> {
    let tail = parse_tail(&text[end..]);
    let (at, explicit_time) = tail.at(date)?;
    Some(RawHit {
        start,
        end: end + tail.len,
        at,
        kind: HitKind::Anchored { explicit_time },
    })
}

/// Month/day without a year rolls to next year once the date has passed.
fn month_day(now: NaiveDateTime, year: Option<i32>, month: u32, day: u32) -> Option<NaiveDate> {
    match year {
        Some(y) => NaiveDate::from_ymd_opt(y, month, day),
        None => {
            let this_year = NaiveDate::from_ymd_opt(now.year(), month, day)?;
            if this_year < now.date() {
                NaiveDate::from_ymd_opt(now.year() + 1, month, day)
            } else {
                Some(this_year)
            }
        }
    }
}

fn month_from_name(name: &str) -> Option<u32> {
    let prefix: String = name.to_lowercase().chars().take(3).collect();
    let month = match prefix.as_str() {
        "jan" => 1,
        "feb" => 2,
        "mar" => 3,
        "apr" => 4,
        "may" => 5,
        "jun" => 6,
        "jul" => 7,
        "aug" => 8,
        "sep" => 9,
        "oct" => 10,
        "nov" => 11,
        "dec" => 12,
        _ => return None,
    };
    Some(month)
}

fn num(caps: &Captures<'_>, i: usize) -> Option<u32> {
    caps.get(i)?.as_str().parse().ok()
}

fn span(caps: &Captures<'_>) -> (usize, usize) {
    caps.get(0).map_or((0, 0), |m| (m.start(), m.end()))
}

/// Absolute dates: `11月4日`, `2024-11-04`, `11/4`, `Nov 4`, `4th of November`.
pub(crate) fn absolute_dates(text: &str, now: NaiveDateTime) -> Vec<RawHit> {
    let mut hits = Vec::new();

    for caps in ZH_MONTH_DAY.captures_iter(text) {
        let (start, end) = span(&caps);
        if let (Some(m), Some(d)) = (num(&caps, 1), num(&caps, 2)) {
            if let Some(hit) = month_day(now, None, m, d).and_then(|date| anchored(text, start, end, date)) {
                hits.push(hit);
            }
        }
    }

    for caps in NUMERIC_DATE.captures_iter(text) {
        let (start, end) = span(&caps);
        let year = caps.get(1).and_then(|y| y.as_str().parse().ok());
        if let (Some(m), Some(d)) = (num(&caps, 2), num(&caps, 3)) {
            if let Some(hit) = month_day(now, year, m, d).and_then(|date| anchored(text, start, end, date)) {
                hits.push(hit);
            }
        }
    }

    for caps in EN_MONTH_DAY.captures_iter(text) {
        let (start, end) = span(&caps);
        let month = caps.get(1).and_then(|m| month_from_name(m.as_str()));
        if let (Some(m), Some(d)) = (month, num(&caps, 2)) {
            if let Some(hit) = month_day(now, None, m, d).and_then(|date| anchored(text, start, end, date)) {
                hits.push(hit);
            }
        }
    }

    for caps in EN_DAY_MONTH.captures_iter(text) {
        let (start, end) = span(&caps);
        let month = caps.get(2).and_then(|m| month_from_name(m.as_str()));
        if let (Some(d), Some(m)) = (num(&caps, 1), month) {
            if let Some(hit) = month_day(now, None, m, d).and_then(|date| anchored(text, start, end, date)) {
                hits.push(hit);
            }
        }
    }

    hits
}

/// Relative day words: today, tomorrow, the day after.
pub(crate) fn relative_days(text: &str, now: NaiveDateTime) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for re in [&*ZH_RELATIVE_DAY, &*EN_RELATIVE_DAY] {
        for caps in re.captures_iter(text) {
            let (start, end) = span(&caps);
            let offset = match caps[1].to_lowercase().as_str() {
                "今天" | "今日" | "today" => 0,
                "明天" | "明日" | "tomorrow" => 1,
                _ => 2,
            };
            let date = now.date() + Duration::days(offset);
            if let Some(hit) = anchored(text, start, end, date) {
                hits.push(hit);
            }
        }
    }
    hits
}

/// Compound words naming a day and a day part: 今晚, tomorrow morning.
pub(crate) fn compound_words(text: &str, now: NaiveDateTime) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for re in [&*ZH_COMPOUND, &*EN_COMPOUND] {
        for caps in re.captures_iter(text) {
            let (start, end) = span(&caps);
            let word = caps[1].to_lowercase();
            let offset = if word.starts_with('明') || word.starts_with("tomorrow") {
                1
            } else {
                0
            };
            let part = if word.ends_with('早') || word.ends_with("morning") {
                DayPart::Morning
            } else if word.ends_with("afternoon") {
                DayPart::Afternoon
            } else {
                DayPart::Evening
            };

            let mut tail = parse_tail(&text[end..]);
            tail.part = Some(part);
            let Some((at, explicit_time)) = tail.at(now.date() + Duration::days(offset)) else {
                continue;
            };
            hits.push(RawHit {
                start,
                end: end + tail.len,
                at,
                kind: HitKind::Anchored { explicit_time },
            });
        }
    }
    hits
}

fn weekday_index(word: &str) -> Option<i64> {
    let index = match word.to_lowercase().as_str() {
        "一" | "monday" => 0,
        "二" | "tuesday" => 1,
        "三" | "wednesday" => 2,
        "四" | "thursday" => 3,
        "五" | "friday" => 4,
        "六" | "saturday" => 5,
        "日" | "天" | "sunday" => 6,
        _ => return None,
    };
    Some(index)
}

/// Weekday references. Unscoped weekdays resolve to the next future occurrence.
pub(crate) fn weekdays(text: &str, now: NaiveDateTime) -> Vec<RawHit> {
    let monday = now.date() - Duration::days(now.weekday().num_days_from_monday() as i64);
    let mut hits = Vec::new();

    for re in [&*ZH_WEEKDAY, &*EN_WEEKDAY] {
        for caps in re.captures_iter(text) {
            let (start, end) = span(&caps);
            let scope = WeekScope::parse(caps.get(1).map(|m| m.as_str()));
            let Some(index) = caps.get(2).and_then(|m| weekday_index(m.as_str())) else {
                continue;
            };
            let week_offset = if scope == WeekScope::Next { 7 } else { 0 };
            let date = monday + Duration::days(week_offset + index);
            let Some(mut hit) = anchored(text, start, end, date) else {
                continue;
            };
            if scope == WeekScope::Unscoped && hit.at <= now {
                hit.at += Duration::days(7);
            }
            hits.push(hit);
        }
    }
    hits
}

/// Weekend: Saturday 10:00.
pub(crate) fn weekends(text: &str, now: NaiveDateTime) -> Vec<RawHit> {
    let monday = now.date() - Duration::days(now.weekday().num_days_from_monday() as i64);
    let ten = NaiveTime::from_hms_opt(10, 0, 0).unwrap_or(NaiveTime::MIN);
    let mut hits = Vec::new();

    for re in [&*ZH_WEEKEND, &*EN_WEEKEND] {
        for caps in re.captures_iter(text) {
            let (start, end) = span(&caps);
            let scope = WeekScope::parse(caps.get(1).map(|m| m.as_str()));
            let week_offset = if scope == WeekScope::Next { 7 } else { 0 };
            let mut at = (monday + Duration::days(week_offset + 5)).and_time(ten);
            if scope == WeekScope::Unscoped && at <= now {
                at += Duration::days(7);
            }
            hits.push(RawHit {
                start,
                end,
                at,
                kind: HitKind::Anchored {
                    explicit_time: false,
                },
            });
        }
    }
    hits
}

/// Bare clock times. A time not after `now` means the same time tomorrow.
pub(crate) fn bare_clocks(text: &str, now: NaiveDateTime) -> Vec<RawHit> {
    let mut hits = Vec::new();
    for caps in CLOCK_ANYWHERE.captures_iter(text) {
        let (start, end) = span(&caps);
        let Some(hour) = caps.name("hour") else {
            continue;
        };
        // Part of a longer number such as an amount or a date.
        if text[..hour.start()]
            .chars()
            .next_back()
            .is_some_and(|c| c.is_ascii_digit() || c == '.' || c == ',')
        {
            continue;
        }
        let part = caps.name("part").and_then(|p| DayPart::parse(p.as_str()));
        let Some((time, carry)) = clock_from_captures(&caps).and_then(|c| c.resolve(part)) else {
            continue;
        };
        let mut at = (now.date() + Duration::days(carry)).and_time(time);
        if at <= now {
            at += Duration::days(1);
        }
        hits.push(RawHit {
            start,
            end,
            at,
            kind: HitKind::BareClock { time, carry },
        });
    }
    hits
}
