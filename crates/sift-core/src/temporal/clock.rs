//! Clock times and day parts.

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

/// Coarse part of the day.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DayPart {
    Morning,
    Noon,
    Afternoon,
    Evening,
}

impl DayPart {
    pub fn parse(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "上午" | "早上" | "早晨" | "早" | "morning" => Some(Self::Morning),
            "中午" | "noon" | "midday" => Some(Self::Noon),
            "下午" | "afternoon" => Some(Self::Afternoon),
            "晚上" | "晚" | "傍晚" | "夜里" | "夜间" | "夜" | "evening" | "night" => Some(Self::Evening),
            _ => None,
        }
    }

    /// Time used when no clock time is given. `None` means unspecified (18:00).
    pub fn default_time(part: Option<Self>) -> NaiveTime {
        let hour = match part {
            Some(Self::Morning) => 9,
            Some(Self::Noon) => 12,
            Some(Self::Afternoon) => 15,
            Some(Self::Evening) => 21,
            None => 18,
        };
        NaiveTime::from_hms_opt(hour, 0, 0).unwrap_or(NaiveTime::MIN)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Meridiem {
    Am,
    Pm,
}

/// An explicit clock reading such as `3pm`, `15:30` or `3点半`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Clock {
    pub hour: u32,
    pub minute: u32,
    pub meridiem: Option<Meridiem>,
}

impl Clock {
    /// Wall time, applying AM/PM or the day part to 12-hour readings, and
    /// the days it carries past the date it is read against.
    ///
    /// Midnight named as the end of a day (`晚上12点`, `24点`) carries one day.
    pub fn resolve(self, part: Option<DayPart>) -> Option<(NaiveTime, i64)> {
        let mut hour = self.hour;
        if hour > 24 || self.minute > 59 {
            return None;
        }
        match self.meridiem {
            Some(Meridiem::Pm) if hour < 12 => hour += 12,
            Some(Meridiem::Am) if hour == 12 => hour = 0,
            Some(_) => {}
            None => match part {
                Some(DayPart::Evening) if hour == 12 => hour = 24,
                Some(DayPart::Afternoon | DayPart::Evening) if hour < 12 => hour += 12,
                Some(DayPart::Noon) if hour < 6 => hour += 12,
                _ => {}
            },
        }
        let carry = if hour == 24 {
            hour = 0;
            1
        } else {
            0
        };
        NaiveTime::from_hms_opt(hour, self.minute, 0).map(|t| (t, carry))
    }
}

const CLOCK_BODY: &str = r"(?:(?P<at>\bat|@)\s*)?(?P<hour>\d{1,2})(?:\s*[:：]\s*(?P<colon_min>\d{2})|\s*(?P<dian>点|时)(?:\s*(?P<half>半)|\s*(?P<dian_min>\d{1,2})\s*分?)?)?(?:\s*(?P<mer>am|pm)\b)?";

const DAY_PART_ZH: &str = "上午|早上|早晨|中午|下午|傍晚|晚上|晚|夜里|夜间";
const DAY_PART_EN: &str = "morning|noon|midday|afternoon|evening|night";

/// Clock at the start of a tail.
static CLOCK_PREFIX: Lazy<Regex> =
    Lazy::new(|| Regex::new(&format!(r"(?i)^\s*{}", CLOCK_BODY)).unwrap());

/// Clock anywhere, with an optional Chinese day part in front.
pub(crate) static CLOCK_ANYWHERE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(r"(?i)(?:(?P<part>{})\s*)?{}", DAY_PART_ZH, CLOCK_BODY)).unwrap()
});

static DAY_PART_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(&format!(
        r"(?i)^\s*(?:(?:in the|at)\s+)?(?:(?P<zh>{})|(?P<en>{})\b)",
        DAY_PART_ZH, DAY_PART_EN
    ))
    .unwrap()
});

/// Read a clock from captures of a `CLOCK_BODY` pattern.
///
/// A bare number is not a clock: it needs `at`, a separator, `点` or AM/PM.
pub(crate) fn clock_from_captures(caps: &Captures<'_>) -> Option<Clock> {
    let explicit = caps.name("at").is_some()
        || caps.name("colon_min").is_some()
        || caps.name("dian").is_some()
        || caps.name("mer").is_some();
    if !explicit {
        return None;
    }
    let hour: u32 = caps.name("hour")?.as_str().parse().ok()?;
    let minute: u32 = if let Some(m) = caps.name("colon_min").or_else(|| caps.name("dian_min")) {
        m.as_str().parse().ok()?
    } else if caps.name("half").is_some() {
        30
    } else {
        0
    };
    let meridiem = caps.name("mer").map(|m| {
        if m.as_str().eq_ignore_ascii_case("pm") {
            Meridiem::Pm
        } else {
            Meridiem::Am
        }
    });
    Some(Clock {
        hour,
        minute,
        meridiem,
    })
}

/// Day part and clock following a date word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Tail {
    pub part: Option<DayPart>,
    pub clock: Option<Clock>,
    /// Bytes of the tail consumed.
    pub len: usize,
}

impl Tail {
    /// Moment on `date` and whether it came from an explicit clock.
    pub fn at(&self, date: NaiveDate) -> Option<(NaiveDateTime, bool)> {
        match self.clock {
            Some(clock) => {
                let (time, carry) = clock.resolve(self.part)?;
                Some(((date + Duration::days(carry)).and_time(time), true))
            }
            None => Some((date.and_time(DayPart::default_time(self.part)), false)),
        }
    }
}

/// Parse an optional day part then an optional clock from the start of `rest`.
pub fn parse_tail(rest: &str) -> Tail {
    let mut tail = Tail::default();
    if let Some(caps) = DAY_PART_PREFIX.captures(rest) {
        let word = caps.name("zh").or_else(|| caps.name("en")).map(|m| m.as_str());
        tail.part = word.and_then(DayPart::parse);
        tail.len = caps.get(0).map_or(0, |m| m.end());
    }
    if let Some(caps) = CLOCK_PREFIX.captures(&rest[tail.len..]) {
        if let Some(clock) = clock_from_captures(&caps) {
            tail.clock = Some(clock);
            tail.len += caps.get(0).map_or(0, |m| m.end());
        }
    }
    tail
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 11, d).unwrap()
    }

    /// Time of a tail read against Nov 4th, with its day of month.
    fn tail_at(rest: &str) -> Option<(u32, NaiveTime, bool)> {
        use chrono::Datelike;
        parse_tail(rest)
            .at(day(4))
            .map(|(at, explicit)| (at.day(), at.time(), explicit))
    }

    #[test]
    fn test_day_part_defaults() {
        assert_eq!(DayPart::default_time(Some(DayPart::Morning)), t(9, 0));
        assert_eq!(DayPart::default_time(Some(DayPart::Noon)), t(12, 0));
        assert_eq!(DayPart::default_time(Some(DayPart::Afternoon)), t(15, 0));
        assert_eq!(DayPart::default_time(Some(DayPart::Evening)), t(21, 0));
        assert_eq!(DayPart::default_time(None), t(18, 0));
    }

    #[test]
    fn test_tail_parsing() {
        let tail = parse_tail("下午3点半开会");
        assert_eq!(tail.part, Some(DayPart::Afternoon));
        assert_eq!(tail.at(day(4)), Some((day(4).and_time(t(15, 30)), true)));
        assert_eq!(&"下午3点半开会"[tail.len..], "开会");

        assert_eq!(tail_at(" 9am to"), Some((4, t(9, 0), true)));
        assert_eq!(tail_at(" at 10:45"), Some((4, t(10, 45), true)));
        assert_eq!(tail_at(" evening"), Some((4, t(21, 0), false)));
        assert_eq!(tail_at(" morning at 8"), Some((4, t(8, 0), true)));
        assert_eq!(tail_at("晚上8点"), Some((4, t(20, 0), true)));
        assert_eq!(tail_at("12点"), Some((4, t(12, 0), true)));
    }

    #[test]
    fn test_evening_twelve_is_midnight() {
        assert_eq!(tail_at("晚上12点"), Some((5, t(0, 0), true)));
        assert_eq!(tail_at("夜里12点"), Some((5, t(0, 0), true)));
        assert_eq!(tail_at(" night at 12"), Some((5, t(0, 0), true)));
        assert_eq!(tail_at("24点"), Some((5, t(0, 0), true)));
        assert_eq!(tail_at("中午12点"), Some((4, t(12, 0), true)));
        assert_eq!(tail_at("晚上12点半"), Some((5, t(0, 30), true)));
    }

    #[test]
    fn test_bare_numbers_are_not_clocks() {
        let tail = parse_tail(" 2 tasks");
        assert!(tail.clock.is_none());
        assert_eq!(tail.len, 0);
        assert_eq!(tail.at(day(4)), Some((day(4).and_time(t(18, 0)), false)));
    }

    #[test]
    fn test_meridiem() {
        let clock = |hour, meridiem| Clock {
            hour,
            minute: 0,
            meridiem,
        };
        assert_eq!(clock(12, Some(Meridiem::Am)).resolve(None), Some((t(0, 0), 0)));
        assert_eq!(clock(12, Some(Meridiem::Pm)).resolve(None), Some((t(12, 0), 0)));
        assert_eq!(clock(3, Some(Meridiem::Pm)).resolve(None), Some((t(15, 0), 0)));
        assert_eq!(clock(1, None).resolve(Some(DayPart::Noon)), Some((t(13, 0), 0)));
        assert_eq!(clock(12, None).resolve(Some(DayPart::Evening)), Some((t(0, 0), 1)));
        assert_eq!(clock(25, None).resolve(None), None);
    }
}
