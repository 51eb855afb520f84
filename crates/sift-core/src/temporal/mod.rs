//! Natural-language date/time resolution.
//!
//! Every recognizer runs over the whole expression. Hits are reconciled
//! and the one that starts latest in the text wins, so "moved from tomorrow
//! 9am to today 3pm" resolves to today 15:00.
//!
//! Reconciliation, in order:
//! - a date hit strictly inside a longer date hit is dropped
//!   ("tomorrow" inside "day after tomorrow")
//! - a bare clock inside a date hit is dropped, the date already consumed it
//! - a bare clock directly before a date without its own time is merged into
//!   it ("3pm tomorrow", "9am on Friday")
//! - among hits starting at the same offset the longer one wins

mod clock;
mod recognizers;

pub use clock::{Clock, DayPart, Meridiem};

use chrono::{DateTime, NaiveDateTime, TimeZone};
use tracing::debug;

use recognizers::{HitKind, RawHit};

/// One reconciled time mention.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemporalMatch {
    /// Byte offset of the mention in the expression.
    pub start: usize,
    pub end: usize,
    pub at: NaiveDateTime,
}

/// Resolves time expressions against a reference instant.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalResolver;

impl TemporalResolver {
    pub fn new() -> Self {
        Self
    }

    /// Resolve `expr` relative to `now`, interpreting wall times in `now`'s zone.
    pub fn resolve<Tz: TimeZone>(&self, expr: &str, now: &DateTime<Tz>) -> Option<DateTime<Tz>> {
        let local = self.resolve_naive(expr, now.naive_local())?;
        now.timezone().from_local_datetime(&local).earliest()
    }

    /// Resolve against a local wall-clock reference.
    pub fn resolve_naive(&self, expr: &str, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let winner = self
            .matches(expr, now)
            .into_iter()
            .max_by_key(|m| (m.start, m.end - m.start))?;
        debug!(expr, start = winner.start, at = %winner.at, "Resolved time expression");
        Some(winner.at)
    }

    /// All reconciled mentions, ordered by position.
    pub fn matches(&self, expr: &str, now: NaiveDateTime) -> Vec<TemporalMatch> {
        let mut anchored: Vec<RawHit> = [
            recognizers::absolute_dates(expr, now),
            recognizers::relative_days(expr, now),
            recognizers::compound_words(expr, now),
            recognizers::weekdays(expr, now),
            recognizers::weekends(expr, now),
        ]
        .concat();
        let clocks = recognizers::bare_clocks(expr, now);

        anchored.sort_by_key(|h| (h.start, std::cmp::Reverse(h.end)));
        anchored.dedup_by_key(|h| (h.start, h.end));
        let anchored: Vec<RawHit> = anchored
            .iter()
            .filter(|h| !anchored.iter().any(|o| strictly_inside(h, o)))
            .copied()
            .collect();

        let mut clocks: Vec<Option<RawHit>> = clocks
            .into_iter()
            .filter(|c| !anchored.iter().any(|a| c.start < a.end && a.start < c.end))
            .map(Some)
            .collect();

        let mut hits: Vec<RawHit> = anchored
            .into_iter()
            .map(|hit| merge_leading_clock(expr, hit, &mut clocks))
            .collect();
        hits.extend(clocks.into_iter().flatten());
        hits.sort_by_key(|h| (h.start, h.end));

        hits.into_iter()
            .map(|h| TemporalMatch {
                start: h.start,
                end: h.end,
                at: h.at,
            })
            .collect()
    }
}

fn strictly_inside(inner: &RawHit, outer: &RawHit) -> bool {
    outer.start <= inner.start
        && inner.end <= outer.end
        && (outer.start, outer.end) != (inner.start, inner.end)
}

/// Fold a bare clock that directly precedes a date-only hit into that hit.
fn merge_leading_clock(expr: &str, mut hit: RawHit, clocks: &mut [Option<RawHit>]) -> RawHit {
    if hit.kind != (HitKind::Anchored { explicit_time: false }) {
        return hit;
    }
    let joinable = |gap: &str| {
        let gap = gap.trim_matches(|c: char| c.is_whitespace() || c == ',' || c == '，');
        gap.is_empty() || gap.eq_ignore_ascii_case("on")
    };
    let slot = clocks.iter_mut().find(|slot| {
        slot.is_some_and(|c| c.end <= hit.start && joinable(&expr[c.end..hit.start]))
    });
    if let Some(slot) = slot {
        if let Some(RawHit {
            start,
            kind: HitKind::BareClock { time, carry },
            ..
        }) = slot.take()
        {
            hit.start = start;
            hit.at = (hit.at.date() + chrono::Duration::days(carry)).and_time(time);
            hit.kind = HitKind::Anchored {
                explicit_time: true,
            };
        }
    }
    hit
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};

    // Monday
    fn now() -> NaiveDateTime {
        at(2024, 11, 4, 10, 0)
    }

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, mo, d)
            .unwrap()
            .and_hms_opt(h, mi, 0)
            .unwrap()
    }

    fn resolve(expr: &str) -> Option<NaiveDateTime> {
        TemporalResolver::new().resolve_naive(expr, now())
    }

    #[test]
    fn test_last_mention_wins() {
        assert_eq!(
            resolve("originally tomorrow 9am, now changed to today 3pm"),
            Some(at(2024, 11, 4, 15, 0))
        );
        assert_eq!(
            resolve("Project sync moved from tomorrow 9am to today 3pm, please confirm"),
            Some(at(2024, 11, 4, 15, 0))
        );
        assert_eq!(resolve("原定明天上午9点，改到后天下午"), Some(at(2024, 11, 6, 15, 0)));
    }

    #[test]
    fn test_relative_days_and_day_parts() {
        assert_eq!(resolve("明天下午3点开会"), Some(at(2024, 11, 5, 15, 0)));
        assert_eq!(resolve("今天晚上8点"), Some(at(2024, 11, 4, 20, 0)));
        assert_eq!(resolve("明天"), Some(at(2024, 11, 5, 18, 0)));
        assert_eq!(resolve("tomorrow morning"), Some(at(2024, 11, 5, 9, 0)));
        assert_eq!(resolve("the day after tomorrow"), Some(at(2024, 11, 6, 18, 0)));
        assert_eq!(resolve("day after tomorrow at noon"), Some(at(2024, 11, 6, 12, 0)));
    }

    #[test]
    fn test_compound_words() {
        assert_eq!(resolve("今晚"), Some(at(2024, 11, 4, 21, 0)));
        assert_eq!(resolve("明早8点出发"), Some(at(2024, 11, 5, 8, 0)));
        assert_eq!(resolve("tonight at 8"), Some(at(2024, 11, 4, 20, 0)));
        assert_eq!(resolve("this afternoon"), Some(at(2024, 11, 4, 15, 0)));
    }

    #[test]
    fn test_evening_twelve_rolls_to_next_day() {
        assert_eq!(resolve("今晚12点前提交"), Some(at(2024, 11, 5, 0, 0)));
        assert_eq!(resolve("明天晚上12点"), Some(at(2024, 11, 6, 0, 0)));
        assert_eq!(resolve("晚上12点"), Some(at(2024, 11, 5, 0, 0)));
        assert_eq!(resolve("tomorrow night at 12"), Some(at(2024, 11, 6, 0, 0)));
        assert_eq!(resolve("中午12点"), Some(at(2024, 11, 4, 12, 0)));
    }

    #[test]
    fn test_absolute_dates_roll_over() {
        assert_eq!(resolve("11月1日"), Some(at(2025, 11, 1, 18, 0)));
        assert_eq!(resolve("11月4号"), Some(at(2024, 11, 4, 18, 0)));
        assert_eq!(resolve("12月25日上午10点"), Some(at(2024, 12, 25, 10, 0)));
        assert_eq!(resolve("Nov 20 at 3pm"), Some(at(2024, 11, 20, 15, 0)));
        assert_eq!(resolve("due 2nd of March"), Some(at(2025, 3, 2, 18, 0)));
        assert_eq!(resolve("2025-01-02 14:00"), Some(at(2025, 1, 2, 14, 0)));
    }

    #[test]
    fn test_weekdays() {
        assert_eq!(resolve("下周三"), Some(at(2024, 11, 13, 18, 0)));
        assert_eq!(resolve("周一上午"), Some(at(2024, 11, 11, 9, 0)));
        assert_eq!(resolve("this friday 5pm"), Some(at(2024, 11, 8, 17, 0)));
        assert_eq!(resolve("next Monday"), Some(at(2024, 11, 11, 18, 0)));
        assert_eq!(resolve("星期天"), Some(at(2024, 11, 10, 18, 0)));
    }

    #[test]
    fn test_weekend() {
        assert_eq!(resolve("周末聚餐"), Some(at(2024, 11, 9, 10, 0)));
        assert_eq!(resolve("next weekend"), Some(at(2024, 11, 16, 10, 0)));
    }

    #[test]
    fn test_bare_clocks_roll_forward() {
        assert_eq!(resolve("9:30"), Some(at(2024, 11, 5, 9, 30)));
        assert_eq!(resolve("3pm"), Some(at(2024, 11, 4, 15, 0)));
        assert_eq!(resolve("下午3点半"), Some(at(2024, 11, 4, 15, 30)));
    }

    #[test]
    fn test_leading_clock_merges_into_date() {
        assert_eq!(resolve("3pm tomorrow"), Some(at(2024, 11, 5, 15, 0)));
        assert_eq!(resolve("9am on Friday"), Some(at(2024, 11, 8, 9, 0)));
    }

    #[test]
    fn test_no_temporal_content() {
        assert_eq!(resolve("nothing to see here"), None);
        assert_eq!(resolve("2 tasks left"), None);
        assert_eq!(resolve("RMB 22,500.00 credited"), None);
        assert_eq!(resolve(""), None);
    }

    #[test]
    fn test_matches_are_ordered() {
        let matches = TemporalResolver::new().matches("tomorrow 9am, today 3pm", now());
        assert_eq!(matches.len(), 2);
        assert!(matches[0].start < matches[1].start);
        assert_eq!(matches[0].at, at(2024, 11, 5, 9, 0));
    }

    #[test]
    fn test_resolve_keeps_timezone() {
        let tz = FixedOffset::east_opt(8 * 3600).unwrap();
        let now = tz.from_local_datetime(&now()).unwrap();
        let resolved = TemporalResolver::new().resolve("today 3pm", &now).unwrap();
        assert_eq!(resolved.naive_local(), at(2024, 11, 4, 15, 0));
        assert_eq!(resolved.offset(), now.offset());
    }
}
