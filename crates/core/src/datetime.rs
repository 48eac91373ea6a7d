//! Relative date resolution
//!
//! Converts Chinese weekday phrases ("下周三下午3:00", "周五之前") into an absolute
//! instant and decides whether that instant is a start or a due date.

use chrono::{DateTime, Datelike, Days, TimeZone, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::types::TimeResolution;

static WEEKDAY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(本|这|下)?(周|星期)(一|二|三|四|五|六|日|天)").expect("Invalid regex")
});

static CLOCK_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(上午|中午|下午|晚上)?\s*(\d{1,2})[:.：](\d{1,2})").expect("Invalid regex")
});

static DEADLINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)截止|之前|前|期限|deadline").expect("Invalid regex"));

static START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)开始|起|从|start").expect("Invalid regex"));

static LIKELY_START_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"将在|在|订于|定于").expect("Invalid regex"));

/// Weekday characters in Sunday-first order; 天 is a second spelling of 日
const WEEKDAY_ORDER: &str = "日一二三四五六天";

/// Which task field a resolved instant belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateRole {
    Start,
    Due,
}

/// Resolve the first weekday phrase in `text` relative to `now`.
///
/// Returns an empty resolution when no weekday phrase is present or the
/// resulting date/time cannot be constructed.
pub fn resolve<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> TimeResolution {
    match try_resolve(text, now) {
        Some(resolution) => resolution,
        None => TimeResolution::default(),
    }
}

fn try_resolve<Tz: TimeZone>(text: &str, now: &DateTime<Tz>) -> Option<TimeResolution> {
    let caps = WEEKDAY_RE.captures(text)?;

    let next_week = caps.get(1).map(|m| m.as_str()) == Some("下");
    let target = weekday_index(&caps[3])?;
    let current = now.weekday().num_days_from_sunday();
    let offset = days_until(target, current, next_week);

    let Some(date) = now.date_naive().checked_add_days(Days::new(offset)) else {
        debug!("Date out of range resolving {:?}", text);
        return None;
    };

    let (hour, minute) = match CLOCK_RE.captures(text) {
        Some(c) => {
            let hour: u32 = c[2].parse().ok()?;
            let minute: u32 = c[3].parse().ok()?;
            (normalize_hour(c.get(1).map(|m| m.as_str()), hour), minute)
        }
        None => (0, 0),
    };

    let Some(local) = date.and_hms_opt(hour, minute, 0) else {
        debug!("Invalid time {}:{} in {:?}", hour, minute, text);
        return None;
    };

    let Some(instant) = now.timezone().from_local_datetime(&local).earliest() else {
        debug!("Local time {} does not exist in this timezone", local);
        return None;
    };
    let instant = instant.with_timezone(&Utc);

    Some(match classify(text) {
        DateRole::Start => TimeResolution {
            start_date: Some(instant),
            due_date: None,
        },
        DateRole::Due => TimeResolution {
            start_date: None,
            due_date: Some(instant),
        },
    })
}

/// Sunday-based index (0..=6) of a weekday character
pub fn weekday_index(ch: &str) -> Option<u32> {
    let c = ch.chars().next()?;
    WEEKDAY_ORDER
        .chars()
        .position(|w| w == c)
        .map(|i| i as u32 % 7)
}

/// Days from `current` to `target` (both Sunday-based).
///
/// "This week" rolls a day that has already come (or is today) to its next
/// occurrence. "Next week" is always at least seven days out.
pub fn days_until(target: u32, current: u32, next_week: bool) -> u64 {
    let diff = target as i64 - current as i64;
    let days = if next_week {
        diff.rem_euclid(7) + 7
    } else if diff <= 0 {
        diff + 7
    } else {
        diff
    };
    days as u64
}

/// Map a 12-hour style hour plus its period word to a 24-hour hour
pub fn normalize_hour(period: Option<&str>, hour: u32) -> u32 {
    match period {
        Some("下午") | Some("晚上") | Some("中午") if hour < 12 => hour + 12,
        Some("上午") if hour == 12 => 0,
        _ => hour,
    }
}

/// Deadline wording wins over start wording; unmarked text is a due date
pub fn classify(text: &str) -> DateRole {
    if DEADLINE_RE.is_match(text) {
        DateRole::Due
    } else if START_RE.is_match(text) || LIKELY_START_RE.is_match(text) {
        DateRole::Start
    } else {
        DateRole::Due
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate, NaiveDateTime, Timelike, Weekday};

    fn tz() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    /// 2026-10-19 is a Monday
    fn monday() -> DateTime<FixedOffset> {
        tz().with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
    }

    fn local(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.with_timezone(&tz()).naive_local()
    }

    fn resolved(text: &str) -> NaiveDateTime {
        let r = resolve(text, &monday());
        local(r.start_date.or(r.due_date).expect("expected a resolved date"))
    }

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_resolve_this_week_upcoming_day() {
        let r = resolve("周四交报告", &monday());
        assert!(r.start_date.is_none());
        let due = local(r.due_date.unwrap());
        assert_eq!(due.date(), day(2026, 10, 22));
        assert_eq!((due.hour(), due.minute()), (0, 0));
    }

    #[test]
    fn test_resolve_same_weekday_rolls_forward() {
        assert_eq!(resolved("周一").date(), day(2026, 10, 26));
        assert_eq!(resolved("本周一").date(), day(2026, 10, 26));
    }

    #[test]
    fn test_resolve_next_week() {
        assert_eq!(resolved("下周一").date(), day(2026, 10, 26));
        assert_eq!(resolved("下周三").date(), day(2026, 10, 28));
        assert_eq!(resolved("下周日").date(), day(2026, 11, 1));
    }

    #[test]
    fn test_next_week_always_at_least_seven_days() {
        for offset in 0..7 {
            let now = monday() + chrono::Duration::days(offset);
            for ch in ["一", "二", "三", "四", "五", "六", "日", "天"] {
                let r = resolve(&format!("下周{}", ch), &now);
                let at = local(r.start_date.or(r.due_date).unwrap());
                let gap = at.date() - now.date_naive();
                assert!(gap.num_days() >= 7, "下周{} from {} gave {}", ch, now, at);
            }
        }
    }

    #[test]
    fn test_ri_and_tian_are_sunday() {
        assert_eq!(weekday_index("日"), Some(0));
        assert_eq!(weekday_index("天"), Some(0));
        assert_eq!(resolved("周日"), resolved("周天"));
        assert_eq!(resolved("星期天").date().weekday(), Weekday::Sun);
        assert_eq!(resolved("星期天").date(), day(2026, 10, 25));
    }

    #[test]
    fn test_time_normalization() {
        let t = resolved("周三下午3:00开始");
        assert_eq!((t.hour(), t.minute()), (15, 0));

        let t = resolved("周三上午12:30");
        assert_eq!((t.hour(), t.minute()), (0, 30));

        let t = resolved("周三中午12:00");
        assert_eq!((t.hour(), t.minute()), (12, 0));

        let t = resolved("周五晚上8.30之前");
        assert_eq!((t.hour(), t.minute()), (20, 30));

        let t = resolved("周五 9：05");
        assert_eq!((t.hour(), t.minute()), (9, 5));
    }

    #[test]
    fn test_normalize_hour() {
        assert_eq!(normalize_hour(Some("下午"), 3), 15);
        assert_eq!(normalize_hour(Some("晚上"), 12), 12);
        assert_eq!(normalize_hour(Some("中午"), 1), 13);
        assert_eq!(normalize_hour(Some("中午"), 12), 12);
        assert_eq!(normalize_hour(Some("上午"), 12), 0);
        assert_eq!(normalize_hour(None, 7), 7);
    }

    #[test]
    fn test_classification() {
        assert_eq!(classify("周五截止"), DateRole::Due);
        assert_eq!(classify("周五之前提交"), DateRole::Due);
        assert_eq!(classify("Friday DEADLINE"), DateRole::Due);
        assert_eq!(classify("周五开始"), DateRole::Start);
        assert_eq!(classify("Start on 周五"), DateRole::Start);
        assert_eq!(classify("会议将在周五举行"), DateRole::Start);
        assert_eq!(classify("周五交作业"), DateRole::Due);
        // deadline wording wins over start wording
        assert_eq!(classify("从周一开始，周五之前完成"), DateRole::Due);
    }

    #[test]
    fn test_resolve_sets_exactly_one_field() {
        let r = resolve("周二在会议室", &monday());
        assert!(r.start_date.is_some());
        assert!(r.due_date.is_none());
    }

    #[test]
    fn test_resolve_uses_first_weekday_only() {
        assert_eq!(resolved("周二和周五").date(), day(2026, 10, 20));
    }

    #[test]
    fn test_resolve_without_weekday_is_empty() {
        assert!(resolve("明天下午3点", &monday()).is_empty());
        assert!(resolve("2026-10-30", &monday()).is_empty());
        assert!(resolve("", &monday()).is_empty());
    }

    #[test]
    fn test_resolve_invalid_time_degrades_to_empty() {
        assert!(resolve("周三25:00", &monday()).is_empty());
        assert!(resolve("周三10:75", &monday()).is_empty());
    }

    #[test]
    fn test_resolve_returns_utc_instant() {
        let r = resolve("周四下午3:00", &monday());
        let due = r.due_date.unwrap();
        assert_eq!(due.to_rfc3339(), "2026-10-22T07:00:00+00:00");
    }
}
