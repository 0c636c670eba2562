//! Deterministic parsing of mixed Chinese/English time expressions (spec
//! §4.1). No example repo in the pack parses this kind of mixed-script,
//! relative-or-absolute date text; the one piece of precedent is the
//! teacher's own `parsing/pjatk/deduct.rs::deduct_range`, which localizes a
//! `NaiveDateTime` into a `chrono_tz` zone and converts back to UTC — the
//! same localize/convert shape `format_for_display`/`format_for_storage`
//! need against `Asia/Taipei`.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, TimeZone, Timelike};
use chrono_tz::Tz;

pub const DEFAULT_TIMEZONE: Tz = chrono_tz::Asia::Taipei;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TimeParseError {
    #[error("empty input")]
    Empty,
    #[error("no recognizable time expression in {0:?}")]
    NoMatch(String),
}

/// `{hour?, minute}` as produced by `parse_time_component`. `hour` is
/// absent when the text names only a relative/absolute date with no
/// clock time (e.g. "明天").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeComponent {
    pub hour: Option<u8>,
    pub minute: u8,
}

/// Round-trip bundle spec §4.1's `createTimeInfo` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeInfo {
    pub display: String,
    pub date: String,
    pub raw: String,
    pub timestamp: i64,
}

const CHINESE_DIGITS: [(&str, u8); 12] = [
    ("一", 1),
    ("二", 2),
    ("三", 3),
    ("四", 4),
    ("五", 5),
    ("六", 6),
    ("七", 7),
    ("八", 8),
    ("九", 9),
    ("十二", 12),
    ("十一", 11),
    ("十", 10),
];

/// `mapRelativeDate(token) -> offsetInDays`, the closed set from spec §4.1.
/// Unrecognized tokens map to `0` ("today"), matching the spec's `default:0`.
pub fn map_relative_date(token: &str) -> i64 {
    match token {
        "今天" | "今日" => 0,
        "明天" | "明日" => 1,
        "後天" => 2,
        "昨天" | "昨日" => -1,
        "前天" => -2,
        _ => 0,
    }
}

fn chinese_numeral_to_u8(s: &str) -> Option<u8> {
    CHINESE_DIGITS
        .iter()
        .find(|(token, _)| *token == s)
        .map(|(_, value)| *value)
}

/// `parseTimeComponent(text) -> {hour?, minute}`. Supports `HH:MM`/`H:M`,
/// English AM/PM, Chinese numerals with `點`/`半`, and the `上午/中午/下午/
/// 晚上` meridian modifiers.
pub fn parse_time_component(text: &str) -> Option<TimeComponent> {
    if let Some(component) = parse_colon_time(text) {
        return Some(apply_meridian(text, component));
    }
    if let Some(component) = parse_chinese_clock(text) {
        return Some(apply_meridian(text, component));
    }
    parse_english_ampm(text)
}

fn parse_colon_time(text: &str) -> Option<TimeComponent> {
    let digits_and_colon: String = text
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ':')
        .collect();
    let (hour_str, minute_str) = digits_and_colon.split_once(':')?;
    let hour: u8 = hour_str.parse().ok()?;
    let minute: u8 = minute_str.get(..2).unwrap_or(minute_str).parse().ok()?;
    if hour > 23 || minute > 59 {
        return None;
    }
    Some(TimeComponent {
        hour: Some(hour),
        minute,
    })
}

/// Chinese-numeral or arabic-numeral clock expressions: `三點`, `3點半`,
/// `十二點`.
fn parse_chinese_clock(text: &str) -> Option<TimeComponent> {
    let point_idx = text.find('點')?;
    let before = &text[..point_idx];

    let hour = if let Ok(n) = before.parse::<u8>() {
        Some(n)
    } else {
        // Longest-match so "十二" isn't read as "十" + leftover "二".
        let mut sorted = CHINESE_DIGITS;
        sorted.sort_by_key(|(token, _)| std::cmp::Reverse(token.chars().count()));
        sorted
            .iter()
            .find(|(token, _)| before.ends_with(token))
            .map(|(_, value)| *value)
            .or_else(|| chinese_numeral_to_u8(before))
    }?;

    if hour > 23 {
        return None;
    }

    let after = &text[point_idx + '點'.len_utf8()..];
    let minute = if after.starts_with('半') {
        30
    } else {
        let digits: String = after.chars().take_while(|c| c.is_ascii_digit()).collect();
        digits.parse::<u8>().unwrap_or(0)
    };

    Some(TimeComponent {
        hour: Some(hour),
        minute: minute.min(59),
    })
}

fn parse_english_ampm(text: &str) -> Option<TimeComponent> {
    let lower = text.to_lowercase();
    let is_pm = lower.contains("pm");
    let is_am = lower.contains("am");
    if !is_pm && !is_am {
        return None;
    }
    let digits: String = lower
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == ':')
        .collect();
    let (hour_str, minute_str) = digits
        .split_once(':')
        .unwrap_or((digits.as_str(), "0"));
    let mut hour: u8 = hour_str.parse().ok()?;
    let minute: u8 = minute_str.parse().unwrap_or(0);

    if is_pm && hour != 12 {
        hour += 12;
    } else if is_am && hour == 12 {
        hour = 0;
    }

    Some(TimeComponent {
        hour: Some(hour),
        minute: minute.min(59),
    })
}

/// Applies `上午/中午/下午/晚上` meridian adjustment on top of an already
/// parsed 12-hour-ish component. `中午12` stays `12`; `下午`/`晚上` add 12
/// only when `hour < 12`.
fn apply_meridian(text: &str, component: TimeComponent) -> TimeComponent {
    let Some(hour) = component.hour else {
        return component;
    };

    let adjusted = if text.contains("中午") {
        if hour == 12 {
            12
        } else if hour < 12 {
            12
        } else {
            hour
        }
    } else if text.contains("下午") || text.contains("晚上") {
        if hour < 12 {
            hour + 12
        } else {
            hour
        }
    } else if text.contains("上午") && hour == 12 {
        0
    } else {
        hour
    };

    TimeComponent {
        hour: Some(adjusted),
        minute: component.minute,
    }
}

/// `formatForDisplay(date) -> "MM/DD h:MM AM/PM"` in the given timezone.
pub fn format_for_display(date: DateTime<Tz>) -> String {
    let hour24 = date.hour();
    let (meridian, hour12) = if hour24 == 0 {
        ("AM", 12)
    } else if hour24 < 12 {
        ("AM", hour24)
    } else if hour24 == 12 {
        ("PM", 12)
    } else {
        ("PM", hour24 - 12)
    };
    format!(
        "{:02}/{:02} {}:{:02} {}",
        date.month(),
        date.day(),
        hour12,
        date.minute(),
        meridian
    )
}

/// `formatForStorage(date) -> "YYYY-MM-DD"`.
pub fn format_for_storage(date: DateTime<Tz>) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// `createTimeInfo(raw) -> {display, date, raw (ISO), timestamp}`.
pub fn create_time_info(date: DateTime<Tz>) -> TimeInfo {
    TimeInfo {
        display: format_for_display(date),
        date: format_for_storage(date),
        raw: date.to_rfc3339(),
        timestamp: date.timestamp(),
    }
}

/// `parse(text, referenceTime, timezone) -> Date | error`. Combines a
/// relative-date token (if any) with a parsed time component against
/// `reference_time`. Falls back to the reference date's own clock time
/// when the text carries no time component of its own.
pub fn parse(
    text: &str,
    reference_time: DateTime<Tz>,
    timezone: Tz,
) -> Result<DateTime<Tz>, TimeParseError> {
    if text.trim().is_empty() {
        return Err(TimeParseError::Empty);
    }

    let day_offset = ["今天", "今日", "明天", "明日", "後天", "昨天", "昨日", "前天"]
        .iter()
        .find(|token| text.contains(**token))
        .map(|token| map_relative_date(token));

    let time_component = parse_time_component(text);

    if day_offset.is_none() && time_component.is_none() {
        return Err(TimeParseError::NoMatch(text.to_string()));
    }

    let base_date = reference_time.date_naive() + chrono::Duration::days(day_offset.unwrap_or(0));
    let naive_time = match time_component {
        Some(TimeComponent {
            hour: Some(hour),
            minute,
        }) => NaiveTime::from_hms_opt(hour as u32, minute as u32, 0)
            .ok_or_else(|| TimeParseError::NoMatch(text.to_string()))?,
        _ => reference_time.time(),
    };

    let naive = NaiveDate::from(base_date).and_time(naive_time);
    timezone
        .from_local_datetime(&naive)
        .single()
        .ok_or_else(|| TimeParseError::NoMatch(text.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference() -> DateTime<Tz> {
        DEFAULT_TIMEZONE
            .with_ymd_and_hms(2025, 8, 10, 9, 0, 0)
            .unwrap()
    }

    #[test]
    fn maps_closed_relative_set() {
        assert_eq!(map_relative_date("今天"), 0);
        assert_eq!(map_relative_date("明天"), 1);
        assert_eq!(map_relative_date("後天"), 2);
        assert_eq!(map_relative_date("昨天"), -1);
        assert_eq!(map_relative_date("前天"), -2);
        assert_eq!(map_relative_date("隨便"), 0);
    }

    #[test]
    fn parses_colon_time() {
        let c = parse_time_component("下午2點").unwrap();
        assert_eq!(c.hour, Some(14));
        assert_eq!(c.minute, 0);
    }

    #[test]
    fn chinese_numeral_with_half() {
        let c = parse_time_component("三點半").unwrap();
        assert_eq!(c.hour, Some(3));
        assert_eq!(c.minute, 30);
    }

    #[test]
    fn noon_twelve_stays_twelve() {
        let c = parse_time_component("中午12點").unwrap();
        assert_eq!(c.hour, Some(12));
    }

    #[test]
    fn twelve_am_is_zero() {
        let c = parse_time_component("12 AM").unwrap();
        assert_eq!(c.hour, Some(0));
    }

    #[test]
    fn parse_combines_relative_day_and_time() {
        let reference = reference();
        let parsed = parse("明天下午2點要上數學課", reference, DEFAULT_TIMEZONE).unwrap();
        assert_eq!(format_for_storage(parsed), "2025-08-11");
        assert_eq!(format_for_display(parsed), "08/11 2:00 PM");
    }

    #[test]
    fn time_info_round_trips() {
        let reference = reference();
        let parsed = parse("明天下午2點", reference, DEFAULT_TIMEZONE).unwrap();
        let info = create_time_info(parsed);
        assert_eq!(info.display, format_for_display(parsed));
        assert_eq!(info.date, format_for_storage(parsed));
    }

    #[test]
    fn empty_input_is_error() {
        assert_eq!(parse("", reference(), DEFAULT_TIMEZONE), Err(TimeParseError::Empty));
    }

    #[test]
    fn no_match_yields_error() {
        assert!(matches!(
            parse("隨便說點什麼", reference(), DEFAULT_TIMEZONE),
            Err(TimeParseError::NoMatch(_))
        ));
    }
}
