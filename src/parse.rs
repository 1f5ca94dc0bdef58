//! Parsing for trigger day, time, and variation tokens.
//!
//! Pure functions, no I/O. Tokens are case- and surrounding-whitespace-
//! insensitive. Everything normalizes toward what the provider's rule
//! schedule clause can express: a day-of-week list plus a time reference
//! with an optional offset in whole minutes.

use core::fmt;
use rand::Rng;
use std::error::Error;
use std::fmt::{Display, Formatter};

use crate::models::smartthings::{DayOfWeek, TimeReference};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Unrecognized day token
    Day(String),
    /// Malformed or out-of-range `HH:MM` time
    Time(String),
    /// Malformed variation spec
    Variation(String),
    /// An empty day list
    EmptyDays,
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Day(token) => write!(f, "invalid day: {:?}", token),
            ParseError::Time(token) => write!(f, "invalid time: {:?}", token),
            ParseError::Variation(token) => write!(f, "invalid variation: {:?}", token),
            ParseError::EmptyDays => write!(f, "no days provided"),
        }
    }
}

impl Error for ParseError {}

/// Expand a single day token into the days it stands for.
pub fn parse_day(day: &str) -> Result<Vec<DayOfWeek>, ParseError> {
    let normalized = day.trim().to_lowercase();
    let days: &[DayOfWeek] = match normalized.as_str() {
        "all" | "every" => &DayOfWeek::ALL,
        "weekday" | "weekdays" => &[
            DayOfWeek::Mon,
            DayOfWeek::Tue,
            DayOfWeek::Wed,
            DayOfWeek::Thu,
            DayOfWeek::Fri,
        ],
        "weekend" | "weekends" => &[DayOfWeek::Sun, DayOfWeek::Sat],
        "sun" | "sunday" => &[DayOfWeek::Sun],
        "mon" | "monday" => &[DayOfWeek::Mon],
        "tue" | "tuesday" => &[DayOfWeek::Tue],
        "wed" | "wednesday" => &[DayOfWeek::Wed],
        "thu" | "thursday" => &[DayOfWeek::Thu],
        "fri" | "friday" => &[DayOfWeek::Fri],
        "sat" | "saturday" => &[DayOfWeek::Sat],
        _ => return Err(ParseError::Day(day.to_string())),
    };
    Ok(days.to_vec())
}

/// Union all day tokens, deduplicated, in the canonical Sun→Sat order.
pub fn parse_days(days: &[String]) -> Result<Vec<DayOfWeek>, ParseError> {
    if days.is_empty() {
        return Err(ParseError::EmptyDays);
    }
    let mut included = [false; 7];
    for token in days {
        for day in parse_day(token)? {
            included[day as usize] = true;
        }
    }
    Ok(DayOfWeek::ALL
        .into_iter()
        .filter(|day| included[*day as usize])
        .collect())
}

/// Which side of the trigger time a variation may land on.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum VariationSign {
    /// `+`: only after the trigger time
    Plus,
    /// `-`: only before the trigger time
    Minus,
    /// `+/-`: either side
    Both,
}

/// A parsed variation spec.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Variation {
    Disabled,
    Range { sign: VariationSign, minutes: i32 },
}

impl Variation {
    /// Draw a random offset from the range, fresh on every call, so each
    /// refresh picks new jitter: `[0, m]` for `+`, `[-m, 0]` for `-`,
    /// `[-m, m]` for `+/-`.
    pub fn draw(&self) -> Option<i32> {
        match *self {
            Variation::Disabled => None,
            Variation::Range { sign, minutes } => {
                let mut rng = rand::rng();
                Some(match sign {
                    VariationSign::Plus => rng.random_range(0..=minutes),
                    VariationSign::Minus => rng.random_range(-minutes..=0),
                    VariationSign::Both => rng.random_range(-minutes..=minutes),
                })
            }
        }
    }
}

/// Parse a variation spec.
///
/// `disabled`/`none` mean no variation. Otherwise the spec is a sign
/// (`+`, `-`, or `+/-`) followed by a magnitude and unit, e.g.
/// `+/- 30 minutes`. The magnitude is normalized to whole minutes; seconds
/// round to the nearest minute.
pub fn parse_variation_spec(variation: &str) -> Result<Variation, ParseError> {
    let normalized = variation.trim().to_lowercase();
    if normalized == "disabled" || normalized == "none" {
        return Ok(Variation::Disabled);
    }

    let err = || ParseError::Variation(variation.to_string());
    let mut parts = normalized.split_whitespace();
    let sign = parts.next().ok_or_else(err)?;
    let magnitude = parts.next().ok_or_else(err)?;
    let unit = parts.next().ok_or_else(err)?;
    if parts.next().is_some() {
        return Err(err());
    }

    let sign = match sign {
        "+" => VariationSign::Plus,
        "-" => VariationSign::Minus,
        "+/-" => VariationSign::Both,
        _ => return Err(err()),
    };
    let magnitude: i64 = magnitude.parse().map_err(|_| err())?;
    if magnitude < 0 {
        return Err(err());
    }
    let minutes = match unit {
        "hour" | "hours" => magnitude.checked_mul(60).ok_or_else(err)?,
        "minute" | "minutes" => magnitude,
        "second" | "seconds" => (magnitude + 30) / 60,
        _ => return Err(err()),
    };
    let minutes = i32::try_from(minutes).map_err(|_| err())?;
    Ok(Variation::Range { sign, minutes })
}

/// Parse a variation spec and draw an offset from it in one step.
pub fn parse_variation(variation: &str) -> Result<Option<i32>, ParseError> {
    Ok(parse_variation_spec(variation)?.draw())
}

/// Convert a trigger time plus a variation offset into a schedule anchor.
///
/// Solar and logical anchors map to themselves; a clock time becomes a
/// minute offset from `Midnight`. The provider cannot represent an offset
/// at or below zero from `Midnight`, so those collapse to no offset; the
/// solar anchors and `Noon` accept negative offsets as-is.
pub fn parse_trigger_time(
    trigger_time: &str,
    variation: Option<i32>,
) -> Result<(TimeReference, Option<i32>), ParseError> {
    let normalized = trigger_time.trim().to_lowercase();
    match normalized.as_str() {
        "sunrise" => Ok((TimeReference::Sunrise, variation)),
        "sunset" => Ok((TimeReference::Sunset, variation)),
        "noon" => Ok((TimeReference::Noon, variation)),
        "midnight" => Ok((TimeReference::Midnight, variation.filter(|v| *v > 0))),
        clock => {
            let (hour, minute) = parse_time(clock)?;
            let offset = (hour * 60 + minute) as i32 + variation.unwrap_or(0);
            let offset = if offset > 0 { Some(offset) } else { None };
            Ok((TimeReference::Midnight, offset))
        }
    }
}

/// Parse a strict two-digit 24-hour `HH:MM` time.
pub fn parse_time(time: &str) -> Result<(u32, u32), ParseError> {
    let normalized = time.trim();
    let err = || ParseError::Time(time.to_string());

    let bytes = normalized.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(err());
    }
    if !bytes[0].is_ascii_digit()
        || !bytes[1].is_ascii_digit()
        || !bytes[3].is_ascii_digit()
        || !bytes[4].is_ascii_digit()
    {
        return Err(err());
    }
    let hour: u32 = normalized[0..2].parse().map_err(|_| err())?;
    let minute: u32 = normalized[3..5].parse().map_err(|_| err())?;
    if hour > 23 || minute > 59 {
        return Err(err());
    }
    Ok((hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn days(tokens: &[&str]) -> Vec<String> {
        tokens.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn parses_single_day_tokens() {
        assert_eq!(parse_day("tue").unwrap(), vec![DayOfWeek::Tue]);
        assert_eq!(parse_day("Tuesday").unwrap(), vec![DayOfWeek::Tue]);
        assert_eq!(parse_day("  SUN  ").unwrap(), vec![DayOfWeek::Sun]);
        assert_eq!(parse_day("all").unwrap().len(), 7);
        assert_eq!(parse_day("every").unwrap().len(), 7);
        assert_eq!(
            parse_day("weekend").unwrap(),
            vec![DayOfWeek::Sun, DayOfWeek::Sat]
        );
        assert!(parse_day("tues").is_err());
        assert!(parse_day("").is_err());
    }

    #[test]
    fn day_lists_are_deduplicated_and_ordered() {
        assert_eq!(
            parse_days(&days(&["tue", "tue"])).unwrap(),
            vec![DayOfWeek::Tue]
        );
        // Out-of-order input still comes back Sun→Sat
        assert_eq!(
            parse_days(&days(&["sat", "mon", "sun"])).unwrap(),
            vec![DayOfWeek::Sun, DayOfWeek::Mon, DayOfWeek::Sat]
        );
    }

    #[test]
    fn weekday_plus_weekend_is_the_whole_week() {
        assert_eq!(
            parse_days(&days(&["weekday", "weekend"])).unwrap(),
            DayOfWeek::ALL.to_vec()
        );
    }

    #[test]
    fn empty_day_list_fails() {
        assert_eq!(parse_days(&[]), Err(ParseError::EmptyDays));
    }

    #[test]
    fn disabled_variation_is_none() {
        assert_eq!(parse_variation("disabled").unwrap(), None);
        assert_eq!(parse_variation("none").unwrap(), None);
        assert_eq!(parse_variation("  None  ").unwrap(), None);
    }

    #[test]
    fn variation_specs_parse_to_explicit_ranges() {
        assert_eq!(parse_variation_spec("disabled").unwrap(), Variation::Disabled);
        assert_eq!(
            parse_variation_spec("+/- 5 minutes").unwrap(),
            Variation::Range {
                sign: VariationSign::Both,
                minutes: 5
            }
        );
        assert_eq!(
            parse_variation_spec("- 2 HOURS").unwrap(),
            Variation::Range {
                sign: VariationSign::Minus,
                minutes: 120
            }
        );
    }

    #[test]
    fn variation_draws_stay_in_range() {
        for _ in 0..200 {
            let v = parse_variation("+/- 5 minutes").unwrap().unwrap();
            assert!((-5..=5).contains(&v));

            let v = parse_variation("+ 10 minutes").unwrap().unwrap();
            assert!((0..=10).contains(&v));

            let v = parse_variation("- 1 hour").unwrap().unwrap();
            assert!((-60..=0).contains(&v));
        }
    }

    #[test]
    fn variation_units_normalize_to_minutes() {
        for _ in 0..50 {
            let v = parse_variation("+ 2 hours").unwrap().unwrap();
            assert!((0..=120).contains(&v));
            // 90 seconds rounds to 2 minutes
            let v = parse_variation("+/- 90 seconds").unwrap().unwrap();
            assert!((-2..=2).contains(&v));
        }
    }

    #[test]
    fn malformed_variations_fail() {
        for bad in ["5 minutes", "+- 5 minutes", "+ minutes", "+ 5", "+ 5 fortnights", "+ 5 minutes extra"] {
            assert!(parse_variation(bad).is_err(), "{:?} should fail", bad);
        }
    }

    #[test]
    fn solar_anchors_keep_negative_offsets() {
        assert_eq!(
            parse_trigger_time("sunset", Some(-1)).unwrap(),
            (TimeReference::Sunset, Some(-1))
        );
        assert_eq!(
            parse_trigger_time("sunrise", None).unwrap(),
            (TimeReference::Sunrise, None)
        );
        assert_eq!(
            parse_trigger_time("noon", Some(-15)).unwrap(),
            (TimeReference::Noon, Some(-15))
        );
    }

    #[test]
    fn midnight_collapses_nonpositive_offsets() {
        assert_eq!(
            parse_trigger_time("midnight", Some(-1)).unwrap(),
            (TimeReference::Midnight, None)
        );
        assert_eq!(
            parse_trigger_time("midnight", Some(0)).unwrap(),
            (TimeReference::Midnight, None)
        );
        assert_eq!(
            parse_trigger_time("midnight", Some(10)).unwrap(),
            (TimeReference::Midnight, Some(10))
        );
    }

    #[test]
    fn clock_times_anchor_at_midnight() {
        assert_eq!(
            parse_trigger_time("00:01", None).unwrap(),
            (TimeReference::Midnight, Some(1))
        );
        assert_eq!(
            parse_trigger_time("00:01", Some(-2)).unwrap(),
            (TimeReference::Midnight, None)
        );
        assert_eq!(
            parse_trigger_time("19:30", Some(5)).unwrap(),
            (TimeReference::Midnight, Some(19 * 60 + 35))
        );
    }

    #[test]
    fn times_must_be_two_digit_24_hour() {
        assert_eq!(parse_time("00:00").unwrap(), (0, 0));
        assert_eq!(parse_time("23:59").unwrap(), (23, 59));
        for bad in ["8:10", "24:02", "11:67", "1130", "11:3", "aa:bb", ""] {
            assert!(parse_time(bad).is_err(), "{:?} should fail", bad);
        }
    }
}
