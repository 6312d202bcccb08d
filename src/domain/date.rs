use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use thiserror::Error;

/// Textual date format accepted by the range query, e.g. `01-Jan-2024`.
pub const REPORT_DATE_FORMAT: &str = "%d-%b-%Y";

/// Storage format for timestamps. Same shape as SQLite's `datetime('now', 'localtime')`.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const DATE_FORMAT: &str = "%Y-%m-%d";

/// Parse a range query date such as `15-Jan-2024`. The month abbreviation is case-insensitive.
pub fn parse_report_date(input: &str) -> Result<NaiveDate, DateError> {
    NaiveDate::parse_from_str(input.trim(), REPORT_DATE_FORMAT)
        .map_err(|_| DateError::Unparseable(input.to_string()))
}

pub fn format_report_date(date: NaiveDate) -> String {
    date.format(REPORT_DATE_FORMAT).to_string()
}

pub fn format_timestamp(timestamp: NaiveDateTime) -> String {
    timestamp.format(TIMESTAMP_FORMAT).to_string()
}

/// Parse a stored timestamp. Accepts the storage format, optionally with
/// fractional seconds or a `T` separator, and bare dates (midnight).
pub fn parse_timestamp(input: &str) -> Result<NaiveDateTime, DateError> {
    let input = input.trim();
    ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(input, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(input, DATE_FORMAT)
                .ok()
                .map(|date| date.and_time(NaiveTime::MIN))
        })
        .ok_or_else(|| DateError::Unparseable(input.to_string()))
}

/// An inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, DateError> {
        if start > end {
            return Err(DateError::ReversedRange { start, end });
        }
        // The exclusive upper bound must be representable
        end.succ_opt().ok_or(DateError::OutOfRange(end))?;
        Ok(Self { start, end })
    }

    /// Build a range from two `dd-MMM-yyyy` strings.
    pub fn parse(start: &str, end: &str) -> Result<Self, DateError> {
        Self::new(parse_report_date(start)?, parse_report_date(end)?)
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }

    /// First instant inside the range.
    pub fn lower_bound(&self) -> NaiveDateTime {
        self.start.and_time(NaiveTime::MIN)
    }

    /// First instant after the range: midnight of the day after `end`.
    pub fn upper_bound_exclusive(&self) -> NaiveDateTime {
        // Checked in `new`
        self.end
            .succ_opt()
            .unwrap_or(self.end)
            .and_time(NaiveTime::MIN)
    }

    pub fn contains(&self, timestamp: NaiveDateTime) -> bool {
        timestamp >= self.lower_bound() && timestamp < self.upper_bound_exclusive()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DateError {
    #[error("could not parse date {0:?}")]
    Unparseable(String),

    #[error("start date {start} is after end date {end}")]
    ReversedRange { start: NaiveDate, end: NaiveDate },

    #[error("date {0} is out of range")]
    OutOfRange(NaiveDate),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_parse_report_date() {
        assert_eq!(parse_report_date("01-Jan-2024"), Ok(date(2024, 1, 1)));
        assert_eq!(parse_report_date("15-jan-2024"), Ok(date(2024, 1, 15)));
        assert_eq!(parse_report_date(" 31-DEC-2023 "), Ok(date(2023, 12, 31)));
        assert!(parse_report_date("2024-01-01").is_err());
        assert!(parse_report_date("32-Jan-2024").is_err());
        assert!(parse_report_date("").is_err());
    }

    #[test]
    fn test_format_report_date() {
        assert_eq!(format_report_date(date(2024, 1, 5)), "05-Jan-2024");
    }

    #[test]
    fn test_parse_timestamp_variants() {
        let expected = date(2024, 1, 15).and_hms_opt(9, 30, 0).unwrap();
        assert_eq!(parse_timestamp("2024-01-15 09:30:00"), Ok(expected));
        assert_eq!(parse_timestamp("2024-01-15T09:30:00"), Ok(expected));
        assert_eq!(
            parse_timestamp("2024-01-15 09:30:00.250").map(|t| t.date()),
            Ok(date(2024, 1, 15))
        );
        assert_eq!(
            parse_timestamp("2024-01-15"),
            Ok(date(2024, 1, 15).and_hms_opt(0, 0, 0).unwrap())
        );
        assert!(parse_timestamp("yesterday").is_err());
    }

    #[test]
    fn test_timestamp_format_matches_sqlite() {
        let ts = date(2024, 3, 9).and_hms_opt(7, 5, 3).unwrap();
        assert_eq!(format_timestamp(ts), "2024-03-09 07:05:03");
    }

    #[test]
    fn test_range_includes_whole_end_day() {
        let range = DateRange::new(date(2024, 1, 1), date(2024, 1, 15)).unwrap();

        assert!(range.contains(date(2024, 1, 1).and_hms_opt(0, 0, 0).unwrap()));
        assert!(range.contains(date(2024, 1, 15).and_hms_opt(23, 59, 59).unwrap()));
        assert!(!range.contains(date(2024, 1, 16).and_hms_opt(0, 0, 0).unwrap()));
        assert!(!range.contains(date(2023, 12, 31).and_hms_opt(23, 59, 59).unwrap()));
        assert_eq!(
            range.upper_bound_exclusive(),
            date(2024, 1, 16).and_hms_opt(0, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_reversed_range_is_rejected() {
        assert!(matches!(
            DateRange::new(date(2024, 2, 1), date(2024, 1, 1)),
            Err(DateError::ReversedRange { .. })
        ));
        assert!(DateRange::new(date(2024, 1, 1), date(2024, 1, 1)).is_ok());
    }

    #[test]
    fn test_parse_range() {
        let range = DateRange::parse("01-Jan-2024", "15-Jan-2024").unwrap();
        assert_eq!(range.start(), date(2024, 1, 1));
        assert_eq!(range.end(), date(2024, 1, 15));
        assert!(DateRange::parse("01-Jan-2024", "not a date").is_err());
    }
}
