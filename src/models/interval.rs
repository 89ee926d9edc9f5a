//! Weekly time slots: day of week plus a half-open `[start, end)` range of
//! wall-clock minutes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntervalError {
    #[error("unrecognized day of week: {0:?}")]
    UnknownDay(String),

    #[error("malformed clock time {0:?}, expected HH:MM")]
    MalformedTime(String),

    #[error("clock time {0:?} is outside 00:00-23:59")]
    OutOfRange(String),

    #[error("end time {end} must be after start time {start}")]
    EndNotAfterStart { start: ClockTime, end: ClockTime },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Weekday {
    Monday,
    Tuesday,
    Wednesday,
    Thursday,
    Friday,
    Saturday,
    Sunday,
}

impl Weekday {
    pub const ALL: [Weekday; 7] = [
        Weekday::Monday,
        Weekday::Tuesday,
        Weekday::Wednesday,
        Weekday::Thursday,
        Weekday::Friday,
        Weekday::Saturday,
        Weekday::Sunday,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Weekday::Monday => "Monday",
            Weekday::Tuesday => "Tuesday",
            Weekday::Wednesday => "Wednesday",
            Weekday::Thursday => "Thursday",
            Weekday::Friday => "Friday",
            Weekday::Saturday => "Saturday",
            Weekday::Sunday => "Sunday",
        }
    }

    pub fn of(date: chrono::NaiveDate) -> Self {
        use chrono::Datelike;
        match date.weekday() {
            chrono::Weekday::Mon => Weekday::Monday,
            chrono::Weekday::Tue => Weekday::Tuesday,
            chrono::Weekday::Wed => Weekday::Wednesday,
            chrono::Weekday::Thu => Weekday::Thursday,
            chrono::Weekday::Fri => Weekday::Friday,
            chrono::Weekday::Sat => Weekday::Saturday,
            chrono::Weekday::Sun => Weekday::Sunday,
        }
    }
}

impl fmt::Display for Weekday {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Weekday {
    type Err = IntervalError;

    /// Accepts English names and abbreviations plus the Indonesian day names
    /// used by the campus directory.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let day = match s.trim().to_ascii_lowercase().as_str() {
            "monday" | "mon" | "senin" => Weekday::Monday,
            "tuesday" | "tue" | "tues" | "selasa" => Weekday::Tuesday,
            "wednesday" | "wed" | "rabu" => Weekday::Wednesday,
            "thursday" | "thu" | "thurs" | "kamis" => Weekday::Thursday,
            "friday" | "fri" | "jumat" | "jum'at" => Weekday::Friday,
            "saturday" | "sat" | "sabtu" => Weekday::Saturday,
            "sunday" | "sun" | "minggu" => Weekday::Sunday,
            _ => return Err(IntervalError::UnknownDay(s.to_string())),
        };
        Ok(day)
    }
}

impl TryFrom<String> for Weekday {
    type Error = IntervalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Weekday> for String {
    fn from(value: Weekday) -> Self {
        value.as_str().to_string()
    }
}

/// Minutes since midnight, minute precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ClockTime(u16);

impl ClockTime {
    pub fn minutes(self) -> u16 {
        self.0
    }
}

impl fmt::Display for ClockTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02}:{:02}", self.0 / 60, self.0 % 60)
    }
}

impl FromStr for ClockTime {
    type Err = IntervalError;

    /// Parses `HH:MM` or `HH:MM:SS`; seconds are dropped.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || IntervalError::MalformedTime(s.to_string());
        let parts: Vec<&str> = s.trim().split(':').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(malformed());
        }

        let field = |text: &str, max_len: usize| -> Result<u16, IntervalError> {
            if text.is_empty() || text.len() > max_len || !text.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed());
            }
            text.parse::<u16>().map_err(|_| malformed())
        };

        let hour = field(parts[0], 2)?;
        let minute = field(parts[1], 2)?;
        if parts[1].len() != 2 {
            return Err(malformed());
        }
        if let Some(seconds) = parts.get(2) {
            if seconds.len() != 2 || field(seconds, 2)? > 59 {
                return Err(malformed());
            }
        }

        if hour > 23 || minute > 59 {
            return Err(IntervalError::OutOfRange(s.to_string()));
        }
        Ok(ClockTime(hour * 60 + minute))
    }
}

impl TryFrom<String> for ClockTime {
    type Error = IntervalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ClockTime> for String {
    fn from(value: ClockTime) -> Self {
        value.to_string()
    }
}

impl From<chrono::NaiveTime> for ClockTime {
    fn from(time: chrono::NaiveTime) -> Self {
        use chrono::Timelike;
        ClockTime((time.hour() * 60 + time.minute()) as u16)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeInterval {
    pub day: Weekday,
    pub start: ClockTime,
    pub end: ClockTime,
}

impl TimeInterval {
    pub fn new(day: Weekday, start: ClockTime, end: ClockTime) -> Result<Self, IntervalError> {
        if end <= start {
            return Err(IntervalError::EndNotAfterStart { start, end });
        }
        Ok(Self { day, start, end })
    }

    pub fn parse(day: &str, start: &str, end: &str) -> Result<Self, IntervalError> {
        Self::new(day.parse()?, start.parse()?, end.parse()?)
    }

    /// Half-open intersection: an interval ending exactly when another begins
    /// does not overlap it.
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.day == other.day && self.start < other.end && other.start < self.end
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(day: &str, start: &str, end: &str) -> TimeInterval {
        TimeInterval::parse(day, start, end).unwrap()
    }

    #[test]
    fn test_parse_clock_time() {
        assert_eq!("08:00".parse::<ClockTime>().unwrap().minutes(), 480);
        assert_eq!("8:05".parse::<ClockTime>().unwrap().minutes(), 485);
        assert_eq!("23:59:30".parse::<ClockTime>().unwrap().minutes(), 1439);
        assert_eq!("00:00".parse::<ClockTime>().unwrap().to_string(), "00:00");
    }

    #[test]
    fn test_reject_bad_clock_times() {
        assert!(matches!("24:00".parse::<ClockTime>(), Err(IntervalError::OutOfRange(_))));
        assert!(matches!("12:60".parse::<ClockTime>(), Err(IntervalError::OutOfRange(_))));
        assert!(matches!("12".parse::<ClockTime>(), Err(IntervalError::MalformedTime(_))));
        assert!(matches!("12:5".parse::<ClockTime>(), Err(IntervalError::MalformedTime(_))));
        assert!(matches!("ab:cd".parse::<ClockTime>(), Err(IntervalError::MalformedTime(_))));
        assert!(matches!("-1:00".parse::<ClockTime>(), Err(IntervalError::MalformedTime(_))));
    }

    #[test]
    fn test_weekday_aliases() {
        assert_eq!("Senin".parse::<Weekday>().unwrap(), Weekday::Monday);
        assert_eq!("fri".parse::<Weekday>().unwrap(), Weekday::Friday);
        assert_eq!(" SUNDAY ".parse::<Weekday>().unwrap(), Weekday::Sunday);
        assert!("Funday".parse::<Weekday>().is_err());
    }

    #[test]
    fn test_weekday_of_date() {
        let date = chrono::NaiveDate::from_ymd_opt(2024, 3, 4).unwrap();
        assert_eq!(Weekday::of(date), Weekday::Monday);
    }

    #[test]
    fn test_end_must_be_after_start() {
        assert!(matches!(
            TimeInterval::parse("Monday", "10:00", "10:00"),
            Err(IntervalError::EndNotAfterStart { .. })
        ));
        assert!(TimeInterval::parse("Monday", "10:00", "09:00").is_err());
    }

    #[test]
    fn test_overlap_is_half_open() {
        let a = iv("Monday", "08:00", "10:00");
        assert!(a.overlaps(&iv("Monday", "09:00", "11:00")));
        assert!(a.overlaps(&iv("Monday", "08:30", "09:30")));
        assert!(a.overlaps(&iv("Monday", "07:00", "12:00")));
        assert!(!a.overlaps(&iv("Monday", "10:00", "11:00")));
        assert!(!a.overlaps(&iv("Monday", "07:00", "08:00")));
        assert!(!a.overlaps(&iv("Tuesday", "08:00", "10:00")));
    }

    #[test]
    fn test_overlap_is_symmetric() {
        let slots = [
            iv("Monday", "08:00", "10:00"),
            iv("Monday", "09:59", "10:30"),
            iv("Monday", "10:00", "12:00"),
            iv("Monday", "06:00", "08:01"),
        ];
        for a in &slots {
            for b in &slots {
                assert_eq!(a.overlaps(b), b.overlaps(a));
            }
        }
    }
}
