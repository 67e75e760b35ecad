// Injectable time source so timestamp stamping and grace windows are testable

use chrono::{DateTime, SecondsFormat, Utc};

/// Clock trait for testable time
pub trait Clock: Send + Sync {
    fn now_utc(&self) -> DateTime<Utc>;
}

/// Real system clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// `2026-02-01T09:30:00.000Z`
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// `2026-02-01`
pub fn format_date(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%d").to_string()
}

/// Parse a stored date value. Date-only values are read as midnight UTC.
pub fn parse_date_value(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(value.trim_end_matches('Z'), fmt) {
            return Some(naive.and_utc());
        }
    }
    chrono::NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
pub(crate) mod test_clock {
    use super::*;

    /// Test clock pinned to one instant
    pub struct TestClock {
        now: DateTime<Utc>,
    }

    impl TestClock {
        pub fn at(rfc3339: &str) -> Self {
            Self {
                now: parse_date_value(rfc3339).unwrap(),
            }
        }
    }

    impl Clock for TestClock {
        fn now_utc(&self) -> DateTime<Utc> {
            self.now
        }
    }
}
