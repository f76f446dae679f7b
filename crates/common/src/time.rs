use chrono::{DateTime, Datelike, Duration, NaiveDate, Timelike, Utc};
use std::sync::Mutex;

/// Source of "now" for everything that buckets by calendar day or enforces a TTL.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replay tooling.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    /// Clock pinned to midday UTC on `date` (`YYYY-MM-DD`).
    pub fn at_date(date: &str) -> anyhow::Result<Self> {
        let day = parse_day(date)?;
        let noon = day
            .and_hms_opt(12, 0, 0)
            .ok_or_else(|| anyhow::anyhow!("invalid time of day"))?
            .and_utc();
        Ok(Self::new(noon))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.lock() = now;
    }

    pub fn advance(&self, by: Duration) {
        let mut guard = self.lock();
        *guard += by;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, DateTime<Utc>> {
        self.now
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.lock()
    }
}

/// UTC calendar day, `YYYY-MM-DD`.
pub fn day_key(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d").to_string()
}

/// ISO-8601 week, `YYYY-Www` (week-based year, so 2024-12-30 is `2025-W01`).
pub fn week_key(at: DateTime<Utc>) -> String {
    let week = at.iso_week();
    format!("{}-W{:02}", week.year(), week.week())
}

pub fn hour_of_day(at: DateTime<Utc>) -> u32 {
    at.hour()
}

pub fn parse_day(date: &str) -> anyhow::Result<NaiveDate> {
    NaiveDate::parse_from_str(date, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date {date:?}: {e}"))
}

/// The calendar day before `date`, or `None` when `date` does not parse.
pub fn previous_day(date: &str) -> Option<String> {
    let day = parse_day(date).ok()?;
    day.pred_opt().map(|d| d.format("%Y-%m-%d").to_string())
}

/// Day `days` before `at`, used as the retention cutoff for daily buckets.
pub fn day_key_days_before(at: DateTime<Utc>, days: i64) -> String {
    day_key(at - Duration::days(days))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_day_and_week_keys() {
        let at = Utc.with_ymd_and_hms(2025, 1, 2, 23, 59, 0).unwrap();
        assert_eq!(day_key(at), "2025-01-02");
        assert_eq!(week_key(at), "2025-W01");
        assert_eq!(hour_of_day(at), 23);
    }

    #[test]
    fn test_week_key_uses_iso_year() {
        let at = Utc.with_ymd_and_hms(2024, 12, 30, 8, 0, 0).unwrap();
        assert_eq!(week_key(at), "2025-W01");
    }

    #[test]
    fn test_previous_day_crosses_month_and_year() {
        assert_eq!(previous_day("2025-03-01").as_deref(), Some("2025-02-28"));
        assert_eq!(previous_day("2025-01-01").as_deref(), Some("2024-12-31"));
        assert_eq!(previous_day("garbage"), None);
    }

    #[test]
    fn test_fixed_clock_advances() {
        let clock = FixedClock::at_date("2025-01-01").unwrap();
        clock.advance(Duration::hours(13));
        assert_eq!(day_key(clock.now()), "2025-01-02");
    }
}
