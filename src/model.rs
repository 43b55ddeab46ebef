use std::fmt;
use std::time::Duration;

use anyhow::{Result, bail};
use chrono::{DateTime, Datelike, NaiveDate, TimeZone, Utc};
use serde::Serialize;

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UpdateStatus {
    Success,
    Error,
    Unknown,
}

impl UpdateStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "SUCCESS",
            Self::Error => "ERROR",
            Self::Unknown => "UNKNOWN",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "SUCCESS" => Some(Self::Success),
            "ERROR" => Some(Self::Error),
            "UNKNOWN" => Some(Self::Unknown),
            _ => None,
        }
    }

    pub fn from_legacy(value: &str) -> Self {
        let upper = value.to_ascii_uppercase();
        if upper.contains("ERROR") || upper.contains("FAIL") {
            Self::Error
        } else if upper.contains("SUCCESS") {
            Self::Success
        } else {
            Self::Unknown
        }
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Eq, PartialEq, Serialize)]
pub struct PackageUpdate {
    pub name: String,
    pub old_version: Option<String>,
    pub new_version: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateRecord {
    pub timestamp: DateTime<Utc>,
    pub status: UpdateStatus,
    pub duration: Option<Duration>,
    pub exit_code: Option<i32>,
    pub server: Option<String>,
    pub environment: Option<String>,
    pub os_family: Option<String>,
    pub packages_updated: Vec<PackageUpdate>,
    pub errors: Vec<String>,
    pub raw_output: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedRecord {
    pub file_name: String,
    pub record: UpdateRecord,
    pub issues: Vec<String>,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, Serialize)]
pub struct Period {
    pub year: i32,
    pub month: u32,
}

impl Period {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        if NaiveDate::from_ymd_opt(year, month, 1).is_none() {
            bail!("invalid report period: {year}-{month:02}");
        }
        Ok(Self { year, month })
    }

    pub fn previous_month(today: NaiveDate) -> Self {
        if today.month() == 1 {
            Self {
                year: today.year() - 1,
                month: 12,
            }
        } else {
            Self {
                year: today.year(),
                month: today.month() - 1,
            }
        }
    }

    pub fn next(self) -> Self {
        if self.month == 12 {
            Self {
                year: self.year + 1,
                month: 1,
            }
        } else {
            Self {
                year: self.year,
                month: self.month + 1,
            }
        }
    }

    pub fn start(self) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(self.year, self.month, 1, 0, 0, 0)
            .single()
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn end(self) -> DateTime<Utc> {
        self.next().start()
    }

    pub fn contains(self, ts: DateTime<Utc>) -> bool {
        ts >= self.start() && ts < self.end()
    }

    pub fn compact(self) -> String {
        format!("{:04}{:02}", self.year, self.month)
    }

    pub fn label(self) -> String {
        self.start().format("%B %Y").to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MonthlySummary {
    pub period: Period,
    pub records: Vec<LoadedRecord>,
    pub total_runs: usize,
    pub success_count: usize,
    pub error_count: usize,
    pub unknown_count: usize,
}

impl MonthlySummary {
    pub fn new(period: Period, mut records: Vec<LoadedRecord>) -> Self {
        records.sort_by(|a, b| {
            a.record
                .timestamp
                .cmp(&b.record.timestamp)
                .then_with(|| a.file_name.cmp(&b.file_name))
        });

        let count = |status: UpdateStatus| {
            records
                .iter()
                .filter(|entry| entry.record.status == status)
                .count()
        };
        let success_count = count(UpdateStatus::Success);
        let error_count = count(UpdateStatus::Error);
        let unknown_count = count(UpdateStatus::Unknown);

        Self {
            period,
            total_runs: records.len(),
            success_count,
            error_count,
            unknown_count,
            records,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Datelike, FixedOffset, NaiveDate, TimeZone, Utc};

    use super::{Period, UpdateStatus};

    #[test]
    fn previous_month_wraps_to_december() {
        let today = NaiveDate::from_ymd_opt(2026, 1, 15).unwrap();
        assert_eq!(
            Period::previous_month(today),
            Period {
                year: 2025,
                month: 12
            }
        );

        let today = NaiveDate::from_ymd_opt(2026, 3, 1).unwrap();
        assert_eq!(Period::previous_month(today), Period { year: 2026, month: 2 });
    }

    #[test]
    fn previous_month_follows_the_local_date_east_of_utc() {
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let local = offset.with_ymd_and_hms(2026, 3, 1, 1, 0, 0).unwrap();
        assert_eq!(local.with_timezone(&Utc).month(), 2);

        assert_eq!(
            Period::previous_month(local.date_naive()),
            Period { year: 2026, month: 2 }
        );
    }

    #[test]
    fn period_bounds_are_half_open() {
        let period = Period::new(2026, 12).expect("valid period");
        assert_eq!(period.start(), Utc.with_ymd_and_hms(2026, 12, 1, 0, 0, 0).unwrap());
        assert_eq!(period.end(), Utc.with_ymd_and_hms(2027, 1, 1, 0, 0, 0).unwrap());
        assert!(period.contains(Utc.with_ymd_and_hms(2026, 12, 31, 23, 59, 59).unwrap()));
        assert!(!period.contains(period.end()));
        assert_eq!(period.compact(), "202612");
        assert_eq!(period.label(), "December 2026");
    }

    #[test]
    fn period_rejects_invalid_month() {
        assert!(Period::new(2026, 13).is_err());
        assert!(Period::new(2026, 0).is_err());
    }

    #[test]
    fn legacy_status_text_maps_to_status() {
        assert_eq!(UpdateStatus::from_legacy("SUCCESS"), UpdateStatus::Success);
        assert_eq!(
            UpdateStatus::from_legacy("COMPLETED WITH ERRORS"),
            UpdateStatus::Error
        );
        assert_eq!(UpdateStatus::from_legacy("running"), UpdateStatus::Unknown);
        assert_eq!(UpdateStatus::parse("ERROR"), Some(UpdateStatus::Error));
        assert_eq!(UpdateStatus::parse("error"), None);
    }
}
