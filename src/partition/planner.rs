use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};

use crate::error::ConfigError;

/// Size of the time bucket behind each partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Granularity {
    Day,
    Month,
    Year,
}

impl Granularity {
    /// When the partition job checks a table (seconds-first cron). Always
    /// more often than the bucket rolls, so the next partition lands before
    /// its period begins.
    pub fn default_schedule(self) -> &'static str {
        match self {
            // every hour at minute 3
            Granularity::Day => "0 3 * * * *",
            // every hour on the 3rd of the month
            Granularity::Month => "0 0 * 3 * *",
            // every hour on January 3rd
            Granularity::Year => "0 0 * 3 1 *",
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Granularity::Day => "day",
            Granularity::Month => "month",
            Granularity::Year => "year",
        }
    }
}

impl FromStr for Granularity {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "day" => Ok(Granularity::Day),
            "month" => Ok(Granularity::Month),
            "year" => Ok(Granularity::Year),
            _ => Err(ConfigError::UnknownGranularity(s.to_string())),
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The partition that should exist next, and its upper bound.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    pub granularity: Granularity,
    pub prefix: String,
    /// Prefix plus the fixed-width date of the next period (YYYY, YYYYMM or
    /// YYYYMMDD), so names of one table order the same as their dates.
    pub name: String,
    /// `YYYY-MM-DD 00:00:00`, two periods ahead of the reference date.
    pub boundary: String,
}

impl PartitionPlan {
    pub fn add_partition_ddl(&self, table: &str) -> String {
        format!(
            "ALTER TABLE {table} ADD PARTITION (PARTITION {} VALUES LESS THAN (UNIX_TIMESTAMP(\"{}\")*1000))",
            self.name, self.boundary
        )
    }
}

/// `(year, month)` shifted by `months`, month is 1-based.
fn shift_month(year: i32, month: u32, months: i32) -> (i32, u32) {
    let total = year * 12 + month as i32 - 1 + months;
    (total.div_euclid(12), total.rem_euclid(12) as u32 + 1)
}

/// Plan the partition for the period after `reference`.
///
/// The name covers the next period while the boundary sits at the start of
/// the period after that, so the partition holds the whole named period.
pub fn plan(granularity: Granularity, reference: NaiveDate, prefix: &str) -> PartitionPlan {
    let (name, boundary) = match granularity {
        Granularity::Month => {
            let (ny, nm) = shift_month(reference.year(), reference.month(), 1);
            let (by, bm) = shift_month(reference.year(), reference.month(), 2);
            (
                format!("{prefix}{ny:04}{nm:02}"),
                format!("{by:04}-{bm:02}-01 00:00:00"),
            )
        }
        Granularity::Day => {
            let next = reference + Duration::days(1);
            let bound = reference + Duration::days(2);
            (
                format!("{prefix}{}", next.format("%Y%m%d")),
                format!("{} 00:00:00", bound.format("%Y-%m-%d")),
            )
        }
        Granularity::Year => (
            format!("{prefix}{:04}", reference.year() + 1),
            format!("{:04}-01-01 00:00:00", reference.year() + 2),
        ),
    };
    PartitionPlan {
        granularity,
        prefix: prefix.to_string(),
        name,
        boundary,
    }
}
