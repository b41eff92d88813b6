//! Cadence expressions.
//!
//! Grammar:
//! ```text
//! off
//! every <n><s|m|h|d>      e.g. "every 15m"
//! daily at HH:MM          UTC, e.g. "daily at 00:00"
//! ```

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::NaiveTime;
use lapse_core::Time;
use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Longest accepted `every` interval: ten years.
const MAX_INTERVAL_SECS: u64 = 10 * 366 * 86_400;

/// How often a family's cycle fires.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Cadence {
    /// Never fires
    #[default]
    Off,
    /// Fires every fixed interval
    Every(Duration),
    /// Fires once a day at a UTC time of day
    DailyAt(NaiveTime),
}

impl Cadence {
    /// Whether the cadence ever fires.
    pub fn is_enabled(&self) -> bool {
        !matches!(self, Cadence::Off)
    }

    /// First fire strictly after `instant`.
    pub fn next_fire_after(&self, instant: Time) -> Option<Time> {
        match *self {
            Cadence::Off => None,
            Cadence::Every(every) => {
                let every = chrono::Duration::from_std(every).ok()?;
                instant.checked_add_signed(every)
            }
            Cadence::DailyAt(at) => {
                let today = instant.date_naive().and_time(at).and_utc();
                if today > instant {
                    Some(today)
                } else {
                    today.checked_add_signed(chrono::Duration::days(1))
                }
            }
        }
    }
}

impl FromStr for Cadence {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expr = s.trim().to_lowercase();
        let invalid = |reason: &str| ConfigError::InvalidCadence {
            expr: s.to_string(),
            reason: reason.to_string(),
        };

        if expr == "off" || expr == "disabled" {
            return Ok(Cadence::Off);
        }

        if let Some(rest) = expr.strip_prefix("every") {
            let rest = rest.trim();
            let split = rest
                .find(|c: char| !c.is_ascii_digit())
                .ok_or_else(|| invalid("missing unit"))?;
            let (count, unit) = rest.split_at(split);
            let count: u64 = count.parse().map_err(|_| invalid("expected a number"))?;
            let seconds = match unit.trim() {
                "s" => 1,
                "m" => 60,
                "h" => 3_600,
                "d" => 86_400,
                _ => return Err(invalid("unit must be one of s, m, h, d")),
            };
            if count == 0 {
                return Err(invalid("interval must be positive"));
            }
            let total = count
                .checked_mul(seconds)
                .filter(|&total| total <= MAX_INTERVAL_SECS)
                .ok_or_else(|| invalid("interval longer than ten years"))?;
            return Ok(Cadence::Every(Duration::from_secs(total)));
        }

        if let Some(rest) = expr.strip_prefix("daily") {
            let rest = rest.trim();
            if rest.is_empty() {
                return Ok(Cadence::DailyAt(NaiveTime::MIN));
            }
            let time = rest
                .strip_prefix("at")
                .map(str::trim)
                .ok_or_else(|| invalid("expected `daily at HH:MM`"))?;
            let at = NaiveTime::parse_from_str(time, "%H:%M")
                .map_err(|_| invalid("time must be HH:MM"))?;
            return Ok(Cadence::DailyAt(at));
        }

        Err(invalid("expected `off`, `every <n><unit>` or `daily at HH:MM`"))
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Off => write!(f, "off"),
            Cadence::Every(every) => {
                let secs = every.as_secs();
                if secs % 86_400 == 0 {
                    write!(f, "every {}d", secs / 86_400)
                } else if secs % 3_600 == 0 {
                    write!(f, "every {}h", secs / 3_600)
                } else if secs % 60 == 0 {
                    write!(f, "every {}m", secs / 60)
                } else {
                    write!(f, "every {secs}s")
                }
            }
            Cadence::DailyAt(at) => write!(f, "daily at {}", at.format("%H:%M")),
        }
    }
}

impl TryFrom<String> for Cadence {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Cadence> for String {
    fn from(cadence: Cadence) -> Self {
        cadence.to_string()
    }
}
