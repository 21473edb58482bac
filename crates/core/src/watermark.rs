use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// Cutoff between already-reconciled and newly-arrived data.
///
/// Ordering compares instants, so `2024-01-01T02:00:00+02:00` equals
/// `2024-01-01T00:00:00+00:00`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Watermark(DateTime<FixedOffset>);

impl Watermark {
    pub fn parse(value: &str) -> Result<Self, CoreError> {
        DateTime::parse_from_rfc3339(value.trim())
            .map(Self)
            .map_err(|e| CoreError::InvalidTimestamp {
                value: value.to_string(),
                reason: e.to_string(),
            })
    }

    pub fn now() -> Self {
        Self(Utc::now().fixed_offset())
    }

    pub fn from_datetime(dt: DateTime<FixedOffset>) -> Self {
        Self(dt)
    }

    pub fn as_datetime(&self) -> &DateTime<FixedOffset> {
        &self.0
    }

    pub fn to_rfc3339(&self) -> String {
        self.0.to_rfc3339()
    }

    pub fn plus_seconds(&self, secs: i64) -> Self {
        Self(self.0 + TimeDelta::seconds(secs))
    }

    /// Next stored value after a successful commit. Never moves backwards,
    /// even when the local clock is behind the stored cutoff.
    pub fn advance(stored: Option<Watermark>, now: Watermark) -> Watermark {
        match stored {
            Some(prev) if prev > now => prev,
            _ => now,
        }
    }
}

impl fmt::Display for Watermark {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_rfc3339())
    }
}

impl FromStr for Watermark {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Which Target rows take part in a diff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffScope {
    FullHistory,
    Since(Watermark),
}

impl DiffScope {
    /// Rows with an unreadable timestamp are always in scope.
    pub fn includes(&self, last_modified: Option<&str>) -> bool {
        match self {
            Self::FullHistory => true,
            Self::Since(cutoff) => match last_modified.map(Watermark::parse) {
                Some(Ok(ts)) => ts > *cutoff,
                _ => true,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_keeps_offset_and_compares_instants() {
        let a = Watermark::parse("2024-01-01T02:00:00+02:00").unwrap();
        let b = Watermark::parse("2024-01-01T00:00:00Z").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.to_rfc3339(), "2024-01-01T02:00:00+02:00");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!(Watermark::parse("yesterday").is_err());
        assert!(Watermark::parse("").is_err());
    }

    #[test]
    fn advance_never_goes_backwards() {
        let later = Watermark::parse("2030-01-01T00:00:00Z").unwrap();
        let earlier = Watermark::parse("2020-01-01T00:00:00Z").unwrap();
        assert_eq!(Watermark::advance(Some(later), earlier), later);
        assert_eq!(Watermark::advance(Some(earlier), later), later);
        assert_eq!(Watermark::advance(None, earlier), earlier);
    }

    #[test]
    fn plus_seconds_keeps_offset() {
        let wm = Watermark::parse("2024-01-01T23:59:59+02:00").unwrap();
        assert_eq!(wm.plus_seconds(1).to_rfc3339(), "2024-01-02T00:00:00+02:00");
        assert!(wm.plus_seconds(-1) < wm);
    }

    #[test]
    fn scope_since_is_strictly_after() {
        let cutoff = Watermark::parse("2024-06-01T00:00:00Z").unwrap();
        let scope = DiffScope::Since(cutoff);
        assert!(!scope.includes(Some("2024-06-01T00:00:00Z")));
        assert!(!scope.includes(Some("2024-05-31T23:59:59Z")));
        assert!(scope.includes(Some("2024-06-01T00:00:01Z")));
    }

    #[test]
    fn unreadable_timestamps_stay_in_scope() {
        let scope = DiffScope::Since(Watermark::parse("2024-06-01T00:00:00Z").unwrap());
        assert!(scope.includes(Some("")));
        assert!(scope.includes(Some("06/01/2024")));
        assert!(scope.includes(None));
        assert!(DiffScope::FullHistory.includes(Some("2000-01-01T00:00:00Z")));
    }
}
