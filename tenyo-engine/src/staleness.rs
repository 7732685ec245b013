//! Snapshot staleness filter.
//!
//! The poller writes nothing when the account has no open positions, so the
//! latest stored snapshot may describe positions that were closed long ago.
//! Acting on such a snapshot would place protection for positions that no
//! longer exist. Anything older than the threshold is discarded.
//!
//! The threshold must cover at least two poll or cycle periods, whichever is
//! longer. With a 10 minute threshold and a 5 minute cycle a closed position
//! can still be acted on for one cycle; the venue rejects reduce-only orders
//! for absent positions, so that window is tolerated.

use std::time::Duration;

use chrono::{DateTime, NaiveDateTime, TimeDelta, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use tenyo_domain::{Position, PositionSnapshot};

use crate::error::{EngineError, EngineResult};

/// Space-separated formats with an explicit offset.
const OFFSET_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f %z",
];

/// Formats without an offset, interpreted as UTC.
const NAIVE_FORMATS: &[&str] = &["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"];

// =============================================================================
// Verdict
// =============================================================================

/// How the latest snapshot was judged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Freshness {
    /// No snapshot has ever been stored
    Missing,
    /// Snapshot older than the threshold
    Stale {
        /// Age in whole seconds
        age_secs: i64,
    },
    /// Snapshot usable
    Fresh {
        /// Age in whole seconds (zero for capture times in the future)
        age_secs: i64,
    },
}

/// Positions that survived filtering, with the verdict that produced them.
#[derive(Debug, Clone)]
pub struct FilteredPositions {
    pub positions: Vec<Position>,
    pub freshness: Freshness,
}

impl FilteredPositions {
    fn empty(freshness: Freshness) -> Self {
        Self {
            positions: Vec::new(),
            freshness,
        }
    }
}

// =============================================================================
// Filter
// =============================================================================

/// Drops snapshots older than a configured threshold.
#[derive(Debug, Clone, Copy)]
pub struct StalenessFilter {
    threshold: TimeDelta,
}

impl StalenessFilter {
    /// Create a filter.
    ///
    /// # Errors
    ///
    /// `EngineError::InvalidConfig` if either interval is zero, or if
    /// `threshold < 2 × max(poll_interval, cycle_interval)`.
    pub fn new(
        threshold: Duration,
        poll_interval: Duration,
        cycle_interval: Duration,
    ) -> EngineResult<Self> {
        if poll_interval.is_zero() || cycle_interval.is_zero() {
            return Err(EngineError::InvalidConfig(format!(
                "poll ({}s) and cycle ({}s) intervals must be non-zero",
                poll_interval.as_secs(),
                cycle_interval.as_secs()
            )));
        }
        let minimum = poll_interval.max(cycle_interval) * 2;
        if threshold < minimum {
            return Err(EngineError::InvalidConfig(format!(
                "staleness threshold {}s must be at least {}s (twice the longer of poll {}s and cycle {}s)",
                threshold.as_secs(),
                minimum.as_secs(),
                poll_interval.as_secs(),
                cycle_interval.as_secs()
            )));
        }

        let threshold = TimeDelta::from_std(threshold).map_err(|e| {
            EngineError::InvalidConfig(format!("staleness threshold out of range: {}", e))
        })?;

        Ok(Self { threshold })
    }

    /// Configured threshold in seconds.
    pub fn threshold_secs(&self) -> i64 {
        self.threshold.num_seconds()
    }

    /// Apply the filter to the latest snapshot.
    ///
    /// # Errors
    ///
    /// `EngineError::MalformedTimestamp` if the capture time cannot be parsed.
    pub fn filter(
        &self,
        snapshot: Option<&PositionSnapshot>,
        now: DateTime<Utc>,
    ) -> EngineResult<FilteredPositions> {
        let Some(snapshot) = snapshot else {
            info!("No position snapshot stored yet");
            return Ok(FilteredPositions::empty(Freshness::Missing));
        };

        let captured_at = parse_captured_at(&snapshot.captured_at)?;
        let age = (now - captured_at).max(TimeDelta::zero());

        if age > self.threshold {
            warn!(
                captured_at = %snapshot.captured_at,
                age_secs = age.num_seconds(),
                threshold_secs = self.threshold.num_seconds(),
                discarded = snapshot.positions.len(),
                "Position snapshot is stale, ignoring it"
            );
            return Ok(FilteredPositions::empty(Freshness::Stale {
                age_secs: age.num_seconds(),
            }));
        }

        info!(
            captured_at = %snapshot.captured_at,
            age_secs = age.num_seconds(),
            positions = snapshot.positions.len(),
            "Position snapshot is fresh"
        );

        Ok(FilteredPositions {
            positions: snapshot.positions.clone(),
            freshness: Freshness::Fresh {
                age_secs: age.num_seconds(),
            },
        })
    }
}

/// Parse a stored capture time.
///
/// Accepts RFC 3339 and `YYYY-MM-DD HH:MM:SS[.fff][offset]`; values without
/// an offset (or with a trailing `Z`) are UTC.
///
/// # Errors
///
/// `EngineError::MalformedTimestamp` if no format matches.
pub fn parse_captured_at(raw: &str) -> EngineResult<DateTime<Utc>> {
    let value = raw.trim();

    if let Ok(ts) = DateTime::parse_from_rfc3339(value) {
        return Ok(ts.with_timezone(&Utc));
    }

    for format in OFFSET_FORMATS {
        if let Ok(ts) = DateTime::parse_from_str(value, format) {
            debug!(format, "Parsed capture time with offset");
            return Ok(ts.with_timezone(&Utc));
        }
    }

    let naive = value.strip_suffix('Z').unwrap_or(value);
    for format in NAIVE_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(naive, format) {
            return Ok(ts.and_utc());
        }
    }

    Err(EngineError::MalformedTimestamp {
        value: raw.to_string(),
        reason: "expected RFC 3339 or 'YYYY-MM-DD HH:MM:SS[.fff][+hh:mm]'".to_string(),
    })
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use tenyo_domain::{InstrumentId, PositionSide};

    fn filter() -> StalenessFilter {
        StalenessFilter::new(
            Duration::from_secs(600),
            Duration::from_secs(60),
            Duration::from_secs(300),
        )
        .unwrap()
    }

    fn snapshot(captured_at: &str) -> PositionSnapshot {
        PositionSnapshot {
            captured_at: captured_at.to_string(),
            positions: vec![Position::new(
                InstrumentId::new("BTC-USDT-SWAP").unwrap(),
                PositionSide::Long,
                dec!(1),
                dec!(100),
            )],
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_threshold_must_cover_two_periods() {
        let err = StalenessFilter::new(
            Duration::from_secs(599),
            Duration::from_secs(60),
            Duration::from_secs(300),
        )
        .unwrap_err();
        assert!(matches!(err, EngineError::InvalidConfig(_)));

        assert!(StalenessFilter::new(
            Duration::from_secs(600),
            Duration::from_secs(300),
            Duration::from_secs(60),
        )
        .is_ok());
    }

    #[test]
    fn test_zero_interval_is_rejected() {
        for (poll, cycle) in [(0, 300), (60, 0), (0, 0)] {
            let result = StalenessFilter::new(
                Duration::from_secs(600),
                Duration::from_secs(poll),
                Duration::from_secs(cycle),
            );
            assert!(matches!(result, Err(EngineError::InvalidConfig(_))));
        }
    }

    #[test]
    fn test_missing_snapshot_yields_empty() {
        let result = filter().filter(None, now()).unwrap();
        assert!(result.positions.is_empty());
        assert_eq!(result.freshness, Freshness::Missing);
    }

    #[test]
    fn test_fresh_snapshot_passes_unchanged() {
        let snap = snapshot("2024-05-01T11:55:00Z");
        let result = filter().filter(Some(&snap), now()).unwrap();

        assert_eq!(result.positions, snap.positions);
        assert_eq!(result.freshness, Freshness::Fresh { age_secs: 300 });
    }

    #[test]
    fn test_stale_snapshot_is_discarded() {
        let snap = snapshot("2024-05-01T11:49:59Z");
        let result = filter().filter(Some(&snap), now()).unwrap();

        assert!(result.positions.is_empty());
        assert_eq!(result.freshness, Freshness::Stale { age_secs: 601 });
    }

    #[test]
    fn test_exact_threshold_is_still_fresh() {
        let snap = snapshot("2024-05-01T11:50:00Z");
        let result = filter().filter(Some(&snap), now()).unwrap();
        assert_eq!(result.positions.len(), 1);
    }

    #[test]
    fn test_future_capture_time_counts_as_zero_age() {
        let snap = snapshot("2024-05-01T12:00:30Z");
        let result = filter().filter(Some(&snap), now()).unwrap();
        assert_eq!(result.freshness, Freshness::Fresh { age_secs: 0 });
    }

    #[test]
    fn test_malformed_timestamp_is_an_error() {
        let snap = snapshot("yesterday-ish");
        let err = filter().filter(Some(&snap), now()).unwrap_err();
        assert!(matches!(err, EngineError::MalformedTimestamp { .. }));
    }

    #[test]
    fn test_parse_accepts_common_store_formats() {
        let expected = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();

        assert_eq!(parse_captured_at("2024-05-01T10:00:00Z").unwrap(), expected);
        assert_eq!(parse_captured_at("2024-05-01T12:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_captured_at("2024-05-01 10:00:00").unwrap(), expected);
        assert_eq!(parse_captured_at("2024-05-01 12:00:00+02:00").unwrap(), expected);
        assert_eq!(parse_captured_at("2024-05-01 10:00:00Z").unwrap(), expected);

        let with_fraction = parse_captured_at("2024-05-01 10:00:00.250").unwrap();
        assert_eq!(with_fraction.timestamp_millis(), expected.timestamp_millis() + 250);
    }
}
