//! Schedule provider contract.
//!
//! The provider is a pure, idempotent read: "what should air on channel C at
//! time T". It never mutates state and never picks content — it only
//! reports what a plan (authoring it is out of scope here) says should be
//! airing.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::SchedulingError;

pub mod mock_grid;
pub mod sql_grid;

pub use mock_grid::MockGridProvider;
pub use sql_grid::SqlGridProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SegmentType {
    Content,
    Filler,
}

/// Frame-exact rational frame rate, carried alongside UTC timestamps so a
/// future producer API exposing continuous-time cursors can replace
/// UTC-based exhaustion detection without changing the tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameRate {
    pub numerator: u32,
    pub denominator: u32,
}

impl FrameRate {
    /// Duration of a single frame in microseconds, rounded down.
    pub fn frame_duration_us(&self) -> i64 {
        (self.denominator as i64) * 1_000_000 / (self.numerator as i64)
    }
}

/// The unit of media the producer plays between two boundaries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub asset_path: String,
    pub segment_type: SegmentType,
    pub start_time_utc: DateTime<Utc>,
    pub end_time_utc: DateTime<Utc>,
    pub duration_s: f64,
    /// Explicit, non-negative frame budget. `None` means "derive from
    /// duration_s * fps"; a negative/"play to EOF" budget is not
    /// representable and is rejected by the orchestrator if a provider
    /// somehow produces one downstream (see `Segment::frame_count`).
    pub frame_count: Option<i64>,
    pub start_pts_ms: i64,
    pub fps: FrameRate,
}

impl Segment {
    /// Resolve the explicit-or-derived frame count. Returns an error if
    /// neither an explicit budget nor a positive derived duration exists —
    /// playing to EOF with no frame budget is forbidden.
    pub fn frame_count(&self) -> Result<i64, SchedulingError> {
        if let Some(count) = self.frame_count {
            if count < 0 {
                return Err(SchedulingError::InvalidSegment {
                    reason: format!("negative frame_count {count} ('play to EOF' is forbidden)"),
                });
            }
            return Ok(count);
        }

        let derived = (self.duration_s * self.fps.numerator as f64 / self.fps.denominator as f64)
            .round() as i64;
        if derived <= 0 {
            return Err(SchedulingError::InvalidSegment {
                reason: format!(
                    "segment '{}' has no explicit frame_count and derived duration is non-positive",
                    self.asset_path
                ),
            });
        }
        Ok(derived)
    }

    /// Continuous-time exhaustion point in microseconds, relative to
    /// `start_time_utc` interpreted as `ct_start = 0` for this segment.
    pub fn ct_exhaust_us(&self) -> Result<i64, SchedulingError> {
        Ok(self.frame_count()? * self.fps.frame_duration_us())
    }
}

/// Pure, idempotent read of "what should air on channel C at time T".
///
/// Implementations must never mutate state. The returned sequence begins
/// with the segment containing `at_time` (half-open, start-inclusive) and
/// includes at least a two-element lookahead so the orchestrator can always
/// preload the successor before the current segment exhausts.
#[async_trait]
pub trait ScheduleProvider: Send + Sync {
    async fn playout_plan_now(
        &self,
        channel_id: Uuid,
        at_time_utc: DateTime<Utc>,
    ) -> Result<Vec<Segment>, SchedulingError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fps_ntsc() -> FrameRate {
        FrameRate {
            numerator: 30000,
            denominator: 1001,
        }
    }

    #[test]
    fn frame_duration_us_matches_ntsc() {
        let fps = fps_ntsc();
        // 1001/30000 s per frame = 33366.67us, truncated by integer division.
        assert_eq!(fps.frame_duration_us(), 33366);
    }

    #[test]
    fn negative_frame_count_is_rejected() {
        let seg = Segment {
            asset_path: "filler.mov".into(),
            segment_type: SegmentType::Filler,
            start_time_utc: Utc::now(),
            end_time_utc: Utc::now(),
            duration_s: 0.0,
            frame_count: Some(-1),
            start_pts_ms: 0,
            fps: fps_ntsc(),
        };
        assert!(seg.frame_count().is_err());
    }

    #[test]
    fn derives_frame_count_from_duration_and_fps() {
        let seg = Segment {
            asset_path: "content.mov".into(),
            segment_type: SegmentType::Content,
            start_time_utc: Utc::now(),
            end_time_utc: Utc::now(),
            duration_s: 30.0,
            frame_count: None,
            start_pts_ms: 0,
            fps: FrameRate {
                numerator: 30,
                denominator: 1,
            },
        };
        assert_eq!(seg.frame_count().unwrap(), 900);
    }
}
