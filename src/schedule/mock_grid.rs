//! Deterministic schedule provider: a fixed grid block repeating forever,
//! alternating a content program and a deterministic filler.
//!
//! Modeled as a pure, synchronous computation rather than a polling daemon:
//! given a channel's grid parameters and a timestamp, derive the block, the
//! segment within it, and the lookahead, with no I/O and no mutation.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{FrameRate, ScheduleProvider, Segment, SegmentType};
use crate::errors::SchedulingError;

/// Per-channel grid parameters for [`MockGridProvider`].
#[derive(Debug, Clone)]
pub struct GridChannelConfig {
    /// Grid block size in minutes. Must be one of {15, 30, 60}, enforced
    /// in [`GridChannelConfig::new`].
    pub block_minutes: i64,
    /// Length of the content program at the start of each block, in
    /// minutes. The remainder of the block (`block_minutes - program_minutes`)
    /// is filled by the deterministic filler.
    pub program_minutes: i64,
    pub program_asset: String,
    pub filler_asset: String,
    /// Anchor instant for the filler's continuous-virtual offset: offset at
    /// time T is `(T - filler_epoch) mod filler_len`.
    pub filler_epoch: DateTime<Utc>,
    pub fps: FrameRate,
}

impl GridChannelConfig {
    pub fn new(
        block_minutes: i64,
        program_minutes: i64,
        program_asset: impl Into<String>,
        filler_asset: impl Into<String>,
        filler_epoch: DateTime<Utc>,
        fps: FrameRate,
    ) -> Result<Self, SchedulingError> {
        if ![15, 30, 60].contains(&block_minutes) {
            return Err(SchedulingError::InvalidSegment {
                reason: format!("grid block size {block_minutes} not in {{15, 30, 60}}"),
            });
        }
        if program_minutes <= 0 || program_minutes >= block_minutes {
            return Err(SchedulingError::InvalidSegment {
                reason: format!(
                    "program length {program_minutes}m must be within (0, {block_minutes}m)"
                ),
            });
        }
        Ok(Self {
            block_minutes,
            program_minutes,
            program_asset: program_asset.into(),
            filler_asset: filler_asset.into(),
            filler_epoch,
            fps,
        })
    }

    fn filler_minutes(&self) -> i64 {
        self.block_minutes - self.program_minutes
    }
}

/// A plain marker distinguishing which half of a block a generated segment
/// occupies, used internally while walking the repeating block sequence.
#[derive(Clone, Copy)]
enum Slot {
    Program,
    Filler,
}

pub struct MockGridProvider {
    channels: RwLock<HashMap<Uuid, GridChannelConfig>>,
}

impl MockGridProvider {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
        }
    }

    pub async fn register_channel(&self, channel_id: Uuid, config: GridChannelConfig) {
        self.channels.write().await.insert(channel_id, config);
    }

    /// Grid-align `at` down to the most recent block boundary, treating UTC
    /// midnight as the broadcast-day anchor (the general case of a
    /// configurable broadcast-day-start minute is handled by
    /// `SqlGridProvider`; the mock keeps the simpler midnight-anchored
    /// default).
    fn block_start(config: &GridChannelConfig, at: DateTime<Utc>) -> DateTime<Utc> {
        let day_start = at.date_naive().and_hms_opt(0, 0, 0).unwrap();
        let day_start = Utc.from_utc_datetime(&day_start);
        let minutes_since_midnight = (at - day_start).num_minutes();
        let block_index = minutes_since_midnight.div_euclid(config.block_minutes);
        day_start + Duration::minutes(block_index * config.block_minutes)
    }

    fn filler_start_pts_ms(config: &GridChannelConfig, at: DateTime<Utc>) -> i64 {
        let filler_len_s = config.filler_minutes() * 60;
        let delta_s = (at - config.filler_epoch).num_seconds().rem_euclid(filler_len_s);
        delta_s * 1000
    }

    /// Build the full segment for `(block_start, slot)` — i.e. the segment
    /// as it would air from its own beginning, with no join offset.
    fn full_segment(config: &GridChannelConfig, block_start: DateTime<Utc>, slot: Slot) -> Segment {
        match slot {
            Slot::Program => {
                let start = block_start;
                let end = start + Duration::minutes(config.program_minutes);
                Segment {
                    asset_path: config.program_asset.clone(),
                    segment_type: SegmentType::Content,
                    start_time_utc: start,
                    end_time_utc: end,
                    duration_s: (end - start).num_milliseconds() as f64 / 1000.0,
                    frame_count: None,
                    start_pts_ms: 0,
                    fps: config.fps,
                }
            }
            Slot::Filler => {
                let start = block_start + Duration::minutes(config.program_minutes);
                let end = block_start + Duration::minutes(config.block_minutes);
                Segment {
                    asset_path: config.filler_asset.clone(),
                    segment_type: SegmentType::Filler,
                    start_time_utc: start,
                    end_time_utc: end,
                    duration_s: (end - start).num_milliseconds() as f64 / 1000.0,
                    frame_count: None,
                    start_pts_ms: Self::filler_start_pts_ms(config, start),
                    fps: config.fps,
                }
            }
        }
    }

    /// Trim `segment` (a full segment) to begin at `join_at`, which must
    /// fall strictly within `[segment.start_time_utc, segment.end_time_utc)`.
    /// Advances `start_pts_ms` by the elapsed offset so a mid-segment join
    /// resumes at the right point in the asset.
    fn trim_to_join(segment: Segment, join_at: DateTime<Utc>) -> Segment {
        if join_at <= segment.start_time_utc {
            return segment;
        }
        let elapsed_ms = (join_at - segment.start_time_utc).num_milliseconds();
        Segment {
            start_time_utc: join_at,
            start_pts_ms: segment.start_pts_ms + elapsed_ms,
            duration_s: (segment.end_time_utc - join_at).num_milliseconds() as f64 / 1000.0,
            ..segment
        }
    }

    /// Walk the repeating block sequence starting at `(block_start, slot)`
    /// for `count` full segments (ignoring any join trim), used to build
    /// the lookahead.
    fn walk(
        config: &GridChannelConfig,
        mut block_start: DateTime<Utc>,
        mut slot: Slot,
        count: usize,
    ) -> Vec<Segment> {
        let mut out = Vec::with_capacity(count);
        for _ in 0..count {
            out.push(Self::full_segment(config, block_start, slot));
            slot = match slot {
                Slot::Program => Slot::Filler,
                Slot::Filler => {
                    block_start += Duration::minutes(config.block_minutes);
                    Slot::Program
                }
            };
        }
        out
    }
}

impl Default for MockGridProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ScheduleProvider for MockGridProvider {
    async fn playout_plan_now(
        &self,
        channel_id: Uuid,
        at_time_utc: DateTime<Utc>,
    ) -> Result<Vec<Segment>, SchedulingError> {
        let channels = self.channels.read().await;
        let Some(config) = channels.get(&channel_id) else {
            return Ok(Vec::new());
        };

        let block_start = Self::block_start(config, at_time_utc);
        let program_end = block_start + Duration::minutes(config.program_minutes);

        let current_slot = if at_time_utc < program_end {
            Slot::Program
        } else {
            Slot::Filler
        };

        // current segment + two-element lookahead, per the core contract
        // that preview must be loadable before the current segment exhausts.
        let mut segments = Self::walk(config, block_start, current_slot, 3);
        let current = segments.remove(0);
        let trimmed = Self::trim_to_join(current, at_time_utc);

        let mut result = vec![trimmed];
        result.extend(segments);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ntsc() -> FrameRate {
        FrameRate {
            numerator: 30000,
            denominator: 1001,
        }
    }

    fn sample_config() -> GridChannelConfig {
        GridChannelConfig::new(
            30,
            22,
            "program.mov",
            "filler.mov",
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            ntsc(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn mid_segment_join_returns_trimmed_program_then_lookahead() {
        let provider = MockGridProvider::new();
        let channel = Uuid::new_v4();
        provider.register_channel(channel, sample_config()).await;

        let at = Utc.with_ymd_and_hms(2025, 6, 1, 14, 7, 0).unwrap();
        let plan = provider.playout_plan_now(channel, at).await.unwrap();

        assert_eq!(plan.len(), 3);
        assert_eq!(plan[0].segment_type, SegmentType::Content);
        assert_eq!(plan[0].start_time_utc, at);
        assert_eq!(plan[0].start_pts_ms, 7 * 60 * 1000);
        assert_eq!(plan[0].end_time_utc, Utc.with_ymd_and_hms(2025, 6, 1, 14, 22, 0).unwrap());

        assert_eq!(plan[1].segment_type, SegmentType::Filler);
        assert_eq!(plan[1].start_time_utc, Utc.with_ymd_and_hms(2025, 6, 1, 14, 22, 0).unwrap());
        assert_eq!(plan[1].end_time_utc, Utc.with_ymd_and_hms(2025, 6, 1, 14, 30, 0).unwrap());

        assert_eq!(plan[2].segment_type, SegmentType::Content);
        assert_eq!(plan[2].start_time_utc, Utc.with_ymd_and_hms(2025, 6, 1, 14, 30, 0).unwrap());
    }

    #[tokio::test]
    async fn at_exact_boundary_returns_segment_starting_there() {
        let provider = MockGridProvider::new();
        let channel = Uuid::new_v4();
        provider.register_channel(channel, sample_config()).await;

        let at = Utc.with_ymd_and_hms(2025, 6, 1, 14, 22, 0).unwrap();
        let plan = provider.playout_plan_now(channel, at).await.unwrap();

        assert_eq!(plan[0].segment_type, SegmentType::Filler);
        assert_eq!(plan[0].start_time_utc, at);
        assert_eq!(plan[0].start_pts_ms, MockGridProvider::filler_start_pts_ms(&sample_config(), at));
    }

    #[tokio::test]
    async fn unknown_channel_returns_empty_plan() {
        let provider = MockGridProvider::new();
        let plan = provider.playout_plan_now(Uuid::new_v4(), Utc::now()).await.unwrap();
        assert!(plan.is_empty());
    }

    #[tokio::test]
    async fn playout_plan_now_is_idempotent() {
        let provider = MockGridProvider::new();
        let channel = Uuid::new_v4();
        provider.register_channel(channel, sample_config()).await;

        let at = Utc.with_ymd_and_hms(2025, 6, 1, 14, 7, 0).unwrap();
        let first = provider.playout_plan_now(channel, at).await.unwrap();
        let second = provider.playout_plan_now(channel, at).await.unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_invalid_block_size() {
        let err = GridChannelConfig::new(
            20,
            10,
            "p",
            "f",
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            ntsc(),
        );
        assert!(err.is_err());
    }
}
