//! Schedule provider backed by the persisted schema: reads a channel's
//! active plan's `programs` as a repeating daily cycle and derives the same
//! frame-exact lookahead contract as [`super::mock_grid::MockGridProvider`].
//!
//! Authoring the `programs`/`zones`/`plans` rows (the operator CLI) stays
//! out of scope; this provider only reads, using a plain read-query style
//! layered under `async_trait`.

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveTime, Timelike, TimeZone, Utc};
use sqlx::Row;
use uuid::Uuid;

use super::{FrameRate, ScheduleProvider, Segment, SegmentType};
use crate::database::Database;
use crate::errors::SchedulingError;

/// Default frame rate applied to programs read from the persisted schema,
/// which does not carry a per-program fps — resolved as an open question
/// in DESIGN.md.
const DEFAULT_FPS: FrameRate = FrameRate {
    numerator: 30000,
    denominator: 1001,
};

#[derive(Debug, Clone)]
struct ProgramRow {
    start_of_day: NaiveTime,
    duration_min: i64,
    content_type: String,
    content_ref: String,
}

pub struct SqlGridProvider {
    database: Database,
}

impl SqlGridProvider {
    pub fn new(database: Database) -> Self {
        Self { database }
    }

    async fn active_programs(&self, channel_id: Uuid) -> Result<Vec<ProgramRow>, SchedulingError> {
        let rows = sqlx::query(
            "SELECT p.start_time, p.duration_min, p.content_type, p.content_ref \
             FROM programs p \
             JOIN plans pl ON p.plan_id = pl.id \
             WHERE pl.channel_id = ? AND pl.is_active = 1 \
             ORDER BY p.start_time",
        )
        .bind(channel_id.to_string())
        .fetch_all(self.database.pool())
        .await
        .map_err(|e| SchedulingError::NoScheduleData {
            channel_id: channel_id.to_string(),
            at: format!("query failed: {e}"),
        })?;

        let mut programs = Vec::with_capacity(rows.len());
        for row in rows {
            let start_time: String = row.get("start_time");
            let start_of_day = NaiveTime::parse_from_str(&start_time, "%H:%M")
                .or_else(|_| NaiveTime::parse_from_str(&start_time, "%H:%M:%S"))
                .map_err(|e| SchedulingError::InvalidSegment {
                    reason: format!("unparseable program start_time '{start_time}': {e}"),
                })?;
            programs.push(ProgramRow {
                start_of_day,
                duration_min: row.get("duration_min"),
                content_type: row.get("content_type"),
                content_ref: row.get("content_ref"),
            });
        }
        Ok(programs)
    }

    fn segment_type(content_type: &str) -> SegmentType {
        if content_type.eq_ignore_ascii_case("filler") {
            SegmentType::Filler
        } else {
            SegmentType::Content
        }
    }

    /// Materialize `programs` into absolute, full (untrimmed) segments for
    /// the broadcast day containing `day_anchor`, then one more day beyond
    /// it so the lookahead can cross midnight.
    fn materialize(programs: &[ProgramRow], day_anchor: DateTime<Utc>) -> Vec<Segment> {
        let day_start = Utc.from_utc_datetime(&day_anchor.date_naive().and_hms_opt(0, 0, 0).unwrap());
        let mut segments = Vec::with_capacity(programs.len() * 2);
        for day_offset in 0..2 {
            let this_day_start = day_start + Duration::days(day_offset);
            for program in programs {
                let start = this_day_start
                    + Duration::seconds(program.start_of_day.num_seconds_from_midnight() as i64);
                let end = start + Duration::minutes(program.duration_min);
                segments.push(Segment {
                    asset_path: program.content_ref.clone(),
                    segment_type: Self::segment_type(&program.content_type),
                    start_time_utc: start,
                    end_time_utc: end,
                    duration_s: (end - start).num_milliseconds() as f64 / 1000.0,
                    frame_count: None,
                    start_pts_ms: 0,
                    fps: DEFAULT_FPS,
                });
            }
        }
        segments.sort_by_key(|s| s.start_time_utc);
        segments
    }
}

#[async_trait]
impl ScheduleProvider for SqlGridProvider {
    async fn playout_plan_now(
        &self,
        channel_id: Uuid,
        at_time_utc: DateTime<Utc>,
    ) -> Result<Vec<Segment>, SchedulingError> {
        let programs = self.active_programs(channel_id).await?;
        if programs.is_empty() {
            return Ok(Vec::new());
        }

        let materialized = Self::materialize(&programs, at_time_utc);

        let current_index = materialized
            .iter()
            .position(|s| s.start_time_utc <= at_time_utc && at_time_utc < s.end_time_utc);

        let Some(index) = current_index else {
            return Err(SchedulingError::NoScheduleData {
                channel_id: channel_id.to_string(),
                at: at_time_utc.to_rfc3339(),
            });
        };

        let lookahead = 3.min(materialized.len() - index);
        let mut window: Vec<Segment> = materialized[index..index + lookahead].to_vec();
        let current = window.remove(0);
        let elapsed_ms = (at_time_utc - current.start_time_utc).num_milliseconds();
        let trimmed = Segment {
            start_time_utc: at_time_utc,
            start_pts_ms: current.start_pts_ms + elapsed_ms,
            duration_s: (current.end_time_utc - at_time_utc).num_milliseconds() as f64 / 1000.0,
            ..current
        };

        let mut result = vec![trimmed];
        result.extend(window);
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DatabaseConfig;

    async fn seeded_database() -> Database {
        let database = Database::new(&DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: Some(1),
        })
        .await
        .unwrap();
        database.migrate().await.unwrap();
        database
    }

    #[tokio::test]
    async fn reads_daily_cycle_from_persisted_schema() {
        let database = seeded_database().await;
        let channel_id = Uuid::new_v4();
        let plan_id = Uuid::new_v4();

        sqlx::query(
            "INSERT INTO channels (id, name, grid_block_minutes, grid_offset_minutes, broadcast_day_start) \
             VALUES (?, 'Test Channel', 30, 0, '00:00')",
        )
        .bind(channel_id.to_string())
        .execute(database.pool())
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO plans (id, channel_id, name, priority, is_active) \
             VALUES (?, ?, 'Default', 0, 1)",
        )
        .bind(plan_id.to_string())
        .bind(channel_id.to_string())
        .execute(database.pool())
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO programs (id, plan_id, start_time, duration_min, content_type, content_ref) \
             VALUES (?, ?, '14:00', 22, 'content', 'program.mov')",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(plan_id.to_string())
        .execute(database.pool())
        .await
        .unwrap();

        sqlx::query(
            "INSERT INTO programs (id, plan_id, start_time, duration_min, content_type, content_ref) \
             VALUES (?, ?, '14:22', 8, 'filler', 'filler.mov')",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(plan_id.to_string())
        .execute(database.pool())
        .await
        .unwrap();

        let provider = SqlGridProvider::new(database);
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 14, 7, 0).unwrap();
        let plan = provider.playout_plan_now(channel_id, at).await.unwrap();

        assert_eq!(plan[0].asset_path, "program.mov");
        assert_eq!(plan[0].start_pts_ms, 7 * 60 * 1000);
        assert_eq!(plan[1].asset_path, "filler.mov");
    }

    #[tokio::test]
    async fn missing_channel_data_yields_empty_plan() {
        let database = seeded_database().await;
        let provider = SqlGridProvider::new(database);
        let plan = provider
            .playout_plan_now(Uuid::new_v4(), Utc::now())
            .await
            .unwrap();
        assert!(plan.is_empty());
    }
}
