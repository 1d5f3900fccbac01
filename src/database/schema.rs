//! Typed rows over the persisted schema, plus the read queries
//! `schedule::SqlGridProvider` needs. Follows a plain `sqlx::Row::get` query
//! style with manual `Uuid::parse_str` on the stored TEXT id.

use anyhow::{anyhow, Result};
use sqlx::Row;
use uuid::Uuid;

use super::Database;

/// A row of the `channels` table: the grid parameters a schedule provider
/// needs to compute block boundaries.
#[derive(Debug, Clone)]
pub struct ChannelRow {
    pub id: Uuid,
    pub name: String,
    pub grid_block_minutes: i64,
    pub grid_offset_minutes: i64,
    pub broadcast_day_start: String,
}

impl Database {
    pub async fn list_channels(&self) -> Result<Vec<ChannelRow>> {
        let rows = sqlx::query(
            "SELECT id, name, grid_block_minutes, grid_offset_minutes, broadcast_day_start \
             FROM channels ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_channel).collect()
    }

    pub async fn get_channel(&self, channel_id: Uuid) -> Result<Option<ChannelRow>> {
        let row = sqlx::query(
            "SELECT id, name, grid_block_minutes, grid_offset_minutes, broadcast_day_start \
             FROM channels WHERE id = ?",
        )
        .bind(channel_id.to_string())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_channel).transpose()
    }

    fn row_to_channel(row: sqlx::sqlite::SqliteRow) -> Result<ChannelRow> {
        let id_str: String = row.get("id");
        let block_minutes: i64 = row.get("grid_block_minutes");
        if ![15, 30, 60].contains(&block_minutes) {
            return Err(anyhow!(
                "channel {id_str} has invalid grid_block_minutes {block_minutes} (must be 15, 30 or 60)"
            ));
        }
        let offset_minutes: i64 = row.get("grid_offset_minutes");
        if offset_minutes % block_minutes != 0 {
            return Err(anyhow!(
                "channel {id_str} grid_offset_minutes {offset_minutes} is not a multiple of block size {block_minutes}"
            ));
        }
        Ok(ChannelRow {
            id: Uuid::parse_str(&id_str)?,
            name: row.get("name"),
            grid_block_minutes: block_minutes,
            grid_offset_minutes: offset_minutes,
            broadcast_day_start: row.get("broadcast_day_start"),
        })
    }
}
