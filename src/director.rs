//! Director: global mode policy per channel.
//!
//! Kept deliberately small — a 1-method lookup — since the full authoring
//! surface (what decides a channel should flip to `emergency`) is an
//! external collaborator out of scope for the core.

use std::collections::HashMap;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Per-channel operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelMode {
    Normal,
    Emergency,
    Guide,
}

impl Default for ChannelMode {
    fn default() -> Self {
        ChannelMode::Normal
    }
}

/// Resolves the mode a channel's producer should be constructed for.
/// Implementations are chosen at session construction and never swapped at
/// runtime.
#[async_trait]
pub trait Director: Send + Sync {
    async fn mode_for(&self, channel_id: Uuid) -> ChannelMode;
}

/// Simple in-memory director: channels default to `Normal` unless
/// explicitly overridden. Sufficient for the core; a real deployment's
/// director would read operator overrides from the out-of-scope CLI/store.
pub struct StaticDirector {
    overrides: RwLock<HashMap<Uuid, ChannelMode>>,
}

impl StaticDirector {
    pub fn new() -> Self {
        Self {
            overrides: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set_mode(&self, channel_id: Uuid, mode: ChannelMode) {
        self.overrides.write().await.insert(channel_id, mode);
    }
}

impl Default for StaticDirector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Director for StaticDirector {
    async fn mode_for(&self, channel_id: Uuid) -> ChannelMode {
        self.overrides
            .read()
            .await
            .get(&channel_id)
            .copied()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn defaults_to_normal() {
        let director = StaticDirector::new();
        assert_eq!(director.mode_for(Uuid::new_v4()).await, ChannelMode::Normal);
    }

    #[tokio::test]
    async fn honors_override() {
        let director = StaticDirector::new();
        let channel = Uuid::new_v4();
        director.set_mode(channel, ChannelMode::Emergency).await;
        assert_eq!(director.mode_for(channel).await, ChannelMode::Emergency);
    }
}
