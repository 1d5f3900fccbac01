//! Session and viewer bookkeeping.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::director::ChannelMode;
use crate::schedule::Segment;

/// One HTTP subscriber of a channel. Identified by an opaque session id;
/// belongs to at most one channel session.
#[derive(Debug, Clone)]
pub struct Viewer {
    pub viewer_id: Uuid,
    pub joined_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// RUNNING/STOPPED channel lifecycle, distinct from the boundary state
/// machine's own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelLifecycle {
    Running,
    Stopped,
}

/// Producer startup/supervision bookkeeping that lives alongside the
/// boundary state machine but isn't part of it: the mode the producer was
/// built for, and the successor segment recorded after a successful preload
/// (needed by the issuance timer and the completion poll).
pub struct SessionData {
    pub channel_id: Uuid,
    pub lifecycle: ChannelLifecycle,
    pub mode: ChannelMode,
    pub viewers: HashMap<Uuid, Viewer>,
    /// The segment currently airing or about to air at the tracked
    /// boundary; `None` before the first plan has been computed.
    pub current_segment: Option<Segment>,
    /// The successor segment recorded at preload time, consumed by the
    /// issuance timer and the completion poll.
    pub successor_segment: Option<Segment>,
}

impl SessionData {
    pub fn new(channel_id: Uuid) -> Self {
        Self {
            channel_id,
            lifecycle: ChannelLifecycle::Stopped,
            mode: ChannelMode::default(),
            viewers: HashMap::new(),
            current_segment: None,
            successor_segment: None,
        }
    }

    pub fn viewer_count(&self) -> usize {
        self.viewers.len()
    }

    /// Returns true on a 0->1 transition.
    pub fn add_viewer(&mut self, viewer_id: Uuid, now: DateTime<Utc>) -> bool {
        let was_empty = self.viewers.is_empty();
        self.viewers.insert(
            viewer_id,
            Viewer {
                viewer_id,
                joined_at: now,
                last_activity: now,
            },
        );
        was_empty
    }

    /// Returns true on a 1->0 transition.
    pub fn remove_viewer(&mut self, viewer_id: Uuid) -> bool {
        self.viewers.remove(&viewer_id);
        self.viewers.is_empty()
    }
}
