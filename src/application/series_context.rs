// Per-evaluation context shared by every series function in one tree
use crate::application::external_source::ExternalDataSources;
use std::sync::Arc;

#[derive(Clone)]
pub struct SeriesContext {
    /// Seconds per window.
    pub time_resolution: i64,
    pub windows_count: usize,
    /// `None` anchors the newest window at "now" (live mode).
    pub last_window_timestamp: Option<i64>,
    pub now_timestamp: i64,
    pub external_data_sources: Arc<ExternalDataSources>,
}

impl SeriesContext {
    pub fn new(
        time_resolution: i64,
        windows_count: usize,
        last_window_timestamp: Option<i64>,
        now_timestamp: i64,
        external_data_sources: Arc<ExternalDataSources>,
    ) -> Self {
        Self {
            time_resolution,
            windows_count,
            last_window_timestamp,
            now_timestamp,
            external_data_sources,
        }
    }

    /// Whether the most recent window of this context is the newest one
    /// available at all.
    pub fn is_newest_window(&self) -> bool {
        match self.last_window_timestamp {
            None => true,
            Some(last) => self.now_timestamp - last < self.time_resolution,
        }
    }

    /// Timestamp the newest window is anchored at.
    pub fn anchor_timestamp(&self) -> i64 {
        self.last_window_timestamp.unwrap_or(self.now_timestamp)
    }

    pub fn is_valid(&self) -> bool {
        self.time_resolution > 0 && self.windows_count > 0
    }
}

impl std::fmt::Debug for SeriesContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SeriesContext")
            .field("time_resolution", &self.time_resolution)
            .field("windows_count", &self.windows_count)
            .field("last_window_timestamp", &self.last_window_timestamp)
            .field("now_timestamp", &self.now_timestamp)
            .field(
                "external_data_sources",
                &self.external_data_sources.keys().collect::<Vec<_>>(),
            )
            .finish()
    }
}
