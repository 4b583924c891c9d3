// Chart configuration - view state of one chart and computation of its state
//
// A configuration is either live (following "now", re-evaluated on every
// update interval tick) or anchored at a fixed newest window. Every state
// request evaluates all series from scratch against a fresh context.
use crate::application::chart_definition::{ChartDefinition, SeriesTemplate};
use crate::application::clock::Clock;
use crate::application::external_source::ExternalDataSources;
use crate::application::points_timing::reconcile_points_timing;
use crate::application::series_context::SeriesContext;
use crate::application::series_functions::evaluate_series_function;
use crate::application::window_fitting::generate_fake_points;
use crate::domain::point::Point;
use crate::domain::series_result::SeriesResult;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// Seconds "now" is moved back by in live mode, so that the newest window
/// shown has already been aggregated by the backend.
pub const DEFAULT_LIVE_TIMESTAMP_OFFSET: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeResolutionSpec {
    /// Seconds per window.
    pub time_resolution: i64,
    pub windows_count: usize,
    /// Seconds between live updates.
    pub update_interval: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum ViewMode {
    Live,
    Anchored { last_window_timestamp: i64 },
}

/// Partial view change; absent fields are left untouched.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewParameters {
    pub live: Option<bool>,
    pub last_window_timestamp: Option<i64>,
    pub time_resolution: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesState {
    pub id: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub points: Vec<Point>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartState {
    pub chart_id: String,
    pub title: String,
    #[serde(flatten)]
    pub mode: ViewMode,
    pub time_resolution: i64,
    pub windows_count: usize,
    pub series: Vec<SeriesState>,
    pub x_axis_timestamps: Vec<i64>,
    pub has_reached_oldest: bool,
    pub has_reached_newest: bool,
    pub first_point_timestamp: Option<i64>,
    pub last_point_timestamp: Option<i64>,
}

/// Ticks the change channel every update interval while the chart is live.
struct LiveUpdater {
    handle: JoinHandle<()>,
}

impl LiveUpdater {
    fn start(update_interval: Duration, changes: Arc<watch::Sender<u64>>) -> Self {
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + update_interval, update_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                changes.send_modify(|version| *version += 1);
            }
        });
        Self { handle }
    }
}

impl Drop for LiveUpdater {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

pub struct ChartConfiguration {
    definition: Arc<ChartDefinition>,
    sources: Arc<ExternalDataSources>,
    resolution_specs: Vec<TimeResolutionSpec>,
    clock: Arc<dyn Clock>,
    live_timestamp_offset: i64,
    mode: ViewMode,
    resolution: Option<TimeResolutionSpec>,
    changes: Arc<watch::Sender<u64>>,
    live_updater: Option<LiveUpdater>,
}

impl ChartConfiguration {
    /// Starts live at the smallest resolution. Must be called within a tokio
    /// runtime.
    pub fn new(
        definition: Arc<ChartDefinition>,
        sources: Arc<ExternalDataSources>,
        mut resolution_specs: Vec<TimeResolutionSpec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        resolution_specs.retain(|spec| spec.time_resolution > 0 && spec.windows_count > 0);
        resolution_specs.sort_by_key(|spec| spec.time_resolution);
        resolution_specs.dedup_by_key(|spec| spec.time_resolution);

        let (changes, _) = watch::channel(0);
        let mut configuration = Self {
            definition,
            sources,
            resolution: resolution_specs.first().copied(),
            resolution_specs,
            clock,
            live_timestamp_offset: DEFAULT_LIVE_TIMESTAMP_OFFSET,
            mode: ViewMode::Live,
            changes: Arc::new(changes),
            live_updater: None,
        };
        configuration.restart_live_updater();
        configuration
    }

    pub fn with_live_timestamp_offset(mut self, live_timestamp_offset: i64) -> Self {
        self.live_timestamp_offset = live_timestamp_offset;
        self
    }

    pub fn definition(&self) -> &ChartDefinition {
        &self.definition
    }

    pub fn mode(&self) -> ViewMode {
        self.mode
    }

    pub fn is_live(&self) -> bool {
        self.mode == ViewMode::Live
    }

    pub fn time_resolution_spec(&self) -> Option<TimeResolutionSpec> {
        self.resolution
    }

    pub fn resolution_specs(&self) -> &[TimeResolutionSpec] {
        &self.resolution_specs
    }

    /// Notified on every view change and on every live tick.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    pub fn go_live(&mut self) {
        self.apply_live();
        self.notify();
    }

    /// Anchors the newest window at `timestamp`, or goes live when
    /// `timestamp` is not older than the current live window.
    pub fn set_last_window_timestamp(&mut self, timestamp: i64) {
        self.apply_last_window_timestamp(timestamp);
        self.notify();
    }

    /// Pages back by one full chart width.
    pub fn show_older(&mut self) {
        if let Some(span) = self.page_span() {
            let anchor = self.current_anchor() - span;
            self.set_last_window_timestamp(anchor);
        }
    }

    /// Pages forward by one full chart width, going live once "now" is reached.
    pub fn show_newer(&mut self) {
        if let Some(span) = self.page_span() {
            let anchor = self.current_anchor() + span;
            self.set_last_window_timestamp(anchor);
        }
    }

    /// Switches to one of the configured resolutions. Returns `false` (and
    /// changes nothing) for unknown resolutions or the current one.
    pub fn change_time_resolution(&mut self, time_resolution: i64) -> bool {
        let changed = self.apply_time_resolution(time_resolution);
        if changed {
            self.notify();
        }
        changed
    }

    /// Applies resolution first, then live, then the anchor timestamp.
    pub fn set_view_parameters(&mut self, parameters: ViewParameters) {
        if let Some(time_resolution) = parameters.time_resolution {
            self.apply_time_resolution(time_resolution);
        }
        match parameters.live {
            Some(true) => self.apply_live(),
            Some(false) if self.is_live() => {
                let anchor = self.current_anchor();
                self.apply_anchored(anchor);
            }
            _ => {}
        }
        if let Some(timestamp) = parameters.last_window_timestamp {
            self.apply_last_window_timestamp(timestamp);
        }
        self.notify();
    }

    pub fn view_parameters(&self) -> ViewParameters {
        ViewParameters {
            live: Some(self.is_live()),
            last_window_timestamp: match self.mode {
                ViewMode::Live => None,
                ViewMode::Anchored {
                    last_window_timestamp,
                } => Some(last_window_timestamp),
            },
            time_resolution: self.resolution.map(|spec| spec.time_resolution),
        }
    }

    /// Stops live updates. The configuration can still compute states.
    pub fn destroy(&mut self) {
        self.live_updater = None;
    }

    pub async fn get_state(&self) -> ChartState {
        let Some(spec) = self.resolution else {
            return self.build_state(0, 0, Vec::new());
        };

        let now_timestamp = self.now_timestamp();
        let context = SeriesContext::new(
            spec.time_resolution,
            spec.windows_count,
            Some(self.current_anchor()),
            now_timestamp,
            Arc::clone(&self.sources),
        );

        let templates = self.definition.resolve_series(&self.sources).await;
        let mut points: Vec<Vec<Point>> = join_all(
            templates
                .iter()
                .map(|template| self.evaluate_series(&context, template)),
        )
        .await;

        for series_points in points.iter_mut() {
            series_points.sort_by_key(|p| p.timestamp);
        }
        reconcile_points_timing(&mut points, spec.time_resolution);

        let series = templates
            .into_iter()
            .zip(points)
            .map(|(template, points)| SeriesState {
                id: template.id,
                name: template.name,
                color: template.color,
                points,
            })
            .collect();
        self.build_state(spec.time_resolution, spec.windows_count, series)
    }

    /// A series which fails to evaluate is shown as an empty window.
    async fn evaluate_series(&self, context: &SeriesContext, template: &SeriesTemplate) -> Vec<Point> {
        match evaluate_series_function(context, &template.data_provider).await {
            Ok(SeriesResult::Points(points)) => points,
            Ok(SeriesResult::Basic(_)) => {
                tracing::warn!(
                    "Chart {}: series {} did not evaluate to points, rendering empty window",
                    self.definition.id,
                    template.id
                );
                empty_window(context)
            }
            Err(e) => {
                tracing::warn!(
                    "Chart {}: series {} failed to evaluate, rendering empty window: {:#}",
                    self.definition.id,
                    template.id,
                    anyhow::Error::from(e)
                );
                empty_window(context)
            }
        }
    }

    fn build_state(&self, time_resolution: i64, windows_count: usize, series: Vec<SeriesState>) -> ChartState {
        let first_series = series.first().map(|s| &s.points);
        ChartState {
            chart_id: self.definition.id.clone(),
            title: self.definition.title.clone(),
            mode: self.mode,
            time_resolution,
            windows_count,
            x_axis_timestamps: first_series
                .map(|points| points.iter().map(|p| p.timestamp).collect())
                .unwrap_or_default(),
            has_reached_oldest: series
                .iter()
                .all(|s| s.points.first().is_none_or(|p| p.oldest)),
            has_reached_newest: series
                .iter()
                .all(|s| s.points.last().is_none_or(|p| p.newest)),
            first_point_timestamp: first_series.and_then(|points| points.first()).map(|p| p.timestamp),
            last_point_timestamp: first_series.and_then(|points| points.last()).map(|p| p.timestamp),
            series,
        }
    }

    /// "Now" as seen by the chart; lags behind in live mode.
    fn now_timestamp(&self) -> i64 {
        match self.mode {
            ViewMode::Live => self.live_now_timestamp(),
            ViewMode::Anchored { .. } => self.clock.now_timestamp(),
        }
    }

    fn live_now_timestamp(&self) -> i64 {
        self.clock.now_timestamp() - self.live_timestamp_offset
    }

    /// Start of the newest window which is shown.
    fn current_anchor(&self) -> i64 {
        match self.mode {
            ViewMode::Live => self.live_window_timestamp(),
            ViewMode::Anchored {
                last_window_timestamp,
            } => last_window_timestamp,
        }
    }

    fn live_window_timestamp(&self) -> i64 {
        let now = self.live_now_timestamp();
        match self.resolution {
            Some(spec) => now - now.rem_euclid(spec.time_resolution),
            None => now,
        }
    }

    fn page_span(&self) -> Option<i64> {
        self.resolution
            .map(|spec| spec.time_resolution * spec.windows_count as i64)
    }

    fn apply_live(&mut self) {
        self.mode = ViewMode::Live;
        if self.live_updater.is_none() {
            self.restart_live_updater();
        }
    }

    fn apply_anchored(&mut self, last_window_timestamp: i64) {
        self.mode = ViewMode::Anchored {
            last_window_timestamp,
        };
        self.live_updater = None;
    }

    fn apply_last_window_timestamp(&mut self, timestamp: i64) {
        if timestamp >= self.live_window_timestamp() {
            self.apply_live();
        } else {
            self.apply_anchored(timestamp);
        }
    }

    fn apply_time_resolution(&mut self, time_resolution: i64) -> bool {
        if self.resolution.map(|spec| spec.time_resolution) == Some(time_resolution) {
            return false;
        }
        let Some(spec) = self
            .resolution_specs
            .iter()
            .find(|spec| spec.time_resolution == time_resolution)
            .copied()
        else {
            tracing::debug!(
                "Chart {}: ignoring unknown time resolution {}",
                self.definition.id,
                time_resolution
            );
            return false;
        };
        self.resolution = Some(spec);
        if self.is_live() {
            self.restart_live_updater();
        }
        true
    }

    fn restart_live_updater(&mut self) {
        self.live_updater = self.resolution.map(|spec| {
            LiveUpdater::start(
                Duration::from_secs(spec.update_interval.max(1)),
                Arc::clone(&self.changes),
            )
        });
    }

    fn notify(&self) {
        self.changes.send_modify(|version| *version += 1);
    }
}

fn empty_window(context: &SeriesContext) -> Vec<Point> {
    generate_fake_points(context, context.anchor_timestamp(), context.is_newest_window())
}
