// Chart service - Use case for serving chart states and live chart streams
use crate::application::chart_configuration::{
    ChartConfiguration, ChartState, TimeResolutionSpec, ViewParameters,
    DEFAULT_LIVE_TIMESTAMP_OFFSET,
};
use crate::application::chart_definition::ChartDefinition;
use crate::application::clock::Clock;
use crate::application::external_source::ExternalDataSources;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;

const STREAM_BUFFER: usize = 16;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSummary {
    pub id: String,
    pub title: String,
    pub sources: Vec<String>,
    pub time_resolutions: Vec<i64>,
}

#[derive(Clone)]
pub struct ChartService {
    definitions: Arc<BTreeMap<String, Arc<ChartDefinition>>>,
    sources: Arc<ExternalDataSources>,
    resolution_specs: Vec<TimeResolutionSpec>,
    clock: Arc<dyn Clock>,
    live_timestamp_offset: i64,
}

impl ChartService {
    pub fn new(
        definitions: Vec<ChartDefinition>,
        sources: ExternalDataSources,
        resolution_specs: Vec<TimeResolutionSpec>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        for definition in &definitions {
            for name in definition.external_source_names() {
                if !sources.contains_key(&name) {
                    tracing::warn!(
                        "Chart {} refers to unknown source {}, its series will be empty",
                        definition.id,
                        name
                    );
                }
            }
        }

        let definitions = definitions
            .into_iter()
            .map(|definition| (definition.id.clone(), Arc::new(definition)))
            .collect();

        Self {
            definitions: Arc::new(definitions),
            sources: Arc::new(sources),
            resolution_specs,
            clock,
            live_timestamp_offset: DEFAULT_LIVE_TIMESTAMP_OFFSET,
        }
    }

    pub fn with_live_timestamp_offset(mut self, live_timestamp_offset: i64) -> Self {
        self.live_timestamp_offset = live_timestamp_offset;
        self
    }

    pub fn list_charts(&self) -> Vec<ChartSummary> {
        let mut time_resolutions: Vec<i64> = self
            .resolution_specs
            .iter()
            .map(|spec| spec.time_resolution)
            .collect();
        time_resolutions.sort_unstable();
        time_resolutions.dedup();

        self.definitions
            .values()
            .map(|definition| ChartSummary {
                id: definition.id.clone(),
                title: definition.title.clone(),
                sources: definition.external_source_names().into_iter().collect(),
                time_resolutions: time_resolutions.clone(),
            })
            .collect()
    }

    /// A fresh configuration of the chart, `None` for unknown charts.
    pub fn configuration(&self, chart_id: &str) -> Option<ChartConfiguration> {
        let definition = self.definitions.get(chart_id)?;
        Some(
            ChartConfiguration::new(
                Arc::clone(definition),
                Arc::clone(&self.sources),
                self.resolution_specs.clone(),
                Arc::clone(&self.clock),
            )
            .with_live_timestamp_offset(self.live_timestamp_offset),
        )
    }

    pub async fn chart_state(&self, chart_id: &str, parameters: ViewParameters) -> Option<ChartState> {
        let mut configuration = self.configuration(chart_id)?;
        configuration.set_view_parameters(parameters);
        let state = configuration.get_state().await;
        configuration.destroy();
        Some(state)
    }

    /// Streams chart states: one right away and, while the chart is live, one
    /// per live update. Anchored charts produce a single state. The stream
    /// stops when the receiver is dropped.
    pub fn stream_chart(
        &self,
        chart_id: &str,
        parameters: ViewParameters,
    ) -> Option<mpsc::Receiver<ChartState>> {
        let mut configuration = self.configuration(chart_id)?;
        configuration.set_view_parameters(parameters);
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let chart_id = chart_id.to_string();

        tokio::spawn(async move {
            let mut changes = configuration.subscribe();
            let mut sent = 0usize;
            loop {
                changes.borrow_and_update();
                let state = configuration.get_state().await;
                if tx.send(state).await.is_err() {
                    break;
                }
                sent += 1;
                if !configuration.is_live() {
                    break;
                }
                tokio::select! {
                    changed = changes.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                    _ = tx.closed() => break,
                }
            }
            configuration.destroy();
            tracing::debug!("Chart {} stream finished after {} states", chart_id, sent);
        });

        Some(rx)
    }
}
