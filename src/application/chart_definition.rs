// Chart definitions - which series a chart shows and how they are computed
//
// Definitions are JSON documents. A static builder contributes one series; a
// dynamic builder asks an external source for series configs and instantiates
// its template once per config.
use crate::application::external_source::ExternalDataSources;
use crate::domain::series_function::{ExternalSourceRef, SeriesFunction};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartDefinition {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub series: Vec<SeriesBuilder>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "builderType",
    rename_all = "camelCase",
    rename_all_fields = "camelCase"
)]
pub enum SeriesBuilder {
    Static {
        series: SeriesTemplate,
    },
    Dynamic {
        configs_source: ExternalSourceRef,
        template: SeriesTemplate,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesTemplate {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    pub data_provider: SeriesFunction,
}

impl ChartDefinition {
    /// Names of every source the definition refers to, for data providers and
    /// dynamic config sources alike.
    pub fn external_source_names(&self) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        for builder in &self.series {
            let template = match builder {
                SeriesBuilder::Static { series } => series,
                SeriesBuilder::Dynamic {
                    configs_source,
                    template,
                } => {
                    names.insert(configs_source.external_source_name.clone());
                    template
                }
            };
            for source in template.data_provider.external_source_refs() {
                names.insert(source.external_source_name.clone());
            }
        }
        names
    }

    /// Expands all builders into concrete series, in builder order. A dynamic
    /// builder whose source is unknown or fails contributes no series.
    pub async fn resolve_series(&self, sources: &ExternalDataSources) -> Vec<SeriesTemplate> {
        let per_builder = join_all(self.series.iter().map(|builder| async move {
            match builder {
                SeriesBuilder::Static { series } => vec![series.clone()],
                SeriesBuilder::Dynamic {
                    configs_source,
                    template,
                } => {
                    let Some(source) = sources.get(&configs_source.external_source_name) else {
                        tracing::warn!(
                            "Chart {}: unknown source {} for dynamic series {}",
                            self.id,
                            configs_source.external_source_name,
                            template.id
                        );
                        return Vec::new();
                    };
                    match source
                        .fetch_dynamic_series_configs(&configs_source.external_source_parameters)
                        .await
                    {
                        Ok(configs) => configs
                            .iter()
                            .filter_map(|config| template.instantiate(config))
                            .collect(),
                        Err(e) => {
                            tracing::warn!(
                                "Chart {}: failed to fetch dynamic series configs from {}: {:#}",
                                self.id,
                                configs_source.external_source_name,
                                e
                            );
                            Vec::new()
                        }
                    }
                }
            }
        }))
        .await;
        per_builder.into_iter().flatten().collect()
    }
}

impl SeriesTemplate {
    /// Builds one series out of a dynamic series config. The config must carry
    /// an `id`; `name` and `color` override the template's, and the
    /// `sourceParameters` object is merged into the parameters of every
    /// external source of the data provider.
    pub fn instantiate(&self, config: &Value) -> Option<SeriesTemplate> {
        let config_id = match config.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                tracing::warn!("Dynamic series config for {} has no id: {}", self.id, config);
                return None;
            }
        };

        let mut data_provider = self.data_provider.clone();
        if let Some(Value::Object(overrides)) = config.get("sourceParameters") {
            data_provider.for_each_external_source_mut(&mut |source| {
                merge_parameters(&mut source.external_source_parameters, overrides);
            });
        }

        Some(SeriesTemplate {
            id: format!("{}:{}", self.id, config_id),
            name: config
                .get("name")
                .and_then(Value::as_str)
                .map_or_else(|| self.name.clone(), str::to_string),
            color: config
                .get("color")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| self.color.clone()),
            data_provider,
        })
    }
}

fn merge_parameters(parameters: &mut Value, overrides: &Map<String, Value>) {
    if !parameters.is_object() {
        *parameters = Value::Object(Map::new());
    }
    if let Value::Object(parameters) = parameters {
        for (key, value) in overrides {
            parameters.insert(key.clone(), value.clone());
        }
    }
}
