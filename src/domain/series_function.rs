// Series function expression tree
//
// Exchanged as JSON: `{ "functionName": "...", "functionArguments": { ... } }`,
// nested through operands. A node whose `functionArguments` are missing or
// `null` is kept in the tree and reported as malformed during evaluation, and
// so is a node with an unknown name or arguments of the wrong shape.
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawSeriesFunction", into = "RawSeriesFunction")]
pub enum SeriesFunction {
    LoadSeries(Option<LoadSeriesArgs>),
    EmptySeries,
    Abs(Option<AbsArgs>),
    Multiply(Option<MultiplyArgs>),
    ReplaceEmpty(Option<ReplaceEmptyArgs>),
    Rate(Option<RateArgs>),
    Invalid(InvalidFunction),
}

/// A node which could not be parsed. The raw JSON is kept as is.
#[derive(Debug, Clone, PartialEq)]
pub struct InvalidFunction {
    pub function_name: String,
    pub function_arguments: Value,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadSeriesArgs {
    pub source_type: SourceType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_parameters: Option<ExternalSourceRef>,
    /// Applied to the fitted windows of the loaded series.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replace_empty_options: Option<ReplaceEmptyOptions>,
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceEmptyOptions {
    #[serde(default)]
    pub strategy: ReplaceEmptyStrategy,
    #[serde(default)]
    pub fallback_value: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    External,
    Empty,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalSourceRef {
    pub external_source_name: String,
    #[serde(default)]
    pub external_source_parameters: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbsArgs {
    #[serde(alias = "inputDataProvider")]
    pub data: Operand,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultiplyArgs {
    pub operands: Vec<Operand>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplaceEmptyArgs {
    pub data: Operand,
    pub fallback_value: Operand,
    #[serde(default)]
    pub strategy: ReplaceEmptyStrategy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ReplaceEmptyStrategy {
    #[default]
    UseFallback,
    UsePrevious,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateArgs {
    pub input_data_provider: Operand,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_span_provider: Option<Operand>,
}

/// A function argument: either a nested function or a literal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    Function(Box<SeriesFunction>),
    Scalar(Option<f64>),
    Array(Vec<Option<f64>>),
}

impl From<SeriesFunction> for Operand {
    fn from(function: SeriesFunction) -> Self {
        Operand::Function(Box::new(function))
    }
}

impl From<f64> for Operand {
    fn from(value: f64) -> Self {
        Operand::Scalar(Some(value))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSeriesFunction {
    function_name: String,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    function_arguments: Value,
}

fn parse_args<T: serde::de::DeserializeOwned>(
    args: &Value,
) -> Result<Option<T>, serde_json::Error> {
    if args.is_null() {
        return Ok(None);
    }
    T::deserialize(args).map(Some)
}

impl From<RawSeriesFunction> for SeriesFunction {
    fn from(raw: RawSeriesFunction) -> Self {
        let args = &raw.function_arguments;
        let parsed = match raw.function_name.as_str() {
            "loadSeries" => parse_args(args).map(SeriesFunction::LoadSeries),
            "emptySeries" => Ok(SeriesFunction::EmptySeries),
            "abs" => parse_args(args).map(SeriesFunction::Abs),
            "multiply" => parse_args(args).map(SeriesFunction::Multiply),
            "replaceEmpty" => parse_args(args).map(SeriesFunction::ReplaceEmpty),
            "rate" => parse_args(args).map(SeriesFunction::Rate),
            _ => {
                return SeriesFunction::invalid(raw, "unknown series function".to_string());
            }
        };
        match parsed {
            Ok(function) => function,
            Err(e) => SeriesFunction::invalid(raw, format!("invalid arguments: {}", e)),
        }
    }
}

impl From<SeriesFunction> for RawSeriesFunction {
    fn from(function: SeriesFunction) -> Self {
        let function_name = function.name().to_string();
        let function_arguments = match function {
            SeriesFunction::LoadSeries(args) => serde_json::to_value(args),
            SeriesFunction::EmptySeries => Ok(Value::Null),
            SeriesFunction::Abs(args) => serde_json::to_value(args),
            SeriesFunction::Multiply(args) => serde_json::to_value(args),
            SeriesFunction::ReplaceEmpty(args) => serde_json::to_value(args),
            SeriesFunction::Rate(args) => serde_json::to_value(args),
            SeriesFunction::Invalid(invalid) => Ok(invalid.function_arguments),
        }
        .unwrap_or(Value::Null);
        Self {
            function_name,
            function_arguments,
        }
    }
}

/// Walks a series function tree. Every hook defaults to a no-op.
pub trait SeriesFunctionVisitor<'a> {
    fn visit_function(&mut self, _function: &'a SeriesFunction) {}
    fn visit_external_source(&mut self, _source: &'a ExternalSourceRef) {}
}

impl SeriesFunction {
    pub fn name(&self) -> &str {
        match self {
            SeriesFunction::LoadSeries(_) => "loadSeries",
            SeriesFunction::EmptySeries => "emptySeries",
            SeriesFunction::Abs(_) => "abs",
            SeriesFunction::Multiply(_) => "multiply",
            SeriesFunction::ReplaceEmpty(_) => "replaceEmpty",
            SeriesFunction::Rate(_) => "rate",
            SeriesFunction::Invalid(invalid) => &invalid.function_name,
        }
    }

    fn invalid(raw: RawSeriesFunction, reason: String) -> Self {
        tracing::warn!(
            "Keeping unparsable series function {}: {}",
            raw.function_name,
            reason
        );
        SeriesFunction::Invalid(InvalidFunction {
            function_name: raw.function_name,
            function_arguments: raw.function_arguments,
            reason,
        })
    }

    pub fn external(external_source_name: &str, external_source_parameters: Value) -> Self {
        SeriesFunction::LoadSeries(Some(LoadSeriesArgs {
            source_type: SourceType::External,
            source_parameters: Some(ExternalSourceRef {
                external_source_name: external_source_name.to_string(),
                external_source_parameters,
            }),
            replace_empty_options: None,
        }))
    }

    pub fn accept<'a, V: SeriesFunctionVisitor<'a>>(&'a self, visitor: &mut V) {
        visitor.visit_function(self);
        match self {
            SeriesFunction::LoadSeries(Some(args)) => {
                if let (SourceType::External, Some(source)) =
                    (args.source_type, &args.source_parameters)
                {
                    visitor.visit_external_source(source);
                }
            }
            SeriesFunction::Abs(Some(args)) => args.data.accept(visitor),
            SeriesFunction::Multiply(Some(args)) => {
                for operand in &args.operands {
                    operand.accept(visitor);
                }
            }
            SeriesFunction::ReplaceEmpty(Some(args)) => {
                args.data.accept(visitor);
                args.fallback_value.accept(visitor);
            }
            SeriesFunction::Rate(Some(args)) => {
                args.input_data_provider.accept(visitor);
                if let Some(time_span) = &args.time_span_provider {
                    time_span.accept(visitor);
                }
            }
            _ => {}
        }
    }

    /// All external sources referenced anywhere in this tree, in visiting order.
    pub fn external_source_refs(&self) -> Vec<&ExternalSourceRef> {
        struct Collector<'a>(Vec<&'a ExternalSourceRef>);

        impl<'a> SeriesFunctionVisitor<'a> for Collector<'a> {
            fn visit_external_source(&mut self, source: &'a ExternalSourceRef) {
                self.0.push(source);
            }
        }

        let mut collector = Collector(Vec::new());
        self.accept(&mut collector);
        collector.0
    }

    /// Same walk as `accept`, handing out every external source mutably.
    pub fn for_each_external_source_mut(&mut self, f: &mut dyn FnMut(&mut ExternalSourceRef)) {
        match self {
            SeriesFunction::LoadSeries(Some(args)) => {
                if let (SourceType::External, Some(source)) =
                    (args.source_type, args.source_parameters.as_mut())
                {
                    f(source);
                }
            }
            SeriesFunction::Abs(Some(args)) => args.data.for_each_external_source_mut(f),
            SeriesFunction::Multiply(Some(args)) => {
                for operand in args.operands.iter_mut() {
                    operand.for_each_external_source_mut(f);
                }
            }
            SeriesFunction::ReplaceEmpty(Some(args)) => {
                args.data.for_each_external_source_mut(f);
                args.fallback_value.for_each_external_source_mut(f);
            }
            SeriesFunction::Rate(Some(args)) => {
                args.input_data_provider.for_each_external_source_mut(f);
                if let Some(time_span) = args.time_span_provider.as_mut() {
                    time_span.for_each_external_source_mut(f);
                }
            }
            _ => {}
        }
    }
}

impl Operand {
    pub fn accept<'a, V: SeriesFunctionVisitor<'a>>(&'a self, visitor: &mut V) {
        if let Operand::Function(function) = self {
            function.accept(visitor);
        }
    }

    fn for_each_external_source_mut(&mut self, f: &mut dyn FnMut(&mut ExternalSourceRef)) {
        if let Operand::Function(function) = self {
            function.for_each_external_source_mut(f);
        }
    }
}
