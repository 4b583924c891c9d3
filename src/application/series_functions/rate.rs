// rate - value per time span: value / time_resolution * time_span
use super::{evaluate_operand, ChartEvalError, EvalResult};
use crate::application::series_context::SeriesContext;
use crate::domain::series_function::RateArgs;
use crate::domain::series_result::{BasicValue, SeriesResult};

const DEFAULT_TIME_SPAN: f64 = 1.0;

pub async fn rate(context: &SeriesContext, args: Option<&RateArgs>) -> EvalResult<SeriesResult> {
    let args = args.ok_or(ChartEvalError::MalformedArguments { function: "rate" })?;
    if context.time_resolution <= 0 {
        return Err(ChartEvalError::InvalidContext {
            time_resolution: context.time_resolution,
            windows_count: context.windows_count,
        });
    }

    let input = evaluate_operand(context, &args.input_data_provider).await?;
    let time_span = match &args.time_span_provider {
        Some(provider) => normalize_time_span(&evaluate_operand(context, provider).await?),
        None => DEFAULT_TIME_SPAN,
    };
    let time_resolution = context.time_resolution as f64;

    Ok(input.map_values(|value| {
        value
            .filter(|v| v.is_finite())
            .map(|v| v / time_resolution * time_span)
    }))
}

/// A positive finite number taken from a scalar or the newest point,
/// otherwise the default span of one second.
fn normalize_time_span(time_span: &SeriesResult) -> f64 {
    let candidate = match time_span {
        SeriesResult::Basic(BasicValue::Scalar(value)) => *value,
        SeriesResult::Points(points) => points.last().and_then(|p| p.value),
        SeriesResult::Basic(BasicValue::Array(_)) => None,
    };
    candidate
        .filter(|span| span.is_finite() && *span > 0.0)
        .unwrap_or(DEFAULT_TIME_SPAN)
}
