// loadSeries / emptySeries - fetching series from named external sources
use super::{replace_empty_in_points, ChartEvalError, EvalResult};
use crate::application::external_source::SeriesFetchParams;
use crate::application::series_context::SeriesContext;
use crate::application::window_fitting::{fit_points_to_context, generate_fake_points, value_before};
use crate::domain::series_function::{LoadSeriesArgs, SourceType};
use crate::domain::series_result::SeriesResult;

pub async fn load_series(
    context: &SeriesContext,
    args: Option<&LoadSeriesArgs>,
) -> EvalResult<SeriesResult> {
    let args = args.ok_or(ChartEvalError::MalformedArguments {
        function: "loadSeries",
    })?;
    if !context.is_valid() {
        return Err(ChartEvalError::InvalidContext {
            time_resolution: context.time_resolution,
            windows_count: context.windows_count,
        });
    }

    let source_ref = match (args.source_type, &args.source_parameters) {
        (SourceType::Empty, _) => return Ok(fake_window(context)),
        (SourceType::External, Some(source_ref)) => source_ref,
        (SourceType::External, None) => {
            return Err(ChartEvalError::MalformedArguments {
                function: "loadSeries",
            });
        }
    };

    let Some(source) = context
        .external_data_sources
        .get(&source_ref.external_source_name)
    else {
        tracing::warn!(
            "Unknown external source {}, rendering empty window",
            source_ref.external_source_name
        );
        return Ok(fake_window(context));
    };

    // One extra window tells whether the beginning of the series was reached.
    let params = SeriesFetchParams {
        last_window_timestamp: context.last_window_timestamp,
        time_resolution: context.time_resolution,
        windows_count: context.windows_count + 1,
    };
    let raw_points = source
        .fetch_series(params, &source_ref.external_source_parameters)
        .await
        .map_err(|error| ChartEvalError::SourceFetch {
            source_name: source_ref.external_source_name.clone(),
            error,
        })?;

    tracing::debug!(
        "Fetched {} raw points from {}",
        raw_points.len(),
        source_ref.external_source_name
    );

    let mut points = fit_points_to_context(context, &raw_points);
    let oldest_timestamp = points.first().map(|p| p.timestamp);
    if let (Some(options), Some(oldest_timestamp)) = (args.replace_empty_options, oldest_timestamp) {
        // The extra window fetched above seeds `usePrevious` for the oldest one.
        let previous = value_before(context, &raw_points, oldest_timestamp);
        points = replace_empty_in_points(&points, options, previous);
    }
    Ok(SeriesResult::Points(points))
}

/// A placeholder series without any real data.
pub async fn empty_series(context: &SeriesContext) -> EvalResult<SeriesResult> {
    let args = LoadSeriesArgs {
        source_type: SourceType::Empty,
        source_parameters: None,
        replace_empty_options: None,
    };
    load_series(context, Some(&args)).await
}

fn fake_window(context: &SeriesContext) -> SeriesResult {
    SeriesResult::Points(generate_fake_points(
        context,
        context.anchor_timestamp(),
        context.is_newest_window(),
    ))
}
