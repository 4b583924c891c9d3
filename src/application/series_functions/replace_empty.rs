// replaceEmpty - filling null values from a fallback or the previous value
use super::{evaluate_operand, ChartEvalError, EvalResult};
use crate::application::series_context::SeriesContext;
use crate::domain::point::Point;
use crate::domain::series_function::{ReplaceEmptyArgs, ReplaceEmptyOptions, ReplaceEmptyStrategy};
use crate::domain::series_result::{merge_values_into_points, BasicValue, SeriesResult};

pub async fn replace_empty(
    context: &SeriesContext,
    args: Option<&ReplaceEmptyArgs>,
) -> EvalResult<SeriesResult> {
    let args = args.ok_or(ChartEvalError::MalformedArguments {
        function: "replaceEmpty",
    })?;
    let (data, fallback) = futures::try_join!(
        evaluate_operand(context, &args.data),
        evaluate_operand(context, &args.fallback_value),
    )?;

    let fallback = match (&data, fallback) {
        (SeriesResult::Points(points), SeriesResult::Points(fallback_points)) => {
            BasicValue::Array(values_at_timestamps(points, &fallback_points))
        }
        (_, SeriesResult::Points(fallback_points)) => {
            BasicValue::Array(fallback_points.iter().map(|p| p.value).collect())
        }
        (_, SeriesResult::Basic(basic)) => basic,
    };

    match data {
        SeriesResult::Basic(BasicValue::Scalar(value)) => match fallback {
            BasicValue::Scalar(fallback_value) => Ok(SeriesResult::scalar(value.or(fallback_value))),
            BasicValue::Array(_) => Err(ChartEvalError::MalformedArguments {
                function: "replaceEmpty",
            }),
        },
        SeriesResult::Basic(BasicValue::Array(values)) => {
            let fallback_values = broadcast_fallback(fallback, values.len())?;
            Ok(SeriesResult::array(replace_empty_values(
                &values,
                args.strategy,
                &fallback_values,
            )))
        }
        SeriesResult::Points(points) => {
            let values: Vec<Option<f64>> = points.iter().map(|p| p.value).collect();
            let fallback_values = broadcast_fallback(fallback, values.len())?;
            let replaced = replace_empty_values(&values, args.strategy, &fallback_values);
            Ok(SeriesResult::Points(merge_values_into_points(&points, &replaced)))
        }
    }
}

/// Replaces every `None` in `values`. `UsePrevious` takes the closest
/// preceding non-empty result and falls back to `fallback` when there is none.
/// `fallback` must be as long as `values`.
pub fn replace_empty_values(
    values: &[Option<f64>],
    strategy: ReplaceEmptyStrategy,
    fallback: &[Option<f64>],
) -> Vec<Option<f64>> {
    let mut result: Vec<Option<f64>> = Vec::with_capacity(values.len());
    for (idx, value) in values.iter().enumerate() {
        let previous = result.last().copied().flatten();
        let replaced = match (value, strategy, previous) {
            (Some(v), _, _) => Some(*v),
            (None, ReplaceEmptyStrategy::UsePrevious, Some(prev)) => Some(prev),
            (None, _, _) => fallback.get(idx).copied().flatten(),
        };
        result.push(replaced);
    }
    result
}

/// Applies `options` to points sorted ascending. `previous` is the value of
/// the window right before the first point.
pub fn replace_empty_in_points(
    points: &[Point],
    options: ReplaceEmptyOptions,
    previous: Option<f64>,
) -> Vec<Point> {
    let values: Vec<Option<f64>> = std::iter::once(previous)
        .chain(points.iter().map(|p| p.value))
        .collect();
    let fallback = vec![options.fallback_value; values.len()];
    let replaced = replace_empty_values(&values, options.strategy, &fallback);
    merge_values_into_points(points, &replaced[1..])
}

fn broadcast_fallback(fallback: BasicValue, len: usize) -> EvalResult<Vec<Option<f64>>> {
    match fallback {
        BasicValue::Scalar(value) => Ok(vec![value; len]),
        BasicValue::Array(values) if values.len() == len => Ok(values),
        BasicValue::Array(values) => Err(ChartEvalError::OperandLengthMismatch {
            function: "replaceEmpty",
            expected: len,
            found: values.len(),
        }),
    }
}

/// For every point of `points`, the value of the `fallback` point with the
/// same timestamp (or `None`). Both must be sorted ascending.
fn values_at_timestamps(points: &[Point], fallback: &[Point]) -> Vec<Option<f64>> {
    let mut fallback_iter = fallback.iter().peekable();
    points
        .iter()
        .map(|point| {
            while fallback_iter
                .next_if(|candidate| candidate.timestamp < point.timestamp)
                .is_some()
            {}
            fallback_iter
                .peek()
                .filter(|candidate| candidate.timestamp == point.timestamp)
                .and_then(|candidate| candidate.value)
        })
        .collect()
}
