// multiply - element-wise product of numbers, arrays and points series
use super::{evaluate_operand, ChartEvalError, EvalResult};
use crate::application::points_timing::reconcile_points_timing;
use crate::application::series_context::SeriesContext;
use crate::domain::series_function::MultiplyArgs;
use crate::domain::series_result::{merge_values_into_points, BasicValue, SeriesResult};
use futures::future::try_join_all;

/// Operands are evaluated concurrently. Points operands are first aligned to a
/// common time grid; after that every array-like operand must have the same
/// length. Scalars are broadcast. Any `null` (or non-finite) factor makes the
/// product `null`. The result is points when at least one operand was points.
pub async fn multiply(
    context: &SeriesContext,
    args: Option<&MultiplyArgs>,
) -> EvalResult<SeriesResult> {
    let args = args.ok_or(ChartEvalError::MalformedArguments {
        function: "multiply",
    })?;
    if args.operands.is_empty() {
        return Ok(SeriesResult::scalar(None));
    }

    let mut operands = try_join_all(
        args.operands
            .iter()
            .map(|operand| evaluate_operand(context, operand)),
    )
    .await?;

    align_points_operands(&mut operands, context.time_resolution)?;

    let mut length: Option<usize> = None;
    for operand in &operands {
        match (length, operand.len()) {
            (None, Some(len)) => length = Some(len),
            (Some(expected), Some(found)) if expected != found => {
                return Err(ChartEvalError::OperandLengthMismatch {
                    function: "multiply",
                    expected,
                    found,
                });
            }
            _ => {}
        }
    }

    let result_len = length.unwrap_or(1);
    let mut product = vec![Some(1.0); result_len];
    for operand in &operands {
        let values = broadcast(operand, result_len);
        for (acc, value) in product.iter_mut().zip(values) {
            *acc = match (*acc, value.filter(|v| v.is_finite())) {
                (Some(a), Some(b)) => Some(a * b),
                _ => None,
            };
        }
    }

    let template = operands.iter().find_map(|operand| match operand {
        SeriesResult::Points(points) => Some(points),
        _ => None,
    });
    Ok(match (template, length) {
        (Some(points), _) => SeriesResult::Points(merge_values_into_points(points, &product)),
        (None, Some(_)) => SeriesResult::array(product),
        (None, None) => SeriesResult::scalar(product[0]),
    })
}

/// Re-sorts every points operand by timestamp and shifts all of them to the
/// newest shared window. Operands whose windows are not on one grid cannot be
/// shifted onto each other and are rejected.
fn align_points_operands(operands: &mut [SeriesResult], time_resolution: i64) -> EvalResult<()> {
    let mut series: Vec<_> = operands
        .iter_mut()
        .filter_map(|operand| match operand {
            SeriesResult::Points(points) => Some(std::mem::take(points)),
            _ => None,
        })
        .collect();
    for points in series.iter_mut() {
        points.sort_by_key(|p| p.timestamp);
    }

    let last_timestamps: Vec<i64> = series
        .iter()
        .filter_map(|points| points.last().map(|p| p.timestamp))
        .collect();
    if let Some(&newest) = last_timestamps.iter().max() {
        if let Some(&found) = last_timestamps
            .iter()
            .find(|&&last| time_resolution <= 0 || (newest - last) % time_resolution != 0)
        {
            return Err(ChartEvalError::MisalignedOperands {
                function: "multiply",
                expected: newest,
                found,
            });
        }
    }
    reconcile_points_timing(&mut series, time_resolution);

    let mut aligned = series.into_iter();
    for operand in operands.iter_mut() {
        if let SeriesResult::Points(points) = operand {
            if let Some(next) = aligned.next() {
                *points = next;
            }
        }
    }
    Ok(())
}

fn broadcast(operand: &SeriesResult, len: usize) -> Vec<Option<f64>> {
    match operand {
        SeriesResult::Basic(BasicValue::Scalar(value)) => vec![*value; len],
        other => other.values(),
    }
}
