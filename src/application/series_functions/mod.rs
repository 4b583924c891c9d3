// Series function evaluator
//
// Walks a `SeriesFunction` tree against one `SeriesContext`. Every function
// returns either plain numbers or points; points-ness propagates through
// composition.
mod abs;
mod load_series;
mod multiply;
mod rate;
mod replace_empty;
#[cfg(test)]
pub(crate) mod test_support;

use crate::application::series_context::SeriesContext;
use crate::domain::series_function::{Operand, SeriesFunction};
use crate::domain::series_result::SeriesResult;
use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;

pub use load_series::empty_series;
pub use replace_empty::{replace_empty_in_points, replace_empty_values};

#[derive(Debug, Error)]
pub enum ChartEvalError {
    #[error("{function}: missing or malformed arguments")]
    MalformedArguments { function: &'static str },

    #[error("{function_name}: {reason}")]
    InvalidFunction { function_name: String, reason: String },

    #[error("{function}: operand lengths do not match (expected {expected}, found {found})")]
    OperandLengthMismatch {
        function: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("{function}: operands are not on one time grid (newest window {expected}, found {found})")]
    MisalignedOperands {
        function: &'static str,
        expected: i64,
        found: i64,
    },

    #[error("invalid evaluation context: time resolution {time_resolution}, windows count {windows_count}")]
    InvalidContext {
        time_resolution: i64,
        windows_count: usize,
    },

    #[error("failed to fetch series from source {source_name}")]
    SourceFetch {
        source_name: String,
        #[source]
        error: anyhow::Error,
    },
}

pub type EvalResult<T> = Result<T, ChartEvalError>;

/// Evaluates one node of the tree (recursively).
pub fn evaluate_series_function<'a>(
    context: &'a SeriesContext,
    function: &'a SeriesFunction,
) -> BoxFuture<'a, EvalResult<SeriesResult>> {
    async move {
        match function {
            SeriesFunction::LoadSeries(args) => load_series::load_series(context, args.as_ref()).await,
            SeriesFunction::EmptySeries => empty_series(context).await,
            SeriesFunction::Abs(args) => abs::abs(context, args.as_ref()).await,
            SeriesFunction::Multiply(args) => multiply::multiply(context, args.as_ref()).await,
            SeriesFunction::ReplaceEmpty(args) => {
                replace_empty::replace_empty(context, args.as_ref()).await
            }
            SeriesFunction::Rate(args) => rate::rate(context, args.as_ref()).await,
            SeriesFunction::Invalid(invalid) => Err(ChartEvalError::InvalidFunction {
                function_name: invalid.function_name.clone(),
                reason: invalid.reason.clone(),
            }),
        }
    }
    .boxed()
}

/// Literals evaluate to themselves, nested functions are evaluated.
pub async fn evaluate_operand(
    context: &SeriesContext,
    operand: &Operand,
) -> EvalResult<SeriesResult> {
    match operand {
        Operand::Function(function) => evaluate_series_function(context, function).await,
        Operand::Scalar(value) => Ok(SeriesResult::scalar(*value)),
        Operand::Array(values) => Ok(SeriesResult::array(values.clone())),
    }
}
