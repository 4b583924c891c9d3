// abs - absolute value of a number, array or points series
use super::{evaluate_operand, ChartEvalError, EvalResult};
use crate::application::series_context::SeriesContext;
use crate::domain::series_function::AbsArgs;
use crate::domain::series_result::SeriesResult;

pub async fn abs(context: &SeriesContext, args: Option<&AbsArgs>) -> EvalResult<SeriesResult> {
    let args = args.ok_or(ChartEvalError::MalformedArguments { function: "abs" })?;
    let data = evaluate_operand(context, &args.data).await?;
    Ok(data.map_values(|value| value.map(f64::abs)))
}
