// Result of evaluating a series function
use super::point::Point;

#[derive(Debug, Clone, PartialEq)]
pub enum BasicValue {
    Scalar(Option<f64>),
    Array(Vec<Option<f64>>),
}

/// Either plain numbers or full points carrying timing metadata.
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesResult {
    Basic(BasicValue),
    Points(Vec<Point>),
}

impl SeriesResult {
    pub fn scalar(value: Option<f64>) -> Self {
        SeriesResult::Basic(BasicValue::Scalar(value))
    }

    pub fn array(values: Vec<Option<f64>>) -> Self {
        SeriesResult::Basic(BasicValue::Array(values))
    }

    pub fn is_points(&self) -> bool {
        matches!(self, SeriesResult::Points(_))
    }

    /// Values in order. A scalar becomes a single element.
    pub fn values(&self) -> Vec<Option<f64>> {
        match self {
            SeriesResult::Basic(BasicValue::Scalar(value)) => vec![*value],
            SeriesResult::Basic(BasicValue::Array(values)) => values.clone(),
            SeriesResult::Points(points) => points.iter().map(|p| p.value).collect(),
        }
    }

    /// `None` for scalars, element count otherwise.
    pub fn len(&self) -> Option<usize> {
        match self {
            SeriesResult::Basic(BasicValue::Scalar(_)) => None,
            SeriesResult::Basic(BasicValue::Array(values)) => Some(values.len()),
            SeriesResult::Points(points) => Some(points.len()),
        }
    }

    /// Applies `f` to every value, keeping the shape (and point metadata).
    pub fn map_values<F>(&self, f: F) -> SeriesResult
    where
        F: Fn(Option<f64>) -> Option<f64>,
    {
        match self {
            SeriesResult::Basic(BasicValue::Scalar(value)) => SeriesResult::scalar(f(*value)),
            SeriesResult::Basic(BasicValue::Array(values)) => {
                SeriesResult::array(values.iter().map(|v| f(*v)).collect())
            }
            SeriesResult::Points(points) => {
                let mut points = points.clone();
                for point in &mut points {
                    point.value = f(point.value);
                }
                SeriesResult::Points(points)
            }
        }
    }

    pub fn into_points(self) -> Vec<Point> {
        match self {
            SeriesResult::Points(points) => points,
            SeriesResult::Basic(_) => Vec::new(),
        }
    }
}

/// Copies `values` into clones of `template` point by point.
pub fn merge_values_into_points(template: &[Point], values: &[Option<f64>]) -> Vec<Point> {
    template
        .iter()
        .zip(values)
        .map(|(point, value)| Point {
            value: *value,
            ..*point
        })
        .collect()
}
