// Domain layer - Points, series results and the series function language
pub mod point;
pub mod series_function;
pub mod series_result;
