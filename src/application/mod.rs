pub mod chart_configuration;
pub mod chart_definition;
pub mod chart_service;
pub mod clock;
pub mod external_source;
pub mod points_timing;
pub mod query_batcher;
pub mod series_context;
pub mod series_functions;
pub mod window_fitting;
