// Time-series chart engine: series functions, window fitting, query batching
// and chart view state, plus the adapters serving charts over HTTP.
pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod presentation;
