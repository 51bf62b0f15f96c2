pub mod backoff;
pub mod cells;
pub mod config;
pub mod domain;
pub mod error;
pub mod forecast;
pub mod metrics;
pub mod output;
pub mod partition;
pub mod pipeline;
pub mod store;
