pub mod classify;
pub mod config;
pub mod import;
pub mod metrics_server;
pub mod observability;
pub mod parse;
pub mod pipeline;
pub mod report;
pub mod retry;
pub mod sinks;
pub mod sources;
pub mod stats;
pub mod transform;

pub use pipeline::{Envelope, Pipeline};
