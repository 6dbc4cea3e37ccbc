pub mod cli;
pub mod config;
pub mod download;
pub mod error;
pub mod features;
pub mod month;
pub mod parser;
pub mod pipeline;
pub mod schema;
pub mod writer;

pub use cli::{Cli, Commands};
pub use config::PipelineConfig;
pub use month::SnapshotMonth;
pub use pipeline::{convert_files, MonthOutcome, Pipeline, RunReport};
