pub mod dedup;
pub mod error;
pub mod generator;
pub mod history;
pub mod models;
pub mod parser;
pub mod pipeline;
pub mod ranker;
pub mod settings;
pub mod sources;
pub mod tester;
pub mod utils;

// Re-export the main proxy types for easier access
pub use models::{OutputBundle, ProxyConfig, ProxyType, RankedEntry, TestResult};

// Re-export the run entry points
pub use generator::OutputFormat;
pub use pipeline::{resume, Pipeline, RunSummary};
pub use settings::{Settings, SortKey};
