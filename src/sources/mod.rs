//! Source list handling: health tracking and downloading.

pub mod fetcher;
pub mod registry;

pub use fetcher::{FetchOptions, FetchOutcome, FetchReport, Fetcher};
pub use registry::{load_sources, parse_source_list, SourceRegistry};
