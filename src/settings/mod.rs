//! Settings module
//!
//! This module contains the run configuration and its loading/validation.

pub mod settings_struct;

pub use settings_struct::{Settings, SortKey};
