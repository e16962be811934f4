//! Extraction of endpoint entries from fetched text.
//!
//! [`parse`] never fails: every recognized entry becomes a [`ProxyConfig`]
//! or a [`ParseError`], everything else is counted as ignored text.

pub mod explodes;
pub mod subparser;

pub use subparser::{parse, parse_all, parse_entries, ParseReport};
