//! Core data models for the application
//!
//! This module contains the data structures passed between pipeline stages,
//! separated from the logic that operates on them.
//!
//! ```rust
//! use subharvest::models::{ProxyConfig, ProxyType};
//!
//! let mut proxy = ProxyConfig::new(ProxyType::Trojan, "example.com", 443);
//! proxy.set_param("password", "secret");
//! assert_eq!(proxy.identity().len(), 32);
//! ```

mod bundle;
mod proxy;
mod result;
mod source;

pub use bundle::*;
pub use proxy::*;
pub use result::*;
pub use source::*;
