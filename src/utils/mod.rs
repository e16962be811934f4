pub mod base64;
pub mod file;
pub mod retry;
pub mod url;

pub use file::{atomic_write, file_exists, open_append};
pub use retry::{retry_with_backoff, RetryPolicy};
