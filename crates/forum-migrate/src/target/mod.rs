//! Target-side object creation.
//!
//! - [`HttpTarget`]: POSTs requests to the target's import API
//! - [`DryRunTarget`]: hands out ids without creating anything

mod dry_run;
mod http;

pub use dry_run::DryRunTarget;
pub use http::HttpTarget;
