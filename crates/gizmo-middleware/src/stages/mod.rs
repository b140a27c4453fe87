//! Standard middleware stages.
//!
//! | Stage | Purpose |
//! |-------|---------|
//! | [`Cors`] | `Access-Control-Allow-*` for origins matching a suffix, `OPTIONS` short-circuit |
//! | [`NoCache`] | Forbid caching |
//! | [`Jsonp`] | Wrap bodies for `?callback=` callers |
//! | [`AccessLog`] | Combined-format access log |

pub mod access_log;
pub mod cors;
pub mod jsonp;
pub mod no_cache;

pub use access_log::{AccessLog, AccessRecord};
pub use cors::Cors;
pub use jsonp::Jsonp;
pub use no_cache::NoCache;
