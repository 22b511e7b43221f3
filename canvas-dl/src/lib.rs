//! Mirror the files of Canvas LMS courses locally and archive their metadata.

use tracing_subscriber::EnvFilter;

pub mod canvas;
pub mod cookies;
pub mod db;
pub mod path;
pub mod sync;

/// Install a global log subscriber, filtered by `RUST_LOG` (default `info`).
///
/// Calling this more than once is harmless; only the first call has any effect.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .try_init()
        .ok();
}
