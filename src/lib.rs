pub mod engine;

pub use engine::config::EngineConfig;
pub use engine::errors::{Error, ExtractionReason, Result};
pub use engine::models::{Author, Comment, ExtractResult, MediaItem, MediaKind, Part, Platform, Stats};
pub use engine::{Engine, ExtractOptions};

use tracing_subscriber::EnvFilter;

/// Log to stderr, filtered by `RUST_LOG` (default `warn`)
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
