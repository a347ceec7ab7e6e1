/*!
 * hublink Core
 *
 * This crate provides the ambient pieces shared by the hublink runtime:
 * errors and status codes, attribute values, configuration, logging and the
 * caller-drained event queue.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod event;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use serde;
    pub use serde_json;
    pub use tokio;
    pub use tracing;
}

/// hublink core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("hublink Core {} initialized", VERSION);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
