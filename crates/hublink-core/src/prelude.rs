/*!
 * Prelude module for hublink Core.
 *
 * This module re-exports commonly used types and functions from the hublink
 * Core crate to make them easier to import.
 */

// Re-export error types
pub use crate::error::{Error, ErrorMode, Result, StatusCode};

// Re-export core types
pub use crate::types::Value;

// Re-export event types
pub use crate::event::EventQueue;

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, HubConfig, SharedConfig};

// Re-export utility functions
pub use crate::utils::{duration_to_millis, millis_to_duration, with_timeout};

// Re-export logging macros
pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
