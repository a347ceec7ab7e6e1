/*!
 * hublink Devices
 *
 * This crate provides the function registry, the attribute cache, hub
 * inventory and resolution, and the typed device classes of the hublink
 * runtime. Everything is reached through an explicit [`Context`].
 */

#![warn(missing_docs)]

// Re-export core types
pub use hublink_core::prelude;

pub mod cache;
pub mod classes;
pub mod context;
pub mod enumeration;
pub mod events;
pub mod function;
pub mod hardware_id;
pub mod inventory;
pub mod registry;
pub mod resolver;
pub mod schema;
pub mod transport;
pub mod transports;

pub use classes::{
    CurrentLoopOutput, FileRecord, Files, FunctionClass, LoopPower, PowerOutput, SoundLevel,
    Threshold, ThresholdState, Voltage,
};
pub use context::Context;
pub use events::{HubEvent, HubEventKind, HubNotification};
pub use function::{FunctionProxy, Reachability};
pub use hardware_id::HardwareId;
pub use transport::HubTransport;

/// hublink devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> Result<(), hublink_core::error::Error> {
    tracing::info!("hublink Devices {} initialized", VERSION);
    Ok(())
}

/// Information about available hub transports
pub fn available_transports() -> Vec<&'static str> {
    let mut transports = vec!["simulated"];

    #[cfg(feature = "http")]
    transports.push("http");

    transports
}

/// Create a context and register an HTTP hub for every configured URL
#[cfg(feature = "http")]
pub async fn connect(config: &hublink_core::config::Config) -> hublink_core::error::Result<Context> {
    let ctx = Context::from_config(config)?;
    for url in &config.hub.urls {
        let hub = transports::HttpHub::new(url.as_str())?;
        ctx.register_hub(std::sync::Arc::new(hub)).await?;
    }
    Ok(ctx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transports() {
        assert!(available_transports().contains(&"simulated"));
        assert!(init().is_ok());
        assert!(!VERSION.is_empty());
    }
}
