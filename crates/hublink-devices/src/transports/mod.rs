/*!
 * Hub transport implementations.
 */

pub mod simulated;

#[cfg(feature = "http")]
pub mod http;

pub use simulated::SimulatedHub;

#[cfg(feature = "http")]
pub use http::HttpHub;
