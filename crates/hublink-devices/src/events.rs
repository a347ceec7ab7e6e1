/*!
 * Hub events and notifications.
 *
 * Notifications are what a hub pushes to the context; events are what the
 * context queues for the caller's pump after applying them.
 */
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::hardware_id::HardwareId;
use crate::inventory::{FunctionEntry, ModuleEntry};

/// Observer invoked from the caller's event pump for module arrivals or removals
pub type DeviceCallback = Arc<dyn Fn(&ModuleEntry) + Send + Sync>;

/// Something a hub reports asynchronously
#[derive(Debug, Clone, PartialEq)]
pub enum HubNotification {
    /// A module was plugged in
    Arrival {
        /// The module
        module: ModuleEntry,
        /// Its functions, with their class names
        functions: Vec<(String, FunctionEntry)>,
    },
    /// A module was unplugged
    Removal {
        /// Serial number of the module
        serial_number: String,
    },
    /// A function published a new advertised value
    ValueChange {
        /// The function
        hardware_id: HardwareId,
        /// The new advertised value
        value: String,
    },
}

/// What happened
#[derive(Debug, Clone, PartialEq)]
pub enum HubEventKind {
    /// A module became reachable
    DeviceArrival(ModuleEntry),
    /// A module stopped being reachable
    DeviceRemoval(ModuleEntry),
    /// The advertised value of an observed proxy changed
    ValueChanged {
        /// Class of the proxy
        class: &'static str,
        /// Identifier of the proxy
        identifier: String,
        /// Function the value came from
        hardware_id: HardwareId,
        /// The new advertised value
        value: String,
    },
}

/// An event waiting for the caller's pump
#[derive(Debug, Clone, PartialEq)]
pub struct HubEvent {
    /// When the event was queued
    pub timestamp: DateTime<Utc>,
    /// What happened
    pub kind: HubEventKind,
}

impl HubEvent {
    /// Create an event stamped with the current time
    pub fn new(kind: HubEventKind) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
        }
    }
}
