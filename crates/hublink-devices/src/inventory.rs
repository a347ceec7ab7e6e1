/*!
 * Hub inventory: the modules and functions currently reachable.
 *
 * Hubs publish two directories. The white pages list one entry per module;
 * the yellow pages list the functions of every class, in the order the hub
 * discovered them. The inventory of a context is the union of the directories
 * of all its hubs.
 */
use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use hublink_core::error::Result;

use crate::hardware_id::HardwareId;

/// White-pages entry for one module
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModuleEntry {
    /// Module serial number
    pub serial_number: String,
    /// User-assigned module name, possibly empty
    #[serde(default)]
    pub logical_name: String,
    /// Product name reported by the module
    #[serde(default)]
    pub product_name: String,
    /// URL of the hub the module is attached to
    #[serde(skip)]
    pub hub_url: String,
}

/// Yellow-pages entry for one function
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionEntry {
    /// Canonical hardware ID
    pub hardware_id: HardwareId,
    /// User-assigned function name, possibly empty
    #[serde(default)]
    pub logical_name: String,
    /// Short state summary published by the function
    #[serde(default)]
    pub advertised_value: String,
}

/// Reply to a services request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServicesReply {
    /// One entry per module
    #[serde(default)]
    pub white_pages: Vec<ModuleEntry>,
    /// Functions grouped by class name
    #[serde(default)]
    pub yellow_pages: BTreeMap<String, Vec<FunctionEntry>>,
}

impl ServicesReply {
    /// Decode a services reply
    pub fn from_slice(body: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(body)?)
    }
}

/// Differences between two inventories
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InventoryDiff {
    /// Modules present only in the newer inventory
    pub arrived: Vec<ModuleEntry>,
    /// Modules present only in the older inventory
    pub removed: Vec<ModuleEntry>,
    /// Functions whose advertised value changed
    pub value_changes: Vec<(HardwareId, String)>,
}

impl InventoryDiff {
    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.arrived.is_empty() && self.removed.is_empty() && self.value_changes.is_empty()
    }
}

/// Known modules and functions
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Inventory {
    modules: Vec<ModuleEntry>,
    functions: HashMap<String, Vec<FunctionEntry>>,
}

impl Inventory {
    /// Create an empty inventory
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an inventory from one hub's reply
    pub fn from_reply(hub_url: &str, reply: ServicesReply) -> Self {
        let mut inventory = Self::new();
        for mut module in reply.white_pages {
            module.hub_url = hub_url.to_string();
            let serial = module.serial_number.clone();
            let functions = reply
                .yellow_pages
                .iter()
                .flat_map(|(class, entries)| {
                    entries
                        .iter()
                        .filter(|e| e.hardware_id.module() == serial)
                        .map(move |e| (class.clone(), e.clone()))
                })
                .collect();
            inventory.add_module(module, functions);
        }
        inventory
    }

    /// Append another inventory; modules already known are kept as they are
    pub fn merge(&mut self, other: Inventory) {
        for module in other.modules {
            let serial = module.serial_number.clone();
            let functions = other
                .functions
                .iter()
                .flat_map(|(class, entries)| {
                    entries
                        .iter()
                        .filter(|e| e.hardware_id.module() == serial)
                        .map(move |e| (class.clone(), e.clone()))
                })
                .collect();
            self.add_module(module, functions);
        }
    }

    /// Add a module and its functions
    ///
    /// Returns false, leaving the inventory unchanged, if the module is already known.
    /// A function listed twice in the same class is kept once.
    pub fn add_module(&mut self, module: ModuleEntry, functions: Vec<(String, FunctionEntry)>) -> bool {
        if self.module(&module.serial_number).is_some() {
            return false;
        }
        for (class, entry) in functions {
            let entries = self.functions.entry(class).or_default();
            if !entries.iter().any(|e| e.hardware_id == entry.hardware_id) {
                entries.push(entry);
            }
        }
        self.modules.push(module);
        true
    }

    /// Remove a module and all its functions
    pub fn remove_module(&mut self, serial: &str) -> Option<ModuleEntry> {
        let index = self.modules.iter().position(|m| m.serial_number == serial)?;
        for entries in self.functions.values_mut() {
            entries.retain(|e| e.hardware_id.module() != serial);
        }
        self.functions.retain(|_, entries| !entries.is_empty());
        Some(self.modules.remove(index))
    }

    /// Record a new advertised value; returns false if the function is unknown or unchanged
    pub fn set_advertised_value(&mut self, hardware_id: &HardwareId, value: &str) -> bool {
        for entries in self.functions.values_mut() {
            if let Some(entry) = entries.iter_mut().find(|e| &e.hardware_id == hardware_id) {
                if entry.advertised_value == value {
                    return false;
                }
                entry.advertised_value = value.to_string();
                return true;
            }
        }
        false
    }

    /// All modules, in discovery order
    pub fn modules(&self) -> &[ModuleEntry] {
        &self.modules
    }

    /// A module by serial number
    pub fn module(&self, serial: &str) -> Option<&ModuleEntry> {
        self.modules.iter().find(|m| m.serial_number == serial)
    }

    /// The first module carrying a logical name
    pub fn module_by_name(&self, name: &str) -> Option<&ModuleEntry> {
        if name.is_empty() {
            return None;
        }
        self.modules.iter().find(|m| m.logical_name == name)
    }

    /// Functions of a class, in discovery order
    pub fn functions(&self, class: &str) -> &[FunctionEntry] {
        self.functions.get(class).map(Vec::as_slice).unwrap_or(&[])
    }

    /// One function of a class by hardware ID
    pub fn function(&self, class: &str, hardware_id: &HardwareId) -> Option<&FunctionEntry> {
        self.functions(class).iter().find(|e| &e.hardware_id == hardware_id)
    }

    /// The class a hardware ID belongs to
    pub fn class_of(&self, hardware_id: &HardwareId) -> Option<&str> {
        self.functions
            .iter()
            .find(|(_, entries)| entries.iter().any(|e| &e.hardware_id == hardware_id))
            .map(|(class, _)| class.as_str())
    }

    /// The part of the inventory attached to one hub
    pub fn modules_of_hub(&self, hub_url: &str) -> Inventory {
        let mut subset = Inventory::new();
        for module in self.modules.iter().filter(|m| m.hub_url == hub_url) {
            let functions = self
                .functions
                .iter()
                .flat_map(|(class, entries)| {
                    entries
                        .iter()
                        .filter(|e| e.hardware_id.module() == module.serial_number)
                        .map(move |e| (class.clone(), e.clone()))
                })
                .collect();
            subset.add_module(module.clone(), functions);
        }
        subset
    }

    /// Whether no module is known
    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Compute what changed from `self` to `newer`
    pub fn diff(&self, newer: &Inventory) -> InventoryDiff {
        let arrived = newer
            .modules
            .iter()
            .filter(|m| self.module(&m.serial_number).is_none())
            .cloned()
            .collect();
        let removed = self
            .modules
            .iter()
            .filter(|m| newer.module(&m.serial_number).is_none())
            .cloned()
            .collect();

        let mut value_changes = Vec::new();
        for (class, entries) in &newer.functions {
            for entry in entries {
                if let Some(old) = self.function(class, &entry.hardware_id) {
                    if old.advertised_value != entry.advertised_value {
                        value_changes.push((entry.hardware_id.clone(), entry.advertised_value.clone()));
                    }
                }
            }
        }

        InventoryDiff {
            arrived,
            removed,
            value_changes,
        }
    }
}
