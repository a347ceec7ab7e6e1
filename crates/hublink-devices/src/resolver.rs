/*!
 * Hardware-ID resolution.
 *
 * Turns a free-form identifier into the hardware ID of one function of a
 * given class, using only the inventory (no device access).
 *
 * When several functions share a logical name, the first one in discovery
 * order wins. That order depends on when modules were plugged in, so the
 * outcome can change across topology changes; this is kept as is because
 * existing integrations rely on it.
 */
use tracing::trace;

use hublink_core::error::{Error, Result};

use crate::hardware_id::{HardwareId, SEPARATOR};
use crate::inventory::{FunctionEntry, Inventory};

/// Resolve `identifier` to a function of `class`
///
/// Accepted forms:
/// * `function`: a function identifier, a function logical name, or a module
///   serial number or logical name (first function of the class on it)
/// * `module.function`: module serial or logical name, then function
///   identifier or logical name within that module
pub fn resolve(inventory: &Inventory, class: &str, identifier: &str) -> Result<HardwareId> {
    let identifier = identifier.trim();
    let candidates = inventory.functions(class);

    let found = match identifier.split_once(SEPARATOR) {
        None => resolve_bare(inventory, candidates, identifier),
        Some((module, function)) => resolve_qualified(inventory, candidates, module, function),
    };

    match found {
        Some(entry) => {
            trace!("Resolved {} '{}' to {}", class, identifier, entry.hardware_id);
            Ok(entry.hardware_id.clone())
        }
        None => Err(Error::not_found(format!(
            "no {} matches '{}'",
            class, identifier
        ))),
    }
}

fn resolve_bare<'a>(
    inventory: &Inventory,
    candidates: &'a [FunctionEntry],
    identifier: &str,
) -> Option<&'a FunctionEntry> {
    if identifier.is_empty() {
        return None;
    }

    candidates
        .iter()
        .find(|e| e.hardware_id.function() == identifier)
        .or_else(|| candidates.iter().find(|e| e.logical_name == identifier))
        .or_else(|| {
            let serial = module_serial(inventory, identifier)?;
            candidates.iter().find(|e| e.hardware_id.module() == serial)
        })
}

fn resolve_qualified<'a>(
    inventory: &Inventory,
    candidates: &'a [FunctionEntry],
    module: &str,
    function: &str,
) -> Option<&'a FunctionEntry> {
    let serial = module_serial(inventory, module)?;
    let on_module = || candidates.iter().filter(move |e| e.hardware_id.module() == serial);

    on_module()
        .find(|e| e.hardware_id.function() == function)
        .or_else(|| on_module().find(|e| !function.is_empty() && e.logical_name == function))
}

fn module_serial<'a>(inventory: &'a Inventory, module: &str) -> Option<&'a str> {
    inventory
        .module(module)
        .or_else(|| inventory.module_by_name(module))
        .map(|m| m.serial_number.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ServicesReply;

    const REPLY: &str = r#"{
        "whitePages": [
            {"serialNumber": "LOOPTX01-00001", "logicalName": "TX1"},
            {"serialNumber": "LOOPTX01-00002", "logicalName": "TX2"},
            {"serialNumber": "SOUND001-00003", "logicalName": "pump"}
        ],
        "yellowPages": {
            "CurrentLoopOutput": [
                {"hardwareId": "LOOPTX01-00001.currentLoopOutput", "logicalName": "pump"},
                {"hardwareId": "LOOPTX01-00002.currentLoopOutput", "logicalName": "pump"}
            ],
            "SoundLevel": [
                {"hardwareId": "SOUND001-00003.soundLevel", "logicalName": "noise"}
            ]
        }
    }"#;

    fn inventory() -> Inventory {
        Inventory::from_reply("mem://hub", ServicesReply::from_slice(REPLY.as_bytes()).unwrap())
    }

    fn id(s: &str) -> HardwareId {
        HardwareId::parse(s).unwrap()
    }

    #[test]
    fn test_qualified_by_serial_and_name() {
        let inv = inventory();
        let class = "CurrentLoopOutput";
        assert_eq!(
            resolve(&inv, class, "LOOPTX01-00002.currentLoopOutput").unwrap(),
            id("LOOPTX01-00002.currentLoopOutput")
        );
        assert_eq!(
            resolve(&inv, class, "TX2.currentLoopOutput").unwrap(),
            id("LOOPTX01-00002.currentLoopOutput")
        );
        assert_eq!(
            resolve(&inv, class, "TX1.pump").unwrap(),
            id("LOOPTX01-00001.currentLoopOutput")
        );
    }

    #[test]
    fn test_bare_prefers_hardware_name() {
        let inv = inventory();
        // "pump" is a module logical name and a function logical name; the function wins
        assert_eq!(
            resolve(&inv, "CurrentLoopOutput", "pump").unwrap(),
            id("LOOPTX01-00001.currentLoopOutput")
        );
        assert_eq!(
            resolve(&inv, "CurrentLoopOutput", "currentLoopOutput").unwrap(),
            id("LOOPTX01-00001.currentLoopOutput")
        );
        assert_eq!(
            resolve(&inv, "SoundLevel", "pump").unwrap(),
            id("SOUND001-00003.soundLevel")
        );
        assert_eq!(
            resolve(&inv, "CurrentLoopOutput", "LOOPTX01-00002").unwrap(),
            id("LOOPTX01-00002.currentLoopOutput")
        );
    }

    #[test]
    fn test_ambiguous_name_takes_first_in_discovery_order() {
        let inv = inventory();
        assert_eq!(
            resolve(&inv, "CurrentLoopOutput", " pump ").unwrap().module(),
            "LOOPTX01-00001"
        );
    }

    #[test]
    fn test_not_found() {
        let inv = inventory();
        for ident in ["", "TX9.currentLoopOutput", "TX1.soundLevel", "noise", "TX1."] {
            assert!(
                matches!(resolve(&inv, "CurrentLoopOutput", ident), Err(Error::NotFound(_))),
                "{}",
                ident
            );
        }
        assert!(resolve(&Inventory::new(), "CurrentLoopOutput", "TX1.currentLoopOutput").is_err());
    }
}
