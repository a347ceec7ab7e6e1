/*!
 * Enumeration of the functions of a class.
 *
 * Functions are visited in inventory order. `next` takes the hardware ID of
 * the current function, not a position, so an enumeration survives inventory
 * changes: it stops early if the current function has disappeared.
 */
use crate::hardware_id::HardwareId;
use crate::inventory::Inventory;

/// The first function of `class`
pub fn first(inventory: &Inventory, class: &str) -> Option<HardwareId> {
    inventory
        .functions(class)
        .first()
        .map(|e| e.hardware_id.clone())
}

/// The function of `class` following `current`
pub fn next(inventory: &Inventory, class: &str, current: &HardwareId) -> Option<HardwareId> {
    let functions = inventory.functions(class);
    let index = functions.iter().position(|e| &e.hardware_id == current)?;
    functions.get(index + 1).map(|e| e.hardware_id.clone())
}

/// Every function of `class`, in enumeration order
pub fn all(inventory: &Inventory, class: &str) -> Vec<HardwareId> {
    std::iter::successors(first(inventory, class), |id| next(inventory, class, id)).collect()
}
