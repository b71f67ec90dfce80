pub mod generator;

pub use generator::{ImportEntry, InventoryMapping, import_mapping, mapping_from_inventory};
