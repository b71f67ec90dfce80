pub mod document;
pub mod logical_id;

pub use document::{Codegen, GeneratedDocument};
pub use logical_id::LogicalIds;
