//! Reconciliation and code generation for a routing fabric.
//!
//! Facts about which attachments should reach which (a request sheet, or the
//! inventory of a deployed fabric) become a stable task set, an
//! infrastructure document and a Mermaid reachability diagram, each with a
//! structural diff against the previous run.

pub mod codegen;
pub mod config;
pub mod core;
pub mod diagram;
pub mod error;
pub mod fabric;
pub mod mapping;
pub mod onboard;
pub mod pipeline;
pub mod sheet;
pub mod store;

pub use error::ReconcileError;
pub use pipeline::{RunReport, RunStatus, sync_inventory, sync_sheet};
