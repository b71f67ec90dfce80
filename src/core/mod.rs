pub mod classify;
pub mod delta;
pub mod mapping;
pub mod merge;
pub mod naming;
pub mod normalize;
pub mod propagate;
pub mod types;
