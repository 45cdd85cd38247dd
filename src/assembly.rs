//! Scatter of element and connector contributions into node arrays and the global system.
mod global;
mod nodal;

pub use global::GlobalSystem;
pub use nodal::{NodeFields, StableTimestep};
