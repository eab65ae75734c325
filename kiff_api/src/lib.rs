//! Shared kiff data models consumed by the core library and renderer crates.

pub mod bounds;
pub mod layers;
pub mod report;
pub mod revision;

pub use bounds::*;
pub use layers::*;
pub use report::*;
pub use revision::*;
