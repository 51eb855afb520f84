//! Trait definitions for the collaborators the pipeline calls into.

mod classifier;
mod device;
mod inference;
mod store;

pub use classifier::*;
pub use device::*;
pub use inference::*;
pub use store::*;
