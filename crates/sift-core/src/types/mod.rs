//! Core types for sift.

mod labels;
mod message;
mod task;
mod training;

pub use labels::*;
pub use message::*;
pub use task::*;
pub use training::*;
