//! Storage module for session credentials.
//!
//! The protocol session owns the meaning of its credentials; this module
//! only knows how to load, persist and wipe them.

mod traits;
mod dir;
mod memory;

pub use traits::*;
pub use dir::*;
pub use memory::*;
