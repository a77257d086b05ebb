//! Types module for WhatsApp protocol types.
//!
//! Routing identifiers (JIDs) and the events a protocol session emits.

mod jid;
mod events;

pub use jid::*;
pub use events::*;
