//! Hive Protocol - Core types and message definitions
//!
//! Shared data model for the Hive coordination engine: agents, swarm
//! tasks, candidate solutions and the messages carried by the bus.

pub mod identity;
pub mod types;
pub mod messages;
pub mod constants;

pub use identity::*;
pub use types::*;
pub use messages::*;
pub use constants::*;
