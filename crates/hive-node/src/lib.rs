//! Hive node: wires the bus, orchestrator and coordinator into one process
//! driven by a TOML configuration.

pub mod bridge;
pub mod config;
pub mod node;

pub use bridge::EventBridge;
pub use config::{BusSection, NodeConfig, OrchestratorSection, WorkerSection};
pub use node::{load_definition, parse_definition, validate_definition, Node, RUN_CAPABILITY};
