//! In-process simulation of a sharded chain
//!
//! `SimulationSettings` describes a run; `Simulation` starts one committee
//! per shard and the clients on a shared `LocalHub` and waits for the
//! workload to settle.

pub mod error;
pub mod settings;
pub mod simulation;

pub use error::{SimulationError, SimulationResult};
pub use settings::SimulationSettings;
pub use simulation::{ShardSummary, Simulation, SimulationOutcome};
