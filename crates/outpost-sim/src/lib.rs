//! Simulation context for the outpost core.
//!
//! [`Simulation`] owns one event [`Scheduler`](outpost_core::scheduler::Scheduler)
//! and any number of named utility [`Network`](outpost_network::Network)s.
//! The two subsystems stay independent: the scheduler drives network ticks
//! only through `"tick_network"` signals emitted by its callbacks.
//!
//! [`serialize`] adds versioned binary snapshots of the whole context.

pub mod serialize;
pub mod simulation;

pub use serialize::{DeserializeError, SerializeError, SnapshotHeader};
pub use simulation::{SimError, SimReport, Simulation, TICK_NETWORK};
