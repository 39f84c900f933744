//! Binary snapshots of a [`Simulation`] via `bitcode`, with a versioned
//! header.
//!
//! Callbacks are closures and are never serialized. A snapshot holds the
//! persistent scheduled events, the event and node prototypes, the
//! scheduler configuration, and every network. Grid partitions are rebuilt
//! lazily on the first tick after loading.

use std::collections::BTreeMap;

use outpost_core::prototype::PrototypeRegistry;
use outpost_core::scheduler::{SchedulerConfig, SchedulerError, SchedulerSnapshot};
use outpost_network::{Network, Pluggable};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::simulation::Simulation;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Magic number identifying an outpost simulation snapshot.
pub const SNAPSHOT_MAGIC: u32 = 0x4F55_5450;

/// Current format version. Increment when breaking the wire format.
pub const FORMAT_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors that can occur during serialization.
#[derive(Debug, thiserror::Error)]
pub enum SerializeError {
    #[error("bitcode encoding failed: {0}")]
    Encode(String),
}

/// Errors that can occur during deserialization.
#[derive(Debug, thiserror::Error)]
pub enum DeserializeError {
    #[error("invalid magic number: expected 0x{:08X}, got 0x{:08X}", SNAPSHOT_MAGIC, .0)]
    InvalidMagic(u32),
    #[error("unsupported format version: expected {}, got {}", FORMAT_VERSION, .0)]
    UnsupportedVersion(u32),
    #[error("snapshot from future version {0} (this build supports up to {FORMAT_VERSION})")]
    FutureVersion(u32),
    #[error("bitcode decoding failed: {0}")]
    Decode(String),
    #[error("scheduled events could not be restored: {0}")]
    Restore(#[from] SchedulerError),
}

// ---------------------------------------------------------------------------
// Snapshot header
// ---------------------------------------------------------------------------

/// Header prepended to every serialized snapshot. Enables format detection
/// and version checking before the payload is used.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotHeader {
    pub magic: u32,
    pub version: u32,
    /// Simulation steps completed when the snapshot was taken.
    pub steps: u64,
}

impl SnapshotHeader {
    /// Create a header for the current format version.
    pub fn new(steps: u64) -> Self {
        Self {
            magic: SNAPSHOT_MAGIC,
            version: FORMAT_VERSION,
            steps,
        }
    }

    pub fn validate(&self) -> Result<(), DeserializeError> {
        if self.magic != SNAPSHOT_MAGIC {
            return Err(DeserializeError::InvalidMagic(self.magic));
        }
        if self.version > FORMAT_VERSION {
            return Err(DeserializeError::FutureVersion(self.version));
        }
        if self.version < FORMAT_VERSION {
            return Err(DeserializeError::UnsupportedVersion(self.version));
        }
        Ok(())
    }
}

/// Read just the header of a serialized snapshot.
///
/// bitcode has no partial decoding, so the whole payload is decoded.
pub fn read_snapshot_header(data: &[u8]) -> Result<SnapshotHeader, DeserializeError> {
    Ok(decode(data)?.header)
}

// ---------------------------------------------------------------------------
// Serializable simulation state
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, Deserialize)]
struct SimSnapshot {
    header: SnapshotHeader,
    config: SchedulerConfig,
    events: SchedulerSnapshot,
    prototypes: PrototypeRegistry,
    node_prototypes: BTreeMap<String, Pluggable>,
    networks: BTreeMap<String, Network>,
}

fn decode(data: &[u8]) -> Result<SimSnapshot, DeserializeError> {
    bitcode::deserialize(data).map_err(|e| DeserializeError::Decode(e.to_string()))
}

impl Simulation {
    /// Serialize the simulation to a binary blob. Transient events are
    /// left out.
    pub fn serialize(&self) -> Result<Vec<u8>, SerializeError> {
        let snapshot = SimSnapshot {
            header: SnapshotHeader::new(self.steps),
            config: self.scheduler.config().clone(),
            events: self.scheduler.snapshot(),
            prototypes: self.scheduler.prototypes().clone(),
            node_prototypes: self.node_prototypes.clone(),
            networks: self.networks.clone(),
        };

        bitcode::serialize(&snapshot).map_err(|e| SerializeError::Encode(e.to_string()))
    }

    /// Deserialize into a fresh simulation.
    ///
    /// Only the built-in network tick callback is available, so snapshots
    /// holding events bound to host callbacks fail with
    /// [`DeserializeError::Restore`]. Use [`load_snapshot`](Self::load_snapshot)
    /// on a simulation whose callbacks are already registered instead.
    pub fn deserialize(data: &[u8]) -> Result<Self, DeserializeError> {
        let mut sim = Simulation::new();
        sim.load_snapshot(data)?;
        Ok(sim)
    }

    /// Replace this simulation's state with a snapshot, keeping its
    /// registered callbacks. On error nothing changes.
    pub fn load_snapshot(&mut self, data: &[u8]) -> Result<(), DeserializeError> {
        let snapshot = decode(data)?;
        snapshot.header.validate()?;

        self.scheduler.restore(snapshot.events)?;
        self.scheduler.set_config(snapshot.config);
        *self.scheduler.prototypes_mut() = snapshot.prototypes;
        self.node_prototypes = snapshot.node_prototypes;
        self.networks = snapshot.networks;
        self.steps = snapshot.header.steps;

        debug!(
            steps = self.steps,
            networks = self.networks.len(),
            events = self.scheduler.len(),
            "snapshot loaded"
        );
        Ok(())
    }
}

// ===========================================================================
// Tests
// ===========================================================================
