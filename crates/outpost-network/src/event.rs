use outpost_core::fixed::{Fixed64, Ticks};
use outpost_core::id::{GridId, NodeId};
use serde::{Deserialize, Serialize};

/// Events emitted by [`Network::tick`](crate::network::Network::tick) on
/// state transitions only, never every tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkEvent {
    /// A consumer dropped below its powered threshold.
    Unpowered {
        node: NodeId,
        grid: GridId,
        /// Grid availability that caused the drop.
        availability: Fixed64,
        tick: Ticks,
    },
    /// A consumer reached its powered threshold.
    Powered {
        node: NodeId,
        grid: GridId,
        tick: Ticks,
    },
    /// A storage node's fill level crossed a 0/25/50/75/100% mark.
    StorageThreshold {
        node: NodeId,
        /// The mark now reached, in percent.
        percent: u8,
        tick: Ticks,
    },
}

impl NetworkEvent {
    /// The node the event concerns.
    pub fn node(&self) -> NodeId {
        match self {
            NetworkEvent::Unpowered { node, .. }
            | NetworkEvent::Powered { node, .. }
            | NetworkEvent::StorageThreshold { node, .. } => *node,
        }
    }

    pub fn tick(&self) -> Ticks {
        match self {
            NetworkEvent::Unpowered { tick, .. }
            | NetworkEvent::Powered { tick, .. }
            | NetworkEvent::StorageThreshold { tick, .. } => *tick,
        }
    }
}
