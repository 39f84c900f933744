//! Utility Networks for Outpost.
//!
//! Models power and fluid distribution as undirected graphs of pluggable
//! nodes. Topology changes mark the grid partition dirty; the next tick
//! recomputes the connected components ([`grid::Grid`]s) and balances supply,
//! demand and storage within each one.
//!
//! # Design
//!
//! - Nodes are described by capability components ([`node::Pluggable`]),
//!   never by concrete kind.
//! - The partition is a full rebuild by breadth-first search, cached until
//!   the next mutation.
//! - Availability is applied uniformly across a grid's consumers.
//! - Events fire only on *transitions*, not every tick.

pub mod event;
pub mod grid;
pub mod network;
pub mod node;

pub use event::NetworkEvent;
pub use grid::{Connection, Grid, GridError, GridGraph, GridStats};
pub use network::{MAX_CATCH_UP_TICKS, Network, NetworkConfig};
pub use node::{Capabilities, Consumer, Pluggable, Producer, Storage};
