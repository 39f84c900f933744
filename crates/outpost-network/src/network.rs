//! Supply/demand balancing over a [`GridGraph`].
//!
//! Each tick the network balances supply and demand per grid, computes an
//! availability ratio (0..1 as [`Fixed64`]), hands every consumer its share
//! and emits events on state transitions (unpowered/powered, storage fill
//! marks).
//!
//! # Balance rules
//!
//! - Supply is the sum of producer output, demand the sum of consumer input.
//!   Storage nodes are left out of both sums: a storage node's producer rate
//!   caps its discharge and its consumer rate caps its charge.
//! - Surplus charges storage nodes in member order; whatever storage cannot
//!   take is discarded.
//! - A deficit drains storage in member order before availability drops.
//! - Each consumer receives `availability * input_rate` and is powered when
//!   availability reaches its threshold (its own, or the network default).

use outpost_core::fixed::{Fixed64, Ticks, checked_div_64, clamp_unit};
use outpost_core::id::{GridId, NodeId};
use outpost_core::sim::StateHash;
use serde::{Deserialize, Serialize};
use slotmap::{Key, SlotMap};
use tracing::{debug, warn};

use crate::event::NetworkEvent;
use crate::grid::{Connection, Grid, GridError, GridGraph, GridStats};
use crate::node::Pluggable;

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Most ticks a single [`Network::update`] runs. Backlog beyond this is
/// dropped.
pub const MAX_CATCH_UP_TICKS: u32 = 64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Default availability at or above which a consumer is powered.
    pub powered_threshold: Fixed64,
    /// Seconds of [`Network::update`] time per tick.
    pub tick_interval: Fixed64,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            powered_threshold: Fixed64::ONE,
            tick_interval: Fixed64::ONE,
        }
    }
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// A utility network: topology plus per-grid resource balancing.
///
/// Power and fluids are both plain `Network`s, told apart by name in the
/// host and by resource tags on their nodes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Network {
    graph: GridGraph,
    config: NetworkConfig,
    /// Update time not yet spent on a tick.
    #[serde(default)]
    elapsed: Fixed64,
    /// Ticks run so far.
    #[serde(default)]
    ticks: Ticks,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: NetworkConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &NetworkConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: NetworkConfig) {
        self.config = config;
    }

    pub fn graph(&self) -> &GridGraph {
        &self.graph
    }

    pub fn ticks(&self) -> Ticks {
        self.ticks
    }

    // -----------------------------------------------------------------------
    // Topology
    // -----------------------------------------------------------------------

    pub fn add_node(&mut self, spec: Pluggable) -> NodeId {
        let node = self.graph.add_node(spec);
        debug!(?node, "node added");
        node
    }

    pub fn remove_node(&mut self, node: NodeId) -> Result<Pluggable, GridError> {
        let spec = self.graph.remove_node(node)?;
        debug!(?node, "node removed");
        Ok(spec)
    }

    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<bool, GridError> {
        self.graph.connect(a, b)
    }

    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> Result<bool, GridError> {
        self.graph.disconnect(a, b)
    }

    pub fn reconnect_grids(&mut self) {
        self.graph.reconnect_grids();
    }

    pub fn grids(&mut self) -> &[Grid] {
        self.graph.grids()
    }

    pub fn grid(&mut self, id: GridId) -> Option<&Grid> {
        self.graph.grid(id)
    }

    pub fn grid_of(&mut self, node: NodeId) -> Option<GridId> {
        self.graph.grid_of(node)
    }

    pub fn node(&self, node: NodeId) -> Option<&Connection> {
        self.graph.node(node)
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.graph.contains(node)
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    // -----------------------------------------------------------------------
    // Simulation
    // -----------------------------------------------------------------------

    /// Balance every grid once. Rebuilds the partition first if the topology
    /// changed. Never mutates topology.
    pub fn tick(&mut self) -> Vec<NetworkEvent> {
        self.graph.ensure_grids();
        self.ticks += 1;
        let tick = self.ticks;
        let threshold = self.config.powered_threshold;
        let mut events = Vec::new();

        let (grids, nodes) = self.graph.parts_mut();
        for grid in grids.iter_mut() {
            balance_grid(grid, nodes, threshold, tick, &mut events);
        }

        debug!(tick, grids = grids.len(), events = events.len(), "network ticked");
        events
    }

    /// Accumulate `dt` seconds and run one tick per elapsed tick interval,
    /// carrying the remainder. A non-positive interval ticks once per call.
    /// At most [`MAX_CATCH_UP_TICKS`] ticks run; any further whole intervals
    /// are dropped.
    pub fn update(&mut self, dt: Fixed64) -> Vec<NetworkEvent> {
        let interval = self.config.tick_interval;
        if interval <= Fixed64::ZERO {
            self.elapsed = Fixed64::ZERO;
            return self.tick();
        }

        self.elapsed = self.elapsed.saturating_add(dt.max(Fixed64::ZERO));
        let mut events = Vec::new();
        let mut ran = 0;
        while self.elapsed >= interval {
            if ran == MAX_CATCH_UP_TICKS {
                warn!(%interval, backlog = %self.elapsed, "network tick backlog dropped");
                self.elapsed %= interval;
                break;
            }
            self.elapsed -= interval;
            events.extend(self.tick());
            ran += 1;
        }
        events
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    /// Availability of a grid as of its last tick.
    pub fn availability(&self, grid: GridId) -> Option<Fixed64> {
        self.grid_stats(grid).map(|s| s.availability)
    }

    pub fn grid_stats(&self, grid: GridId) -> Option<&GridStats> {
        self.graph
            .cached_grids()
            .get(grid.0 as usize)
            .map(|g| &g.stats)
    }

    pub fn is_powered(&self, node: NodeId) -> Option<bool> {
        self.graph.node(node).map(|c| c.powered)
    }

    pub fn supplied(&self, node: NodeId) -> Option<Fixed64> {
        self.graph.node(node).map(|c| c.supplied)
    }

    pub fn stored(&self, node: NodeId) -> Option<Fixed64> {
        self.graph
            .node(node)
            .and_then(|c| c.spec.storage.as_ref())
            .map(|s| s.stored)
    }

    /// Stored amount for storage nodes, otherwise the amount supplied on
    /// the last tick.
    pub fn current_value(&self, node: NodeId) -> Option<Fixed64> {
        let conn = self.graph.node(node)?;
        Some(match &conn.spec.storage {
            Some(storage) => storage.stored,
            None => conn.supplied,
        })
    }

    /// Overwrite a storage node's level, clamped to `[0, capacity]`.
    /// Returns the value actually stored. Emits no event.
    pub fn set_stored(&mut self, node: NodeId, value: Fixed64) -> Result<Fixed64, GridError> {
        let conn = self.graph.node_mut(node).ok_or(GridError::UnknownNode(node))?;
        let storage = conn.spec.storage.as_mut().ok_or(GridError::NoStorage(node))?;
        storage.stored = value.clamp(Fixed64::ZERO, storage.capacity.max(Fixed64::ZERO));
        let stored = storage.stored;
        conn.fill_threshold = storage.fill_threshold();
        Ok(stored)
    }

    /// Change a producer's output. Takes effect on the next tick.
    pub fn set_output_rate(&mut self, node: NodeId, rate: Fixed64) -> Result<(), GridError> {
        let conn = self.graph.node_mut(node).ok_or(GridError::UnknownNode(node))?;
        let producer = conn.spec.producer.as_mut().ok_or(GridError::NoProducer(node))?;
        producer.output_rate = rate.max(Fixed64::ZERO);
        Ok(())
    }

    /// Change a consumer's demand. Takes effect on the next tick.
    pub fn set_input_rate(&mut self, node: NodeId, rate: Fixed64) -> Result<(), GridError> {
        let conn = self.graph.node_mut(node).ok_or(GridError::UnknownNode(node))?;
        let consumer = conn.spec.consumer.as_mut().ok_or(GridError::NoConsumer(node))?;
        consumer.input_rate = rate.max(Fixed64::ZERO);
        Ok(())
    }

    /// Sum of every storage node's level.
    pub fn total_stored(&self) -> Fixed64 {
        self.graph
            .nodes()
            .filter_map(|(_, c)| c.spec.storage.as_ref())
            .fold(Fixed64::ZERO, |acc, s| acc.saturating_add(s.stored))
    }

    /// Feed the network's runtime state into a desync hash, in node order.
    pub fn hash_into(&self, hash: &mut StateHash) {
        let mut nodes: Vec<(NodeId, &Connection)> = self.graph.nodes().collect();
        nodes.sort_by_key(|(id, _)| *id);
        hash.write_u64(self.ticks);
        hash.write_fixed64(self.elapsed);
        for (id, conn) in nodes {
            hash.write_u64(id.data().as_ffi());
            hash.write_fixed64(conn.supplied);
            hash.write_bool(conn.powered);
            if let Some(storage) = &conn.spec.storage {
                hash.write_fixed64(storage.stored);
            }
            for &next in self.graph.neighbors(id) {
                hash.write_u64(next.data().as_ffi());
            }
        }
    }
}

/// Balance one grid in place, pushing transition events.
fn balance_grid(
    grid: &mut Grid,
    nodes: &mut SlotMap<NodeId, Connection>,
    threshold: Fixed64,
    tick: Ticks,
    events: &mut Vec<NetworkEvent>,
) {
    if grid.is_empty() {
        return;
    }
    let zero = Fixed64::ZERO;
    let one = Fixed64::ONE;

    // Step 1: Sum supply and demand.
    let mut supply = zero;
    let mut demand = zero;
    for &member in &grid.members {
        if let Some(conn) = nodes.get(member) {
            supply = supply.saturating_add(conn.spec.supply_rate());
            demand = demand.saturating_add(conn.spec.demand_rate());
        }
    }

    // Step 2: Balance against storage.
    let mut charged = zero;
    let mut discharged = zero;
    let mut deficit = zero;
    let availability;

    if supply >= demand {
        // Surplus (or no demand): fully satisfied, charge storage with excess.
        availability = one;
        let mut excess = supply - demand;
        for &member in &grid.members {
            if excess <= zero {
                break;
            }
            let Some(conn) = nodes.get_mut(member) else {
                continue;
            };
            let offer = conn.spec.charge_limit().map_or(excess, |cap| excess.min(cap));
            if let Some(storage) = conn.spec.storage.as_mut() {
                let took = storage.fill(offer);
                excess -= took;
                charged += took;
            }
        }
    } else {
        // Deficit: try to cover with storage.
        let mut remaining = demand - supply;
        for &member in &grid.members {
            if remaining <= zero {
                break;
            }
            let Some(conn) = nodes.get_mut(member) else {
                continue;
            };
            let ask = conn.spec.discharge_limit().map_or(remaining, |cap| remaining.min(cap));
            if let Some(storage) = conn.spec.storage.as_mut() {
                let gave = storage.drain(ask);
                remaining -= gave;
                discharged += gave;
            }
        }

        if remaining <= zero {
            availability = one;
        } else {
            availability = checked_div_64(demand - remaining, demand).map_or(zero, clamp_unit);
            deficit = remaining;
        }
    }

    // Step 3: Distribute to consumers and detect transitions.
    let mut stored = zero;
    let mut capacity = zero;
    for &member in &grid.members {
        let Some(conn) = nodes.get_mut(member) else {
            continue;
        };

        match conn.spec.consumer.as_ref().filter(|_| conn.spec.storage.is_none()) {
            Some(consumer) => {
                conn.supplied = consumer.input_rate.saturating_mul(availability);
                let needed = consumer.min_availability.unwrap_or(threshold);
                let powered = availability >= needed;
                if powered != conn.powered {
                    conn.powered = powered;
                    events.push(if powered {
                        NetworkEvent::Powered {
                            node: member,
                            grid: grid.id,
                            tick,
                        }
                    } else {
                        NetworkEvent::Unpowered {
                            node: member,
                            grid: grid.id,
                            availability,
                            tick,
                        }
                    });
                }
            }
            None => {
                conn.supplied = zero;
                conn.powered = false;
            }
        }

        if let Some(storage) = &conn.spec.storage {
            stored = stored.saturating_add(storage.stored);
            capacity = capacity.saturating_add(storage.capacity);
            let mark = storage.fill_threshold();
            if mark != conn.fill_threshold {
                conn.fill_threshold = mark;
                events.push(NetworkEvent::StorageThreshold {
                    node: member,
                    percent: mark,
                    tick,
                });
            }
        }
    }

    grid.stats = GridStats {
        supply,
        demand,
        stored,
        capacity,
        charged,
        discharged,
        availability,
        deficit,
    };
}

// ===========================================================================
// Tests
// ===========================================================================
