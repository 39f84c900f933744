//! Node registry, undirected adjacency and connected-component grids.
//!
//! Topology mutations apply immediately and mark the grid partition dirty.
//! The partition is recomputed in full by [`GridGraph::reconnect_grids`]
//! (explicitly, or lazily by any query that needs it).

use std::collections::VecDeque;

use outpost_core::fixed::Fixed64;
use outpost_core::id::{GridId, NodeId};
use serde::{Deserialize, Serialize};
use slotmap::{SecondaryMap, SlotMap};
use tracing::debug;

use crate::node::Pluggable;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GridError {
    #[error("node {0:?} is not registered")]
    UnknownNode(NodeId),
    #[error("cannot connect node {0:?} to itself")]
    SelfLoop(NodeId),
    #[error("cannot join a '{left}' grid to a '{right}' grid")]
    IncompatibleResource { left: String, right: String },
    #[error("node {0:?} has no storage")]
    NoStorage(NodeId),
    #[error("node {0:?} is not a producer")]
    NoProducer(NodeId),
    #[error("node {0:?} is not a consumer")]
    NoConsumer(NodeId),
}

// ---------------------------------------------------------------------------
// Connection
// ---------------------------------------------------------------------------

/// A registered node: its spec plus the runtime state the last tick left.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
    pub spec: Pluggable,
    /// Grid this node belonged to at the last rebuild.
    #[serde(skip)]
    pub grid: Option<GridId>,
    /// Amount delivered to this consumer on the last tick.
    #[serde(default)]
    pub supplied: Fixed64,
    /// Whether this consumer met its powered threshold on the last tick.
    #[serde(default)]
    pub powered: bool,
    /// Last reported fill mark (percent) for storage nodes.
    #[serde(default)]
    pub fill_threshold: u8,
}

impl Connection {
    pub fn new(spec: Pluggable) -> Self {
        let fill_threshold = spec.storage.as_ref().map_or(0, |s| s.fill_threshold());
        Self {
            spec,
            grid: None,
            supplied: Fixed64::ZERO,
            powered: false,
            fill_threshold,
        }
    }
}

// ---------------------------------------------------------------------------
// Grid
// ---------------------------------------------------------------------------

/// Aggregate figures of a grid's last tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridStats {
    pub supply: Fixed64,
    pub demand: Fixed64,
    /// Total stored across the grid's storage nodes after the tick.
    pub stored: Fixed64,
    pub capacity: Fixed64,
    /// Surplus absorbed by storage.
    pub charged: Fixed64,
    /// Amount released by storage toward a deficit.
    pub discharged: Fixed64,
    /// Fraction of demand met, in `[0, 1]`.
    pub availability: Fixed64,
    /// Demand left unmet after storage.
    pub deficit: Fixed64,
}

impl Default for GridStats {
    fn default() -> Self {
        Self {
            supply: Fixed64::ZERO,
            demand: Fixed64::ZERO,
            stored: Fixed64::ZERO,
            capacity: Fixed64::ZERO,
            charged: Fixed64::ZERO,
            discharged: Fixed64::ZERO,
            availability: Fixed64::ONE,
            deficit: Fixed64::ZERO,
        }
    }
}

/// A connected component of the node graph sharing one resource pool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grid {
    pub id: GridId,
    /// Members in ascending `NodeId` order.
    pub members: Vec<NodeId>,
    /// Resource tag adopted from tagged members, if any.
    pub resource: Option<String>,
    pub stats: GridStats,
}

impl Grid {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.members.binary_search(&node).is_ok()
    }
}

// ---------------------------------------------------------------------------
// GridGraph
// ---------------------------------------------------------------------------

/// Node registry plus undirected adjacency, with a cached grid partition.
///
/// Adjacency is stored in a `SecondaryMap` keyed by `NodeId`, so it stays in
/// sync with the primary `nodes` SlotMap. Neighbour lists are kept sorted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GridGraph {
    nodes: SlotMap<NodeId, Connection>,
    adjacency: SecondaryMap<NodeId, Vec<NodeId>>,

    /// Cached partition. Recomputed when `dirty` is true.
    #[serde(skip)]
    grids: Vec<Grid>,
    /// Defaults to `true` on deserialize so the partition is recomputed.
    #[serde(skip, default = "default_dirty")]
    dirty: bool,
}

fn default_dirty() -> bool {
    true
}

impl Default for GridGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl GridGraph {
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
            adjacency: SecondaryMap::new(),
            grids: Vec::new(),
            dirty: true,
        }
    }

    // -----------------------------------------------------------------------
    // Topology mutation
    // -----------------------------------------------------------------------

    /// Register a node. It starts out isolated, in a grid of its own.
    pub fn add_node(&mut self, spec: Pluggable) -> NodeId {
        let node = self.nodes.insert(Connection::new(spec));
        self.adjacency.insert(node, Vec::new());
        self.dirty = true;
        node
    }

    /// Remove a node and every edge touching it. Returns its spec.
    pub fn remove_node(&mut self, node: NodeId) -> Result<Pluggable, GridError> {
        let connection = self.nodes.remove(node).ok_or(GridError::UnknownNode(node))?;
        let neighbours = self.adjacency.remove(node).unwrap_or_default();
        for other in neighbours {
            if let Some(list) = self.adjacency.get_mut(other) {
                list.retain(|&n| n != node);
            }
        }
        self.dirty = true;
        Ok(connection.spec)
    }

    /// Add an undirected edge. Returns `false` when the edge already existed.
    ///
    /// Fails without mutating when either node is unknown, when `a == b`, or
    /// when the two components carry different resource tags.
    pub fn connect(&mut self, a: NodeId, b: NodeId) -> Result<bool, GridError> {
        self.check(a)?;
        self.check(b)?;
        if a == b {
            return Err(GridError::SelfLoop(a));
        }
        if self.are_adjacent(a, b) {
            return Ok(false);
        }
        let left = self.component_resource(a);
        let right = self.component_resource(b);
        if let (Some(left), Some(right)) = (left, right) {
            if left != right {
                return Err(GridError::IncompatibleResource {
                    left: left.to_string(),
                    right: right.to_string(),
                });
            }
        }

        for (from, to) in [(a, b), (b, a)] {
            if let Some(list) = self.adjacency.get_mut(from) {
                if let Err(pos) = list.binary_search(&to) {
                    list.insert(pos, to);
                }
            }
        }
        self.dirty = true;
        Ok(true)
    }

    /// Remove an undirected edge. Returns `false` when there was none.
    pub fn disconnect(&mut self, a: NodeId, b: NodeId) -> Result<bool, GridError> {
        self.check(a)?;
        self.check(b)?;
        if !self.are_adjacent(a, b) {
            return Ok(false);
        }
        for (from, to) in [(a, b), (b, a)] {
            if let Some(list) = self.adjacency.get_mut(from) {
                list.retain(|&n| n != to);
            }
        }
        self.dirty = true;
        Ok(true)
    }

    fn check(&self, node: NodeId) -> Result<(), GridError> {
        if self.nodes.contains_key(node) {
            Ok(())
        } else {
            Err(GridError::UnknownNode(node))
        }
    }

    /// Resource tag of the component containing `start`, if any member is
    /// tagged. Tagged members of one component always agree.
    fn component_resource(&self, start: NodeId) -> Option<&str> {
        let mut visited: SecondaryMap<NodeId, ()> = SecondaryMap::new();
        let mut queue = VecDeque::from([start]);
        visited.insert(start, ());
        while let Some(node) = queue.pop_front() {
            if let Some(tag) = self.nodes.get(node).and_then(|c| c.spec.resource.as_deref()) {
                return Some(tag);
            }
            for &next in self.neighbors(node) {
                if visited.insert(next, ()).is_none() {
                    queue.push_back(next);
                }
            }
        }
        None
    }

    // -----------------------------------------------------------------------
    // Partition
    // -----------------------------------------------------------------------

    /// Recompute the grid partition from scratch.
    ///
    /// Components are discovered breadth-first from each unvisited node in
    /// ascending `NodeId` order, so grid ids follow each component's smallest
    /// member. Calling this twice without a topology change yields the same
    /// partition.
    pub fn reconnect_grids(&mut self) {
        let mut keys: Vec<NodeId> = self.nodes.keys().collect();
        keys.sort();

        let mut visited: SecondaryMap<NodeId, ()> = SecondaryMap::new();
        let mut grids = Vec::new();

        for &root in &keys {
            if visited.contains_key(root) {
                continue;
            }
            let id = GridId(grids.len() as u32);
            let mut members = Vec::new();
            let mut queue = VecDeque::from([root]);
            visited.insert(root, ());

            while let Some(node) = queue.pop_front() {
                members.push(node);
                for &next in self.neighbors(node) {
                    if visited.insert(next, ()).is_none() {
                        queue.push_back(next);
                    }
                }
            }
            members.sort();

            let resource = members
                .iter()
                .find_map(|&n| self.nodes.get(n).and_then(|c| c.spec.resource.clone()));
            for &member in &members {
                if let Some(conn) = self.nodes.get_mut(member) {
                    conn.grid = Some(id);
                }
            }
            grids.push(Grid {
                id,
                members,
                resource,
                stats: GridStats::default(),
            });
        }

        debug!(nodes = keys.len(), grids = grids.len(), "grids rebuilt");
        self.grids = grids;
        self.dirty = false;
    }

    /// Rebuild the partition if a mutation happened since the last one.
    pub fn ensure_grids(&mut self) {
        if self.dirty {
            self.reconnect_grids();
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Current grids, rebuilding first if needed.
    pub fn grids(&mut self) -> &[Grid] {
        self.ensure_grids();
        &self.grids
    }

    pub fn grid(&mut self, id: GridId) -> Option<&Grid> {
        self.ensure_grids();
        self.grids.get(id.0 as usize)
    }

    pub fn grid_of(&mut self, node: NodeId) -> Option<GridId> {
        self.ensure_grids();
        self.nodes.get(node).and_then(|c| c.grid)
    }

    /// Grids as of the last rebuild, without rebuilding.
    pub fn cached_grids(&self) -> &[Grid] {
        &self.grids
    }

    /// Split borrow used by the balancer.
    pub(crate) fn parts_mut(&mut self) -> (&mut [Grid], &mut SlotMap<NodeId, Connection>) {
        (&mut self.grids, &mut self.nodes)
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn node(&self, node: NodeId) -> Option<&Connection> {
        self.nodes.get(node)
    }

    pub(crate) fn node_mut(&mut self, node: NodeId) -> Option<&mut Connection> {
        self.nodes.get_mut(node)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &Connection)> {
        self.nodes.iter()
    }

    /// Sorted neighbours of `node`. Empty for unknown nodes.
    pub fn neighbors(&self, node: NodeId) -> &[NodeId] {
        self.adjacency.get(node).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn are_adjacent(&self, a: NodeId, b: NodeId) -> bool {
        self.neighbors(a).binary_search(&b).is_ok()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.nodes.contains_key(node)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of undirected edges.
    pub fn edge_count(&self) -> usize {
        self.adjacency.values().map(Vec::len).sum::<usize>() / 2
    }
}

// ===========================================================================
// Tests
// ===========================================================================
