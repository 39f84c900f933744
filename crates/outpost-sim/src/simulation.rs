//! The simulation context: one scheduler plus named networks.

use std::collections::BTreeMap;

use outpost_core::event::{EventParam, Repeat, ScheduledEvent};
use outpost_core::fixed::Fixed64;
use outpost_core::id::NodeId;
use outpost_core::scheduler::{
    Scheduler, SchedulerConfig, SchedulerError, SchedulerMutation, Signal, UpdateReport,
};
use outpost_core::sim::StateHash;
use outpost_data::GameData;
use outpost_network::{GridError, Network, NetworkEvent, Pluggable};
use tracing::{debug, warn};

/// Signal (and callback) name that asks the simulation to tick the network
/// named by the signal's first text parameter.
pub const TICK_NETWORK: &str = "tick_network";

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("no network named '{0}'")]
    UnknownNetwork(String),
    #[error("a network named '{0}' already exists")]
    DuplicateNetwork(String),
    #[error("no node prototype named '{0}'")]
    UnknownNodePrototype(String),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error(transparent)]
    Grid(#[from] GridError),
}

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of one [`Simulation::update`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimReport {
    pub scheduler: UpdateReport,
    /// Transition events from networks ticked this update, tagged with the
    /// network name, in tick order.
    pub network_events: Vec<(String, NetworkEvent)>,
    /// Signals the simulation did not act on.
    pub ignored: Vec<Signal>,
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Owns the scheduler and every network. Nothing is global: run several
/// simulations side by side if needed.
#[derive(Debug)]
pub struct Simulation {
    pub(crate) scheduler: Scheduler,
    pub(crate) networks: BTreeMap<String, Network>,
    pub(crate) node_prototypes: BTreeMap<String, Pluggable>,
    pub(crate) steps: u64,
}

impl Default for Simulation {
    fn default() -> Self {
        Self::new()
    }
}

impl Simulation {
    pub fn new() -> Self {
        Self::with_scheduler_config(SchedulerConfig::default())
    }

    pub fn with_scheduler_config(config: SchedulerConfig) -> Self {
        let mut scheduler = Scheduler::with_config(config);
        install_tick_callback(&mut scheduler);
        Self {
            scheduler,
            networks: BTreeMap::new(),
            node_prototypes: BTreeMap::new(),
            steps: 0,
        }
    }

    /// Build a simulation from loaded data: scheduler settings, event
    /// prototypes, node prototypes, and one network per configured entry,
    /// each ticked every `tick_interval` seconds.
    pub fn from_game_data(data: &GameData) -> Result<Self, SimError> {
        let mut sim = Self::with_scheduler_config(data.scheduler.clone());
        sim.scheduler
            .prototypes_mut()
            .extend(data.prototypes.iter().cloned());
        sim.node_prototypes = data.nodes.clone();

        for (name, config) in &data.networks {
            let interval = config.tick_interval;
            sim.add_network(name.clone(), Network::with_config(config.clone()))?;
            sim.schedule_network_ticks(name, interval)?;
        }

        debug!(
            networks = sim.networks.len(),
            prototypes = sim.scheduler.prototypes().len(),
            "simulation built from game data"
        );
        Ok(sim)
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn scheduler_mut(&mut self) -> &mut Scheduler {
        &mut self.scheduler
    }

    /// Number of completed [`update`](Self::update) calls.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    // -----------------------------------------------------------------------
    // Networks
    // -----------------------------------------------------------------------

    pub fn add_network(&mut self, name: impl Into<String>, network: Network) -> Result<(), SimError> {
        let name = name.into();
        if self.networks.contains_key(&name) {
            return Err(SimError::DuplicateNetwork(name));
        }
        debug!(network = %name, "network added");
        self.networks.insert(name, network);
        Ok(())
    }

    /// Remove a network along with its scheduled tick event, if any.
    pub fn remove_network(&mut self, name: &str) -> Option<Network> {
        let network = self.networks.remove(name)?;
        let _ = self.scheduler.unregister_event(&tick_event_name(name));
        debug!(network = %name, "network removed");
        Some(network)
    }

    pub fn network(&self, name: &str) -> Option<&Network> {
        self.networks.get(name)
    }

    pub fn network_mut(&mut self, name: &str) -> Option<&mut Network> {
        self.networks.get_mut(name)
    }

    /// Network names in order.
    pub fn network_names(&self) -> impl Iterator<Item = &str> {
        self.networks.keys().map(String::as_str)
    }

    /// Register a repeating event that ticks `network` every `interval`
    /// seconds. The event is persistent, so it survives snapshots.
    pub fn schedule_network_ticks(&mut self, network: &str, interval: Fixed64) -> Result<(), SimError> {
        if !self.networks.contains_key(network) {
            return Err(SimError::UnknownNetwork(network.to_string()));
        }
        let event = ScheduledEvent::new(tick_event_name(network), TICK_NETWORK, interval)
            .with_repeat(Repeat::Forever)
            .with_param(network);
        self.scheduler.register_event(event)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Node prototypes
    // -----------------------------------------------------------------------

    pub fn node_prototype(&self, name: &str) -> Option<&Pluggable> {
        self.node_prototypes.get(name)
    }

    pub fn insert_node_prototype(&mut self, name: impl Into<String>, spec: Pluggable) {
        self.node_prototypes.insert(name.into(), spec);
    }

    /// Add a node built from a named prototype to a network.
    pub fn spawn_node(&mut self, network: &str, prototype: &str) -> Result<NodeId, SimError> {
        let spec = self
            .node_prototypes
            .get(prototype)
            .cloned()
            .ok_or_else(|| SimError::UnknownNodePrototype(prototype.to_string()))?;
        let net = self
            .networks
            .get_mut(network)
            .ok_or_else(|| SimError::UnknownNetwork(network.to_string()))?;
        Ok(net.add_node(spec))
    }

    /// Connect two nodes of a named network.
    pub fn connect(&mut self, network: &str, a: NodeId, b: NodeId) -> Result<bool, SimError> {
        let net = self
            .networks
            .get_mut(network)
            .ok_or_else(|| SimError::UnknownNetwork(network.to_string()))?;
        Ok(net.connect(a, b)?)
    }

    // -----------------------------------------------------------------------
    // Stepping
    // -----------------------------------------------------------------------

    /// Advance the scheduler by `dt` seconds, then act on the signals its
    /// callbacks emitted.
    pub fn update(&mut self, dt: Fixed64) -> SimReport {
        let scheduler = self.scheduler.update(dt);
        let mut report = SimReport::default();

        for signal in &scheduler.signals {
            let target = (signal.name == TICK_NETWORK)
                .then(|| signal.params.first().and_then(EventParam::as_text))
                .flatten();
            match target.and_then(|name| self.networks.get_mut(name).map(|net| (name, net))) {
                Some((name, network)) => {
                    report
                        .network_events
                        .extend(network.tick().into_iter().map(|e| (name.to_string(), e)));
                }
                None => {
                    warn!(signal = %signal.name, params = ?signal.params, "signal ignored");
                    report.ignored.push(signal.clone());
                }
            }
        }

        self.steps += 1;
        report.scheduler = scheduler;
        report
    }

    /// Tick every network once, in name order. With the `parallel` feature
    /// the networks are ticked on the rayon pool.
    pub fn tick_all_networks(&mut self) -> Vec<(String, NetworkEvent)> {
        #[cfg(feature = "parallel")]
        let batches: Vec<(String, Vec<NetworkEvent>)> = {
            use rayon::prelude::*;
            self.networks
                .par_iter_mut()
                .map(|(name, net)| (name.clone(), net.tick()))
                .collect()
        };
        #[cfg(not(feature = "parallel"))]
        let batches: Vec<(String, Vec<NetworkEvent>)> = self
            .networks
            .iter_mut()
            .map(|(name, net)| (name.clone(), net.tick()))
            .collect();

        batches
            .into_iter()
            .flat_map(|(name, events)| events.into_iter().map(move |e| (name.clone(), e)))
            .collect()
    }

    /// Hash of all simulation state, for desync detection.
    pub fn state_hash(&self) -> u64 {
        let mut hash = StateHash::new();
        hash.write_u64(self.steps);
        for event in self.scheduler.events() {
            hash.write_str(&event.name);
            hash.write_str(&event.callback);
            hash.write_fixed64(event.cooldown);
            hash.write_fixed64(event.time_to_wait);
            hash.write_u32(event.repeat.remaining().unwrap_or(u32::MAX));
        }
        for (name, network) in &self.networks {
            hash.write_str(name);
            network.hash_into(&mut hash);
        }
        hash.finish()
    }
}

fn tick_event_name(network: &str) -> String {
    format!("{TICK_NETWORK}:{network}")
}

/// The tick callback forwards its parameters as a [`TICK_NETWORK`] signal.
pub(crate) fn install_tick_callback(scheduler: &mut Scheduler) {
    scheduler.register_callback(TICK_NETWORK, |firing| {
        vec![SchedulerMutation::Signal(Signal {
            name: TICK_NETWORK.to_string(),
            params: firing.params.to_vec(),
        })]
    });
}

// ===========================================================================
// Tests
// ===========================================================================
