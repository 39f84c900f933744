//! Serde data file structs for scheduler and network content.
//!
//! These structs define the on-disk format for event prototypes, node
//! prototypes and configuration. They are deserialized from RON, JSON, or
//! TOML data files and then resolved into core types by the loader.

use serde::Deserialize;

// ===========================================================================
// Events
// ===========================================================================

/// An event prototype definition in a data file.
#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub name: String,
    /// Callback to bind. Defaults to the event name.
    #[serde(default)]
    pub callback: Option<String>,
    /// Seconds between fires.
    pub cooldown: f64,
    /// Number of fires. Defaults to one.
    #[serde(default)]
    pub repeats: Option<u32>,
    /// Fire until cancelled. Mutually exclusive with `repeats`.
    #[serde(default)]
    pub forever: bool,
    #[serde(default)]
    pub params: Vec<ParamData>,
}

/// A callback parameter. Integers are tried before floats, so `3` stays an
/// integer and `3.0` becomes a number.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum ParamData {
    Bool(bool),
    Int(i64),
    Number(f64),
    Text(String),
}

// ===========================================================================
// Nodes
// ===========================================================================

/// A named node prototype. Capability components are present when their
/// defining field is set: `output_rate` for producers, `input_rate` for
/// consumers, `capacity` for storage.
#[derive(Debug, Clone, Deserialize)]
pub struct NodeData {
    pub name: String,
    #[serde(default)]
    pub output_rate: Option<f64>,
    #[serde(default)]
    pub input_rate: Option<f64>,
    #[serde(default)]
    pub min_availability: Option<f64>,
    #[serde(default)]
    pub capacity: Option<f64>,
    #[serde(default)]
    pub stored: Option<f64>,
    #[serde(default)]
    pub charge_rate: Option<f64>,
    #[serde(default)]
    pub discharge_rate: Option<f64>,
    #[serde(default)]
    pub passthrough: bool,
    #[serde(default)]
    pub resource: Option<String>,
}

// ===========================================================================
// Config
// ===========================================================================

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ConfigData {
    #[serde(default)]
    pub scheduler: SchedulerConfigData,
    #[serde(default)]
    pub networks: Vec<NetworkConfigData>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SchedulerConfigData {
    #[serde(default)]
    pub overflow: OverflowData,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverflowData {
    #[default]
    Discard,
    Carry,
}

/// Per-network settings. Unset fields keep the network defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct NetworkConfigData {
    pub name: String,
    #[serde(default)]
    pub powered_threshold: Option<f64>,
    #[serde(default)]
    pub tick_interval: Option<f64>,
}
