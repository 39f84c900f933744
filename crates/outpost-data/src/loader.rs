//! Resolution pipeline: reads data files, validates them, builds core types.
//!
//! Provides format detection (RON/JSON/TOML), file discovery, and
//! deserialization helpers, plus [`load_game_data`] which loads a whole data
//! directory.

use serde::de::DeserializeOwned;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use outpost_core::event::{EventParam, Repeat};
use outpost_core::fixed::Fixed64;
use outpost_core::prototype::{EventPrototype, PrototypeRegistry};
use outpost_core::scheduler::{OverflowPolicy, SchedulerConfig};
use outpost_network::{Consumer, NetworkConfig, Pluggable, Producer, Storage};
use tracing::debug;

use crate::schema::*;

// ===========================================================================
// Errors
// ===========================================================================

/// Errors that can occur during data loading.
#[derive(Debug, thiserror::Error)]
pub enum DataLoadError {
    /// A required data file was not found in the given directory.
    #[error("required file '{file}' not found in {dir}")]
    MissingRequired { file: String, dir: PathBuf },

    /// The file has an extension we don't support.
    #[error("unsupported format for file: {file}")]
    UnsupportedFormat { file: PathBuf },

    /// Two files with the same base name but different formats exist.
    #[error("conflicting formats: {a} and {b}")]
    ConflictingFormats { a: PathBuf, b: PathBuf },

    /// A deserialization error occurred.
    #[error("parse error in {file}: {detail}")]
    Parse { file: PathBuf, detail: String },

    /// An entry parsed but holds an unusable value.
    #[error("invalid entry '{name}' in {file}: {detail}")]
    Invalid {
        file: PathBuf,
        name: String,
        detail: String,
    },

    /// A duplicate name was found.
    #[error("duplicate name '{name}' in {file}")]
    DuplicateName { file: PathBuf, name: String },

    /// An I/O error occurred.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// ===========================================================================
// Format detection
// ===========================================================================

/// Supported data file formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ron,
    Toml,
    Json,
}

/// Detect the format of a file based on its extension.
pub fn detect_format(path: &Path) -> Result<Format, DataLoadError> {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ron") => Ok(Format::Ron),
        Some("toml") => Ok(Format::Toml),
        Some("json") => Ok(Format::Json),
        _ => Err(DataLoadError::UnsupportedFormat {
            file: path.to_path_buf(),
        }),
    }
}

// ===========================================================================
// File discovery
// ===========================================================================

/// Scan a directory for a data file with the given base name (without extension).
///
/// Looks for `{base_name}.ron`, `{base_name}.toml`, and `{base_name}.json`.
/// Returns `Ok(None)` if no file is found, or `Err(ConflictingFormats)` if
/// multiple formats exist for the same base name.
pub fn find_data_file(dir: &Path, base_name: &str) -> Result<Option<PathBuf>, DataLoadError> {
    let mut found: Option<PathBuf> = None;

    for ext in ["ron", "toml", "json"] {
        let candidate = dir.join(format!("{base_name}.{ext}"));
        if candidate.exists() {
            if let Some(existing) = found {
                return Err(DataLoadError::ConflictingFormats {
                    a: existing,
                    b: candidate,
                });
            }
            found = Some(candidate);
        }
    }

    Ok(found)
}

/// Like [`find_data_file`], but returns an error if no file is found.
pub fn require_data_file(dir: &Path, base_name: &str) -> Result<PathBuf, DataLoadError> {
    find_data_file(dir, base_name)?.ok_or_else(|| DataLoadError::MissingRequired {
        file: base_name.to_string(),
        dir: dir.to_path_buf(),
    })
}

// ===========================================================================
// Deserialization
// ===========================================================================

fn parse_error(path: &Path, detail: impl ToString) -> DataLoadError {
    DataLoadError::Parse {
        file: path.to_path_buf(),
        detail: detail.to_string(),
    }
}

/// Read a file and deserialize it according to its format (detected from extension).
pub fn deserialize_file<T: DeserializeOwned>(path: &Path) -> Result<T, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => toml::from_str(&content).map_err(|e| parse_error(path, e)),
    }
}

/// Deserialize a list from a file. For TOML files, extracts the array at the
/// given `toml_key` from a top-level table. For RON and JSON, deserializes
/// directly as `Vec<T>`.
pub fn deserialize_list<T: DeserializeOwned>(
    path: &Path,
    toml_key: &str,
) -> Result<Vec<T>, DataLoadError> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;

    match format {
        Format::Ron => ron::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Json => serde_json::from_str(&content).map_err(|e| parse_error(path, e)),
        Format::Toml => {
            let table: toml::Value = toml::from_str(&content).map_err(|e| parse_error(path, e))?;
            let array = table
                .get(toml_key)
                .ok_or_else(|| parse_error(path, format!("missing key '{toml_key}' in TOML file")))?
                .clone();
            array
                .try_into()
                .map_err(|e: toml::de::Error| parse_error(path, e))
        }
    }
}

/// Record `name` as seen, returning a `DuplicateName` error if it already
/// was.
pub fn check_duplicate(
    seen: &mut BTreeSet<String>,
    name: &str,
    file: &Path,
) -> Result<(), DataLoadError> {
    if seen.insert(name.to_string()) {
        Ok(())
    } else {
        Err(DataLoadError::DuplicateName {
            file: file.to_path_buf(),
            name: name.to_string(),
        })
    }
}

// ===========================================================================
// Resolution
// ===========================================================================

/// Convert a data-file float to fixed-point, rejecting NaN, infinities,
/// out-of-range and negative values.
fn to_fixed(value: f64, file: &Path, name: &str, field: &str) -> Result<Fixed64, DataLoadError> {
    match Fixed64::checked_from_num(value) {
        Some(v) if v >= Fixed64::ZERO => Ok(v),
        _ => Err(DataLoadError::Invalid {
            file: file.to_path_buf(),
            name: name.to_string(),
            detail: format!("{field} must be a non-negative number, got {value}"),
        }),
    }
}

fn to_fixed_opt(
    value: Option<f64>,
    file: &Path,
    name: &str,
    field: &str,
) -> Result<Option<Fixed64>, DataLoadError> {
    value.map(|v| to_fixed(v, file, name, field)).transpose()
}

/// Resolve an `EventData` into an `EventPrototype`.
pub fn resolve_event(data: &EventData, file: &Path) -> Result<EventPrototype, DataLoadError> {
    let cooldown = to_fixed(data.cooldown, file, &data.name, "cooldown")?;
    let repeat = match (data.forever, data.repeats) {
        (true, None) => Repeat::Forever,
        (false, None) => Repeat::Times(1),
        (false, Some(n)) if n > 0 => Repeat::Times(n),
        (false, Some(_)) => {
            return Err(DataLoadError::Invalid {
                file: file.to_path_buf(),
                name: data.name.clone(),
                detail: "repeats must be at least 1".to_string(),
            });
        }
        (true, Some(_)) => {
            return Err(DataLoadError::Invalid {
                file: file.to_path_buf(),
                name: data.name.clone(),
                detail: "forever and repeats are mutually exclusive".to_string(),
            });
        }
    };

    let params = data
        .params
        .iter()
        .map(|p| resolve_param(p, file, &data.name))
        .collect::<Result<Vec<_>, DataLoadError>>()?;

    let mut prototype = EventPrototype::new(data.name.clone(), cooldown).with_repeat(repeat);
    prototype.callback = data.callback.clone();
    prototype.params = params;
    Ok(prototype)
}

fn resolve_param(data: &ParamData, file: &Path, name: &str) -> Result<EventParam, DataLoadError> {
    Ok(match data {
        ParamData::Bool(v) => EventParam::Bool(*v),
        ParamData::Int(v) => EventParam::Int(*v),
        ParamData::Number(v) => {
            let n = Fixed64::checked_from_num(*v).ok_or_else(|| DataLoadError::Invalid {
                file: file.to_path_buf(),
                name: name.to_string(),
                detail: format!("parameter {v} is out of range"),
            })?;
            EventParam::Number(n)
        }
        ParamData::Text(v) => EventParam::Text(v.clone()),
    })
}

/// Resolve a `NodeData` into a `Pluggable`.
pub fn resolve_node(data: &NodeData, file: &Path) -> Result<Pluggable, DataLoadError> {
    let name = data.name.as_str();

    let producer = to_fixed_opt(data.output_rate, file, name, "output_rate")?
        .map(|output_rate| Producer { output_rate });

    let consumer = match to_fixed_opt(data.input_rate, file, name, "input_rate")? {
        Some(input_rate) => Some(Consumer {
            input_rate,
            min_availability: to_fixed_opt(data.min_availability, file, name, "min_availability")?,
        }),
        None => None,
    };

    let storage = match to_fixed_opt(data.capacity, file, name, "capacity")? {
        Some(capacity) => {
            let stored = to_fixed_opt(data.stored, file, name, "stored")?.unwrap_or(Fixed64::ZERO);
            Some(Storage {
                capacity,
                stored: stored.min(capacity),
                charge_rate: to_fixed_opt(data.charge_rate, file, name, "charge_rate")?,
                discharge_rate: to_fixed_opt(data.discharge_rate, file, name, "discharge_rate")?,
            })
        }
        None => None,
    };

    Ok(Pluggable {
        producer,
        consumer,
        storage,
        passthrough: data.passthrough,
        resource: data.resource.clone(),
    })
}

/// Resolve per-network settings on top of the network defaults.
pub fn resolve_network_config(
    data: &NetworkConfigData,
    file: &Path,
) -> Result<NetworkConfig, DataLoadError> {
    let defaults = NetworkConfig::default();
    Ok(NetworkConfig {
        powered_threshold: to_fixed_opt(data.powered_threshold, file, &data.name, "powered_threshold")?
            .unwrap_or(defaults.powered_threshold),
        tick_interval: to_fixed_opt(data.tick_interval, file, &data.name, "tick_interval")?
            .unwrap_or(defaults.tick_interval),
    })
}

pub fn resolve_scheduler_config(data: &SchedulerConfigData) -> SchedulerConfig {
    SchedulerConfig {
        overflow: match data.overflow {
            OverflowData::Discard => OverflowPolicy::Discard,
            OverflowData::Carry => OverflowPolicy::Carry,
        },
        ..SchedulerConfig::default()
    }
}

// ===========================================================================
// Loading pipeline
// ===========================================================================

/// Everything loaded from a data directory.
#[derive(Debug, Clone, Default)]
pub struct GameData {
    pub prototypes: PrototypeRegistry,
    /// Node prototypes by name.
    pub nodes: BTreeMap<String, Pluggable>,
    pub scheduler: SchedulerConfig,
    /// Network settings by network name.
    pub networks: BTreeMap<String, NetworkConfig>,
}

/// Load a data directory.
///
/// `events.*` is required; `nodes.*` and `config.*` are optional. Duplicate
/// names within a file are rejected.
pub fn load_game_data(dir: &Path) -> Result<GameData, DataLoadError> {
    let mut data = GameData::default();

    let events_path = require_data_file(dir, "events")?;
    let events: Vec<EventData> = deserialize_list(&events_path, "events")?;
    let mut seen = BTreeSet::new();
    for event in &events {
        check_duplicate(&mut seen, &event.name, &events_path)?;
        data.prototypes.insert(resolve_event(event, &events_path)?);
    }

    if let Some(nodes_path) = find_data_file(dir, "nodes")? {
        let nodes: Vec<NodeData> = deserialize_list(&nodes_path, "nodes")?;
        let mut seen = BTreeSet::new();
        for node in &nodes {
            check_duplicate(&mut seen, &node.name, &nodes_path)?;
            data.nodes
                .insert(node.name.clone(), resolve_node(node, &nodes_path)?);
        }
    }

    if let Some(config_path) = find_data_file(dir, "config")? {
        let config: ConfigData = deserialize_file(&config_path)?;
        data.scheduler = resolve_scheduler_config(&config.scheduler);
        let mut seen = BTreeSet::new();
        for network in &config.networks {
            check_duplicate(&mut seen, &network.name, &config_path)?;
            data.networks.insert(
                network.name.clone(),
                resolve_network_config(network, &config_path)?,
            );
        }
    }

    debug!(
        events = data.prototypes.len(),
        nodes = data.nodes.len(),
        networks = data.networks.len(),
        dir = %dir.display(),
        "game data loaded"
    );
    Ok(data)
}

// ===========================================================================
// Tests
// ===========================================================================
