//! Data-driven content for the outpost simulation.
//!
//! Loads event prototypes, node prototypes, and scheduler/network settings
//! from RON, JSON, or TOML files in a data directory.

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, GameData, load_game_data};
