//! Scenario loading for the materials core.
//!
//! A scenario directory holds `materials.{ron,json,toml}` and, optionally,
//! `resources.{ron,json,toml}`. [`load_scenario`] reads both, resolves every
//! name into a typed id, and validates the result into a
//! [`materials_core::state::MaterialsState`].

pub mod loader;
pub mod schema;

pub use loader::{DataLoadError, Scenario, load_scenario};
