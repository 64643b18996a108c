// src/config/mod.rs

//! Configuration loading and validation for planexec.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file (and plan files) from disk (`loader.rs`).
//! - Validate values and parse durations (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default, load_plan_spec};
pub use model::{ConfigFile, RawConfigFile, RemoteSettings, SchedulerSection};
pub use validate::{parse_duration, validate_config};
