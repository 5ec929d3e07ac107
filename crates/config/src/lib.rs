//! Configuration loading, validation, and environment overrides.
//!
//! Config files: `calbridge.toml`, `calbridge.yaml`, or `calbridge.json`
//! Searched in `./` then `~/.config/calbridge/`.
//!
//! Supports `${ENV_VAR}` substitution in all string values. The
//! `ICLOUD_EMAIL` / `ICLOUD_PASSWORD` variables always win over file values.

pub mod env_subst;
pub mod loader;
pub mod schema;
pub mod validate;

pub use {
    loader::{apply_env_overrides, config_dir, discover_and_load, load_config},
    schema::{CalBridgeConfig, CalDavConfig, ICLOUD_CALDAV_URL, ServerConfig},
    validate::{Diagnostic, Severity, ValidationResult, validate, validate_effective},
};
