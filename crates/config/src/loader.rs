use std::path::{Path, PathBuf};

use {
    secrecy::Secret,
    tracing::{debug, warn},
};

use crate::{env_subst::substitute_env, schema::CalBridgeConfig};

/// Standard config file names, checked in order.
const CONFIG_FILENAMES: &[&str] = &[
    "calbridge.toml",
    "calbridge.yaml",
    "calbridge.yml",
    "calbridge.json",
];

/// Load config from the given path (any supported format).
pub fn load_config(path: &Path) -> anyhow::Result<CalBridgeConfig> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow::anyhow!("failed to read {}: {e}", path.display()))?;
    let raw = substitute_env(&raw);
    parse_config(&raw, path)
}

/// Discover and load config from standard locations.
///
/// Search order:
/// 1. `./calbridge.{toml,yaml,yml,json}` (project-local)
/// 2. `~/.config/calbridge/calbridge.{toml,yaml,yml,json}` (user-global)
///
/// Returns `CalBridgeConfig::default()` if no config file is found. The
/// result has not had environment overrides applied yet.
pub fn discover_and_load() -> CalBridgeConfig {
    if let Some(path) = find_config_file() {
        debug!(path = %path.display(), "loading config");
        match load_config(&path) {
            Ok(cfg) => return cfg,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to load config, using defaults");
            },
        }
    } else {
        debug!("no config file found, using defaults");
    }
    CalBridgeConfig::default()
}

/// Find the first config file in standard locations.
pub(crate) fn find_config_file() -> Option<PathBuf> {
    CONFIG_FILENAMES
        .iter()
        .map(PathBuf::from)
        .chain(
            config_dir()
                .into_iter()
                .flat_map(|dir| CONFIG_FILENAMES.iter().map(move |name| dir.join(name))),
        )
        .find(|p| p.exists())
}

/// Returns the user-global config directory (`~/.config/calbridge/`).
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", "calbridge").map(|d| d.config_dir().to_path_buf())
}

/// Overlay process environment variables onto `config`.
pub fn apply_env_overrides(config: &mut CalBridgeConfig) {
    apply_env_overrides_with(config, |name| std::env::var(name).ok());
}

/// Overlay environment values using a custom lookup function.
///
/// Empty values are treated as unset.
pub(crate) fn apply_env_overrides_with(
    config: &mut CalBridgeConfig,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

    if let Some(email) = get("ICLOUD_EMAIL") {
        config.caldav.username = Some(email.trim().to_string());
    }
    if let Some(password) = get("ICLOUD_PASSWORD") {
        config.caldav.password = Some(Secret::new(password));
    }
    if let Some(url) = get("CALDAV_URL") {
        config.caldav.url = url;
    }
    if let Some(tz) = get("CALBRIDGE_DEFAULT_TIMEZONE") {
        config.caldav.default_timezone = tz;
    }
    if let Some(host) = get("HOST") {
        config.server.bind = host;
    }
    if let Some(port) = get("PORT") {
        match port.trim().parse::<u16>() {
            Ok(p) => config.server.port = p,
            Err(e) => warn!(value = %port, error = %e, "ignoring invalid PORT"),
        }
    }
    if let Some(env) = get("ENVIRONMENT") {
        config.environment = env;
    }
}

fn parse_config(raw: &str, path: &Path) -> anyhow::Result<CalBridgeConfig> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("toml");

    match ext {
        "toml" => Ok(toml::from_str(raw)?),
        "yaml" | "yml" => Ok(serde_yaml::from_str(raw)?),
        "json" => Ok(serde_json::from_str(raw)?),
        _ => anyhow::bail!("unsupported config format: .{ext}"),
    }
}
