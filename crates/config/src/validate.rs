//! Configuration validation.
//!
//! Two passes: a structural pass over the raw file (syntax, unknown or
//! misspelled fields) and a semantic pass over the effective config after
//! environment overrides (credentials, endpoint, timezone).

use std::{collections::HashMap, path::Path};

use secrecy::ExposeSecret;

use crate::schema::CalBridgeConfig;

/// Severity level for a diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Error => write!(f, "error"),
            Self::Warning => write!(f, "warning"),
            Self::Info => write!(f, "info"),
        }
    }
}

/// A single validation diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub severity: Severity,
    /// Category: "syntax", "unknown-field", "type-error", "credentials",
    /// "endpoint", "security", "timezone", "file-ref"
    pub category: &'static str,
    /// Dotted path, e.g. "caldav.url"
    pub path: String,
    pub message: String,
}

/// Result of validating a configuration.
#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub diagnostics: Vec<Diagnostic>,
    pub config_path: Option<std::path::PathBuf>,
}

impl ValidationResult {
    /// Returns `true` if any diagnostic is an error.
    #[must_use]
    pub fn has_errors(&self) -> bool {
        self.diagnostics
            .iter()
            .any(|d| d.severity == Severity::Error)
    }

    /// Count diagnostics by severity.
    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == severity)
            .count()
    }
}

// ── Schema tree for unknown-field detection ─────────────────────────────────

enum KnownKeys {
    Struct(HashMap<&'static str, KnownKeys>),
    Leaf,
}

fn build_schema_map() -> KnownKeys {
    use KnownKeys::{Leaf, Struct};

    Struct(HashMap::from([
        ("environment", Leaf),
        ("server", Struct(HashMap::from([("bind", Leaf), ("port", Leaf)]))),
        (
            "caldav",
            Struct(HashMap::from([
                ("url", Leaf),
                ("username", Leaf),
                ("password", Leaf),
                ("default_timezone", Leaf),
            ])),
        ),
    ]))
}

// ── Levenshtein distance ────────────────────────────────────────────────────

fn levenshtein(a: &str, b: &str) -> usize {
    let b_len = b.chars().count();
    if a.is_empty() {
        return b_len;
    }

    let mut prev: Vec<usize> = (0..=b_len).collect();
    let mut curr = vec![0; b_len + 1];

    for (i, ca) in a.chars().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.chars().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }
    prev[b_len]
}

fn suggest<'a>(needle: &str, candidates: &[&'a str], max_distance: usize) -> Option<&'a str> {
    candidates
        .iter()
        .map(|&c| (c, levenshtein(needle, c)))
        .filter(|&(_, d)| d > 0 && d <= max_distance)
        .min_by_key(|&(_, d)| d)
        .map(|(c, _)| c)
}

// ── Structural validation ───────────────────────────────────────────────────

/// Validate a config file at the given path, or the discovered one if
/// `path` is `None`.
#[must_use]
pub fn validate(path: Option<&Path>) -> ValidationResult {
    let config_path = path
        .map(Path::to_path_buf)
        .or_else(crate::loader::find_config_file);

    let Some(ref actual_path) = config_path else {
        return ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Info,
                category: "file-ref",
                path: String::new(),
                message: "no config file found; using defaults and environment".into(),
            }],
            config_path: None,
        };
    };

    let ext = actual_path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("toml");

    let mut result = match std::fs::read_to_string(actual_path) {
        Ok(content) if ext == "toml" => validate_toml_str(&content),
        Ok(_) => ValidationResult::default(),
        Err(e) => ValidationResult {
            diagnostics: vec![Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("failed to read config file: {e}"),
            }],
            config_path: None,
        },
    };
    result.config_path = Some(actual_path.clone());
    result
}

/// Validate a TOML document without touching the file system.
#[must_use]
pub fn validate_toml_str(toml_str: &str) -> ValidationResult {
    let mut diagnostics = Vec::new();

    let toml_value: toml::Value = match toml::from_str(toml_str) {
        Ok(v) => v,
        Err(e) => {
            diagnostics.push(Diagnostic {
                severity: Severity::Error,
                category: "syntax",
                path: String::new(),
                message: format!("TOML syntax error: {e}"),
            });
            return ValidationResult {
                diagnostics,
                config_path: None,
            };
        },
    };

    check_unknown_fields(&toml_value, &build_schema_map(), "", &mut diagnostics);

    if let Err(e) = toml::from_str::<CalBridgeConfig>(toml_str) {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "type-error",
            path: String::new(),
            message: format!("type error: {e}"),
        });
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}

fn check_unknown_fields(
    value: &toml::Value,
    schema: &KnownKeys,
    prefix: &str,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let (toml::Value::Table(table), KnownKeys::Struct(fields)) = (value, schema) else {
        return;
    };

    let known_keys: Vec<&str> = fields.keys().copied().collect();
    for (key, child_value) in table {
        let path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        if let Some(child_schema) = fields.get(key.as_str()) {
            check_unknown_fields(child_value, child_schema, &path, diagnostics);
            continue;
        }
        let message = match suggest(key, &known_keys, 3) {
            Some(s) => format!("unknown field (did you mean \"{s}\"?)"),
            None => "unknown field".to_string(),
        };
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "unknown-field",
            path,
            message,
        });
    }
}

// ── Semantic validation ─────────────────────────────────────────────────────

/// Check the effective configuration (file + environment overrides).
#[must_use]
pub fn validate_effective(config: &CalBridgeConfig) -> ValidationResult {
    let mut diagnostics = Vec::new();
    let caldav = &config.caldav;

    if caldav.username.as_deref().is_none_or(|u| u.trim().is_empty()) {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "credentials",
            path: "caldav.username".into(),
            message: "account email is not set (ICLOUD_EMAIL)".into(),
        });
    }
    if caldav
        .password
        .as_ref()
        .is_none_or(|p| p.expose_secret().is_empty())
    {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "credentials",
            path: "caldav.password".into(),
            message: "app-specific password is not set (ICLOUD_PASSWORD)".into(),
        });
    }

    match url::Url::parse(&caldav.url) {
        Ok(u) if u.scheme() == "https" => {},
        Ok(u) if u.scheme() == "http" => diagnostics.push(Diagnostic {
            severity: Severity::Warning,
            category: "security",
            path: "caldav.url".into(),
            message: "credentials will be sent over plain HTTP".into(),
        }),
        Ok(u) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "endpoint",
            path: "caldav.url".into(),
            message: format!("unsupported URL scheme \"{}\"", u.scheme()),
        }),
        Err(e) => diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "endpoint",
            path: "caldav.url".into(),
            message: format!("invalid URL: {e}"),
        }),
    }

    if caldav.default_timezone.parse::<chrono_tz::Tz>().is_err() {
        diagnostics.push(Diagnostic {
            severity: Severity::Error,
            category: "timezone",
            path: "caldav.default_timezone".into(),
            message: format!("unknown IANA timezone \"{}\"", caldav.default_timezone),
        });
    }

    ValidationResult {
        diagnostics,
        config_path: None,
    }
}
