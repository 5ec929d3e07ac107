/// Config schema types (server, CalDAV account).
use {
    secrecy::{ExposeSecret, Secret},
    serde::{Deserialize, Serialize},
};

/// Well-known CalDAV base URL for iCloud.
/// Requires an app-specific password.
pub const ICLOUD_CALDAV_URL: &str = "https://caldav.icloud.com";

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalBridgeConfig {
    pub server: ServerConfig,
    pub caldav: CalDavConfig,
    /// Free-form deployment label reported by `get_server_info`.
    pub environment: String,
}

impl Default for CalBridgeConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            caldav: CalDavConfig::default(),
            environment: "development".into(),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to bind to. Defaults to "0.0.0.0".
    pub bind: String,
    /// Port to listen on. Defaults to 8000.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".into(),
            port: 8000,
        }
    }
}

/// The single calendar account this server talks to.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalDavConfig {
    /// CalDAV base URL. Discovery of the principal and calendar home
    /// starts here.
    pub url: String,
    /// Account login (the Apple ID email for iCloud).
    pub username: Option<String>,
    /// App-specific password.
    #[serde(
        default,
        serialize_with = "serialize_option_secret",
        skip_serializing_if = "Option::is_none"
    )]
    pub password: Option<Secret<String>>,
    /// IANA timezone applied to inputs and floating server values that
    /// carry no offset.
    pub default_timezone: String,
}

impl CalDavConfig {
    /// Both halves of the credential pair are present and non-empty.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.username.as_deref().is_some_and(|u| !u.trim().is_empty())
            && self
                .password
                .as_ref()
                .is_some_and(|p| !p.expose_secret().is_empty())
    }
}

impl Default for CalDavConfig {
    fn default() -> Self {
        Self {
            url: ICLOUD_CALDAV_URL.into(),
            username: None,
            password: None,
            default_timezone: "UTC".into(),
        }
    }
}

impl std::fmt::Debug for CalDavConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CalDavConfig")
            .field("url", &self.url)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("default_timezone", &self.default_timezone)
            .finish()
    }
}

// ── Serde helpers for Secret<String> ────────────────────────────────────────

fn serialize_option_secret<S: serde::Serializer>(
    secret: &Option<Secret<String>>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match secret {
        Some(s) => serializer.serialize_some(s.expose_secret()),
        None => serializer.serialize_none(),
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_point_at_icloud() {
        let cfg = CalBridgeConfig::default();
        assert_eq!(cfg.caldav.url, ICLOUD_CALDAV_URL);
        assert_eq!(cfg.server.port, 8000);
        assert_eq!(cfg.server.bind, "0.0.0.0");
        assert_eq!(cfg.caldav.default_timezone, "UTC");
        assert!(!cfg.caldav.has_credentials());
    }

    #[test]
    fn debug_redacts_password() {
        let cfg = CalDavConfig {
            username: Some("me@icloud.com".into()),
            password: Some(Secret::new("abcd-efgh-ijkl-mnop".into())),
            ..Default::default()
        };
        let rendered = format!("{cfg:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("abcd-efgh"));
        assert!(cfg.has_credentials());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: CalBridgeConfig = toml::from_str(
            r#"
            [caldav]
            username = "me@icloud.com"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.caldav.username.as_deref(), Some("me@icloud.com"));
        assert_eq!(cfg.caldav.url, ICLOUD_CALDAV_URL);
        assert_eq!(cfg.environment, "development");
    }
}
