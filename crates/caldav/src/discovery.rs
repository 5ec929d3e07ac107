//! Endpoint and resource URL helpers.
//!
//! iCloud answers discovery on `caldav.icloud.com` and then hands out
//! absolute or host-relative hrefs on a per-account `pNN-caldav` host.

use url::Url;

use crate::error::{Error, Result};

pub use calbridge_config::ICLOUD_CALDAV_URL;

/// Parse the configured base URL. Only `http` and `https` are accepted.
pub fn normalize_base_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim();
    let url = Url::parse(trimmed)
        .map_err(|e| Error::configuration(format!("invalid CalDAV URL \"{trimmed}\": {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::configuration(format!(
            "unsupported CalDAV URL scheme \"{other}\""
        ))),
    }
}

/// Resolve an href from a multistatus body against the URL it came from.
pub fn resolve_href(base: &Url, href: &str) -> Result<Url> {
    base.join(href.trim())
        .map_err(|e| Error::message(format!("server returned an invalid href \"{href}\": {e}")))
}

/// Resource URL for a new event with `uid` inside `calendar_url`.
#[must_use]
pub fn event_url(calendar_url: &str, uid: &str) -> String {
    let base = calendar_url.trim_end_matches('/');
    format!("{base}/{}.ics", urlencoding::encode(uid))
}

/// Best-effort UID recovery from a resource URL (`.../<uid>.ics`).
#[must_use]
pub fn uid_from_event_url(event_url: &str) -> Option<String> {
    let path = event_url.split(['?', '#']).next().unwrap_or_default();
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    let stem = segment.strip_suffix(".ics").unwrap_or(segment);
    if stem.is_empty() {
        return None;
    }
    let decoded = urlencoding::decode(stem).map_or_else(|_| stem.to_string(), |s| s.into_owned());
    Some(decoded)
}
