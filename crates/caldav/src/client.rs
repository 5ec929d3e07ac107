//! CalDAV client trait and reqwest-backed implementation.

use std::{sync::Arc, time::Duration};

use {
    async_trait::async_trait,
    reqwest::{Method, Response, StatusCode, header},
    secrecy::{ExposeSecret, Secret},
    tracing::{debug, info},
    url::Url,
};

use crate::{
    discovery::{normalize_base_url, resolve_href},
    error::{Error, Result},
    types::{CalendarInfo, CalendarObject, TimeRange},
    xml,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const ERROR_BODY_LIMIT: usize = 300;

/// Raw CalDAV operations against one account.
///
/// This allows mocking in tests without a real server.
#[async_trait]
pub trait CalDavClient: Send + Sync {
    /// Account the client is authenticated as.
    fn account(&self) -> &str;

    /// Endpoint discovery started from.
    fn server_url(&self) -> &str;

    /// Calendar collections that can hold events.
    async fn list_calendars(&self) -> Result<Vec<CalendarInfo>>;

    /// Objects in `calendar_url` with an instance overlapping `range`.
    async fn query_events(
        &self,
        calendar_url: &str,
        range: &TimeRange,
    ) -> Result<Vec<CalendarObject>>;

    /// Object in `calendar_url` whose VEVENT has exactly this UID.
    async fn find_by_uid(&self, calendar_url: &str, uid: &str) -> Result<Option<CalendarObject>>;

    /// GET a single object; `None` when the server has no such resource.
    async fn fetch(&self, url: &str) -> Result<Option<CalendarObject>>;

    /// Store a new object. Fails if the URL is already taken.
    async fn create(&self, url: &str, ics: &str) -> Result<Option<String>>;

    /// Replace an object, guarded by `etag` when known.
    async fn update(&self, url: &str, ics: &str, etag: Option<&str>) -> Result<Option<String>>;

    /// Remove an object. Returns `false` if it was already gone.
    async fn delete(&self, url: &str) -> Result<bool>;
}

/// Thread-safe shared CalDAV client.
pub type SharedCalDavClient = Arc<dyn CalDavClient>;

/// CalDAV over HTTP Basic auth, with the calendar home discovered on
/// connect.
///
/// Credentials are only ever sent to the configured server and the
/// calendar home's origin; other URLs are refused before any request.
pub struct HttpCalDavClient {
    http: reqwest::Client,
    base: Url,
    username: String,
    password: Secret<String>,
    calendar_home: Url,
}

impl std::fmt::Debug for HttpCalDavClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpCalDavClient")
            .field("base", &self.base.as_str())
            .field("username", &self.username)
            .field("password", &"[REDACTED]")
            .field("calendar_home", &self.calendar_home.as_str())
            .finish()
    }
}

impl HttpCalDavClient {
    /// Authenticate and locate the calendar home.
    ///
    /// Follows `current-user-principal` then `calendar-home-set`, resolving
    /// each href against the URL the previous answer came from.
    pub async fn connect(base_url: &str, username: &str, password: &Secret<String>) -> Result<Self> {
        let base = normalize_base_url(base_url)?;
        let http = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::limited(10))
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("calbridge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::configuration(format!("failed to create HTTP client: {e}")))?;

        let mut client = Self {
            http,
            base: base.clone(),
            username: username.to_string(),
            password: password.clone(),
            calendar_home: base.clone(),
        };

        let (origin, body) = client
            .propfind(&base, "0", xml::CURRENT_USER_PRINCIPAL)
            .await?;
        let principal = match xml::parse_href_prop(&body, "current-user-principal")? {
            Some(href) => resolve_href(&origin, &href)?,
            None => origin,
        };
        debug!(principal = %principal, "resolved CalDAV principal");

        let (origin, body) = client
            .propfind(&principal, "0", xml::CALENDAR_HOME_SET)
            .await?;
        let href = xml::parse_href_prop(&body, "calendar-home-set")?.ok_or_else(|| {
            Error::connection(format!(
                "{} did not report a calendar home for this account",
                client.base
            ))
        })?;
        client.calendar_home = resolve_href(&origin, &href)?;

        info!(
            account = %client.username,
            home = %client.calendar_home,
            "connected to CalDAV server"
        );
        Ok(client)
    }

    /// Parse a caller-supplied URL and make sure it belongs to this account's
    /// server before credentials are attached to it.
    fn scoped_url(&self, raw: &str) -> Result<Url> {
        let url = parse_url(raw)?;
        let origin = url.origin();
        if origin == self.calendar_home.origin() || origin == self.base.origin() {
            return Ok(url);
        }
        Err(Error::validation(format!(
            "refusing {raw}: it is not on the calendar server {}",
            self.calendar_home.origin().ascii_serialization()
        )))
    }

    fn request(&self, method: Method, url: Url) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.username, Some(self.password.expose_secret()))
    }

    async fn propfind(&self, url: &Url, depth: &str, body: &'static str) -> Result<(Url, String)> {
        self.multistatus(dav_method(b"PROPFIND")?, url, depth, body.to_string())
            .await
    }

    async fn report(&self, url: &Url, body: String) -> Result<(Url, String)> {
        self.multistatus(dav_method(b"REPORT")?, url, "1", body).await
    }

    /// Send a WebDAV request and return the final URL with the body.
    async fn multistatus(
        &self,
        method: Method,
        url: &Url,
        depth: &str,
        body: String,
    ) -> Result<(Url, String)> {
        let response = self
            .request(method, url.clone())
            .header(header::CONTENT_TYPE, "application/xml; charset=utf-8")
            .header("Depth", depth)
            .body(body)
            .send()
            .await?;
        let response = check_status(response).await?;
        let origin = response.url().clone();
        Ok((origin, response.text().await?))
    }

    fn objects_from(&self, origin: &Url, body: &str) -> Result<Vec<CalendarObject>> {
        xml::parse_calendar_objects(body)?
            .into_iter()
            .map(|entry| {
                Ok(CalendarObject {
                    url: resolve_href(origin, &entry.href)?.to_string(),
                    etag: entry.etag,
                    data: entry.data,
                })
            })
            .collect()
    }

    async fn put(
        &self,
        url: &str,
        ics: &str,
        (name, value): (header::HeaderName, &str),
    ) -> Result<Option<String>> {
        let response = self
            .request(Method::PUT, self.scoped_url(url)?)
            .header(header::CONTENT_TYPE, "text/calendar; charset=utf-8")
            .header(name, value)
            .body(ics.to_string())
            .send()
            .await?;
        if response.status() == StatusCode::PRECONDITION_FAILED {
            return Err(Error::remote(
                412,
                format!("{url} already exists or was changed on the server; fetch it again and retry"),
            ));
        }
        let response = check_status(response).await?;
        Ok(etag_of(&response))
    }
}

#[async_trait]
impl CalDavClient for HttpCalDavClient {
    fn account(&self) -> &str {
        &self.username
    }

    fn server_url(&self) -> &str {
        self.base.as_str()
    }

    async fn list_calendars(&self) -> Result<Vec<CalendarInfo>> {
        let (origin, body) = self
            .propfind(&self.calendar_home, "1", xml::LIST_CALENDARS)
            .await?;
        xml::parse_calendar_collections(&body)?
            .into_iter()
            .map(|entry| {
                let url = resolve_href(&origin, &entry.href)?;
                let name = entry.display_name.unwrap_or_else(|| {
                    url.path_segments()
                        .and_then(|s| s.filter(|p| !p.is_empty()).next_back())
                        .unwrap_or("Calendar")
                        .to_string()
                });
                Ok(CalendarInfo {
                    name,
                    url: url.to_string(),
                })
            })
            .collect()
    }

    async fn query_events(
        &self,
        calendar_url: &str,
        range: &TimeRange,
    ) -> Result<Vec<CalendarObject>> {
        let (origin, body) = self
            .report(&self.scoped_url(calendar_url)?, xml::events_in_range(range))
            .await?;
        self.objects_from(&origin, &body)
    }

    async fn find_by_uid(&self, calendar_url: &str, uid: &str) -> Result<Option<CalendarObject>> {
        let (origin, body) = self
            .report(&self.scoped_url(calendar_url)?, xml::event_by_uid(uid))
            .await?;
        Ok(self.objects_from(&origin, &body)?.into_iter().next())
    }

    async fn fetch(&self, url: &str) -> Result<Option<CalendarObject>> {
        let response = self.request(Method::GET, self.scoped_url(url)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(response).await?;
        let etag = etag_of(&response);
        let url = response.url().to_string();
        Ok(Some(CalendarObject {
            url,
            etag,
            data: response.text().await?,
        }))
    }

    async fn create(&self, url: &str, ics: &str) -> Result<Option<String>> {
        self.put(url, ics, (header::IF_NONE_MATCH, "*")).await
    }

    async fn update(&self, url: &str, ics: &str, etag: Option<&str>) -> Result<Option<String>> {
        match etag {
            Some(tag) => self.put(url, ics, (header::IF_MATCH, tag)).await,
            None => {
                let response = self
                    .request(Method::PUT, self.scoped_url(url)?)
                    .header(header::CONTENT_TYPE, "text/calendar; charset=utf-8")
                    .body(ics.to_string())
                    .send()
                    .await?;
                let response = check_status(response).await?;
                Ok(etag_of(&response))
            },
        }
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        let response = self.request(Method::DELETE, self.scoped_url(url)?).send().await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        check_status(response).await?;
        Ok(true)
    }
}

fn dav_method(name: &[u8]) -> Result<Method> {
    Method::from_bytes(name).map_err(|e| Error::message(format!("invalid HTTP method: {e}")))
}

fn parse_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw.trim())
        .map_err(|e| Error::validation(format!("invalid event or calendar URL \"{raw}\": {e}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Error::validation(format!("unsupported URL scheme \"{other}\""))),
    }
}

fn etag_of(response: &Response) -> Option<String> {
    response
        .headers()
        .get(header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

/// Map non-success statuses to typed errors.
async fn check_status(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let host = response.url().host_str().unwrap_or_default().to_string();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::connection(format!(
            "authentication rejected by {host} (HTTP {}). Check ICLOUD_EMAIL and use an \
             app-specific password from appleid.apple.com for ICLOUD_PASSWORD",
            status.as_u16()
        ))),
        StatusCode::NOT_FOUND => Err(Error::not_found(format!(
            "{} does not exist on the server",
            response.url()
        ))),
        _ => {
            let body = response.text().await.unwrap_or_default();
            Err(Error::remote(status.as_u16(), truncate(body.trim(), ERROR_BODY_LIMIT)))
        },
    }
}

fn truncate(s: &str, max: usize) -> String {
    if s.len() <= max {
        return s.to_string();
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &s[..end])
}
