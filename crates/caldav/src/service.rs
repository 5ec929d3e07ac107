//! Calendar operations on top of a lazily connected [`CalDavClient`].

use std::sync::Arc;

use {
    calbridge_common::ErrorKind,
    calbridge_config::CalDavConfig,
    chrono::Utc,
    chrono_tz::Tz,
    secrecy::ExposeSecret,
    serde::Serialize,
    tokio::sync::RwLock,
    tracing::{debug, info, warn},
};

use crate::{
    client::{CalDavClient, HttpCalDavClient, SharedCalDavClient},
    discovery::{event_url, uid_from_event_url},
    error::{Error, Result},
    ical::{build_event_ics, check_order, merge_event_ics, parse_alarms, parse_event_ics},
    time::{
        min_reliable_range, parse_date_input, parse_datetime_input, parse_time_input,
        resolve_range, resolve_timezone,
    },
    types::{
        AlarmInfo, AlarmSpec, CalendarInfo, CalendarObject, CreateEventRequest, EventLocator,
        EventPatch, EventRecord, EventTime, ListEventsQuery, NewEvent, TimeRange,
        UpdateEventRequest,
    },
};

/// Returned with any update that asks for alarm changes.
pub const ALARM_UPDATE_NOTE: &str = "Alarm changes are not applied by in-place updates because \
     iCloud does not reliably persist them. To change alarms, read the event with \
     list_event_alarms, delete it with delete_my_event, then recreate it with create_my_event \
     passing alarm_configs.";

// ── Results ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub status: &'static str,
    pub email: String,
    pub server_url: String,
    pub calendars_found: usize,
    pub calendars: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct SkippedCalendar {
    pub calendar_name: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventList {
    pub events: Vec<EventRecord>,
    pub count: usize,
    pub date_range: TimeRange,
    pub timezone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_warning: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_calendars: Vec<SkippedCalendar>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreatedEvent {
    pub event_url: String,
    pub uid: String,
    pub calendar_name: String,
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    pub all_day: bool,
    pub alarms: Vec<AlarmSpec>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UpdatedEvent {
    pub event_url: String,
    pub uid: String,
    pub updated_fields: Vec<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alarm_note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeletedEvent {
    pub event_url: String,
    pub existed: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct EventAlarms {
    pub event_url: String,
    pub uid: String,
    pub alarms: Vec<AlarmInfo>,
    pub count: usize,
}

// ── Service ─────────────────────────────────────────────────────────────────

enum ClientSource {
    Config(CalDavConfig),
    Fixed(SharedCalDavClient),
}

/// Entry point for every calendar tool.
///
/// Holds at most one connection, established on first use and reused.
pub struct CalendarService {
    source: ClientSource,
    default_tz: Tz,
    client: RwLock<Option<SharedCalDavClient>>,
}

impl CalendarService {
    /// Service that connects with `config` on first use.
    pub fn new(config: CalDavConfig) -> Result<Self> {
        let default_tz = config.default_timezone.parse::<Tz>().map_err(|_| {
            Error::configuration(format!(
                "unknown default timezone \"{}\"",
                config.default_timezone
            ))
        })?;
        Ok(Self {
            source: ClientSource::Config(config),
            default_tz,
            client: RwLock::new(None),
        })
    }

    /// Service bound to an existing client.
    #[must_use]
    pub fn from_client(client: SharedCalDavClient, default_tz: Tz) -> Self {
        Self {
            source: ClientSource::Fixed(Arc::clone(&client)),
            default_tz,
            client: RwLock::new(Some(client)),
        }
    }

    #[must_use]
    pub fn default_timezone(&self) -> Tz {
        self.default_tz
    }

    async fn connect(&self) -> Result<SharedCalDavClient> {
        match &self.source {
            ClientSource::Fixed(client) => Ok(Arc::clone(client)),
            ClientSource::Config(config) => {
                let (Some(username), Some(password)) = (
                    config.username.as_deref().filter(|u| !u.trim().is_empty()),
                    config
                        .password
                        .as_ref()
                        .filter(|p| !p.expose_secret().is_empty()),
                ) else {
                    return Err(Error::configuration(
                        "ICLOUD_EMAIL and ICLOUD_PASSWORD must be set",
                    ));
                };
                let client = HttpCalDavClient::connect(&config.url, username, password).await?;
                Ok(Arc::new(client))
            },
        }
    }

    /// Shared connection, established on first call.
    async fn client(&self) -> Result<SharedCalDavClient> {
        if let Some(client) = self.client.read().await.as_ref() {
            return Ok(Arc::clone(client));
        }
        let mut slot = self.client.write().await;
        if let Some(client) = slot.as_ref() {
            return Ok(Arc::clone(client));
        }
        let client = self.connect().await?;
        *slot = Some(Arc::clone(&client));
        Ok(client)
    }

    /// Reconnect from scratch and report what the account looks like.
    pub async fn connection_status(&self) -> Result<ConnectionStatus> {
        let client = self.connect().await?;
        let calendars = client.list_calendars().await?;
        *self.client.write().await = Some(Arc::clone(&client));

        info!(
            account = client.account(),
            calendars = calendars.len(),
            "connection check succeeded"
        );
        Ok(ConnectionStatus {
            status: "connected",
            email: client.account().to_string(),
            server_url: client.server_url().to_string(),
            calendars_found: calendars.len(),
            calendars: calendars.into_iter().map(|c| c.name).collect(),
        })
    }

    pub async fn list_calendars(&self) -> Result<Vec<CalendarInfo>> {
        self.client().await?.list_calendars().await
    }

    /// Events overlapping the requested window, sorted by start.
    ///
    /// Without a calendar name every calendar is searched; one that fails is
    /// reported in `skipped_calendars` unless all of them fail.
    pub async fn list_events(&self, query: ListEventsQuery) -> Result<EventList> {
        let tz = resolve_timezone(query.timezone_name.as_deref(), self.default_tz)?;
        let range = resolve_range(query.start.as_deref(), query.end.as_deref(), tz, Utc::now())?;
        if query.limit == Some(0) {
            return Err(Error::validation("limit must be at least 1"));
        }
        let range_warning = (range.duration() < min_reliable_range()).then(|| {
            warn!(
                start = %range.start,
                end = %range.end,
                "event query window is shorter than two days"
            );
            format!(
                "The requested range is shorter than {} days; iCloud may omit events from \
                 narrow queries. Widen the range if results look incomplete.",
                min_reliable_range().num_days()
            )
        });

        let client = self.client().await?;
        let calendar_name = non_empty(query.calendar_name.as_deref());
        let calendars = self.target_calendars(client.as_ref(), calendar_name).await?;

        let mut events = Vec::new();
        let mut skipped = Vec::new();
        let mut first_error = None;
        for calendar in &calendars {
            match client.query_events(&calendar.url, &range).await {
                Ok(objects) => events.extend(
                    objects
                        .iter()
                        .filter_map(|obj| to_record(obj, Some(&calendar.name), tz)),
                ),
                Err(e) if calendar_name.is_none() && e.kind() != ErrorKind::Connection => {
                    warn!(calendar = %calendar.name, error = %e, "skipping calendar");
                    skipped.push(SkippedCalendar {
                        calendar_name: calendar.name.clone(),
                        error: e.to_string(),
                    });
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                },
                Err(e) => return Err(e),
            }
        }
        if skipped.len() == calendars.len()
            && let Some(e) = first_error
        {
            return Err(e);
        }

        events.sort_by(|a, b| {
            let key = |r: &EventRecord| r.start.map(|s| s.to_utc(tz));
            key(a).cmp(&key(b)).then_with(|| a.summary.cmp(&b.summary))
        });
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }

        debug!(count = events.len(), calendars = calendars.len(), "listed events");
        Ok(EventList {
            count: events.len(),
            events,
            date_range: range,
            timezone: tz.name().to_string(),
            range_warning,
            skipped_calendars: skipped,
        })
    }

    /// Validate and store a new event.
    pub async fn create_event(&self, req: CreateEventRequest) -> Result<CreatedEvent> {
        let summary = req.summary.trim();
        if summary.is_empty() {
            return Err(Error::validation("summary is required"));
        }
        let tz = resolve_timezone(req.timezone_name.as_deref(), self.default_tz)?;

        let (start, end) = if req.all_day {
            let start = parse_date_input("start", &req.start)?;
            let mut end = parse_date_input("end", &req.end)?;
            if end <= start {
                end = start
                    .succ_opt()
                    .ok_or_else(|| Error::validation("start date out of range"))?;
            }
            (EventTime::Date(start), EventTime::Date(end))
        } else {
            (
                EventTime::DateTime(parse_datetime_input("start", &req.start, tz)?),
                EventTime::DateTime(parse_datetime_input("end", &req.end, tz)?),
            )
        };
        check_order(&start, &end, tz)?;

        let event = NewEvent {
            summary: summary.to_string(),
            start,
            end,
            description: non_empty(req.description.as_deref()).map(str::to_string),
            location: non_empty(req.location.as_deref()).map(str::to_string),
            rrule: normalize_rrule(req.rrule.as_deref())?,
            alarms: requested_alarms(req.alarm_configs, req.alarm_minutes_before)?,
        };

        let client = self.client().await?;
        let calendars = client.list_calendars().await?;
        let calendar = match non_empty(req.calendar_name.as_deref()) {
            Some(name) => resolve_calendar(&calendars, name)?,
            None => calendars
                .into_iter()
                .next()
                .ok_or_else(|| Error::not_found("no calendars found on this account"))?,
        };

        let uid = format!("{}@calbridge", uuid::Uuid::new_v4());
        let url = event_url(&calendar.url, &uid);
        let ics = build_event_ics(&event, &uid, Utc::now());
        client.create(&url, &ics).await?;

        info!(
            uid = %uid,
            calendar = %calendar.name,
            alarms = event.alarms.len(),
            "created event"
        );
        Ok(CreatedEvent {
            event_url: url,
            uid,
            calendar_name: calendar.name,
            summary: event.summary,
            start: event.start,
            end: event.end,
            all_day: req.all_day,
            alarms: event.alarms,
        })
    }

    /// Patch an existing event in place. Alarms are left as stored.
    pub async fn update_event(&self, req: UpdateEventRequest) -> Result<UpdatedEvent> {
        let locator = req.locator();
        require_locator(&locator)?;
        let tz = resolve_timezone(req.timezone_name.as_deref(), self.default_tz)?;

        if req.summary.as_deref().is_some_and(|s| s.trim().is_empty()) {
            return Err(Error::validation("summary cannot be empty"));
        }
        let parse_opt = |field: &str, value: Option<&str>| {
            non_empty(value)
                .map(|v| parse_time_input(field, v, tz))
                .transpose()
        };
        let mut patch = EventPatch {
            summary: req.summary.as_deref().map(|s| s.trim().to_string()),
            start: parse_opt("start", req.start.as_deref())?,
            end: parse_opt("end", req.end.as_deref())?,
            description: req.description.clone(),
            location: req.location.clone(),
            rrule: match req.rrule.as_deref() {
                // Empty string drops recurrence.
                Some(rule) if rule.trim().is_empty() => Some(String::new()),
                rule => normalize_rrule(rule)?,
            },
        };
        if patch.field_names().is_empty() && req.alarm_minutes_before.is_none() {
            return Err(Error::validation(
                "nothing to update: provide at least one of summary, start, end, description, \
                 location or rrule",
            ));
        }
        let alarm_note = req.alarm_minutes_before.map(|minutes| {
            info!(minutes, "ignoring in-place alarm change");
            ALARM_UPDATE_NOTE.to_string()
        });

        let client = self.client().await?;
        let object = self.find_event(client.as_ref(), &locator).await?;
        let current = parse_event_ics(&object.data, tz)
            .ok_or_else(|| Error::message("stored event data could not be parsed"))?;

        // Bare dates patched onto a timed event stay timed.
        if current.start.is_some_and(|s| !s.is_date()) {
            patch.start = patch.start.map(|t| t.to_datetime(tz));
            patch.end = patch.end.map(|t| t.to_datetime(tz));
        }

        let updated_fields = patch.field_names();
        if !updated_fields.is_empty() {
            let merged = merge_event_ics(&object.data, &patch, tz, Utc::now())?;
            client
                .update(&object.url, &merged, object.etag.as_deref())
                .await?;
            info!(uid = %current.uid, fields = ?updated_fields, "updated event");
        }

        Ok(UpdatedEvent {
            event_url: object.url,
            uid: current.uid,
            updated_fields,
            alarm_note,
        })
    }

    /// Delete by URL. A resource that is already gone is not an error.
    pub async fn delete_event(&self, url: &str) -> Result<DeletedEvent> {
        let url = non_empty(Some(url)).ok_or_else(|| Error::validation("event_url is required"))?;
        let client = self.client().await?;
        let existed = client.delete(url).await?;
        if existed {
            info!(url, "deleted event");
        } else {
            debug!(url, "event was already gone");
        }
        Ok(DeletedEvent {
            event_url: url.to_string(),
            existed,
        })
    }

    pub async fn list_alarms(&self, locator: EventLocator) -> Result<EventAlarms> {
        require_locator(&locator)?;
        let client = self.client().await?;
        let object = self.find_event(client.as_ref(), &locator).await?;
        let uid = parse_event_ics(&object.data, self.default_tz)
            .map(|e| e.uid)
            .unwrap_or_default();
        let alarms = parse_alarms(&object.data);
        Ok(EventAlarms {
            event_url: object.url,
            uid,
            count: alarms.len(),
            alarms,
        })
    }

    async fn target_calendars(
        &self,
        client: &dyn CalDavClient,
        name: Option<&str>,
    ) -> Result<Vec<CalendarInfo>> {
        let calendars = client.list_calendars().await?;
        if calendars.is_empty() {
            return Err(Error::not_found("no calendars found on this account"));
        }
        match name {
            Some(name) => Ok(vec![resolve_calendar(&calendars, name)?]),
            None => Ok(calendars),
        }
    }

    /// Locate an event by UID (given or derived from the URL), then by a
    /// direct fetch of the URL.
    async fn find_event(
        &self,
        client: &dyn CalDavClient,
        locator: &EventLocator,
    ) -> Result<CalendarObject> {
        let url = non_empty(locator.event_url.as_deref());
        let mut uids: Vec<String> = non_empty(locator.uid.as_deref())
            .map(str::to_string)
            .into_iter()
            .collect();
        if let Some(derived) = url.and_then(uid_from_event_url)
            && !uids.contains(&derived)
        {
            uids.push(derived);
        }

        if !uids.is_empty() {
            let calendars = self
                .target_calendars(client, non_empty(locator.calendar_name.as_deref()))
                .await?;
            for uid in &uids {
                for calendar in &calendars {
                    match client.find_by_uid(&calendar.url, uid).await {
                        Ok(Some(object)) => return Ok(object),
                        Ok(None) => {},
                        Err(e) if e.kind() == ErrorKind::Connection => return Err(e),
                        Err(e) => {
                            debug!(calendar = %calendar.name, uid = %uid, error = %e, "uid lookup failed");
                        },
                    }
                }
            }
        }

        if let Some(url) = url
            && let Some(object) = client.fetch(url).await?
        {
            return Ok(object);
        }

        Err(Error::not_found(match (url, locator.uid.as_deref()) {
            (Some(url), _) => format!("event not found at {url}"),
            (None, Some(uid)) => format!("no event with uid \"{}\"", uid.trim()),
            (None, None) => "event not found".to_string(),
        }))
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn require_locator(locator: &EventLocator) -> Result<()> {
    if non_empty(locator.event_url.as_deref()).is_none() && non_empty(locator.uid.as_deref()).is_none()
    {
        return Err(Error::validation(
            "provide either event_url or uid to identify the event",
        ));
    }
    Ok(())
}

/// Case-insensitive display-name match; first hit wins.
fn resolve_calendar(calendars: &[CalendarInfo], name: &str) -> Result<CalendarInfo> {
    let wanted = name.trim();
    calendars
        .iter()
        .find(|c| c.name.trim().eq_ignore_ascii_case(wanted))
        .cloned()
        .ok_or_else(|| {
            let available: Vec<&str> = calendars.iter().map(|c| c.name.as_str()).collect();
            Error::not_found(format!(
                "calendar \"{wanted}\" not found. Available calendars: {}",
                available.join(", ")
            ))
        })
}

fn to_record(object: &CalendarObject, calendar_name: Option<&str>, tz: Tz) -> Option<EventRecord> {
    let Some(event) = parse_event_ics(&object.data, tz) else {
        debug!(url = %object.url, "skipping unparseable calendar object");
        return None;
    };
    Some(EventRecord {
        url: object.url.clone(),
        uid: event.uid,
        summary: event.summary.unwrap_or_default(),
        description: event.description,
        location: event.location,
        all_day: event.start.is_some_and(|s| s.is_date()),
        start: event.start.map(|s| s.in_timezone(tz)),
        end: event.end.map(|e| e.in_timezone(tz)),
        calendar_name: calendar_name.map(str::to_string),
        rrule: event.rrule,
        alarms: event.alarms,
    })
}

/// Longest lead time accepted for an alarm: one year.
pub(crate) const MAX_ALARM_MINUTES: i64 = 366 * 24 * 60;

/// `alarm_configs` wins over `alarm_minutes_before`.
fn requested_alarms(configs: Option<Vec<AlarmSpec>>, minutes: Option<i64>) -> Result<Vec<AlarmSpec>> {
    let alarms = match (configs, minutes) {
        (Some(configs), _) => configs,
        (None, Some(minutes)) => vec![AlarmSpec::reminder(minutes)],
        (None, None) => Vec::new(),
    };
    alarms
        .into_iter()
        .map(|mut alarm| {
            if !(0..=MAX_ALARM_MINUTES).contains(&alarm.minutes_before) {
                return Err(Error::validation(format!(
                    "alarm minutes_before must be between 0 and {MAX_ALARM_MINUTES}, got {}",
                    alarm.minutes_before
                )));
            }
            alarm.action = alarm.action.trim().to_ascii_uppercase();
            if alarm.action.is_empty() {
                alarm.action = "DISPLAY".into();
            }
            Ok(alarm)
        })
        .collect()
}

/// Accepts `FREQ=...` with or without an `RRULE:` prefix.
fn normalize_rrule(raw: Option<&str>) -> Result<Option<String>> {
    let Some(rule) = non_empty(raw) else {
        return Ok(None);
    };
    let upper = rule.to_ascii_uppercase();
    let rule = upper.strip_prefix("RRULE:").unwrap_or(&upper).trim();
    if !rule.split(';').any(|part| part.starts_with("FREQ=")) {
        return Err(Error::validation(format!(
            "rrule \"{rule}\" must contain a FREQ part, e.g. FREQ=WEEKLY;BYDAY=MO"
        )));
    }
    Ok(Some(rule.to_string()))
}
