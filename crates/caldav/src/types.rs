//! Typed structs for calendar operations.

use {
    chrono::{DateTime, FixedOffset, NaiveDate, TimeDelta, TimeZone, Utc},
    chrono_tz::Tz,
    serde::{Deserialize, Deserializer, Serialize, Serializer},
};

// ── Times ───────────────────────────────────────────────────────────────────

/// Start or end of an event: a calendar date for all-day events, an
/// instant with a UTC offset otherwise.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTime {
    Date(NaiveDate),
    DateTime(DateTime<FixedOffset>),
}

impl EventTime {
    #[must_use]
    pub fn is_date(&self) -> bool {
        matches!(self, Self::Date(_))
    }

    /// Instant used for ordering and range checks. Dates resolve to local
    /// midnight in `tz`.
    #[must_use]
    pub fn to_utc(&self, tz: Tz) -> DateTime<Utc> {
        match self {
            Self::Date(d) => midnight(*d, tz).with_timezone(&Utc),
            Self::DateTime(dt) => dt.with_timezone(&Utc),
        }
    }

    /// Timed variant; dates become local midnight in `tz`.
    #[must_use]
    pub fn to_datetime(self, tz: Tz) -> Self {
        match self {
            Self::Date(d) => Self::DateTime(midnight(d, tz)),
            other => other,
        }
    }

    /// Re-express a timed value in `tz`. Dates are left alone.
    #[must_use]
    pub fn in_timezone(self, tz: Tz) -> Self {
        match self {
            Self::DateTime(dt) => Self::DateTime(dt.with_timezone(&tz).fixed_offset()),
            date => date,
        }
    }

    /// `YYYY-MM-DD` for dates, RFC 3339 for date-times.
    #[must_use]
    pub fn to_iso(&self) -> String {
        match self {
            Self::Date(d) => d.format("%Y-%m-%d").to_string(),
            Self::DateTime(dt) => dt.to_rfc3339(),
        }
    }
}

impl Serialize for EventTime {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_iso())
    }
}

fn midnight(date: NaiveDate, tz: Tz) -> DateTime<FixedOffset> {
    let naive = date.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive))
        .fixed_offset()
}

/// Absolute window for event queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    #[must_use]
    pub fn duration(&self) -> TimeDelta {
        self.end - self.start
    }
}

// ── Calendars and raw resources ─────────────────────────────────────────────

/// A calendar collection on the account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarInfo {
    /// Display name; not guaranteed unique.
    pub name: String,
    /// Absolute collection URL.
    pub url: String,
}

/// A calendar object resource as stored on the server.
#[derive(Debug, Clone)]
pub struct CalendarObject {
    /// Absolute resource URL.
    pub url: String,
    pub etag: Option<String>,
    /// Raw iCalendar text.
    pub data: String,
}

// ── Alarms ──────────────────────────────────────────────────────────────────

/// Which event boundary an alarm trigger is measured from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlarmRelation {
    #[default]
    Start,
    End,
}

impl AlarmRelation {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "START",
            Self::End => "END",
        }
    }
}

/// Alarm requested on event creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlarmSpec {
    #[serde(default = "default_alarm_minutes")]
    pub minutes_before: i64,
    #[serde(default = "default_alarm_description")]
    pub description: String,
    #[serde(default = "default_alarm_action")]
    pub action: String,
    #[serde(default, deserialize_with = "deserialize_relation")]
    pub related: AlarmRelation,
}

impl AlarmSpec {
    /// A display reminder `minutes_before` the start.
    #[must_use]
    pub fn reminder(minutes_before: i64) -> Self {
        Self {
            minutes_before,
            description: default_alarm_description(),
            action: default_alarm_action(),
            related: AlarmRelation::Start,
        }
    }
}

fn default_alarm_minutes() -> i64 {
    15
}

fn default_alarm_description() -> String {
    "Reminder".into()
}

fn default_alarm_action() -> String {
    "DISPLAY".into()
}

fn deserialize_relation<'de, D: Deserializer<'de>>(d: D) -> Result<AlarmRelation, D::Error> {
    let raw = String::deserialize(d)?;
    match raw.trim().to_ascii_uppercase().as_str() {
        "START" => Ok(AlarmRelation::Start),
        "END" => Ok(AlarmRelation::End),
        other => Err(serde::de::Error::custom(format!(
            "related must be START or END, got \"{other}\""
        ))),
    }
}

/// Alarm as read back from an event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AlarmInfo {
    pub uid: Option<String>,
    pub x_wr_alarmuid: Option<String>,
    /// `None` for absolute (date-time) triggers.
    pub minutes_before: Option<i64>,
    pub related: AlarmRelation,
    pub action: Option<String>,
    pub description: Option<String>,
    /// Raw TRIGGER value.
    pub trigger: String,
}

// ── Events ──────────────────────────────────────────────────────────────────

/// Fields of an event about to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewEvent {
    pub summary: String,
    pub start: EventTime,
    pub end: EventTime,
    pub description: Option<String>,
    pub location: Option<String>,
    pub rrule: Option<String>,
    pub alarms: Vec<AlarmSpec>,
}

/// Partial update; `None` keeps the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventPatch {
    pub summary: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub rrule: Option<String>,
}

impl EventPatch {
    /// Names of the fields this patch touches, in a stable order.
    #[must_use]
    pub fn field_names(&self) -> Vec<&'static str> {
        [
            ("summary", self.summary.is_some()),
            ("start", self.start.is_some()),
            ("end", self.end.is_some()),
            ("description", self.description.is_some()),
            ("location", self.location.is_some()),
            ("rrule", self.rrule.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }
}

/// A VEVENT decoded from server data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedEvent {
    pub uid: String,
    pub summary: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub rrule: Option<String>,
    pub sequence: u32,
    pub dtstamp: Option<String>,
    pub alarms: Vec<AlarmInfo>,
}

/// An event as returned to callers.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub url: String,
    pub uid: String,
    pub summary: String,
    pub description: Option<String>,
    pub location: Option<String>,
    pub start: Option<EventTime>,
    pub end: Option<EventTime>,
    pub all_day: bool,
    pub calendar_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rrule: Option<String>,
    pub alarms: Vec<AlarmInfo>,
}

// ── Operation inputs ────────────────────────────────────────────────────────

/// Arguments of `list_my_events`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListEventsQuery {
    pub start: Option<String>,
    pub end: Option<String>,
    pub calendar_name: Option<String>,
    pub timezone_name: Option<String>,
    pub limit: Option<usize>,
}

/// Arguments of `create_my_event`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CreateEventRequest {
    pub summary: String,
    pub start: String,
    pub end: String,
    pub calendar_name: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    #[serde(default)]
    pub all_day: bool,
    pub timezone_name: Option<String>,
    pub rrule: Option<String>,
    pub alarm_minutes_before: Option<i64>,
    /// Accepts a JSON array or a string holding one.
    #[serde(default, deserialize_with = "deserialize_alarm_configs")]
    pub alarm_configs: Option<Vec<AlarmSpec>>,
}

/// Arguments of `update_my_event`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UpdateEventRequest {
    pub event_url: Option<String>,
    pub uid: Option<String>,
    pub calendar_name: Option<String>,
    pub summary: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub timezone_name: Option<String>,
    pub rrule: Option<String>,
    pub alarm_minutes_before: Option<i64>,
}

impl UpdateEventRequest {
    #[must_use]
    pub fn locator(&self) -> EventLocator {
        EventLocator {
            event_url: self.event_url.clone(),
            uid: self.uid.clone(),
            calendar_name: self.calendar_name.clone(),
        }
    }
}

/// How a caller identifies an existing event.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EventLocator {
    pub event_url: Option<String>,
    pub uid: Option<String>,
    pub calendar_name: Option<String>,
}

fn deserialize_alarm_configs<'de, D: Deserializer<'de>>(
    d: D,
) -> Result<Option<Vec<AlarmSpec>>, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        List(Vec<AlarmSpec>),
        Encoded(String),
    }

    match Option::<Raw>::deserialize(d)? {
        None => Ok(None),
        Some(Raw::List(list)) => Ok(Some(list)),
        Some(Raw::Encoded(s)) if s.trim().is_empty() => Ok(None),
        Some(Raw::Encoded(s)) => serde_json::from_str::<Vec<AlarmSpec>>(&s)
            .map(Some)
            .map_err(|e| serde::de::Error::custom(format!("alarm_configs is not a valid JSON array: {e}"))),
    }
}
