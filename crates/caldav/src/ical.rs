//! iCalendar build/parse helpers using the `icalendar` crate.
//!
//! Timed values are always written in UTC. Reading accepts UTC, floating,
//! `TZID=` and `VALUE=DATE` values, since iCloud mixes all of them.

use {
    chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc},
    chrono_tz::Tz,
    icalendar::{
        Alarm, Calendar, Component, EventLike, Property, Trigger, ValueType,
        parser::{self, read_calendar, unfold},
    },
};

use crate::{
    error::{Error, Result},
    time::format_caldav_utc,
    types::{AlarmInfo, AlarmRelation, AlarmSpec, EventPatch, EventTime, NewEvent, ParsedEvent},
};

pub const PRODID: &str = "-//calbridge//CalDAV bridge//EN";

/// VEVENT properties rebuilt from typed fields on every write. Anything
/// else found on an existing event is carried over untouched.
const MANAGED_PROPERTIES: &[&str] = &[
    "UID",
    "DTSTAMP",
    "DTSTART",
    "DTEND",
    "DURATION",
    "SUMMARY",
    "DESCRIPTION",
    "LOCATION",
    "RRULE",
    "SEQUENCE",
    "LAST-MODIFIED",
];

// ── Encoding ────────────────────────────────────────────────────────────────

/// Build a VCALENDAR document holding one VEVENT with its alarms.
///
/// Each alarm gets a fresh UID, mirrored into `X-WR-ALARMUID` for Apple
/// clients.
#[must_use]
pub fn build_event_ics(event: &NewEvent, uid: &str, dtstamp: DateTime<Utc>) -> String {
    let mut vevent = base_vevent(event, uid, &format_caldav_utc(dtstamp), 0);
    for spec in &event.alarms {
        vevent.alarm(build_alarm(spec, &uuid::Uuid::new_v4().to_string()));
    }
    render(vevent, &verbatim_properties(event), &[])
}

fn base_vevent(event: &NewEvent, uid: &str, dtstamp: &str, sequence: u32) -> icalendar::Event {
    let mut vevent = icalendar::Event::new();
    vevent.uid(uid);
    vevent.add_property("DTSTAMP", dtstamp);
    vevent.add_property("SEQUENCE", sequence.to_string());
    add_time_property(&mut vevent, "DTSTART", &event.start);
    add_time_property(&mut vevent, "DTEND", &event.end);
    vevent
}

/// SUMMARY, DESCRIPTION, LOCATION and RRULE as folded content lines.
///
/// TEXT values are escaped here and RRULE is written as given, so neither
/// depends on how the `icalendar` writer treats `,` `;` and `\`.
fn verbatim_properties(event: &NewEvent) -> Vec<String> {
    let mut lines = vec![content_line("SUMMARY", &escape_text(&event.summary))];

    // Empty text clears the property.
    if let Some(desc) = event.description.as_deref().filter(|d| !d.is_empty()) {
        lines.push(content_line("DESCRIPTION", &escape_text(desc)));
    }
    if let Some(loc) = event.location.as_deref().filter(|l| !l.is_empty()) {
        lines.push(content_line("LOCATION", &escape_text(loc)));
    }
    if let Some(rrule) = event.rrule.as_deref().filter(|r| !r.is_empty()) {
        lines.push(content_line("RRULE", rrule));
    }
    lines
}

fn content_line(name: &str, value: &str) -> String {
    fold_line(&format!("{name}:{value}"))
}

/// Fold at 75 octets without splitting a character.
fn fold_line(line: &str) -> String {
    const MAX_OCTETS: usize = 75;
    let mut out = String::with_capacity(line.len() + line.len() / MAX_OCTETS * 3);
    let mut width = 0;
    for c in line.chars() {
        let len = c.len_utf8();
        if width + len > MAX_OCTETS {
            out.push_str("\r\n ");
            width = 1;
        }
        out.push(c);
        width += len;
    }
    out
}

/// RFC 5545 TEXT escaping. Bare carriage returns are dropped.
#[must_use]
pub fn escape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            ',' => out.push_str("\\,"),
            ';' => out.push_str("\\;"),
            '\n' => out.push_str("\\n"),
            '\r' => {},
            other => out.push(other),
        }
    }
    out
}

fn add_time_property(vevent: &mut icalendar::Event, name: &str, time: &EventTime) {
    match time {
        EventTime::Date(d) => {
            let mut prop = Property::new(name, d.format("%Y%m%d").to_string());
            prop.append_parameter(ValueType::Date);
            vevent.append_property(prop);
        },
        EventTime::DateTime(dt) => {
            vevent.add_property(name, format_caldav_utc(dt.with_timezone(&Utc)));
        },
    }
}

fn build_alarm(spec: &AlarmSpec, alarm_uid: &str) -> Alarm {
    let minutes = spec.minutes_before.max(0);
    // Placeholder; replaced by the RELATED-aware TRIGGER below.
    let mut alarm = Alarm::display(
        &spec.description,
        Trigger::before_start(chrono::TimeDelta::zero()),
    );

    let mut trigger = Property::new("TRIGGER", format_trigger(minutes));
    trigger.add_parameter("RELATED", spec.related.as_str());
    alarm.append_property(trigger);

    let action = spec.action.trim().to_ascii_uppercase();
    if !action.is_empty() && action != "DISPLAY" {
        alarm.add_property("ACTION", &action);
    }
    alarm.add_property("UID", alarm_uid);
    alarm.add_property("X-WR-ALARMUID", alarm_uid);
    alarm.done()
}

/// `-PT{n}M`, or `PT0M` for an alarm at the anchor itself.
#[must_use]
pub fn format_trigger(minutes_before: i64) -> String {
    if minutes_before == 0 {
        "PT0M".to_string()
    } else {
        format!("-PT{minutes_before}M")
    }
}

/// Serialize `vevent`, placing `properties` right after `BEGIN:VEVENT` and
/// `components` right before `END:VEVENT`.
///
/// PRODID is pinned to ours and the implied CALSCALE dropped.
fn render(mut vevent: icalendar::Event, properties: &[String], components: &[String]) -> String {
    let cal = Calendar::new().push(vevent.done()).done();
    let ics = cal.to_string();
    let extra: usize = properties.iter().chain(components).map(|l| l.len() + 2).sum();
    let mut out = String::with_capacity(ics.len() + extra);
    let mut push = |line: &str| {
        out.push_str(line);
        out.push_str("\r\n");
    };
    for line in ics.lines() {
        if line.starts_with("PRODID:") {
            push(&format!("PRODID:{PRODID}"));
            continue;
        }
        if line.is_empty() || line == "CALSCALE:GREGORIAN" {
            continue;
        }
        if line == "END:VEVENT" {
            components.iter().for_each(|block| push(block));
        }
        push(line);
        if line == "BEGIN:VEVENT" {
            properties.iter().for_each(|prop| push(prop));
        }
    }
    out
}

// ── Decoding ────────────────────────────────────────────────────────────────

/// Parse the first VEVENT of an iCalendar document.
///
/// Floating times and unknown `TZID`s are read in `default_tz`.
#[must_use]
pub fn parse_event_ics(content: &str, default_tz: Tz) -> Option<ParsedEvent> {
    let unfolded = unfold(content);
    let calendar = read_calendar(&unfolded).ok()?;
    let vevent = calendar.components.iter().find(|c| c.name == "VEVENT")?;

    let uid = vevent.find_prop("UID").map(|p| unescape_text(p.val.as_ref()))?;
    let text = |name: &str| {
        vevent
            .find_prop(name)
            .map(|p| unescape_text(p.val.as_ref()))
            .filter(|v| !v.is_empty())
    };

    let start = vevent
        .find_prop("DTSTART")
        .and_then(|p| parse_time_property(p, default_tz));
    let end = vevent
        .find_prop("DTEND")
        .and_then(|p| parse_time_property(p, default_tz))
        .or_else(|| {
            let duration = vevent
                .find_prop("DURATION")
                .and_then(|p| parse_duration_seconds(p.val.as_ref()))?;
            // Out-of-range durations leave the end unknown.
            let delta = chrono::TimeDelta::try_seconds(duration)?;
            match start? {
                EventTime::Date(d) => d.checked_add_signed(delta).map(EventTime::Date),
                EventTime::DateTime(dt) => dt.checked_add_signed(delta).map(EventTime::DateTime),
            }
        });

    Some(ParsedEvent {
        uid,
        summary: text("SUMMARY"),
        description: text("DESCRIPTION"),
        location: text("LOCATION"),
        start,
        end,
        rrule: vevent.find_prop("RRULE").map(|p| p.val.to_string()),
        sequence: vevent
            .find_prop("SEQUENCE")
            .and_then(|p| p.val.as_ref().trim().parse().ok())
            .unwrap_or(0),
        dtstamp: vevent.find_prop("DTSTAMP").map(|p| p.val.to_string()),
        alarms: vevent
            .components
            .iter()
            .filter(|c| c.name == "VALARM")
            .map(parse_alarm_component)
            .collect(),
    })
}

/// Read every VALARM of the first VEVENT.
#[must_use]
pub fn parse_alarms(content: &str) -> Vec<AlarmInfo> {
    parse_event_ics(content, chrono_tz::UTC)
        .map(|event| event.alarms)
        .unwrap_or_default()
}

fn parse_alarm_component(alarm: &parser::Component<'_>) -> AlarmInfo {
    let prop = |name: &str| alarm.find_prop(name).map(|p| unescape_text(p.val.as_ref()));
    let trigger = alarm.find_prop("TRIGGER");

    let related = trigger
        .and_then(|t| param(t, "RELATED"))
        .map_or(AlarmRelation::Start, |r| {
            if r.eq_ignore_ascii_case("END") {
                AlarmRelation::End
            } else {
                AlarmRelation::Start
            }
        });
    let is_absolute = trigger
        .and_then(|t| param(t, "VALUE"))
        .is_some_and(|v| v.eq_ignore_ascii_case("DATE-TIME"));
    let raw_trigger = trigger.map(|t| t.val.to_string()).unwrap_or_default();
    let minutes_before = (!is_absolute)
        .then(|| parse_duration_seconds(&raw_trigger))
        .flatten()
        .map(|secs| -secs / 60);

    AlarmInfo {
        uid: prop("UID"),
        x_wr_alarmuid: prop("X-WR-ALARMUID"),
        minutes_before,
        related,
        action: prop("ACTION"),
        description: prop("DESCRIPTION"),
        trigger: raw_trigger,
    }
}

fn param(prop: &parser::Property<'_>, key: &str) -> Option<String> {
    prop.params
        .iter()
        .find(|p| p.key.as_ref().eq_ignore_ascii_case(key))
        .and_then(|p| p.val.as_ref().map(|v| v.as_ref().trim_matches('"').to_string()))
}

fn parse_time_property(prop: &parser::Property<'_>, default_tz: Tz) -> Option<EventTime> {
    let raw = prop.val.as_ref().trim();
    let is_date = param(prop, "VALUE").is_some_and(|v| v.eq_ignore_ascii_case("DATE"))
        || (raw.len() == 8 && raw.chars().all(|c| c.is_ascii_digit()));
    if is_date {
        return NaiveDate::parse_from_str(raw, "%Y%m%d")
            .ok()
            .map(EventTime::Date);
    }

    if let Some(utc) = raw.strip_suffix('Z') {
        let naive = NaiveDateTime::parse_from_str(utc, "%Y%m%dT%H%M%S").ok()?;
        return Some(EventTime::DateTime(naive.and_utc().fixed_offset()));
    }

    let naive = NaiveDateTime::parse_from_str(raw, "%Y%m%dT%H%M%S").ok()?;
    let tz = param(prop, "TZID")
        .and_then(|id| resolve_tzid(&id))
        .unwrap_or(default_tz);
    let local = tz
        .from_local_datetime(&naive)
        .earliest()
        .unwrap_or_else(|| tz.from_utc_datetime(&naive));
    Some(EventTime::DateTime(local.fixed_offset()))
}

/// Map a TZID to an IANA zone, tolerating prefixed forms such as
/// `/mozilla.org/20050126_1/Europe/Berlin`.
fn resolve_tzid(id: &str) -> Option<Tz> {
    let id = id.trim();
    id.parse::<Tz>().ok().or_else(|| {
        let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
        (1..segments.len())
            .rev()
            .find_map(|n| segments[segments.len() - n..].join("/").parse::<Tz>().ok())
    })
}

/// Signed seconds of an RFC 5545 duration (`-PT15M`, `P1DT2H`, `-P1W`).
#[must_use]
pub fn parse_duration_seconds(value: &str) -> Option<i64> {
    let value = value.trim();
    let (negative, rest) = match value.as_bytes().first()? {
        b'-' => (true, &value[1..]),
        b'+' => (false, &value[1..]),
        _ => (false, value),
    };
    let rest = rest.strip_prefix('P')?;

    let mut total: i64 = 0;
    let mut number = String::new();
    let mut in_time = false;
    let mut saw_component = false;
    for c in rest.chars() {
        match c {
            '0'..='9' => number.push(c),
            'T' if !in_time && number.is_empty() => in_time = true,
            unit => {
                let n: i64 = number.parse().ok()?;
                number.clear();
                let scale = match (in_time, unit) {
                    (false, 'W') => 7 * 86_400,
                    (false, 'D') => 86_400,
                    (true, 'H') => 3_600,
                    (true, 'M') => 60,
                    (true, 'S') => 1,
                    _ => return None,
                };
                total = total.checked_add(n.checked_mul(scale)?)?;
                saw_component = true;
            },
        }
    }
    if !number.is_empty() || !saw_component {
        return None;
    }
    Some(if negative { -total } else { total })
}

/// Undo RFC 5545 TEXT escaping.
#[must_use]
pub fn unescape_text(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut chars = value.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n' | 'N') => out.push('\n'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}

// ── Updating ────────────────────────────────────────────────────────────────

/// Apply `patch` to an existing event document.
///
/// UID and DTSTAMP are kept, SEQUENCE is bumped and LAST-MODIFIED set to
/// `now`. Existing VALARM blocks and unmanaged properties are copied
/// through byte for byte. Alarms are never added or changed here.
pub fn merge_event_ics(
    existing: &str,
    patch: &EventPatch,
    default_tz: Tz,
    now: DateTime<Utc>,
) -> Result<String> {
    let current = parse_event_ics(existing, default_tz)
        .ok_or_else(|| Error::message("stored event data could not be parsed"))?;

    let start = patch
        .start
        .or(current.start)
        .ok_or_else(|| Error::message("stored event has no DTSTART"))?;
    let mut end = patch.end.or(current.end).unwrap_or(start);

    // A patch may move a timed event to a date or back; keep both ends alike.
    // All-day end dates are exclusive, so one not after the start means a
    // single day.
    end = match (start, end) {
        (EventTime::Date(s), EventTime::Date(e)) if e > s => end,
        (EventTime::Date(s), _) => EventTime::Date(
            s.succ_opt()
                .ok_or_else(|| Error::validation("start date out of range"))?,
        ),
        (EventTime::DateTime(_), _) => end.to_datetime(default_tz),
    };
    check_order(&start, &end, default_tz)?;

    let fields = NewEvent {
        summary: patch
            .summary
            .clone()
            .or(current.summary)
            .unwrap_or_default(),
        start,
        end,
        description: patch.description.clone().or(current.description),
        location: patch.location.clone().or(current.location),
        rrule: patch.rrule.clone().or(current.rrule),
        alarms: Vec::new(),
    };

    let dtstamp = current
        .dtstamp
        .unwrap_or_else(|| format_caldav_utc(now));
    let sequence = current.sequence.saturating_add(1);
    let mut vevent = base_vevent(&fields, &current.uid, &dtstamp, sequence);
    vevent.add_property("LAST-MODIFIED", format_caldav_utc(now));

    let preserved = preserved_blocks(existing);
    let mut properties = verbatim_properties(&fields);
    properties.extend(preserved.properties);
    Ok(render(vevent, &properties, &preserved.components))
}

/// `end` must not precede `start`.
pub fn check_order(start: &EventTime, end: &EventTime, tz: Tz) -> Result<()> {
    if end.to_utc(tz) < start.to_utc(tz) {
        return Err(Error::validation(format!(
            "end ({}) must not be before start ({})",
            end.to_iso(),
            start.to_iso()
        )));
    }
    Ok(())
}

/// Raw content lines (folded continuations attached) of the first VEVENT
/// that must survive an update.
#[derive(Default)]
struct Preserved {
    /// Unmanaged properties.
    properties: Vec<String>,
    /// VALARM and any other nested component, one block each.
    components: Vec<String>,
}

fn preserved_blocks(existing: &str) -> Preserved {
    let mut logical: Vec<String> = Vec::new();
    for line in existing.split('\n').map(|l| l.trim_end_matches('\r')) {
        if line.starts_with([' ', '\t'])
            && let Some(last) = logical.last_mut()
        {
            last.push_str("\r\n");
            last.push_str(line);
        } else if !line.is_empty() {
            logical.push(line.to_string());
        }
    }

    let mut kept = Preserved::default();
    let mut in_vevent = false;
    let mut depth = 0usize;
    let mut block: Option<String> = None;

    for line in logical {
        let upper = line.to_ascii_uppercase();
        if !in_vevent {
            if upper == "BEGIN:VEVENT" {
                in_vevent = true;
            }
            continue;
        }
        if let Some(ref mut current) = block {
            current.push_str("\r\n");
            current.push_str(&line);
            if upper.starts_with("BEGIN:") {
                depth += 1;
            } else if upper.starts_with("END:") {
                depth -= 1;
                if depth == 0 {
                    kept.components.extend(block.take());
                }
            }
            continue;
        }
        if upper == "END:VEVENT" {
            break;
        }
        if upper.starts_with("BEGIN:") {
            depth = 1;
            block = Some(line);
            continue;
        }

        let name = upper.split([':', ';']).next().unwrap_or_default();
        if !MANAGED_PROPERTIES.contains(&name) {
            kept.properties.push(line);
        }
    }
    kept
}
