//! In-memory CalDAV account for service and tool tests.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Mutex,
        atomic::{AtomicU64, Ordering},
    },
};

use async_trait::async_trait;

use crate::{
    client::CalDavClient,
    error::{Error, Result},
    ical::parse_event_ics,
    types::{CalendarInfo, CalendarObject, TimeRange},
};

struct Stored {
    calendar_url: String,
    etag: String,
    data: String,
}

/// Stores objects keyed by URL and filters REPORTs the way the server
/// does. Like iCloud, an in-place PUT keeps the alarms that were already
/// stored and ignores VALARM changes in the new body.
pub(crate) struct FakeCalDav {
    calendars: Vec<CalendarInfo>,
    objects: Mutex<BTreeMap<String, Stored>>,
    failing: Mutex<HashSet<String>>,
    next_etag: AtomicU64,
}

impl FakeCalDav {
    pub(crate) fn with_calendars(names: &[&str]) -> Self {
        Self {
            calendars: names
                .iter()
                .map(|n| CalendarInfo {
                    name: (*n).to_string(),
                    url: format!("https://caldav.test/123/calendars/{}/", n.to_lowercase()),
                })
                .collect(),
            objects: Mutex::new(BTreeMap::new()),
            failing: Mutex::new(HashSet::new()),
            next_etag: AtomicU64::new(1),
        }
    }

    pub(crate) fn calendar_url(&self, name: &str) -> String {
        self.calendars
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.url.clone())
            .unwrap_or_default()
    }

    /// Make REPORTs against this calendar fail with HTTP 500.
    pub(crate) fn fail_calendar(&self, name: &str) {
        let url = self.calendar_url(name);
        self.failing.lock().unwrap().insert(url);
    }

    pub(crate) fn insert(&self, calendar: &str, href: &str, data: &str) -> String {
        let url = format!("{}{href}", self.calendar_url(calendar));
        self.objects.lock().unwrap().insert(url.clone(), Stored {
            calendar_url: self.calendar_url(calendar),
            etag: self.etag(),
            data: data.to_string(),
        });
        url
    }

    pub(crate) fn data(&self, url: &str) -> Option<String> {
        self.objects.lock().unwrap().get(url).map(|s| s.data.clone())
    }

    pub(crate) fn len(&self) -> usize {
        self.objects.lock().unwrap().len()
    }

    fn etag(&self) -> String {
        format!("\"{}\"", self.next_etag.fetch_add(1, Ordering::Relaxed))
    }

    fn calendar_of(url: &str) -> String {
        match url.rfind('/') {
            Some(i) => url[..=i].to_string(),
            None => url.to_string(),
        }
    }
}

#[async_trait]
impl CalDavClient for FakeCalDav {
    fn account(&self) -> &str {
        "me@icloud.com"
    }

    fn server_url(&self) -> &str {
        "https://caldav.test/"
    }

    async fn list_calendars(&self) -> Result<Vec<CalendarInfo>> {
        Ok(self.calendars.clone())
    }

    async fn query_events(
        &self,
        calendar_url: &str,
        range: &TimeRange,
    ) -> Result<Vec<CalendarObject>> {
        if self.failing.lock().unwrap().contains(calendar_url) {
            return Err(Error::remote(500, "internal server error"));
        }
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(_, s)| s.calendar_url == calendar_url)
            .filter(|(_, s)| {
                let Some(event) = parse_event_ics(&s.data, chrono_tz::UTC) else {
                    return false;
                };
                let Some(start) = event.start.map(|t| t.to_utc(chrono_tz::UTC)) else {
                    return false;
                };
                let end = event.end.map_or(start, |t| t.to_utc(chrono_tz::UTC));
                start < range.end && (end > range.start || (end == start && start >= range.start))
            })
            .map(|(url, s)| CalendarObject {
                url: url.clone(),
                etag: Some(s.etag.clone()),
                data: s.data.clone(),
            })
            .collect())
    }

    async fn find_by_uid(&self, calendar_url: &str, uid: &str) -> Result<Option<CalendarObject>> {
        let objects = self.objects.lock().unwrap();
        Ok(objects
            .iter()
            .filter(|(_, s)| s.calendar_url == calendar_url)
            .find(|(_, s)| parse_event_ics(&s.data, chrono_tz::UTC).is_some_and(|e| e.uid == uid))
            .map(|(url, s)| CalendarObject {
                url: url.clone(),
                etag: Some(s.etag.clone()),
                data: s.data.clone(),
            }))
    }

    async fn fetch(&self, url: &str) -> Result<Option<CalendarObject>> {
        Ok(self.objects.lock().unwrap().get(url).map(|s| CalendarObject {
            url: url.to_string(),
            etag: Some(s.etag.clone()),
            data: s.data.clone(),
        }))
    }

    async fn create(&self, url: &str, ics: &str) -> Result<Option<String>> {
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(url) {
            return Err(Error::remote(412, "precondition failed"));
        }
        let etag = self.etag();
        objects.insert(url.to_string(), Stored {
            calendar_url: Self::calendar_of(url),
            etag: etag.clone(),
            data: ics.to_string(),
        });
        Ok(Some(etag))
    }

    async fn update(&self, url: &str, ics: &str, etag: Option<&str>) -> Result<Option<String>> {
        let mut objects = self.objects.lock().unwrap();
        let Some(stored) = objects.get_mut(url) else {
            return Err(Error::not_found(format!("{url} does not exist on the server")));
        };
        if etag.is_some_and(|e| e != stored.etag) {
            return Err(Error::remote(412, "precondition failed"));
        }
        stored.data = keep_stored_alarms(&stored.data, ics);
        stored.etag = self.etag();
        Ok(Some(stored.etag.clone()))
    }

    async fn delete(&self, url: &str) -> Result<bool> {
        Ok(self.objects.lock().unwrap().remove(url).is_some())
    }
}

fn keep_stored_alarms(stored: &str, incoming: &str) -> String {
    let split = |ics: &str| -> (Vec<String>, Vec<String>) {
        let (mut alarms, mut rest) = (Vec::new(), Vec::new());
        let mut inside = false;
        for line in ics.lines() {
            if line == "BEGIN:VALARM" {
                inside = true;
            }
            if inside {
                alarms.push(line.to_string());
            } else {
                rest.push(line.to_string());
            }
            if line == "END:VALARM" {
                inside = false;
            }
        }
        (alarms, rest)
    };
    let (old_alarms, _) = split(stored);
    let (_, body) = split(incoming);

    let mut out = String::new();
    for line in body {
        if line == "END:VEVENT" {
            for alarm in &old_alarms {
                out.push_str(alarm);
                out.push_str("\r\n");
            }
        }
        out.push_str(&line);
        out.push_str("\r\n");
    }
    out
}
