//! WebDAV/CalDAV request bodies and multistatus parsing.

use crate::{
    error::{Error, Result},
    time::format_caldav_utc,
    types::TimeRange,
};

pub const CURRENT_USER_PRINCIPAL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:">
  <d:prop>
    <d:current-user-principal/>
  </d:prop>
</d:propfind>"#;

pub const CALENDAR_HOME_SET: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <c:calendar-home-set/>
  </d:prop>
</d:propfind>"#;

pub const LIST_CALENDARS: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<d:propfind xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:displayname/>
    <d:resourcetype/>
    <c:supported-calendar-component-set/>
  </d:prop>
</d:propfind>"#;

/// calendar-query REPORT for VEVENTs overlapping `range`.
#[must_use]
pub fn events_in_range(range: &TimeRange) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:time-range start="{}" end="{}"/>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#,
        format_caldav_utc(range.start),
        format_caldav_utc(range.end)
    )
}

/// calendar-query REPORT matching a VEVENT by exact UID.
#[must_use]
pub fn event_by_uid(uid: &str) -> String {
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<c:calendar-query xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:prop>
    <d:getetag/>
    <c:calendar-data/>
  </d:prop>
  <c:filter>
    <c:comp-filter name="VCALENDAR">
      <c:comp-filter name="VEVENT">
        <c:prop-filter name="UID">
          <c:text-match collation="i;octet">{}</c:text-match>
        </c:prop-filter>
      </c:comp-filter>
    </c:comp-filter>
  </c:filter>
</c:calendar-query>"#,
        escape(uid)
    )
}

fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

/// A calendar collection as listed by the home set PROPFIND.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectionEntry {
    pub href: String,
    pub display_name: Option<String>,
}

/// A calendar object returned by a REPORT.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectEntry {
    pub href: String,
    pub etag: Option<String>,
    pub data: String,
}

fn parse(xml: &str) -> Result<roxmltree::Document<'_>> {
    roxmltree::Document::parse(xml)
        .map_err(|e| Error::message(format!("malformed multistatus response: {e}")))
}

fn child_text<'a>(node: roxmltree::Node<'a, '_>, name: &str) -> Option<&'a str> {
    node.descendants()
        .find(|n| n.tag_name().name() == name)
        .and_then(|n| n.text())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// First `<href>` nested under the named property, e.g.
/// `current-user-principal` or `calendar-home-set`.
pub fn parse_href_prop(xml: &str, prop: &str) -> Result<Option<String>> {
    let doc = parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|n| n.tag_name().name() == prop)
        .find_map(|n| child_text(n, "href"))
        .map(str::to_string))
}

/// Calendar collections that can hold events.
///
/// Plain collections (the home set itself, inbox/outbox) and calendars
/// whose component set excludes VEVENT (reminder lists) are skipped.
pub fn parse_calendar_collections(xml: &str) -> Result<Vec<CollectionEntry>> {
    let doc = parse(xml)?;
    let mut entries = Vec::new();

    for response in doc
        .descendants()
        .filter(|n| n.tag_name().name() == "response")
    {
        let Some(href) = child_text(response, "href") else {
            continue;
        };

        let is_calendar = response
            .descendants()
            .find(|n| n.tag_name().name() == "resourcetype")
            .is_some_and(|rt| rt.children().any(|c| c.tag_name().name() == "calendar"));
        if !is_calendar {
            continue;
        }

        let components: Vec<&str> = response
            .descendants()
            .filter(|n| n.tag_name().name() == "comp")
            .filter_map(|n| n.attribute("name"))
            .collect();
        if !components.is_empty() && !components.iter().any(|c| c.eq_ignore_ascii_case("VEVENT")) {
            continue;
        }

        entries.push(CollectionEntry {
            href: href.to_string(),
            display_name: child_text(response, "displayname").map(str::to_string),
        });
    }
    Ok(entries)
}

/// Objects carrying calendar data in a REPORT multistatus.
pub fn parse_calendar_objects(xml: &str) -> Result<Vec<ObjectEntry>> {
    let doc = parse(xml)?;
    Ok(doc
        .descendants()
        .filter(|n| n.tag_name().name() == "response")
        .filter_map(|response| {
            let href = child_text(response, "href")?;
            let data = response
                .descendants()
                .find(|n| n.tag_name().name() == "calendar-data")
                .and_then(|n| n.text())
                .filter(|d| !d.trim().is_empty())?;
            Some(ObjectEntry {
                href: href.to_string(),
                etag: child_text(response, "getetag").map(str::to_string),
                data: data.to_string(),
            })
        })
        .collect())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, chrono::TimeZone};

    #[test]
    fn principal_href_extracted() {
        let xml = r#"<?xml version="1.0"?>
<multistatus xmlns="DAV:">
  <response>
    <href>/</href>
    <propstat>
      <prop><current-user-principal><href>/1234567/principal/</href></current-user-principal></prop>
      <status>HTTP/1.1 200 OK</status>
    </propstat>
  </response>
</multistatus>"#;
        assert_eq!(
            parse_href_prop(xml, "current-user-principal").unwrap().as_deref(),
            Some("/1234567/principal/")
        );
        assert_eq!(parse_href_prop(xml, "calendar-home-set").unwrap(), None);
    }

    #[test]
    fn collections_skip_non_event_calendars() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/1234567/calendars/</d:href>
    <d:propstat><d:prop><d:resourcetype><d:collection/></d:resourcetype></d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/1234567/calendars/home/</d:href>
    <d:propstat><d:prop>
      <d:displayname>Home</d:displayname>
      <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
      <c:supported-calendar-component-set><c:comp name="VEVENT"/></c:supported-calendar-component-set>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/1234567/calendars/tasks/</d:href>
    <d:propstat><d:prop>
      <d:displayname>Reminders</d:displayname>
      <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
      <c:supported-calendar-component-set><c:comp name="VTODO"/></c:supported-calendar-component-set>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/1234567/calendars/work/</d:href>
    <d:propstat><d:prop>
      <d:resourcetype><d:collection/><c:calendar/></d:resourcetype>
    </d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;
        let entries = parse_calendar_collections(xml).unwrap();
        assert_eq!(entries, vec![
            CollectionEntry {
                href: "/1234567/calendars/home/".into(),
                display_name: Some("Home".into()),
            },
            CollectionEntry {
                href: "/1234567/calendars/work/".into(),
                display_name: None,
            },
        ]);
    }

    #[test]
    fn objects_require_calendar_data() {
        let xml = r#"<?xml version="1.0"?>
<d:multistatus xmlns:d="DAV:" xmlns:c="urn:ietf:params:xml:ns:caldav">
  <d:response>
    <d:href>/cal/a.ics</d:href>
    <d:propstat><d:prop>
      <d:getetag>"etag-a"</d:getetag>
      <c:calendar-data>BEGIN:VCALENDAR
END:VCALENDAR</c:calendar-data>
    </d:prop></d:propstat>
  </d:response>
  <d:response>
    <d:href>/cal/b.ics</d:href>
    <d:propstat><d:prop><d:getetag>"etag-b"</d:getetag></d:prop></d:propstat>
  </d:response>
</d:multistatus>"#;
        let objects = parse_calendar_objects(xml).unwrap();
        assert_eq!(objects.len(), 1);
        assert_eq!(objects[0].href, "/cal/a.ics");
        assert_eq!(objects[0].etag.as_deref(), Some("\"etag-a\""));
        assert!(objects[0].data.starts_with("BEGIN:VCALENDAR"));
    }

    #[test]
    fn malformed_xml_is_error() {
        assert!(parse_calendar_objects("<multistatus").is_err());
    }

    #[test]
    fn query_bodies() {
        let range = TimeRange {
            start: chrono::Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            end: chrono::Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap(),
        };
        let body = events_in_range(&range);
        assert!(body.contains(r#"start="20250101T000000Z" end="20250201T000000Z""#));

        let body = event_by_uid("a<b>&\"c\"");
        assert!(body.contains("a&lt;b&gt;&amp;&quot;c&quot;"));
        assert!(roxmltree::Document::parse(&body).is_ok());
    }
}
