//! `text/event-stream` framing for JSON-RPC responses.

use {axum::http::HeaderMap, serde::Serialize};

use crate::error::{Error, Result};

pub const EVENT_STREAM: &str = "text/event-stream";

/// Whether the client listed `text/event-stream` in its `Accept` header.
pub fn accepts_event_stream(headers: &HeaderMap) -> bool {
    headers
        .get_all(axum::http::header::ACCEPT)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|media| {
            media
                .split(';')
                .next()
                .is_some_and(|base| base.trim().eq_ignore_ascii_case(EVENT_STREAM))
        })
}

/// Frame one payload as a single `message` event.
pub fn encode_message(payload: &impl Serialize) -> Result<String> {
    // Compact JSON never contains a raw newline, so one data line suffices.
    let json = serde_json::to_string(payload)?;
    Ok(format!("event: message\ndata: {json}\n\n"))
}

/// Decode every JSON `data:` payload in an event-stream body.
pub fn parse_event_stream(body: &str) -> Result<Vec<serde_json::Value>> {
    let mut events = Vec::new();
    let mut data = String::new();

    for line in body.lines() {
        let trimmed = line.trim_end();
        if let Some(rest) = trimmed.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(rest.trim_start());
            continue;
        }

        if trimmed.is_empty() && !data.is_empty() {
            events.push(serde_json::from_str(&data)?);
            data.clear();
        }
    }

    if !data.is_empty() {
        events.push(serde_json::from_str(&data)?);
    }

    if events.is_empty() {
        return Err(Error::message("event stream contained no data events"));
    }
    Ok(events)
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, axum::http::HeaderValue};

    #[test]
    fn encoded_message_parses_back() {
        let framed = encode_message(&serde_json::json!({"jsonrpc": "2.0", "id": 1, "result": {}}))
            .unwrap();
        assert!(framed.starts_with("event: message\ndata: {"));
        assert!(framed.ends_with("\n\n"));

        let events = parse_event_stream(&framed).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["id"], 1);
    }

    #[test]
    fn multi_line_data_is_joined() {
        let body = "event: message\ndata: {\"a\":\ndata: 1}\n\n";
        let events = parse_event_stream(body).unwrap();
        assert_eq!(events[0]["a"], 1);
    }

    #[test]
    fn body_without_data_is_an_error() {
        assert!(parse_event_stream(": keep-alive\n\n").is_err());
    }

    #[test]
    fn accept_header_detection() {
        let mut headers = HeaderMap::new();
        assert!(!accepts_event_stream(&headers));

        headers.insert(
            axum::http::header::ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream;q=0.9"),
        );
        assert!(accepts_event_stream(&headers));

        headers.insert(
            axum::http::header::ACCEPT,
            HeaderValue::from_static("application/json"),
        );
        assert!(!accepts_event_stream(&headers));
    }
}
