//! MCP tools over [`CalendarService`].
//!
//! Every tool answers with an object carrying `"success"`. Failures are
//! reported as `{"success": false, "error", "error_kind"}` rather than as
//! JSON-RPC errors, so a client always gets something it can show.

use std::sync::Arc;

use {
    async_trait::async_trait,
    calbridge_mcp::{McpTool, ToolRegistry, http::MCP_PATH},
    serde::{Deserialize, Serialize, de::DeserializeOwned},
    serde_json::{Value, json},
    tracing::warn,
};

use crate::{
    error::{Error, Result},
    service::{CalendarService, MAX_ALARM_MINUTES},
    types::{CreateEventRequest, EventLocator, ListEventsQuery, UpdateEventRequest},
};

/// Identity reported by `get_server_info`.
#[derive(Debug, Clone)]
pub struct ServerDetails {
    pub name: String,
    pub version: String,
    pub environment: String,
}

/// Register every calendar tool plus `get_server_info`.
pub fn register_calendar_tools(
    registry: &mut ToolRegistry,
    service: Arc<CalendarService>,
    details: ServerDetails,
) {
    registry.register(Box::new(ServerInfoTool { details }));
    registry.register(Box::new(ConnectionStatusTool {
        service: Arc::clone(&service),
    }));
    registry.register(Box::new(ListCalendarsTool {
        service: Arc::clone(&service),
    }));
    registry.register(Box::new(ListEventsTool {
        service: Arc::clone(&service),
    }));
    registry.register(Box::new(CreateEventTool {
        service: Arc::clone(&service),
    }));
    registry.register(Box::new(UpdateEventTool {
        service: Arc::clone(&service),
    }));
    registry.register(Box::new(DeleteEventTool {
        service: Arc::clone(&service),
    }));
    registry.register(Box::new(ListAlarmsTool { service }));
}

/// Decode tool arguments; a missing arguments object counts as `{}`.
fn parse_args<T: DeserializeOwned>(arguments: Value) -> Result<T> {
    let arguments = if arguments.is_null() {
        Value::Object(serde_json::Map::new())
    } else {
        arguments
    };
    serde_json::from_value(arguments)
        .map_err(|e| Error::validation(format!("invalid arguments: {e}")))
}

/// Shape a service result into the tool payload.
fn respond<T: Serialize>(tool: &str, result: Result<T>) -> anyhow::Result<Value> {
    match result {
        Ok(payload) => {
            Ok(match serde_json::to_value(payload)? {
                Value::Object(mut map) => {
                    map.insert("success".into(), Value::Bool(true));
                    Value::Object(map)
                },
                other => json!({"success": true, "result": other}),
            })
        },
        Err(e) => {
            warn!(tool, kind = %e.kind(), error = %e, "tool failed");
            Ok(json!({
                "success": false,
                "error": e.to_string(),
                "error_kind": e.kind(),
            }))
        },
    }
}

const DATE_HELP: &str = "Accepts YYYY-MM-DD, YYYY-MM-DDTHH:MM[:SS] (interpreted in timezone_name) \
     or an RFC 3339 value with an offset.";

fn locator_properties() -> serde_json::Map<String, Value> {
    [
        (
            "event_url",
            json!({
                "type": "string",
                "description": "Full URL of the event, as returned by list_my_events or create_my_event."
            }),
        ),
        (
            "uid",
            json!({"type": "string", "description": "Event UID. Used when event_url is not given."}),
        ),
        (
            "calendar_name",
            json!({
                "type": "string",
                "description": "Calendar to search when locating by uid. All calendars are searched when omitted."
            }),
        ),
    ]
    .into_iter()
    .map(|(name, schema)| (name.to_string(), schema))
    .collect()
}

// ── get_server_info ─────────────────────────────────────────────────────────

struct ServerInfoTool {
    details: ServerDetails,
}

#[async_trait]
impl McpTool for ServerInfoTool {
    fn name(&self) -> &str {
        "get_server_info"
    }

    fn description(&self) -> &str {
        "Describe this server: name, version, environment and how to talk to it over HTTP."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _arguments: Value) -> anyhow::Result<Value> {
        Ok(json!({
            "success": true,
            "name": self.details.name,
            "version": self.details.version,
            "environment": self.details.environment,
            "transport": {
                "endpoint": MCP_PATH,
                "method": "POST",
                "headers": {
                    "Content-Type": "application/json",
                    "Accept": "application/json, text/event-stream"
                },
                "body": {
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "tools/call",
                    "params": {"name": "list_my_calendars", "arguments": {}}
                },
                "response": "With text/event-stream accepted, the JSON-RPC response arrives as a \
                             single frame: 'event: message' followed by 'data: <json>'. \
                             Otherwise it is returned as application/json."
            }
        }))
    }
}

// ── get_connection_status ───────────────────────────────────────────────────

struct ConnectionStatusTool {
    service: Arc<CalendarService>,
}

#[async_trait]
impl McpTool for ConnectionStatusTool {
    fn name(&self) -> &str {
        "get_connection_status"
    }

    fn description(&self) -> &str {
        "Connect to iCloud with ICLOUD_EMAIL / ICLOUD_PASSWORD and report the account, \
         server URL and calendars found."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _arguments: Value) -> anyhow::Result<Value> {
        respond(self.name(), self.service.connection_status().await)
    }
}

// ── list_my_calendars ───────────────────────────────────────────────────────

struct ListCalendarsTool {
    service: Arc<CalendarService>,
}

#[async_trait]
impl McpTool for ListCalendarsTool {
    fn name(&self) -> &str {
        "list_my_calendars"
    }

    fn description(&self) -> &str {
        "List the calendars on the iCloud account with their names and URLs."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _arguments: Value) -> anyhow::Result<Value> {
        let result = self.service.list_calendars().await.map(|calendars| {
            json!({
                "count": calendars.len(),
                "calendars": calendars,
            })
        });
        respond(self.name(), result)
    }
}

// ── list_my_events ──────────────────────────────────────────────────────────

struct ListEventsTool {
    service: Arc<CalendarService>,
}

#[async_trait]
impl McpTool for ListEventsTool {
    fn name(&self) -> &str {
        "list_my_events"
    }

    fn description(&self) -> &str {
        "List events overlapping a date range, sorted by start. Defaults to 7 days ago through \
         30 days ahead. Searches every calendar unless calendar_name is given. Ranges shorter \
         than 2 days can miss events on iCloud and come back with a range_warning."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "start": {"type": "string", "description": format!("Range start. {DATE_HELP}")},
                "end": {"type": "string", "description": format!("Range end. {DATE_HELP}")},
                "calendar_name": {"type": "string", "description": "Only search this calendar."},
                "timezone_name": {
                    "type": "string",
                    "description": "IANA timezone for inputs and returned times, e.g. Europe/Paris."
                },
                "limit": {"type": "integer", "minimum": 1, "description": "Maximum events to return."}
            }
        })
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        let result = async {
            let query: ListEventsQuery = parse_args(arguments)?;
            self.service.list_events(query).await
        }
        .await;
        respond(self.name(), result)
    }
}

// ── create_my_event ─────────────────────────────────────────────────────────

struct CreateEventTool {
    service: Arc<CalendarService>,
}

#[async_trait]
impl McpTool for CreateEventTool {
    fn name(&self) -> &str {
        "create_my_event"
    }

    fn description(&self) -> &str {
        "Create an event. Uses the first calendar when calendar_name is omitted. For all-day \
         events pass all_day=true with YYYY-MM-DD dates; the end date is exclusive. Alarms come \
         from alarm_configs, or from alarm_minutes_before when no alarm_configs are given. This \
         is also how alarms are changed on an existing event: delete it and create it again."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "summary": {"type": "string", "description": "Event title."},
                "start": {"type": "string", "description": format!("Event start. {DATE_HELP}")},
                "end": {"type": "string", "description": format!("Event end. {DATE_HELP}")},
                "calendar_name": {"type": "string", "description": "Target calendar."},
                "description": {"type": "string"},
                "location": {"type": "string"},
                "all_day": {"type": "boolean", "default": false},
                "timezone_name": {
                    "type": "string",
                    "description": "IANA timezone for start and end without an offset."
                },
                "rrule": {
                    "type": "string",
                    "description": "Recurrence rule, e.g. FREQ=WEEKLY;BYDAY=MO. A leading RRULE: is accepted."
                },
                "alarm_minutes_before": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": MAX_ALARM_MINUTES,
                    "description": "Add one display reminder this many minutes before the start."
                },
                "alarm_configs": {
                    "description": "Alarms as a JSON array, or a string holding one. Takes precedence over alarm_minutes_before.",
                    "type": ["array", "string"],
                    "items": {
                        "type": "object",
                        "properties": {
                            "minutes_before": {
                                "type": "integer",
                                "minimum": 0,
                                "maximum": MAX_ALARM_MINUTES,
                                "default": 15
                            },
                            "description": {"type": "string", "default": "Reminder"},
                            "action": {"type": "string", "default": "DISPLAY"},
                            "related": {"type": "string", "enum": ["START", "END"], "default": "START"}
                        }
                    }
                }
            },
            "required": ["summary", "start", "end"]
        })
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        let result = async {
            let request: CreateEventRequest = parse_args(arguments)?;
            self.service.create_event(request).await
        }
        .await;
        respond(self.name(), result)
    }
}

// ── update_my_event ─────────────────────────────────────────────────────────

struct UpdateEventTool {
    service: Arc<CalendarService>,
}

#[async_trait]
impl McpTool for UpdateEventTool {
    fn name(&self) -> &str {
        "update_my_event"
    }

    fn description(&self) -> &str {
        "Update an existing event in place, located by event_url or uid. Only the fields given \
         change; stored alarms are kept and SEQUENCE is bumped. alarm_minutes_before is not \
         applied here because iCloud does not reliably keep alarm changes made by an in-place \
         update. To change alarms: call list_event_alarms to read the event, delete_my_event to \
         remove it, then create_my_event with the same details and alarm_configs."
    }

    fn parameters_schema(&self) -> Value {
        let mut properties = locator_properties();
        for (name, schema) in [
            ("summary", json!({"type": "string"})),
            (
                "start",
                json!({"type": "string", "description": format!("New start. {DATE_HELP}")}),
            ),
            (
                "end",
                json!({"type": "string", "description": format!("New end. {DATE_HELP}")}),
            ),
            (
                "description",
                json!({"type": "string", "description": "An empty string clears it."}),
            ),
            (
                "location",
                json!({"type": "string", "description": "An empty string clears it."}),
            ),
            ("timezone_name", json!({"type": "string"})),
            (
                "rrule",
                json!({"type": "string", "description": "An empty string removes recurrence."}),
            ),
            (
                "alarm_minutes_before",
                json!({
                    "type": "integer",
                    "description": "Not applied in place; the response explains the delete and recreate steps."
                }),
            ),
        ] {
            properties.insert(name.into(), schema);
        }
        json!({"type": "object", "properties": properties})
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        let result = async {
            let request: UpdateEventRequest = parse_args(arguments)?;
            self.service.update_event(request).await
        }
        .await;
        respond(self.name(), result)
    }
}

// ── delete_my_event ─────────────────────────────────────────────────────────

struct DeleteEventTool {
    service: Arc<CalendarService>,
}

#[derive(Deserialize)]
struct DeleteArgs {
    #[serde(default)]
    event_url: String,
}

#[async_trait]
impl McpTool for DeleteEventTool {
    fn name(&self) -> &str {
        "delete_my_event"
    }

    fn description(&self) -> &str {
        "Delete an event by URL. Deleting an event that no longer exists succeeds with existed=false."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "event_url": {"type": "string", "description": "Full URL of the event."}
            },
            "required": ["event_url"]
        })
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        let result = async {
            let args: DeleteArgs = parse_args(arguments)?;
            self.service.delete_event(&args.event_url).await
        }
        .await;
        respond(self.name(), result)
    }
}

// ── list_event_alarms ───────────────────────────────────────────────────────

struct ListAlarmsTool {
    service: Arc<CalendarService>,
}

#[async_trait]
impl McpTool for ListAlarmsTool {
    fn name(&self) -> &str {
        "list_event_alarms"
    }

    fn description(&self) -> &str {
        "List the alarms stored on an event, located by event_url or uid. This is the first step \
         of changing alarms: list them, delete_my_event, then create_my_event with alarm_configs."
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": locator_properties()})
    }

    async fn call(&self, arguments: Value) -> anyhow::Result<Value> {
        let result = async {
            let locator: EventLocator = parse_args(arguments)?;
            self.service.list_alarms(locator).await
        }
        .await;
        respond(self.name(), result)
    }
}
