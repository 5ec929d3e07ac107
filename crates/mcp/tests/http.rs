#![allow(clippy::unwrap_used, clippy::expect_used)]

use std::sync::Arc;

use {
    async_trait::async_trait,
    calbridge_mcp::{McpServer, McpTool, ToolRegistry, sse},
    serde_json::{Value, json},
    tokio::{net::TcpListener, sync::oneshot},
};

struct Calendars;

#[async_trait]
impl McpTool for Calendars {
    fn name(&self) -> &str {
        "list_my_calendars"
    }

    fn description(&self) -> &str {
        "List calendars"
    }

    fn parameters_schema(&self) -> Value {
        json!({"type": "object", "properties": {}})
    }

    async fn call(&self, _arguments: Value) -> anyhow::Result<Value> {
        Ok(json!({"success": true, "calendars": [{"name": "Home"}], "count": 1}))
    }
}

struct Running {
    base: String,
    stop: Option<oneshot::Sender<()>>,
    handle: tokio::task::JoinHandle<calbridge_mcp::Result<()>>,
}

impl Running {
    async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        self.handle.await.unwrap().unwrap();
    }
}

async fn start() -> Running {
    let mut tools = ToolRegistry::new();
    tools.register(Box::new(Calendars));
    let server = Arc::new(McpServer::new("calbridge", "test", tools));

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    let (tx, rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(calbridge_mcp::serve(listener, server, async move {
        let _ = rx.await;
    }));
    Running {
        base,
        stop: Some(tx),
        handle,
    }
}

#[tokio::test]
async fn full_session_over_event_stream() {
    let running = start().await;
    let client = reqwest::Client::new();
    let url = format!("{}/mcp", running.base);

    let post = |body: Value| {
        client
            .post(&url)
            .header("accept", "application/json, text/event-stream")
            .json(&body)
            .send()
    };

    let resp = post(json!({"jsonrpc": "2.0", "id": 1, "method": "initialize", "params": {}}))
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert!(
        resp.headers()["content-type"]
            .to_str()
            .unwrap()
            .starts_with("text/event-stream")
    );
    let events = sse::parse_event_stream(&resp.text().await.unwrap()).unwrap();
    assert_eq!(events[0]["result"]["serverInfo"]["name"], "calbridge");

    let resp = post(json!({"jsonrpc": "2.0", "method": "notifications/initialized"}))
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);

    let resp = post(json!({
        "jsonrpc": "2.0", "id": 2, "method": "tools/call",
        "params": {"name": "list_my_calendars", "arguments": {}}
    }))
    .await
    .unwrap();
    let events = sse::parse_event_stream(&resp.text().await.unwrap()).unwrap();
    assert_eq!(events[0]["id"], 2);
    assert_eq!(events[0]["result"]["structuredContent"]["count"], 1);
    assert_eq!(events[0]["result"]["isError"], false);

    running.shutdown().await;
}

#[tokio::test]
async fn protocol_errors_over_http() {
    let running = start().await;
    let client = reqwest::Client::new();
    let url = format!("{}/mcp", running.base);

    let resp = client
        .post(&url)
        .header("content-type", "application/json")
        .body("{\"jsonrpc\":")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32700);

    let resp = client
        .post(&url)
        .json(&json!({"jsonrpc": "2.0", "id": 3, "method": "prompts/list"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], -32601);
    assert_eq!(body["id"], 3);

    let health: Value = client
        .get(format!("{}/health", running.base))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    running.shutdown().await;
}
