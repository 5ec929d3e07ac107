//! Streamable-HTTP transport: `POST /mcp` plus a health probe.

use std::{future::Future, sync::Arc};

use {
    axum::{
        Json, Router,
        extract::State,
        http::{HeaderMap, StatusCode, header},
        response::{IntoResponse, Response},
        routing::get,
    },
    tokio::net::TcpListener,
    tower_http::{
        cors::{Any, CorsLayer},
        trace::TraceLayer,
    },
    tracing::{error, info},
};

use crate::{error::Result, server::McpServer, sse};

pub const MCP_PATH: &str = "/mcp";
pub const HEALTH_PATH: &str = "/health";

/// Build the router serving `server`.
pub fn router(server: Arc<McpServer>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(MCP_PATH, get(mcp_get_handler).post(mcp_post_handler))
        .route(HEALTH_PATH, get(health_handler))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(server)
}

/// Serve `server` on `listener` until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    server: Arc<McpServer>,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = listener.local_addr()?;
    info!(%addr, path = MCP_PATH, "MCP server listening");
    axum::serve(listener, router(server))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("MCP server stopped");
    Ok(())
}

async fn mcp_post_handler(
    State(server): State<Arc<McpServer>>,
    headers: HeaderMap,
    body: String,
) -> Response {
    let Some(response) = server.handle_str(&body).await else {
        return StatusCode::ACCEPTED.into_response();
    };

    let status = if response.is_envelope_error() {
        StatusCode::BAD_REQUEST
    } else {
        StatusCode::OK
    };

    if !sse::accepts_event_stream(&headers) {
        return (status, Json(response)).into_response();
    }

    match sse::encode_message(&response) {
        Ok(framed) => (
            status,
            [
                (header::CONTENT_TYPE, sse::EVENT_STREAM),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            framed,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to encode event-stream response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        },
    }
}

async fn mcp_get_handler() -> impl IntoResponse {
    (
        StatusCode::METHOD_NOT_ALLOWED,
        [(header::ALLOW, "POST")],
        "This server does not offer a server-initiated event stream; POST JSON-RPC requests to /mcp",
    )
}

async fn health_handler(State(server): State<Arc<McpServer>>) -> impl IntoResponse {
    let info = server.info();
    Json(serde_json::json!({
        "status": "ok",
        "name": info.name,
        "version": info.version,
        "tools": server.tools().len(),
    }))
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::tool::{McpTool, ToolRegistry},
        async_trait::async_trait,
        axum::{body::Body, http::Request},
        serde_json::{Value, json},
        tower::ServiceExt,
    };

    struct Status;

    #[async_trait]
    impl McpTool for Status {
        fn name(&self) -> &str {
            "get_connection_status"
        }

        fn description(&self) -> &str {
            "Report connection status"
        }

        fn parameters_schema(&self) -> Value {
            json!({"type": "object", "properties": {}})
        }

        async fn call(&self, _arguments: Value) -> anyhow::Result<Value> {
            Ok(json!({"success": true, "status": "connected"}))
        }
    }

    fn app() -> Router {
        let mut tools = ToolRegistry::new();
        tools.register(Box::new(Status));
        router(Arc::new(McpServer::new("calbridge", "0.1.0", tools)))
    }

    fn post(body: &str, accept: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(MCP_PATH)
            .header(header::CONTENT_TYPE, "application/json")
            .header(header::ACCEPT, accept)
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn post_with_event_stream_accept_is_framed() {
        let resp = app()
            .oneshot(post(
                r#"{"jsonrpc":"2.0","id":1,"method":"tools/call","params":{"name":"get_connection_status"}}"#,
                "application/json, text/event-stream",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.headers()[header::CONTENT_TYPE], sse::EVENT_STREAM);

        let body = body_string(resp).await;
        let events = sse::parse_event_stream(&body).unwrap();
        assert_eq!(events[0]["result"]["structuredContent"]["status"], "connected");
    }

    #[tokio::test]
    async fn post_without_event_stream_accept_is_plain_json() {
        let resp = app()
            .oneshot(post(r#"{"jsonrpc":"2.0","id":9,"method":"ping"}"#, "application/json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["id"], 9);
        assert_eq!(body["result"], json!({}));
    }

    #[tokio::test]
    async fn notification_is_accepted_without_body() {
        let resp = app()
            .oneshot(post(
                r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#,
                "application/json, text/event-stream",
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        assert!(body_string(resp).await.is_empty());
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let resp = app()
            .oneshot(post("{oops", "application/json"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["error"]["code"], -32700);
    }

    #[tokio::test]
    async fn get_mcp_is_not_allowed() {
        let resp = app()
            .oneshot(Request::builder().uri(MCP_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let resp = app()
            .oneshot(Request::builder().uri(HEALTH_PATH).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(body["status"], "ok");
        assert_eq!(body["tools"], 1);
    }
}
