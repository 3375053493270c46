//! # REST + JSON-RPC + WebSocket API
//!
//! Builds the axum router that exposes the node's HTTP interface. All
//! endpoints share application state through axum's `State` extractor.
//!
//! ## Endpoints
//!
//! | Method | Path                   | Description                            |
//! |--------|------------------------|----------------------------------------|
//! | GET    | `/health`              | Liveness probe                         |
//! | GET    | `/status`              | Marketplace summary                    |
//! | POST   | `/rpc`                 | JSON-RPC 2.0 gateway                   |
//! | GET    | `/ws`                  | WebSocket stream of marketplace events |
//! | GET    | `/requests/:id`        | Request record and status              |
//! | GET    | `/undelivered`         | Page of undelivered request ids        |
//! | GET    | `/accounts/:address`   | Balances, nonce and karma              |
//! | GET    | `/events`              | Page of the persisted event log        |
//!
//! ## JSON-RPC methods
//!
//! Reads take positional params: `mech_requestStatus [id]`,
//! `mech_getRequest [id]`, `mech_nonce [address]`,
//! `mech_undelivered [offset, limit]`, plus `mech_version` and
//! `mech_chainId`. Writes (`mech_request`, `mech_deliver`,
//! `mech_deliverWithSignatures`, `mech_deposit`, `mech_processPayment`,
//! `mech_drain`) take a single [`SignedCall`] object.

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::{Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use mech_contracts::devnet::AccountView;
use mech_contracts::marketplace::RequestRecord;
use mech_contracts::{MarketplaceEvent, RequestId, RequestStatus};
use mech_protocol::config::MAX_PAGE_SIZE;
use mech_protocol::identity::Address;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::envelope::{SignedCall, WRITE_METHODS};
use crate::node::{unix_now, MarketNode, NodeError, NodeSummary};

// ---------------------------------------------------------------------------
// Application State
// ---------------------------------------------------------------------------

/// Shared application state available to all request handlers.
#[derive(Clone)]
pub struct AppState {
    /// The node's reported version string.
    pub version: String,
    pub node: Arc<MarketNode>,
}

// ---------------------------------------------------------------------------
// Router Construction
// ---------------------------------------------------------------------------

/// Builds the full axum [`Router`] with all API routes, CORS, and tracing.
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler))
        .route("/rpc", post(rpc_handler))
        .route("/ws", get(ws_handler))
        .route("/requests/:id", get(request_handler))
        .route("/undelivered", get(undelivered_handler))
        .route("/accounts/:address", get(account_handler))
        .route("/events", get(events_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// JSON-RPC Types
// ---------------------------------------------------------------------------

/// A JSON-RPC 2.0 request envelope.
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    /// Protocol version. Must be "2.0".
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<Value>,
    /// Echoed back in the response.
    pub id: Value,
}

/// A JSON-RPC 2.0 response envelope.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JsonRpcError>,
    pub id: Value,
}

/// A JSON-RPC 2.0 error object.
#[derive(Debug, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
pub const INTERNAL_ERROR: i32 = -32603;
/// The requested record does not exist.
pub const NOT_FOUND: i32 = -32001;
/// The signed envelope was refused before execution.
pub const CALL_REFUSED: i32 = -32002;
/// The marketplace rejected the call.
pub const CALL_REVERTED: i32 = -32003;

impl JsonRpcError {
    fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    fn invalid_params(expected: &str) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: expected {expected}"))
    }
}

impl From<NodeError> for JsonRpcError {
    fn from(e: NodeError) -> Self {
        let code = match &e {
            NodeError::Marketplace(_) => CALL_REVERTED,
            NodeError::Storage(_) => INTERNAL_ERROR,
            _ => CALL_REFUSED,
        };
        Self {
            code,
            message: e.to_string(),
            data: Some(serde_json::json!({ "kind": e.kind() })),
        }
    }
}

// ---------------------------------------------------------------------------
// Response Types
// ---------------------------------------------------------------------------

/// Response payload for `GET /status`.
#[derive(Debug, Serialize, Deserialize)]
pub struct StatusResponse {
    pub version: String,
    #[serde(flatten)]
    pub summary: NodeSummary,
    /// ISO-8601 timestamp of the response.
    pub timestamp: String,
}

/// Response payload for `GET /requests/:id` and `mech_getRequest`.
#[derive(Debug, Serialize, Deserialize)]
pub struct RequestResponse {
    pub request_id: RequestId,
    pub status: RequestStatus,
    #[serde(flatten)]
    pub record: RequestRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UndeliveredResponse {
    pub offset: usize,
    pub request_ids: Vec<RequestId>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EventEntry {
    pub seq: u64,
    pub event: MarketplaceEvent,
}

#[derive(Debug, Deserialize)]
pub struct PageQuery {
    #[serde(default)]
    pub offset: Option<usize>,
    #[serde(default)]
    pub from: Option<u64>,
    #[serde(default)]
    pub limit: Option<usize>,
}

impl PageQuery {
    fn limit(&self) -> usize {
        self.limit.unwrap_or(100).min(MAX_PAGE_SIZE)
    }
}

/// Generic error body returned by REST endpoints on failure.
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, error: impl Into<String>) -> Response {
    (status, Json(ErrorResponse { error: error.into() })).into_response()
}

fn internal_error(e: NodeError) -> Response {
    tracing::error!("read failed: {}", e);
    error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("Internal error: {e}"))
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `GET /health`: liveness probe. Does not check subsystems; that is what
/// `/status` is for.
async fn health_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

/// `GET /status`
async fn status_handler(State(state): State<AppState>) -> Response {
    match state.node.summary() {
        Ok(summary) => Json(StatusResponse {
            version: state.version.clone(),
            summary,
            timestamp: chrono::Utc::now().to_rfc3339(),
        })
        .into_response(),
        Err(e) => internal_error(e),
    }
}

fn lookup_request(node: &MarketNode, id: RequestId) -> Result<Option<RequestResponse>, NodeError> {
    let Some(record) = node.request(&id)? else {
        return Ok(None);
    };
    Ok(Some(RequestResponse {
        request_id: id,
        status: record.status(unix_now()),
        record,
    }))
}

/// `GET /requests/:id`, id as 64 hex characters.
async fn request_handler(Path(id): Path<String>, State(state): State<AppState>) -> Response {
    let Ok(id) = id.parse::<RequestId>() else {
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid request id: {id}"));
    };
    match lookup_request(&state.node, id) {
        Ok(Some(resp)) => Json(resp).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, format!("Request not found: {id}")),
        Err(e) => internal_error(e),
    }
}

/// `GET /undelivered?offset&limit`, oldest first.
async fn undelivered_handler(
    Query(page): Query<PageQuery>,
    State(state): State<AppState>,
) -> Response {
    let offset = page.offset.unwrap_or(0);
    match state.node.undelivered(offset, page.limit()) {
        Ok(request_ids) => Json(UndeliveredResponse {
            offset,
            request_ids,
        })
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// `GET /accounts/:address`, address in bech32. Unknown accounts read as
/// zero everywhere.
async fn account_handler(Path(address): Path<String>, State(state): State<AppState>) -> Response {
    let Ok(address) = address.parse::<Address>() else {
        return error_response(StatusCode::BAD_REQUEST, format!("Invalid address: {address}"));
    };
    match state.node.account(&address) {
        Ok(view) => Json::<AccountView>(view).into_response(),
        Err(e) => internal_error(e),
    }
}

/// `GET /events?from&limit`
async fn events_handler(Query(page): Query<PageQuery>, State(state): State<AppState>) -> Response {
    match state.node.events_from(page.from.unwrap_or(0), page.limit()) {
        Ok(events) => Json(
            events
                .into_iter()
                .map(|(seq, event)| EventEntry { seq, event })
                .collect::<Vec<_>>(),
        )
        .into_response(),
        Err(e) => internal_error(e),
    }
}

/// `POST /rpc`: JSON-RPC 2.0 gateway. Unknown methods return -32601.
async fn rpc_handler(
    State(state): State<AppState>,
    Json(req): Json<JsonRpcRequest>,
) -> Json<JsonRpcResponse> {
    if req.jsonrpc != "2.0" {
        return Json(JsonRpcResponse {
            jsonrpc: "2.0".into(),
            result: None,
            error: Some(JsonRpcError::new(
                INVALID_REQUEST,
                "Invalid Request: jsonrpc must be \"2.0\"",
            )),
            id: req.id,
        });
    }

    let (result, error) = match dispatch_rpc(&state, &req.method, req.params.as_ref()).await {
        Ok(value) => (Some(value), None),
        Err(e) => (None, Some(e)),
    };
    Json(JsonRpcResponse {
        jsonrpc: "2.0".into(),
        result,
        error,
        id: req.id,
    })
}

async fn dispatch_rpc(
    state: &AppState,
    method: &str,
    params: Option<&Value>,
) -> Result<Value, JsonRpcError> {
    let node = &state.node;
    match method {
        "mech_version" => Ok(serde_json::json!(state.version)),
        "mech_chainId" => Ok(serde_json::json!(node.chain_id())),
        "mech_requestStatus" => {
            let id = param_request_id(params)?;
            Ok(to_value(node.request_status(&id, unix_now())?))
        }
        "mech_getRequest" => {
            let id = param_request_id(params)?;
            match lookup_request(node, id)? {
                Some(resp) => Ok(to_value(resp)),
                None => Err(JsonRpcError::new(
                    NOT_FOUND,
                    format!("Request not found: {id}"),
                )),
            }
        }
        "mech_nonce" => {
            let address = positional(params, 0)
                .and_then(Value::as_str)
                .and_then(|s| s.parse::<Address>().ok())
                .ok_or_else(|| JsonRpcError::invalid_params("[address]"))?;
            Ok(to_value(node.nonce(&address)?))
        }
        "mech_undelivered" => {
            let offset = positional(params, 0).and_then(Value::as_u64).unwrap_or(0) as usize;
            let limit = positional(params, 1)
                .and_then(Value::as_u64)
                .map_or(100, |l| l as usize)
                .min(MAX_PAGE_SIZE);
            Ok(to_value(node.undelivered(offset, limit)?))
        }
        m if WRITE_METHODS.contains(&m) => {
            let envelope: SignedCall = params
                .cloned()
                .and_then(|p| serde_json::from_value(p).ok())
                .ok_or_else(|| JsonRpcError::invalid_params("a signed call object"))?;
            // Execution holds the write lock and touches sled; keep it off
            // the async workers.
            let node = Arc::clone(node);
            let method = m.to_string();
            let outcome =
                tokio::task::spawn_blocking(move || node.execute(&method, &envelope, unix_now()))
                    .await
                    .map_err(|e| JsonRpcError::new(INTERNAL_ERROR, format!("call task failed: {e}")))??;
            Ok(to_value(outcome))
        }
        _ => Err(JsonRpcError::new(
            METHOD_NOT_FOUND,
            format!("Method not found: {method}"),
        )),
    }
}

fn positional(params: Option<&Value>, index: usize) -> Option<&Value> {
    params?.as_array()?.get(index)
}

fn param_request_id(params: Option<&Value>) -> Result<RequestId, JsonRpcError> {
    positional(params, 0)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<RequestId>().ok())
        .ok_or_else(|| JsonRpcError::invalid_params("[request_id]"))
}

fn to_value<T: Serialize>(value: T) -> Value {
    // Every type passed here serializes to JSON infallibly.
    serde_json::to_value(value).unwrap_or(Value::Null)
}

/// `GET /ws`: WebSocket upgrade for live event streaming.
///
/// Clients receive one JSON-encoded [`MarketplaceEvent`] per message, in
/// commit order. Client messages are ignored.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state))
}

async fn handle_ws_connection(mut socket: WebSocket, state: AppState) {
    let mut rx = state.node.subscribe();

    loop {
        tokio::select! {
            event = rx.recv() => {
                match event {
                    Ok(ev) => {
                        let payload = match serde_json::to_string(&ev) {
                            Ok(s) => s,
                            Err(e) => {
                                tracing::warn!("failed to serialize ws event: {}", e);
                                continue;
                            }
                        };
                        if socket.send(Message::Text(payload.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("ws subscriber lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = socket.recv() => {
                match msg {
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
