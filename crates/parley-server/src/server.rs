use std::sync::Arc;

use axum::extract::ws::WebSocket;
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;

use parley_core::identity::{AuthError, IdentityProvider};
use parley_core::ids::{ConnectionId, UserId};
use parley_core::push::PushGateway;
use parley_core::store::ConversationStore;
use parley_engine::{
    registry, CallSessionManager, ConnectionRegistry, CoordinatorConfig, DeliveryEngine,
    NotificationDispatcher, TypingTracker,
};

use crate::handlers::HandlerState;
use crate::rpc::{RpcRequest, RpcResponse};
use crate::ws;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub coordinator: CoordinatorConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9440,
            coordinator: CoordinatorConfig::default(),
        }
    }
}

/// Shared application state passed to axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub handler_state: Arc<HandlerState>,
    pub identity: Arc<dyn IdentityProvider>,
    pub message_tx: mpsc::Sender<(ConnectionId, String)>,
}

/// Build the axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Wire the coordinator together and start serving. Returns a handle that
/// keeps the background tasks alive.
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn ConversationStore>,
    push: Arc<dyn PushGateway>,
    identity: Arc<dyn IdentityProvider>,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ConnectionRegistry::new(config.coordinator.max_send_queue));
    let dispatcher = Arc::new(NotificationDispatcher::new(Arc::clone(&registry), push));
    let delivery = Arc::new(DeliveryEngine::new(
        Arc::clone(&store),
        Arc::clone(&dispatcher),
        config.coordinator.page_size,
    ));
    let calls = Arc::new(CallSessionManager::new(
        Arc::clone(&store),
        Arc::clone(&dispatcher),
        Arc::clone(&delivery),
        config.coordinator.ring_timeout,
        config.coordinator.session_linger,
    ));
    let typing = Arc::new(TypingTracker::new(
        store,
        Arc::clone(&dispatcher),
        config.coordinator.typing_idle,
    ));

    let _cleanup = registry::start_cleanup_task(
        Arc::clone(&registry),
        std::time::Duration::from_secs(60),
    );

    let handler_state = Arc::new(HandlerState {
        registry,
        delivery,
        calls,
        typing,
    });

    let (msg_tx, msg_rx) = mpsc::channel::<(ConnectionId, String)>(1024);
    let rpc_state = Arc::clone(&handler_state);
    let rpc_handle = tokio::spawn(process_rpc_messages(msg_rx, rpc_state));

    let app_state = AppState {
        handler_state,
        identity,
        message_tx: msg_tx,
    };

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "parley server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _rpc: rpc_handle,
        _cleanup,
    })
}

/// Handle returned by `start()`. Dropping it stops the background tasks.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _rpc: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

#[derive(Deserialize)]
struct WsQuery {
    token: Option<String>,
}

/// WebSocket upgrade. The token is verified before the upgrade completes;
/// an invalid token never reaches the socket loop.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    let Some(token) = query.token else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let user_id = match state.identity.verify_token(&token).await {
        Ok(user_id) => user_id,
        Err(AuthError::InvalidToken) => return StatusCode::UNAUTHORIZED.into_response(),
        Err(AuthError::Unavailable(e)) => {
            tracing::error!(error = %e, "identity provider unavailable");
            return StatusCode::SERVICE_UNAVAILABLE.into_response();
        }
    };
    ws.on_upgrade(move |socket| handle_socket(socket, user_id, state))
}

async fn handle_socket(socket: WebSocket, user_id: UserId, state: AppState) {
    let (connection_id, rx) = state.handler_state.registry.register(&user_id);
    tracing::info!(connection_id = %connection_id, user_id = %user_id, "websocket connected");

    ws::handle_ws_connection(
        socket,
        connection_id,
        rx,
        Arc::clone(&state.handler_state.registry),
        state.message_tx,
    )
    .await;
}

/// Liveness probe.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    let resp = crate::handlers::health(&state.handler_state, None);
    (StatusCode::OK, axum::Json(resp.result.unwrap_or_default()))
}

/// Process request frames from all connections. The actor is resolved from
/// the connection's registration; a frame from a connection that vanished
/// mid-flight is dropped.
async fn process_rpc_messages(
    mut rx: mpsc::Receiver<(ConnectionId, String)>,
    state: Arc<HandlerState>,
) {
    while let Some((connection_id, raw)) = rx.recv().await {
        let Some(actor) = state.registry.user_of(&connection_id) else {
            continue;
        };
        state.typing.touch(&actor);

        let request: RpcRequest = match serde_json::from_str(&raw) {
            Ok(req) => req,
            Err(_) => {
                let resp = RpcResponse::parse_error();
                if let Ok(json) = serde_json::to_string(&resp) {
                    state.registry.send_to(&connection_id, json);
                }
                continue;
            }
        };

        let params = request.params.unwrap_or_else(|| serde_json::json!({}));
        let response =
            crate::handlers::dispatch(&state, &actor, &request.method, &params, request.id).await;

        if let Ok(json) = serde_json::to_string(&response) {
            state.registry.send_to(&connection_id, json);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::identity::StaticTokenVerifier;
    use parley_push::RecordingPushGateway;
    use parley_store::{Database, SqliteConversationStore};

    fn deps() -> (
        Arc<dyn ConversationStore>,
        Arc<dyn PushGateway>,
        Arc<dyn IdentityProvider>,
    ) {
        let store: Arc<dyn ConversationStore> =
            Arc::new(SqliteConversationStore::new(Database::in_memory().unwrap()));
        let push: Arc<dyn PushGateway> = Arc::new(RecordingPushGateway::new());
        let mut verifier = StaticTokenVerifier::default();
        verifier.insert("good-token", UserId::from_raw("user_customer"));
        (store, push, Arc::new(verifier))
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (store, push, identity) = deps();
        let config = ServerConfig {
            port: 0, // random port
            ..Default::default()
        };

        let handle = start(config, store, push, identity).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["connections"], 0);
    }

    #[tokio::test]
    async fn ws_route_rejects_plain_http() {
        let (store, push, identity) = deps();
        let config = ServerConfig {
            port: 0,
            ..Default::default()
        };
        let handle = start(config, store, push, identity).await.unwrap();
        let base = format!("http://127.0.0.1:{}/ws", handle.port);

        // No upgrade headers, with or without a token: a client error,
        // never a hang or a 200.
        let resp = reqwest::get(&base).await.unwrap();
        assert!(resp.status().is_client_error());

        let resp = reqwest::get(format!("{base}?token=good-token")).await.unwrap();
        assert!(resp.status().is_client_error());
    }

    #[tokio::test]
    async fn build_router_creates_routes() {
        let (store, push, identity) = deps();
        let config = CoordinatorConfig::default();
        let registry = Arc::new(ConnectionRegistry::new(config.max_send_queue));
        let dispatcher = Arc::new(NotificationDispatcher::new(registry.clone(), push));
        let delivery = Arc::new(DeliveryEngine::new(
            store.clone(),
            dispatcher.clone(),
            config.page_size,
        ));
        let calls = Arc::new(CallSessionManager::new(
            store.clone(),
            dispatcher.clone(),
            delivery.clone(),
            config.ring_timeout,
            config.session_linger,
        ));
        let typing = Arc::new(TypingTracker::new(store, dispatcher, config.typing_idle));
        let handler_state = Arc::new(HandlerState {
            registry,
            delivery,
            calls,
            typing,
        });
        let (msg_tx, _) = mpsc::channel(32);

        let _router = build_router(AppState {
            handler_state,
            identity,
            message_tx: msg_tx,
        });
    }
}
