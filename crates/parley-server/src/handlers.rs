//! RPC method handlers. The authenticated user of the connection is the
//! implicit actor of every method.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use parley_core::errors::CoordinatorError;
use parley_core::ids::{CallId, ConversationId, ShopId, UserId};
use parley_core::model::MessageKind;
use parley_engine::{CallSessionManager, ConnectionRegistry, DeliveryEngine, TypingTracker};

use crate::rpc::{self, RpcResponse};

/// Shared state available to all RPC handlers.
pub struct HandlerState {
    pub registry: Arc<ConnectionRegistry>,
    pub delivery: Arc<DeliveryEngine>,
    pub calls: Arc<CallSessionManager>,
    pub typing: Arc<TypingTracker>,
}

/// Dispatch an RPC method to the appropriate handler.
pub async fn dispatch(
    state: &Arc<HandlerState>,
    actor: &UserId,
    method: &str,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    match method {
        // Conversations & messages
        "open_conversation" => open_conversation(state, actor, params, id).await,
        "list_conversations" => list_conversations(state, actor, id).await,
        "send_message" => send_message(state, actor, params, id).await,
        "load_messages" => load_messages(state, actor, params, id).await,
        "mark_read" => mark_read(state, actor, params, id).await,

        // Presence
        "typing" => typing(state, actor, params, id).await,

        // Calls
        "request_call" => request_call(state, actor, params, id).await,
        "respond_call" => respond_call(state, actor, params, id).await,
        "end_call" => end_call(state, actor, params, id).await,

        // System
        "system.ping" | "health" => health(state, id),

        _ => RpcResponse::method_not_found(id, method),
    }
}

fn to_response(
    id: Option<serde_json::Value>,
    result: Result<serde_json::Value, CoordinatorError>,
) -> RpcResponse {
    match result {
        Ok(value) => RpcResponse::success(id, value),
        Err(err) => {
            if !err.is_validation() {
                tracing::error!(code = err.code(), error = %err, "rpc handler failed");
            }
            RpcResponse::domain_error(id, &err)
        }
    }
}

async fn open_conversation(
    state: &Arc<HandlerState>,
    actor: &UserId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let seller_id = match rpc::require_str(params, "seller_id") {
        Ok(s) => UserId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let shop_id = match rpc::require_str(params, "shop_id") {
        Ok(s) => ShopId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    // The seller's own app passes the customer explicitly; customers are
    // implicitly themselves.
    let customer_id = rpc::optional_str(params, "customer_id")
        .map(UserId::from_raw)
        .unwrap_or_else(|| actor.clone());

    if *actor != customer_id && *actor != seller_id {
        return RpcResponse::domain_error(id, &CoordinatorError::NotParticipant);
    }

    let result = state
        .delivery
        .open_conversation(&customer_id, &seller_id, &shop_id)
        .await
        .and_then(|conv| {
            serde_json::to_value(&conv).map_err(|e| CoordinatorError::Internal(e.to_string()))
        });
    to_response(id, result)
}

async fn list_conversations(
    state: &Arc<HandlerState>,
    actor: &UserId,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let summaries = match state.delivery.store().list_conversations(actor).await {
        Ok(s) => s,
        Err(err) => return to_response(id, Err(err)),
    };

    let mut conversations = Vec::with_capacity(summaries.len());
    for summary in &summaries {
        let online = summary
            .conversation
            .counterpart(actor)
            .map(|peer| state.registry.is_reachable(peer))
            .unwrap_or(false);
        let mut entry = match serde_json::to_value(summary) {
            Ok(v) => v,
            Err(e) => return to_response(id, Err(CoordinatorError::Internal(e.to_string()))),
        };
        entry["counterpart_online"] = serde_json::Value::Bool(online);
        conversations.push(entry);
    }
    RpcResponse::success(id, serde_json::json!({ "conversations": conversations }))
}

async fn send_message(
    state: &Arc<HandlerState>,
    actor: &UserId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let conversation_id = match rpc::require_str(params, "conversation_id") {
        Ok(s) => ConversationId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let body = rpc::optional_str(params, "body").unwrap_or_default().to_string();
    let image_ref = rpc::optional_str(params, "image_ref").map(str::to_string);

    if body.is_empty() && image_ref.is_none() {
        return RpcResponse::invalid_params(id, "body or image_ref required");
    }
    // System kinds are minted by the coordinator, never accepted from the
    // wire.
    let kind = if image_ref.is_some() {
        MessageKind::Image
    } else {
        MessageKind::Text
    };

    let result = state
        .delivery
        .send_message(&conversation_id, actor, body, image_ref, kind)
        .await
        .and_then(|message| {
            serde_json::to_value(&message).map_err(|e| CoordinatorError::Internal(e.to_string()))
        });
    to_response(id, result)
}

async fn load_messages(
    state: &Arc<HandlerState>,
    actor: &UserId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let conversation_id = match rpc::require_str(params, "conversation_id") {
        Ok(s) => ConversationId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let before: Option<DateTime<Utc>> = match rpc::optional_str(params, "before") {
        Some(raw) => match DateTime::parse_from_rfc3339(raw) {
            Ok(ts) => Some(ts.with_timezone(&Utc)),
            Err(_) => return RpcResponse::invalid_params(id, "before must be an RFC 3339 timestamp"),
        },
        None => None,
    };

    let result = state
        .delivery
        .load_messages(&conversation_id, actor, before)
        .await
        .and_then(|messages| {
            serde_json::to_value(serde_json::json!({ "messages": messages }))
                .map_err(|e| CoordinatorError::Internal(e.to_string()))
        });
    to_response(id, result)
}

async fn mark_read(
    state: &Arc<HandlerState>,
    actor: &UserId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let conversation_id = match rpc::require_str(params, "conversation_id") {
        Ok(s) => ConversationId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let result = state
        .delivery
        .mark_read(&conversation_id, actor)
        .await
        .map(|()| serde_json::json!({}));
    to_response(id, result)
}

async fn typing(
    state: &Arc<HandlerState>,
    actor: &UserId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let conversation_id = match rpc::require_str(params, "conversation_id") {
        Ok(s) => ConversationId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let is_typing = match rpc::require_bool(params, "is_typing") {
        Ok(b) => b,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let result = state
        .typing
        .set_typing(&conversation_id, actor, is_typing)
        .await
        .map(|()| serde_json::json!({}));
    to_response(id, result)
}

async fn request_call(
    state: &Arc<HandlerState>,
    actor: &UserId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let conversation_id = match rpc::require_str(params, "conversation_id") {
        Ok(s) => ConversationId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let result = state
        .calls
        .request_call(&conversation_id, actor)
        .await
        .map(|outcome| {
            serde_json::json!({
                "session_id": outcome.session_id,
                "callee_reachable": outcome.callee_reachable,
            })
        });
    to_response(id, result)
}

async fn respond_call(
    state: &Arc<HandlerState>,
    actor: &UserId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match rpc::require_str(params, "session_id") {
        Ok(s) => CallId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let accept = match rpc::require_bool(params, "accept") {
        Ok(b) => b,
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let result = if accept {
        state.calls.accept_call(&session_id, actor).await
    } else {
        state.calls.reject_call(&session_id, actor).await
    };
    to_response(id, result.map(|()| serde_json::json!({})))
}

async fn end_call(
    state: &Arc<HandlerState>,
    actor: &UserId,
    params: &serde_json::Value,
    id: Option<serde_json::Value>,
) -> RpcResponse {
    let session_id = match rpc::require_str(params, "session_id") {
        Ok(s) => CallId::from_raw(s),
        Err(e) => return RpcResponse::invalid_params(id, e),
    };
    let result = state
        .calls
        .end_call(&session_id, actor)
        .await
        .map(|()| serde_json::json!({}));
    to_response(id, result)
}

pub(crate) fn health(state: &Arc<HandlerState>, id: Option<serde_json::Value>) -> RpcResponse {
    RpcResponse::success(
        id,
        serde_json::json!({
            "status": "healthy",
            "connections": state.registry.count(),
            "version": env!("CARGO_PKG_VERSION"),
        }),
    )
}
