use super::error::DeployError;
use super::node::MlNode;
use super::protocol::*;
use crate::registry::types::ModelId;
use crate::task::types::TaskId;
use crate::transport::protocol::{ENDPOINT_NODE_MESSAGE, NodeMessage, NodeReply};
use crate::transport::MessageHandler;

use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router, extract::Path, http::StatusCode};
use std::sync::Arc;

pub fn router(node: Arc<MlNode>) -> Router {
    Router::new()
        .route(ENDPOINT_LOAD_MODEL, post(handle_load_model))
        .route(ENDPOINT_UNLOAD_MODELS, post(handle_unload_models))
        .route(ENDPOINT_REFRESH_MODEL, post(handle_refresh_model))
        .route(ENDPOINT_GET_MODEL, get(handle_get_model))
        .route(ENDPOINT_GET_TASK, get(handle_get_task))
        .route(ENDPOINT_NODE_MESSAGE, post(handle_node_message))
        .layer(Extension(node))
}

pub fn status_for(error: &DeployError) -> StatusCode {
    match error {
        DeployError::CircuitBreakerOpen { .. } => StatusCode::SERVICE_UNAVAILABLE,
        DeployError::InvalidRequest(_) | DeployError::NoEligibleNodes => StatusCode::BAD_REQUEST,
        DeployError::TaskLimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
        DeployError::ResourceStats(_) | DeployError::Persistence(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn error_response(error: DeployError) -> Response {
    tracing::warn!("Request rejected: {}", error);
    (
        status_for(&error),
        Json(ErrorResponse {
            error: error.to_string(),
        }),
    )
        .into_response()
}

pub async fn handle_load_model(
    Extension(node): Extension<Arc<MlNode>>,
    Path(model_id): Path<String>,
    Json(body): Json<LoadModelBody>,
) -> Response {
    let request = LoadModelRequest {
        model_id: ModelId(model_id),
        node_ids: body.node_ids,
    };

    match node.coordinator.load_model(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_unload_models(
    Extension(node): Extension<Arc<MlNode>>,
    Json(request): Json<UnloadModelsRequest>,
) -> Response {
    match node.coordinator.unload_models(request).await {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_refresh_model(
    Extension(node): Extension<Arc<MlNode>>,
    Path(model_id): Path<String>,
    Json(body): Json<RefreshBody>,
) -> Response {
    match node
        .coordinator
        .refresh_model_cache(&ModelId(model_id), body.node_ids, body.predictor_only)
        .await
    {
        Ok(response) => (StatusCode::OK, Json(response)).into_response(),
        Err(e) => error_response(e),
    }
}

pub async fn handle_get_model(
    Extension(node): Extension<Arc<MlNode>>,
    Path(model_id): Path<String>,
) -> Response {
    let view = node.coordinator.get_model(&ModelId(model_id));
    (StatusCode::OK, Json(view)).into_response()
}

pub async fn handle_get_task(
    Extension(node): Extension<Arc<MlNode>>,
    Path(task_id): Path<String>,
) -> Response {
    let task_id = TaskId(task_id);

    match node.coordinator.get_task(&task_id).await {
        Ok(Some(task)) => (StatusCode::OK, Json(task)).into_response(),
        Ok(None) => {
            tracing::debug!("Task not found: {}", task_id);
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: format!("Task {} not found", task_id),
                }),
            )
                .into_response()
        }
        Err(e) => {
            tracing::error!("Failed to read task {}: {}", task_id, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

pub async fn handle_node_message(
    Extension(node): Extension<Arc<MlNode>>,
    Json(message): Json<NodeMessage>,
) -> (StatusCode, Json<NodeReply>) {
    let kind = message.kind();
    match node.handle(message).await {
        Ok(reply) => (StatusCode::OK, Json(reply)),
        Err(e) => {
            tracing::error!("Failed to handle {}: {}", kind, e);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(NodeReply::Rejected {
                    reason: e.to_string(),
                }),
            )
        }
    }
}
