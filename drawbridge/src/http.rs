//! HTTP transport adapter (§4.G): trivial bindings onto the mutation engine
//! and version history. No logic lives here beyond request/response shape.

use std::sync::Arc;

use rocket::serde::json::Json;
use rocket::State;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::OpenApi;

use crate::engine::Engine;
use crate::errors::{DrawbridgeError, DrawbridgeServeError};
use crate::model::Viewport;
use crate::mutation;
use crate::versions::{self, VersionsResponse};

#[derive(OpenApi)]
#[openapi(
    info(description = "Drawbridge: a real-time collaborative drawing backend"),
    paths(
        health,
        list_sessions,
        get_session,
        set_elements,
        append_elements,
        set_viewport,
        clear,
        undo,
        list_versions,
        restore,
    )
)]
pub struct ApiDoc;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub sessions: usize,
    pub clients: usize,
}

#[utoipa::path(tag = "drawbridge", responses((status = 200, description = "Process health and load")))]
#[get("/health")]
pub async fn health(engine: &State<Arc<Engine>>) -> Json<HealthResponse> {
    let clients: usize = engine.list_in_memory().await.iter().map(|(_, _, c)| c).sum();
    Json(HealthResponse {
        status: "ok",
        sessions: engine.session_count(),
        clients,
    })
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub element_count: usize,
    pub client_count: usize,
}

#[utoipa::path(tag = "drawbridge", responses((status = 200, description = "In-memory sessions")))]
#[get("/api/sessions")]
pub async fn list_sessions(engine: &State<Arc<Engine>>) -> Json<Vec<SessionSummary>> {
    let sessions = engine
        .list_in_memory()
        .await
        .into_iter()
        .map(|(id, element_count, client_count)| SessionSummary { id, element_count, client_count })
        .collect();
    Json(sessions)
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub id: String,
    pub elements: Vec<Value>,
    pub app_state: Option<Value>,
    pub viewport: Option<Viewport>,
}

#[utoipa::path(tag = "drawbridge", responses(
    (status = 200, description = "Session state, lazily loaded from disk"),
    (status = 500, description = "Storage fault"),
))]
#[get("/api/session/<id>")]
pub async fn get_session(id: &str, engine: &State<Arc<Engine>>) -> Result<Json<SessionResponse>, DrawbridgeServeError> {
    let session = engine.get_session(id).await.map_err(Into::<DrawbridgeServeError>::into)?;
    let state = session.state.lock().await;
    Ok(Json(SessionResponse {
        id: id.to_string(),
        elements: state.snapshot.elements.clone(),
        app_state: state.snapshot.app_state.clone(),
        viewport: state.snapshot.viewport,
    }))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementsBody {
    pub elements: Vec<Value>,
    #[serde(default)]
    pub app_state: Option<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ElementsResponse {
    pub success: bool,
    pub element_count: usize,
    pub clients: usize,
}

#[utoipa::path(tag = "drawbridge", request_body = String, responses(
    (status = 200, description = "Elements replaced"),
    (status = 500, description = "Storage fault"),
))]
#[post("/api/session/<id>/elements", data = "<body>")]
pub async fn set_elements(
    id: &str,
    body: Json<ElementsBody>,
    engine: &State<Arc<Engine>>,
) -> Result<Json<ElementsResponse>, DrawbridgeServeError> {
    let body = body.into_inner();
    let outcome = mutation::set_elements(engine, id, body.elements, body.app_state)
        .await
        .map_err(Into::<DrawbridgeServeError>::into)?;
    Ok(Json(ElementsResponse {
        success: true,
        element_count: outcome.element_count,
        clients: outcome.clients,
    }))
}

#[derive(Deserialize)]
pub struct AppendBody {
    pub elements: Vec<Value>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AppendResponse {
    pub success: bool,
    pub element_count: usize,
}

#[utoipa::path(tag = "drawbridge", request_body = String, responses(
    (status = 200, description = "Elements appended"),
    (status = 500, description = "Storage fault"),
))]
#[post("/api/session/<id>/append", data = "<body>")]
pub async fn append_elements(
    id: &str,
    body: Json<AppendBody>,
    engine: &State<Arc<Engine>>,
) -> Result<Json<AppendResponse>, DrawbridgeServeError> {
    let body = body.into_inner();
    let outcome = mutation::append_elements(engine, id, body.elements)
        .await
        .map_err(Into::<DrawbridgeServeError>::into)?;
    Ok(Json(AppendResponse {
        success: true,
        element_count: outcome.element_count,
    }))
}

#[derive(Deserialize, Default)]
pub struct ViewportBody {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub width: Option<f64>,
    pub height: Option<f64>,
}

#[derive(Serialize)]
pub struct ViewportResponse {
    pub success: bool,
    pub viewport: Viewport,
}

#[utoipa::path(tag = "drawbridge", request_body = String, responses(
    (status = 200, description = "Viewport set, defaulting missing fields"),
    (status = 500, description = "Storage fault"),
))]
#[post("/api/session/<id>/viewport", data = "<body>")]
pub async fn set_viewport(
    id: &str,
    body: Json<ViewportBody>,
    engine: &State<Arc<Engine>>,
) -> Result<Json<ViewportResponse>, DrawbridgeServeError> {
    let body = body.into_inner();
    let mut viewport = Viewport::default();
    if let Some(x) = body.x {
        viewport.x = x;
    }
    if let Some(y) = body.y {
        viewport.y = y;
    }
    if let Some(width) = body.width {
        viewport.width = width;
    }
    if let Some(height) = body.height {
        viewport.height = height;
    }
    let viewport = mutation::set_viewport(engine, id, viewport)
        .await
        .map_err(Into::<DrawbridgeServeError>::into)?;
    Ok(Json(ViewportResponse { success: true, viewport }))
}

#[derive(Serialize)]
pub struct SuccessResponse {
    pub success: bool,
}

#[utoipa::path(tag = "drawbridge", responses(
    (status = 200, description = "Session cleared"),
    (status = 500, description = "Storage fault"),
))]
#[post("/api/session/<id>/clear")]
pub async fn clear(id: &str, engine: &State<Arc<Engine>>) -> Result<Json<SuccessResponse>, DrawbridgeServeError> {
    mutation::clear(engine, id).await.map_err(Into::<DrawbridgeServeError>::into)?;
    Ok(Json(SuccessResponse { success: true }))
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UndoResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[utoipa::path(tag = "drawbridge", responses(
    (status = 200, description = "Undo applied, or reported as impossible with an empty log"),
))]
#[post("/api/session/<id>/undo")]
pub async fn undo(id: &str, engine: &State<Arc<Engine>>) -> Result<Json<UndoResponse>, DrawbridgeServeError> {
    match mutation::undo(engine, id).await {
        Ok(element_count) => Ok(Json(UndoResponse {
            success: true,
            element_count: Some(element_count),
            message: None,
        })),
        Err(DrawbridgeError::NothingToUndo(_)) => Ok(Json(UndoResponse {
            success: false,
            element_count: None,
            message: Some("no log entries to undo".to_string()),
        })),
        Err(e) => Err(e.into()),
    }
}

#[utoipa::path(tag = "drawbridge", responses(
    (status = 200, description = "Version history for a session"),
))]
#[get("/api/session/<id>/versions")]
pub async fn list_versions(id: &str, engine: &State<Arc<Engine>>) -> Result<Json<VersionsResponse>, DrawbridgeServeError> {
    let response = versions::list_versions(engine, id).await.map_err(Into::<DrawbridgeServeError>::into)?;
    Ok(Json(response))
}

#[derive(Deserialize)]
pub struct RestoreBody {
    pub timestamp: u128,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreResponse {
    pub success: bool,
    pub element_count: usize,
}

#[utoipa::path(tag = "drawbridge", request_body = String, responses(
    (status = 200, description = "Restored to the requested version"),
    (status = 404, description = "No versioned snapshot at that timestamp"),
))]
#[post("/api/session/<id>/restore", data = "<body>")]
pub async fn restore(
    id: &str,
    body: Json<RestoreBody>,
    engine: &State<Arc<Engine>>,
) -> Result<Json<RestoreResponse>, DrawbridgeServeError> {
    let element_count = versions::restore_version(engine, id, body.into_inner().timestamp)
        .await
        .map_err(Into::<DrawbridgeServeError>::into)?;
    Ok(Json(RestoreResponse { success: true, element_count }))
}
