//! `GET /api/images/:sessionId/:filename` — serves a rendered candidate
//! PNG, rejecting any session id or filename that doesn't match the
//! required shape before ever touching the filesystem (§6, invariant 9).

use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;

use beamforge_core::domain::SessionId;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn get_image(
    State(state): State<AppState>,
    Path((session_id, filename)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    if !SessionId::is_well_formed(&session_id) {
        return Err(ApiError::bad_request(format!(
            "invalid session id '{session_id}'"
        )));
    }

    let bytes = state.store.get_image(&session_id, &filename).await?;

    let mut response = bytes.into_response();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
    response.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("public, max-age=3600"),
    );
    *response.status_mut() = StatusCode::OK;
    Ok(response)
}

pub fn router() -> Router<AppState> {
    Router::new().route("/api/images/:session_id/:filename", get(get_image))
}
