use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use serde::Serialize;
use serde_json::{json, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::{instrument, warn};

use crate::auth::dto::SessionUser;
use crate::auth::extractors::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

const MAX_UPLOAD_BYTES: usize = 20 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/dashboard", get(dashboard))
        .route(
            "/predict",
            post(predict).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/model-status", get(model_status))
}

#[derive(Debug, Serialize)]
struct DashboardResponse {
    success: bool,
    message: String,
    user: SessionUser,
}

async fn dashboard(AuthUser(claims): AuthUser) -> Json<DashboardResponse> {
    Json(DashboardResponse {
        success: true,
        message: "Welcome to the dashboard!".into(),
        user: SessionUser::from(&claims),
    })
}

struct Upload {
    data: Bytes,
    file_name: String,
    content_type: String,
}

async fn read_file_field(multipart: &mut Multipart) -> Result<Upload, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::Validation(format!("Malformed upload: {e}")))?
    {
        if field.name() != Some("file") {
            continue;
        }
        let file_name = field.file_name().unwrap_or("upload").to_string();
        let content_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        let data = field
            .bytes()
            .await
            .map_err(|e| ApiError::Validation(format!("Malformed upload: {e}")))?;
        return Ok(Upload {
            data,
            file_name,
            content_type,
        });
    }
    Err(ApiError::Validation("No file uploaded".into()))
}

fn proxy_error(err: reqwest::Error) -> ApiError {
    if err.is_timeout() || err.is_connect() {
        ApiError::ServiceUnavailable(
            "Unable to reach the prediction service. Please try again later.".into(),
        )
    } else {
        ApiError::Internal(err.into())
    }
}

/// Forward an uploaded image to the inference service. The model itself is an
/// external collaborator; this handler only attributes the result to the
/// caller and bounds how long the proxy call may take.
#[instrument(skip(state, claims, multipart), fields(user = %claims.sub))]
async fn predict(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
    mut multipart: Multipart,
) -> Result<Response, ApiError> {
    let upload = read_file_field(&mut multipart).await?;

    let part = reqwest::multipart::Part::bytes(upload.data.to_vec())
        .file_name(upload.file_name)
        .mime_str(&upload.content_type)
        .map_err(|_| ApiError::Validation("Unsupported content type".into()))?;
    let form = reqwest::multipart::Form::new().part("file", part);

    let response = state
        .http
        .post(format!("{}/predict", state.config.model_url))
        .multipart(form)
        .send()
        .await
        .map_err(proxy_error)?;

    let status = response.status();
    let mut payload: Value = response.json().await.map_err(proxy_error)?;

    if !status.is_success() {
        let message = payload
            .get("error")
            .and_then(Value::as_str)
            .unwrap_or("Prediction failed")
            .to_string();
        let status =
            StatusCode::from_u16(status.as_u16()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        return Ok((status, Json(json!({ "success": false, "message": message }))).into_response());
    }

    if let Some(result) = payload.as_object_mut() {
        result.insert(
            "user".into(),
            json!({ "email": claims.email, "username": claims.username }),
        );
        result.insert("timestamp".into(), json!(now_rfc3339()?));
    }
    Ok(Json(payload).into_response())
}

fn now_rfc3339() -> Result<String, ApiError> {
    OffsetDateTime::now_utc()
        .format(&Rfc3339)
        .map_err(|e| ApiError::Internal(e.into()))
}

/// Availability report for the inference service; an unreachable service is a
/// reported state here, not a request failure.
#[instrument(skip(state))]
async fn model_status(
    State(state): State<AppState>,
    AuthUser(_claims): AuthUser,
) -> Json<Value> {
    let probe = async {
        state
            .http
            .get(format!("{}/health", state.config.model_url))
            .send()
            .await?
            .error_for_status()?
            .json::<Value>()
            .await
    };
    match probe.await {
        Ok(body) => Json(json!({ "success": true, "model_service": body })),
        Err(e) => {
            warn!(error = %e, "model service unreachable");
            Json(json!({
                "success": false,
                "model_service": { "status": "unavailable" },
            }))
        }
    }
}
