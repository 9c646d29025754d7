//! HTTP surface over the lifecycle API
//!
//! Routes:
//! - `GET /api/health` - namespace and zone apps are deployed under
//! - `GET /api/apps` - every managed app, newest first
//! - `POST /api/apps` - deploy or redeploy an app for the caller
//! - `DELETE /api/apps/{name}` - remove an app the caller owns
//!
//! Authentication happens upstream. The caller's identity arrives in a
//! trusted header; mutating routes without it answer 401.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{error, warn};

use crate::lifecycle::{DeployRequest, Lifecycle};
use crate::Error;

/// Header the upstream proxy sets to the authenticated user
pub const DEFAULT_OWNER_HEADER: &str = "x-forwarded-user";

/// Shared state for all handlers
pub struct ApiState {
    lifecycle: Lifecycle,
    owner_header: String,
}

impl ApiState {
    /// Create handler state reading identities from `owner_header`
    pub fn new(lifecycle: Lifecycle, owner_header: impl Into<String>) -> Self {
        Self {
            lifecycle,
            owner_header: owner_header.into().to_ascii_lowercase(),
        }
    }
}

/// Errors returned by handlers
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The identity header is missing or blank
    #[error("missing caller identity")]
    MissingIdentity,

    /// The lifecycle operation failed
    #[error(transparent)]
    Lifecycle(#[from] Error),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::MissingIdentity => StatusCode::UNAUTHORIZED,
            ApiError::Lifecycle(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
        }
    }

    /// Whether the request was turned away before reaching the control plane
    fn is_rejection(&self) -> bool {
        match self {
            ApiError::MissingIdentity => true,
            ApiError::Lifecycle(err) => err.is_rejection(),
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::MissingIdentity => "unauthorized",
            ApiError::Lifecycle(Error::Validation { .. }) => "validation",
            ApiError::Lifecycle(Error::NotFound(_)) => "not_found",
            ApiError::Lifecycle(Error::Forbidden { .. }) => "forbidden",
            ApiError::Lifecycle(Error::ControlPlane { .. }) => "control_plane",
            ApiError::Lifecycle(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if self.is_rejection() {
            warn!(error = %self, status = status.as_u16(), "request rejected");
        } else {
            error!(error = %self, status = status.as_u16(), "request failed");
        }

        let mut body = json!({
            "ok": false,
            "error": self.code(),
            "message": self.to_string(),
            "statusCode": status.as_u16(),
        });
        match &self {
            ApiError::Lifecycle(Error::Validation {
                field,
                internal_name,
                ..
            }) => {
                body["field"] = json!(field);
                if let Some(name) = internal_name {
                    body["internalName"] = json!(name);
                }
            }
            ApiError::Lifecycle(Error::ControlPlane { reason, .. }) => {
                body["reason"] = json!(reason);
            }
            _ => {}
        }

        (status, Json(body)).into_response()
    }
}

/// Body of `POST /api/apps`
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployBody {
    /// App name
    #[serde(default)]
    pub app_name: String,
    /// Container image
    #[serde(default)]
    pub image: String,
    /// Container port as a number or numeric string
    #[serde(default)]
    pub port: Option<Value>,
}

impl DeployBody {
    /// Port from the body; `None` when missing or null
    ///
    /// Fractions are truncated and strings are read up to the first
    /// non-digit (`"3000abc"` is 3000). Anything without a leading integer
    /// is rejected rather than defaulted.
    fn port(&self) -> Result<Option<i64>, Error> {
        let invalid = || Error::validation("port", "port must be between 1 and 65535");
        match &self.port {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.is_finite()).map(|f| f.trunc() as i64))
                .map(Some)
                .ok_or_else(invalid),
            Some(Value::String(s)) => leading_integer(s).map(Some).ok_or_else(invalid),
            Some(_) => Err(invalid()),
        }
    }
}

/// Optional sign and leading digits after whitespace; `None` if there are no digits
fn leading_integer(raw: &str) -> Option<i64> {
    let trimmed = raw.trim_start();
    let (negative, rest) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let digits = rest.len() - rest.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return None;
    }
    // Overflow saturates so out-of-range input still fails the range check
    let value = rest[..digits].parse::<i64>().unwrap_or(i64::MAX);
    Some(if negative { -value } else { value })
}

fn caller(state: &ApiState, headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get(state.owner_header.as_str())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
        .ok_or(ApiError::MissingIdentity)
}

async fn health_handler(State(state): State<Arc<ApiState>>) -> Json<Value> {
    let health = state.lifecycle.health();
    Json(json!({
        "ok": true,
        "status": "up",
        "ns": health.ns,
        "zone": health.zone,
    }))
}

async fn list_handler(State(state): State<Arc<ApiState>>) -> Result<Json<Value>, ApiError> {
    let apps = state.lifecycle.list().await?;
    Ok(Json(json!({ "ok": true, "apps": apps })))
}

async fn deploy_handler(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    Json(body): Json<DeployBody>,
) -> Result<Json<Value>, ApiError> {
    let request = DeployRequest {
        owner: caller(&state, &headers)?,
        port: body.port()?,
        app_name: body.app_name,
        image: body.image,
    };
    let deployed = state.lifecycle.deploy(&request).await?;
    Ok(Json(json!({
        "ok": true,
        "internalName": deployed.internal_name,
        "host": deployed.host,
        "url": deployed.url,
    })))
}

async fn remove_handler(
    State(state): State<Arc<ApiState>>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Json<Value>, ApiError> {
    let owner = caller(&state, &headers)?;
    state.lifecycle.remove(&name, &owner).await?;
    Ok(Json(json!({ "ok": true })))
}

/// Create the API router
pub fn router(state: Arc<ApiState>) -> axum::Router {
    axum::Router::new()
        .route("/api/health", get(health_handler))
        .route("/api/apps", get(list_handler).post(deploy_handler))
        .route("/api/apps/{name}", delete(remove_handler))
        .with_state(state)
}
