use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::state::AppState;

#[derive(Debug, Deserialize)]
pub struct SetLeaseRequest {
    pub name: String,
    pub ip: String,
}

#[derive(Serialize)]
pub struct LeaseResponse {
    pub status: &'static str,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
}

pub async fn list_leases<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
) -> Result<Json<BTreeMap<String, String>>, ApiError> {
    Ok(Json(state.dhcp.list().await?))
}

pub async fn set_lease<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    payload: Result<Json<SetLeaseRequest>, JsonRejection>,
) -> Result<Json<LeaseResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::validation(e.body_text()))?;
    state.dhcp.set(&req.name, &req.ip).await?;

    Ok(Json(LeaseResponse {
        status: "success",
        name: req.name,
        ip: Some(req.ip.trim().to_string()),
    }))
}

pub async fn delete_lease<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    Path(name): Path<String>,
) -> Result<Json<LeaseResponse>, ApiError> {
    if state.dhcp.remove(&name).await? {
        Ok(Json(LeaseResponse {
            status: "deleted",
            name,
            ip: None,
        }))
    } else {
        Err(ApiError::NotFound {
            code: "DHCP_ENTRY_NOT_FOUND",
            message: format!("No DHCP entry for '{name}'"),
        })
    }
}
