use std::net::Ipv4Addr;
use std::sync::Arc;

use axum::Json;
use axum::extract::rejection::{JsonRejection, PathRejection};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};

use super::error::ApiError;
use super::state::AppState;
use crate::core::applier::Applier;
use crate::core::mapping::{InterfaceFilter, NewPortMapping, PortMapping, Protocol};
use crate::core::store::RuleStore;
use crate::core::sync::RuleFailure;
use crate::validators;

// ── Request / Response DTOs ─────────────────────────────────────────

/// A new mapping whose target is either an address or a container name.
#[derive(Debug, Deserialize)]
pub struct AddRuleRequest {
    #[serde(default)]
    pub interface: InterfaceFilter,
    pub protocol: Protocol,
    pub external_port: u16,
    pub internal_ip: Option<String>,
    /// Resolved to the container's current IPv4 address.
    pub container: Option<String>,
    pub internal_port: u16,
    #[serde(default)]
    pub comment: Option<String>,
}

#[derive(Serialize)]
pub struct AddRuleResponse {
    pub status: &'static str,
    pub rule: PortMapping,
}

#[derive(Serialize)]
pub struct DeleteRuleResponse {
    pub status: &'static str,
    pub port: u16,
    pub existed: bool,
}

#[derive(Serialize)]
pub struct ApplyResponse {
    pub status: &'static str,
    pub applied: usize,
    pub failures: Vec<RuleFailure>,
}

// ── Handlers ────────────────────────────────────────────────────────

pub async fn list_rules<S: RuleStore, A: Applier>(
    State(state): State<Arc<AppState<S, A>>>,
) -> Result<Json<Vec<PortMapping>>, ApiError> {
    Ok(Json(state.manager.list_rules().await?))
}

pub async fn add_rule<S: RuleStore, A: Applier>(
    State(state): State<Arc<AppState<S, A>>>,
    payload: Result<Json<AddRuleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::validation(e.body_text()))?;

    let internal_ip = resolve_target(&state, req.internal_ip.as_deref(), req.container.as_deref())
        .await?;

    let rule = state
        .manager
        .add_rule(NewPortMapping {
            interface: req.interface,
            protocol: req.protocol,
            external_port: req.external_port,
            internal_ip,
            internal_port: req.internal_port,
            comment: req.comment,
        })
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(AddRuleResponse {
            status: "added",
            rule,
        }),
    ))
}

async fn resolve_target<S, A>(
    state: &AppState<S, A>,
    internal_ip: Option<&str>,
    container: Option<&str>,
) -> Result<Ipv4Addr, ApiError> {
    match (internal_ip, container) {
        (Some(ip), None) => validators::validate_target_ip(ip)
            .map_err(|e| ApiError::validation(format!("Validation error in internal_ip: {e}"))),
        (None, Some(name)) => Ok(state.resolver.require(name).await?),
        (Some(_), Some(_)) => Err(ApiError::validation(
            "Give either internal_ip or container, not both",
        )),
        (None, None) => Err(ApiError::validation(
            "One of internal_ip or container is required",
        )),
    }
}

/// Deletes the mapping for `port`. Succeeds whether or not it existed.
pub async fn delete_rule<S: RuleStore, A: Applier>(
    State(state): State<Arc<AppState<S, A>>>,
    port: Result<Path<u16>, PathRejection>,
) -> Result<Json<DeleteRuleResponse>, ApiError> {
    let Path(port) = port.map_err(|e| ApiError::validation(e.body_text()))?;
    let existed = state.manager.remove_rule(port).await?;

    Ok(Json(DeleteRuleResponse {
        status: "deleted",
        port,
        existed,
    }))
}

pub async fn apply_rules<S: RuleStore, A: Applier>(
    State(state): State<Arc<AppState<S, A>>>,
) -> Result<Json<ApplyResponse>, ApiError> {
    let report = state.manager.force_apply().await?;

    Ok(Json(ApplyResponse {
        status: "applied",
        applied: report.applied,
        failures: report.failures,
    }))
}
