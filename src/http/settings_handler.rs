use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::error::ApiError;
use super::state::AppState;
use crate::audit::{AuditEvent, EventType};
use crate::core::store::{BACKUP_PATH_KEY, DEFAULT_BACKUP_PATH};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingsBody {
    pub backup_path: String,
}

#[derive(Serialize)]
pub struct UpdateSettingsResponse {
    pub status: &'static str,
    pub config: SettingsBody,
}

pub async fn get_settings<S, A>(State(state): State<Arc<AppState<S, A>>>) -> Json<SettingsBody> {
    Json(SettingsBody {
        backup_path: state
            .settings
            .get(BACKUP_PATH_KEY, DEFAULT_BACKUP_PATH)
            .await,
    })
}

pub async fn update_settings<S, A>(
    State(state): State<Arc<AppState<S, A>>>,
    payload: Result<Json<SettingsBody>, JsonRejection>,
) -> Result<Json<UpdateSettingsResponse>, ApiError> {
    let Json(body) = payload.map_err(|e| ApiError::validation(e.body_text()))?;
    let backup_path = body.backup_path.trim().to_string();
    if backup_path.is_empty() {
        return Err(ApiError::validation("backup_path cannot be empty"));
    }

    let result = state.settings.set(BACKUP_PATH_KEY, &backup_path).await;
    if let Some(audit) = &state.audit {
        audit
            .log(AuditEvent::from_result(
                EventType::UpdateSettings,
                json!({ "backup_path": backup_path }),
                &result,
            ))
            .await;
    }
    result?;

    Ok(Json(UpdateSettingsResponse {
        status: "updated",
        config: SettingsBody { backup_path },
    }))
}
