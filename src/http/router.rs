use std::sync::Arc;

use axum::Router;
use axum::routing::{delete, get, post};

use super::dhcp_handler::{delete_lease, list_leases, set_lease};
use super::health_handler::health;
use super::rules_handler::{add_rule, apply_rules, delete_rule, list_rules};
use super::settings_handler::{get_settings, update_settings};
use super::state::AppState;
use crate::core::applier::Applier;
use crate::core::store::RuleStore;

/// Builds the full API router.
pub fn build_router<S: RuleStore, A: Applier>(state: Arc<AppState<S, A>>) -> Router {
    let network_routes = Router::new()
        .route(
            "/rules",
            get(list_rules::<S, A>).post(add_rule::<S, A>),
        )
        .route("/rules/{port}", delete(delete_rule::<S, A>))
        .route("/apply", post(apply_rules::<S, A>))
        .route("/dhcp", get(list_leases::<S, A>).post(set_lease::<S, A>))
        .route("/dhcp/{name}", delete(delete_lease::<S, A>));

    Router::new()
        .nest("/api/network", network_routes)
        .route(
            "/api/settings",
            get(get_settings::<S, A>).post(update_settings::<S, A>),
        )
        .route("/api/health", get(health::<S, A>))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::applier::DEFAULT_CHAIN;
    use crate::core::container::ContainerResolver;
    use crate::core::dhcp::DhcpLeases;
    use crate::core::manager::RuleManager;
    use crate::core::store::{MemoryRuleStore, SettingsStore};
    use crate::core::test_helpers::FakeApplier;
    use crate::elevation::ElevationMode;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn test_state(dir: &tempfile::TempDir) -> Arc<AppState<MemoryRuleStore, FakeApplier>> {
        let manager = RuleManager::new(
            Arc::new(MemoryRuleStore::new()),
            FakeApplier::new(),
            DEFAULT_CHAIN,
        );
        Arc::new(AppState::new(
            Arc::new(manager),
            Arc::new(DhcpLeases::new(dir.path().join("dhcp.conf")).with_reload_command(None)),
            Arc::new(SettingsStore::in_memory()),
            ContainerResolver::new("/nonexistent/lxc-info").with_elevation(ElevationMode::None),
        ))
    }

    async fn send(
        router: Router,
        method: &str,
        uri: &str,
        body: Option<&str>,
    ) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let resp = router.oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(serde_json::Value::Null)
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_follows_network_readiness() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (status, body) = send(build_router(Arc::clone(&state)), "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["status"], "degraded");

        state.manager.initialize().await.unwrap();
        state.set_network_ready(true);
        let (status, body) = send(build_router(state), "GET", "/api/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn settings_default_and_update() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (status, body) = send(build_router(Arc::clone(&state)), "GET", "/api/settings", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["backup_path"], "/tmp/lxc_backups");

        let (status, body) = send(
            build_router(Arc::clone(&state)),
            "POST",
            "/api/settings",
            Some(r#"{"backup_path":"/srv/backups"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "updated");
        assert_eq!(body["config"]["backup_path"], "/srv/backups");

        let (status, _) = send(
            build_router(Arc::clone(&state)),
            "POST",
            "/api/settings",
            Some(r#"{"backup_path":"  "}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, body) = send(build_router(state), "GET", "/api/settings", None).await;
        assert_eq!(body["backup_path"], "/srv/backups");
    }

    #[tokio::test]
    async fn dhcp_crud() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (status, body) = send(
            build_router(Arc::clone(&state)),
            "POST",
            "/api/network/dhcp",
            Some(r#"{"name":"web","ip":"10.0.3.10"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "web");

        let (_, body) = send(build_router(Arc::clone(&state)), "GET", "/api/network/dhcp", None).await;
        assert_eq!(body["web"], "10.0.3.10");

        let (status, _) = send(build_router(Arc::clone(&state)), "DELETE", "/api/network/dhcp/web", None).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(build_router(Arc::clone(&state)), "DELETE", "/api/network/dhcp/web", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "DHCP_ENTRY_NOT_FOUND");

        let (status, body) = send(
            build_router(state),
            "POST",
            "/api/network/dhcp",
            Some(r#"{"name":"web"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn missing_resolver_binary_is_internal_error() {
        let dir = tempfile::tempdir().unwrap();
        let state = test_state(&dir);

        let (status, body) = send(
            build_router(state),
            "POST",
            "/api/network/rules",
            Some(r#"{"protocol":"tcp","external_port":8080,"container":"ghost","internal_port":80}"#),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    }

    #[tokio::test]
    async fn bad_port_path_is_validation_error() {
        let dir = tempfile::tempdir().unwrap();
        let (status, body) = send(
            build_router(test_state(&dir)),
            "DELETE",
            "/api/network/rules/99999",
            None,
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }
}
