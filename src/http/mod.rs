//! HTTP API
//!
//! JSON endpoints under `/api/network` (port mappings, DHCP assignments),
//! `/api/settings` and `/api/health`. Errors use the body
//! `{"error":{"code":"...","message":"..."}}`.

pub mod dhcp_handler;
pub mod error;
pub mod health_handler;
pub mod router;
pub mod rules_handler;
pub mod settings_handler;
pub mod state;

pub use error::ApiError;
pub use router::build_router;
pub use state::AppState;
