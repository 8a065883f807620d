//! Shared-secret authentication middleware
//!
//! Two privilege levels gate the API: view (read-only dashboard) and
//! manage (registration, deletion, change log). The manage secret
//! implies view. A request for a level whose secret is not configured
//! is refused with 503, never allowed through.

use axum::{
    extract::{Request, State},
    http::{header, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::AuthConfig;

/// Privilege level required by a route group
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Privilege {
    View,
    Manage,
}

/// Outcome of an authorization check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthDecision {
    Allowed,
    /// No secret configured for the required level
    NotConfigured,
    MissingToken,
    InvalidToken,
}

/// Authentication state built from config
pub struct AuthState {
    config: AuthConfig,
}

impl AuthState {
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Decide whether a bearer token grants the required privilege
    pub fn check(&self, token: Option<&str>, required: Privilege) -> AuthDecision {
        if !self.config.require_auth {
            return AuthDecision::Allowed;
        }

        let manage = self.config.manage_secret.as_deref();
        let view = self.config.view_secret.as_deref();

        let configured = match required {
            Privilege::Manage => manage.is_some(),
            Privilege::View => manage.is_some() || view.is_some(),
        };
        if !configured {
            return AuthDecision::NotConfigured;
        }

        let Some(token) = token else {
            return AuthDecision::MissingToken;
        };

        let granted = match required {
            Privilege::Manage => manage == Some(token),
            Privilege::View => manage == Some(token) || view == Some(token),
        };
        if granted {
            AuthDecision::Allowed
        } else {
            AuthDecision::InvalidToken
        }
    }
}

/// Error response for authentication failures
#[derive(Serialize)]
struct AuthError {
    error: String,
    code: &'static str,
}

/// View-level middleware
pub async fn require_view(
    State(state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    authorize(state, Privilege::View, request, next).await
}

/// Manage-level middleware
pub async fn require_manage(
    State(state): State<Arc<AuthState>>,
    request: Request,
    next: Next,
) -> Response {
    authorize(state, Privilege::Manage, request, next).await
}

async fn authorize(
    state: Arc<AuthState>,
    required: Privilege,
    request: Request,
    next: Next,
) -> Response {
    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match state.check(token, required) {
        AuthDecision::Allowed => next.run(request).await,
        AuthDecision::NotConfigured => {
            warn!(?required, "Rejecting request: no secret configured for level");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(AuthError {
                    error: "Authentication is enabled but no secret is configured for this operation".to_string(),
                    code: "AUTH_NOT_CONFIGURED",
                }),
            )
                .into_response()
        }
        AuthDecision::MissingToken => {
            debug!(path = %request.uri().path(), "Missing authorization header");
            (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "Authorization required. Include header: Authorization: Bearer <secret>"
                        .to_string(),
                    code: "AUTH_REQUIRED",
                }),
            )
                .into_response()
        }
        AuthDecision::InvalidToken => {
            warn!("Invalid secret");
            (
                StatusCode::UNAUTHORIZED,
                Json(AuthError {
                    error: "Invalid secret for this operation".to_string(),
                    code: "INVALID_SECRET",
                }),
            )
                .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn auth(view: Option<&str>, manage: Option<&str>, require: bool) -> AuthState {
        AuthState::new(AuthConfig {
            require_auth: require,
            view_secret: view.map(String::from),
            manage_secret: manage.map(String::from),
        })
    }

    #[test]
    fn test_manage_secret_grants_both_levels() {
        let state = auth(Some("v"), Some("m"), true);
        assert_eq!(state.check(Some("m"), Privilege::View), AuthDecision::Allowed);
        assert_eq!(state.check(Some("m"), Privilege::Manage), AuthDecision::Allowed);
    }

    #[test]
    fn test_view_secret_is_view_only() {
        let state = auth(Some("v"), Some("m"), true);
        assert_eq!(state.check(Some("v"), Privilege::View), AuthDecision::Allowed);
        assert_eq!(
            state.check(Some("v"), Privilege::Manage),
            AuthDecision::InvalidToken
        );
    }

    #[test]
    fn test_missing_secret_is_refused_not_allowed() {
        // No secrets configured at all
        let state = auth(None, None, true);
        assert_eq!(
            state.check(Some("anything"), Privilege::View),
            AuthDecision::NotConfigured
        );

        // View configured but manage requested
        let state = auth(Some("v"), None, true);
        assert_eq!(
            state.check(Some("v"), Privilege::Manage),
            AuthDecision::NotConfigured
        );
    }

    #[test]
    fn test_missing_and_invalid_tokens() {
        let state = auth(Some("v"), Some("m"), true);
        assert_eq!(state.check(None, Privilege::View), AuthDecision::MissingToken);
        assert_eq!(
            state.check(Some("wrong"), Privilege::View),
            AuthDecision::InvalidToken
        );
    }

    #[test]
    fn test_auth_disabled_passes_through() {
        let state = auth(None, None, false);
        assert_eq!(state.check(None, Privilege::Manage), AuthDecision::Allowed);
    }
}
