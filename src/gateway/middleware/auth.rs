//! Authentication gate middleware
//!
//! The gateway does not verify credentials itself: protected routes consult
//! an external verification endpoint and relay its verdict. Public and
//! externally-owned path families bypass the gate entirely.

use std::time::Duration;

use async_trait::async_trait;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use reqwest::Client;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::gateway::routing;
use crate::gateway::server::AppState;

// Trusted headers propagated to backends after a successful check
const HEADER_USER_ID: &str = "x-user-id";
const HEADER_REQUEST_ID: &str = "x-request-id";

/// Identity returned by the verification endpoint.
pub struct AuthIdentity {
    pub user_id: Option<String>,
}

/// Denial verdict: the request is short-circuited, never forwarded.
pub struct AuthRejection {
    pub status: StatusCode,
    pub reason: String,
}

/// External authentication collaborator.
#[async_trait]
pub trait AuthGate: Send + Sync {
    async fn authorize(&self, headers: &HeaderMap) -> Result<AuthIdentity, AuthRejection>;
}

/// Gate backed by an HTTP verification endpoint: the inbound Authorization
/// header is relayed as-is and the endpoint's verdict is final.
pub struct HttpAuthGate {
    http: Client,
    verify_url: String,
}

impl HttpAuthGate {
    pub fn new(verify_url: String) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(5))
            .build()
            .expect("Failed to create HTTP client");

        Self { http, verify_url }
    }
}

#[async_trait]
impl AuthGate for HttpAuthGate {
    async fn authorize(&self, headers: &HeaderMap) -> Result<AuthIdentity, AuthRejection> {
        let Some(authorization) = headers.get(header::AUTHORIZATION) else {
            return Err(AuthRejection {
                status: StatusCode::UNAUTHORIZED,
                reason: "Missing authorization header".to_string(),
            });
        };

        let response = self
            .http
            .get(&self.verify_url)
            .header(header::AUTHORIZATION, authorization.clone())
            .send()
            .await
            .map_err(|err| {
                tracing::error!("auth verification request failed: {}", err);
                AuthRejection {
                    status: StatusCode::SERVICE_UNAVAILABLE,
                    reason: "Authentication service unavailable".to_string(),
                }
            })?;

        let status = response.status();
        let body = response.json::<Value>().await.unwrap_or(Value::Null);

        if status.is_success() {
            let user_id = body
                .get("userId")
                .or_else(|| body.get("sub"))
                .or_else(|| body.get("id"))
                .and_then(|value| value.as_str())
                .map(|value| value.to_string());
            return Ok(AuthIdentity { user_id });
        }

        let reason = body
            .get("message")
            .and_then(|value| value.as_str())
            .unwrap_or("Unauthorized")
            .to_string();

        Err(AuthRejection { status, reason })
    }
}

/// Authentication middleware over the three routing tiers: the public
/// allow-list and the external service families pass through, everything
/// else under `/api` must clear the gate first.
pub async fn auth_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    // CORS preflight never carries credentials
    if request.method() == Method::OPTIONS {
        return next.run(request).await;
    }

    let path = request.uri().path().to_string();
    if !routing::requires_auth(&path) {
        return next.run(request).await;
    }

    let Some(gate) = state.auth_gate.clone() else {
        // Gate disabled by configuration
        return next.run(request).await;
    };

    match gate.authorize(request.headers()).await {
        Ok(identity) => {
            // Backends trust these headers instead of re-verifying the token,
            // so they are always overwritten here
            if let Some(user_id) = &identity.user_id {
                if let Ok(value) = HeaderValue::from_str(user_id) {
                    request
                        .headers_mut()
                        .insert(HeaderName::from_static(HEADER_USER_ID), value);
                }
            }
            let request_id = Uuid::new_v4().to_string();
            if let Ok(value) = HeaderValue::from_str(&request_id) {
                request
                    .headers_mut()
                    .insert(HeaderName::from_static(HEADER_REQUEST_ID), value);
            }
            next.run(request).await
        }
        Err(rejection) => {
            tracing::debug!("rejected {} with {}: {}", path, rejection.status, rejection.reason);
            (
                rejection.status,
                Json(json!({
                    "statusCode": rejection.status.as_u16(),
                    "message": rejection.reason,
                })),
            )
                .into_response()
        }
    }
}
