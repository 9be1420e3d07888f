// Forwarding engine - builds and executes the outbound request
//
// Composes the route table, registry and selection policy, then relays the
// upstream outcome. Every call is a single attempt; the only I/O in the
// gateway core happens here.

use std::sync::Arc;
use std::time::Duration;

use axum::http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use bytes::Bytes;
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::gateway::balancer::SelectionPolicy;
use crate::gateway::config::GatewayConfig;
use crate::gateway::discovery::ServiceRegistry;
use crate::gateway::routing::{self, RouteTable};

/// Value of the gateway identity header on every outbound request
const GATEWAY_IDENTITY: &str = "maransa-api-gateway";

/// X-Forwarded-For value when the inbound request carries no chain
const FORWARDED_FOR_FALLBACK: &str = "api-gateway";

/// Inbound request, reduced to what the outbound call needs.
pub struct ForwardRequest {
    pub method: Method,
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: ForwardBody,
}

/// Request payload. Multipart uploads are forwarded as a live stream so
/// memory stays bounded and the boundary header survives untouched.
pub enum ForwardBody {
    Empty,
    Buffered(Bytes),
    Stream(reqwest::Body),
}

/// Upstream outcome relayed to the edge.
pub struct ForwardReply {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub payload: ReplyPayload,
}

pub enum ReplyPayload {
    Json(Value),
    Binary(Bytes),
}

#[derive(Debug, Error)]
pub enum ForwardError {
    /// Upstream unreachable: connection refused, DNS failure or timeout
    #[error("service {service} unavailable")]
    Unavailable { service: String },
    /// Upstream answered outside the accepted status range
    #[error("upstream returned {status}")]
    Upstream { status: StatusCode, body: Value },
    /// Unexpected failure inside the forwarding path
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ForwardError {
    fn into_response(self) -> Response {
        match self {
            ForwardError::Unavailable { service } => (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({
                    "statusCode": 503,
                    "message": format!("Service {} unavailable", service),
                })),
            )
                .into_response(),
            ForwardError::Upstream { status, body } => (status, Json(body)).into_response(),
            ForwardError::Internal(message) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({
                    "statusCode": 500,
                    "message": "Internal gateway error",
                    "error": message,
                })),
            )
                .into_response(),
        }
    }
}

pub struct ForwardEngine {
    http: Client,
    registry: Arc<ServiceRegistry>,
    routes: RouteTable,
    balancer: Box<dyn SelectionPolicy>,
    accept_status: (u16, u16),
    request_timeout: Duration,
}

impl ForwardEngine {
    pub fn new(
        config: &GatewayConfig,
        registry: Arc<ServiceRegistry>,
        balancer: Box<dyn SelectionPolicy>,
    ) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .pool_max_idle_per_host(16)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            registry,
            routes: RouteTable::from_config(config),
            balancer,
            accept_status: (config.accept_status_min, config.accept_status_max),
            request_timeout: Duration::from_secs(config.request_timeout),
        }
    }

    /// Forward one request to the service owning its path and translate the
    /// outcome. Exactly one outbound attempt per call.
    pub async fn forward(&self, request: ForwardRequest) -> Result<ForwardReply, ForwardError> {
        let service = self.routes.classify(&request.path);
        let target_path = routing::rewrite(&request.path, service);
        let base_url = self.resolve_base(service).await;

        let mut url = format!("{}{}", base_url, target_path);
        if let Some(query) = &request.query {
            url.push('?');
            url.push_str(query);
        }

        tracing::debug!("forwarding {} {}", request.method, url);

        let is_stream = matches!(request.body, ForwardBody::Stream(_));
        let headers = build_outbound_headers(&request.headers, is_stream);
        let binary = wants_binary(&request.path, &request.headers);
        let attach_buffered = has_request_payload(&request.method);

        let mut builder = self
            .http
            .request(request.method.clone(), url)
            .headers(headers)
            .timeout(self.request_timeout);

        builder = match request.body {
            ForwardBody::Stream(stream) => builder.body(stream),
            ForwardBody::Buffered(bytes) if attach_buffered => builder.body(bytes),
            _ => builder,
        };

        let response = builder.send().await.map_err(|err| {
            tracing::error!("error forwarding request to {}: {}", service, err);
            ForwardError::Unavailable {
                service: service.to_string(),
            }
        })?;

        let status = response.status();
        let response_headers = response.headers().clone();

        if !self.status_accepted(status) {
            let body = read_error_body(response).await;
            return Err(ForwardError::Upstream { status, body });
        }

        let payload = if binary {
            let bytes = response.bytes().await.map_err(|err| {
                ForwardError::Internal(format!("failed to read upstream body: {}", err))
            })?;
            ReplyPayload::Binary(bytes)
        } else {
            let bytes = response.bytes().await.map_err(|err| {
                ForwardError::Internal(format!("failed to read upstream body: {}", err))
            })?;
            ReplyPayload::Json(parse_structured(&bytes))
        };

        Ok(ForwardReply {
            status,
            headers: response_headers,
            payload,
        })
    }

    /// Base URL for a service: a discovered instance when the registry has
    /// any, the static fallback otherwise.
    async fn resolve_base(&self, service: &str) -> String {
        let instances = self.registry.instances(service).await;
        if !instances.is_empty() {
            if let Some(instance) = self.balancer.choose(&instances) {
                return instance.base_url();
            }
        }
        self.registry.fallback_url(service)
    }

    fn status_accepted(&self, status: StatusCode) -> bool {
        let code = status.as_u16();
        code >= self.accept_status.0 && code <= self.accept_status.1
    }
}

/// Methods that conventionally carry a request payload.
fn has_request_payload(method: &Method) -> bool {
    method == Method::POST || method == Method::PUT || method == Method::PATCH
}

/// Whether the reply must be relayed as an opaque byte payload.
fn wants_binary(path: &str, headers: &HeaderMap) -> bool {
    if path.ends_with("/pdf") {
        return true;
    }
    headers
        .get(header::ACCEPT)
        .and_then(|value| value.to_str().ok())
        .map(|accept| accept.contains("application/pdf"))
        .unwrap_or(false)
}

/// Copy inbound headers onto the outbound request.
///
/// Hop-by-hop headers stay behind. Content-Length is recomputed by the
/// client for buffered bodies and must survive only for multipart streams,
/// whose length is unknown until the stream is exhausted. Accept-Encoding is
/// dropped because structured payloads are re-encoded at the edge and must
/// arrive uncompressed.
fn build_outbound_headers(headers: &HeaderMap, keep_content_length: bool) -> HeaderMap {
    let mut outbound = HeaderMap::new();

    for (name, value) in headers.iter() {
        if name == header::HOST || name == header::CONNECTION || name == header::ACCEPT_ENCODING {
            continue;
        }
        if name == header::CONTENT_LENGTH && !keep_content_length {
            continue;
        }
        outbound.append(name.clone(), value.clone());
    }

    if !outbound.contains_key(HeaderName::from_static("x-forwarded-for")) {
        outbound.insert(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static(FORWARDED_FOR_FALLBACK),
        );
    }
    outbound.insert(
        HeaderName::from_static("x-gateway"),
        HeaderValue::from_static(GATEWAY_IDENTITY),
    );

    outbound
}

/// Upstream bytes as a structured value. Non-JSON payloads are carried as a
/// plain string instead of failing the relay.
fn parse_structured(bytes: &Bytes) -> Value {
    if bytes.is_empty() {
        return Value::Null;
    }
    serde_json::from_slice(bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(bytes).into_owned()))
}

async fn read_error_body(response: reqwest::Response) -> Value {
    let status = response.status();
    match response.bytes().await {
        Ok(bytes) if !bytes.is_empty() => parse_structured(&bytes),
        _ => json!({
            "statusCode": status.as_u16(),
            "message": status.canonical_reason().unwrap_or("Upstream error"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::balancer::RandomPolicy;

    fn test_engine(config: &GatewayConfig) -> ForwardEngine {
        let registry = ServiceRegistry::from_config(config);
        ForwardEngine::new(config, registry, Box::new(RandomPolicy))
    }

    #[test]
    fn test_outbound_headers_drop_hop_by_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(header::HOST, HeaderValue::from_static("gateway.local"));
        headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("42"));
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));

        let outbound = build_outbound_headers(&headers, false);
        assert!(outbound.get(header::HOST).is_none());
        assert!(outbound.get(header::CONNECTION).is_none());
        assert!(outbound.get(header::CONTENT_LENGTH).is_none());
        assert_eq!(
            outbound.get(header::ACCEPT).unwrap(),
            &HeaderValue::from_static("application/json")
        );
    }

    #[test]
    fn test_outbound_headers_keep_content_length_for_streams() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONTENT_LENGTH, HeaderValue::from_static("1024"));
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=xyz"),
        );

        let outbound = build_outbound_headers(&headers, true);
        assert_eq!(
            outbound.get(header::CONTENT_LENGTH).unwrap(),
            &HeaderValue::from_static("1024")
        );
        // The boundary header passes through untouched
        assert_eq!(
            outbound.get(header::CONTENT_TYPE).unwrap(),
            &HeaderValue::from_static("multipart/form-data; boundary=xyz")
        );
    }

    #[test]
    fn test_forwarded_for_defaults_and_preserves_chain() {
        let outbound = build_outbound_headers(&HeaderMap::new(), false);
        assert_eq!(
            outbound.get("x-forwarded-for").unwrap(),
            &HeaderValue::from_static("api-gateway")
        );
        assert_eq!(
            outbound.get("x-gateway").unwrap(),
            &HeaderValue::from_static("maransa-api-gateway")
        );

        let mut headers = HeaderMap::new();
        headers.insert(
            HeaderName::from_static("x-forwarded-for"),
            HeaderValue::from_static("203.0.113.7"),
        );
        let outbound = build_outbound_headers(&headers, false);
        assert_eq!(
            outbound.get("x-forwarded-for").unwrap(),
            &HeaderValue::from_static("203.0.113.7")
        );
    }

    #[test]
    fn test_binary_heuristic() {
        let plain = HeaderMap::new();
        assert!(wants_binary("/api/invoicing/42/pdf", &plain));
        assert!(!wants_binary("/api/invoicing/42", &plain));

        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/pdf"));
        assert!(wants_binary("/api/invoicing/42", &headers));
    }

    #[test]
    fn test_status_range() {
        let engine = test_engine(&GatewayConfig::default());
        assert!(engine.status_accepted(StatusCode::OK));
        assert!(engine.status_accepted(StatusCode::NOT_MODIFIED));
        assert!(!engine.status_accepted(StatusCode::BAD_REQUEST));
        assert!(!engine.status_accepted(StatusCode::INTERNAL_SERVER_ERROR));
    }

    #[test]
    fn test_parse_structured_falls_back_to_string() {
        assert_eq!(parse_structured(&Bytes::new()), Value::Null);
        assert_eq!(
            parse_structured(&Bytes::from_static(b"{\"ok\":true}")),
            json!({"ok": true})
        );
        assert_eq!(
            parse_structured(&Bytes::from_static(b"plain text")),
            Value::String("plain text".to_string())
        );
    }

    #[tokio::test]
    async fn test_unreachable_upstream_is_unavailable_not_a_fault() {
        let mut config = GatewayConfig::default();
        config.service_urls.orders = "http://127.0.0.1:1".to_string();
        let engine = test_engine(&config);

        let request = ForwardRequest {
            method: Method::GET,
            path: "/api/orders/123".to_string(),
            query: None,
            headers: HeaderMap::new(),
            body: ForwardBody::Empty,
        };

        match engine.forward(request).await {
            Err(ForwardError::Unavailable { service }) => {
                assert_eq!(service, routing::ORDERS_SERVICE);
            }
            _ => panic!("expected unavailable error"),
        }
    }

    #[tokio::test]
    async fn test_resolve_base_uses_static_fallback_without_instances() {
        let engine = test_engine(&GatewayConfig::default());
        assert_eq!(
            engine.resolve_base(routing::ORDERS_SERVICE).await,
            "http://localhost:3001"
        );
        assert_eq!(
            engine.resolve_base("never-registered").await,
            "http://localhost:3000"
        );
    }
}
