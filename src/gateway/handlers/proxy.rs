// Catch-all proxy handler
//
// Translates the inbound axum request into a ForwardRequest, hands it to the
// engine and renders the reply. Multipart uploads keep their body as a live
// stream; everything else is buffered up to the body limit.

use axum::{
    body::Body,
    extract::{Request, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json, Response},
};
use serde_json::Value;

use crate::gateway::forward::{ForwardBody, ForwardError, ForwardReply, ForwardRequest, ReplyPayload};
use crate::gateway::server::AppState;

/// Largest buffered (non-multipart) request body accepted by the edge
const MAX_BUFFERED_BODY: usize = 100 * 1024 * 1024;

pub async fn proxy_handler(State(state): State<AppState>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(|q| q.to_string());

    let content_type = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .unwrap_or("");
    let is_multipart = content_type.contains("multipart/form-data");

    let body = if is_multipart {
        ForwardBody::Stream(reqwest::Body::wrap_stream(body.into_data_stream()))
    } else if parts.method == Method::POST
        || parts.method == Method::PUT
        || parts.method == Method::PATCH
    {
        match axum::body::to_bytes(body, MAX_BUFFERED_BODY).await {
            Ok(bytes) if !bytes.is_empty() => ForwardBody::Buffered(bytes),
            Ok(_) => ForwardBody::Empty,
            Err(err) => {
                return ForwardError::Internal(format!("failed to read request body: {}", err))
                    .into_response()
            }
        }
    } else {
        ForwardBody::Empty
    };

    let forward = ForwardRequest {
        method: parts.method,
        path,
        query,
        headers: parts.headers,
        body,
    };

    match state.engine.forward(forward).await {
        Ok(reply) => render_reply(reply),
        Err(err) => err.into_response(),
    }
}

fn render_reply(reply: ForwardReply) -> Response {
    match reply.payload {
        ReplyPayload::Binary(bytes) => {
            let mut response = Response::builder().status(reply.status);
            // Upstream download headers pass through verbatim
            if let Some(content_type) = reply.headers.get(header::CONTENT_TYPE) {
                response = response.header(header::CONTENT_TYPE, content_type);
            }
            if let Some(disposition) = reply.headers.get(header::CONTENT_DISPOSITION) {
                response = response.header(header::CONTENT_DISPOSITION, disposition);
            }
            response
                .body(Body::from(bytes))
                .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
        }
        // Bodyless upstream replies stay bodyless
        ReplyPayload::Json(Value::Null) => reply.status.into_response(),
        ReplyPayload::Json(value) => (reply.status, Json(value)).into_response(),
    }
}
