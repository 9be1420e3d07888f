// Middleware module - Axum middleware

pub mod auth;
pub mod cors;

pub use auth::{auth_middleware, AuthGate, AuthIdentity, AuthRejection, HttpAuthGate};
pub use cors::cors_layer;
