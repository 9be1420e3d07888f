// Route classification and path rewriting
use once_cell::sync::Lazy;

use crate::gateway::config::GatewayConfig;

pub const BACKEND_MONOLITH: &str = "backend-monolith";
pub const AUTH_SERVICE: &str = "auth-service";
pub const ORDERS_SERVICE: &str = "orders-service";
pub const LOGISTICS_SERVICE: &str = "logistics-service";
pub const INVOICING_SERVICE: &str = "invoicing-service";
pub const AI_SERVICE: &str = "ai-service";
pub const AI_BACKEND_SERVICE: &str = "ai-backend-service";
pub const SRI_SERVICE: &str = "sri-service";

/// Services refreshed by the background discovery sweep.
pub const KNOWN_SERVICES: [&str; 6] = [
    AUTH_SERVICE,
    ORDERS_SERVICE,
    LOGISTICS_SERVICE,
    INVOICING_SERVICE,
    AI_SERVICE,
    SRI_SERVICE,
];

/// Public authentication endpoints, reachable without a token in either
/// routing mode. Exact matches only.
const PUBLIC_PATHS: [&str; 3] = [
    "/api/auth/login",
    "/api/auth/register",
    "/api/auth/check-email",
];

/// Path families owned by externally hosted services. These bypass the
/// gateway's authentication gate; the external service enforces its own.
const EXTERNAL_PREFIXES: [&str; 5] = [
    "/api/ai/predict/",
    "/api/ai/data/",
    "/api/ai/models/",
    "/api/ai/analysis/",
    "/api/sri/",
];

const EXTERNAL_PATHS: [&str; 1] = ["/api/ai/health"];

/// AI sub-paths served by the backend rather than the external AI service.
/// Checked before the general `/api/ai/` prefix: first match wins, so the
/// more specific rules must come first.
const AI_BACKEND_PREFIXES: [&str; 3] = [
    "/api/ai/predictions/",
    "/api/ai/statistics/",
    "/api/ai/predict/",
];

/// Prefix rules for microservices mode, evaluated in order.
static ROUTE_RULES: Lazy<Vec<(&'static str, &'static str)>> = Lazy::new(|| {
    vec![
        ("/api/auth", AUTH_SERVICE),
        ("/api/users", AUTH_SERVICE),
        ("/api/orders", ORDERS_SERVICE),
        ("/api/providers", ORDERS_SERVICE),
        ("/api/packagers", ORDERS_SERVICE),
        ("/api/receptions", ORDERS_SERVICE),
        ("/api/laboratory", ORDERS_SERVICE),
        ("/api/harvest", ORDERS_SERVICE),
        ("/api/logistics", LOGISTICS_SERVICE),
        ("/api/custody", LOGISTICS_SERVICE),
        ("/api/invoicing", INVOICING_SERVICE),
    ]
});

/// Routing mode, fixed at startup from configuration.
///
/// Monolith mode collapses every non-external business route onto the
/// backend monolith; microservices mode walks the prefix rule table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteTable {
    Monolith,
    Microservices,
}

impl RouteTable {
    pub fn from_config(config: &GatewayConfig) -> Self {
        if config.backend_monolith_url.is_some() {
            RouteTable::Monolith
        } else {
            RouteTable::Microservices
        }
    }

    /// Map a request path to the service that owns it.
    pub fn classify(&self, path: &str) -> &'static str {
        // Public auth endpoints route to the auth service in either mode
        if is_public_path(path) {
            return AUTH_SERVICE;
        }

        if path.starts_with("/api/ai/") {
            if AI_BACKEND_PREFIXES.iter().any(|p| path.starts_with(p)) {
                return match self {
                    RouteTable::Monolith => BACKEND_MONOLITH,
                    RouteTable::Microservices => AI_BACKEND_SERVICE,
                };
            }
            return AI_SERVICE;
        }

        if path.starts_with("/api/sri") {
            return SRI_SERVICE;
        }

        match self {
            RouteTable::Monolith => BACKEND_MONOLITH,
            RouteTable::Microservices => {
                for &(prefix, service) in ROUTE_RULES.iter() {
                    if path.starts_with(prefix) {
                        return service;
                    }
                }
                AUTH_SERVICE
            }
        }
    }
}

/// Rewrite a gateway path into the path the target service expects.
///
/// The monolith and the gateway-fronted microservices mount their routes
/// without the shared `/api` prefix. The externally hosted services mount
/// theirs at the root, so the whole family prefix is stripped for them.
pub fn rewrite(path: &str, service: &str) -> String {
    if service == BACKEND_MONOLITH {
        return strip_prefix(path, "/api");
    }

    if service == AI_SERVICE {
        return strip_prefix(path, "/api/ai");
    }

    if service == SRI_SERVICE {
        return strip_prefix(path, "/api/sri");
    }

    // Identifiers named like a service are gateway-fronted microservices
    if service.contains("service") && path.starts_with("/api/") {
        return strip_prefix(path, "/api");
    }

    path.to_string()
}

fn strip_prefix(path: &str, prefix: &str) -> String {
    path.strip_prefix(prefix).unwrap_or(path).to_string()
}

/// Exact-match allow-list of unauthenticated endpoints.
pub fn is_public_path(path: &str) -> bool {
    PUBLIC_PATHS.contains(&path)
}

/// Externally hosted service families, unauthenticated at the gateway layer.
pub fn is_external_path(path: &str) -> bool {
    EXTERNAL_PATHS.contains(&path) || EXTERNAL_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Whether a path must pass the authentication gate before forwarding.
pub fn requires_auth(path: &str) -> bool {
    let gateway_scoped = path == "/api" || path.starts_with("/api/");
    gateway_scoped && !is_public_path(path) && !is_external_path(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_microservices_classification() {
        let table = RouteTable::Microservices;
        assert_eq!(table.classify("/api/orders/123"), ORDERS_SERVICE);
        assert_eq!(table.classify("/api/users/42"), AUTH_SERVICE);
        assert_eq!(table.classify("/api/providers"), ORDERS_SERVICE);
        assert_eq!(table.classify("/api/harvest/2024"), ORDERS_SERVICE);
        assert_eq!(table.classify("/api/custody/7"), LOGISTICS_SERVICE);
        assert_eq!(table.classify("/api/invoicing/emit"), INVOICING_SERVICE);
        // No rule matches: the default service takes it
        assert_eq!(table.classify("/api/something-else"), AUTH_SERVICE);
    }

    #[test]
    fn test_monolith_classification() {
        let table = RouteTable::Monolith;
        assert_eq!(table.classify("/api/orders/123"), BACKEND_MONOLITH);
        assert_eq!(table.classify("/api/laboratory/5"), BACKEND_MONOLITH);
        assert_eq!(table.classify("/api/unknown"), BACKEND_MONOLITH);
    }

    #[test]
    fn test_public_paths_route_to_auth_in_either_mode() {
        assert_eq!(RouteTable::Monolith.classify("/api/auth/login"), AUTH_SERVICE);
        assert_eq!(
            RouteTable::Microservices.classify("/api/auth/login"),
            AUTH_SERVICE
        );
        assert_eq!(
            RouteTable::Monolith.classify("/api/auth/check-email"),
            AUTH_SERVICE
        );
    }

    #[test]
    fn test_external_services_ignore_mode() {
        assert_eq!(RouteTable::Monolith.classify("/api/ai/models/crop"), AI_SERVICE);
        assert_eq!(
            RouteTable::Microservices.classify("/api/ai/models/crop"),
            AI_SERVICE
        );
        assert_eq!(RouteTable::Monolith.classify("/api/sri/invoices"), SRI_SERVICE);
        assert_eq!(
            RouteTable::Microservices.classify("/api/sri/invoices"),
            SRI_SERVICE
        );
    }

    #[test]
    fn test_ai_backend_subpaths_win_over_ai_family() {
        // The specific sub-prefix rules are registered before the general
        // `/api/ai/` rule, so they must win
        assert_eq!(
            RouteTable::Monolith.classify("/api/ai/predictions/7"),
            BACKEND_MONOLITH
        );
        assert_eq!(
            RouteTable::Microservices.classify("/api/ai/predictions/7"),
            AI_BACKEND_SERVICE
        );
        assert_eq!(
            RouteTable::Microservices.classify("/api/ai/statistics/weekly"),
            AI_BACKEND_SERVICE
        );
        assert_eq!(
            RouteTable::Microservices.classify("/api/ai/predict/yield"),
            AI_BACKEND_SERVICE
        );
        // Everything else in the family stays external
        assert_eq!(
            RouteTable::Microservices.classify("/api/ai/analysis/soil"),
            AI_SERVICE
        );
    }

    #[test]
    fn test_rewrite_strips_gateway_prefix() {
        assert_eq!(rewrite("/api/orders/123", ORDERS_SERVICE), "/orders/123");
        assert_eq!(rewrite("/api/orders/123", BACKEND_MONOLITH), "/orders/123");
        assert_eq!(rewrite("/api/auth/login", AUTH_SERVICE), "/auth/login");
        assert_eq!(
            rewrite("/api/ai/predictions/7", AI_BACKEND_SERVICE),
            "/ai/predictions/7"
        );
    }

    #[test]
    fn test_rewrite_external_services_drop_family_prefix() {
        assert_eq!(rewrite("/api/ai/models/crop", AI_SERVICE), "/models/crop");
        assert_eq!(rewrite("/api/ai/health", AI_SERVICE), "/health");
        assert_eq!(rewrite("/api/sri/invoices/9", SRI_SERVICE), "/invoices/9");
    }

    #[test]
    fn test_rewrite_unknown_identifier_unchanged() {
        assert_eq!(rewrite("/api/orders/123", "something-weird"), "/api/orders/123");
        assert_eq!(rewrite("/internal/metrics", ORDERS_SERVICE), "/internal/metrics");
    }

    #[test]
    fn test_auth_tiers() {
        assert!(!requires_auth("/api/auth/login"));
        assert!(!requires_auth("/api/auth/register"));
        assert!(!requires_auth("/api/ai/predict/yield"));
        assert!(!requires_auth("/api/ai/health"));
        assert!(!requires_auth("/api/sri/receipts"));
        assert!(!requires_auth("/health"));
        assert!(requires_auth("/api/orders/123"));
        assert!(requires_auth("/api/auth/me"));
        // AI family paths outside the public globs stay protected
        assert!(requires_auth("/api/ai/training"));
    }

    #[test]
    fn test_mode_from_config() {
        let mut config = GatewayConfig::default();
        assert_eq!(RouteTable::from_config(&config), RouteTable::Microservices);
        config.backend_monolith_url = Some("http://localhost:3000".to_string());
        assert_eq!(RouteTable::from_config(&config), RouteTable::Monolith);
    }
}
