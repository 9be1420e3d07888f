use serde::{Deserialize, Serialize};

/// Gateway service configuration
///
/// Loaded from `gateway.json` in the data directory; individual fields can be
/// overridden from the environment (see [`GatewayConfig::apply_env_overrides`]),
/// which is how container deployments are expected to configure the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Whether to accept connections from the LAN
    /// - false: bind 127.0.0.1 only
    /// - true: bind 0.0.0.0
    #[serde(default)]
    pub allow_lan_access: bool,

    /// Origin allowed by the CORS layer
    #[serde(default = "default_cors_origin")]
    pub cors_origin: String,

    /// Per-request timeout for forwarded calls (seconds)
    #[serde(default = "default_request_timeout")]
    pub request_timeout: u64,

    /// Lower bound of the upstream status range relayed as success (inclusive)
    #[serde(default = "default_accept_status_min")]
    pub accept_status_min: u16,

    /// Upper bound of the upstream status range relayed as success (inclusive)
    #[serde(default = "default_accept_status_max")]
    pub accept_status_max: u16,

    /// Base URL of the backend monolith. When set, the gateway runs in
    /// monolith mode and collapses all non-external routes onto it.
    #[serde(default)]
    pub backend_monolith_url: Option<String>,

    /// Consul agent address. When absent, dynamic discovery is disabled and
    /// resolution uses the static service URL map only.
    #[serde(default)]
    pub consul: Option<ConsulConfig>,

    /// Static fallback base URLs, one per known service
    #[serde(default)]
    pub service_urls: ServiceUrls,

    /// URL of the external token verification endpoint. When absent, the
    /// authentication gate is disabled and protected routes are open.
    #[serde(default)]
    pub auth_verify_url: Option<String>,
}

/// Consul agent address
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsulConfig {
    pub host: String,
    #[serde(default = "default_consul_port")]
    pub port: u16,
}

/// Static fallback URLs for the known services
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceUrls {
    #[serde(default = "default_auth_url")]
    pub auth: String,
    #[serde(default = "default_orders_url")]
    pub orders: String,
    #[serde(default = "default_logistics_url")]
    pub logistics: String,
    #[serde(default = "default_invoicing_url")]
    pub invoicing: String,
    #[serde(default = "default_ai_url")]
    pub ai: String,
    #[serde(default = "default_sri_url")]
    pub sri: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            allow_lan_access: false,
            cors_origin: default_cors_origin(),
            request_timeout: default_request_timeout(),
            accept_status_min: default_accept_status_min(),
            accept_status_max: default_accept_status_max(),
            backend_monolith_url: None,
            consul: None,
            service_urls: ServiceUrls::default(),
            auth_verify_url: None,
        }
    }
}

impl Default for ServiceUrls {
    fn default() -> Self {
        Self {
            auth: default_auth_url(),
            orders: default_orders_url(),
            logistics: default_logistics_url(),
            invoicing: default_invoicing_url(),
            ai: default_ai_url(),
            sri: default_sri_url(),
        }
    }
}

fn default_port() -> u16 {
    8080
}

fn default_cors_origin() -> String {
    "http://localhost:5173".to_string()
}

fn default_request_timeout() -> u64 {
    30
}

fn default_accept_status_min() -> u16 {
    200
}

fn default_accept_status_max() -> u16 {
    399
}

fn default_consul_port() -> u16 {
    8500
}

fn default_auth_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_orders_url() -> String {
    "http://localhost:3001".to_string()
}

fn default_logistics_url() -> String {
    "http://localhost:3002".to_string()
}

fn default_invoicing_url() -> String {
    "http://localhost:3003".to_string()
}

fn default_ai_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_sri_url() -> String {
    "http://localhost:9000".to_string()
}

impl GatewayConfig {
    /// Actual bind address
    /// - allow_lan_access = false: "127.0.0.1"
    /// - allow_lan_access = true: "0.0.0.0"
    pub fn get_bind_address(&self) -> &str {
        if self.allow_lan_access {
            "0.0.0.0"
        } else {
            "127.0.0.1"
        }
    }

    /// Apply environment overrides on top of the file configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("PORT") {
            if let Ok(port) = value.parse() {
                self.port = port;
            }
        }

        if let Ok(value) = std::env::var("GATEWAY_ALLOW_LAN") {
            let enabled = matches!(value.as_str(), "1" | "true" | "yes" | "on");
            if enabled {
                self.allow_lan_access = true;
            }
        }

        if let Ok(value) = std::env::var("CORS_ORIGIN") {
            if !value.is_empty() {
                self.cors_origin = value;
            }
        }

        if let Ok(value) = std::env::var("BACKEND_MONOLITH_URL") {
            if !value.is_empty() {
                self.backend_monolith_url = Some(value);
            }
        }

        if let Ok(host) = std::env::var("CONSUL_HOST") {
            if !host.is_empty() {
                let port = std::env::var("CONSUL_PORT")
                    .ok()
                    .and_then(|p| p.parse().ok())
                    .unwrap_or_else(default_consul_port);
                self.consul = Some(ConsulConfig { host, port });
            }
        }

        if let Ok(value) = std::env::var("AUTH_VERIFY_URL") {
            if !value.is_empty() {
                self.auth_verify_url = Some(value);
            }
        }

        if let Ok(value) = std::env::var("AUTH_SERVICE_URL") {
            if !value.is_empty() {
                self.service_urls.auth = value;
            }
        }
        if let Ok(value) = std::env::var("ORDERS_SERVICE_URL") {
            if !value.is_empty() {
                self.service_urls.orders = value;
            }
        }
        if let Ok(value) = std::env::var("LOGISTICS_SERVICE_URL") {
            if !value.is_empty() {
                self.service_urls.logistics = value;
            }
        }
        if let Ok(value) = std::env::var("INVOICING_SERVICE_URL") {
            if !value.is_empty() {
                self.service_urls.invoicing = value;
            }
        }
        if let Ok(value) = std::env::var("AI_SERVICE_URL") {
            if !value.is_empty() {
                self.service_urls.ai = value;
            }
        }
        if let Ok(value) = std::env::var("SRI_SERVICE_URL") {
            if !value.is_empty() {
                self.service_urls.sri = value;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = GatewayConfig::default();
        assert_eq!(config.port, 8080);
        assert_eq!(config.request_timeout, 30);
        assert_eq!(config.accept_status_min, 200);
        assert_eq!(config.accept_status_max, 399);
        assert!(config.backend_monolith_url.is_none());
        assert!(config.consul.is_none());
        assert_eq!(config.get_bind_address(), "127.0.0.1");
    }

    #[test]
    fn test_empty_json_uses_defaults() {
        let config: GatewayConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.service_urls.orders, "http://localhost:3001");
        assert_eq!(config.service_urls.ai, "http://localhost:8000");
    }

    #[test]
    fn test_partial_json_keeps_remaining_defaults() {
        let config: GatewayConfig = serde_json::from_str(
            r#"{"port": 9090, "consul": {"host": "consul.internal"}}"#,
        )
        .unwrap();
        assert_eq!(config.port, 9090);
        let consul = config.consul.unwrap();
        assert_eq!(consul.host, "consul.internal");
        assert_eq!(consul.port, 8500);
    }
}
