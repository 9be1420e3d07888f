// Service registry - discovery, cache and static fallback
//
// Resolution strategy: cached Consul lookup when discovery is configured,
// static URL map otherwise. Discovery failures degrade to the static map and
// are never surfaced to the forwarding path.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::{oneshot, Mutex};
use tokio::time::{interval, MissedTickBehavior};

use crate::gateway::config::{ConsulConfig, GatewayConfig, ServiceUrls};
use crate::gateway::routing;

/// Cadence of the background cache sweep
const REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// Documented default for identifiers missing from the static map
const DEFAULT_SERVICE_URL: &str = "http://localhost:3000";

/// One healthy network location of a service, as reported by discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInstance {
    pub id: String,
    pub name: String,
    pub address: String,
    pub port: u16,
}

impl ServiceInstance {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.address, self.port)
    }
}

// Consul health API wire format (`GET /v1/health/service/{name}`)
#[derive(Debug, Deserialize)]
struct HealthEntry {
    #[serde(rename = "Node")]
    node: NodeInfo,
    #[serde(rename = "Service")]
    service: AgentService,
}

#[derive(Debug, Deserialize)]
struct NodeInfo {
    #[serde(rename = "Address", default)]
    address: String,
}

#[derive(Debug, Deserialize)]
struct AgentService {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Service")]
    name: String,
    #[serde(rename = "Address", default)]
    address: String,
    #[serde(rename = "Port")]
    port: u16,
}

/// Read-only Consul HTTP API client
pub struct ConsulClient {
    http: Client,
    base_url: String,
}

impl ConsulClient {
    pub fn new(config: &ConsulConfig) -> Self {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(10))
            .build()
            .expect("Failed to create HTTP client");

        Self {
            http,
            base_url: format!("http://{}:{}", config.host, config.port),
        }
    }

    /// Instances of a service currently passing their health checks.
    pub async fn healthy_instances(
        &self,
        service: &str,
    ) -> Result<Vec<ServiceInstance>, reqwest::Error> {
        let url = format!(
            "{}/v1/health/service/{}?passing=true",
            self.base_url, service
        );

        let entries: Vec<HealthEntry> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        Ok(entries
            .into_iter()
            .map(|entry| {
                // Service registrations without an address inherit the node's
                let address = if entry.service.address.is_empty() {
                    entry.node.address
                } else {
                    entry.service.address
                };
                ServiceInstance {
                    id: entry.service.id,
                    name: entry.service.name,
                    address,
                    port: entry.service.port,
                }
            })
            .collect())
    }

    /// All service names known to the catalog.
    pub async fn list_services(&self) -> Result<Vec<String>, reqwest::Error> {
        let url = format!("{}/v1/catalog/services", self.base_url);

        let services: HashMap<String, Vec<String>> = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut names: Vec<String> = services.into_keys().collect();
        names.sort();
        Ok(names)
    }
}

/// Static resolution from configuration. Always authoritative when discovery
/// is unavailable; guarantees a URL for every identifier.
pub struct StaticRegistry {
    urls: ServiceUrls,
    monolith_url: Option<String>,
}

impl StaticRegistry {
    pub fn new(config: &GatewayConfig) -> Self {
        Self {
            urls: config.service_urls.clone(),
            monolith_url: config.backend_monolith_url.clone(),
        }
    }

    pub fn url_for(&self, service: &str) -> String {
        if service == routing::BACKEND_MONOLITH {
            return self
                .monolith_url
                .clone()
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string());
        }

        match service {
            routing::AUTH_SERVICE => self.urls.auth.clone(),
            routing::ORDERS_SERVICE => self.urls.orders.clone(),
            routing::LOGISTICS_SERVICE => self.urls.logistics.clone(),
            routing::INVOICING_SERVICE => self.urls.invoicing.clone(),
            routing::AI_SERVICE => self.urls.ai.clone(),
            routing::SRI_SERVICE => self.urls.sri.clone(),
            _ => DEFAULT_SERVICE_URL.to_string(),
        }
    }

    fn known(&self) -> Vec<String> {
        if self.monolith_url.is_some() {
            vec![
                routing::BACKEND_MONOLITH.to_string(),
                routing::AI_SERVICE.to_string(),
                routing::SRI_SERVICE.to_string(),
            ]
        } else {
            routing::KNOWN_SERVICES
                .iter()
                .map(|s| s.to_string())
                .collect()
        }
    }
}

/// Consul-backed resolution with a per-service instance cache and the static
/// map as fallback.
pub struct DiscoveredRegistry {
    consul: ConsulClient,
    cache: DashMap<String, Vec<ServiceInstance>>,
    // Serializes cache-miss fetches so concurrent misses for the same
    // service produce a single live query
    fetch_lock: Mutex<()>,
    fallback: StaticRegistry,
    refresh_stop: Mutex<Option<oneshot::Sender<()>>>,
}

impl DiscoveredRegistry {
    fn new(consul: ConsulClient, fallback: StaticRegistry) -> Self {
        Self {
            consul,
            cache: DashMap::new(),
            fetch_lock: Mutex::new(()),
            fallback,
            refresh_stop: Mutex::new(None),
        }
    }

    async fn instances(&self, service: &str) -> Vec<ServiceInstance> {
        // Cache hit never queries, even if the entry is stale
        if let Some(cached) = self.cache.get(service) {
            return cached.clone();
        }
        self.fetch(service).await
    }

    async fn fetch(&self, service: &str) -> Vec<ServiceInstance> {
        let _guard = self.fetch_lock.lock().await;

        // Another request may have populated the entry while we waited
        if let Some(cached) = self.cache.get(service) {
            return cached.clone();
        }

        match self.consul.healthy_instances(service).await {
            Ok(instances) => {
                self.cache.insert(service.to_string(), instances.clone());
                instances
            }
            Err(err) => {
                // The empty set is a normal signal; the static fallback
                // takes over. Errors are not cached.
                tracing::error!("error fetching service {} from consul: {}", service, err);
                Vec::new()
            }
        }
    }

    async fn refresh_all(&self) {
        for service in routing::KNOWN_SERVICES {
            self.cache.remove(service);
            let _ = self.fetch(service).await;
        }
        tracing::debug!("service cache refreshed");
    }
}

/// Service registry variant, chosen once at startup.
pub enum ServiceRegistry {
    Static(StaticRegistry),
    Discovered(DiscoveredRegistry),
}

impl ServiceRegistry {
    pub fn from_config(config: &GatewayConfig) -> Arc<Self> {
        let statics = StaticRegistry::new(config);
        match &config.consul {
            Some(consul) => {
                tracing::info!(
                    "consul client initialized at {}:{}",
                    consul.host,
                    consul.port
                );
                Arc::new(Self::Discovered(DiscoveredRegistry::new(
                    ConsulClient::new(consul),
                    statics,
                )))
            }
            None => {
                tracing::info!("dynamic discovery disabled, using static configuration");
                Arc::new(Self::Static(statics))
            }
        }
    }

    /// Spawn the periodic cache refresh. The sweep is awaited before the
    /// next tick fires, so refresh cycles never overlap. No-op without
    /// discovery.
    pub async fn start_refresh(self: Arc<Self>) {
        let ServiceRegistry::Discovered(inner) = self.as_ref() else {
            return;
        };

        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();
        *inner.refresh_stop.lock().await = Some(stop_tx);

        let registry = Arc::clone(&self);
        tokio::spawn(async move {
            let mut ticker = interval(REFRESH_INTERVAL);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let ServiceRegistry::Discovered(inner) = registry.as_ref() {
                            inner.refresh_all().await;
                        }
                    }
                    _ = &mut stop_rx => {
                        tracing::debug!("service cache refresh stopped");
                        break;
                    }
                }
            }
        });
    }

    /// Stop the background refresh task.
    pub async fn shutdown(&self) {
        if let ServiceRegistry::Discovered(inner) = self {
            if let Some(stop_tx) = inner.refresh_stop.lock().await.take() {
                let _ = stop_tx.send(());
            }
        }
    }

    /// Healthy instances currently known for a service. Static registries
    /// report none and resolution falls through to the fallback URL.
    pub async fn instances(&self, service: &str) -> Vec<ServiceInstance> {
        match self {
            ServiceRegistry::Static(_) => Vec::new(),
            ServiceRegistry::Discovered(inner) => inner.instances(service).await,
        }
    }

    /// Static fallback URL, defined for every identifier.
    pub fn fallback_url(&self, service: &str) -> String {
        match self {
            ServiceRegistry::Static(statics) => statics.url_for(service),
            ServiceRegistry::Discovered(inner) => inner.fallback.url_for(service),
        }
    }

    /// Service names the gateway can route to right now.
    pub async fn known_services(&self) -> Vec<String> {
        match self {
            ServiceRegistry::Static(statics) => statics.known(),
            ServiceRegistry::Discovered(inner) => match inner.consul.list_services().await {
                Ok(names) => names,
                Err(err) => {
                    tracing::error!("error listing services from consul: {}", err);
                    Vec::new()
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unreachable_consul() -> ConsulClient {
        // Nothing listens on port 1; connections are refused immediately
        ConsulClient::new(&ConsulConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
        })
    }

    fn sample_instance(id: &str, port: u16) -> ServiceInstance {
        ServiceInstance {
            id: id.to_string(),
            name: routing::ORDERS_SERVICE.to_string(),
            address: "10.0.0.5".to_string(),
            port,
        }
    }

    #[test]
    fn test_instance_base_url() {
        assert_eq!(sample_instance("orders-1", 3001).base_url(), "http://10.0.0.5:3001");
    }

    #[test]
    fn test_static_fallback_covers_every_known_service() {
        let registry = StaticRegistry::new(&GatewayConfig::default());
        for service in routing::KNOWN_SERVICES {
            assert!(!registry.url_for(service).is_empty());
        }
        assert_eq!(registry.url_for("no-such-service"), DEFAULT_SERVICE_URL);
    }

    #[test]
    fn test_static_fallback_monolith_url() {
        let mut config = GatewayConfig::default();
        config.backend_monolith_url = Some("http://backend:4000".to_string());
        let registry = StaticRegistry::new(&config);
        assert_eq!(registry.url_for(routing::BACKEND_MONOLITH), "http://backend:4000");
        // Absent monolith URL falls back to the documented default
        let registry = StaticRegistry::new(&GatewayConfig::default());
        assert_eq!(registry.url_for(routing::BACKEND_MONOLITH), DEFAULT_SERVICE_URL);
    }

    #[test]
    fn test_known_services_by_mode() {
        let micro = StaticRegistry::new(&GatewayConfig::default());
        assert_eq!(micro.known().len(), routing::KNOWN_SERVICES.len());

        let mut config = GatewayConfig::default();
        config.backend_monolith_url = Some("http://localhost:3000".to_string());
        let mono = StaticRegistry::new(&config);
        assert!(mono.known().contains(&routing::BACKEND_MONOLITH.to_string()));
        assert!(!mono.known().contains(&routing::ORDERS_SERVICE.to_string()));
    }

    #[tokio::test]
    async fn test_cache_hit_skips_discovery() {
        let registry = DiscoveredRegistry::new(
            unreachable_consul(),
            StaticRegistry::new(&GatewayConfig::default()),
        );
        let cached = vec![sample_instance("orders-1", 3001)];
        registry
            .cache
            .insert(routing::ORDERS_SERVICE.to_string(), cached.clone());

        // Consul is unreachable: a live query would return the empty set
        let instances = registry.instances(routing::ORDERS_SERVICE).await;
        assert_eq!(instances, cached);
    }

    #[tokio::test]
    async fn test_discovery_error_returns_empty_and_is_not_cached() {
        let registry = DiscoveredRegistry::new(
            unreachable_consul(),
            StaticRegistry::new(&GatewayConfig::default()),
        );

        let instances = registry.instances(routing::AUTH_SERVICE).await;
        assert!(instances.is_empty());
        assert!(registry.cache.get(routing::AUTH_SERVICE).is_none());
    }

    #[tokio::test]
    async fn test_registry_resolution_survives_unreachable_discovery() {
        let mut config = GatewayConfig::default();
        config.consul = Some(ConsulConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
        });
        let registry = ServiceRegistry::from_config(&config);

        for service in routing::KNOWN_SERVICES {
            assert!(registry.instances(service).await.is_empty());
            assert!(!registry.fallback_url(service).is_empty());
        }
    }

    #[tokio::test]
    async fn test_static_registry_reports_no_instances() {
        let registry = ServiceRegistry::from_config(&GatewayConfig::default());
        assert!(registry.instances(routing::ORDERS_SERVICE).await.is_empty());
        assert_eq!(
            registry.fallback_url(routing::ORDERS_SERVICE),
            "http://localhost:3001"
        );
    }
}
