use std::fs;
use std::path::PathBuf;

use crate::gateway::GatewayConfig;

const CONFIG_FILE: &str = "gateway.json";

/// Resolve the data directory used for config and logs.
///
/// `GATEWAY_DATA_DIR` overrides the default `./data` next to the working
/// directory, so containerized deployments can mount a volume.
pub fn get_data_dir() -> Result<PathBuf, String> {
    let dir = match std::env::var("GATEWAY_DATA_DIR") {
        Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
        _ => std::env::current_dir()
            .map_err(|e| format!("Failed to resolve working directory: {}", e))?
            .join("data"),
    };

    if !dir.exists() {
        fs::create_dir_all(&dir).map_err(|e| format!("Failed to create data directory: {}", e))?;
    }

    Ok(dir)
}

/// Load gateway configuration
pub fn load_gateway_config() -> Result<GatewayConfig, String> {
    let data_dir = get_data_dir()?;
    let config_path = data_dir.join(CONFIG_FILE);

    if !config_path.exists() {
        let config = GatewayConfig::default();
        let _ = save_gateway_config(&config);
        return Ok(config);
    }

    let content = fs::read_to_string(&config_path)
        .map_err(|e| format!("Failed to read config file: {}", e))?;

    serde_json::from_str(&content)
        .map_err(|e| format!("Failed to parse config file: {}", e))
}

/// Save gateway configuration
pub fn save_gateway_config(config: &GatewayConfig) -> Result<(), String> {
    let data_dir = get_data_dir()?;
    let config_path = data_dir.join(CONFIG_FILE);

    let content = serde_json::to_string_pretty(config)
        .map_err(|e| format!("Failed to serialize config: {}", e))?;

    fs::write(&config_path, content)
        .map_err(|e| format!("Failed to save config: {}", e))
}
