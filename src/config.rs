use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

pub const DEFAULT_GRAPH_HOST: &str = "https://gateway.thegraph.com";

/// Runtime configuration, loaded from a JSON file.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub db_path: String,
    pub sync_interval_seconds: u64,
    pub port: u16,
    pub graph_host: String,
    pub sources: Vec<SourceConfig>,
}

/// One GraphQL source (subgraph) and the entities pulled from it.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    pub name: String,
    pub subgraph_id: String,
    pub entities: Vec<EntityBinding>,
}

/// Maps an entity name to the table it is persisted into.
#[derive(Debug, Clone)]
pub struct EntityBinding {
    pub entity: String,
    pub table: String,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct RawConfig {
    api_key: String,
    db_path: String,
    #[serde(default = "default_sync_interval")]
    sync_interval_seconds: u64,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_graph_host")]
    graph_host: String,
    #[serde(default)]
    sources: BTreeMap<String, RawSource>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    subgraph_id: String,
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    entities: BTreeMap<String, String>,
}

fn default_sync_interval() -> u64 {
    60
}

fn default_port() -> u16 {
    8001
}

fn default_graph_host() -> String {
    DEFAULT_GRAPH_HOST.to_string()
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_string(),
            source,
        })?;
        Self::from_json_str(&text)
    }

    /// Parse a config document. Disabled sources are dropped; sources and
    /// entities iterate in name order.
    pub fn from_json_str(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = serde_json::from_str(text)?;

        let sources = raw
            .sources
            .into_iter()
            .filter(|(_, src)| src.enabled)
            .map(|(name, src)| SourceConfig {
                name,
                subgraph_id: src.subgraph_id,
                entities: src
                    .entities
                    .into_iter()
                    .map(|(entity, table)| EntityBinding { entity, table })
                    .collect(),
            })
            .collect();

        Ok(Config {
            api_key: raw.api_key,
            db_path: raw.db_path,
            sync_interval_seconds: raw.sync_interval_seconds,
            port: raw.port,
            graph_host: raw.graph_host,
            sources,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = r#"{
        "api_key": "key-123",
        "db_path": "data/test.duckdb",
        "sync_interval_seconds": 30,
        "sources": {
            "Polymarket": {
                "subgraph_id": "sub-main",
                "entities": {
                    "Condition": "condition",
                    "EnrichedOrderFilled": "enriched_order_filled"
                }
            },
            "PolymarketPnl": {
                "subgraph_id": "sub-pnl",
                "enabled": false,
                "entities": { "Condition": "pnl_condition" }
            }
        }
    }"#;

    #[test]
    fn parses_full_config() {
        let config = Config::from_json_str(FULL).unwrap();
        assert_eq!(config.api_key, "key-123");
        assert_eq!(config.db_path, "data/test.duckdb");
        assert_eq!(config.sync_interval_seconds, 30);
        assert_eq!(config.port, 8001);
        assert_eq!(config.graph_host, DEFAULT_GRAPH_HOST);
    }

    #[test]
    fn drops_disabled_sources() {
        let config = Config::from_json_str(FULL).unwrap();
        assert_eq!(config.sources.len(), 1);
        assert_eq!(config.sources[0].name, "Polymarket");
        assert_eq!(config.sources[0].entities.len(), 2);
    }

    #[test]
    fn sync_interval_defaults_to_60() {
        let config =
            Config::from_json_str(r#"{"api_key":"k","db_path":"d"}"#).unwrap();
        assert_eq!(config.sync_interval_seconds, 60);
        assert!(config.sources.is_empty());
    }

    #[test]
    fn missing_api_key_is_an_error() {
        let result = Config::from_json_str(r#"{"db_path":"d"}"#);
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn sources_iterate_in_name_order() {
        let config = Config::from_json_str(
            r#"{"api_key":"k","db_path":"d","sources":{
                "Zeta":{"subgraph_id":"z"},
                "Alpha":{"subgraph_id":"a"}
            }}"#,
        )
        .unwrap();
        let names: Vec<_> = config.sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["Alpha", "Zeta"]);
    }
}
