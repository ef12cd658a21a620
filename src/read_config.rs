// Module de lecture de configuration : topologie, carnet d'adresses et réglages du nœud

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use crate::error::{AppError, Result};
use crate::net_utils::DEFAULT_MAX_FRAME_LEN;
use crate::types::AdjacencyRow;

/// Topologie complète : nœud -> (voisin -> coût)
pub type TopologyConfig = BTreeMap<String, AdjacencyRow>;

/// Carnet d'adresses : nœud -> "host:port"
pub type AddressBook = BTreeMap<String, String>;

/// Enveloppe commune des fichiers JSON : {"type": "...", "config": {...}}
#[derive(Debug, Deserialize)]
struct ConfigFile<T> {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    config: T,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default)]
pub struct NodeSettings {
    pub retry_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub startup_grace_ms: u64,
    pub lsa_refresh_ms: Option<u64>,
    pub default_ttl: u32,
    pub max_frame_len: usize,
    pub log_level: String,
}

impl Default for NodeSettings {
    fn default() -> Self {
        NodeSettings {
            retry_delay_ms: 3000,
            connect_timeout_ms: 5000,
            startup_grace_ms: 5000,
            lsa_refresh_ms: None,
            default_ttl: 10,
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
            log_level: "info".to_string(),
        }
    }
}

impl NodeSettings {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn startup_grace(&self) -> Duration {
        Duration::from_millis(self.startup_grace_ms)
    }

    pub fn lsa_refresh(&self) -> Option<Duration> {
        self.lsa_refresh_ms.filter(|ms| *ms > 0).map(Duration::from_millis)
    }
}

fn read_file(path: &Path) -> Result<String> {
    fs::read_to_string(path)
        .map_err(|e| AppError::ConfigError(format!("Failed to read config file {}: {}", path.display(), e)))
}

pub fn parse_topology(content: &str) -> Result<TopologyConfig> {
    let file: ConfigFile<TopologyConfig> = serde_json::from_str(content)
        .map_err(|e| AppError::ConfigError(format!("Invalid topology file: {}", e)))?;
    if let Some(kind) = &file.kind {
        if kind != "topo" {
            log::warn!("Topology file declares type '{}', expected 'topo'", kind);
        }
    }
    for (node, row) in &file.config {
        validate_row(node, row)?;
    }
    Ok(file.config)
}

/// Coûts finis et positifs ou nuls ; un coût négatif ferait boucler Dijkstra
pub fn validate_row(node: &str, row: &AdjacencyRow) -> Result<()> {
    for (neighbor, cost) in row {
        if !cost.is_finite() || *cost < 0.0 {
            return Err(AppError::ConfigError(format!(
                "Invalid cost {} on link {} -> {}", cost, node, neighbor
            )));
        }
    }
    Ok(())
}

pub fn read_topology<P: AsRef<Path>>(path: P) -> Result<TopologyConfig> {
    let topology = parse_topology(&read_file(path.as_ref())?)?;
    log::info!("Loaded topology with {} nodes from {}", topology.len(), path.as_ref().display());
    Ok(topology)
}

pub fn parse_address_book(content: &str) -> Result<AddressBook> {
    let file: ConfigFile<AddressBook> = serde_json::from_str(content)
        .map_err(|e| AppError::ConfigError(format!("Invalid names file: {}", e)))?;
    if let Some(kind) = &file.kind {
        if kind != "names" {
            log::warn!("Names file declares type '{}', expected 'names'", kind);
        }
    }
    for (node, address) in &file.config {
        split_address(address)
            .map_err(|e| AppError::ConfigError(format!("Bad address for {}: {}", node, e)))?;
    }
    Ok(file.config)
}

pub fn read_address_book<P: AsRef<Path>>(path: P) -> Result<AddressBook> {
    let book = parse_address_book(&read_file(path.as_ref())?)?;
    log::info!("Loaded {} node addresses from {}", book.len(), path.as_ref().display());
    Ok(book)
}

pub fn parse_settings(content: &str) -> Result<NodeSettings> {
    let settings: NodeSettings = toml::from_str(content)?;
    Ok(settings)
}

/// Réglages du nœud ; sans fichier, les valeurs par défaut s'appliquent
pub fn read_settings(path: Option<&Path>) -> Result<NodeSettings> {
    match path {
        Some(path) => {
            let settings = parse_settings(&read_file(path)?)?;
            log::debug!("Settings: {:?}", settings);
            Ok(settings)
        }
        None => Ok(NodeSettings::default()),
    }
}

/// Voisins directs d'un nœud et leurs coûts
pub fn neighbors_of(topology: &TopologyConfig, node_id: &str) -> AdjacencyRow {
    topology.get(node_id).cloned().unwrap_or_default()
}

/// Découpe "host:port"
pub fn split_address(address: &str) -> Result<(String, u16)> {
    let (host, port) = address.rsplit_once(':')
        .ok_or_else(|| AppError::ConfigError(format!("Address '{}' is not host:port", address)))?;
    let port = port.parse::<u16>()
        .map_err(|e| AppError::ConfigError(format!("Invalid port in '{}': {}", address, e)))?;
    if host.is_empty() {
        return Err(AppError::ConfigError(format!("Missing host in '{}'", address)));
    }
    Ok((host.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPO: &str = r#"{
        "type": "topo",
        "config": {
            "A": {"B": 1, "C": 4},
            "B": {"A": 1, "C": 1},
            "C": {"A": 4, "B": 1.5}
        }
    }"#;

    #[test]
    fn test_parse_topology() {
        let topology = parse_topology(TOPO).unwrap();
        assert_eq!(topology.len(), 3);
        assert_eq!(topology["C"]["B"], 1.5);
        let neighbors = neighbors_of(&topology, "A");
        assert_eq!(neighbors.keys().collect::<Vec<_>>(), vec!["B", "C"]);
        assert!(neighbors_of(&topology, "Z").is_empty());
    }

    #[test]
    fn test_negative_cost_rejected() {
        let raw = r#"{"type": "topo", "config": {"A": {"B": -1}}}"#;
        assert!(matches!(parse_topology(raw), Err(AppError::ConfigError(_))));
    }

    #[test]
    fn test_validate_row() {
        let mut row = AdjacencyRow::new();
        row.insert("B".to_string(), 0.0);
        row.insert("C".to_string(), 2.5);
        assert!(validate_row("A", &row).is_ok());
        row.insert("D".to_string(), f64::INFINITY);
        assert!(validate_row("A", &row).is_err());
    }

    #[test]
    fn test_missing_config_key_rejected() {
        assert!(parse_topology(r#"{"A": {"B": 1}}"#).is_err());
    }

    #[test]
    fn test_parse_address_book() {
        let raw = r#"{"type": "names", "config": {"A": "127.0.0.1:5001", "B": "localhost:5002"}}"#;
        let book = parse_address_book(raw).unwrap();
        assert_eq!(book["B"], "localhost:5002");
        assert_eq!(split_address(&book["A"]).unwrap(), ("127.0.0.1".to_string(), 5001));
    }

    #[test]
    fn test_bad_address_rejected() {
        let raw = r#"{"type": "names", "config": {"A": "127.0.0.1"}}"#;
        assert!(parse_address_book(raw).is_err());
        assert!(split_address("host:notaport").is_err());
        assert!(split_address(":5000").is_err());
    }

    #[test]
    fn test_settings_defaults_and_overrides() {
        let settings = parse_settings("retry_delay_ms = 100\nlsa_refresh_ms = 250\n").unwrap();
        assert_eq!(settings.retry_delay(), Duration::from_millis(100));
        assert_eq!(settings.lsa_refresh(), Some(Duration::from_millis(250)));
        assert_eq!(settings.connect_timeout_ms, 5000);
        assert_eq!(settings.default_ttl, 10);

        let defaults = read_settings(None).unwrap();
        assert_eq!(defaults, NodeSettings::default());
        assert_eq!(defaults.retry_delay(), Duration::from_secs(3));
        assert_eq!(defaults.lsa_refresh(), None);
    }

    #[test]
    fn test_bad_settings_is_config_error() {
        assert!(matches!(parse_settings("retry_delay_ms = \"soon\""), Err(AppError::ConfigError(_))));
    }
}
