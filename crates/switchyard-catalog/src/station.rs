use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// Specification for an executable station.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationSpec {
    pub station_id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_category")]
    pub category: String,
    #[serde(default = "default_version")]
    pub version: u32,
    /// Default agent to execute at this station.
    #[serde(default)]
    pub agent_key: Option<String>,
    /// Template identifier when different from the station id.
    #[serde(default)]
    pub template_id: Option<String>,
    #[serde(default)]
    pub default_params: BTreeMap<String, Value>,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Which pack this station came from.
    #[serde(default = "default_pack")]
    pub pack_origin: String,
}

fn default_category() -> String {
    "general".to_string()
}

fn default_version() -> u32 {
    1
}

fn default_pack() -> String {
    "default".to_string()
}

impl StationSpec {
    pub fn new(station_id: &str, name: &str, category: &str) -> Self {
        Self {
            station_id: station_id.to_string(),
            name: name.to_string(),
            description: String::new(),
            category: category.to_string(),
            version: 1,
            agent_key: None,
            template_id: None,
            default_params: BTreeMap::new(),
            tags: Vec::new(),
            pack_origin: default_pack(),
        }
    }
}

/// Registry of available stations.
///
/// Used to validate EXTEND_GRAPH targets (unknown stations are rejected)
/// and to resolve execution specs for injected nodes.
#[derive(Debug, Clone, Default)]
pub struct StationLibrary {
    stations: BTreeMap<String, StationSpec>,
}

impl StationLibrary {
    pub fn new(stations: Vec<StationSpec>) -> Self {
        Self {
            stations: stations
                .into_iter()
                .map(|s| (s.station_id.clone(), s))
                .collect(),
        }
    }

    /// Load every `*.json` station spec in a directory.
    pub fn from_dir(dir: &Path) -> Result<Self> {
        let mut stations = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let content = fs::read_to_string(&path)?;
            let station: StationSpec = serde_json::from_str(&content)
                .map_err(|e| Error::Parse(format!("{}: {}", path.display(), e)))?;
            stations.push(station);
        }
        Ok(Self::new(stations))
    }

    /// The default pack shipped with the runtime.
    pub fn builtin() -> Self {
        Self::new(vec![
            StationSpec::new("clarifier", "Clarifier", "sidequest"),
            StationSpec::new("context-loader", "Context Loader", "sidequest"),
            StationSpec::new("architecture-critic", "Architecture Critic", "critic"),
            StationSpec::new("plan-writer", "Plan Writer", "worker"),
            StationSpec::new("fixer", "Fixer", "worker"),
            StationSpec::new("test-critic", "Test Critic", "critic"),
            StationSpec::new("security-scanner", "Security Scanner", "critic"),
        ])
    }

    pub fn has_station(&self, station_id: &str) -> bool {
        self.stations.contains_key(station_id)
    }

    pub fn get_station(&self, station_id: &str) -> Option<&StationSpec> {
        self.stations.get(station_id)
    }

    pub fn get_stations_by_category(&self, category: &str) -> Vec<&StationSpec> {
        self.stations
            .values()
            .filter(|s| s.category == category)
            .collect()
    }

    pub fn station_ids(&self) -> Vec<&str> {
        self.stations.keys().map(String::as_str).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_pack_has_clarifier() {
        let library = StationLibrary::builtin();
        assert!(library.has_station("clarifier"));
        assert!(!library.has_station("nonexistent-station"));
    }

    #[test]
    fn test_category_filter() {
        let library = StationLibrary::builtin();
        let critics = library.get_stations_by_category("critic");
        assert!(critics.iter().any(|s| s.station_id == "test-critic"));
        assert!(critics.iter().all(|s| s.category == "critic"));
    }

    #[test]
    fn test_station_spec_backward_compat() {
        let spec: StationSpec =
            serde_json::from_str(r#"{"station_id": "legacy-station"}"#).unwrap();
        assert_eq!(spec.category, "general");
        assert_eq!(spec.version, 1);
        assert_eq!(spec.pack_origin, "default");
    }
}
