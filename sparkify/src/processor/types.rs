use crate::schema::StarTable;
use chrono::{DateTime, Utc};
use common::config::PipelineConfig;
use serde::{Deserialize, Serialize};

/// Written as `<table>/_SUCCESS` once every file of the table is durable.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct TableMarker {
    pub run_id: String,
    pub table_name: String,
    pub partition_by: Vec<String>,
    pub row_count: u64,
    pub file_count: usize,
    pub partition_count: usize,
    pub written_at: DateTime<Utc>,
}

/// Written as `_manifest.json` at the output root after a successful run. Any
/// table marker whose `run_id` differs from the manifest belongs to another generation.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RunManifest {
    pub run_id: String,
    pub input_root: String,
    pub output_root: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub tables: Vec<TableMarker>,
}

impl RunManifest {
    pub fn table(&self, table: StarTable) -> Option<&TableMarker> {
        self.tables.iter().find(|m| m.table_name == table.as_str())
    }

    pub fn row_count(&self, table: StarTable) -> Option<u64> {
        self.table(table).map(|m| m.row_count)
    }
}

/// Proof that the full catalog passthrough is durable. Only the catalog stage
/// creates one, so song play reconciliation cannot run ahead of it.
#[derive(Debug, Clone)]
pub struct CatalogCheckpoint {
    table_url: String,
    marker: TableMarker,
}

impl CatalogCheckpoint {
    pub(crate) fn new(table_url: String, marker: TableMarker) -> Self {
        Self { table_url, marker }
    }

    pub fn table_url(&self) -> &str {
        &self.table_url
    }

    pub fn marker(&self) -> &TableMarker {
        &self.marker
    }
}

/// How the duration part of the (artist, title, duration) song key is compared.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DurationMatch {
    Exact,
    Tolerance(f64),
}

impl From<&PipelineConfig> for DurationMatch {
    fn from(config: &PipelineConfig) -> Self {
        if config.duration_tolerance > 0.0 {
            DurationMatch::Tolerance(config.duration_tolerance)
        } else {
            DurationMatch::Exact
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_duration_match_from_config() {
        let mut config = PipelineConfig::default();
        assert_eq!(DurationMatch::from(&config), DurationMatch::Exact);

        config.duration_tolerance = 0.5;
        assert_eq!(DurationMatch::from(&config), DurationMatch::Tolerance(0.5));
    }

    #[test]
    fn test_manifest_lookup() {
        let marker = TableMarker {
            run_id: "r1".to_string(),
            table_name: StarTable::Users.as_str().to_string(),
            partition_by: vec![],
            row_count: 7,
            file_count: 1,
            partition_count: 0,
            written_at: Utc::now(),
        };
        let manifest = RunManifest {
            run_id: "r1".to_string(),
            input_root: "file:///in/".to_string(),
            output_root: "file:///out/".to_string(),
            started_at: Utc::now(),
            completed_at: Utc::now(),
            tables: vec![marker.clone()],
        };

        assert_eq!(manifest.row_count(StarTable::Users), Some(7));
        assert_eq!(manifest.table(StarTable::Songs), None);

        let json = serde_json::to_string(&marker).unwrap();
        let parsed: TableMarker = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, marker);
    }
}
