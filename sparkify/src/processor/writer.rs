use super::types::{RunManifest, TableMarker};
use crate::schema::StarTable;
use crate::storage::{ObjectStorage, StorageLocation};
use crate::utils::paths::partition_directory;
use arrow::array::AsArray;
use arrow::datatypes::{DataType, UInt64Type};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use chrono::Utc;
use common::{Error, Result};
use datafusion::common::config::TableParquetOptions;
use datafusion::dataframe::DataFrameWriteOptions;
use datafusion::functions::expr_fn::coalesce;
use datafusion::logical_expr::cast;
use datafusion::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, info};

pub const MARKER_FILE: &str = "_SUCCESS";
pub const MANIFEST_FILE: &str = "_manifest.json";

pub const TABLE_METADATA_KEY: &str = "sparkify.table";
pub const RUN_ID_METADATA_KEY: &str = "sparkify.run_id";

/// Directory value for rows whose partition key is null.
pub const DEFAULT_PARTITION: &str = "__HIVE_DEFAULT_PARTITION__";

/// Writes star-schema tables as hive-partitioned Parquet directories, replacing
/// whatever a previous run left under the same table prefix.
pub struct TableWriter {
    storage: Arc<StorageLocation>,
    run_id: String,
}

impl TableWriter {
    pub fn new(storage: Arc<StorageLocation>, run_id: &str) -> Self {
        Self {
            storage,
            run_id: run_id.to_string(),
        }
    }

    pub fn table_url(&self, table: StarTable) -> String {
        self.storage.table_url(table.as_str())
    }

    pub async fn write_table(&self, table: StarTable, df: DataFrame) -> Result<TableMarker> {
        let table_name = table.as_str();
        let partition_by = table.partition_by();
        let df = self.prepare_partition_columns(df, partition_by)?;

        let removed = self.storage.delete_prefix(table_name).await?;
        if removed > 0 {
            debug!(table = table_name, removed, "Removed previous table generation");
        }

        let target_url = self.table_url(table);
        info!(table = table_name, target = %target_url, ?partition_by, "Writing table");

        let options = DataFrameWriteOptions::new().with_partition_by(
            partition_by.iter().map(|c| c.to_string()).collect(),
        );
        let result = df
            .write_parquet(&target_url, options, Some(self.parquet_options(table)))
            .await?;
        let row_count = written_rows(&result);

        let (file_count, partition_count) = self.summarize_files(table).await?;

        let marker = TableMarker {
            run_id: self.run_id.clone(),
            table_name: table_name.to_string(),
            partition_by: partition_by.iter().map(|c| c.to_string()).collect(),
            row_count,
            file_count,
            partition_count,
            written_at: Utc::now(),
        };
        self.write_marker(&marker).await?;

        info!(
            table = table_name,
            rows = row_count,
            files = file_count,
            partitions = partition_count,
            "Table written"
        );
        Ok(marker)
    }

    /// Partition values end up as directory names, so they are written as text.
    /// Null keys go to [`DEFAULT_PARTITION`] instead of an empty `key=` directory.
    fn prepare_partition_columns(&self, df: DataFrame, partition_by: &[&str]) -> Result<DataFrame> {
        if partition_by.is_empty() {
            return Ok(df);
        }

        for column in partition_by {
            if !df.schema().has_column_with_unqualified_name(column) {
                return Err(Error::SchemaValidation(format!(
                    "Partition column {} is missing from the table",
                    column
                )));
            }
        }

        let exprs: Vec<Expr> = df
            .schema()
            .fields()
            .iter()
            .map(|field| {
                let name = field.name();
                if partition_by.contains(&name.as_str()) {
                    coalesce(vec![cast(ident(name), DataType::Utf8), lit(DEFAULT_PARTITION)])
                        .alias(name)
                } else {
                    ident(name)
                }
            })
            .collect();

        Ok(df.select(exprs)?)
    }

    fn parquet_options(&self, table: StarTable) -> TableParquetOptions {
        let mut options = TableParquetOptions::default();
        options.global.compression = Some("snappy".to_string());
        options
            .key_value_metadata
            .insert(TABLE_METADATA_KEY.to_string(), Some(table.as_str().to_string()));
        options
            .key_value_metadata
            .insert(RUN_ID_METADATA_KEY.to_string(), Some(self.run_id.clone()));
        options
    }

    async fn summarize_files(&self, table: StarTable) -> Result<(usize, usize)> {
        let files: Vec<String> = self
            .storage
            .list_objects(table.as_str())
            .await?
            .into_iter()
            .filter(|key| key.ends_with(".parquet"))
            .collect();

        let partitions: BTreeSet<String> = files
            .iter()
            .map(|key| partition_directory(key, table.partition_by()))
            .filter(|dir| !dir.is_empty())
            .collect();

        Ok((files.len(), partitions.len()))
    }

    pub async fn write_marker(&self, marker: &TableMarker) -> Result<()> {
        let marker_key = format!("{}/{}", marker.table_name, MARKER_FILE);
        let marker_json = serde_json::to_vec_pretty(marker)?;
        self.storage
            .put_object(&marker_key, Bytes::from(marker_json))
            .await?;
        debug!(key = marker_key, "Marker written");
        Ok(())
    }

    pub async fn read_marker(&self, table: StarTable) -> Result<TableMarker> {
        let marker_key = format!("{}/{}", table.as_str(), MARKER_FILE);
        let content = self.storage.get_object(&marker_key).await?;
        Ok(serde_json::from_slice(&content)?)
    }

    pub async fn write_manifest(&self, manifest: &RunManifest) -> Result<()> {
        let manifest_json = serde_json::to_vec_pretty(manifest)?;
        self.storage
            .put_object(MANIFEST_FILE, Bytes::from(manifest_json))
            .await?;
        info!(run_id = %manifest.run_id, tables = manifest.tables.len(), "Run manifest written");
        Ok(())
    }
}

/// DataFusion reports the number of written rows in a single `count` column.
fn written_rows(batches: &[RecordBatch]) -> u64 {
    batches
        .iter()
        .filter_map(|batch| batch.column_by_name("count"))
        .filter_map(|column| column.as_primitive_opt::<UInt64Type>())
        .flat_map(|counts| counts.iter().flatten())
        .sum()
}
