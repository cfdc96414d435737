use crate::schema::{NEXT_SONG_PAGE, USERS_COLUMNS, get_activity_contract};
use crate::storage::{ListOptions, ObjectStorage, StorageLocation, list_keys};
use crate::utils::paths::{LOG_DATA_GLOB, LOG_DATA_PATTERN, glob_prefix};
use arrow::datatypes::DataType;
use arrow::json::ReaderBuilder;
use arrow::json::reader::infer_json_schema;
use arrow::record_batch::RecordBatch;
use common::config::ValidationPolicy;
use common::{Error, Result};
use datafusion::datasource::MemTable;
use datafusion::functions::expr_fn::{date_part, to_char, to_timestamp_seconds};
use datafusion::logical_expr::{cast, try_cast};
use datafusion::prelude::*;
use datafusion::scalar::ScalarValue;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const START_TS_COLUMN: &str = "start_ts";
pub const START_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Turns raw activity logs into the filtered event relation and the
/// users and time dimensions.
pub struct ActivityTransformer {
    ctx: Arc<SessionContext>,
    policy: ValidationPolicy,
}

impl ActivityTransformer {
    pub fn new(ctx: Arc<SessionContext>, policy: ValidationPolicy) -> Self {
        Self { ctx, policy }
    }

    /// Reads every `log_data/*.json` file with a schema inferred across all of
    /// them. A field seen both as text and as a number is inferred as text and
    /// numbers are decoded into it, so the contract decides how to cast it.
    pub async fn load_events(&self, input: &StorageLocation) -> Result<DataFrame> {
        let keys = list_keys(
            input,
            ListOptions {
                prefix: Some(glob_prefix(LOG_DATA_GLOB).to_string()),
                pattern: Some(LOG_DATA_PATTERN.clone()),
            },
        )
        .await?;

        if keys.is_empty() {
            return Err(Error::NoInputFiles {
                root: input.root_url().to_string(),
                pattern: LOG_DATA_GLOB.to_string(),
            });
        }

        info!(files = keys.len(), "Loading activity logs");
        let mut ndjson = Vec::new();
        for key in &keys {
            ndjson.extend_from_slice(&input.get_object(key).await?);
            ndjson.push(b'\n');
        }

        let (schema, records) = infer_json_schema(Cursor::new(&ndjson), None)?;
        let schema = Arc::new(schema);
        debug!(
            records,
            fields = ?schema.fields().iter().map(|f| f.name()).collect::<Vec<_>>(),
            "Inferred activity log schema"
        );

        let reader = ReaderBuilder::new(schema.clone())
            .with_coerce_primitive(true)
            .build(Cursor::new(ndjson))?;
        let batches = reader.collect::<std::result::Result<Vec<RecordBatch>, _>>()?;

        let table = MemTable::try_new(schema, vec![batches])?;
        Ok(self.ctx.read_table(Arc::new(table))?)
    }

    /// NextSong events normalized to the activity contract, with `start_ts`
    /// and `start_time` derived from `ts`. The result is materialized in memory
    /// because users, time and song plays all read it.
    pub async fn next_song_events(&self, raw: DataFrame) -> Result<DataFrame> {
        self.check_required_columns(&raw)?;

        let plays = raw.filter(cast(ident("page"), DataType::Utf8).eq(lit(NEXT_SONG_PAGE)))?;
        let plays = self.normalize(plays)?;
        let plays = self.handle_missing_timestamps(plays).await?;

        let start_ts = to_timestamp_seconds(vec![ident("ts") / lit(1000_i64)]);
        let events = plays
            .with_column(START_TS_COLUMN, start_ts)?
            .with_column("start_time", to_char(ident(START_TS_COLUMN), lit(START_TIME_FORMAT)))?
            .cache()
            .await?;

        info!(policy = ?self.policy, "Activity events normalized");
        Ok(events)
    }

    fn check_required_columns(&self, raw: &DataFrame) -> Result<()> {
        let missing: Vec<&str> = get_activity_contract()
            .iter()
            .filter(|column| column.required)
            .filter(|column| !raw.schema().has_column_with_unqualified_name(column.name))
            .map(|column| column.name)
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::SchemaValidation(format!(
                "Activity logs are missing required columns: {}",
                missing.join(", ")
            )))
        }
    }

    /// Projects exactly the contract columns. Absent optional columns become
    /// typed nulls; present ones are cast to the contract type.
    fn normalize(&self, df: DataFrame) -> Result<DataFrame> {
        let mut exprs = Vec::with_capacity(get_activity_contract().len());

        for column in get_activity_contract() {
            let expr = match df.schema().qualified_field_with_unqualified_name(column.name) {
                Ok((_, field)) if field.data_type() == &column.data_type => ident(column.name),
                Ok((_, field)) => {
                    debug!(
                        column = column.name,
                        from = %field.data_type(),
                        to = %column.data_type,
                        "Casting activity column"
                    );
                    match self.policy {
                        ValidationPolicy::RejectBatch => cast(ident(column.name), column.data_type.clone()),
                        ValidationPolicy::RejectRecord => {
                            try_cast(ident(column.name), column.data_type.clone())
                        }
                    }
                }
                Err(_) => {
                    debug!(column = column.name, "Activity column absent, filling with nulls");
                    lit(ScalarValue::try_from(&column.data_type)?)
                }
            };
            exprs.push(expr.alias(column.name));
        }

        Ok(df.select(exprs)?)
    }

    async fn handle_missing_timestamps(&self, df: DataFrame) -> Result<DataFrame> {
        let df = df.cache().await?;
        let missing = df.clone().filter(ident("ts").is_null())?.count().await?;
        if missing == 0 {
            return Ok(df);
        }

        match self.policy {
            ValidationPolicy::RejectBatch => Err(Error::SchemaValidation(format!(
                "{} NextSong records have no usable ts",
                missing
            ))),
            ValidationPolicy::RejectRecord => {
                warn!(dropped = missing, "Dropping NextSong records without a usable ts");
                Ok(df.filter(ident("ts").is_not_null())?)
            }
        }
    }

    pub fn users(&self, events: &DataFrame) -> Result<DataFrame> {
        Ok(events.clone().select_columns(USERS_COLUMNS)?.distinct()?)
    }

    /// One row per distinct start timestamp. `weekday` runs from 1 (Sunday) to
    /// 7 (Saturday), `week` is the ISO week.
    pub fn time_table(&self, events: &DataFrame) -> Result<DataFrame> {
        let part = |unit: &str| cast(date_part(lit(unit), ident(START_TS_COLUMN)), DataType::Int32);

        let exprs = vec![
            ident("start_time"),
            part("hour").alias("hour"),
            part("day").alias("day"),
            part("week").alias("week"),
            part("month").alias("month"),
            part("year").alias("year"),
            (part("dow") + lit(1_i32)).alias("weekday"),
        ];

        Ok(events.clone().select(exprs)?.distinct()?)
    }
}
