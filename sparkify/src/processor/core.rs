use super::activity::ActivityTransformer;
use super::catalog::CatalogTransformer;
use super::songplays::SongplayReconciler;
use super::types::{CatalogCheckpoint, DurationMatch, RunManifest, TableMarker};
use super::udf::register_udfs;
use super::writer::TableWriter;
use crate::schema::StarTable;
use crate::storage::{ObjectStorage, S3Config, S3Manager, StorageLocation};
use chrono::Utc;
use common::Result;
use common::config::Settings;
use datafusion::execution::context::SessionContext;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Runs the two pipeline phases against one input root and one output root.
pub struct SparkifyProcessor {
    ctx: Arc<SessionContext>,
    input: StorageLocation,
    output: Arc<StorageLocation>,
    catalog: CatalogTransformer,
    activity: ActivityTransformer,
    songplays: SongplayReconciler,
    writer: TableWriter,
    run_id: String,
}

impl SparkifyProcessor {
    pub fn new(settings: &Settings) -> Result<Self> {
        let ctx = Arc::new(SessionContext::new());
        let s3_manager = S3Manager::new(S3Config::from(&settings.aws));

        register_udfs(&ctx)?;

        let input = s3_manager.resolve(&settings.paths.input_data)?;
        let output = Arc::new(s3_manager.resolve(&settings.paths.output_data)?);
        s3_manager.register_object_store(&ctx, &input)?;
        s3_manager.register_object_store(&ctx, &output)?;

        let run_id = Uuid::new_v4().to_string();

        let catalog = CatalogTransformer::new(ctx.clone());
        let activity = ActivityTransformer::new(ctx.clone(), settings.pipeline.validation_policy);
        let songplays =
            SongplayReconciler::new(ctx.clone(), DurationMatch::from(&settings.pipeline));
        let writer = TableWriter::new(output.clone(), &run_id);

        info!(
            run_id = %run_id,
            input = %input.root(),
            output = %output.root(),
            "Processor initialized"
        );

        Ok(Self {
            ctx,
            input,
            output,
            catalog,
            activity,
            songplays,
            writer,
            run_id,
        })
    }

    pub fn session(&self) -> &SessionContext {
        &self.ctx
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn output(&self) -> &StorageLocation {
        &self.output
    }

    /// Phase 1: songs, artists and the catalog passthrough. The returned
    /// checkpoint is what phase 2 needs to start.
    pub async fn process_song_data(&self) -> Result<(CatalogCheckpoint, Vec<TableMarker>)> {
        info!(input = %self.input.root(), "Processing song data");
        // Read three times below; caching also surfaces schema violations here.
        let catalog = self
            .catalog
            .load_catalog(&self.input)
            .await?
            .cache()
            .await?;

        let songs = self
            .writer
            .write_table(StarTable::Songs, self.catalog.songs(&catalog)?)
            .await?;
        let artists = self
            .writer
            .write_table(StarTable::Artists, self.catalog.artists(&catalog)?)
            .await?;
        let songs_data = self
            .writer
            .write_table(StarTable::SongsData, catalog)
            .await?;

        let checkpoint =
            CatalogCheckpoint::new(self.writer.table_url(StarTable::SongsData), songs_data.clone());
        Ok((checkpoint, vec![songs, artists, songs_data]))
    }

    /// Phase 2: users, time and song plays.
    pub async fn process_log_data(&self, checkpoint: &CatalogCheckpoint) -> Result<Vec<TableMarker>> {
        info!(input = %self.input.root(), "Processing log data");
        let raw = self.activity.load_events(&self.input).await?;
        let events = self.activity.next_song_events(raw).await?;

        let users = self
            .writer
            .write_table(StarTable::Users, self.activity.users(&events)?)
            .await?;
        let time = self
            .writer
            .write_table(StarTable::Time, self.activity.time_table(&events)?)
            .await?;

        let song_lookup = self
            .songplays
            .load_song_lookup(checkpoint, &self.catalog)
            .await?;
        let facts = self.songplays.reconcile(events, song_lookup).await?;
        let songplays = self
            .writer
            .write_table(StarTable::Songplays, facts)
            .await?;

        Ok(vec![users, time, songplays])
    }

    /// Runs both phases in order and records the generation in `_manifest.json`.
    pub async fn run(&self) -> Result<RunManifest> {
        let started_at = Utc::now();

        let (checkpoint, mut tables) = self.process_song_data().await?;
        tables.extend(self.process_log_data(&checkpoint).await?);

        let manifest = RunManifest {
            run_id: self.run_id.clone(),
            input_root: self.input.root().to_string(),
            output_root: self.output.root().to_string(),
            started_at,
            completed_at: Utc::now(),
            tables,
        };
        self.writer.write_manifest(&manifest).await?;

        info!(
            run_id = %self.run_id,
            songplays = manifest.row_count(StarTable::Songplays).unwrap_or_default(),
            elapsed_ms = (manifest.completed_at - manifest.started_at).num_milliseconds(),
            "Pipeline run complete"
        );
        Ok(manifest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processor::test_support::{next_song, read_table, song_record, write_log, write_song};
    use common::config::{AwsConfig, PathsConfig, PipelineConfig};
    use serde_json::json;

    fn settings(input: &std::path::Path, output: &std::path::Path) -> Settings {
        Settings {
            aws: AwsConfig {
                aws_access_key_id: "test".to_string(),
                aws_secret_access_key: "test".to_string(),
                region: "us-west-2".to_string(),
                endpoint: None,
            },
            paths: PathsConfig {
                input_data: input.to_str().unwrap().to_string(),
                output_data: output.to_str().unwrap().to_string(),
            },
            pipeline: PipelineConfig::default(),
        }
    }

    #[tokio::test]
    async fn test_phases_in_order() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_song(input.path(), "song_data/A/B/C", "s1.json", &song_record("S1", "Test", "A1", "Artist", 180.5, 2000));
        write_log(input.path(), "2000-01-01-events.json", &[next_song("Artist", "Test", 180.5, 946684800000, "1")]);

        let processor = SparkifyProcessor::new(&settings(input.path(), output.path())).unwrap();

        let (checkpoint, catalog_tables) = processor.process_song_data().await.unwrap();
        assert_eq!(catalog_tables.len(), 3);
        assert_eq!(checkpoint.marker().table_name, "songs_data_table");
        assert_eq!(checkpoint.marker().run_id, processor.run_id());
        assert!(checkpoint.table_url().ends_with("/songs_data_table/"));

        let activity_tables = processor.process_log_data(&checkpoint).await.unwrap();
        let songplays = activity_tables.last().unwrap();
        assert_eq!(songplays.table_name, "songplays_table");
        assert_eq!(songplays.row_count, 1);

        let rows = read_table(
            processor.session(),
            &processor.output().table_url("songplays_table"),
            StarTable::Songplays.partition_by(),
        )
        .await;
        assert_eq!(rows[0]["song_id"], json!("S1"));
        assert_eq!(rows[0]["year"], json!("2000"));
        assert_eq!(rows[0]["month"], json!("1"));
    }

    #[tokio::test]
    async fn test_run_writes_manifest() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_song(input.path(), "song_data/A/B/C", "s1.json", &song_record("S1", "Test", "A1", "Artist", 180.5, 2000));
        write_log(input.path(), "2000-01-01-events.json", &[next_song("Artist", "Test", 180.5, 946684800000, "1")]);

        let processor = SparkifyProcessor::new(&settings(input.path(), output.path())).unwrap();
        let manifest = processor.run().await.unwrap();

        assert_eq!(manifest.tables.len(), StarTable::ALL.len());
        for table in StarTable::ALL {
            let marker = manifest.table(table).unwrap();
            assert_eq!(marker.run_id, manifest.run_id);
        }
        assert!(output.path().join("_manifest.json").exists());
    }

    #[tokio::test]
    async fn test_missing_logs_fail_after_catalog() {
        let input = tempfile::tempdir().unwrap();
        let output = tempfile::tempdir().unwrap();
        write_song(input.path(), "song_data/A/B/C", "s1.json", &song_record("S1", "Test", "A1", "Artist", 180.5, 2000));

        let processor = SparkifyProcessor::new(&settings(input.path(), output.path())).unwrap();

        assert!(processor.run().await.is_err());
        assert!(output.path().join("songs_table").join("_SUCCESS").exists());
        assert!(!output.path().join("_manifest.json").exists());
    }
}
