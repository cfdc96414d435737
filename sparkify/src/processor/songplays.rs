use super::catalog::CatalogTransformer;
use super::types::{CatalogCheckpoint, DurationMatch};
use super::udf::SONGPLAY_KEY_UDF;
use common::Result;
use datafusion::prelude::*;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Rebuilds song plays by matching NextSong events against the persisted catalog.
pub struct SongplayReconciler {
    ctx: Arc<SessionContext>,
    duration_match: DurationMatch,
}

impl SongplayReconciler {
    pub fn new(ctx: Arc<SessionContext>, duration_match: DurationMatch) -> Self {
        Self {
            ctx,
            duration_match,
        }
    }

    /// Re-reads the catalog passthrough written in the catalog stage and projects
    /// the denormalized join input.
    pub async fn load_song_lookup(
        &self,
        checkpoint: &CatalogCheckpoint,
        catalog: &CatalogTransformer,
    ) -> Result<DataFrame> {
        info!(
            table = %checkpoint.table_url(),
            run_id = %checkpoint.marker().run_id,
            "Reading catalog passthrough"
        );
        let songs_data = self
            .ctx
            .read_parquet(checkpoint.table_url(), ParquetReadOptions::default())
            .await?;
        catalog.song_lookup(songs_data)
    }

    /// Numbers events 1..N by (ts, sessionId, userId), then inner joins them with
    /// the catalog on artist name, title and duration. Unmatched events are dropped.
    pub async fn reconcile(&self, events: DataFrame, song_lookup: DataFrame) -> Result<DataFrame> {
        let suffix = Uuid::new_v4().simple().to_string();
        let events_view = format!("sparkify_events_{}", suffix);
        let songs_view = format!("sparkify_songs_{}", suffix);

        self.ctx.register_table(events_view.as_str(), events.into_view())?;
        self.ctx.register_table(songs_view.as_str(), song_lookup.into_view())?;

        let sql = self.build_query(&events_view, &songs_view);
        debug!(sql = %sql, "Planning song play reconciliation");
        let planned = self.ctx.sql(&sql).await;

        // The plan keeps its own handle on both inputs.
        self.ctx.deregister_table(events_view.as_str())?;
        self.ctx.deregister_table(songs_view.as_str())?;

        Ok(planned?)
    }

    fn build_query(&self, events_view: &str, songs_view: &str) -> String {
        let duration_condition = match self.duration_match {
            DurationMatch::Exact => "songs.duration = logs.length".to_string(),
            DurationMatch::Tolerance(eps) => format!(
                "logs.length BETWEEN songs.duration - {eps} AND songs.duration + {eps}"
            ),
        };

        format!(
            r#"WITH numbered AS (
    SELECT *,
        CAST(ROW_NUMBER() OVER (ORDER BY ts, "sessionId", "userId") AS BIGINT) AS songplay_id
    FROM {events_view}
)
SELECT DISTINCT
    logs.songplay_id,
    {key_udf}(concat_ws('|',
        COALESCE(logs."userId", ''),
        COALESCE(CAST(logs."sessionId" AS VARCHAR), ''),
        COALESCE(CAST(logs.ts AS VARCHAR), ''))) AS songplay_key,
    logs.start_time,
    logs."userId" AS user_id,
    logs.level,
    songs.song_id,
    songs.artist_id,
    logs."sessionId" AS session_id,
    logs.location,
    logs."userAgent" AS user_agent,
    CAST(date_part('year', logs.start_ts) AS INT) AS "year",
    CAST(date_part('month', logs.start_ts) AS INT) AS "month"
FROM numbered logs
JOIN {songs_view} songs
    ON songs.artist_name = logs.artist
    AND songs.title = logs.song
    AND {duration_condition}"#,
            key_udf = SONGPLAY_KEY_UDF,
        )
    }
}
