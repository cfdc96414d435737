use crate::schema::{ARTISTS_COLUMNS, SONG_LOOKUP_COLUMNS, SONGS_COLUMNS, get_song_catalog_schema};
use crate::storage::{ListOptions, StorageLocation, list_files};
use crate::utils::paths::{SONG_DATA_GLOB, SONG_DATA_PATTERN, glob_prefix};
use common::{Error, Result};
use datafusion::prelude::*;
use std::sync::Arc;
use tracing::info;

/// Builds the catalog-side dimensions from the raw song catalog.
pub struct CatalogTransformer {
    ctx: Arc<SessionContext>,
}

impl CatalogTransformer {
    pub fn new(ctx: Arc<SessionContext>) -> Self {
        Self { ctx }
    }

    /// Reads every `song_data/*/*/*/*.json` file below the input root with the
    /// catalog schema enforced. A value that does not fit its column fails the read.
    pub async fn load_catalog(&self, input: &StorageLocation) -> Result<DataFrame> {
        let files = list_files(
            input,
            ListOptions {
                prefix: Some(glob_prefix(SONG_DATA_GLOB).to_string()),
                pattern: Some(SONG_DATA_PATTERN.clone()),
                ..Default::default()
            },
        )
        .await?;

        if files.is_empty() {
            return Err(Error::NoInputFiles {
                root: input.root_url().to_string(),
                pattern: SONG_DATA_GLOB.to_string(),
            });
        }

        info!(files = files.len(), "Loading song catalog");
        let schema = get_song_catalog_schema();
        let df = self
            .ctx
            .read_json(files, NdJsonReadOptions::default().schema(schema.as_ref()))
            .await?;

        Ok(df)
    }

    pub fn songs(&self, catalog: &DataFrame) -> Result<DataFrame> {
        Ok(catalog.clone().select_columns(SONGS_COLUMNS)?.distinct()?)
    }

    pub fn artists(&self, catalog: &DataFrame) -> Result<DataFrame> {
        Ok(catalog.clone().select_columns(ARTISTS_COLUMNS)?.distinct()?)
    }

    /// The denormalized join input derived from the persisted catalog passthrough.
    pub fn song_lookup(&self, songs_data: DataFrame) -> Result<DataFrame> {
        Ok(songs_data.select_columns(SONG_LOOKUP_COLUMNS)?.distinct()?)
    }
}
