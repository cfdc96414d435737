//! Fixtures shared by the processor unit tests.

use crate::storage::StorageLocation;
use crate::utils::arrow::batches_to_json;
use arrow::datatypes::DataType;
use datafusion::prelude::*;
use object_store::local::LocalFileSystem;
use serde_json::{Value, json};
use std::path::Path;
use std::sync::Arc;
use url::Url;

pub fn local_location(path: &Path) -> StorageLocation {
    let url = Url::from_directory_path(path).unwrap();
    StorageLocation::new(url, Arc::new(LocalFileSystem::new())).unwrap()
}

pub fn song_record(
    song_id: &str,
    title: &str,
    artist_id: &str,
    artist_name: &str,
    duration: f64,
    year: i32,
) -> Value {
    json!({
        "num_songs": 1,
        "artist_id": artist_id,
        "artist_latitude": null,
        "artist_longitude": null,
        "artist_location": "",
        "artist_name": artist_name,
        "song_id": song_id,
        "title": title,
        "duration": duration,
        "year": year
    })
}

pub fn next_song(artist: &str, song: &str, length: f64, ts: i64, user_id: &str) -> Value {
    json!({
        "artist": artist,
        "auth": "Logged In",
        "firstName": "Test",
        "gender": "M",
        "itemInSession": 0,
        "lastName": "User",
        "length": length,
        "level": "free",
        "location": "Somewhere, CA",
        "method": "PUT",
        "page": "NextSong",
        "registration": 1540919166796.0,
        "sessionId": 38,
        "song": song,
        "status": 200,
        "ts": ts,
        "userAgent": "Mozilla/5.0",
        "userId": user_id
    })
}

pub fn write_song(root: &Path, dir: &str, file: &str, record: &Value) {
    let dir = root.join(dir);
    std::fs::create_dir_all(&dir).unwrap();
    std::fs::write(dir.join(file), record.to_string()).unwrap();
}

pub fn write_log(root: &Path, file: &str, records: &[Value]) {
    let dir = root.join("log_data");
    std::fs::create_dir_all(&dir).unwrap();
    let lines: Vec<String> = records.iter().map(Value::to_string).collect();
    std::fs::write(dir.join(file), lines.join("\n")).unwrap();
}

/// Reads a written table back, partition columns included as text.
pub async fn read_table(ctx: &SessionContext, table_url: &str, partition_by: &[&str]) -> Vec<Value> {
    let options = ParquetReadOptions::default().table_partition_cols(
        partition_by
            .iter()
            .map(|c| (c.to_string(), DataType::Utf8))
            .collect(),
    );
    let df = ctx.read_parquet(table_url, options).await.unwrap();
    batches_to_json(&df.collect().await.unwrap()).unwrap()
}
