use common::{Error, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;

/// Catalog files: one JSON object per file, nested four directories deep.
pub const SONG_DATA_GLOB: &str = "song_data/*/*/*/*.json";

/// Activity logs: newline-delimited JSON, one directory level.
pub const LOG_DATA_GLOB: &str = "log_data/*.json";

pub static SONG_DATA_PATTERN: Lazy<Regex> =
    Lazy::new(|| glob_to_regex(SONG_DATA_GLOB).expect("Invalid song data glob"));

pub static LOG_DATA_PATTERN: Lazy<Regex> =
    Lazy::new(|| glob_to_regex(LOG_DATA_GLOB).expect("Invalid log data glob"));

static PARTITION_SEGMENT_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<key>[A-Za-z_][A-Za-z0-9_]*)=(?P<value>[^/]*)$")
        .expect("Invalid partition segment regex")
});

/// Translates a key glob into an anchored regex. `*` matches within a single
/// path segment; every other character is literal.
pub fn glob_to_regex(glob: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    for ch in glob.chars() {
        match ch {
            '*' => pattern.push_str("[^/]*"),
            '?' => pattern.push_str("[^/]"),
            other => pattern.push_str(&regex::escape(&other.to_string())),
        }
    }
    pattern.push('$');

    Regex::new(&pattern)
        .map_err(|e| Error::InvalidInput(format!("Invalid glob '{}': {}", glob, e)))
}

/// The literal directory part of a glob, used as the listing prefix.
pub fn glob_prefix(glob: &str) -> &str {
    let wildcard = glob.find(['*', '?']).unwrap_or(glob.len());
    match glob[..wildcard].rfind('/') {
        Some(idx) => &glob[..=idx],
        None => "",
    }
}

/// Hive-style `key=value` directory segments of a key, in path order.
///
/// `songs_table/year=2000/artist_id=A1/part-0.parquet` yields
/// `{"artist_id": "A1", "year": "2000"}`.
pub fn parse_partition_components(key: &str) -> BTreeMap<String, String> {
    let mut segments: Vec<&str> = key.split('/').filter(|s| !s.is_empty()).collect();
    // Last segment is the file name.
    segments.pop();

    segments
        .into_iter()
        .filter_map(|segment| {
            let caps = PARTITION_SEGMENT_REGEX.captures(segment)?;
            Some((
                caps.name("key")?.as_str().to_string(),
                caps.name("value")?.as_str().to_string(),
            ))
        })
        .collect()
}

/// The partition directory of a data file, e.g. `year=2018/month=11`.
/// Files written without partitioning yield an empty string.
pub fn partition_directory(key: &str, partition_by: &[&str]) -> String {
    let components = parse_partition_components(key);
    partition_by
        .iter()
        .filter_map(|column| {
            components
                .get(*column)
                .map(|value| format!("{}={}", column, value))
        })
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_song_data_pattern_depth() {
        assert!(SONG_DATA_PATTERN.is_match("song_data/A/B/C/TRABCEI128F424C983.json"));
        assert!(!SONG_DATA_PATTERN.is_match("song_data/A/B/TRABCEI128F424C983.json"));
        assert!(!SONG_DATA_PATTERN.is_match("song_data/A/B/C/D/TRABCEI128F424C983.json"));
        assert!(!SONG_DATA_PATTERN.is_match("song_data/A/B/C/TRABCEI128F424C983.jsonl"));
    }

    #[test]
    fn test_log_data_pattern() {
        assert!(LOG_DATA_PATTERN.is_match("log_data/2018-11-01-events.json"));
        assert!(!LOG_DATA_PATTERN.is_match("log_data/2018/11/2018-11-01-events.json"));
        assert!(!LOG_DATA_PATTERN.is_match("song_data/2018-11-01-events.json"));
    }

    #[test]
    fn test_glob_escapes_literals() {
        let re = glob_to_regex("a.b/*.json").unwrap();
        assert!(re.is_match("a.b/x.json"));
        assert!(!re.is_match("aXb/x.json"));
    }

    #[test]
    fn test_glob_prefix() {
        assert_eq!(glob_prefix(SONG_DATA_GLOB), "song_data/");
        assert_eq!(glob_prefix(LOG_DATA_GLOB), "log_data/");
        assert_eq!(glob_prefix("*.json"), "");
    }

    #[test]
    fn test_parse_partition_components() {
        let parts = parse_partition_components("songs_table/year=2000/artist_id=A1/part-0.parquet");
        assert_eq!(parts.get("year").map(String::as_str), Some("2000"));
        assert_eq!(parts.get("artist_id").map(String::as_str), Some("A1"));
        assert_eq!(parts.len(), 2);

        assert!(parse_partition_components("users_table/part-0.parquet").is_empty());
    }

    #[test]
    fn test_partition_directory_order_follows_partition_by() {
        let key = "time_table/year=2018/month=11/part-0.parquet";
        assert_eq!(partition_directory(key, &["year", "month"]), "year=2018/month=11");
        assert_eq!(partition_directory("users_table/part-0.parquet", &[]), "");
    }
}
