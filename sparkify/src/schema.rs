use arrow::datatypes::{DataType, Field, Schema, SchemaRef};
use lazy_static::lazy_static;
use std::sync::Arc;

/// Value of `page` that marks a playback event.
pub const NEXT_SONG_PAGE: &str = "NextSong";

// Raw source schemas
pub fn song_catalog_schema() -> Schema {
    Schema::new(vec![
        Field::new("num_songs", DataType::Int32, true),
        Field::new("artist_id", DataType::Utf8, true),
        Field::new("artist_latitude", DataType::Float64, true),
        Field::new("artist_longitude", DataType::Float64, true),
        Field::new("artist_location", DataType::Utf8, true),
        Field::new("artist_name", DataType::Utf8, true),
        Field::new("song_id", DataType::Utf8, true),
        Field::new("title", DataType::Utf8, true),
        Field::new("duration", DataType::Float64, true),
        Field::new("year", DataType::Int32, true),
    ])
}

/// One column of the activity log contract.
#[derive(Debug, Clone)]
pub struct ContractColumn {
    pub name: &'static str,
    pub data_type: DataType,
    pub required: bool,
}

impl ContractColumn {
    const fn new(name: &'static str, data_type: DataType, required: bool) -> Self {
        Self {
            name,
            data_type,
            required,
        }
    }
}

/// The activity log is read with schema inference and then normalized to these
/// columns. Optional columns missing from the input are filled with typed nulls.
pub fn activity_contract() -> Vec<ContractColumn> {
    vec![
        ContractColumn::new("page", DataType::Utf8, true),
        ContractColumn::new("ts", DataType::Int64, true),
        ContractColumn::new("userId", DataType::Utf8, false),
        ContractColumn::new("firstName", DataType::Utf8, false),
        ContractColumn::new("lastName", DataType::Utf8, false),
        ContractColumn::new("gender", DataType::Utf8, false),
        ContractColumn::new("level", DataType::Utf8, false),
        ContractColumn::new("sessionId", DataType::Int64, false),
        ContractColumn::new("location", DataType::Utf8, false),
        ContractColumn::new("userAgent", DataType::Utf8, false),
        ContractColumn::new("artist", DataType::Utf8, false),
        ContractColumn::new("song", DataType::Utf8, false),
        ContractColumn::new("length", DataType::Float64, false),
    ]
}

pub fn get_song_catalog_schema() -> SchemaRef {
    SONG_CATALOG_SCHEMA.clone()
}

pub fn get_activity_contract() -> &'static [ContractColumn] {
    &ACTIVITY_CONTRACT
}

// Lazy-loaded static schemas
lazy_static! {
    static ref SONG_CATALOG_SCHEMA: SchemaRef = Arc::new(song_catalog_schema());
    static ref ACTIVITY_CONTRACT: Vec<ContractColumn> = activity_contract();
}

pub const SONGS_COLUMNS: &[&str] = &["song_id", "title", "artist_id", "year", "duration"];

pub const ARTISTS_COLUMNS: &[&str] = &[
    "artist_id",
    "artist_name",
    "artist_location",
    "artist_latitude",
    "artist_longitude",
];

pub const SONG_LOOKUP_COLUMNS: &[&str] = &["song_id", "title", "artist_id", "duration", "artist_name"];

pub const USERS_COLUMNS: &[&str] = &["userId", "firstName", "lastName", "gender", "level"];

pub const TIME_COLUMNS: &[&str] = &[
    "start_time",
    "hour",
    "day",
    "week",
    "month",
    "year",
    "weekday",
];

pub const SONGPLAYS_COLUMNS: &[&str] = &[
    "songplay_id",
    "songplay_key",
    "start_time",
    "user_id",
    "level",
    "song_id",
    "artist_id",
    "session_id",
    "location",
    "user_agent",
    "year",
    "month",
];

// All output tables of the star schema
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StarTable {
    Songs,
    Artists,
    SongsData,
    Users,
    Time,
    Songplays,
}

impl StarTable {
    pub const ALL: [StarTable; 6] = [
        Self::Songs,
        Self::Artists,
        Self::SongsData,
        Self::Users,
        Self::Time,
        Self::Songplays,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Songs => "songs_table",
            Self::Artists => "artists_table",
            Self::SongsData => "songs_data_table",
            Self::Users => "users_table",
            Self::Time => "time_table",
            Self::Songplays => "songplays_table",
        }
    }

    pub fn partition_by(&self) -> &'static [&'static str] {
        match self {
            Self::Songs => &["year", "artist_id"],
            Self::Time | Self::Songplays => &["year", "month"],
            Self::Artists | Self::SongsData | Self::Users => &[],
        }
    }
}

impl std::fmt::Display for StarTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
