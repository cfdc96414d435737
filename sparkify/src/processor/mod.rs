pub mod activity;
pub mod catalog;
mod core;
pub mod songplays;
pub mod types;
mod udf;
pub mod writer;

#[cfg(test)]
pub(crate) mod test_support;

pub use activity::ActivityTransformer;
pub use catalog::CatalogTransformer;
pub use self::core::SparkifyProcessor;
pub use songplays::SongplayReconciler;
pub use types::{CatalogCheckpoint, DurationMatch, RunManifest, TableMarker};
pub use udf::{SONGPLAY_KEY_UDF, register_udfs, sha256_hex};
pub use writer::{MANIFEST_FILE, MARKER_FILE, TableWriter};
