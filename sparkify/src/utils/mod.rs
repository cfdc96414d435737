pub mod arrow;
pub mod paths;
