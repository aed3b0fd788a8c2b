pub mod migrate;
pub mod stats;
