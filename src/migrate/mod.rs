pub mod archive;
pub mod orchestrator;
pub mod report;

pub use orchestrator::Migrator;
pub use report::{MigrationReport, RunStatus, SourceOutcome, SourceReport};
