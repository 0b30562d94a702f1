// src/lib.rs
pub mod config;
pub mod errors;
pub mod fetch;
pub mod pipeline;
pub mod process;
pub mod schema;
pub mod snapshot;

pub use errors::{TariffError, TariffResult};
pub use pipeline::Pipeline;
pub use snapshot::{PublishedEntity, Snapshot, SnapshotStore};
