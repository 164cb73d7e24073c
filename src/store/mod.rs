pub mod checkpoint;
pub mod station;

pub use checkpoint::Checkpointer;
pub use station::{PersistedRecord, Snapshot, StationStore, UpsertOutcome};
