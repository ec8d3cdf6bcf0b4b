#![forbid(unsafe_code)]

pub mod checkpoint;
pub mod profile_store;
pub mod repo;

pub use checkpoint::{
    CheckpointStore, CheckpointStoreError, InMemoryCheckpointStore, JsonFileCheckpointStore,
};
pub use profile_store::{AdProfileStore, StorageError};
pub use repo::AdProfileRepo;
