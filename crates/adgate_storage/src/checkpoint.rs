#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use adgate_contracts::playback::PlaybackCheckpoint;
use adgate_contracts::viewer::ViewerId;
use adgate_contracts::{ContractViolation, Validate};
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum CheckpointStoreError {
    #[error("checkpoint io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("checkpoint file is not valid json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("checkpoint file could not be replaced: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("checkpoint rejected: {0}")]
    Contract(#[from] ContractViolation),
}

/// Local durable storage for playback checkpoints, one slot per viewer.
pub trait CheckpointStore {
    fn load(&self, viewer_id: &ViewerId) -> Result<Option<PlaybackCheckpoint>, CheckpointStoreError>;

    fn save(
        &mut self,
        viewer_id: &ViewerId,
        checkpoint: PlaybackCheckpoint,
    ) -> Result<(), CheckpointStoreError>;

    fn clear(&mut self, viewer_id: &ViewerId) -> Result<(), CheckpointStoreError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryCheckpointStore {
    slots: BTreeMap<ViewerId, PlaybackCheckpoint>,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CheckpointStore for InMemoryCheckpointStore {
    fn load(&self, viewer_id: &ViewerId) -> Result<Option<PlaybackCheckpoint>, CheckpointStoreError> {
        Ok(self.slots.get(viewer_id).copied())
    }

    fn save(
        &mut self,
        viewer_id: &ViewerId,
        checkpoint: PlaybackCheckpoint,
    ) -> Result<(), CheckpointStoreError> {
        checkpoint.validate()?;
        self.slots.insert(viewer_id.clone(), checkpoint);
        Ok(())
    }

    fn clear(&mut self, viewer_id: &ViewerId) -> Result<(), CheckpointStoreError> {
        self.slots.remove(viewer_id);
        Ok(())
    }
}

/// Checkpoints kept in a single JSON document, rewritten atomically
/// (temp file in the same directory, then rename) on every change.
#[derive(Debug)]
pub struct JsonFileCheckpointStore {
    path: PathBuf,
    slots: BTreeMap<ViewerId, PlaybackCheckpoint>,
}

impl JsonFileCheckpointStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CheckpointStoreError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let slots = if path.exists() {
            let raw = fs::read_to_string(&path)?;
            if raw.trim().is_empty() {
                BTreeMap::new()
            } else {
                let slots: BTreeMap<ViewerId, PlaybackCheckpoint> = serde_json::from_str(&raw)?;
                slots
                    .into_iter()
                    .filter(|(viewer_id, checkpoint)| match checkpoint.validate() {
                        Ok(()) => true,
                        Err(err) => {
                            warn!(
                                viewer_id = viewer_id.as_str(),
                                %err,
                                "dropping invalid checkpoint on load"
                            );
                            false
                        }
                    })
                    .collect()
            }
        } else {
            BTreeMap::new()
        };
        debug!(path = %path.display(), slots = slots.len(), "checkpoint file opened");
        Ok(Self { path, slots })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), CheckpointStoreError> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let body = serde_json::to_string_pretty(&self.slots)?;
        let mut temp = tempfile::NamedTempFile::new_in(parent)?;
        temp.write_all(body.as_bytes())?;
        temp.persist(&self.path)?;
        Ok(())
    }
}

impl CheckpointStore for JsonFileCheckpointStore {
    fn load(&self, viewer_id: &ViewerId) -> Result<Option<PlaybackCheckpoint>, CheckpointStoreError> {
        Ok(self.slots.get(viewer_id).copied())
    }

    fn save(
        &mut self,
        viewer_id: &ViewerId,
        checkpoint: PlaybackCheckpoint,
    ) -> Result<(), CheckpointStoreError> {
        checkpoint.validate()?;
        let previous = self.slots.insert(viewer_id.clone(), checkpoint);
        if let Err(err) = self.flush() {
            match previous {
                Some(previous) => self.slots.insert(viewer_id.clone(), previous),
                None => self.slots.remove(viewer_id),
            };
            return Err(err);
        }
        Ok(())
    }

    fn clear(&mut self, viewer_id: &ViewerId) -> Result<(), CheckpointStoreError> {
        if let Some(previous) = self.slots.remove(viewer_id) {
            if let Err(err) = self.flush() {
                self.slots.insert(viewer_id.clone(), previous);
                return Err(err);
            }
        }
        Ok(())
    }
}
