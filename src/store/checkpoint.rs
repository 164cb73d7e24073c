use std::path::PathBuf;

use anyhow::Result;

use crate::store::station::Snapshot;

const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Durable snapshot storage.
///
/// Writes go to a temp file first and are renamed over the previous
/// checkpoint, so a failed or interrupted write never leaves a partial file
/// where the last complete checkpoint used to be.
pub struct Checkpointer {
    path: PathBuf,
    tmp_path: PathBuf,
}

impl Checkpointer {
    pub fn new(data_dir: PathBuf) -> Self {
        Self {
            path: data_dir.join(CHECKPOINT_FILE),
            tmp_path: data_dir.join(format!("{CHECKPOINT_FILE}.tmp")),
        }
    }

    /// Persist a snapshot, atomically replacing the previous checkpoint.
    pub async fn checkpoint(&self, snapshot: &Snapshot) -> Result<()> {
        let json = serde_json::to_vec(snapshot)?;
        tokio::fs::write(&self.tmp_path, &json).await?;
        tokio::fs::rename(&self.tmp_path, &self.path).await?;
        Ok(())
    }

    /// Read the last complete checkpoint. No checkpoint yet is not an error
    /// and yields an empty snapshot; an unreadable or corrupt file is.
    pub async fn load(&self) -> Result<Snapshot> {
        let data = match tokio::fs::read(&self.path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(Snapshot::new());
            }
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_slice(&data)?)
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }
}
