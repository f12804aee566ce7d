//! 已完成区块高度落盘

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::SinkError;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Snapshot {
    finished_block: u64,
}

/// A JSON file holding the last committed height. Writes go through a
/// sibling temp file and a rename, so a crash leaves the old value intact.
#[derive(Debug, Clone)]
pub struct WatermarkFile {
    path: PathBuf,
    tmp: PathBuf,
}

impl WatermarkFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let mut tmp = path.clone().into_os_string();
        tmp.push(".tmp");
        Self { path, tmp: PathBuf::from(tmp) }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 0 when the file does not exist yet.
    pub fn load(&self) -> Result<u64, SinkError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(SinkError::Store(format!("read {}: {e}", self.path.display()))),
        };
        let snapshot: Snapshot = serde_json::from_str(&raw)
            .map_err(|e| SinkError::Rejected(format!("parse {}: {e}", self.path.display())))?;
        Ok(snapshot.finished_block)
    }

    pub fn save(&self, height: u64) -> Result<(), SinkError> {
        let json = serde_json::to_string(&Snapshot { finished_block: height })
            .map_err(|e| SinkError::Rejected(e.to_string()))?;
        std::fs::write(&self.tmp, json).map_err(|e| SinkError::Store(format!("write {}: {e}", self.tmp.display())))?;
        std::fs::rename(&self.tmp, &self.path)
            .map_err(|e| SinkError::Store(format!("rename to {}: {e}", self.path.display())))
    }
}

#[cfg(test)]
pub(crate) fn scratch_path(name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("evm-dex-indexer-{}-{name}.json", std::process::id()))
}
