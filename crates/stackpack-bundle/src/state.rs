//! Per-workspace record of successful imports.
//!
//! Stored at `<workspace>/.stackpack/state.yaml` as a map from
//! `kind:dest` to the payload checksum that was last installed there.

use crate::manifest::ArtifactEntry;
use crate::{BundleResult, STATE_DIR, STATE_FILE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstallState {
    #[serde(default)]
    artifacts: BTreeMap<String, String>,
}

impl InstallState {
    /// State file location for a workspace.
    pub fn path(workspace: &Path) -> PathBuf {
        workspace.join(STATE_DIR).join(STATE_FILE)
    }

    /// Load the state of a workspace.
    ///
    /// A missing or unreadable file yields an empty state, which only costs
    /// a re-import.
    pub fn load(workspace: &Path) -> Self {
        let path = Self::path(workspace);
        let Ok(yaml) = std::fs::read_to_string(&path) else {
            return Self::default();
        };
        match serde_yaml::from_str(&yaml) {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unreadable install state");
                Self::default()
            }
        }
    }

    /// Persist atomically (write to a temp file, then rename).
    pub fn save(&self, workspace: &Path) -> BundleResult<()> {
        let path = Self::path(workspace);
        let dir = workspace.join(STATE_DIR);
        std::fs::create_dir_all(&dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(&dir)?;
        tmp.write_all(serde_yaml::to_string(self)?.as_bytes())?;
        tmp.persist(&path).map_err(|e| e.error)?;
        Ok(())
    }

    fn key(entry: &ArtifactEntry) -> String {
        format!("{}:{}", entry.kind, entry.dest)
    }

    /// Checksum recorded for an entry, if any.
    pub fn recorded(&self, entry: &ArtifactEntry) -> Option<&str> {
        self.artifacts.get(&Self::key(entry)).map(String::as_str)
    }

    pub fn record(&mut self, entry: &ArtifactEntry, sha256: &str) {
        self.artifacts.insert(Self::key(entry), sha256.to_string());
    }

    pub fn forget(&mut self, entry: &ArtifactEntry) {
        self.artifacts.remove(&Self::key(entry));
    }
}
