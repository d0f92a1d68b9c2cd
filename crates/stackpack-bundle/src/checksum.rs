//! SHA-256 helpers and the `checksums.yaml` integrity anchor.

use crate::{BundleError, BundleResult, CHECKSUMS_FILE};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const PREFIX: &str = "sha256:";

/// Compute SHA256 checksum of data.
pub fn compute_sha256(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Compute the SHA256 checksum of a file without loading it into memory.
pub fn sha256_file(path: &Path) -> BundleResult<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let read = file.read(&mut buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Verify SHA256 checksum of data.
pub fn verify_sha256(data: &[u8], expected: &str) -> bool {
    compute_sha256(data) == strip_prefix(expected)
}

/// Accept both "sha256:xxx" and raw "xxx".
pub fn strip_prefix(checksum: &str) -> &str {
    checksum.strip_prefix(PREFIX).unwrap_or(checksum)
}

/// Map of bundle-relative path to `sha256:<hex>`, sorted by path.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checksums(BTreeMap<String, String>);

impl Checksums {
    /// Hash every regular file under `root`, except `checksums.yaml` itself.
    pub fn compute(root: &Path) -> BundleResult<Self> {
        let mut map = BTreeMap::new();
        for relative in list_files(root)? {
            if relative == CHECKSUMS_FILE {
                continue;
            }
            let digest = sha256_file(&root.join(&relative))?;
            map.insert(relative, format!("{PREFIX}{digest}"));
        }
        Ok(Self(map))
    }

    /// Read `checksums.yaml` from a bundle root.
    pub fn read(root: &Path) -> BundleResult<Self> {
        let path = root.join(CHECKSUMS_FILE);
        if !path.is_file() {
            return Err(BundleError::Integrity {
                path: CHECKSUMS_FILE.to_string(),
                expected: "present".to_string(),
                actual: "missing".to_string(),
            });
        }
        let yaml = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&yaml)?)
    }

    /// Write `checksums.yaml` into a bundle root.
    pub fn write(&self, root: &Path) -> BundleResult<()> {
        std::fs::write(root.join(CHECKSUMS_FILE), serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Recorded checksum for a bundle-relative path.
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&str> {
        self.0.get(path).map(String::as_str)
    }

    /// Number of recorded files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over `(path, checksum)` pairs in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Verify a tree against the recorded checksums.
    ///
    /// Every listed file must exist with matching content, and the tree may
    /// not contain files that are not listed.
    pub fn verify_tree(&self, root: &Path) -> BundleResult<()> {
        for (relative, expected) in &self.0 {
            let path = root.join(relative);
            if !path.is_file() {
                return Err(BundleError::Integrity {
                    path: relative.clone(),
                    expected: expected.clone(),
                    actual: "missing".to_string(),
                });
            }
            let actual = sha256_file(&path)?;
            if actual != strip_prefix(expected) {
                return Err(BundleError::Integrity {
                    path: relative.clone(),
                    expected: expected.clone(),
                    actual: format!("{PREFIX}{actual}"),
                });
            }
        }

        for relative in list_files(root)? {
            if relative != CHECKSUMS_FILE && !self.0.contains_key(&relative) {
                return Err(BundleError::Integrity {
                    path: relative,
                    expected: "not present".to_string(),
                    actual: "unlisted file".to_string(),
                });
            }
        }

        tracing::debug!(files = self.0.len(), "bundle checksums verified");
        Ok(())
    }
}

/// Regular files under `root` as sorted `/`-separated relative paths.
pub(crate) fn list_files(root: &Path) -> BundleResult<Vec<String>> {
    let mut files = Vec::new();
    collect(root, "", &mut files)?;
    files.sort();
    Ok(files)
}

fn collect(dir: &Path, prefix: &str, out: &mut Vec<String>) -> BundleResult<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let relative = if prefix.is_empty() {
            name
        } else {
            format!("{prefix}/{name}")
        };
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            collect(&entry.path(), &relative, out)?;
        } else if file_type.is_file() {
            out.push(relative);
        }
    }
    Ok(())
}
