//! Error types for pack and install runs.

use crate::ArtifactKind;
use thiserror::Error;

/// Errors that can occur while packing or installing a bundle.
#[derive(Debug, Error)]
pub enum BundleError {
    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML parsing or serialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Tool configuration could not be read.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// HTTP transport error while fetching a remote artifact.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Manifest is malformed or inconsistent.
    #[error("Invalid manifest at {field}: {message}")]
    Validation { field: String, message: String },

    /// Manifest references a kind whose handler is not implemented.
    #[error("Unsupported artifact kind '{kind}' at {field}: {reason}")]
    UnsupportedKind {
        field: String,
        kind: ArtifactKind,
        reason: String,
    },

    /// Archive holds an entry that cannot be written or extracted in place.
    #[error("Unsafe archive entry {path}: {reason}")]
    UnsafeEntry { path: String, reason: String },

    /// Declared artifact source could not be produced at pack time.
    #[error("Artifact not found ({kind} -> {entry}): {reason}")]
    ArtifactNotFound {
        kind: ArtifactKind,
        entry: String,
        reason: String,
    },

    /// Bundle content does not match its recorded checksum.
    #[error("Integrity check failed for {path}: expected {expected}, got {actual}")]
    Integrity {
        path: String,
        expected: String,
        actual: String,
    },

    /// A declared artifact has no payload inside the bundle.
    #[error("Missing payload for {kind} -> {entry}: {path}")]
    MissingPayload {
        kind: ArtifactKind,
        entry: String,
        path: String,
    },

    /// Importing an artifact into the workspace failed.
    #[error("Import failed ({kind} -> {entry}): {message}")]
    Import {
        kind: ArtifactKind,
        entry: String,
        message: String,
    },

    /// External command exited unsuccessfully.
    #[error("Command `{command}` failed with {}: {stderr}", describe_exit(.code))]
    ExternalAction {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    /// Another run holds the workspace.
    #[error("Workspace is in use by another run (lock file {0})")]
    WorkspaceBusy(String),

    /// Operator interrupted the run.
    #[error("Operation cancelled")]
    Cancelled,
}

impl BundleError {
    /// Shorthand for an unsafe archive entry.
    pub fn unsafe_entry(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Self::UnsafeEntry {
            path: path.display().to_string(),
            reason: reason.into(),
        }
    }

    /// Shorthand for a validation error at a manifest field path.
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    /// True for errors raised before any persistent state is touched.
    #[must_use]
    pub fn is_fail_closed(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. }
                | Self::UnsupportedKind { .. }
                | Self::Integrity { .. }
                | Self::UnsafeEntry { .. }
                | Self::MissingPayload { .. }
                | Self::WorkspaceBusy(_)
        )
    }
}

fn describe_exit(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "signal".to_string(),
    }
}

#[cfg(test)]
mod tests {
    #![allow(non_snake_case)]

    use super::*;
    use test_case::test_case;

    #[test]
    fn BundleError___io___displays_message() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: BundleError = io_err.into();

        assert!(err.to_string().contains("I/O error"));
        assert!(matches!(err, BundleError::Io(_)));
    }

    #[test]
    fn BundleError___validation___includes_field_path() {
        let err = BundleError::validation("artifacts[2].dest", "must be relative");

        assert_eq!(
            err.to_string(),
            "Invalid manifest at artifacts[2].dest: must be relative"
        );
    }

    #[test]
    fn BundleError___integrity___displays_all_fields() {
        let err = BundleError::Integrity {
            path: "cache/cache.tar.gz".to_string(),
            expected: "sha256:expected".to_string(),
            actual: "sha256:actual".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("cache/cache.tar.gz"));
        assert!(msg.contains("sha256:expected"));
        assert!(msg.contains("sha256:actual"));
    }

    #[test]
    fn BundleError___unsupported_kind___names_kind_and_field() {
        let err = BundleError::UnsupportedKind {
            field: "artifacts[0].kind".to_string(),
            kind: ArtifactKind::HdMap,
            reason: "not implemented".to_string(),
        };

        let msg = err.to_string();
        assert!(msg.contains("hd_map"));
        assert!(msg.contains("artifacts[0].kind"));
    }

    #[test]
    fn BundleError___external_action___formats_exit_code_or_signal() {
        let exited = BundleError::ExternalAction {
            command: "docker pull x".to_string(),
            code: Some(1),
            stderr: "denied".to_string(),
        };
        let killed = BundleError::ExternalAction {
            command: "docker pull x".to_string(),
            code: None,
            stderr: String::new(),
        };

        assert!(exited.to_string().contains("exit code 1"));
        assert!(killed.to_string().contains("signal"));
    }

    #[test_case(BundleError::validation("project", "empty"), true ; "validation")]
    #[test_case(BundleError::WorkspaceBusy("lock".into()), true ; "workspace busy")]
    #[test_case(
        BundleError::Integrity { path: "a".into(), expected: "b".into(), actual: "c".into() },
        true ; "integrity"
    )]
    #[test_case(
        BundleError::UnsafeEntry { path: "../x".into(), reason: "path contains '..'".into() },
        true ; "unsafe entry"
    )]
    #[test_case(BundleError::Cancelled, false ; "cancelled")]
    #[test_case(
        BundleError::Import { kind: ArtifactKind::Cache, entry: "cache".into(), message: "x".into() },
        false ; "import"
    )]
    fn BundleError___is_fail_closed___classifies_variant(err: BundleError, expected: bool) {
        assert_eq!(err.is_fail_closed(), expected);
    }
}
