//! Error types for mount allow-list construction and validation.

use thiserror::Error;

/// Errors returned while building allow-lists or validating mount requests.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MountError {
    /// No allowed mount roots were configured.
    #[error("at least one allowed mount root is required")]
    EmptyAllowList,

    /// An allowed root is not an absolute path.
    #[error("allowed mount root '{0}' must be an absolute path")]
    RelativeRoot(String),

    /// The requested source path is empty after trimming.
    #[error("mount source must not be empty")]
    EmptySource,

    /// The requested source path is not absolute.
    #[error("mount source '{0}' must be an absolute path")]
    RelativeSource(String),

    /// The requested container target path is not absolute.
    #[error("mount target '{0}' must be an absolute path")]
    RelativeTarget(String),

    /// The requested path falls outside every allowed root.
    #[error("mount source '{requested}' resolves to '{resolved}', which is outside the allowed roots")]
    NotAllowed {
        /// Path as supplied by the client.
        requested: String,
        /// Lexically canonical form of the path.
        resolved: String,
    },
}
