//! Mount request value object.

use super::MountError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

/// A host directory a client wants bound into its service containers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountSpec {
    source: Utf8PathBuf,
    target: Utf8PathBuf,
    #[serde(default)]
    read_only: bool,
}

impl MountSpec {
    /// Creates a mount request.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::EmptySource`] when the source is blank and
    /// [`MountError::RelativeTarget`] when the container target is not
    /// absolute. Source containment is checked separately by
    /// [`super::validate_mount`].
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        read_only: bool,
    ) -> Result<Self, MountError> {
        let spec = Self {
            source: Utf8PathBuf::from(source.into().trim()),
            target: Utf8PathBuf::from(target.into().trim()),
            read_only,
        };
        spec.check_shape()?;
        Ok(spec)
    }

    /// Returns the requested host path.
    #[must_use]
    pub fn source(&self) -> &Utf8Path {
        &self.source
    }

    /// Returns the path inside the container.
    #[must_use]
    pub fn target(&self) -> &Utf8Path {
        &self.target
    }

    /// Returns whether the mount is read-only.
    #[must_use]
    pub const fn read_only(&self) -> bool {
        self.read_only
    }

    /// Returns a copy with the source replaced by its canonical form.
    #[must_use]
    pub fn with_source(mut self, source: Utf8PathBuf) -> Self {
        self.source = source;
        self
    }

    /// Checks the structural rules that do not depend on the allow-list.
    ///
    /// Deserialised requests skip [`MountSpec::new`], so validation calls this
    /// again before the containment check.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::EmptySource`] or [`MountError::RelativeTarget`].
    pub fn check_shape(&self) -> Result<(), MountError> {
        if self.source.as_str().trim().is_empty() {
            return Err(MountError::EmptySource);
        }

        if !self.target.is_absolute() {
            return Err(MountError::RelativeTarget(self.target.to_string()));
        }

        Ok(())
    }
}
