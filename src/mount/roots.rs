//! Allowed mount roots and lexical path normalisation.

use super::MountError;
use camino::{Utf8Component, Utf8Path, Utf8PathBuf};
use std::fmt;

/// Resolves `.` and `..` segments without touching the filesystem.
///
/// `..` at the root stays at the root, matching how the kernel resolves
/// `/../etc`. Symbolic links are not followed.
#[must_use]
pub fn normalize_lexically(path: &Utf8Path) -> Utf8PathBuf {
    let mut normalized = Utf8PathBuf::new();
    for component in path.components() {
        match component {
            Utf8Component::Prefix(_) | Utf8Component::RootDir | Utf8Component::Normal(_) => {
                normalized.push(component.as_str());
            }
            Utf8Component::CurDir => {}
            Utf8Component::ParentDir => {
                let at_root = normalized.parent().is_none();
                if !at_root {
                    normalized.pop();
                }
            }
        }
    }
    normalized
}

/// Non-empty set of absolute directories that client mounts must stay within.
///
/// Roots are normalised lexically and rendered with a trailing separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedRoots {
    roots: Vec<Utf8PathBuf>,
}

impl AllowedRoots {
    /// Builds an allow-list from configured root paths.
    ///
    /// # Errors
    ///
    /// Returns [`MountError::EmptyAllowList`] when no roots are supplied and
    /// [`MountError::RelativeRoot`] when any root is not absolute.
    pub fn new<I, S>(roots: I) -> Result<Self, MountError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut normalized_roots = Vec::new();
        for root in roots {
            let trimmed = root.as_ref().trim();
            let path = Utf8Path::new(trimmed);
            if !path.is_absolute() {
                return Err(MountError::RelativeRoot(trimmed.to_owned()));
            }

            let normalized = normalize_lexically(path);
            if !normalized_roots.contains(&normalized) {
                normalized_roots.push(normalized);
            }
        }

        if normalized_roots.is_empty() {
            return Err(MountError::EmptyAllowList);
        }

        Ok(Self {
            roots: normalized_roots,
        })
    }

    /// Returns the normalised root paths.
    #[must_use]
    pub fn paths(&self) -> &[Utf8PathBuf] {
        &self.roots
    }

    /// Returns the roots rendered with a trailing separator.
    #[must_use]
    pub fn display_roots(&self) -> Vec<String> {
        self.roots.iter().map(|root| with_separator(root)).collect()
    }

    /// Returns the first root containing `canonical`, if any.
    #[must_use]
    pub fn containing(&self, canonical: &Utf8Path) -> Option<&Utf8Path> {
        self.roots
            .iter()
            .map(Utf8PathBuf::as_path)
            .find(|root| canonical.strip_prefix(root).is_ok())
    }
}

impl fmt::Display for AllowedRoots {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(&self.display_roots().join(", "))
    }
}

fn with_separator(path: &Utf8Path) -> String {
    let rendered = path.as_str();
    if rendered.ends_with(std::path::MAIN_SEPARATOR) {
        rendered.to_owned()
    } else {
        format!("{rendered}{}", std::path::MAIN_SEPARATOR)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("/home/user/proj", "/home/user/proj")]
    #[case("/home/./user//proj/", "/home/user/proj")]
    #[case("/home/user/../alice", "/home/alice")]
    #[case("/home/../etc/passwd", "/etc/passwd")]
    #[case("/../../etc", "/etc")]
    #[case("/", "/")]
    fn normalizes_dot_segments(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(normalize_lexically(Utf8Path::new(input)), expected);
    }

    #[test]
    fn roots_render_with_trailing_separator() {
        let roots = AllowedRoots::new(["/home", "/srv/data/"]).expect("valid roots");

        assert_eq!(roots.display_roots(), vec!["/home/", "/srv/data/"]);
    }

    #[test]
    fn duplicate_roots_collapse() {
        let roots = AllowedRoots::new(["/home/", "/home", "/home/./"]).expect("valid roots");

        assert_eq!(roots.paths().len(), 1);
    }

    #[test]
    fn empty_allow_list_is_rejected() {
        let result = AllowedRoots::new(Vec::<String>::new());

        assert_eq!(result, Err(MountError::EmptyAllowList));
    }

    #[test]
    fn relative_root_is_rejected() {
        let result = AllowedRoots::new(["/home/", "workspace/"]);

        assert_eq!(
            result,
            Err(MountError::RelativeRoot("workspace/".to_owned()))
        );
    }
}
