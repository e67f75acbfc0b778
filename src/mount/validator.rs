//! Containment check of requested mount paths against allowed roots.

use super::{AllowedRoots, MountError, MountSpec, normalize_lexically};
use camino::{Utf8Path, Utf8PathBuf};

/// Validates that `requested` lies inside one of `allowed`.
///
/// Returns the lexically canonical path on success.
///
/// # Errors
///
/// Returns [`MountError::EmptySource`] for blank input,
/// [`MountError::RelativeSource`] for relative input, and
/// [`MountError::NotAllowed`] when the canonical path escapes every root.
pub fn validate_mount(allowed: &AllowedRoots, requested: &str) -> Result<Utf8PathBuf, MountError> {
    let trimmed = requested.trim();
    if trimmed.is_empty() {
        return Err(MountError::EmptySource);
    }

    let path = Utf8Path::new(trimmed);
    if !path.is_absolute() {
        return Err(MountError::RelativeSource(trimmed.to_owned()));
    }

    let canonical = normalize_lexically(path);
    if allowed.containing(&canonical).is_none() {
        return Err(MountError::NotAllowed {
            requested: trimmed.to_owned(),
            resolved: canonical.into_string(),
        });
    }

    Ok(canonical)
}

/// Validates every mount, failing on the first rejected entry.
///
/// On success the returned specs carry canonical source paths. Nothing is
/// returned for a partially valid list.
///
/// # Errors
///
/// Returns the first [`MountError`] encountered.
pub fn validate_mounts(
    allowed: &AllowedRoots,
    mounts: &[MountSpec],
) -> Result<Vec<MountSpec>, MountError> {
    mounts
        .iter()
        .map(|mount| {
            mount.check_shape()?;
            let canonical = validate_mount(allowed, mount.source().as_str())?;
            Ok(mount.clone().with_source(canonical))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};

    #[fixture]
    fn home_only() -> AllowedRoots {
        AllowedRoots::new(["/home/"]).expect("valid roots")
    }

    #[rstest]
    #[case("/home/user/proj", true)]
    #[case("/home/", true)]
    #[case("/home/user/./proj/../other", true)]
    #[case("/etc/passwd", false)]
    #[case("/home/../etc/passwd", false)]
    #[case("/home/user/../../etc", false)]
    #[case("/homework/notes", false)]
    fn containment_matrix(home_only: AllowedRoots, #[case] requested: &str, #[case] allowed: bool) {
        assert_eq!(validate_mount(&home_only, requested).is_ok(), allowed);
    }

    #[rstest]
    fn returns_canonical_path(home_only: AllowedRoots) {
        let canonical =
            validate_mount(&home_only, "/home/alice/./src/../proj").expect("mount should pass");

        assert_eq!(canonical, "/home/alice/proj");
    }

    #[rstest]
    fn relative_request_is_rejected(home_only: AllowedRoots) {
        let result = validate_mount(&home_only, "home/alice");

        assert_eq!(
            result,
            Err(MountError::RelativeSource("home/alice".to_owned()))
        );
    }

    #[rstest]
    fn escape_reports_resolved_path(home_only: AllowedRoots) {
        let result = validate_mount(&home_only, "/home/../etc/passwd");

        assert_eq!(
            result,
            Err(MountError::NotAllowed {
                requested: "/home/../etc/passwd".to_owned(),
                resolved: "/etc/passwd".to_owned(),
            })
        );
    }

    #[test]
    fn any_of_several_roots_is_accepted() {
        let roots = AllowedRoots::new(["/home/", "/srv/projects/"]).expect("valid roots");

        assert!(validate_mount(&roots, "/srv/projects/api").is_ok());
        assert!(validate_mount(&roots, "/srv/other").is_err());
    }

    #[rstest]
    fn list_validation_is_all_or_nothing(home_only: AllowedRoots) {
        let mounts = vec![
            MountSpec::new("/home/alice/proj", "/workspace", false).expect("valid spec"),
            MountSpec::new("/etc", "/config", true).expect("valid spec"),
        ];

        let result = validate_mounts(&home_only, &mounts);

        assert!(matches!(result, Err(MountError::NotAllowed { .. })));
    }

    #[rstest]
    fn list_validation_canonicalizes_sources(home_only: AllowedRoots) {
        let mounts =
            vec![MountSpec::new("/home/alice/x/../proj", "/workspace", false).expect("valid spec")];

        let validated = validate_mounts(&home_only, &mounts).expect("mounts should pass");

        let first = validated.first().expect("one mount");
        assert_eq!(first.source(), "/home/alice/proj");
    }
}
