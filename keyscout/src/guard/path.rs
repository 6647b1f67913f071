use std::path::{Component, Path, PathBuf};
use tracing::warn;

use crate::config::EngineConfig;
use crate::errors::{unify_path, PathRejection, SearchResult};

/// Canonical directories that searches may touch. Built once per process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllowedRoots {
    roots: Vec<PathBuf>,
}

impl AllowedRoots {
    /// Canonicalizes each candidate, dropping (with a warning) anything that
    /// does not exist or is not a directory.
    pub fn new<I, P>(candidates: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        let mut roots: Vec<PathBuf> = Vec::new();
        for candidate in candidates {
            let candidate = candidate.as_ref();
            match unify_path(candidate) {
                Ok(canonical) if canonical.is_dir() => {
                    if !roots.contains(&canonical) {
                        roots.push(canonical);
                    }
                }
                Ok(_) => warn!(
                    "Dropping allowed root that is not a directory: {}",
                    candidate.display()
                ),
                Err(e) => warn!(
                    "Dropping allowed root {}: {}",
                    candidate.display(),
                    e
                ),
            }
        }
        Self { roots }
    }

    /// Builds the allow-list from configuration, falling back to the current
    /// working directory when nothing is configured.
    pub fn from_config(config: &EngineConfig) -> SearchResult<Self> {
        if config.allowed_roots.is_empty() {
            let cwd = std::env::current_dir()?;
            return Ok(Self::new([cwd]));
        }
        Ok(Self::new(&config.allowed_roots))
    }

    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    /// True if `canonical` equals or descends from one of the roots.
    /// Comparison is component-wise, so `/srv/ab` is not inside `/srv/a`.
    pub fn contains(&self, canonical: &Path) -> bool {
        self.roots.iter().any(|root| canonical.starts_with(root))
    }
}

/// Validates user-supplied paths against an [`AllowedRoots`] list.
/// Paths are canonicalized before the containment test.
#[derive(Debug, Clone)]
pub struct PathGuard {
    allowed: AllowedRoots,
}

impl PathGuard {
    pub fn new(allowed: AllowedRoots) -> Self {
        Self { allowed }
    }

    pub fn allowed_roots(&self) -> &AllowedRoots {
        &self.allowed
    }

    /// Resolves `raw` to a canonical absolute path and accepts it only if it
    /// lies inside an allowed root. The path does not have to exist.
    pub fn validate(&self, raw: impl AsRef<Path>) -> Result<PathBuf, PathRejection> {
        let raw = raw.as_ref();
        let resolved = match resolve(raw) {
            Some(path) => path,
            None => {
                warn!("Path could not be resolved: {}", raw.display());
                return Err(PathRejection::OutsideAllowedRoots);
            }
        };

        if self.allowed.contains(&resolved) {
            Ok(resolved)
        } else {
            warn!(
                "Path outside allowed roots: {} (resolved to {})",
                raw.display(),
                resolved.display()
            );
            Err(PathRejection::OutsideAllowedRoots)
        }
    }

    /// Like [`validate`](Self::validate) but also requires the path to exist
    /// and be a regular file (`require_file`) or a directory (otherwise).
    pub fn validate_exists(
        &self,
        raw: impl AsRef<Path>,
        require_file: bool,
    ) -> Result<PathBuf, PathRejection> {
        let path = self.validate(raw)?;
        let metadata = std::fs::metadata(&path).map_err(|_| PathRejection::NotFound)?;
        if require_file && !metadata.is_file() {
            return Err(PathRejection::NotAFile);
        }
        if !require_file && !metadata.is_dir() {
            return Err(PathRejection::NotADirectory);
        }
        Ok(path)
    }
}

/// Makes `raw` absolute, canonicalizes its deepest existing ancestor and
/// appends the remaining (nonexistent) components lexically. Nonexistent
/// components cannot be symlinks, so the result is fully resolved.
fn resolve(raw: &Path) -> Option<PathBuf> {
    if raw.as_os_str().is_empty() || raw.to_string_lossy().contains('\0') {
        return None;
    }

    let absolute = if raw.is_absolute() {
        raw.to_path_buf()
    } else {
        std::env::current_dir().ok()?.join(raw)
    };

    let mut existing = absolute.as_path();
    let mut pending: Vec<Component<'_>> = Vec::new();
    let mut base = loop {
        match unify_path(existing) {
            Ok(canonical) => break canonical,
            Err(_) => {
                // Present but unresolvable: dangling symlink or a loop
                if existing.symlink_metadata().is_ok() {
                    return None;
                }
                let name = existing.components().next_back()?;
                pending.push(name);
                existing = existing.parent()?;
            }
        }
    };

    for component in pending.into_iter().rev() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                base.pop();
            }
            Component::Normal(part) => base.push(part),
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    Some(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    fn guard_for(dir: &Path) -> PathGuard {
        PathGuard::new(AllowedRoots::new([dir]))
    }

    #[test]
    fn test_allowed_roots_drops_missing_entries() {
        let dir = tempdir().unwrap();
        let file = dir.path().join("file.txt");
        fs::write(&file, "x").unwrap();

        let roots = AllowedRoots::new([
            dir.path().to_path_buf(),
            dir.path().join("missing"),
            file,
            dir.path().to_path_buf(),
        ]);
        assert_eq!(roots.roots().len(), 1);
        assert_eq!(roots.roots()[0], unify_path(dir.path()).unwrap());
    }

    #[test]
    fn test_accepts_root_and_descendants() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        fs::write(dir.path().join("src/main.py"), "print()").unwrap();
        let guard = guard_for(dir.path());
        let canonical_root = unify_path(dir.path()).unwrap();

        assert_eq!(guard.validate(dir.path()).unwrap(), canonical_root);
        assert_eq!(
            guard.validate(dir.path().join("src/main.py")).unwrap(),
            canonical_root.join("src/main.py")
        );
        // Does not need to exist
        assert_eq!(
            guard.validate(dir.path().join("src/new/file.txt")).unwrap(),
            canonical_root.join("src/new/file.txt")
        );
    }

    #[test]
    fn test_rejects_traversal() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("inner")).unwrap();
        let guard = guard_for(&dir.path().join("inner"));

        let escape = dir.path().join("inner/../../../../etc/passwd");
        assert_eq!(
            guard.validate(&escape),
            Err(PathRejection::OutsideAllowedRoots)
        );
        assert_eq!(
            guard.validate(dir.path().join("inner/missing/../../sibling")),
            Err(PathRejection::OutsideAllowedRoots)
        );
        assert_eq!(
            guard.validate("/etc/passwd"),
            Err(PathRejection::OutsideAllowedRoots)
        );
        assert_eq!(guard.validate(""), Err(PathRejection::OutsideAllowedRoots));
    }

    #[test]
    fn test_rejects_sibling_with_shared_prefix() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        fs::create_dir(dir.path().join("app-secrets")).unwrap();
        let guard = guard_for(&dir.path().join("app"));

        assert!(guard.validate(dir.path().join("app-secrets")).is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_symlink_escape() {
        let allowed = tempdir().unwrap();
        let outside = tempdir().unwrap();
        fs::write(outside.path().join("secret.txt"), "secret").unwrap();
        std::os::unix::fs::symlink(outside.path(), allowed.path().join("link")).unwrap();
        let guard = guard_for(allowed.path());

        assert_eq!(
            guard.validate(allowed.path().join("link/secret.txt")),
            Err(PathRejection::OutsideAllowedRoots)
        );
        assert_eq!(
            guard.validate(allowed.path().join("link")),
            Err(PathRejection::OutsideAllowedRoots)
        );
    }

    #[cfg(unix)]
    #[test]
    fn test_rejects_dangling_symlink() {
        let allowed = tempdir().unwrap();
        std::os::unix::fs::symlink("/nonexistent/target", allowed.path().join("dangling"))
            .unwrap();
        let guard = guard_for(allowed.path());

        assert_eq!(
            guard.validate(allowed.path().join("dangling")),
            Err(PathRejection::OutsideAllowedRoots)
        );
    }

    #[test]
    fn test_validate_exists() {
        let dir = tempdir().unwrap();
        fs::create_dir(dir.path().join("docs")).unwrap();
        fs::write(dir.path().join("notes.md"), "# notes").unwrap();
        let guard = guard_for(dir.path());

        assert!(guard.validate_exists(dir.path().join("docs"), false).is_ok());
        assert!(guard
            .validate_exists(dir.path().join("notes.md"), true)
            .is_ok());
        assert_eq!(
            guard.validate_exists(dir.path().join("nope"), false),
            Err(PathRejection::NotFound)
        );
        assert_eq!(
            guard.validate_exists(dir.path().join("docs"), true),
            Err(PathRejection::NotAFile)
        );
        assert_eq!(
            guard.validate_exists(dir.path().join("notes.md"), false),
            Err(PathRejection::NotADirectory)
        );
        // Containment is checked before existence
        assert_eq!(
            guard.validate_exists("/definitely/not/here", false),
            Err(PathRejection::OutsideAllowedRoots)
        );
    }

    #[test]
    fn test_rejection_message_is_generic() {
        let dir = tempdir().unwrap();
        let guard = guard_for(dir.path());
        let err = guard.validate("/etc/shadow").unwrap_err();
        let message = err.to_string();
        assert!(!message.contains("shadow"));
        assert!(!message.contains(&dir.path().display().to_string()));
    }
}
