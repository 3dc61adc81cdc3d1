//! Cache directory path management
//!
//! ```text
//! ~/.cache/repocache/
//! ├── repositories/
//! │   └── <name>-<digest>/          # Mirror clone, one per specifier
//! └── locks/
//!     └── <name>-<digest>.lock      # flock-based locking
//! ```
//!
//! `<name>` is the last component of the specifier's location and `<digest>`
//! the first 16 hex digits of the SHA-256 of its normalized form, so
//! specifiers that compare equal share a directory and different hosts
//! serving a same-named repository do not collide.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::config::default_cache_root;
use crate::types::{Specifier, absolute_path};

const DIGEST_LEN: usize = 16;

/// Manages all filesystem paths for the cache directory layout
#[derive(Debug, Clone)]
pub struct CachePaths {
    root: PathBuf,
}

impl CachePaths {
    /// A relative `root` is resolved against the current directory once, here.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            root: absolute_path(&root).unwrap_or(root),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `{root}/repositories`
    pub fn repositories_dir(&self) -> PathBuf {
        self.root.join("repositories")
    }

    /// `{root}/locks`
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Stable directory name for `specifier`.
    pub fn key(specifier: &Specifier) -> String {
        let digest = Sha256::digest(specifier.normalized().as_bytes());
        let digest = hex::encode(digest);
        format!("{}-{}", sanitize(&specifier.basename()), &digest[..DIGEST_LEN])
    }

    /// `{root}/repositories/{key}`
    pub fn repository_dir(&self, specifier: &Specifier) -> PathBuf {
        self.repositories_dir().join(Self::key(specifier))
    }

    /// `{root}/locks/{key}.lock`
    pub fn lock_path(&self, specifier: &Specifier) -> PathBuf {
        self.key_lock_path(&Self::key(specifier))
    }

    /// Lock file for the cache directory named `key`.
    pub fn key_lock_path(&self, key: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", key))
    }

    /// `{root}/locks/working-copies/{name}-{digest}.lock`, keyed on the
    /// absolute path of the working copy.
    pub fn working_copy_lock_path(&self, at: &Path) -> PathBuf {
        let at = absolute_path(at).unwrap_or_else(|_| at.to_path_buf());
        let digest = hex::encode(Sha256::digest(at.as_os_str().as_encoded_bytes()));
        let name = at
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.locks_dir().join("working-copies").join(format!(
            "{}-{}.lock",
            sanitize(&name),
            &digest[..DIGEST_LEN]
        ))
    }
}

impl Default for CachePaths {
    /// Uses `dirs::cache_dir()/repocache`.
    fn default() -> Self {
        Self::new(default_cache_root())
    }
}

/// Keep names filesystem-friendly on every platform.
fn sanitize(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "repository".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn paths() -> CachePaths {
        CachePaths::new("/cache-root")
    }

    #[test]
    fn layout_directories() {
        let paths = paths();
        assert_eq!(paths.root(), Path::new("/cache-root"));
        assert_eq!(paths.repositories_dir(), PathBuf::from("/cache-root/repositories"));
        assert_eq!(paths.locks_dir(), PathBuf::from("/cache-root/locks"));
    }

    #[test]
    fn relative_root_is_made_absolute() {
        let paths = CachePaths::new("./cache-root/../cache");
        assert!(paths.root().is_absolute());
        assert!(paths.root().ends_with("cache"));
        assert_eq!(
            paths.root(),
            std::env::current_dir().unwrap().join("cache")
        );
    }

    #[test]
    fn working_copy_locks_follow_the_path() {
        let a = paths().working_copy_lock_path(Path::new("/work/checkouts/Foo"));
        let b = paths().working_copy_lock_path(Path::new("/work/checkouts/./Foo"));
        let c = paths().working_copy_lock_path(Path::new("/work/other/Foo"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a.starts_with("/cache-root/locks/working-copies"));
        assert!(a.file_name().unwrap().to_str().unwrap().starts_with("Foo-"));
    }

    #[test]
    fn key_starts_with_repository_name() {
        let spec = Specifier::url("https://example.com/org/Foo.git");
        let key = CachePaths::key(&spec);
        assert!(key.starts_with("Foo-"), "{}", key);
        assert_eq!(key.len(), "Foo-".len() + DIGEST_LEN);
    }

    #[test]
    fn equal_specifiers_share_a_directory() {
        let a = Specifier::url("https://example.com/org/Foo.git");
        let b = Specifier::url("HTTPS://Example.com/org/Foo/");
        assert_eq!(paths().repository_dir(&a), paths().repository_dir(&b));
        assert_eq!(paths().lock_path(&a), paths().lock_path(&b));
    }

    #[test]
    fn same_name_on_different_hosts_differs() {
        let a = Specifier::url("https://example.com/org/Foo.git");
        let b = Specifier::url("https://mirror.example.org/org/Foo.git");
        assert_ne!(paths().repository_dir(&a), paths().repository_dir(&b));
    }

    #[test]
    fn lock_and_repository_live_apart() {
        let spec = Specifier::url("https://example.com/org/Foo");
        let repo = paths().repository_dir(&spec);
        let lock = paths().lock_path(&spec);
        assert!(repo.starts_with("/cache-root/repositories"));
        assert!(lock.starts_with("/cache-root/locks"));
        assert_eq!(lock.extension().and_then(|e| e.to_str()), Some("lock"));
    }

    #[test]
    fn sanitize_replaces_unsafe_characters() {
        assert_eq!(sanitize("my repo"), "my_repo");
        assert_eq!(sanitize("..hidden"), "hidden");
        assert_eq!(sanitize(""), "repository");
    }
}
