//! Value types identifying repositories, commits and revisions.

use std::fmt;
use std::hash::{Hash as _, Hasher};
use std::io;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Serialize, Serializer};
use thiserror::Error;

/// Length of a hex-encoded SHA-1 object id.
pub const HASH_HEX_LEN: usize = 40;

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0:?}")]
    InvalidCharacter(char),
    #[error("not a 40 character hex object id: {0}")]
    InvalidHash(String),
}

/// Where a repository lives, as given by the caller.
#[derive(Debug, Clone)]
pub enum SpecifierLocation {
    /// A remote URL or any other string git understands as a remote.
    Url(String),
    /// A local directory, stored in absolute, lexically normalized form.
    Path(PathBuf),
}

/// Identity of a repository, independent of any on-disk clone.
///
/// Equality and hashing use [`Specifier::normalized`], so `https://host/repo`,
/// `https://host/repo/` and `https://host/repo.git` all name the same
/// repository.
#[derive(Debug, Clone)]
pub struct Specifier {
    location: SpecifierLocation,
}

impl Specifier {
    /// Creates a specifier for a URL-like location.
    pub fn url(url: impl Into<String>) -> Self {
        Self {
            location: SpecifierLocation::Url(url.into().trim().to_string()),
        }
    }

    /// Creates a specifier for a local path. Relative paths are resolved
    /// against the current directory.
    pub fn path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        let absolute = if path.is_absolute() {
            path.to_path_buf()
        } else {
            match std::env::current_dir() {
                Ok(cwd) => cwd.join(path),
                Err(_) => path.to_path_buf(),
            }
        };
        Self {
            location: SpecifierLocation::Path(lexically_normalize(&absolute)),
        }
    }

    pub fn location(&self) -> &SpecifierLocation {
        &self.location
    }

    /// The location as it is handed to git (clone source, remote URL).
    pub fn location_string(&self) -> String {
        match &self.location {
            SpecifierLocation::Url(url) => url.clone(),
            SpecifierLocation::Path(path) => path.to_string_lossy().into_owned(),
        }
    }

    /// The comparison form of this specifier's location.
    pub fn normalized(&self) -> String {
        match &self.location {
            SpecifierLocation::Url(url) => normalize_location(url),
            SpecifierLocation::Path(path) => {
                strip_repository_suffixes(&path.to_string_lossy()).to_string()
            }
        }
    }

    /// Last component of the normalized location, e.g. `repo` for
    /// `https://example.com/org/repo.git`.
    pub fn basename(&self) -> String {
        let normalized = self.normalized();
        normalized
            .rsplit(['/', ':', '\\'])
            .find(|part| !part.is_empty())
            .unwrap_or("repository")
            .to_string()
    }
}

impl PartialEq for Specifier {
    fn eq(&self, other: &Self) -> bool {
        self.normalized() == other.normalized()
    }
}

impl Eq for Specifier {}

impl std::hash::Hash for Specifier {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.normalized().hash(state);
    }
}

impl FromStr for Specifier {
    type Err = ParseError;

    /// Strings with a scheme (`https://...`) or scp-like syntax
    /// (`git@host:org/repo`) become URL specifiers; anything else is a path.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if let Some(c) = s.chars().find(|c| c.is_control()) {
            return Err(ParseError::InvalidCharacter(c));
        }

        if s.contains("://") || is_scp_like(s) {
            Ok(Self::url(s))
        } else {
            Ok(Self::path(s))
        }
    }
}

impl fmt::Display for Specifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.location_string())
    }
}

impl Serialize for Specifier {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.location_string())
    }
}

/// `user@host:path` with the colon before any slash.
fn is_scp_like(s: &str) -> bool {
    match (s.find(':'), s.find('/')) {
        (Some(colon), Some(slash)) => colon < slash && s[..colon].contains('@'),
        (Some(colon), None) => s[..colon].contains('@'),
        _ => false,
    }
}

/// Normalizes a URL-like location for comparison.
///
/// Scheme URLs get a lowercased scheme and host, absolute paths are
/// lexically normalized, and everything else (relative paths, scp-like
/// remotes) is compared literally. In every case a trailing `/` and a
/// trailing `.git` are dropped.
pub fn normalize_location(raw: &str) -> String {
    let raw = raw.trim();

    if let Some((scheme, rest)) = raw.split_once("://") {
        let (authority, path) = match rest.find('/') {
            Some(idx) => rest.split_at(idx),
            None => (rest, ""),
        };
        let authority = match authority.rsplit_once('@') {
            Some((user, host)) => format!("{}@{}", user, host.to_ascii_lowercase()),
            None => authority.to_ascii_lowercase(),
        };
        let joined = format!("{}://{}{}", scheme.to_ascii_lowercase(), authority, path);
        return strip_repository_suffixes(&joined).to_string();
    }

    if raw.starts_with('/') {
        let normalized = lexically_normalize(Path::new(raw));
        return strip_repository_suffixes(&normalized.to_string_lossy()).to_string();
    }

    strip_repository_suffixes(raw).to_string()
}

/// Drops trailing slashes and then a trailing `.git`. The filesystem root
/// stays `/`.
fn strip_repository_suffixes(s: &str) -> &str {
    let trimmed = s.trim_end_matches('/');
    if trimmed.is_empty() {
        return if s.starts_with('/') { "/" } else { s };
    }
    match trimmed.strip_suffix(".git") {
        Some(stem) if !stem.is_empty() && !stem.ends_with('/') && !stem.ends_with(':') => stem,
        _ => trimmed,
    }
}

/// Removes `.` and `..` components without touching the filesystem.
pub fn lexically_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

/// `path` made absolute against the current directory and lexically
/// normalized.
pub fn absolute_path(path: &Path) -> io::Result<PathBuf> {
    Ok(lexically_normalize(&std::path::absolute(path)?))
}

/// A git object id: exactly 40 lowercase hex characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Hash(String);

impl Hash {
    /// Returns `None` unless `s` is exactly [`HASH_HEX_LEN`] hex digits.
    pub fn new(s: &str) -> Option<Self> {
        if s.len() == HASH_HEX_LEN && s.bytes().all(|b| b.is_ascii_hexdigit()) {
            Some(Hash(s.to_ascii_lowercase()))
        } else {
            None
        }
    }

    /// Returns the hex string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Abbreviated form for display.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..len.min(HASH_HEX_LEN)]
    }
}

impl FromStr for Hash {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Hash::new(s).ok_or_else(|| ParseError::InvalidHash(s.to_string()))
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A point in history: a tag, branch name or raw hash. Resolution turns
/// any of those into a revision whose identifier is a canonical [`Hash`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Revision {
    identifier: String,
}

impl Revision {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
        }
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// The canonical hash, if this revision is already resolved.
    pub fn resolved(&self) -> Option<Hash> {
        Hash::new(&self.identifier)
    }
}

impl From<Hash> for Revision {
    fn from(hash: Hash) -> Self {
        Self { identifier: hash.0 }
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.identifier)
    }
}
