//! Reading tree objects without a checkout.

use std::fmt;

use super::repository::{GitRepository, ObjectType};
use super::GitError;
use crate::types::Hash;

/// Where an object lives: a resolved hash, or a treeish still to be looked up
/// (e.g. `HEAD:Sources`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Location {
    Hash(Hash),
    Unresolved(String),
}

impl Location {
    pub fn is_resolved(&self) -> bool {
        matches!(self, Location::Hash(_))
    }

    pub fn hash(&self) -> Option<&Hash> {
        match self {
            Location::Hash(hash) => Some(hash),
            Location::Unresolved(_) => None,
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Location::Hash(hash) => write!(f, "{}", hash),
            Location::Unresolved(treeish) => write!(f, "{}", treeish),
        }
    }
}

/// Kind of a tree entry, from its git file mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    Blob,
    Executable,
    Tree,
    /// A gitlink; the entry's hash is a commit in another repository.
    Submodule,
    Symlink,
}

impl EntryType {
    /// Map a git file mode such as `100644` or `040000`.
    pub fn from_mode(mode: &str) -> Option<Self> {
        match mode {
            "100644" | "100664" | "100640" => Some(EntryType::Blob),
            "100755" => Some(EntryType::Executable),
            "040000" | "40000" => Some(EntryType::Tree),
            "160000" => Some(EntryType::Submodule),
            "120000" => Some(EntryType::Symlink),
            _ => None,
        }
    }

    pub fn is_file(self) -> bool {
        matches!(self, EntryType::Blob | EntryType::Executable)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub entry_type: EntryType,
    pub location: Location,
}

/// The entries of one tree object, in git's order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    pub location: Location,
    pub contents: Vec<TreeEntry>,
}

impl Tree {
    pub fn entry(&self, name: &str) -> Option<&TreeEntry> {
        self.contents.iter().find(|entry| entry.name == name)
    }
}

impl GitRepository {
    /// Enumerate the tree `hash`.
    pub fn read_tree(&self, hash: &Hash) -> Result<Tree, GitError> {
        let bytes = self
            .git()
            .run_bytes(self.path(), &["ls-tree", "-z", hash.as_str()])?;
        let contents = parse_ls_tree(&bytes)?;
        Ok(Tree {
            location: Location::Hash(hash.clone()),
            contents,
        })
    }

    /// Read the tree at `location`, resolving an unresolved pointer with a
    /// tree-typed lookup first.
    pub fn read_tree_at(&self, location: &Location) -> Result<Tree, GitError> {
        match location {
            Location::Hash(hash) => self.read_tree(hash),
            Location::Unresolved(treeish) => {
                let hash = self.resolve_hash(treeish, Some(ObjectType::Tree))?;
                self.read_tree(&hash)
            }
        }
    }

    /// Descend into `entry`. Submodules are opaque and fail with
    /// [`GitError::Unsupported`].
    pub fn read_entry_tree(&self, entry: &TreeEntry) -> Result<Tree, GitError> {
        match entry.entry_type {
            EntryType::Tree => self.read_tree_at(&entry.location),
            EntryType::Submodule => Err(GitError::Unsupported {
                path: entry.name.clone(),
                what: "submodule".to_string(),
            }),
            _ => Err(GitError::InvalidInput(format!(
                "{} is not a tree",
                entry.name
            ))),
        }
    }

    /// Raw contents of the blob `hash`.
    pub fn read_blob(&self, hash: &Hash) -> Result<Vec<u8>, GitError> {
        self.git()
            .run_bytes(self.path(), &["cat-file", "blob", hash.as_str()])
    }
}

/// Parse `ls-tree -z` output: `<mode> SP <type> SP <hash> TAB <name> NUL`.
fn parse_ls_tree(bytes: &[u8]) -> Result<Vec<TreeEntry>, GitError> {
    let mut entries = Vec::new();
    for record in bytes.split(|b| *b == 0) {
        if record.is_empty() {
            continue;
        }
        let record = String::from_utf8_lossy(record);
        let (meta, name) = record
            .split_once('\t')
            .ok_or_else(|| GitError::ParseError(format!("malformed ls-tree entry: {:?}", record)))?;

        let mut fields = meta.split(' ');
        let (Some(mode), Some(_kind), Some(hash)) = (fields.next(), fields.next(), fields.next())
        else {
            return Err(GitError::ParseError(format!(
                "malformed ls-tree entry: {:?}",
                record
            )));
        };

        let entry_type = EntryType::from_mode(mode)
            .ok_or_else(|| GitError::ParseError(format!("unknown file mode {} for {}", mode, name)))?;
        let hash = Hash::new(hash)
            .ok_or_else(|| GitError::ParseError(format!("invalid object id for {}: {}", name, hash)))?;

        entries.push(TreeEntry {
            name: name.to_string(),
            entry_type,
            location: Location::Hash(hash),
        });
    }
    Ok(entries)
}
