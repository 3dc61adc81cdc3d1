//! A read-only filesystem over one revision, read straight from the object
//! database.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use thiserror::Error;

use super::repository::{GitRepository, ObjectType};
use super::tree::{EntryType, Tree, TreeEntry};
use super::GitError;
use crate::types::{Hash, Revision};

/// Errors from [`GitFileSystemView`], each carrying the offending path.
#[derive(Error, Debug)]
pub enum FileSystemError {
    /// A file operation was applied to a directory.
    #[error("is a directory: {0}")]
    IsDirectory(PathBuf),
    /// A directory operation was applied to a file, or a path traverses a file.
    #[error("not a directory: {0}")]
    NotDirectory(PathBuf),
    #[error("no such file or directory: {0}")]
    NoEntry(PathBuf),
    /// The path is, or passes through, a submodule.
    #[error("unsupported entry: {0}")]
    Unsupported(PathBuf),
    #[error(transparent)]
    Git(#[from] GitError),
}

enum Node {
    Directory(Arc<Tree>),
    Entry(TreeEntry),
}

/// The contents of one commit as a read-only filesystem.
///
/// Paths are interpreted relative to the repository root; a leading `/` is
/// accepted. Trees are read lazily and memoised per view.
#[derive(Debug)]
pub struct GitFileSystemView {
    repository: GitRepository,
    revision: Revision,
    root: Hash,
    trees: DashMap<Hash, Arc<Tree>>,
}

impl GitRepository {
    /// Open `revision` for reading without touching any checkout.
    pub fn open_file_view(&self, revision: &Revision) -> Result<GitFileSystemView, GitError> {
        let commit = self.resolve_hash(revision.identifier(), Some(ObjectType::Commit))?;
        let root = self.read_commit(&commit)?.tree;
        Ok(GitFileSystemView {
            repository: self.clone(),
            revision: Revision::from(commit),
            root,
            trees: DashMap::new(),
        })
    }
}

impl GitFileSystemView {
    /// The resolved revision this view shows.
    pub fn revision(&self) -> &Revision {
        &self.revision
    }

    fn tree(&self, hash: &Hash) -> Result<Arc<Tree>, GitError> {
        if let Some(tree) = self.trees.get(hash) {
            return Ok(Arc::clone(tree.value()));
        }
        let tree = Arc::new(self.repository.read_tree(hash)?);
        self.trees.insert(hash.clone(), Arc::clone(&tree));
        Ok(tree)
    }

    fn lookup(&self, path: &Path) -> Result<Node, FileSystemError> {
        let mut components = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(name) => components.push(name.to_string_lossy().into_owned()),
                Component::ParentDir => {
                    components.pop();
                }
                Component::RootDir | Component::CurDir | Component::Prefix(_) => {}
            }
        }

        let mut current = self.tree(&self.root)?;
        let Some((last, parents)) = components.split_last() else {
            return Ok(Node::Directory(current));
        };

        for name in parents {
            let entry = current
                .entry(name)
                .ok_or_else(|| FileSystemError::NoEntry(path.to_path_buf()))?;
            current = match entry.entry_type {
                EntryType::Tree => self.tree(tree_hash(entry)?)?,
                EntryType::Submodule => {
                    return Err(FileSystemError::Unsupported(path.to_path_buf()));
                }
                _ => return Err(FileSystemError::NotDirectory(path.to_path_buf())),
            };
        }

        let entry = current
            .entry(last)
            .ok_or_else(|| FileSystemError::NoEntry(path.to_path_buf()))?;
        match entry.entry_type {
            EntryType::Tree => Ok(Node::Directory(self.tree(tree_hash(entry)?)?)),
            _ => Ok(Node::Entry(entry.clone())),
        }
    }

    fn entry_type(&self, path: &Path) -> Option<EntryType> {
        match self.lookup(path).ok()? {
            Node::Directory(_) => Some(EntryType::Tree),
            Node::Entry(entry) => Some(entry.entry_type),
        }
    }

    pub fn exists(&self, path: impl AsRef<Path>) -> bool {
        self.entry_type(path.as_ref()).is_some()
    }

    /// Regular or executable file. Symlinks and submodules are not files.
    pub fn is_file(&self, path: impl AsRef<Path>) -> bool {
        self.entry_type(path.as_ref()).is_some_and(EntryType::is_file)
    }

    pub fn is_directory(&self, path: impl AsRef<Path>) -> bool {
        self.entry_type(path.as_ref()) == Some(EntryType::Tree)
    }

    pub fn is_executable_file(&self, path: impl AsRef<Path>) -> bool {
        self.entry_type(path.as_ref()) == Some(EntryType::Executable)
    }

    pub fn is_symlink(&self, path: impl AsRef<Path>) -> bool {
        self.entry_type(path.as_ref()) == Some(EntryType::Symlink)
    }

    /// Entry names of the directory at `path`, in git's order.
    pub fn get_directory_contents(
        &self,
        path: impl AsRef<Path>,
    ) -> Result<Vec<String>, FileSystemError> {
        let path = path.as_ref();
        match self.lookup(path)? {
            Node::Directory(tree) => Ok(tree.contents.iter().map(|e| e.name.clone()).collect()),
            Node::Entry(entry) if entry.entry_type == EntryType::Submodule => {
                Err(FileSystemError::Unsupported(path.to_path_buf()))
            }
            Node::Entry(_) => Err(FileSystemError::NotDirectory(path.to_path_buf())),
        }
    }

    /// Raw bytes of the file at `path`. For a symlink this is the link target.
    pub fn read_file_contents(&self, path: impl AsRef<Path>) -> Result<Vec<u8>, FileSystemError> {
        let path = path.as_ref();
        match self.lookup(path)? {
            Node::Directory(_) => Err(FileSystemError::IsDirectory(path.to_path_buf())),
            Node::Entry(entry) => match (&entry.entry_type, entry.location.hash()) {
                (EntryType::Submodule, _) => Err(FileSystemError::Unsupported(path.to_path_buf())),
                (_, Some(hash)) => Ok(self.repository.read_blob(hash)?),
                (_, None) => {
                    let hash = self
                        .repository
                        .resolve_hash(&entry.location.to_string(), Some(ObjectType::Blob))?;
                    Ok(self.repository.read_blob(&hash)?)
                }
            },
        }
    }

    pub fn read_to_string(&self, path: impl AsRef<Path>) -> Result<String, FileSystemError> {
        let path = path.as_ref();
        let bytes = self.read_file_contents(path)?;
        String::from_utf8(bytes).map_err(|_| {
            FileSystemError::Git(GitError::ParseError(format!(
                "{} is not valid UTF-8",
                path.display()
            )))
        })
    }
}

fn tree_hash(entry: &TreeEntry) -> Result<&Hash, GitError> {
    entry.location.hash().ok_or_else(|| {
        GitError::ParseError(format!("tree entry {} has no object id", entry.name))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GitConfig;
    use crate::git::Git;
    use crate::git::process::testing::ScriptedRunner;

    const COMMIT: &str = "1111111111111111111111111111111111111111";
    const ROOT: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SOURCES: &str = "dddddddddddddddddddddddddddddddddddddddd";
    const BLOB: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";
    const SUB: &str = "cccccccccccccccccccccccccccccccccccccccc";

    fn view() -> (Arc<ScriptedRunner>, GitFileSystemView) {
        let runner = ScriptedRunner::new();
        runner.ok(
            &["rev-parse", "--verify", "--quiet", "1.0^{commit}"],
            COMMIT,
        );
        runner.ok(
            &["cat-file", "commit", COMMIT],
            &format!("tree {}\nauthor A <a@b> 0 +0000\n\nmessage\n", ROOT),
        );
        runner.ok(
            &["ls-tree", "-z", ROOT],
            &format!(
                "100644 blob {b}\tPackage.swift\0\
                 100755 blob {b}\tbuild.sh\0\
                 040000 tree {s}\tSources\0\
                 160000 commit {m}\tVendor\0\
                 120000 blob {b}\tREADME\0",
                b = BLOB,
                s = SOURCES,
                m = SUB
            ),
        );
        runner.ok(
            &["ls-tree", "-z", SOURCES],
            &format!("100644 blob {}\tmain.swift\0", BLOB),
        );
        runner.ok(&["cat-file", "blob", BLOB], "print(1)\n");

        let repo = GitRepository::bare(
            "/cache/repo",
            Git::with_runner(GitConfig::default(), runner.clone()),
        );
        let view = repo.open_file_view(&Revision::new("1.0")).unwrap();
        (runner, view)
    }

    #[test]
    fn view_resolves_revision() {
        let (_, view) = view();
        assert_eq!(view.revision().identifier(), COMMIT);
    }

    #[test]
    fn kinds_of_entries() {
        let (_, view) = view();
        assert!(view.exists("/"));
        assert!(view.is_directory("/"));
        assert!(view.is_file("Package.swift"));
        assert!(view.is_file("/Sources/main.swift"));
        assert!(view.is_directory("Sources"));
        assert!(view.is_executable_file("build.sh"));
        assert!(view.is_file("build.sh"));
        assert!(view.is_symlink("README"));
        assert!(!view.is_file("README"));
        assert!(view.exists("Vendor"));
        assert!(!view.is_directory("Vendor"));
        assert!(!view.exists("missing"));
        assert!(!view.exists("Vendor/inner"));
    }

    #[test]
    fn directory_contents() {
        let (_, view) = view();
        assert_eq!(
            view.get_directory_contents("/").unwrap(),
            vec!["Package.swift", "build.sh", "Sources", "Vendor", "README"]
        );
        assert_eq!(
            view.get_directory_contents("./Sources/").unwrap(),
            vec!["main.swift"]
        );
    }

    #[test]
    fn read_file() {
        let (_, view) = view();
        assert_eq!(view.read_to_string("Sources/main.swift").unwrap(), "print(1)\n");
        assert_eq!(view.read_file_contents("Package.swift").unwrap(), b"print(1)\n");
    }

    #[test]
    fn error_kinds_carry_path() {
        let (_, view) = view();
        assert!(matches!(
            view.read_file_contents("Sources"),
            Err(FileSystemError::IsDirectory(p)) if p == Path::new("Sources")
        ));
        assert!(matches!(
            view.read_file_contents("Package.swift/inner"),
            Err(FileSystemError::NotDirectory(p)) if p == Path::new("Package.swift/inner")
        ));
        assert!(matches!(
            view.read_file_contents("nope"),
            Err(FileSystemError::NoEntry(p)) if p == Path::new("nope")
        ));
        assert!(matches!(
            view.get_directory_contents("Package.swift"),
            Err(FileSystemError::NotDirectory(_))
        ));
    }

    #[test]
    fn submodules_are_opaque() {
        let (_, view) = view();
        assert!(matches!(
            view.read_file_contents("Vendor"),
            Err(FileSystemError::Unsupported(_))
        ));
        assert!(matches!(
            view.get_directory_contents("Vendor"),
            Err(FileSystemError::Unsupported(_))
        ));
        assert!(matches!(
            view.read_file_contents("Vendor/Package.swift"),
            Err(FileSystemError::Unsupported(_))
        ));
    }

    #[test]
    fn trees_are_read_once() {
        let (runner, view) = view();
        view.is_file("Sources/main.swift");
        view.is_file("Sources/main.swift");
        view.get_directory_contents("Sources").unwrap();
        let ls_tree_calls = runner
            .commands()
            .iter()
            .filter(|args| args.first().map(String::as_str) == Some("ls-tree"))
            .count();
        assert_eq!(ls_tree_calls, 2);
    }

    #[test]
    fn unknown_revision_cannot_be_opened() {
        let (runner, _) = view();
        let repo = GitRepository::bare(
            "/cache/repo",
            Git::with_runner(GitConfig::default(), runner),
        );
        assert!(matches!(
            repo.open_file_view(&Revision::new("9.9")),
            Err(GitError::NotFound { .. })
        ));
    }
}
