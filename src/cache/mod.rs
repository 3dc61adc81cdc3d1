//! On-disk repository caches and the working copies derived from them.

mod lock;
mod manager;
mod paths;
mod provider;
mod traits;

pub use lock::{DEFAULT_LOCK_TIMEOUT, RepoLock};
pub use manager::{CacheError, CacheState, RepositoryHandle, RepositoryManager};
pub use paths::CachePaths;
pub use provider::GitRepositoryProvider;
pub use traits::{Repository, RepositoryProvider, WorkingCopy};
