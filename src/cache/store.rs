use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use time::OffsetDateTime;
use tracing::{debug, info, warn};
use url::Url;

use super::error::CacheError;
use super::paths::relative_path_for;
use crate::application::clock::Clock;

const TEMP_PREFIX: &str = ".restatic-";
const TEMP_SUFFIX: &str = ".tmp";

/// Outcome of a serving-side cache lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Cached and within its TTL.
    Fresh(String),
    /// Cached but past its TTL; still servable while a refresh is queued.
    Stale(String),
    /// Nothing usable on disk; the caller renders live.
    Miss,
}

/// Filesystem tree of pre-rendered pages.
pub struct CacheStore {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl CacheStore {
    pub fn new(root: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: root.into(),
            clock,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_for(&self, url: &Url) -> PathBuf {
        self.root.join(relative_path_for(url))
    }

    /// Atomically replace the file at `path` with `content`.
    pub fn write(&self, path: &Path, content: &str) -> Result<(), CacheError> {
        let parent = self.checked_parent(path)?;
        fs::create_dir_all(parent).map_err(|err| CacheError::io(parent, err))?;

        let mut staged = tempfile::Builder::new()
            .prefix(TEMP_PREFIX)
            .suffix(TEMP_SUFFIX)
            .tempfile_in(parent)
            .map_err(|err| CacheError::io(parent, err))?;
        staged
            .write_all(content.as_bytes())
            .and_then(|()| staged.as_file().sync_all())
            .map_err(|err| CacheError::io(staged.path(), err))?;
        set_readable(staged.path())?;

        staged
            .persist(path)
            .map_err(|err| CacheError::io(path, err.error))?;

        debug!(
            target = "restatic::cache",
            op = "write",
            path = %path.display(),
            bytes = content.len(),
            "Cache file committed"
        );
        Ok(())
    }

    pub fn read(&self, path: &Path) -> Result<String, CacheError> {
        fs::read_to_string(path).map_err(|err| CacheError::io(path, err))
    }

    /// Delete the cache file for `url` and prune emptied ancestors below the root.
    ///
    /// Returns `false` when there was nothing to delete.
    pub fn purge(&self, url: &Url) -> Result<bool, CacheError> {
        let path = self.path_for(url);
        let removed = match fs::remove_file(&path) {
            Ok(()) => true,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => false,
            Err(err) => return Err(CacheError::io(&path, err)),
        };

        let pruned = path
            .parent()
            .map(|dir| self.prune_empty_dirs(dir))
            .unwrap_or(0);

        info!(
            target = "restatic::cache",
            op = "purge",
            url = %url,
            removed,
            pruned_dirs = pruned,
            "Cache entry purged"
        );
        Ok(removed)
    }

    /// `ttl` of zero means entries never go stale.
    pub fn is_stale(&self, path: &Path, ttl: Duration) -> Result<bool, CacheError> {
        if ttl.is_zero() {
            return Ok(false);
        }
        let modified = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .map_err(|err| CacheError::io(path, err))?;
        let age = self.clock.now() - OffsetDateTime::from(modified);
        Ok(age > ttl)
    }

    /// Serving policy: stale content is still returned, errors degrade to a miss.
    pub fn lookup(&self, url: &Url, ttl: Duration) -> CacheLookup {
        let path = self.path_for(url);
        let content = match self.read(&path) {
            Ok(content) => content,
            Err(CacheError::NotFound(_)) => return CacheLookup::Miss,
            Err(err) => {
                warn!(
                    target = "restatic::cache",
                    op = "lookup",
                    url = %url,
                    error = %err,
                    "Cache read failed; falling back to live render"
                );
                return CacheLookup::Miss;
            }
        };

        match self.is_stale(&path, ttl) {
            Ok(false) => CacheLookup::Fresh(content),
            Ok(true) => CacheLookup::Stale(content),
            Err(err) => {
                warn!(
                    target = "restatic::cache",
                    op = "lookup",
                    url = %url,
                    error = %err,
                    "Cache metadata unavailable; treating entry as stale"
                );
                CacheLookup::Stale(content)
            }
        }
    }

    fn checked_parent<'a>(&self, path: &'a Path) -> Result<&'a Path, CacheError> {
        match path.parent() {
            Some(parent) if path.starts_with(&self.root) => Ok(parent),
            _ => Err(CacheError::OutsideRoot(path.to_path_buf())),
        }
    }

    fn prune_empty_dirs(&self, start: &Path) -> usize {
        let mut pruned = 0;
        let mut current = Some(start);
        while let Some(dir) = current {
            if dir == self.root.as_path() || !dir.starts_with(&self.root) {
                break;
            }
            // remove_dir refuses non-empty directories, which ends the walk.
            if fs::remove_dir(dir).is_err() {
                break;
            }
            pruned += 1;
            current = dir.parent();
        }
        pruned
    }
}

#[cfg(unix)]
fn set_readable(path: &Path) -> Result<(), CacheError> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(0o644))
        .map_err(|err| CacheError::io(path, err))
}

#[cfg(not(unix))]
fn set_readable(_path: &Path) -> Result<(), CacheError> {
    Ok(())
}
