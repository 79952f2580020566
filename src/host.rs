//! Physical access to configuration documents.
//!
//! The engine never touches the file system directly. Every document is
//! addressed by a host-relative name such as `web.config` or
//! `app/web.config`, and a [`ConfigHost`] turns names into bytes.
//!
//! - [`FsHost`] maps names onto a directory. Missing files read as `None`;
//!   only real I/O errors (permissions, etc.) are propagated. Writes go
//!   through a uniquely named sibling temp file and a rename, so a reader never sees a
//!   half-written document.
//! - [`MemoryHost`] keeps documents in a map. It is what the tests use, and
//!   it can be told to fail writes to exercise save rollback.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::error::ConfigError;

pub trait ConfigHost: Send + Sync + fmt::Debug {
    /// Contents of `name`, or `None` when it does not exist.
    fn read(&self, name: &str) -> Result<Option<String>, ConfigError>;

    fn write(&self, name: &str, contents: &str) -> Result<(), ConfigError>;

    /// Resolve `relative` against the document `base` refers from.
    fn resolve(&self, base: &str, relative: &str) -> String {
        resolve_name(base, relative)
    }
}

/// Join `relative` onto the directory part of `base`, folding `.` and `..`.
pub fn resolve_name(base: &str, relative: &str) -> String {
    let relative = relative.replace('\\', "/");
    let mut parts: Vec<&str> = if relative.starts_with('/') {
        Vec::new()
    } else {
        let mut dir: Vec<&str> = base.split('/').filter(|s| !s.is_empty()).collect();
        dir.pop();
        dir
    };
    for segment in relative.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    parts.join("/")
}

/// Documents stored below a root directory.
#[derive(Debug, Clone)]
pub struct FsHost {
    root: PathBuf,
}

impl FsHost {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }
}

impl ConfigHost for FsHost {
    fn read(&self, name: &str) -> Result<Option<String>, ConfigError> {
        let path = self.path_of(name);
        match std::fs::read_to_string(&path) {
            Ok(content) => {
                trace!(path = %path.display(), "read document");
                Ok(Some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(ConfigError::Io { path, source: e }),
        }
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), ConfigError> {
        let path = self.path_of(name);
        let dir = path.parent().unwrap_or(self.root.as_path());
        let io_err = |source| ConfigError::Io {
            path: path.clone(),
            source,
        };
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::Io {
            path: dir.to_path_buf(),
            source: e,
        })?;

        // Dropping the temp file on any error below deletes it.
        let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(contents.as_bytes()).map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;
        debug!(path = %path.display(), bytes = contents.len(), "wrote document");
        Ok(())
    }
}

/// Documents held in memory.
#[derive(Debug, Default)]
pub struct MemoryHost {
    files: Mutex<BTreeMap<String, String>>,
    failing: Mutex<HashSet<String>>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(self, name: &str, contents: &str) -> Self {
        self.insert(name, contents);
        self
    }

    pub fn insert(&self, name: &str, contents: &str) {
        self.files.lock().insert(name.to_string(), contents.to_string());
    }

    pub fn get(&self, name: &str) -> Option<String> {
        self.files.lock().get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.files.lock().keys().cloned().collect()
    }

    /// Make every later write to `name` fail.
    pub fn fail_writes_to(&self, name: &str) {
        self.failing.lock().insert(name.to_string());
    }
}

impl ConfigHost for MemoryHost {
    fn read(&self, name: &str) -> Result<Option<String>, ConfigError> {
        Ok(self.get(name))
    }

    fn write(&self, name: &str, contents: &str) -> Result<(), ConfigError> {
        if self.failing.lock().contains(name) {
            return Err(ConfigError::Io {
                path: PathBuf::from(name),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "write refused"),
            });
        }
        self.insert(name, contents);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn resolve_is_relative_to_base_directory() {
        assert_eq!(resolve_name("web.config", "app.config"), "app.config");
        assert_eq!(resolve_name("app/web.config", "settings.config"), "app/settings.config");
        assert_eq!(resolve_name("app/web.config", "../shared/x.config"), "shared/x.config");
        assert_eq!(resolve_name("app/web.config", "./x.config"), "app/x.config");
        assert_eq!(resolve_name("app/web.config", "/top.config"), "top.config");
    }

    #[test]
    fn fs_read_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let host = FsHost::new(dir.path());
        assert!(host.read("nope.config").unwrap().is_none());
    }

    #[test]
    fn fs_write_creates_directories_and_reads_back() {
        let dir = TempDir::new().unwrap();
        let host = FsHost::new(dir.path());
        host.write("app/web.config", "<configuration/>").unwrap();
        assert_eq!(
            host.read("app/web.config").unwrap().as_deref(),
            Some("<configuration/>")
        );
        let entries: Vec<_> = fs::read_dir(dir.path().join("app")).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn fs_failed_write_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        // A non-empty directory where the document should go: the rename fails.
        fs::create_dir_all(dir.path().join("web.config/inner")).unwrap();
        let host = FsHost::new(dir.path());

        let err = host.write("web.config", "<configuration/>").unwrap_err();
        match err {
            ConfigError::Io { path, .. } => assert_eq!(path, dir.path().join("web.config")),
            other => panic!("Expected Io, got {other:?}"),
        }
        let names: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(names, vec!["web.config"]);
    }

    #[test]
    fn fs_write_replaces_existing_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("web.config"), "old").unwrap();
        let host = FsHost::new(dir.path());
        host.write("web.config", "new").unwrap();
        assert_eq!(fs::read_to_string(dir.path().join("web.config")).unwrap(), "new");
    }

    #[cfg(unix)]
    #[test]
    fn fs_unreadable_file_is_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let path = dir.path().join("web.config");
        fs::write(&path, "x").unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o000)).unwrap();

        let host = FsHost::new(dir.path());
        // Running as root ignores permission bits.
        if fs::read_to_string(&path).is_err() {
            assert!(matches!(host.read("web.config"), Err(ConfigError::Io { .. })));
        }

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
    }

    #[test]
    fn memory_host_round_trips_and_fails_on_request() {
        let host = MemoryHost::new().with_file("a.config", "A");
        assert_eq!(host.read("a.config").unwrap().as_deref(), Some("A"));
        assert!(host.read("b.config").unwrap().is_none());
        host.fail_writes_to("a.config");
        assert!(host.write("a.config", "B").is_err());
        assert_eq!(host.get("a.config").as_deref(), Some("A"));
        host.write("b.config", "B").unwrap();
        assert_eq!(host.names(), vec!["a.config", "b.config"]);
    }
}
