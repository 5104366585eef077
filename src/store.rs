use std::fmt;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use dashmap::DashMap;

/// Contract the lease pool consumes from its backing key-value store.
///
/// Keys are `/`-separated hierarchical paths. A key may be marked as a
/// directory with no value; `list` and `delete_dir` operate on whole
/// subtrees. Implementations must provide linearizable per-key semantics and
/// bound every call (the pool budgets two seconds per round trip).
pub trait KvStore: Send + Sync {
    /// Write `value` under `key`, overwriting any previous value.
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;

    /// Create `key` as an empty directory. Succeeds if it already exists.
    fn make_dir(&self, key: &str) -> Result<(), StoreError>;

    /// Return every `(key, value)` under `dir`, recursively.
    /// Fails with [`StoreError::NotFound`] if `dir` does not exist.
    fn list(&self, dir: &str) -> Result<Vec<(String, String)>, StoreError>;

    /// Recursively delete `dir` and everything under it.
    /// Fails with [`StoreError::NotFound`] if `dir` does not exist.
    fn delete_dir(&self, dir: &str) -> Result<(), StoreError>;
}

#[derive(Debug)]
pub enum StoreError {
    /// The key or directory does not exist. Callers distinguish this from
    /// transport failures; the pool treats it as "empty" or "already gone".
    NotFound,
    /// The per-request budget elapsed before the store answered.
    Timeout,
    Io(io::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound => write!(f, "key not found"),
            StoreError::Timeout => write!(f, "store request timed out"),
            StoreError::Io(e) => write!(f, "store I/O: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => StoreError::NotFound,
            io::ErrorKind::TimedOut => StoreError::Timeout,
            _ => StoreError::Io(e),
        }
    }
}

fn normalize(key: &str) -> &str {
    key.trim_matches('/')
}

enum Node {
    Dir,
    Value(String),
}

/// In-memory store. Used by the test suite and for ephemeral single-instance
/// runs where losing leases on restart is acceptable.
pub struct MemStore {
    nodes: DashMap<String, Node>,
}

impl MemStore {
    pub fn new() -> Self {
        Self {
            nodes: DashMap::new(),
        }
    }
}

impl Default for MemStore {
    fn default() -> Self {
        Self::new()
    }
}

impl KvStore for MemStore {
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.nodes
            .insert(normalize(key).to_string(), Node::Value(value.to_string()));
        Ok(())
    }

    fn make_dir(&self, key: &str) -> Result<(), StoreError> {
        self.nodes
            .entry(normalize(key).to_string())
            .or_insert(Node::Dir);
        Ok(())
    }

    fn list(&self, dir: &str) -> Result<Vec<(String, String)>, StoreError> {
        let dir = normalize(dir);
        let prefix = format!("{dir}/");
        let mut entries = Vec::new();
        let mut seen = self.nodes.contains_key(dir);
        for item in self.nodes.iter() {
            if let Some(rest) = item.key().strip_prefix(&prefix) {
                if rest.is_empty() {
                    continue;
                }
                seen = true;
                if let Node::Value(v) = item.value() {
                    entries.push((item.key().clone(), v.clone()));
                }
            }
        }
        if !seen {
            return Err(StoreError::NotFound);
        }
        Ok(entries)
    }

    fn delete_dir(&self, dir: &str) -> Result<(), StoreError> {
        let dir = normalize(dir);
        let prefix = format!("{dir}/");
        let mut removed = self.nodes.remove(dir).is_some();
        let children: Vec<String> = self
            .nodes
            .iter()
            .filter(|item| item.key().starts_with(&prefix))
            .map(|item| item.key().clone())
            .collect();
        for key in children {
            removed |= self.nodes.remove(&key).is_some();
        }
        if !removed {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

/// Filesystem-backed store: one file per key, one directory per directory
/// key, all rooted under `root`. Writes go through a temp file and a rename
/// so a reader never observes a half-written record. Instances sharing the
/// root (e.g. over NFS) see each other's writes.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Self, StoreError> {
        fs::create_dir_all(root.as_ref())?;
        Ok(Self {
            root: root.as_ref().to_path_buf(),
        })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(normalize(key))
    }

    fn collect(path: &Path, out: &mut Vec<(String, String)>, root: &Path) -> io::Result<()> {
        for entry in fs::read_dir(path)? {
            let entry = entry?;
            let entry_path = entry.path();
            if entry.file_type()?.is_dir() {
                Self::collect(&entry_path, out, root)?;
            } else {
                if entry_path.extension().is_some_and(|e| e == "tmp") {
                    continue;
                }
                let value = fs::read_to_string(&entry_path)?;
                let key = entry_path
                    .strip_prefix(root)
                    .unwrap_or(&entry_path)
                    .to_string_lossy()
                    .into_owned();
                out.push((key, value));
            }
        }
        Ok(())
    }
}

impl KvStore for FsStore {
    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let target = self.path_for(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        // Append rather than with_extension: dotted-quad keys like
        // `10.0.0.10` must not collapse onto one temp name.
        let mut temp_name = target.file_name().unwrap_or_default().to_os_string();
        temp_name.push(".tmp");
        let temp = target.with_file_name(temp_name);
        let mut file = fs::File::create(&temp)?;
        file.write_all(value.as_bytes())?;
        file.sync_all()?;
        fs::rename(&temp, &target)?;
        Ok(())
    }

    fn make_dir(&self, key: &str) -> Result<(), StoreError> {
        fs::create_dir_all(self.path_for(key))?;
        Ok(())
    }

    fn list(&self, dir: &str) -> Result<Vec<(String, String)>, StoreError> {
        let path = self.path_for(dir);
        let mut entries = Vec::new();
        Self::collect(&path, &mut entries, &self.root)?;
        Ok(entries)
    }

    fn delete_dir(&self, dir: &str) -> Result<(), StoreError> {
        fs::remove_dir_all(self.path_for(dir))?;
        Ok(())
    }
}
