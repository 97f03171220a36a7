//! Local paths to upload, and where they should end up remotely.
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One local file or directory to upload.
///
/// `from` is resolved against `root` unless it's absolute.  `to`, if not empty, replaces `from`
/// in the remote keys generated for the content.
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct PathSpec {
    pub root: PathBuf,
    pub from: String,
    pub to: String,
}

impl PathSpec {
    pub fn new(root: impl Into<PathBuf>, from: impl Into<String>, to: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            from: from.into(),
            to: to.into(),
        }
    }

    /// Parse a `from[:to]` entry.  Only the first `:` separates the two parts.
    pub fn parse(root: impl Into<PathBuf>, entry: &str) -> Self {
        let (from, to) = entry.split_once(':').unwrap_or((entry, ""));

        Self::new(root, from, to)
    }

    /// The local path this spec refers to.
    ///
    /// An absolute `from` is used as-is.  A relative `from` is joined to `root`, unless that
    /// doesn't exist while `from` does exist relative to the current directory.
    pub fn full_path(&self) -> PathBuf {
        let from = Path::new(&self.from);

        if from.is_absolute() {
            return from.to_path_buf();
        }

        let joined = self.root.join(from);
        if !joined.exists() && from.exists() {
            from.to_path_buf()
        } else {
            joined
        }
    }

    pub fn is_dir(&self) -> bool {
        self.full_path().is_dir()
    }

    pub fn exists(&self) -> bool {
        self.full_path().exists()
    }
}

/// De-duplicated set of [`PathSpec`]s.
///
/// Adding a spec that is structurally equal to one already present does nothing.  The set can be
/// shared between threads.
#[derive(Debug, Default)]
pub struct PathSet {
    paths: Mutex<Vec<PathSpec>>,
}

impl PathSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, spec: PathSpec) {
        let mut paths = self.paths.lock().unwrap();

        if !paths.contains(&spec) {
            paths.push(spec);
        }
    }

    /// A snapshot of every spec in the set, in the order they were first added
    pub fn all(&self) -> Vec<PathSpec> {
        self.paths.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.paths.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl FromIterator<PathSpec> for PathSet {
    fn from_iter<T: IntoIterator<Item = PathSpec>>(iter: T) -> Self {
        let set = Self::new();
        for spec in iter {
            set.add(spec);
        }

        set
    }
}
