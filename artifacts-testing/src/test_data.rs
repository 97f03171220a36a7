//! Create trees of local test files to upload, and check what came out the other end
use crate::Result;
use rand::prelude::*;
use sha2::Digest;
use std::{
    collections::{BTreeSet, HashMap},
    path::{Path, PathBuf},
};

#[derive(Clone, Debug)]
pub struct TestFile {
    /// Path relative to the root of the test tree, with `/` separators
    pub path: String,
    pub size: usize,
}

impl TestFile {
    /// Make a new test file spec with the size specified as a string so we can use
    /// human-friendly units like "10 KB" or "20 MiB"
    pub fn new(path: impl Into<String>, size: impl AsRef<str>) -> Self {
        let size = byte_unit::Byte::from_str(size).unwrap();

        Self {
            path: path.into(),
            size: size.get_bytes() as usize,
        }
    }
}

/// A [`TestFile`] that has been written to disk, with the random data it contains
#[derive(Clone, Debug)]
pub struct TestFileWithData {
    pub path: String,
    pub full_path: PathBuf,
    pub data: Vec<u8>,
    pub hash: [u8; 32],
}

pub fn hash(data: &[u8]) -> [u8; 32] {
    let mut hash = [0u8; 32];
    hash.copy_from_slice(&sha2::Sha256::digest(data));

    hash
}

/// Write each test file under `root` filled with random data, creating directories as needed.
///
/// The returned map is keyed by the relative path of each file.
pub fn make_test_tree(
    root: &Path,
    files: impl IntoIterator<Item = TestFile>,
) -> Result<HashMap<String, TestFileWithData>> {
    let mut rand = rand::thread_rng();
    let mut test_files = HashMap::new();

    for file in files {
        let full_path = root.join(&file.path);
        if let Some(parent) = full_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut data = vec![0u8; file.size];
        rand.fill(&mut data[..]);
        std::fs::write(&full_path, &data)?;

        let test_file = TestFileWithData {
            path: file.path.clone(),
            full_path,
            hash: hash(&data),
            data,
        };

        assert!(
            test_files.insert(file.path.clone(), test_file).is_none(),
            "BUG: test data contains the same path '{}' more than once",
            file.path
        );
    }

    Ok(test_files)
}

/// Check that `uploaded` holds exactly the expected test files, with the right contents.
///
/// `uploaded` maps the remote key of each upload to the uploaded data.  `prefix` is stripped from
/// each key before it's matched to a test file.
#[track_caller]
pub fn validate_uploaded_data(
    test_data: &HashMap<String, TestFileWithData>,
    prefix: &str,
    uploaded: &HashMap<String, Vec<u8>>,
) {
    let mut missing = test_data.keys().cloned().collect::<BTreeSet<_>>();

    for (key, data) in uploaded {
        let relative = key
            .strip_prefix(prefix)
            .map(|relative| relative.trim_start_matches('/'))
            .unwrap_or_else(|| panic!("Uploaded key '{key}' doesn't start with prefix '{prefix}'"));

        let expected = test_data.get(relative).unwrap_or_else(|| {
            panic!("Uploaded key '{key}' doesn't correspond to any test file")
        });

        assert_eq!(
            expected.hash,
            hash(data),
            "Uploaded key '{key}' doesn't match the contents of '{}'",
            expected.full_path.display()
        );

        missing.remove(relative);
    }

    assert!(
        missing.is_empty(),
        "Test files were not uploaded: {}",
        missing.into_iter().collect::<Vec<_>>().join(", ")
    );
}
