//! Content digest computation

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;
use walkdir::WalkDir;

use crate::error::HashError;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Digest algorithm used to key cache entries
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// BLAKE3 - fastest option, the default
    #[default]
    Blake3,
    /// SHA-256 - slower, for stricter integrity requirements
    Sha256,
}

impl HashAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashAlgorithm::Blake3 => "blake3",
            HashAlgorithm::Sha256 => "sha256",
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = HashError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "blake3" => Ok(HashAlgorithm::Blake3),
            "sha256" => Ok(HashAlgorithm::Sha256),
            _ => Err(HashError::UnsupportedAlgorithm(s.to_string())),
        }
    }
}

/// Incremental hasher over the selected algorithm
enum Hasher {
    Blake3(Box<blake3::Hasher>),
    Sha256(Sha256),
}

impl Hasher {
    fn new(algorithm: HashAlgorithm) -> Self {
        match algorithm {
            HashAlgorithm::Blake3 => Hasher::Blake3(Box::new(blake3::Hasher::new())),
            HashAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Blake3(h) => {
                h.update(data);
            }
            Hasher::Sha256(h) => h.update(data),
        }
    }

    fn update_from_reader(&mut self, reader: &mut impl Read) -> std::io::Result<u64> {
        let mut buffer = vec![0u8; READ_BUFFER_SIZE];
        let mut total = 0u64;
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                return Ok(total);
            }
            self.update(&buffer[..n]);
            total += n as u64;
        }
    }

    fn finalize_hex(self) -> String {
        match self {
            Hasher::Blake3(h) => h.finalize().to_hex().to_string(),
            Hasher::Sha256(h) => hex::encode(h.finalize()),
        }
    }
}

/// One visited node of a directory tree, keyed by its normalized relative path
enum TreeNode {
    Dir,
    File { path: PathBuf, size: u64 },
    Link { target: String },
}

/// Hash engine computing hex digests under a fixed algorithm
#[derive(Debug, Clone, Copy, Default)]
pub struct HashEngine {
    algorithm: HashAlgorithm,
}

impl HashEngine {
    /// Create a new hash engine
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Digest of a byte buffer
    pub fn hash_data(&self, data: &[u8]) -> String {
        match self.algorithm {
            HashAlgorithm::Blake3 => blake3::hash(data).to_hex().to_string(),
            HashAlgorithm::Sha256 => hex::encode(Sha256::digest(data)),
        }
    }

    /// Digest of a file's full contents
    pub fn hash_file(&self, path: impl AsRef<Path>) -> Result<String, HashError> {
        let path = path.as_ref();
        let io_err = |source| HashError::Io {
            path: path.to_path_buf(),
            source,
        };

        let file = File::open(path).map_err(io_err)?;
        let mut reader = BufReader::new(file);
        let mut hasher = Hasher::new(self.algorithm);
        let read = hasher.update_from_reader(&mut reader).map_err(io_err)?;

        debug!("Hashed {} bytes from {:?} ({})", read, path, self.algorithm);
        Ok(hasher.finalize_hex())
    }

    /// Digest of a directory tree
    ///
    /// Every node is folded in lexicographic order of its `/`-separated
    /// relative path, so the digest does not depend on the order in which
    /// the platform lists directory entries. Directories contribute their
    /// path, files their path, size and contents, and symlinks their path
    /// and target (links are not followed).
    pub fn hash_directory(&self, root: impl AsRef<Path>) -> Result<String, HashError> {
        let root = root.as_ref();
        let mut nodes = Vec::new();

        for entry in WalkDir::new(root).min_depth(1) {
            let entry = entry.map_err(|source| HashError::Walk {
                path: root.to_path_buf(),
                source,
            })?;
            let relative = normalize_relative(root, entry.path());
            let file_type = entry.file_type();

            let node = if file_type.is_symlink() {
                let target = std::fs::read_link(entry.path()).map_err(|source| HashError::Io {
                    path: entry.path().to_path_buf(),
                    source,
                })?;
                TreeNode::Link {
                    target: target.to_string_lossy().replace('\\', "/"),
                }
            } else if file_type.is_dir() {
                TreeNode::Dir
            } else {
                let metadata = entry.metadata().map_err(|source| HashError::Walk {
                    path: root.to_path_buf(),
                    source,
                })?;
                TreeNode::File {
                    path: entry.path().to_path_buf(),
                    size: metadata.len(),
                }
            };
            nodes.push((relative, node));
        }

        nodes.sort_by(|a, b| a.0.cmp(&b.0));

        let mut hasher = Hasher::new(self.algorithm);
        for (relative, node) in &nodes {
            match node {
                TreeNode::Dir => hasher.update(format!("dir:{}\n", relative).as_bytes()),
                TreeNode::Link { target } => {
                    hasher.update(format!("link:{}:{}\n", relative, target).as_bytes())
                }
                TreeNode::File { path, size } => {
                    hasher.update(format!("file:{}:{}\n", relative, size).as_bytes());
                    let file = File::open(path).map_err(|source| HashError::Io {
                        path: path.clone(),
                        source,
                    })?;
                    hasher
                        .update_from_reader(&mut BufReader::new(file))
                        .map_err(|source| HashError::Io {
                            path: path.clone(),
                            source,
                        })?;
                }
            }
        }

        debug!(
            "Hashed directory {:?} ({} entries, {})",
            root,
            nodes.len(),
            self.algorithm
        );
        Ok(hasher.finalize_hex())
    }
}

fn normalize_relative(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("src/nested")).unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("src/main.rs"), b"fn main() {}").unwrap();
        fs::write(dir.path().join("src/nested/z.bin"), [0u8, 1, 2, 3]).unwrap();
        dir
    }

    #[test]
    fn test_hash_data_is_deterministic() {
        let engine = HashEngine::new(HashAlgorithm::Blake3);
        assert_eq!(engine.hash_data(b"test input data"), engine.hash_data(b"test input data"));
    }

    #[test]
    fn test_hash_data_discriminates_inputs() {
        let engine = HashEngine::default();
        assert_ne!(
            engine.hash_data(b"test input data"),
            engine.hash_data(b"different input data")
        );
    }

    #[test]
    fn test_algorithms_produce_different_digests() {
        let blake = HashEngine::new(HashAlgorithm::Blake3).hash_data(b"test data");
        let sha = HashEngine::new(HashAlgorithm::Sha256).hash_data(b"test data");
        assert_ne!(blake, sha);
        assert_eq!(blake.len(), 64);
        assert_eq!(sha.len(), 64);
        assert!(blake.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_known_sha256_vector() {
        let engine = HashEngine::new(HashAlgorithm::Sha256);
        assert_eq!(
            engine.hash_data(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_parse_algorithm() {
        assert_eq!("blake3".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Blake3);
        assert_eq!("SHA256".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha256);

        let err = "md5".parse::<HashAlgorithm>().unwrap_err();
        assert!(matches!(err, HashError::UnsupportedAlgorithm(ref name) if name == "md5"));
        assert!(err.to_string().contains("md5"));
    }

    #[test]
    fn test_hash_file_matches_hash_data() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("payload");
        let content = vec![7u8; READ_BUFFER_SIZE * 2 + 13];
        fs::write(&path, &content).unwrap();

        for algorithm in [HashAlgorithm::Blake3, HashAlgorithm::Sha256] {
            let engine = HashEngine::new(algorithm);
            assert_eq!(engine.hash_file(&path).unwrap(), engine.hash_data(&content));
        }
    }

    #[test]
    fn test_hash_file_missing() {
        let engine = HashEngine::default();
        let result = engine.hash_file("/nonexistent/taskvault/file");
        assert!(matches!(result, Err(HashError::Io { .. })));
    }

    #[test]
    fn test_hash_directory_is_stable() {
        let tree = sample_tree();
        let engine = HashEngine::default();
        assert_eq!(
            engine.hash_directory(tree.path()).unwrap(),
            engine.hash_directory(tree.path()).unwrap()
        );
    }

    #[test]
    fn test_hash_directory_independent_of_creation_order() {
        let first = TempDir::new().unwrap();
        fs::write(first.path().join("b"), b"2").unwrap();
        fs::write(first.path().join("a"), b"1").unwrap();
        fs::write(first.path().join("c"), b"3").unwrap();

        let second = TempDir::new().unwrap();
        fs::write(second.path().join("c"), b"3").unwrap();
        fs::write(second.path().join("a"), b"1").unwrap();
        fs::write(second.path().join("b"), b"2").unwrap();

        let engine = HashEngine::default();
        assert_eq!(
            engine.hash_directory(first.path()).unwrap(),
            engine.hash_directory(second.path()).unwrap()
        );
    }

    #[test]
    fn test_hash_directory_detects_changes() {
        let tree = sample_tree();
        let engine = HashEngine::default();
        let original = engine.hash_directory(tree.path()).unwrap();

        // content edit
        fs::write(tree.path().join("a.txt"), b"alphA").unwrap();
        let edited = engine.hash_directory(tree.path()).unwrap();
        assert_ne!(original, edited);

        // rename
        fs::rename(tree.path().join("a.txt"), tree.path().join("b.txt")).unwrap();
        let renamed = engine.hash_directory(tree.path()).unwrap();
        assert_ne!(edited, renamed);

        // addition
        fs::create_dir(tree.path().join("empty")).unwrap();
        let added = engine.hash_directory(tree.path()).unwrap();
        assert_ne!(renamed, added);

        // deletion
        fs::remove_file(tree.path().join("src/nested/z.bin")).unwrap();
        let removed = engine.hash_directory(tree.path()).unwrap();
        assert_ne!(added, removed);
    }

    #[test]
    fn test_hash_directory_uses_selected_algorithm() {
        let tree = sample_tree();
        let blake = HashEngine::new(HashAlgorithm::Blake3)
            .hash_directory(tree.path())
            .unwrap();
        let sha = HashEngine::new(HashAlgorithm::Sha256)
            .hash_directory(tree.path())
            .unwrap();
        assert_ne!(blake, sha);
    }
}
