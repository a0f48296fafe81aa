use serde::{Deserialize, Serialize};

/// BLAKE3 hash used for package identity, manifests, and revisions.
///
/// Stored as 64 lowercase hex characters. Every revision in keel (recipe
/// revision, package revision, package identity) is one of these, so two
/// artifacts with the same hash are interchangeable by construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Blake3Hash(String);

impl Blake3Hash {
    /// Create a new `Blake3Hash` from a raw hex string (64 hex chars).
    pub fn new(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    /// Compute BLAKE3 hash of data.
    pub fn compute(data: &[u8]) -> Self {
        let hash = blake3::hash(data);
        Self(hash.to_hex().to_string())
    }

    /// Compute BLAKE3 hash of a file, streaming in 64KB chunks.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read.
    pub fn compute_file(path: &std::path::Path) -> std::io::Result<Self> {
        use std::io::Read;

        let mut file = std::fs::File::open(path)?;
        let mut hasher = blake3::Hasher::new();
        let mut buffer = [0u8; 65536];

        loop {
            let bytes_read = file.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(Self(hasher.finalize().to_hex().to_string()))
    }

    /// Return the inner hex string as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Shortened display form (first 12 hex chars) for log lines.
    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl std::fmt::Display for Blake3Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for Blake3Hash {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Blake3Hash {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}
