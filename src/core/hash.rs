use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::{self, BufReader};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HashError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Checksums compared against the ones a catalog reports.
pub struct HashService;

impl HashService {
    pub fn new() -> Self {
        Self
    }

    /// SHA-256 of the file content, lowercase hex.
    pub fn compute_content_hash(&self, file_path: &Path) -> Result<String, HashError> {
        let mut reader = BufReader::with_capacity(64 * 1024, File::open(file_path)?);
        let mut hasher = Sha256::new();
        io::copy(&mut reader, &mut hasher)?;
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Catalogs may report hex checksums in either case.
    pub fn same_checksum(local: &str, remote: &str) -> bool {
        local.eq_ignore_ascii_case(remote.trim())
    }
}

impl Default for HashService {
    fn default() -> Self {
        Self::new()
    }
}
