//! SHA-256 hashing for exported report files.
//!
//! Reports are hashed twice: once from memory when the receipt is written, and
//! later from disk when an operator verifies the file. Both paths must agree,
//! so they share the hex encoding here.

use crate::error::{Result, ResultExt as _};
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{BufReader, Read as _};
use std::path::Path;

/// Buffer size for streaming file reads (8 KB).
const BUFFER_SIZE: usize = 8192;

/// Hash algorithm identifier used in receipts.
pub const HASH_ALGORITHM: &str = "SHA-256";

/// SHA-256 of an in-memory buffer as lowercase hex (64 characters).
pub fn digest_hex(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Compute SHA-256 of a file using streaming I/O.
///
/// # Errors
///
/// Returns error if the file can't be opened or read.
pub fn compute_file_hash(path: &Path) -> Result<String> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open file for hashing: {}", path.display()))?;

    let mut reader = BufReader::with_capacity(BUFFER_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; BUFFER_SIZE];

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .with_context(|| format!("Failed to read file: {}", path.display()))?;

        if bytes_read == 0 {
            break;
        }

        hasher.update(buffer.get(..bytes_read).unwrap_or_default());
    }

    Ok(format!("{:x}", hasher.finalize()))
}
