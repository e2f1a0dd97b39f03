use std::{fs, path::Path};

use sha2::{Digest, Sha256};

use crate::error::{HashError, HashResult};

/// Calculates the sha256 digest of a byte slice as a lowercase hex string.
///
/// # Example
///
/// ```
/// use depot_utils::hash::sha256_hex;
///
/// let digest = sha256_hex(b"hello world\n");
/// assert_eq!(
///     digest,
///     "a948904f2f0f479b8f8197694b30184b0d2ed1c1cd2a1ec0fb85d299a192a447"
/// );
/// ```
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Calculates the sha256 checksum of a file.
///
/// # Errors
///
/// * [`HashError::ReadFailed`] if the file cannot be read.
pub fn calculate_checksum<P: AsRef<Path>>(file_path: P) -> HashResult<String> {
    let file_path = file_path.as_ref();
    let content = fs::read(file_path).map_err(|err| {
        HashError::ReadFailed {
            path: file_path.to_path_buf(),
            source: err,
        }
    })?;
    Ok(sha256_hex(&content))
}

/// Checks that `data` hashes to `expected`.
///
/// The comparison is exact: the expected value must be the lowercase hex digest
/// as published by the repository. No case folding or trimming is applied.
pub fn verify_sha256(data: &[u8], expected: &str) -> bool {
    sha256_hex(data) == expected
}
