use std::{
    fs::File,
    io::{self, BufReader, Read},
    path::Path,
};

use hex::encode;
use log::warn;
use sha2::{Digest, Sha256};

/// Computes the two fingerprints the sync engine keys on: the identity of a
/// path and the hash of a file's bytes. Both are hex-encoded SHA-256 digests.
pub struct Hash;

impl Hash {
    /// Length, in characters, of every token produced by this module.
    pub const TOKEN_LEN: usize = 64;

    /// Stable identity for an absolute path. Pure: the same path always yields
    /// the same token, on any machine and across restarts.
    pub fn identity_of(absolute_path: &Path) -> String {
        let path_str = absolute_path.to_string_lossy();
        encode(Sha256::digest(path_str.as_bytes()))
    }

    /// Hash of the file's content, or `None` if the file can't be read right now.
    ///
    /// Unreadable files are routine during a scan (permissions, a delete racing
    /// the read, a dangling link), so the failure is logged and folded into
    /// `None` rather than surfaced as an error.
    pub fn content_hash_of(absolute_path: &Path) -> Option<String> {
        match Hash::compute_sha2_hash(absolute_path) {
            Ok(hash) => Some(hash),
            Err(e) => {
                warn!(
                    "Unable to hash '{}': {} (kind: {:?})",
                    absolute_path.display(),
                    e,
                    e.kind()
                );
                None
            }
        }
    }

    fn compute_sha2_hash(path: &Path) -> Result<String, io::Error> {
        let f = File::open(path)?;
        let mut reader = BufReader::new(f);
        let mut hasher = Sha256::new();
        let mut buffer = [0; 8192]; // Read in 8KB chunks

        loop {
            let bytes_read = reader.read(&mut buffer)?;
            if bytes_read == 0 {
                break;
            }
            hasher.update(&buffer[..bytes_read]);
        }

        Ok(encode(hasher.finalize()))
    }

    pub fn short_hash(hash: Option<&str>) -> &str {
        match hash {
            Some(hash) => &hash[..hash.len().min(7)],
            None => "-",
        }
    }
}
