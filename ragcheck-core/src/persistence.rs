//! Durable file encodings for checkpoints.
//!
//! Every write goes to a `.tmp` sibling, is flushed to disk, then renamed over
//! the target, so a reader only ever sees a complete old file or a complete
//! new one. The primary encoding is JSON prefixed by a `sha256:<hex>` line
//! covering the body bytes; the backup encoding is plain YAML.

use crate::error::CheckpointError;
use serde::Serialize;
use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

const CHECKSUM_PREFIX: &str = "sha256:";

/// Hex-encoded SHA-256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let digest = Sha256::digest(data);
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Atomically write raw bytes to a file, creating parent directories.
pub fn atomic_write(path: &Path, data: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = tmp_path(path);
    {
        let mut file = std::fs::File::create(&tmp)?;
        file.write_all(data)?;
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)
}

fn write_err(path: &Path, source: io::Error) -> CheckpointError {
    CheckpointError::Write {
        path: path.to_path_buf(),
        source,
    }
}

fn decode_err(path: &Path, message: impl ToString) -> CheckpointError {
    CheckpointError::Decode {
        path: path.to_path_buf(),
        message: message.to_string(),
    }
}

/// Read a file, mapping "not found" to `Ok(None)`.
fn read_optional(path: &Path) -> Result<Option<String>, CheckpointError> {
    match std::fs::read_to_string(path) {
        Ok(content) => Ok(Some(content)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(CheckpointError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

/// Write `data` as pretty JSON behind a checksum header line.
pub fn write_checksummed_json<T: Serialize>(path: &Path, data: &T) -> Result<(), CheckpointError> {
    let body = serde_json::to_string_pretty(data).map_err(|e| CheckpointError::Encode {
        message: e.to_string(),
    })?;
    let content = format!("{CHECKSUM_PREFIX}{}\n{body}", sha256_hex(body.as_bytes()));
    atomic_write(path, content.as_bytes()).map_err(|e| write_err(path, e))
}

/// Read a file written by [`write_checksummed_json`].
///
/// Returns `Ok(None)` if the file doesn't exist and an error if the header is
/// missing, the checksum doesn't match or the body doesn't decode.
pub fn read_checksummed_json<T: DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, CheckpointError> {
    let Some(content) = read_optional(path)? else {
        return Ok(None);
    };
    let (header, body) = content
        .split_once('\n')
        .ok_or_else(|| decode_err(path, "missing checksum header"))?;
    let expected = header
        .strip_prefix(CHECKSUM_PREFIX)
        .ok_or_else(|| decode_err(path, "missing checksum header"))?;
    if sha256_hex(body.as_bytes()) != expected.trim() {
        return Err(CheckpointError::ChecksumMismatch {
            path: path.to_path_buf(),
        });
    }
    serde_json::from_str(body)
        .map(Some)
        .map_err(|e| decode_err(path, e))
}

/// Atomically write `data` as YAML.
pub fn write_yaml<T: Serialize>(path: &Path, data: &T) -> Result<(), CheckpointError> {
    let yaml = serde_yaml::to_string(data).map_err(|e| CheckpointError::Encode {
        message: e.to_string(),
    })?;
    atomic_write(path, yaml.as_bytes()).map_err(|e| write_err(path, e))
}

/// Load YAML from a file. Returns `Ok(None)` if the file doesn't exist.
pub fn read_yaml<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, CheckpointError> {
    let Some(content) = read_optional(path)? else {
        return Ok(None);
    };
    serde_yaml::from_str(&content)
        .map(Some)
        .map_err(|e| decode_err(path, e))
}
