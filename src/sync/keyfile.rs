//! Line-delimited key list files.

use std::path::Path;

use bytes::Bytes;

use crate::error::{Result, SyncError};

/// Read a key list: one key per line, `\r\n` or `\n`, blank lines ignored.
pub async fn read_keys(path: &Path) -> Result<Vec<Bytes>> {
    let contents = tokio::fs::read(path).await.map_err(|e| {
        SyncError::KeyFile(format!("Unable to open key file {}: {}", path.display(), e))
    })?;
    Ok(parse_keys(&contents))
}

/// Split raw file contents into key names.
pub fn parse_keys(contents: &[u8]) -> Vec<Bytes> {
    contents
        .split(|&b| b == b'\n')
        .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
        .filter(|line| !line.iter().all(u8::is_ascii_whitespace))
        .map(Bytes::copy_from_slice)
        .collect()
}
