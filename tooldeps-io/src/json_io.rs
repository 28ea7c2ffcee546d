// tooldeps-io/src/json_io.rs
use std::path::Path;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tooldeps_common::error::{DepsError, Result};
use tracing::debug;

/// Writes serializable data to a JSON file (pretty-printed), atomically.
pub fn write_json_sync<T: Serialize>(path: &Path, data: &T) -> Result<()> {
    debug!("Writing JSON to: {}", path.display());
    let json_bytes = serde_json::to_vec_pretty(data).map_err(|e| DepsError::Json(Arc::new(e)))?;
    crate::fs::atomic_write_file(path, &json_bytes)
}

pub fn read_json_sync<T: DeserializeOwned>(path: &Path) -> Result<T> {
    debug!("Reading JSON from: {}", path.display());
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    serde_json::from_reader(reader).map_err(|e| DepsError::Json(Arc::new(e)))
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    #[test]
    fn writes_then_reads_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join("installed.json");
        let mut data = BTreeMap::new();
        data.insert("samtools".to_string(), "1.3.1".to_string());
        write_json_sync(&path, &data).unwrap();
        let back: BTreeMap<String, String> = read_json_sync(&path).unwrap();
        assert_eq!(back, data);
    }

    #[test]
    fn malformed_json_is_a_json_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        let err = read_json_sync::<BTreeMap<String, String>>(&path).unwrap_err();
        assert!(matches!(err, DepsError::Json(_)));
    }
}
