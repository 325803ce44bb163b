use std::fs;
use std::io::Write;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

/// Write JSON to `path` atomically: temp file in the destination directory,
/// flush + fsync, then rename over the target. Either the write fully
/// succeeds or the destination is left unchanged.
pub fn atomic_write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    // Temp file must live in the same directory so the rename stays on one
    // filesystem.
    let mut tmp = tempfile::Builder::new()
        .prefix(&format!(
            "{}.",
            path.file_name().and_then(|n| n.to_str()).unwrap_or("artifact")
        ))
        .suffix(".tmp")
        .tempfile_in(parent)?;

    serde_json::to_writer_pretty(tmp.as_file_mut(), value)?;
    tmp.as_file_mut().flush()?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Load JSON with graceful error handling.
///
/// Returns `None` for missing, unreadable, or corrupt files so callers can
/// treat bad artifacts as absent. Failures are logged, never raised.
pub fn load_json_safe<T: DeserializeOwned>(path: &Path, run_id: &str, file_type: &str) -> Option<T> {
    if !path.exists() {
        return None;
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) => {
            log::warn!(
                "Failed to read {} for run '{}' at {}: {}",
                file_type,
                run_id,
                path.display(),
                err
            );
            return None;
        }
    };

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(err) => {
            log::warn!(
                "Corrupt {} for run '{}' at {}: {}",
                file_type,
                run_id,
                path.display(),
                err
            );
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_atomic_write_then_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("meta.json");

        atomic_write_json(&path, &json!({"status": "running"})).unwrap();
        let value: serde_json::Value = load_json_safe(&path, "run-x", "meta").unwrap();
        assert_eq!(value["status"], "running");
    }

    #[test]
    fn test_atomic_write_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        atomic_write_json(&path, &json!({"v": 1})).unwrap();
        atomic_write_json(&path, &json!({"v": 2})).unwrap();

        let value: serde_json::Value = load_json_safe(&path, "run-x", "state").unwrap();
        assert_eq!(value["v"], 2);

        // No stray temp files left behind.
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_load_json_safe_on_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.json");
        fs::write(&path, "{not json").unwrap();

        let value: Option<serde_json::Value> = load_json_safe(&path, "run-x", "meta");
        assert!(value.is_none());
    }

    #[test]
    fn test_load_json_safe_on_missing_file() {
        let dir = TempDir::new().unwrap();
        let value: Option<serde_json::Value> =
            load_json_safe(&dir.path().join("absent.json"), "run-x", "meta");
        assert!(value.is_none());
    }
}
