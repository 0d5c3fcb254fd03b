use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;

use crate::error::Result;

/// Read a typed document, falling back to `T::default()` on any failure —
/// missing file, unparseable JSON, or a shape mismatch. Failures other than
/// "file does not exist" are logged; a missing file is the expected steady
/// state for a document that hasn't been written yet and isn't worth a line.
pub fn read<T>(path: &Path) -> T
where
    T: Default + DeserializeOwned,
{
    match fs::read(path) {
        Ok(bytes) => match serde_json::from_slice(&bytes) {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to parse state document, using default");
                T::default()
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => T::default(),
        Err(err) => {
            tracing::warn!(path = %path.display(), error = %err, "failed to read state document, using default");
            T::default()
        }
    }
}

/// Write a document atomically: serialize to a sibling temp file in the same
/// directory, then rename over the target. The rename is what makes this
/// atomic — a crash mid-write never leaves a half-written document behind.
pub fn write<T>(path: &Path, value: &T) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let bytes = serde_json::to_vec_pretty(value)?;
    let tmp_name = format!(
        ".{}.tmp-{}",
        path.file_name().and_then(|n| n.to_str()).unwrap_or("state"),
        uuid::Uuid::new_v4().simple()
    );
    let tmp_path = path.with_file_name(tmp_name);
    fs::write(&tmp_path, &bytes)?;
    fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use tempfile::TempDir;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Doc {
        iteration: u64,
        label: String,
    }

    #[test]
    fn round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("doc.json");
        let doc = Doc { iteration: 3, label: "x".into() };
        write(&path, &doc).unwrap();
        let read_back: Doc = read(&path);
        assert_eq!(read_back, doc);
    }

    #[test]
    fn missing_file_returns_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("absent.json");
        let read_back: Doc = read(&path);
        assert_eq!(read_back, Doc::default());
    }

    #[test]
    fn corrupt_file_returns_default() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        fs::write(&path, b"{not json").unwrap();
        let read_back: Doc = read(&path);
        assert_eq!(read_back, Doc::default());
    }

    #[test]
    fn no_tmp_file_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("doc.json");
        write(&path, &Doc::default()).unwrap();
        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp-"))
            .collect();
        assert!(leftovers.is_empty());
    }
}
