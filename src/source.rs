//! `SourceFileManager` — reads, decodes, and caches source files, and
//! exposes line-oriented slicing used by the context analyzer and the patch
//! applier.

use crate::error::FileAccessError;
use crate::model::FileEncoding;
use crate::util::resolve_path_in_root;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::SystemTime;

struct CacheEntry {
    text: String,
    encoding: FileEncoding,
    mtime: SystemTime,
}

struct Cache {
    entries: HashMap<PathBuf, CacheEntry>,
    /// Insertion order, used for LRU-by-insertion eviction.
    order: Vec<PathBuf>,
    capacity: usize,
}

impl Cache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: Vec::new(),
            capacity,
        }
    }

    fn insert(&mut self, path: PathBuf, entry: CacheEntry) {
        if !self.entries.contains_key(&path) {
            self.order.push(path.clone());
        }
        self.entries.insert(path, entry);
        while self.order.len() > self.capacity {
            let oldest = self.order.remove(0);
            self.entries.remove(&oldest);
        }
    }

    fn invalidate(&mut self, path: &Path) {
        self.entries.remove(path);
        self.order.retain(|p| p != path);
    }
}

/// Reads, decodes, and caches source files under a fixed `project_root`.
/// File-level failures never crash the pipeline: callers downgrade a
/// `FileAccessError` into "no context for this defect" rather than
/// propagating a panic.
pub struct SourceFileManager {
    project_root: PathBuf,
    max_file_bytes: u64,
    cache: Mutex<Cache>,
}

impl SourceFileManager {
    pub fn new(project_root: PathBuf, max_file_bytes: u64, cache_capacity: usize) -> Self {
        Self {
            project_root,
            max_file_bytes,
            cache: Mutex::new(Cache::new(cache_capacity)),
        }
    }

    /// Read and decode a file, using the cache when the on-disk mtime has
    /// not changed since the cached read.
    pub fn read_file(&self, path: &Path) -> Result<(String, FileEncoding), FileAccessError> {
        let resolved = resolve_path_in_root(&self.project_root, path)
            .map_err(|_| FileAccessError::OutsideRoot(path.to_path_buf()))?;

        let metadata = std::fs::metadata(&resolved).map_err(|_| FileAccessError::NotFound(resolved.clone()))?;

        if metadata.len() > self.max_file_bytes {
            return Err(FileAccessError::TooLarge {
                path: resolved,
                size: metadata.len(),
            });
        }

        let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        {
            let cache = self.cache.lock().expect("source cache poisoned");
            if let Some(entry) = cache.entries.get(&resolved) {
                if entry.mtime == mtime {
                    return Ok((entry.text.clone(), entry.encoding));
                }
            }
        }

        let bytes = std::fs::read(&resolved).map_err(|e| FileAccessError::Unreadable {
            path: resolved.clone(),
            reason: e.to_string(),
        })?;

        let (text, encoding) = decode(&bytes);

        let mut cache = self.cache.lock().expect("source cache poisoned");
        cache.insert(
            resolved.clone(),
            CacheEntry {
                text: text.clone(),
                encoding,
                mtime,
            },
        );

        Ok((text, encoding))
    }

    /// 1-based inclusive line range. Out-of-bounds requests are clamped to
    /// file bounds rather than erroring; `clamped` reports whether that
    /// happened so callers can record a warning.
    pub fn get_line_range(
        &self,
        path: &Path,
        start: usize,
        end: usize,
    ) -> Result<(String, bool), FileAccessError> {
        let (text, _encoding) = self.read_file(path)?;
        let lines: Vec<&str> = text.lines().collect();
        let total = lines.len();

        let clamped_start = start.max(1).min(total.max(1));
        let clamped_end = end.max(clamped_start).min(total.max(1));
        let clamped = clamped_start != start || clamped_end != end;

        if total == 0 {
            return Ok((String::new(), clamped));
        }

        let slice = &lines[(clamped_start - 1)..clamped_end.min(total)];
        Ok((slice.join("\n"), clamped))
    }

    pub fn line_count(&self, path: &Path) -> Result<usize, FileAccessError> {
        let (text, _encoding) = self.read_file(path)?;
        Ok(text.lines().count())
    }

    /// Drop a path from the cache. Must be called after a patch writes to
    /// `path`, since the cache is write-agnostic otherwise.
    pub fn invalidate(&self, path: &Path) {
        if let Ok(resolved) = resolve_path_in_root(&self.project_root, path) {
            let mut cache = self.cache.lock().expect("source cache poisoned");
            cache.invalidate(&resolved);
        }
    }
}

/// Attempt UTF-8 strict, then ASCII, then fall back to treating the bytes as
/// Latin-1 (which can represent any byte sequence, so it never fails).
/// A dedicated `chardet`-style statistical detector is not wired in; the
/// strict-decode chain below covers the overwhelming majority of C/C++
/// source encountered in practice.
fn decode(bytes: &[u8]) -> (String, FileEncoding) {
    if let Ok(text) = std::str::from_utf8(bytes) {
        return (text.to_string(), FileEncoding::Utf8);
    }
    if bytes.iter().all(|b| b.is_ascii()) {
        return (String::from_utf8_lossy(bytes).to_string(), FileEncoding::Ascii);
    }
    let text: String = bytes.iter().map(|&b| b as char).collect();
    (text, FileEncoding::Latin1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_file_rejects_outside_root() {
        let dir = tempfile::tempdir().unwrap();
        let manager = SourceFileManager::new(dir.path().to_path_buf(), 1024 * 1024, 8);
        let result = manager.read_file(Path::new("../../etc/passwd"));
        assert!(result.is_err());
    }

    #[test]
    fn test_read_file_caches_and_rereads() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("foo.c"), "int main() {}\n").unwrap();
        let manager = SourceFileManager::new(dir.path().to_path_buf(), 1024 * 1024, 8);
        let (text1, enc1) = manager.read_file(Path::new("foo.c")).unwrap();
        let (text2, _) = manager.read_file(Path::new("foo.c")).unwrap();
        assert_eq!(text1, text2);
        assert_eq!(enc1, FileEncoding::Utf8);
    }

    #[test]
    fn test_get_line_range_clamps() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("foo.c"), "a\nb\nc\n").unwrap();
        let manager = SourceFileManager::new(dir.path().to_path_buf(), 1024 * 1024, 8);
        let (slice, clamped) = manager.get_line_range(Path::new("foo.c"), 1, 100).unwrap();
        assert_eq!(slice, "a\nb\nc");
        assert!(clamped);
    }

    #[test]
    fn test_invalidate_forces_reread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("foo.c");
        std::fs::write(&path, "v1\n").unwrap();
        let manager = SourceFileManager::new(dir.path().to_path_buf(), 1024 * 1024, 8);
        let (text, _) = manager.read_file(Path::new("foo.c")).unwrap();
        assert_eq!(text.trim(), "v1");

        manager.invalidate(Path::new("foo.c"));
        std::thread::sleep(std::time::Duration::from_millis(10));
        std::fs::write(&path, "v2\n").unwrap();
        let (text2, _) = manager.read_file(Path::new("foo.c")).unwrap();
        assert_eq!(text2.trim(), "v2");
    }

    #[test]
    fn test_rejects_file_too_large() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("big.c"), vec![b'a'; 100]).unwrap();
        let manager = SourceFileManager::new(dir.path().to_path_buf(), 10, 8);
        let result = manager.read_file(Path::new("big.c"));
        assert!(matches!(result, Err(FileAccessError::TooLarge { .. })));
    }
}
