use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use walkdir::WalkDir;

/// Lexically normalize a path the way POSIX `normpath` does: collapse `.`
/// and `//`, resolve `..` against preceding segments, keep leading `..`
/// segments that cannot be resolved. Backslashes are converted first so
/// Windows-style separators in crafted archives are caught by the same
/// checks.
pub fn normalize_path(name: &str) -> String {
    let name = name.replace('\\', "/");
    let absolute = name.starts_with('/');
    let mut parts: Vec<&str> = Vec::new();
    for seg in name.split('/') {
        match seg {
            "" | "." => continue,
            ".." => {
                if matches!(parts.last(), Some(&p) if p != "..") {
                    parts.pop();
                } else if !absolute {
                    parts.push("..");
                }
            }
            seg => parts.push(seg),
        }
    }
    let joined = parts.join("/");
    if absolute {
        format!("/{joined}")
    } else if joined.is_empty() {
        ".".to_string()
    } else {
        joined
    }
}

/// Normalize an untrusted relative path and reject traversal attempts.
///
/// Returns `None` for names that are empty, collapse to `.`, are absolute,
/// or still carry a `..` segment after normalization. Benign sequences like
/// `a/../b` normalize safely and are accepted.
pub fn sanitize_relative_path(raw: &str) -> Option<String> {
    let normalized = normalize_path(raw);
    if normalized.is_empty()
        || normalized == "."
        || normalized.starts_with('/')
        || normalized.starts_with("..")
        || normalized.contains("/../")
    {
        return None;
    }
    Some(normalized)
}

/// Blob storage abstraction: every path is a forward-slash storage key, never
/// a local filesystem path, so implementations can sit on any backend.
#[async_trait]
pub trait ContentStore: Send + Sync {
    async fn open(&self, path: &str) -> io::Result<Vec<u8>>;
    async fn save(&self, path: &str, data: &[u8]) -> io::Result<()>;
    /// Deleting a missing key is not an error.
    async fn delete(&self, path: &str) -> io::Result<()>;
    async fn exists(&self, path: &str) -> bool;
    /// Recursively list file keys under a prefix. A missing prefix yields an
    /// empty list.
    async fn list_files(&self, prefix: &str) -> io::Result<Vec<String>>;
    /// Backend-native URL for redirect-mode serving. Backends without one
    /// return `ErrorKind::Unsupported`.
    fn url(&self, path: &str) -> io::Result<String>;
}

/// Filesystem-backed store rooted at a single directory.
pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn full_path(&self, path: &str) -> PathBuf {
        let mut full = self.root.clone();
        for seg in path.split('/').filter(|s| !s.is_empty()) {
            full.push(seg);
        }
        full
    }

    /// Remove now-empty parent directories up to (not including) the root.
    fn prune_empty_dirs(&self, mut dir: &Path) {
        while dir.starts_with(&self.root) && dir != self.root {
            if std::fs::remove_dir(dir).is_err() {
                break;
            }
            match dir.parent() {
                Some(parent) => dir = parent,
                None => break,
            }
        }
    }
}

#[async_trait]
impl ContentStore for FsStore {
    async fn open(&self, path: &str) -> io::Result<Vec<u8>> {
        let full = self.full_path(path);
        if full.is_dir() {
            return Err(io::Error::new(io::ErrorKind::NotFound, "is a directory"));
        }
        tokio::fs::read(full).await
    }

    async fn save(&self, path: &str, data: &[u8]) -> io::Result<()> {
        let full = self.full_path(path);
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(full, data).await
    }

    async fn delete(&self, path: &str) -> io::Result<()> {
        let full = self.full_path(path);
        match tokio::fs::remove_file(&full).await {
            Ok(()) => {
                if let Some(parent) = full.parent() {
                    self.prune_empty_dirs(parent);
                }
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn exists(&self, path: &str) -> bool {
        self.full_path(path).is_file()
    }

    async fn list_files(&self, prefix: &str) -> io::Result<Vec<String>> {
        let base = self.full_path(prefix);
        if !base.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&base) {
            let entry = entry.map_err(io::Error::other)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = entry
                .path()
                .strip_prefix(&base)
                .map_err(io::Error::other)?;
            let rel = rel
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            files.push(format!("{}/{}", prefix.trim_end_matches('/'), rel));
        }
        files.sort();
        Ok(files)
    }

    fn url(&self, _path: &str) -> io::Result<String> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "filesystem store has no native URL",
        ))
    }
}
