use std::fs;
use std::path::{Path, PathBuf};

use surround_core::{ErrorInfo, SurroundError};
use walkdir::WalkDir;

use crate::driver::{
    already_exists, io_error, normalize_key, not_found, source_bytes, write_local, PushSource,
    StorageDriver,
};

/// Driver over a directory on the local filesystem.
#[derive(Debug, Clone)]
pub struct LocalDriver {
    url: String,
    root: PathBuf,
}

impl LocalDriver {
    /// Opens `root`, creating it when missing.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self, SurroundError> {
        let root = root.into();
        fs::create_dir_all(&root).map_err(|err| io_error("surround.store.local_root", err, &root))?;
        Ok(Self {
            url: root.display().to_string(),
            root,
        })
    }

    /// The directory backing the store.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, remote: &str) -> Result<PathBuf, SurroundError> {
        let key = normalize_key(remote)?;
        Ok(key
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.root.clone(), |path, segment| path.join(segment)))
    }
}

impl StorageDriver for LocalDriver {
    fn url(&self) -> &str {
        &self.url
    }

    fn pull(&self, remote: &str) -> Result<Vec<u8>, SurroundError> {
        let path = self.resolve(remote)?;
        if !path.is_file() {
            return Err(not_found("surround.store.pull", remote));
        }
        fs::read(&path).map_err(|err| io_error("surround.store.read", err, &path))
    }

    fn push(&self, remote: &str, source: PushSource<'_>, override_ok: bool) -> Result<(), SurroundError> {
        let path = self.resolve(remote)?;
        if path == self.root {
            return Err(SurroundError::Storage(
                ErrorInfo::new("surround.store.key", "cannot push to the store root").with_context("key", remote),
            ));
        }
        if !override_ok && path.exists() {
            return Err(already_exists("surround.store.push", remote));
        }
        let bytes = source_bytes(source)?;
        write_local(&path, &bytes)
    }

    fn delete(&self, remote: &str) -> Result<(), SurroundError> {
        let path = self.resolve(remote)?;
        if !path.exists() || path == self.root {
            return Err(not_found("surround.store.delete", remote));
        }
        if path.is_dir() {
            fs::remove_dir_all(&path).map_err(|err| io_error("surround.store.delete", err, &path))
        } else {
            fs::remove_file(&path).map_err(|err| io_error("surround.store.delete", err, &path))
        }
    }

    fn exists(&self, remote: &str) -> bool {
        self.resolve(remote).map(|path| path.exists()).unwrap_or(false)
    }

    fn get_files(&self, base: Option<&str>) -> Result<Vec<String>, SurroundError> {
        let dir = match base {
            Some(base) => self.resolve(base)?,
            None => self.root.clone(),
        };
        if !dir.is_dir() {
            return Ok(Vec::new());
        }
        let mut files = Vec::new();
        for entry in WalkDir::new(&dir).sort_by_file_name() {
            let entry = entry.map_err(|err| {
                SurroundError::Storage(
                    ErrorInfo::new("surround.store.walk", err.to_string())
                        .with_context("path", dir.display().to_string()),
                )
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&dir) {
                let key: Vec<String> = relative
                    .components()
                    .map(|part| part.as_os_str().to_string_lossy().into_owned())
                    .collect();
                files.push(key.join("/"));
            }
        }
        files.sort();
        Ok(files)
    }
}
