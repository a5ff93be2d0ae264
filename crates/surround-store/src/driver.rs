//! The storage driver contract and helpers shared by its implementations.

use std::fmt::Debug;
use std::fs;
use std::io;
use std::path::Path;

use surround_core::{ErrorInfo, SurroundError};

/// Content handed to [`StorageDriver::push`].
#[derive(Debug, Clone, Copy)]
pub enum PushSource<'a> {
    /// Upload the file at this local path.
    Path(&'a Path),
    /// Upload these bytes.
    Bytes(&'a [u8]),
}

/// Key-value blob store over a slash separated key namespace.
pub trait StorageDriver: Debug + Send + Sync {
    /// The URL or path the driver was opened with.
    fn url(&self) -> &str;

    /// Reads the blob stored at `remote`.
    fn pull(&self, remote: &str) -> Result<Vec<u8>, SurroundError>;

    /// Writes the blob stored at `remote` to `local`, creating parent
    /// directories. Fails with `AlreadyExists` when `local` exists and
    /// `override_ok` is false.
    fn pull_to(&self, remote: &str, local: &Path, override_ok: bool) -> Result<(), SurroundError> {
        if !override_ok && local.exists() {
            return Err(already_exists("surround.store.pull_target", local.display().to_string()));
        }
        let bytes = self.pull(remote)?;
        write_local(local, &bytes)
    }

    /// Stores a blob at `remote`. Fails with `AlreadyExists` when the key is
    /// present and `override_ok` is false.
    fn push(&self, remote: &str, source: PushSource<'_>, override_ok: bool) -> Result<(), SurroundError>;

    /// Removes a blob or every blob under a prefix.
    fn delete(&self, remote: &str) -> Result<(), SurroundError>;

    /// Whether a blob or prefix exists at `remote`.
    fn exists(&self, remote: &str) -> bool;

    /// Keys under `base` (or the whole store), relative to `base`, sorted.
    fn get_files(&self, base: Option<&str>) -> Result<Vec<String>, SurroundError>;

    /// Whether the driver talks to a remote object store.
    fn is_cloud(&self) -> bool {
        false
    }
}

/// Normalises a key to forward slashes without empty or `.` segments.
///
/// Parent segments (`..`) are rejected so keys cannot escape the store root.
pub fn normalize_key(remote: &str) -> Result<String, SurroundError> {
    let mut segments = Vec::new();
    for segment in remote.split(['/', '\\']) {
        match segment {
            "" | "." => {}
            ".." => {
                return Err(SurroundError::Storage(
                    ErrorInfo::new("surround.store.key", "keys may not contain '..'")
                        .with_context("key", remote),
                ))
            }
            other => segments.push(other),
        }
    }
    Ok(segments.join("/"))
}

/// Joins two key fragments with a single slash.
pub fn join_key(base: &str, rest: &str) -> String {
    match (base.trim_matches('/'), rest.trim_matches('/')) {
        ("", rest) => rest.to_string(),
        (base, "") => base.to_string(),
        (base, rest) => format!("{base}/{rest}"),
    }
}

pub(crate) fn not_found(code: &str, key: impl Into<String>) -> SurroundError {
    SurroundError::NotFound(ErrorInfo::new(code, "no such file or prefix").with_context("key", key))
}

pub(crate) fn already_exists(code: &str, key: impl Into<String>) -> SurroundError {
    SurroundError::AlreadyExists(
        ErrorInfo::new(code, "target already exists")
            .with_context("key", key)
            .with_hint("pass override_ok to replace it"),
    )
}

pub(crate) fn io_error(code: &str, err: io::Error, path: &Path) -> SurroundError {
    let info = ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string());
    match err.kind() {
        io::ErrorKind::NotFound => SurroundError::NotFound(info),
        io::ErrorKind::AlreadyExists => SurroundError::AlreadyExists(info),
        _ => SurroundError::Storage(info),
    }
}

/// Resolves a push source to bytes; a missing local file is `NotFound`.
pub(crate) fn source_bytes(source: PushSource<'_>) -> Result<Vec<u8>, SurroundError> {
    match source {
        PushSource::Bytes(bytes) => Ok(bytes.to_vec()),
        PushSource::Path(path) => fs::read(path).map_err(|err| io_error("surround.store.push_source", err, path)),
    }
}

pub(crate) fn write_local(path: &Path, bytes: &[u8]) -> Result<(), SurroundError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|err| io_error("surround.store.mkdir", err, parent))?;
    }
    fs::write(path, bytes).map_err(|err| io_error("surround.store.write", err, path))
}
