//! Zip packaging of project code and models, and model hashing.

use std::fs::{self, File};
use std::io::{self, Cursor, Read, Seek, Write};
use std::path::{Component, Path, PathBuf};

use sha1::{Digest, Sha1};
use surround_core::{ErrorInfo, SurroundError};
use walkdir::{DirEntry, WalkDir};
use zip::write::FileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

/// Directories left out of the code snapshot.
pub const CODE_SKIP_DIRS: [&str; 4] = ["models", "output", "logs", "__pycache__"];

/// Files left out of the code snapshot.
pub const CODE_SKIP_FILES: [&str; 5] = [
    "log.txt",
    ".doit.db",
    ".doit.db.bak",
    ".doit.db.dat",
    ".doit.db.dir",
];

/// Archive members ignored when hashing a model archive.
pub const MODEL_HASH_SKIP: [&str; 1] = ["manifest.yaml"];

const HASH_BLOCK_SIZE: u64 = 256 * 1024 * 1024;

fn archive_error(code: &str, err: impl ToString) -> SurroundError {
    SurroundError::Serde(ErrorInfo::new(code, err.to_string()))
}

fn io_error(code: &str, err: io::Error, path: &Path) -> SurroundError {
    SurroundError::Storage(ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()))
}

fn options() -> FileOptions {
    FileOptions::default().compression_method(CompressionMethod::Deflated)
}

/// Archive member name of `path` relative to `base`, with forward slashes.
fn member_name(path: &Path, base: &Path) -> Option<String> {
    let relative = path.strip_prefix(base).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|part| part.as_os_str().to_string_lossy().into_owned())
        .collect();
    (!parts.is_empty()).then(|| parts.join("/"))
}

fn is_skipped_dir(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry.file_type().is_dir()
        && CODE_SKIP_DIRS.iter().any(|skip| entry.file_name() == *skip)
}

fn zip_files<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    files: &[(String, PathBuf)],
) -> Result<(), SurroundError> {
    for (name, path) in files {
        writer
            .start_file(name.as_str(), options())
            .map_err(|err| archive_error("surround.exp.zip_entry", err))?;
        let mut file = File::open(path).map_err(|err| io_error("surround.exp.zip_read", err, path))?;
        io::copy(&mut file, writer).map_err(|err| io_error("surround.exp.zip_write", err, path))?;
    }
    Ok(())
}

fn write_archive(dest: &Path, files: &[(String, PathBuf)]) -> Result<(), SurroundError> {
    let file = File::create(dest).map_err(|err| io_error("surround.exp.zip_create", err, dest))?;
    let mut writer = ZipWriter::new(file);
    zip_files(&mut writer, files)?;
    writer
        .finish()
        .map_err(|err| archive_error("surround.exp.zip_finish", err))?;
    Ok(())
}

/// Zips the project source tree at `root` into `dest`, leaving out
/// [`CODE_SKIP_DIRS`] and [`CODE_SKIP_FILES`]. Returns the member count.
pub fn package_code(root: &Path, dest: &Path) -> Result<usize, SurroundError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| !is_skipped_dir(entry))
    {
        let entry = entry.map_err(|err| archive_error("surround.exp.walk", err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if CODE_SKIP_FILES.iter().any(|skip| entry.file_name() == *skip) {
            continue;
        }
        if entry.path() == dest {
            continue;
        }
        if let Some(name) = member_name(entry.path(), root) {
            files.push((name, entry.into_path()));
        }
    }
    write_archive(dest, &files)?;
    Ok(files.len())
}

/// Zips `root/models` into `dest` with members named `models/...`.
///
/// Returns `false` without writing anything when the directory is missing or
/// holds no files.
pub fn package_models(root: &Path, dest: &Path) -> Result<bool, SurroundError> {
    let models = root.join("models");
    if !models.is_dir() {
        return Ok(false);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(&models).sort_by_file_name() {
        let entry = entry.map_err(|err| archive_error("surround.exp.walk", err))?;
        if !entry.file_type().is_file() {
            continue;
        }
        if let Some(name) = member_name(entry.path(), root) {
            files.push((name, entry.into_path()));
        }
    }
    if files.is_empty() {
        return Ok(false);
    }
    write_archive(dest, &files)?;
    Ok(true)
}

/// SHA-1 of the archive at `path`; see [`hash_archive`].
pub fn hash_zip(path: &Path, skip: &[&str]) -> Result<String, SurroundError> {
    let file = File::open(path).map_err(|err| io_error("surround.exp.hash_open", err, path))?;
    hash_archive(file, skip)
}

/// SHA-1 over member contents in sorted member-name order, ignoring members
/// named in `skip` and directory entries. Container metadata (timestamps,
/// compression) does not affect the result.
pub fn hash_archive<R: Read + Seek>(reader: R, skip: &[&str]) -> Result<String, SurroundError> {
    let mut archive = ZipArchive::new(reader).map_err(|err| archive_error("surround.exp.hash_archive", err))?;
    let mut names: Vec<String> = archive
        .file_names()
        .filter(|name| !name.ends_with('/') && !is_skipped_member(name, skip))
        .map(str::to_string)
        .collect();
    names.sort();

    let mut hasher = Sha1::new();
    let mut block = Vec::new();
    for name in &names {
        let mut member = archive
            .by_name(name)
            .map_err(|err| archive_error("surround.exp.hash_member", err))?;
        loop {
            block.clear();
            let read = (&mut member)
                .take(HASH_BLOCK_SIZE)
                .read_to_end(&mut block)
                .map_err(|err| archive_error("surround.exp.hash_read", err))?;
            if read == 0 {
                break;
            }
            hasher.update(&block);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// A member is skipped when its full name or its file name is listed.
fn is_skipped_member(name: &str, skip: &[&str]) -> bool {
    let file_name = name.rsplit('/').next().unwrap_or(name);
    skip.iter().any(|listed| *listed == name || *listed == file_name)
}

/// Extracts every member of the zip held in `bytes` under `dest`.
///
/// Members whose names would escape `dest` are skipped.
pub fn extract_bytes(bytes: &[u8], dest: &Path) -> Result<usize, SurroundError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|err| archive_error("surround.exp.extract_archive", err))?;
    let mut count = 0;
    for index in 0..archive.len() {
        let mut member = archive
            .by_index(index)
            .map_err(|err| archive_error("surround.exp.extract_member", err))?;
        let Some(relative) = member.enclosed_name().map(Path::to_path_buf) else {
            continue;
        };
        let target = dest.join(relative);
        if member.is_dir() {
            fs::create_dir_all(&target).map_err(|err| io_error("surround.exp.extract_dir", err, &target))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|err| io_error("surround.exp.extract_dir", err, parent))?;
        }
        let mut out = File::create(&target).map_err(|err| io_error("surround.exp.extract_file", err, &target))?;
        io::copy(&mut member, &mut out).map_err(|err| io_error("surround.exp.extract_file", err, &target))?;
        count += 1;
    }
    Ok(count)
}

/// Member names and contents of the zip held in `bytes`.
pub fn read_members(bytes: &[u8]) -> Result<Vec<(String, Vec<u8>)>, SurroundError> {
    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|err| archive_error("surround.exp.read_archive", err))?;
    let mut members = Vec::new();
    for index in 0..archive.len() {
        let mut member = archive
            .by_index(index)
            .map_err(|err| archive_error("surround.exp.read_member", err))?;
        if member.is_dir() {
            continue;
        }
        let mut contents = Vec::new();
        member
            .read_to_end(&mut contents)
            .map_err(|err| archive_error("surround.exp.read_member", err))?;
        members.push((member.name().to_string(), contents));
    }
    Ok(members)
}

/// Builds a zip in memory from named byte buffers.
pub struct ZipBuilder {
    writer: ZipWriter<Cursor<Vec<u8>>>,
}

impl Default for ZipBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ZipBuilder {
    /// Starts an empty archive.
    pub fn new() -> Self {
        Self {
            writer: ZipWriter::new(Cursor::new(Vec::new())),
        }
    }

    /// Adds a member. Names are normalised to forward slashes.
    pub fn add(&mut self, name: &str, contents: &[u8]) -> Result<(), SurroundError> {
        let name = normalise_member(name)
            .ok_or_else(|| archive_error("surround.exp.zip_name", format!("invalid member name '{name}'")))?;
        self.writer
            .start_file(name, options())
            .map_err(|err| archive_error("surround.exp.zip_entry", err))?;
        self.writer
            .write_all(contents)
            .map_err(|err| archive_error("surround.exp.zip_entry", err))
    }

    /// Finishes the archive and returns its bytes.
    pub fn finish(mut self) -> Result<Vec<u8>, SurroundError> {
        let cursor = self
            .writer
            .finish()
            .map_err(|err| archive_error("surround.exp.zip_finish", err))?;
        Ok(cursor.into_inner())
    }
}

fn normalise_member(name: &str) -> Option<String> {
    let path = PathBuf::from(name.replace('\\', "/"));
    let mut parts = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => parts.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => return None,
        }
    }
    (!parts.is_empty()).then(|| parts.join("/"))
}
