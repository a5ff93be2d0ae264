//! Read-only access to recorded projects and experiments.

use std::fs;
use std::path::Path;
use std::sync::Arc;

use surround_core::{Config, ErrorInfo, SurroundError};
use surround_store::{DriverRegistry, StorageDriver};
use tracing::{debug, warn};

use crate::archive::{self, ZipBuilder};
use crate::layout;
use crate::records::{ExecutionInfo, ExperimentRecord, ExperimentResults, ExperimentStatus, ProjectMeta};
use crate::serde::from_json_slice;
use crate::writer::open_storage;

/// Where [`ExperimentReader::replicate`] puts the bundle.
#[derive(Debug, Clone, Copy)]
pub enum ReplicateTarget<'a> {
    /// Extract the bundle into this directory.
    Directory(&'a Path),
    /// Write the bundle as a zip file at this path.
    Zip(&'a Path),
    /// Return the zip bytes.
    InMemory,
}

/// Reads the `experimentation/` tree written by
/// [`ExperimentWriter`](crate::ExperimentWriter).
#[derive(Debug, Clone)]
pub struct ExperimentReader {
    storage: Arc<dyn StorageDriver>,
}

impl ExperimentReader {
    /// Reader over `storage`.
    pub fn new(storage: Arc<dyn StorageDriver>) -> Self {
        Self { storage }
    }

    /// Reader over the driver for `url`, or `experiment.url` when `url` is `None`.
    pub fn open(url: Option<&str>, config: &Config, registry: &DriverRegistry) -> Result<Self, SurroundError> {
        Ok(Self::new(open_storage(url, config, registry)?))
    }

    /// The underlying driver.
    pub fn storage(&self) -> &Arc<dyn StorageDriver> {
        &self.storage
    }

    /// Metadata of every project, sorted by name.
    pub fn get_projects(&self) -> Result<Vec<ProjectMeta>, SurroundError> {
        let mut projects = Vec::new();
        for file in self.storage.get_files(Some(layout::ROOT))? {
            let Some((name, "project.json")) = file.split_once('/') else {
                continue;
            };
            if let Some(meta) = self.get_project(name)? {
                projects.push(meta);
            }
        }
        Ok(projects)
    }

    /// Whether `project.json` exists for `name`.
    pub fn has_project(&self, name: &str) -> bool {
        self.storage.exists(&layout::project_meta(name))
    }

    /// Metadata of one project.
    pub fn get_project(&self, name: &str) -> Result<Option<ProjectMeta>, SurroundError> {
        self.pull_json(&layout::project_meta(name))
    }

    /// Every experiment of `project`, newest first. `None` when the project
    /// does not exist.
    pub fn get_experiments(&self, project: &str) -> Result<Option<Vec<ExperimentRecord>>, SurroundError> {
        if !self.has_project(project) {
            return Ok(None);
        }
        let mut start_times: Vec<String> = self
            .storage
            .get_files(Some(&layout::experiments_dir(project)))?
            .into_iter()
            .filter_map(|file| {
                let (start_time, rest) = file.split_once('/')?;
                (rest == "execution_info.json").then(|| start_time.to_string())
            })
            .collect();
        start_times.sort_by(|a, b| b.cmp(a));
        let mut experiments = Vec::with_capacity(start_times.len());
        for start_time in start_times {
            if let Some(record) = self.get_experiment(project, &start_time)? {
                experiments.push(record);
            }
        }
        Ok(Some(experiments))
    }

    /// Whether the experiment directory exists.
    pub fn has_experiment(&self, project: &str, start_time: &str) -> bool {
        self.storage.exists(&layout::experiment_dir(project, start_time))
    }

    /// Parsed execution info, logs and results of one experiment.
    pub fn get_experiment(&self, project: &str, start_time: &str) -> Result<Option<ExperimentRecord>, SurroundError> {
        let key = |path: &str| layout::experiment_file(project, start_time, path);
        let Some(execution_info) = self.pull_json::<ExecutionInfo>(&key("execution_info.json"))? else {
            return Ok(None);
        };
        let logs = match self.pull_optional(&key("log.txt"))? {
            Some(bytes) => String::from_utf8_lossy(&bytes)
                .trim_end()
                .lines()
                .map(|line| line.trim_end().to_string())
                .collect(),
            None => Vec::new(),
        };
        let results = self.pull_json::<ExperimentResults>(&key("results.json"))?;
        Ok(Some(ExperimentRecord {
            execution_info,
            logs,
            results,
        }))
    }

    /// Contents of `status.txt`.
    pub fn get_status(&self, project: &str, start_time: &str) -> Result<Option<ExperimentStatus>, SurroundError> {
        let bytes = self.pull_optional(&layout::experiment_file(project, start_time, "status.txt"))?;
        Ok(bytes.and_then(|bytes| ExperimentStatus::parse(&String::from_utf8_lossy(&bytes))))
    }

    /// Files of an experiment relative to its directory, or to `base` inside
    /// it. `None` when the experiment does not exist.
    pub fn get_experiment_files(
        &self,
        project: &str,
        start_time: &str,
        base: Option<&str>,
    ) -> Result<Option<Vec<String>>, SurroundError> {
        if !self.has_experiment(project, start_time) {
            return Ok(None);
        }
        let dir = match base {
            Some(base) => layout::experiment_file(project, start_time, base),
            None => layout::experiment_dir(project, start_time),
        };
        self.storage.get_files(Some(&dir)).map(Some)
    }

    /// Contents of a file inside an experiment.
    pub fn pull_experiment_file(
        &self,
        project: &str,
        start_time: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, SurroundError> {
        self.pull_optional(&layout::experiment_file(project, start_time, path))
    }

    /// Names of the cached model archives of `project`. `None` when the
    /// project does not exist.
    pub fn get_project_cache(&self, project: &str) -> Result<Option<Vec<String>>, SurroundError> {
        if !self.has_project(project) {
            return Ok(None);
        }
        self.storage.get_files(Some(&layout::cache_dir(project))).map(Some)
    }

    /// Contents of a cache file.
    pub fn pull_cache_file(&self, project: &str, file: &str) -> Result<Option<Vec<u8>>, SurroundError> {
        self.pull_optional(&format!("{}/{}", layout::cache_dir(project), file))
    }

    /// The cached model archive whose name ends with `<model_hash>.zip`.
    pub fn pull_model(&self, project: &str, model_hash: &str) -> Result<Option<Vec<u8>>, SurroundError> {
        let suffix = format!("{model_hash}.zip");
        let Some(files) = self.get_project_cache(project)? else {
            return Ok(None);
        };
        let found = files.into_iter().find(|name| {
            name.starts_with("model") && name.ends_with(&suffix) && name.len() > "model".len() + suffix.len()
        });
        match found {
            Some(name) => self.pull_cache_file(project, &name),
            None => Ok(None),
        }
    }

    /// Bundles the code snapshot, the cached model and optionally the
    /// uploaded output of an experiment so it can be run again.
    ///
    /// Returns the zip bytes for [`ReplicateTarget::InMemory`] and `None`
    /// otherwise.
    pub fn replicate(
        &self,
        project: &str,
        start_time: &str,
        target: ReplicateTarget<'_>,
        include_output: bool,
    ) -> Result<Option<Vec<u8>>, SurroundError> {
        let Some(record) = self.get_experiment(project, start_time)? else {
            return Err(SurroundError::NotFound(
                ErrorInfo::new("surround.exp.experiment_missing", "experiment does not exist")
                    .with_context("project", project)
                    .with_context("start_time", start_time),
            ));
        };

        let mut bundle = ZipBuilder::new();
        if let Some(code) = self.pull_experiment_file(project, start_time, "code.zip")? {
            for (name, contents) in archive::read_members(&code)? {
                bundle.add(&name, &contents)?;
            }
        }
        if let Some(hash) = &record.execution_info.model_hash {
            match self.pull_model(project, hash)? {
                Some(model) => {
                    for (name, contents) in archive::read_members(&model)? {
                        bundle.add(&name, &contents)?;
                    }
                }
                None => warn!(project, hash = %hash, "cached model missing"),
            }
        }
        if include_output {
            for file in self
                .get_experiment_files(project, start_time, Some("output"))?
                .unwrap_or_default()
            {
                let path = format!("output/{file}");
                if let Some(contents) = self.pull_experiment_file(project, start_time, &path)? {
                    bundle.add(&path, &contents)?;
                }
            }
        }
        let bytes = bundle.finish()?;
        debug!(project, start_time, size = bytes.len(), "replica built");

        match target {
            ReplicateTarget::InMemory => Ok(Some(bytes)),
            ReplicateTarget::Zip(path) => {
                if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                    fs::create_dir_all(parent).map_err(|err| replica_error(err, parent))?;
                }
                fs::write(path, &bytes).map_err(|err| replica_error(err, path))?;
                Ok(None)
            }
            ReplicateTarget::Directory(dir) => {
                fs::create_dir_all(dir).map_err(|err| replica_error(err, dir))?;
                archive::extract_bytes(&bytes, dir)?;
                Ok(None)
            }
        }
    }

    fn pull_optional(&self, key: &str) -> Result<Option<Vec<u8>>, SurroundError> {
        match self.storage.pull(key) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(SurroundError::NotFound(_)) => Ok(None),
            Err(err) => Err(err),
        }
    }

    fn pull_json<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>, SurroundError> {
        self.pull_optional(key)?.map(|bytes| from_json_slice(&bytes)).transpose()
    }
}

fn replica_error(err: std::io::Error, path: &Path) -> SurroundError {
    SurroundError::Storage(
        ErrorInfo::new("surround.exp.replicate", err.to_string()).with_context("path", path.display().to_string()),
    )
}
