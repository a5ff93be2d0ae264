//! Records experiments into a storage driver.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use serde_json::Value;
use surround_core::{Config, ErrorInfo, MetricValue, SurroundError};
use surround_store::{DriverRegistry, PushSource, StorageDriver};
use tracing::{error, info, warn};
use walkdir::WalkDir;

use crate::archive::{self, MODEL_HASH_SKIP};
use crate::layout;
use crate::log_stream::{LogCapture, LogSink};
use crate::records::{Author, ExecutionInfo, ExperimentResults, ExperimentStatus, ProjectMeta};
use crate::serde::to_pretty_json_bytes;
use crate::template;

fn io_error(code: &str, err: io::Error, path: &Path) -> SurroundError {
    SurroundError::Storage(ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()))
}

fn state_error(code: &str, message: &str) -> SurroundError {
    SurroundError::ExperimentState(ErrorInfo::new(code, message))
}

/// Opens the driver for `url`, falling back to `experiment.url` in `config`.
pub(crate) fn open_storage(
    url: Option<&str>,
    config: &Config,
    registry: &DriverRegistry,
) -> Result<Arc<dyn StorageDriver>, SurroundError> {
    let configured = config.get_str("experiment.url")?;
    let url = url.or(configured).filter(|url| !url.is_empty()).ok_or_else(|| {
        SurroundError::ConfigType(
            ErrorInfo::new("surround.exp.url", "no experiment storage URL configured")
                .with_hint("set experiment.url or pass a URL explicitly"),
        )
    })?;
    registry.open(url, Some(config))
}

struct ActiveExperiment {
    project: String,
    root: PathBuf,
    arguments: Value,
    notes: Vec<String>,
    start_time: String,
    model_hash: Option<String>,
    metrics: BTreeMap<String, MetricValue>,
    capture: Option<LogCapture>,
}

impl ActiveExperiment {
    fn key(&self, path: &str) -> String {
        layout::experiment_file(&self.project, &self.start_time, path)
    }
}

/// Writes projects and experiments under `experimentation/`.
///
/// A writer owns at most one running experiment. Log capture is bound to the
/// thread that called [`ExperimentWriter::start_experiment`], so the writer
/// stays on that thread while an experiment runs.
pub struct ExperimentWriter {
    storage: Arc<dyn StorageDriver>,
    author: Author,
    current: Option<ActiveExperiment>,
    last_start: Option<NaiveDateTime>,
}

impl ExperimentWriter {
    /// Writer over `storage`; the author comes from `user.name`/`user.email`.
    pub fn new(storage: Arc<dyn StorageDriver>, config: &Config) -> Self {
        Self {
            storage,
            author: Author::from_config(config),
            current: None,
            last_start: None,
        }
    }

    /// Writer over the driver for `url`, or `experiment.url` when `url` is `None`.
    pub fn open(url: Option<&str>, config: &Config, registry: &DriverRegistry) -> Result<Self, SurroundError> {
        Ok(Self::new(open_storage(url, config, registry)?, config))
    }

    /// The underlying driver.
    pub fn storage(&self) -> &Arc<dyn StorageDriver> {
        &self.storage
    }

    /// Whether an experiment is in progress.
    pub fn is_running(&self) -> bool {
        self.current.is_some()
    }

    /// `start_time` of the running experiment.
    pub fn current_start_time(&self) -> Option<&str> {
        self.current.as_ref().map(|current| current.start_time.as_str())
    }

    /// Metrics recorded so far in the running experiment.
    pub fn current_metrics(&self) -> Option<&BTreeMap<String, MetricValue>> {
        self.current.as_ref().map(|current| &current.metrics)
    }

    /// Creates or refreshes `project.json`.
    pub fn write_project(&self, name: &str, description: &str) -> Result<(), SurroundError> {
        let meta = ProjectMeta {
            project_name: name.to_string(),
            project_description: description.to_string(),
            last_time_updated: layout::updated_now(),
        };
        self.push_json(&layout::project_meta(name), &meta)?;
        info!(project = name, "project written");
        Ok(())
    }

    /// Deletes a project and all of its experiments. Absent projects are ignored.
    pub fn remove_project(&self, name: &str) -> Result<(), SurroundError> {
        let dir = layout::project_dir(name);
        if self.storage.exists(&dir) {
            self.storage.delete(&dir)?;
        }
        Ok(())
    }

    /// Deletes one experiment. Absent experiments are ignored.
    pub fn remove_experiment(&self, project: &str, start_time: &str) -> Result<(), SurroundError> {
        let dir = layout::experiment_dir(project, start_time);
        if self.storage.exists(&dir) {
            self.storage.delete(&dir)?;
        }
        Ok(())
    }

    /// Writes a file into an existing experiment. Returns false when the
    /// experiment does not exist.
    pub fn push_experiment_file(
        &self,
        project: &str,
        start_time: &str,
        path: &str,
        bytes: &[u8],
    ) -> Result<bool, SurroundError> {
        if !self.storage.exists(&layout::experiment_dir(project, start_time)) {
            return Ok(false);
        }
        self.storage
            .push(&layout::experiment_file(project, start_time, path), PushSource::Bytes(bytes), true)?;
        Ok(true)
    }

    /// Starts recording an experiment of `project` whose sources live in
    /// `root`, returning its `start_time`.
    pub fn start_experiment(
        &mut self,
        project: &str,
        root: impl AsRef<Path>,
        args: Option<Value>,
        notes: Vec<String>,
    ) -> Result<String, SurroundError> {
        if let Some(current) = &self.current {
            return Err(SurroundError::ExperimentState(
                ErrorInfo::new("surround.exp.already_running", "an experiment is already in progress")
                    .with_context("start_time", current.start_time.clone())
                    .with_hint("stop the current experiment first"),
            ));
        }
        if !self.storage.exists(&layout::project_meta(project)) {
            return Err(SurroundError::ProjectMissing(
                ErrorInfo::new("surround.exp.project_missing", "project has not been written")
                    .with_context("project", project)
                    .with_hint("call write_project before starting an experiment"),
            ));
        }
        let root = root.as_ref().to_path_buf();
        reset_workspace(&root)?;

        let start_time = self.unique_start_time(project);
        let mut current = ActiveExperiment {
            project: project.to_string(),
            root: root.clone(),
            arguments: args.unwrap_or(Value::Null),
            notes,
            start_time: start_time.clone(),
            model_hash: None,
            metrics: BTreeMap::new(),
            capture: None,
        };

        let scratch =
            tempfile::tempdir().map_err(|err| io_error("surround.exp.tempdir", err, &std::env::temp_dir()))?;
        let code_zip = scratch.path().join("code.zip");
        archive::package_code(&root, &code_zip)?;
        self.storage.push(&current.key("code.zip"), PushSource::Path(&code_zip), true)?;
        current.model_hash = self.cache_models(project, &start_time, &root, scratch.path())?;

        self.storage.push(
            &current.key("status.txt"),
            PushSource::Bytes(ExperimentStatus::Running.as_str().as_bytes()),
            true,
        )?;
        if let Err(err) = self.touch_project(project) {
            error!(project, error = %err, "unable to refresh project.json");
        }
        let execution_info = ExecutionInfo {
            author: self.author.clone(),
            arguments: current.arguments.clone(),
            model_hash: current.model_hash.clone(),
            start_time: start_time.clone(),
            notes: current.notes.clone(),
            input_files: input_files(&root),
        };
        if let Err(err) = self.push_json(&current.key("execution_info.json"), &execution_info) {
            error!(project, start_time = %start_time, error = %err, "unable to write execution_info.json");
        }

        info!(project, start_time = %start_time, "experiment started");
        let sink = LogSink::new(self.storage.clone(), root, layout::experiment_dir(project, &start_time));
        current.capture = Some(LogCapture::attach(Arc::new(sink)));
        self.current = Some(current);
        Ok(start_time)
    }

    /// Records a metric sample for the running experiment.
    pub fn write_metric(&mut self, key: &str, value: impl Into<Value>) -> Result<(), SurroundError> {
        let current = self
            .current
            .as_mut()
            .ok_or_else(|| state_error("surround.exp.not_running", "no experiment in progress"))?;
        let value = value.into();
        let index = match current.metrics.get_mut(key) {
            Some(existing) => {
                existing.push(value.clone());
                existing.len() - 1
            }
            None => {
                current.metrics.insert(key.to_string(), MetricValue::first(value.clone()));
                0
            }
        };
        let sample_key = current.key(&format!(
            "metrics/{key}/{}_{index}.txt",
            layout::format_start_time(layout::now())
        ));
        let text = match &value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        self.storage.push(&sample_key, PushSource::Bytes(text.as_bytes()), true)
    }

    /// Finishes the running experiment and writes `results.json`.
    ///
    /// `metrics` override accumulated metrics with the same name; `notes`
    /// replace the notes given at start when present.
    pub fn stop_experiment(
        &mut self,
        metrics: Option<BTreeMap<String, Value>>,
        notes: Option<Vec<String>>,
    ) -> Result<ExperimentResults, SurroundError> {
        let mut current = self
            .current
            .take()
            .ok_or_else(|| state_error("surround.exp.not_running", "no experiment in progress"))?;
        if let Some(capture) = current.capture.take() {
            capture.detach();
        }

        let log_path = current.root.join("log.txt");
        if log_path.is_file() {
            self.storage.push(&current.key("log.txt"), PushSource::Path(&log_path), true)?;
        } else {
            self.storage.push(&current.key("log.txt"), PushSource::Bytes(b" "), true)?;
        }
        self.storage.push(
            &current.key("status.txt"),
            PushSource::Bytes(ExperimentStatus::Complete.as_str().as_bytes()),
            true,
        )?;
        self.touch_project(&current.project)?;
        self.upload_output(&current)?;

        let mut merged: BTreeMap<String, Value> = current
            .metrics
            .iter()
            .map(|(name, metric)| (name.clone(), metric.to_value()))
            .collect();
        merged.extend(metrics.unwrap_or_default());
        let results = ExperimentResults {
            author: self.author.clone(),
            arguments: current.arguments.clone(),
            start_time: current.start_time.clone(),
            end_time: layout::format_start_time(layout::now()),
            metrics: merged,
            notes: notes.unwrap_or_else(|| current.notes.clone()),
            model_hash: current.model_hash.clone(),
        };
        self.push_json(&current.key("results.json"), &results)?;
        self.render_results(&current, &results);

        info!(project = %current.project, start_time = %current.start_time, "experiment stopped");
        Ok(results)
    }

    fn push_json<T: Serialize>(&self, key: &str, value: &T) -> Result<(), SurroundError> {
        let bytes = to_pretty_json_bytes(value)?;
        self.storage.push(key, PushSource::Bytes(&bytes), true)
    }

    fn touch_project(&self, project: &str) -> Result<(), SurroundError> {
        let key = layout::project_meta(project);
        let mut meta: ProjectMeta = crate::serde::from_json_slice(&self.storage.pull(&key)?)?;
        meta.last_time_updated = layout::updated_now();
        self.push_json(&key, &meta)
    }

    fn unique_start_time(&mut self, project: &str) -> String {
        let step = chrono::Duration::microseconds(1);
        let mut candidate = layout::now();
        if let Some(last) = self.last_start {
            if candidate <= last {
                candidate = last + step;
            }
        }
        while self
            .storage
            .exists(&layout::experiment_dir(project, &layout::format_start_time(candidate)))
        {
            candidate += step;
        }
        self.last_start = Some(candidate);
        layout::format_start_time(candidate)
    }

    /// Hash of the newest cached model of `project`.
    fn previous_model_hash(&self, project: &str) -> Result<Option<String>, SurroundError> {
        let files = self.storage.get_files(Some(&layout::cache_dir(project)))?;
        Ok(files
            .iter()
            .filter_map(|name| layout::parse_model_file_name(name))
            .max_by_key(|(stamp, _)| *stamp)
            .map(|(_, hash)| hash.to_string()))
    }

    fn cache_models(
        &self,
        project: &str,
        start_time: &str,
        root: &Path,
        scratch: &Path,
    ) -> Result<Option<String>, SurroundError> {
        let models_zip = scratch.join("models.zip");
        if !archive::package_models(root, &models_zip)? {
            return Ok(None);
        }
        let hash = archive::hash_zip(&models_zip, &MODEL_HASH_SKIP)?;
        if self.previous_model_hash(project)?.as_deref() != Some(hash.as_str()) {
            let key = format!("{}/{}", layout::cache_dir(project), layout::model_file_name(start_time, &hash));
            self.storage.push(&key, PushSource::Path(&models_zip), true)?;
            info!(project, hash = %hash, "cached new model");
        }
        Ok(Some(hash))
    }

    fn upload_output(&self, current: &ActiveExperiment) -> Result<(), SurroundError> {
        let output = current.root.join("output");
        for relative in relative_files(&output) {
            let local = output.join(&relative);
            self.storage
                .push(&current.key(&format!("output/{relative}")), PushSource::Path(&local), true)?;
        }
        Ok(())
    }

    fn render_results(&self, current: &ActiveExperiment, results: &ExperimentResults) {
        let template_path = current.root.join("templates").join("results.html");
        let rendered = if template_path.is_file() {
            fs::read_to_string(&template_path)
                .map_err(|err| io_error("surround.exp.template_read", err, &template_path))
                .and_then(|text| {
                    let context = serde_json::to_value(results).map_err(|err| {
                        SurroundError::Serde(ErrorInfo::new("surround.exp.json_serialize", err.to_string()))
                    })?;
                    template::render(&text, &context)
                })
                .map(String::into_bytes)
        } else {
            let produced = current.root.join("output").join("results.html");
            if !produced.is_file() {
                return;
            }
            fs::read(&produced).map_err(|err| io_error("surround.exp.results_read", err, &produced))
        };
        let pushed = rendered
            .and_then(|bytes| self.storage.push(&current.key("results.html"), PushSource::Bytes(&bytes), true));
        if let Err(err) = pushed {
            warn!(start_time = %current.start_time, error = %err, "unable to write results.html");
        }
    }
}

/// Removes the previous `log.txt` and empties `output/`.
fn reset_workspace(root: &Path) -> Result<(), SurroundError> {
    let log = root.join("log.txt");
    if log.is_file() {
        fs::remove_file(&log).map_err(|err| io_error("surround.exp.reset", err, &log))?;
    }
    let output = root.join("output");
    if !output.is_dir() {
        return Ok(());
    }
    let entries = fs::read_dir(&output).map_err(|err| io_error("surround.exp.reset", err, &output))?;
    for entry in entries {
        let path = entry.map_err(|err| io_error("surround.exp.reset", err, &output))?.path();
        let removed = if path.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(|err| io_error("surround.exp.reset", err, &path))?;
    }
    Ok(())
}

/// Files below `dir`, relative to it with `/` separators, sorted.
fn relative_files(dir: &Path) -> Vec<String> {
    if !dir.is_dir() {
        return Vec::new();
    }
    WalkDir::new(dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(dir).ok()?;
            let parts: Vec<String> = relative
                .components()
                .map(|part| part.as_os_str().to_string_lossy().into_owned())
                .collect();
            Some(parts.join("/"))
        })
        .collect()
}

fn input_files(root: &Path) -> Vec<String> {
    relative_files(&root.join("input"))
        .into_iter()
        .map(|file| format!("input/{file}"))
        .collect()
}
