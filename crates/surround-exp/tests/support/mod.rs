#![allow(dead_code)]

use std::fs;
use std::path::Path;
use std::sync::Arc;

use surround_core::Config;
use surround_exp::{ExperimentReader, ExperimentWriter};
use surround_store::{LocalDriver, StorageDriver};

pub fn config() -> Config {
    Config::with_env(Vec::<(String, String)>::new()).expect("defaults")
}

pub fn write(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
    fs::write(path, contents).expect("write fixture");
}

/// A project tree with sources, input, a model and leftovers from a previous run.
pub fn project_tree(root: &Path, with_models: bool) {
    write(root, "hello/main.rs", "fn main() {}\n");
    write(root, "hello/config.yaml", "threshold: 0.5\n");
    write(root, "input/data.txt", "a\nb\n");
    write(root, "output/stale.txt", "old run");
    write(root, "logs/app.txt", "noise");
    write(root, "__pycache__/cached.pyc", "bytes");
    write(root, "log.txt", "INFO:old:previous run\n");
    if with_models {
        write(root, "models/weights.bin", "0123456789");
        write(root, "models/manifest.yaml", "version: 1\n");
    }
}

pub struct Fixture {
    pub store: tempfile::TempDir,
    pub work: tempfile::TempDir,
    pub storage: Arc<dyn StorageDriver>,
}

impl Fixture {
    pub fn new(with_models: bool) -> Self {
        let store = tempfile::tempdir().expect("store dir");
        let work = tempfile::tempdir().expect("work dir");
        project_tree(work.path(), with_models);
        let storage: Arc<dyn StorageDriver> = Arc::new(LocalDriver::new(store.path()).expect("driver"));
        Self { store, work, storage }
    }

    pub fn root(&self) -> &Path {
        self.work.path()
    }

    pub fn writer(&self) -> ExperimentWriter {
        ExperimentWriter::new(self.storage.clone(), &config())
    }

    pub fn reader(&self) -> ExperimentReader {
        ExperimentReader::new(self.storage.clone())
    }

    pub fn pull_text(&self, key: &str) -> String {
        String::from_utf8(self.storage.pull(key).expect("pull")).expect("utf8")
    }
}

pub fn experiment_key(start_time: &str, path: &str) -> String {
    format!("experimentation/p/experiments/{start_time}/{path}")
}
