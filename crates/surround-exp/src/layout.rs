//! Storage keys and timestamp formats of the experiment layout.
//!
//! ```text
//! experimentation/<project>/
//!   project.json
//!   cache/model-<start_time>-<hash>.zip
//!   experiments/<start_time>/{status.txt, code.zip, execution_info.json, ...}
//! ```

use chrono::{Local, NaiveDateTime};

/// Root prefix of every tracked project.
pub const ROOT: &str = "experimentation";

/// `start_time` format: ISO-8601 with `-` between time fields and microseconds.
pub const START_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S-%6f";

/// Format of `last_time_updated` in `project.json`.
pub const UPDATED_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

/// Length of a formatted `start_time`.
pub const START_TIME_LEN: usize = 26;

const MODEL_PREFIX: &str = "model-";

/// `experimentation/<project>`
pub fn project_dir(project: &str) -> String {
    format!("{ROOT}/{project}")
}

/// `experimentation/<project>/project.json`
pub fn project_meta(project: &str) -> String {
    format!("{ROOT}/{project}/project.json")
}

/// `experimentation/<project>/experiments`
pub fn experiments_dir(project: &str) -> String {
    format!("{ROOT}/{project}/experiments")
}

/// `experimentation/<project>/experiments/<start_time>`
pub fn experiment_dir(project: &str, start_time: &str) -> String {
    format!("{ROOT}/{project}/experiments/{start_time}")
}

/// A file inside an experiment directory.
pub fn experiment_file(project: &str, start_time: &str, path: &str) -> String {
    format!("{}/{}", experiment_dir(project, start_time), path.trim_start_matches('/'))
}

/// `experimentation/<project>/cache`
pub fn cache_dir(project: &str) -> String {
    format!("{ROOT}/{project}/cache")
}

/// Name of a cached model archive.
pub fn model_file_name(start_time: &str, hash: &str) -> String {
    format!("{MODEL_PREFIX}{start_time}-{hash}.zip")
}

/// Splits a cached model file name into its start time and hash.
pub fn parse_model_file_name(name: &str) -> Option<(NaiveDateTime, &str)> {
    let rest = name.strip_prefix(MODEL_PREFIX)?.strip_suffix(".zip")?;
    if rest.len() <= START_TIME_LEN + 1 || !rest.is_char_boundary(START_TIME_LEN) {
        return None;
    }
    let (stamp, hash) = rest.split_at(START_TIME_LEN);
    let hash = hash.strip_prefix('-')?;
    Some((parse_start_time(stamp)?, hash))
}

/// Formats a timestamp as a `start_time`.
pub fn format_start_time(moment: NaiveDateTime) -> String {
    moment.format(START_TIME_FORMAT).to_string()
}

/// Parses a `start_time`.
pub fn parse_start_time(value: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(value, START_TIME_FORMAT).ok()
}

/// Current local time, used for every timestamp the writer records.
pub fn now() -> NaiveDateTime {
    Local::now().naive_local()
}

/// Current time formatted for `last_time_updated`.
pub fn updated_now() -> String {
    now().format(UPDATED_FORMAT).to_string()
}
