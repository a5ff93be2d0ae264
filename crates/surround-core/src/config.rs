//! Hierarchical, dot-path addressable pipeline configuration.
//!
//! A [`Config`] is assembled from the packaged defaults, any number of YAML
//! files merged in order, user supplied mappings, and finally every
//! `SURROUND_*` environment variable. Mappings merge recursively; every
//! other value (lists included) is replaced wholesale.

use std::fs;
use std::ops::Index;
use std::path::{Path, PathBuf};

use serde_yaml::{Mapping, Value};
use tracing::{debug, warn};

use crate::errors::{ErrorInfo, SurroundError};

/// Prefix identifying environment variables absorbed as overrides.
pub const ENV_VAR_PREFIX: &str = "SURROUND_";

const DEFAULTS: &str = include_str!("defaults.yaml");

static NULL: Value = Value::Null;

fn load_error(code: &str, err: impl ToString) -> SurroundError {
    SurroundError::ConfigLoad(ErrorInfo::new(code, err.to_string()))
}

fn type_error(code: &str, message: impl Into<String>) -> SurroundError {
    SurroundError::ConfigType(ErrorInfo::new(code, message))
}

#[derive(Debug, Clone, PartialEq)]
enum EnvSource {
    Process,
    Fixed(Vec<(String, String)>),
}

impl EnvSource {
    fn vars(&self) -> Vec<(String, String)> {
        match self {
            EnvSource::Process => std::env::vars().collect(),
            EnvSource::Fixed(vars) => vars.clone(),
        }
    }
}

/// Read-only merged configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    values: Mapping,
    env: EnvSource,
}

impl Config {
    /// Loads the packaged defaults and applies the process environment overlay.
    pub fn new() -> Result<Self, SurroundError> {
        Self::build(EnvSource::Process)
    }

    /// Like [`Config::new`], but the environment overlay reads `vars` instead
    /// of the process environment.
    pub fn with_env<I, K, V>(vars: I) -> Result<Self, SurroundError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let vars = vars
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect();
        Self::build(EnvSource::Fixed(vars))
    }

    fn build(env: EnvSource) -> Result<Self, SurroundError> {
        let defaults = parse_mapping(DEFAULTS.as_bytes(), "defaults.yaml")?;
        let mut config = Self {
            values: defaults,
            env,
        };
        config.apply_env()?;
        Ok(config)
    }

    /// Builds the configuration of a project rooted at `root`.
    ///
    /// Reads `.surround/config.yaml` and the package `config.yaml` when they
    /// exist and records the derived paths `project_root`, `package_path`,
    /// `output_path`, `data_path` and `models_path`.
    pub fn for_project(root: impl AsRef<Path>) -> Result<Self, SurroundError> {
        let mut config = Self::new()?;
        config.load_project(root.as_ref())?;
        Ok(config)
    }

    /// [`Config::for_project`] with an explicit environment overlay.
    pub fn for_project_with_env<I, K, V>(
        root: impl AsRef<Path>,
        vars: I,
    ) -> Result<Self, SurroundError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut config = Self::with_env(vars)?;
        config.load_project(root.as_ref())?;
        Ok(config)
    }

    fn load_project(&mut self, root: &Path) -> Result<(), SurroundError> {
        let project_config = root.join(".surround").join("config.yaml");
        if project_config.is_file() {
            self.read_config_files(&[&project_config])?;
        }
        let package_path = match self.get_str("project-info.project-name")? {
            Some(name) if !name.trim().is_empty() => root.join(name),
            _ => root.to_path_buf(),
        };
        let package_config = package_path.join("config.yaml");
        if package_config.is_file() && package_config != project_config {
            self.read_config_files(&[&package_config])?;
        }
        let derived = [
            ("project_root", root.to_path_buf()),
            ("package_path", package_path),
            ("output_path", root.join("output")),
            ("data_path", root.join("input")),
            ("models_path", root.join("models")),
        ];
        for (key, path) in derived {
            self.values.insert(
                Value::String(key.to_string()),
                Value::String(path.to_string_lossy().into_owned()),
            );
        }
        Ok(())
    }

    /// Merges YAML files in the listed order, then applies the environment
    /// overlay. Nothing is merged when any file fails to load.
    pub fn read_config_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<(), SurroundError> {
        let mut loaded = Vec::with_capacity(paths.len());
        for path in paths {
            let path = path.as_ref();
            let bytes = fs::read(path).map_err(|err| {
                SurroundError::ConfigLoad(
                    ErrorInfo::new(
                        "surround.config.read",
                        format!("unable to load configuration file ({err})"),
                    )
                    .with_context("path", path.display().to_string()),
                )
            })?;
            loaded.push(parse_mapping(&bytes, &path.display().to_string())?);
        }
        for mapping in &loaded {
            merge_into(&mut self.values, mapping);
        }
        debug!(files = loaded.len(), "merged configuration files");
        self.apply_env()
    }

    /// Merges a user supplied mapping, then applies the environment overlay.
    pub fn read_from_dict(&mut self, mapping: &Mapping) -> Result<(), SurroundError> {
        merge_into(&mut self.values, mapping);
        self.apply_env()
    }

    /// Merges an arbitrary YAML value, which must be a mapping.
    pub fn read_from_value(&mut self, value: &Value) -> Result<(), SurroundError> {
        match value {
            Value::Mapping(mapping) => self.read_from_dict(mapping),
            other => Err(type_error(
                "surround.config.not_mapping",
                format!("expected a mapping, found {}", value_kind(other)),
            )),
        }
    }

    /// Returns the top-level value stored under `key`.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Returns the value at the dot separated `path`, or `None` when any
    /// segment is absent.
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        if path.is_empty() {
            return None;
        }
        let mut segments = path.split('.');
        let first = segments.next()?;
        let mut current = self.values.get(first)?;
        for segment in segments {
            current = current.as_mapping()?.get(segment)?;
        }
        Some(current)
    }

    /// Boolean at `path`; a present non-boolean value is a type error.
    pub fn get_bool(&self, path: &str) -> Result<Option<bool>, SurroundError> {
        self.typed(path, "bool", Value::as_bool)
    }

    /// String at `path`; a present non-string value is a type error.
    pub fn get_str(&self, path: &str) -> Result<Option<&str>, SurroundError> {
        self.typed(path, "string", Value::as_str)
    }

    /// Integer at `path`; a present non-integer value is a type error.
    pub fn get_i64(&self, path: &str) -> Result<Option<i64>, SurroundError> {
        self.typed(path, "integer", Value::as_i64)
    }

    /// Number at `path`; a present non-numeric value is a type error.
    pub fn get_f64(&self, path: &str) -> Result<Option<f64>, SurroundError> {
        self.typed(path, "number", Value::as_f64)
    }

    fn typed<'a, T>(
        &'a self,
        path: &str,
        expected: &str,
        convert: impl Fn(&'a Value) -> Option<T>,
    ) -> Result<Option<T>, SurroundError> {
        match self.get_path(path) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => convert(value).map(Some).ok_or_else(|| {
                SurroundError::ConfigType(
                    ErrorInfo::new(
                        "surround.config.type",
                        format!("expected {expected}, found {}", value_kind(value)),
                    )
                    .with_context("path", path),
                )
            }),
        }
    }

    /// Reads a boolean switch, treating anything but `true` as off.
    pub fn flag(&self, path: &str) -> bool {
        self.get_path(path).and_then(Value::as_bool).unwrap_or(false)
    }

    /// Iterates the top-level entries.
    pub fn iter(&self) -> impl Iterator<Item = (&Value, &Value)> {
        self.values.iter()
    }

    /// Top-level keys that are strings.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().filter_map(Value::as_str)
    }

    /// Number of top-level entries.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// Whether there are no top-level entries.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// The merged mapping.
    pub fn as_mapping(&self) -> &Mapping {
        &self.values
    }

    /// Serializes the merged mapping as YAML.
    pub fn to_yaml_string(&self) -> Result<String, SurroundError> {
        serde_yaml::to_string(&self.values).map_err(|err| {
            SurroundError::Serde(ErrorInfo::new("surround.config.serialize", err.to_string()))
        })
    }

    fn apply_env(&mut self) -> Result<(), SurroundError> {
        for (name, raw) in self.env.vars() {
            let Some(remainder) = name.strip_prefix(ENV_VAR_PREFIX) else {
                continue;
            };
            let Some(segments) = env_segments(remainder) else {
                continue;
            };
            override_path(&mut self.values, &segments, &raw).map_err(|err| match err {
                SurroundError::ConfigType(info) => {
                    SurroundError::ConfigType(info.with_context("variable", name.clone()))
                }
                other => other,
            })?;
        }
        Ok(())
    }
}

impl Index<&str> for Config {
    type Output = Value;

    fn index(&self, key: &str) -> &Value {
        self.values.get(key).unwrap_or(&NULL)
    }
}

impl<'a> IntoIterator for &'a Config {
    type Item = (&'a Value, &'a Value);
    type IntoIter = serde_yaml::mapping::Iter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.values.iter()
    }
}

/// Searches `start` and its ancestors for a directory containing `.surround`.
pub fn find_project_root(start: impl AsRef<Path>) -> Option<PathBuf> {
    start
        .as_ref()
        .ancestors()
        .find(|dir| dir.join(".surround").is_dir())
        .map(Path::to_path_buf)
}

/// Recursively merges `src` into `target`: mappings merge key by key, any
/// other value replaces the target entry.
pub fn merge_into(target: &mut Mapping, src: &Mapping) {
    for (key, value) in src {
        match (target.get_mut(key), value) {
            (Some(Value::Mapping(existing)), Value::Mapping(incoming)) => {
                merge_into(existing, incoming);
            }
            _ => {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

fn parse_mapping(bytes: &[u8], origin: &str) -> Result<Mapping, SurroundError> {
    let value: Value = serde_yaml::from_slice(bytes).map_err(|err| {
        SurroundError::ConfigLoad(
            ErrorInfo::new("surround.config.parse", err.to_string()).with_context("path", origin),
        )
    })?;
    match value {
        Value::Mapping(mapping) => Ok(mapping),
        Value::Null => Ok(Mapping::new()),
        other => Err(load_error(
            "surround.config.not_mapping",
            format!("{origin}: top level must be a mapping, found {}", value_kind(&other)),
        )),
    }
}

/// Splits the remainder of a `SURROUND_` variable into lowercase segments.
/// Returns `None` for an empty remainder or any empty segment.
fn env_segments(remainder: &str) -> Option<Vec<String>> {
    if remainder.is_empty() {
        return None;
    }
    let segments: Vec<String> = remainder.split('_').map(str::to_lowercase).collect();
    if segments.iter().any(|segment| segment.trim().is_empty()) {
        return None;
    }
    Some(segments)
}

fn override_path(target: &mut Mapping, segments: &[String], raw: &str) -> Result<(), SurroundError> {
    let (leaf, parents) = match segments.split_last() {
        Some(split) => split,
        None => return Ok(()),
    };
    let mut current = target;
    for segment in parents {
        let key = Value::String(segment.clone());
        if !current.contains_key(&key) {
            current.insert(key.clone(), Value::Mapping(Mapping::new()));
        }
        current = match current.get_mut(&key) {
            Some(Value::Mapping(next)) => next,
            _ => {
                warn!(path = %segments.join("."), "environment override shadows a non-mapping value; ignored");
                return Ok(());
            }
        };
    }
    let key = Value::String(leaf.clone());
    let parsed = match current.get(&key) {
        Some(existing) => parse_as(existing, raw)?,
        None => literal_eval(raw),
    };
    current.insert(key, parsed);
    Ok(())
}

/// Parses `raw` using the type of the value it replaces.
fn parse_as(existing: &Value, raw: &str) -> Result<Value, SurroundError> {
    let mismatch = |expected: &str| {
        type_error(
            "surround.config.env_type",
            format!("cannot parse '{raw}' as {expected}"),
        )
    };
    match existing {
        Value::Bool(_) => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Ok(Value::Bool(true)),
            "false" | "0" | "no" | "off" => Ok(Value::Bool(false)),
            _ => Err(mismatch("bool")),
        },
        Value::Number(number) if number.is_f64() => raw
            .trim()
            .parse::<f64>()
            .map(|value| Value::Number(value.into()))
            .map_err(|_| mismatch("float")),
        Value::Number(_) => raw
            .trim()
            .parse::<i64>()
            .map(|value| Value::Number(value.into()))
            .map_err(|_| mismatch("integer")),
        Value::String(_) => Ok(Value::String(raw.to_string())),
        Value::Sequence(_) => match literal_eval(raw) {
            value @ Value::Sequence(_) => Ok(value),
            _ => Err(mismatch("list")),
        },
        Value::Mapping(_) => match literal_eval(raw) {
            value @ Value::Mapping(_) => Ok(value),
            _ => Err(mismatch("mapping")),
        },
        Value::Null | Value::Tagged(_) => Ok(literal_eval(raw)),
    }
}

/// Infers a value from its literal spelling; unparseable text stays a string.
fn literal_eval(raw: &str) -> Value {
    match serde_yaml::from_str::<Value>(raw) {
        Ok(Value::Null) if !raw.trim().is_empty() && raw.trim() != "null" && raw.trim() != "~" => {
            Value::String(raw.to_string())
        }
        Ok(value) => value,
        Err(_) => Value::String(raw.to_string()),
    }
}

fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Sequence(_) => "list",
        Value::Mapping(_) => "mapping",
        Value::Tagged(_) => "tagged value",
    }
}
