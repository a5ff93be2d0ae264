#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use surround_core::{Config, State, SurroundError};
use surround_pipeline::{Estimator, Filter, Stage, Validator, Visualiser};

pub fn config(yaml: &str) -> Config {
    let mut config = Config::with_env(Vec::<(String, String)>::new()).expect("defaults");
    let mapping = surround_core::serde_yaml::from_str(yaml).expect("fixture yaml");
    config.read_from_dict(&mapping).expect("merge fixture");
    config
}

pub fn hello_state() -> State {
    State::new()
        .with("text", Value::Null)
        .with("training_message", Value::Null)
}

#[derive(Clone, Default)]
pub struct Counter(Arc<AtomicUsize>);

impl Counter {
    pub fn bump(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Default)]
pub struct Trace(Arc<Mutex<Vec<String>>>);

impl Trace {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().expect("trace lock").push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().expect("trace lock").clone()
    }
}

pub struct ValidateData;

impl Stage for ValidateData {}

impl Validator for ValidateData {
    fn validate(&mut self, state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        if state.is_set("text") {
            state.push_error("It must be empty");
        }
        Ok(())
    }
}

pub struct HelloWorld;

impl Stage for HelloWorld {}

impl Estimator for HelloWorld {
    fn estimate(&mut self, state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        let text = state
            .get_str("training_message")
            .unwrap_or("Hello world")
            .to_string();
        state.set("text", text)
    }

    fn fit(&mut self, state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        state.set("training_message", "Training message")
    }
}

pub struct BadFilter;

impl Stage for BadFilter {}

impl Filter for BadFilter {
    fn operate(&mut self, _state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        Err(SurroundError::stage("bad filter"))
    }
}

pub struct PanicFilter;

impl Stage for PanicFilter {}

impl Filter for PanicFilter {
    fn operate(&mut self, _state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        panic!("filter exploded");
    }
}

/// Records its name into a trace each time it operates.
pub struct Recorder {
    pub label: &'static str,
    pub trace: Trace,
}

impl Stage for Recorder {
    fn name(&self) -> String {
        self.label.to_string()
    }
}

impl Filter for Recorder {
    fn operate(&mut self, _state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        self.trace.push(self.label);
        Ok(())
    }
}

pub struct CountingFinaliser {
    pub ran: Counter,
    pub saw_errors: Trace,
}

impl Stage for CountingFinaliser {}

impl Filter for CountingFinaliser {
    fn operate(&mut self, state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        self.ran.bump();
        for error in &state.errors {
            self.saw_errors.push(error.clone());
        }
        Ok(())
    }
}

pub struct AccuracyMetrics {
    pub ran: Counter,
}

impl Stage for AccuracyMetrics {}

impl Filter for AccuracyMetrics {
    fn operate(&mut self, state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        self.ran.bump();
        state.record_metric("accuracy", 0.9);
        Ok(())
    }
}

pub struct Report {
    pub ran: Counter,
}

impl Stage for Report {}

impl Visualiser for Report {
    fn visualise(&mut self, _state: &State, _config: &Config) -> Result<(), SurroundError> {
        self.ran.bump();
        Ok(())
    }
}

pub struct Dumping {
    pub dumped: Counter,
    pub initialised: Counter,
}

impl Stage for Dumping {
    fn initialise(&mut self, _config: &Config) -> Result<(), SurroundError> {
        self.initialised.bump();
        Ok(())
    }

    fn dump_output(&self, _state: &State, _config: &Config) -> Result<(), SurroundError> {
        self.dumped.bump();
        Ok(())
    }
}

impl Filter for Dumping {
    fn operate(&mut self, _state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        Ok(())
    }
}

pub struct BrokenInit;

impl Stage for BrokenInit {
    fn initialise(&mut self, _config: &Config) -> Result<(), SurroundError> {
        Err(SurroundError::stage("model weights missing"))
    }
}

impl Filter for BrokenInit {
    fn operate(&mut self, _state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        Ok(())
    }
}

pub struct Sprawl;

impl Stage for Sprawl {}

impl Filter for Sprawl {
    fn operate(&mut self, state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        state.set("undeclared", 1)
    }
}
