mod support;

use std::fs;

use serde_json::Value;
use surround_core::{Config, ErrorKind, RunMode, State, SurroundError};
use surround_pipeline::{Assembler, BatchRunner, PipelineStage, Runner, Surround};
use tempfile::tempdir;

use support::*;

struct SingleRecord {
    frozen: bool,
}

impl Runner for SingleRecord {
    fn name(&self) -> &str {
        "Single"
    }

    fn load_data(&mut self, _mode: RunMode, _config: &Config) -> Result<State, SurroundError> {
        let mut state = hello_state();
        if self.frozen {
            state.freeze();
        }
        Ok(state)
    }
}

fn hello_assembler(name: &str) -> Assembler {
    let mut assembler = Assembler::new(name);
    assembler
        .set_stages(vec![
            PipelineStage::validator(ValidateData),
            PipelineStage::estimator(HelloWorld),
        ])
        .expect("stages");
    assembler
}

struct Echo;

impl surround_pipeline::Stage for Echo {}

impl surround_pipeline::Filter for Echo {
    fn operate(&mut self, state: &mut State, _config: &Config) -> Result<(), SurroundError> {
        let echoed = format!("echo {}", state.get_str("input").unwrap_or_default());
        state.set("output", echoed)
    }
}

#[test]
fn default_runner_runs_one_state() {
    let mut assembler = hello_assembler("hello");
    assembler.set_config(config("{}"));
    let mut runner = SingleRecord { frozen: false };
    let states = runner.run(&mut assembler, RunMode::Predict).expect("run");
    assert_eq!(states.len(), 1);
    assert_eq!(states[0].get_str("text"), Some("Hello world"));
}

#[test]
fn frozen_state_from_load_data_is_rejected() {
    let mut assembler = hello_assembler("hello");
    assembler.set_config(config("{}"));
    let mut runner = SingleRecord { frozen: true };
    let err = runner
        .run(&mut assembler, RunMode::Predict)
        .expect_err("frozen input");
    assert_eq!(err.kind(), ErrorKind::AssemblerConfig);
}

#[test]
fn batch_runner_processes_each_line() {
    let dir = tempdir().expect("tmp");
    let input = dir.path().join("input.txt");
    fs::write(&input, "alpha\nbeta  \ngamma\n").expect("write input");

    let mut assembler = Assembler::new("echo");
    assembler
        .set_stages(vec![PipelineStage::filter(Echo)])
        .expect("stages")
        .set_config(config(&format!(
            "data_path: {}\n",
            dir.path().display()
        )));

    let mut runner =
        BatchRunner::new("Batch").with_template(State::new().with("output", Value::Null));
    let states = runner
        .run(&mut assembler, RunMode::BatchPredict)
        .expect("batch run");
    let outputs: Vec<&str> = states
        .iter()
        .map(|state| state.get_str("output").expect("output"))
        .collect();
    assert_eq!(outputs, vec!["echo alpha", "echo beta", "echo gamma"]);
    assert!(states.iter().all(|state| !state.is_frozen()));
}

#[test]
fn batch_runner_reports_missing_input() {
    let dir = tempdir().expect("tmp");
    let mut assembler = Assembler::new("echo");
    assembler
        .set_stages(vec![PipelineStage::filter(Echo)])
        .expect("stages")
        .set_config(config("{}"));
    let mut runner = BatchRunner::new("Batch").with_input_file(dir.path().join("absent.txt"));
    let err = runner
        .run(&mut assembler, RunMode::BatchPredict)
        .expect_err("missing input");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn registry_resolves_by_index_and_name() {
    let mut surround = Surround::new("demo", "a demo project");
    surround
        .set_config(config("{}"))
        .add_assembler(hello_assembler("Hello"))
        .add_assembler(hello_assembler("Other"))
        .add_runner(SingleRecord { frozen: false });

    assert_eq!(surround.list_assemblies(), vec!["Hello", "Other"]);
    assert_eq!(surround.list_runners(), vec!["Single"]);
    assert!(surround.info().contains("1. Other"));

    let states = surround.run("single", "hello", "predict").expect("by name");
    assert_eq!(states[0].get_str("text"), Some("Hello world"));

    let states = surround.run("0", "1", "train").expect("by index");
    assert_eq!(states[0].get_str("training_message"), Some("Training message"));
    assert!(surround.assembler("other").expect("registered").config().is_some());
}

#[test]
fn registry_reports_unknown_keys() {
    let mut surround = Surround::new("demo", "");
    surround.add_assembler(hello_assembler("Hello"));
    let err = surround.run("nope", "Hello", "batch").expect_err("unknown runner");
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(err.info().context["runner"], "nope");
}

#[test]
fn mode_labels_map_to_run_modes() {
    assert_eq!(RunMode::from_label("train"), RunMode::Train);
    assert_eq!(RunMode::from_label("batch"), RunMode::BatchPredict);
    assert_eq!(RunMode::from_label("web"), RunMode::Predict);
}
