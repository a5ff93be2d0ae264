mod support;

use surround_core::{ErrorKind, RunMode, State};
use surround_pipeline::{Assembler, AssemblerStatus, PipelineStage, StageRole};

use support::*;

#[test]
fn empty_stage_list_cannot_run() {
    let mut assembler = Assembler::new("empty");
    assembler.set_config(config("{}"));
    let mut state = State::new();
    let err = assembler
        .run(&mut state, RunMode::Predict)
        .expect_err("no stages");
    assert_eq!(err.kind(), ErrorKind::AssemblerRun);
    assert!(!state.is_frozen());
}

#[test]
fn two_estimators_are_rejected() {
    let mut assembler = Assembler::new("double");
    let err = assembler
        .set_stages(vec![
            PipelineStage::estimator(HelloWorld),
            PipelineStage::estimator(HelloWorld),
        ])
        .expect_err("two estimators");
    assert_eq!(err.kind(), ErrorKind::AssemblerConfig);
    assert_eq!(err.info().code, "surround.assembler.estimators");
    assert!(assembler.stage_names().is_empty());
}

#[test]
fn visualiser_in_stage_list_is_rejected() {
    let mut assembler = Assembler::new("visual");
    let err = assembler
        .set_stages(vec![PipelineStage::visualiser(Report {
            ran: Counter::default(),
        })])
        .expect_err("visualiser stage");
    assert_eq!(err.kind(), ErrorKind::AssemblerConfig);
    assert!(err.info().hint.is_some());
}

#[test]
fn validators_run_where_they_are_listed() {
    let mut assembler = Assembler::new("order");
    assembler
        .set_stages(vec![
            PipelineStage::estimator(HelloWorld),
            PipelineStage::validator(ValidateData),
        ])
        .expect("any stage order")
        .set_config(config("{}"));
    assert_eq!(assembler.stage_names(), vec!["HelloWorld".to_string(), "ValidateData".to_string()]);
    assert!(assembler.init_assembler().expect("init"));

    let mut state = hello_state();
    assembler.run(&mut state, RunMode::Predict).expect("run");
    assert_eq!(state.get_str("text"), Some("Hello world"));
    assert_eq!(state.errors, vec!["It must be empty".to_string()]);
}

#[test]
fn training_requires_an_estimator() {
    let mut assembler = Assembler::new("no-estimator");
    assembler
        .set_stages(vec![PipelineStage::filter(BadFilter)])
        .expect("stages")
        .set_config(config("{}"));
    let mut state = State::new();
    let err = assembler
        .run(&mut state, RunMode::Train)
        .expect_err("train without estimator");
    assert_eq!(err.kind(), ErrorKind::AssemblerRun);
    assert!(state.execution_time.is_empty());
}

#[test]
fn stage_roles_are_reported() {
    let stages = [
        PipelineStage::validator(ValidateData),
        PipelineStage::filter(BadFilter),
        PipelineStage::estimator(HelloWorld),
    ];
    let roles: Vec<StageRole> = stages.iter().map(PipelineStage::role).collect();
    assert_eq!(
        roles,
        vec![StageRole::Validator, StageRole::Filter, StageRole::Estimator]
    );
    assert_eq!(stages[2].name(), "HelloWorld");
}

#[test]
fn initialisation_is_idempotent() {
    let initialised = Counter::default();
    let mut assembler = Assembler::new("init");
    assert_eq!(assembler.status(), AssemblerStatus::Constructed);
    assembler
        .set_stages(vec![PipelineStage::filter(Dumping {
            dumped: Counter::default(),
            initialised: initialised.clone(),
        })])
        .expect("stages")
        .set_config(config("{}"));
    assert_eq!(assembler.status(), AssemblerStatus::Configured);

    assert!(assembler.init_assembler().expect("first init"));
    assert!(assembler.init_assembler().expect("second init"));
    assert_eq!(initialised.get(), 1);
    assert_eq!(assembler.status(), AssemblerStatus::Runnable);

    let mut state = State::new();
    assembler.run(&mut state, RunMode::Predict).expect("run");
    assert_eq!(assembler.status(), AssemblerStatus::Idle);
}

#[test]
fn failed_initialisation_reports_false() {
    let mut assembler = Assembler::new("broken");
    assembler
        .set_stages(vec![PipelineStage::filter(BrokenInit)])
        .expect("stages")
        .set_config(config("{}"));
    assert!(!assembler.init_assembler().expect("logged failure"));
    assert_eq!(assembler.status(), AssemblerStatus::Configured);
}

#[test]
fn failed_initialisation_surfaces_when_configured() {
    let mut assembler = Assembler::new("broken");
    assembler
        .set_stages(vec![PipelineStage::filter(BrokenInit)])
        .expect("stages")
        .set_config(config("surround:\n  surface_exceptions: true\n"));
    let err = assembler.init_assembler().expect_err("surfaced");
    assert_eq!(err.kind(), ErrorKind::Stage);
    assert_eq!(err.message(), "model weights missing");
}
