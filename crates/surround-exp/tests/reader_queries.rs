mod support;

use std::fs;

use serde_json::json;
use support::{write, Fixture};
use surround_core::ErrorKind;
use surround_exp::{archive, ExperimentStatus, ReplicateTarget};

fn recorded(fixture: &Fixture, runs: usize) -> Vec<String> {
    let mut writer = fixture.writer();
    writer.write_project("p", "demo project").expect("project");
    let mut starts = Vec::new();
    for run in 0..runs {
        let start = writer
            .start_experiment("p", fixture.root(), Some(json!({"run": run})), vec![format!("run {run}")])
            .expect("start");
        tracing::info!(target: "reader", run, "running");
        write(fixture.root(), "output/result.txt", &format!("result {run}"));
        writer.write_metric("acc", run as f64 / 10.0).expect("metric");
        writer.stop_experiment(None, None).expect("stop");
        starts.push(start);
    }
    starts
}

#[test]
fn projects_are_listed_with_metadata() {
    let fixture = Fixture::new(false);
    recorded(&fixture, 1);
    fixture.writer().write_project("q", "other").expect("second project");
    let reader = fixture.reader();

    let projects = reader.get_projects().expect("projects");
    let names: Vec<&str> = projects.iter().map(|meta| meta.project_name.as_str()).collect();
    assert_eq!(names, vec!["p", "q"]);
    assert_eq!(projects[0].project_description, "demo project");
    assert!(reader.has_project("p"));
    assert!(!reader.has_project("missing"));
    assert_eq!(reader.get_project("missing").expect("lookup"), None);
}

#[test]
fn experiments_come_back_newest_first_with_what_was_written() {
    let fixture = Fixture::new(false);
    let starts = recorded(&fixture, 2);
    let reader = fixture.reader();

    let experiments = reader.get_experiments("p").expect("query").expect("project exists");
    let listed: Vec<&str> = experiments
        .iter()
        .map(|record| record.execution_info.start_time.as_str())
        .collect();
    assert_eq!(listed, vec![starts[1].as_str(), starts[0].as_str()]);

    let newest = &experiments[0];
    assert_eq!(newest.execution_info.arguments, json!({"run": 1}));
    assert_eq!(newest.execution_info.notes, vec!["run 1".to_string()]);
    assert_eq!(newest.logs, vec!["INFO:reader:running run=1".to_string()]);
    let results = newest.results.as_ref().expect("results");
    assert_eq!(results.metrics["acc"], json!(0.1));
    assert_eq!(results.start_time, starts[1]);

    assert_eq!(reader.get_experiments("missing").expect("query"), None);
    assert!(reader.has_experiment("p", &starts[0]));
    assert!(!reader.has_experiment("p", "1999-01-01T00-00-00-000000"));
    assert_eq!(
        reader.get_status("p", &starts[0]).expect("status"),
        Some(ExperimentStatus::Complete)
    );
}

#[test]
fn experiment_files_and_contents() {
    let fixture = Fixture::new(false);
    let starts = recorded(&fixture, 1);
    let reader = fixture.reader();

    let files = reader
        .get_experiment_files("p", &starts[0], None)
        .expect("files")
        .expect("experiment exists");
    for expected in ["code.zip", "execution_info.json", "log.txt", "output/result.txt", "results.json", "status.txt"] {
        assert!(files.contains(&expected.to_string()), "missing {expected} in {files:?}");
    }
    let output = reader
        .get_experiment_files("p", &starts[0], Some("output"))
        .expect("files")
        .expect("experiment exists");
    assert_eq!(output, vec!["result.txt".to_string()]);
    assert_eq!(
        reader.pull_experiment_file("p", &starts[0], "output/result.txt").expect("pull"),
        Some(b"result 0".to_vec())
    );
    assert_eq!(reader.pull_experiment_file("p", &starts[0], "nope.txt").expect("pull"), None);
    assert_eq!(reader.get_experiment_files("p", "1999-01-01T00-00-00-000000", None).expect("files"), None);
}

#[test]
fn models_are_found_by_hash() {
    let fixture = Fixture::new(true);
    let starts = recorded(&fixture, 1);
    let reader = fixture.reader();

    let record = reader.get_experiment("p", &starts[0]).expect("query").expect("exists");
    let hash = record.execution_info.model_hash.expect("hash");
    let cache = reader.get_project_cache("p").expect("cache").expect("project exists");
    assert_eq!(cache.len(), 1);
    let model = reader.pull_model("p", &hash).expect("pull").expect("model cached");
    assert_eq!(reader.pull_cache_file("p", &cache[0]).expect("pull"), Some(model.clone()));
    let members: Vec<String> = archive::read_members(&model)
        .expect("members")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert!(members.contains(&"models/weights.bin".to_string()));
    assert_eq!(reader.pull_model("p", "feedface").expect("pull"), None);
}

#[test]
fn replicate_to_directory_bundles_code_model_and_output() {
    let fixture = Fixture::new(true);
    let starts = recorded(&fixture, 1);
    let reader = fixture.reader();
    let target = tempfile::tempdir().expect("target");

    reader
        .replicate("p", &starts[0], ReplicateTarget::Directory(target.path()), true)
        .expect("replicate");
    let read = |path: &str| fs::read_to_string(target.path().join(path)).expect(path);
    assert_eq!(read("hello/main.rs"), "fn main() {}\n");
    assert_eq!(read("models/weights.bin"), "0123456789");
    assert_eq!(read("output/result.txt"), "result 0");
}

#[test]
fn replicate_to_zip_and_memory() {
    let fixture = Fixture::new(false);
    let starts = recorded(&fixture, 1);
    let reader = fixture.reader();
    let target = tempfile::tempdir().expect("target");
    let zip_path = target.path().join("bundle/replica.zip");

    let returned = reader
        .replicate("p", &starts[0], ReplicateTarget::Zip(&zip_path), false)
        .expect("replicate");
    assert_eq!(returned, None);
    let names: Vec<String> = archive::read_members(&fs::read(&zip_path).expect("zip"))
        .expect("members")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert!(names.contains(&"hello/main.rs".to_string()));
    assert!(names.iter().all(|name| !name.starts_with("output/")));

    let bytes = reader
        .replicate("p", &starts[0], ReplicateTarget::InMemory, true)
        .expect("replicate")
        .expect("bytes");
    let names: Vec<String> = archive::read_members(&bytes)
        .expect("members")
        .into_iter()
        .map(|(name, _)| name)
        .collect();
    assert!(names.contains(&"output/result.txt".to_string()));

    let err = reader
        .replicate("p", "1999-01-01T00-00-00-000000", ReplicateTarget::InMemory, false)
        .expect_err("missing experiment");
    assert_eq!(err.kind(), ErrorKind::NotFound);
}
