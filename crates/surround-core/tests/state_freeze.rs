use serde_json::json;
use surround_core::{ErrorKind, MetricValue, State};

#[test]
fn frozen_state_rejects_new_attributes() {
    let mut state = State::new().with("text", json!(null));
    state.freeze();
    let err = state.set("other", "value").expect_err("new attribute while frozen");
    assert_eq!(err.kind(), ErrorKind::FrozenAttribute);
    assert_eq!(err.info().context["attribute"], "other");
    assert!(!state.contains("other"));
}

#[test]
fn frozen_state_accepts_existing_attributes() {
    let mut state = State::new().with("text", json!(null));
    state.freeze();
    state.set("text", "Hello world").expect("existing attribute");
    assert_eq!(state.get_str("text"), Some("Hello world"));
    *state.get_mut("text").expect("declared") = json!("changed");
    assert_eq!(state.get_str("text"), Some("changed"));
}

#[test]
fn freeze_is_idempotent_and_thaw_unlocks() {
    let mut state = State::new();
    state.freeze();
    state.freeze();
    assert!(state.is_frozen());
    assert!(state.set("late", 1).is_err());
    state.thaw();
    assert!(!state.is_frozen());
    state.set("late", 1).expect("thawed");
    assert_eq!(state.get("late"), Some(&json!(1)));
}

#[test]
fn removal_is_blocked_while_frozen() {
    let mut state = State::new().with("input", "abc");
    state.freeze();
    assert_eq!(
        state.remove("input").expect_err("frozen").kind(),
        ErrorKind::FrozenAttribute
    );
    state.thaw();
    assert_eq!(state.remove("input").expect("thawed"), Some(json!("abc")));
}

#[test]
fn accumulators_stay_writable_while_frozen() {
    let mut state = State::new();
    state.freeze();
    state.push_error("boom");
    state.push_warning("careful");
    state.record_timing("Hello", 0.25);
    assert_eq!(state.errors, vec!["boom".to_string()]);
    assert_eq!(state.warnings, vec!["careful".to_string()]);
    assert_eq!(state.execution_time, vec!["0.25".to_string()]);
    assert_eq!(state.stage_metadata[0].stage, "Hello");
    assert_eq!(state.stage_metadata[0].duration, "0.25");
}

#[test]
fn repeated_metric_becomes_series() {
    let mut state = State::new();
    state.record_metric("m", 1);
    assert_eq!(state.metrics["m"], MetricValue::Single(json!(1)));
    state.record_metric("m", 2);
    assert_eq!(state.metrics["m"], MetricValue::Series(vec![json!(1), json!(2)]));
    assert_eq!(state.metrics["m"].to_value(), json!([1, 2]));
    assert_eq!(state.metrics["m"].latest(), Some(&json!(2)));
}

#[test]
fn list_metric_is_extended_not_nested() {
    let mut state = State::new();
    state.record_metric("m", json!([1, 2]));
    state.record_metric("m", 3);
    assert_eq!(state.metrics["m"].to_value(), json!([1, 2, 3]));
    assert_eq!(state.metrics["m"].len(), 3);

    let stored = serde_json::to_value(&state.metrics["m"]).expect("serialize");
    let restored: MetricValue = serde_json::from_value(stored).expect("deserialize");
    assert_eq!(restored, state.metrics["m"]);

    let mut single = MetricValue::Single(json!([4]));
    single.push(json!(5));
    assert_eq!(single, MetricValue::Series(vec![json!(4), json!(5)]));
}

#[test]
fn null_attribute_is_declared_but_not_set() {
    let state = State::new().with("text", json!(null));
    assert!(state.contains("text"));
    assert!(!state.is_set("text"));
    assert_eq!(state.attribute_names().collect::<Vec<_>>(), vec!["text"]);
}
