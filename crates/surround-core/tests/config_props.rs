use proptest::prelude::*;
use serde_yaml::{Mapping, Value};
use surround_core::{merge_into, Config};

fn segment() -> impl Strategy<Value = String> {
    "[a-z]{1,6}"
}

fn nested(path: &[String], leaf: i64) -> Mapping {
    let mut value = Value::from(leaf);
    for segment in path.iter().rev() {
        let mut mapping = Mapping::new();
        mapping.insert(Value::String(segment.clone()), value);
        value = Value::Mapping(mapping);
    }
    match value {
        Value::Mapping(mapping) => mapping,
        _ => Mapping::new(),
    }
}

proptest! {
    #[test]
    fn get_path_finds_every_written_leaf(path in prop::collection::vec(segment(), 1..5), leaf in any::<i64>()) {
        let mut config = Config::with_env(Vec::<(String, String)>::new()).expect("defaults");
        config.read_from_dict(&nested(&path, leaf)).expect("merge");
        let dotted = path.join(".");
        prop_assert_eq!(config.get_path(&dotted), Some(&Value::from(leaf)));

        let mut missing = dotted.clone();
        missing.push_str(".absent");
        prop_assert!(config.get_path(&missing).is_none());
    }

    #[test]
    fn merging_is_last_writer_wins(
        path in prop::collection::vec(segment(), 1..4),
        first in any::<i64>(),
        second in any::<i64>(),
    ) {
        let mut target = Mapping::new();
        merge_into(&mut target, &nested(&path, first));
        merge_into(&mut target, &nested(&path, second));
        prop_assert_eq!(target, nested(&path, second));
    }

    #[test]
    fn merging_disjoint_siblings_keeps_both(left in any::<i64>(), right in any::<i64>()) {
        let mut target = nested(&["root".into(), "left".into()], left);
        merge_into(&mut target, &nested(&["root".into(), "right".into()], right));
        let root = target.get("root").and_then(Value::as_mapping).expect("root mapping");
        prop_assert_eq!(root.get("left"), Some(&Value::from(left)));
        prop_assert_eq!(root.get("right"), Some(&Value::from(right)));
    }
}
