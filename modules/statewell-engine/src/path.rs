use serde_json::Value;

/// Walk `path` through nested objects (by key) and arrays (by index).
/// Returns `None` as soon as a step is missing.
pub fn get_in<'a, S: AsRef<str>>(value: &'a Value, path: &[S]) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, step| {
        let step = step.as_ref();
        match current {
            Value::Object(map) => map.get(step),
            Value::Array(items) => step.parse::<usize>().ok().and_then(|i| items.get(i)),
            _ => None,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_in_nested_object() {
        let value = json!({"board": {"cells": [1, 2, 3]}});
        assert_eq!(get_in(&value, &["board", "cells", "1"]), Some(&json!(2)));
    }

    #[test]
    fn test_get_in_empty_path_is_identity() {
        let value = json!({"a": 1});
        let empty: [&str; 0] = [];
        assert_eq!(get_in(&value, &empty), Some(&value));
    }

    #[test]
    fn test_get_in_missing_step() {
        let value = json!({"a": {"b": null}});
        assert_eq!(get_in(&value, &["a", "b"]), Some(&Value::Null));
        assert_eq!(get_in(&value, &["a", "c"]), None);
        assert_eq!(get_in(&value, &["a", "b", "c"]), None);
        assert_eq!(get_in(&json!([1]), &["x"]), None);
    }
}
