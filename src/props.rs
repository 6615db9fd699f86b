//! Global prop/store serialization policy.
//!
//! For a key such as `globalProps`, candidate objects are taken from four
//! scopes in increasing specificity: application locals, request locals,
//! response locals, then the values passed on the render call. Later scopes
//! override earlier ones property by property.
//!
//! Only properties named in a `$serialized` array are kept. The manifest is
//! the union of every scope's `$serialized` list; properties passed on the
//! render call are always serialized.

use std::collections::BTreeSet;

use serde_json::{Map, Value};

use crate::host::{Locals, Scopes};

/// Key of the serialization manifest inside a candidate object.
pub const SERIALIZED_KEY: &str = "$serialized";

pub const GLOBAL_PROPS_KEY: &str = "globalProps";
pub const GLOBAL_STORE_KEY: &str = "globalStore";

/// Merge `key` across the hosting scopes and `call`, keeping only
/// serializable properties.
pub fn build_serialized(key: &str, scopes: &Scopes<'_>, call: &Locals) -> Map<String, Value> {
    let candidates: Vec<&Locals> = [scopes.app, scopes.request, scopes.response]
        .into_iter()
        .filter_map(|scope| scope.get(key).and_then(Value::as_object))
        .collect();

    let mut serialized: BTreeSet<&str> = BTreeSet::new();
    for candidate in candidates.iter().copied().chain(std::iter::once(call)) {
        if let Some(Value::Array(names)) = candidate.get(SERIALIZED_KEY) {
            serialized.extend(names.iter().filter_map(Value::as_str));
        }
    }
    serialized.extend(call.keys().map(String::as_str).filter(|k| *k != SERIALIZED_KEY));

    let mut merged = Map::new();
    for candidate in candidates.into_iter().chain(std::iter::once(call)) {
        for (name, value) in candidate {
            if name != SERIALIZED_KEY && serialized.contains(name.as_str()) {
                merged.insert(name.clone(), value.clone());
            }
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn locals(value: Value) -> Locals {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_only_marked_properties_are_kept() {
        let app = locals(json!({
            "globalProps": { "user": "ada", "secret": "x", "$serialized": ["user"] }
        }));
        let empty = Locals::new();
        let scopes = Scopes { app: &app, request: &empty, response: &empty };

        let out = build_serialized(GLOBAL_PROPS_KEY, &scopes, &Locals::new());
        assert_eq!(Value::Object(out), json!({ "user": "ada" }));
    }

    #[test]
    fn test_later_scopes_override_earlier() {
        let app = locals(json!({ "globalProps": { "lang": "en", "$serialized": ["lang", "theme"] } }));
        let request = locals(json!({ "globalProps": { "lang": "fr" } }));
        let response = locals(json!({ "globalProps": { "theme": "dark", "lang": "de" } }));
        let scopes = Scopes { app: &app, request: &request, response: &response };
        let call = locals(json!({ "lang": "es" }));

        let out = build_serialized(GLOBAL_PROPS_KEY, &scopes, &call);
        assert_eq!(Value::Object(out), json!({ "lang": "es", "theme": "dark" }));
    }

    #[test]
    fn test_manifest_from_later_scope_marks_earlier_value() {
        let app = locals(json!({ "globalStore": { "count": 1 } }));
        let response = locals(json!({ "globalStore": { "$serialized": ["count"] } }));
        let empty = Locals::new();
        let scopes = Scopes { app: &app, request: &empty, response: &response };

        let out = build_serialized(GLOBAL_STORE_KEY, &scopes, &Locals::new());
        assert_eq!(Value::Object(out), json!({ "count": 1 }));
    }

    #[test]
    fn test_call_values_are_serialized() {
        let empty = Locals::new();
        let scopes = Scopes { app: &empty, request: &empty, response: &empty };
        let call = locals(json!({ "count": 0 }));

        let out = build_serialized(GLOBAL_STORE_KEY, &scopes, &call);
        assert_eq!(Value::Object(out), json!({ "count": 0 }));
    }

    #[test]
    fn test_non_object_candidates_are_ignored() {
        let app = locals(json!({ "globalProps": "not an object" }));
        let empty = Locals::new();
        let scopes = Scopes { app: &app, request: &empty, response: &empty };

        assert!(build_serialized(GLOBAL_PROPS_KEY, &scopes, &Locals::new()).is_empty());
    }
}
