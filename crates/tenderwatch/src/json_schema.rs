//! Structural JSON Schema checking.
//!
//! Covers the draft-04 keywords monitoring forms use: `type`, `enum`,
//! `const`, `required`, `properties`, `additionalProperties`, `items`,
//! length/size/range bounds, the combinators (`allOf`, `anyOf`, `oneOf`,
//! `not`), `pattern` / `patternProperties` and local `$ref`s. `format` is
//! accepted but not enforced.
//!
//! Patterns use the `regex` crate with search semantics, as `re.search` does:
//! an unanchored pattern matches anywhere in the string.
//!
//! Messages follow the familiar wording of Python's `jsonschema`, e.g.
//! `'tender' is a required property`.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;

use regex::Regex;
use serde_json::{Map, Value};

/// Nesting bound for `$ref` chains and subschemas.
const MAX_DEPTH: usize = 64;

/// First violation found, with the JSON path of the offending value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub message: String,
    pub path: Vec<String>,
}

impl fmt::Display for SchemaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.path.is_empty() {
            f.write_str(&self.message)
        } else {
            write!(f, "{} (at {})", self.message, self.path.join("."))
        }
    }
}

impl std::error::Error for SchemaError {}

/// Check `instance` against `schema`.
///
/// `#/definitions/...` references missing from `schema` itself are looked up
/// in `shared_definitions`.
pub fn validate(
    instance: &Value,
    schema: &Value,
    shared_definitions: Option<&Map<String, Value>>,
) -> Result<(), SchemaError> {
    let checker = Checker {
        root: schema,
        shared: shared_definitions,
        patterns: RefCell::default(),
    };
    let mut path = Vec::new();
    checker.check(instance, schema, &mut path, 0)
}

struct Checker<'s> {
    root: &'s Value,
    shared: Option<&'s Map<String, Value>>,
    /// Compiled `pattern` / `patternProperties` expressions.
    patterns: RefCell<HashMap<String, Regex>>,
}

/// Python-style rendering: strings in single quotes, the rest as JSON.
fn repr(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{s}'"),
        Value::Array(items) => {
            let inner: Vec<String> = items.iter().map(repr).collect();
            format!("[{}]", inner.join(", "))
        }
        other => other.to_string(),
    }
}

fn type_matches(instance: &Value, ty: &str) -> bool {
    match ty {
        "object" => instance.is_object(),
        "array" => instance.is_array(),
        "string" => instance.is_string(),
        "boolean" => instance.is_boolean(),
        "null" => instance.is_null(),
        "number" => instance.is_number(),
        "integer" => match instance {
            Value::Number(n) => {
                n.is_i64() || n.is_u64() || n.as_f64().is_some_and(|f| f.fract() == 0.0)
            }
            _ => false,
        },
        // Unknown type names never match.
        _ => false,
    }
}

impl<'s> Checker<'s> {
    fn fail(&self, path: &[String], message: String) -> Result<(), SchemaError> {
        Err(SchemaError {
            message,
            path: path.to_vec(),
        })
    }

    fn regex(&self, pattern: &str, path: &[String]) -> Result<Regex, SchemaError> {
        if let Some(re) = self.patterns.borrow().get(pattern) {
            return Ok(re.clone());
        }
        let re = Regex::new(pattern).map_err(|e| SchemaError {
            message: format!("'{pattern}' is not a valid regular expression: {e}"),
            path: path.to_vec(),
        })?;
        self.patterns
            .borrow_mut()
            .insert(pattern.to_owned(), re.clone());
        Ok(re)
    }

    fn resolve(&self, reference: &str) -> Option<&'s Value> {
        let pointer = reference.strip_prefix('#')?;
        if pointer.is_empty() {
            return Some(self.root);
        }
        if let Some(found) = self.root.pointer(pointer) {
            return Some(found);
        }
        let name = pointer.strip_prefix("/definitions/")?;
        let (head, rest) = match name.split_once('/') {
            Some((head, rest)) => (head, Some(rest)),
            None => (name, None),
        };
        let def = self.shared?.get(head)?;
        match rest {
            Some(rest) => def.pointer(&format!("/{rest}")),
            None => Some(def),
        }
    }

    fn check(
        &self,
        instance: &Value,
        schema: &'s Value,
        path: &mut Vec<String>,
        depth: usize,
    ) -> Result<(), SchemaError> {
        if depth > MAX_DEPTH {
            return self.fail(path, "schema nesting too deep".into());
        }
        let obj = match schema {
            Value::Object(obj) => obj,
            Value::Bool(true) => return Ok(()),
            Value::Bool(false) => {
                return self.fail(path, format!("False schema does not allow {}", repr(instance)))
            }
            _ => return Ok(()),
        };

        // Draft-04: `$ref` replaces every sibling keyword.
        if let Some(reference) = obj.get("$ref").and_then(Value::as_str) {
            return match self.resolve(reference) {
                Some(target) => self.check(instance, target, path, depth + 1),
                None => self.fail(path, format!("Unresolvable JSON pointer: {reference:?}")),
            };
        }

        self.check_type(instance, obj, path)?;
        self.check_values(instance, obj, path)?;
        self.check_combinators(instance, obj, path, depth)?;

        match instance {
            Value::Object(map) => self.check_object(map, obj, path, depth),
            Value::Array(items) => self.check_array(items, obj, path, depth),
            Value::String(s) => self.check_string(s, obj, path),
            Value::Number(_) => self.check_number(instance, obj, path),
            _ => Ok(()),
        }
    }

    fn check_type(
        &self,
        instance: &Value,
        obj: &Map<String, Value>,
        path: &[String],
    ) -> Result<(), SchemaError> {
        let ok = match obj.get("type") {
            Some(Value::String(ty)) => type_matches(instance, ty),
            Some(Value::Array(types)) => types
                .iter()
                .filter_map(Value::as_str)
                .any(|ty| type_matches(instance, ty)),
            _ => true,
        };
        if ok {
            return Ok(());
        }
        let expected = obj.get("type").map(repr).unwrap_or_default();
        self.fail(path, format!("{} is not of type {expected}", repr(instance)))
    }

    fn check_values(
        &self,
        instance: &Value,
        obj: &Map<String, Value>,
        path: &[String],
    ) -> Result<(), SchemaError> {
        if let Some(Value::Array(options)) = obj.get("enum") {
            if !options.contains(instance) {
                return self.fail(
                    path,
                    format!("{} is not one of {}", repr(instance), repr(&Value::Array(options.clone()))),
                );
            }
        }
        if let Some(expected) = obj.get("const") {
            if expected != instance {
                return self.fail(path, format!("{} was expected", repr(expected)));
            }
        }
        Ok(())
    }

    fn check_combinators(
        &self,
        instance: &Value,
        obj: &'s Map<String, Value>,
        path: &mut Vec<String>,
        depth: usize,
    ) -> Result<(), SchemaError> {
        if let Some(Value::Array(all)) = obj.get("allOf") {
            for sub in all {
                self.check(instance, sub, path, depth + 1)?;
            }
        }
        if let Some(Value::Array(any)) = obj.get("anyOf") {
            let matched = any
                .iter()
                .any(|sub| self.check(instance, sub, &mut path.clone(), depth + 1).is_ok());
            if !matched {
                return self.fail(
                    path,
                    format!("{} is not valid under any of the given schemas", repr(instance)),
                );
            }
        }
        if let Some(Value::Array(one)) = obj.get("oneOf") {
            let matched = one
                .iter()
                .filter(|sub| self.check(instance, sub, &mut path.clone(), depth + 1).is_ok())
                .count();
            if matched == 0 {
                return self.fail(
                    path,
                    format!("{} is not valid under any of the given schemas", repr(instance)),
                );
            }
            if matched > 1 {
                return self.fail(
                    path,
                    format!("{} is valid under each of several given schemas", repr(instance)),
                );
            }
        }
        if let Some(not) = obj.get("not") {
            if self.check(instance, not, &mut path.clone(), depth + 1).is_ok() {
                return self.fail(
                    path,
                    format!("{} is not allowed for {}", repr(not), repr(instance)),
                );
            }
        }
        Ok(())
    }

    fn check_object(
        &self,
        map: &Map<String, Value>,
        obj: &'s Map<String, Value>,
        path: &mut Vec<String>,
        depth: usize,
    ) -> Result<(), SchemaError> {
        if let Some(Value::Array(required)) = obj.get("required") {
            for name in required.iter().filter_map(Value::as_str) {
                if !map.contains_key(name) {
                    return self.fail(path, format!("'{name}' is a required property"));
                }
            }
        }

        let bound = |key: &str| obj.get(key).and_then(Value::as_u64);
        if let Some(min) = bound("minProperties") {
            if (map.len() as u64) < min {
                return self.fail(path, "does not have enough properties".into());
            }
        }
        if let Some(max) = bound("maxProperties") {
            if (map.len() as u64) > max {
                return self.fail(path, "has too many properties".into());
            }
        }

        let properties = obj.get("properties").and_then(Value::as_object);
        if let Some(properties) = properties {
            for (name, sub) in properties {
                if let Some(value) = map.get(name) {
                    path.push(name.clone());
                    self.check(value, sub, path, depth + 1)?;
                    path.pop();
                }
            }
        }

        let mut patterns: Vec<(Regex, &'s Value)> = Vec::new();
        if let Some(Value::Object(by_pattern)) = obj.get("patternProperties") {
            for (pattern, sub) in by_pattern {
                patterns.push((self.regex(pattern, path)?, sub));
            }
        }
        for (name, value) in map {
            for (re, sub) in &patterns {
                if re.is_match(name) {
                    path.push(name.clone());
                    self.check(value, sub, path, depth + 1)?;
                    path.pop();
                }
            }
        }

        let additional = |name: &str| {
            !properties.is_some_and(|p| p.contains_key(name))
                && !patterns.iter().any(|(re, _)| re.is_match(name))
        };
        match obj.get("additionalProperties") {
            Some(Value::Bool(false)) => {
                let extra: Vec<String> = map
                    .keys()
                    .filter(|k| additional(k))
                    .map(|k| format!("'{k}'"))
                    .collect();
                if !extra.is_empty() {
                    let verb = if extra.len() == 1 { "was" } else { "were" };
                    return self.fail(
                        path,
                        format!(
                            "Additional properties are not allowed ({} {verb} unexpected)",
                            extra.join(", ")
                        ),
                    );
                }
            }
            Some(sub @ Value::Object(_)) => {
                for (name, value) in map {
                    if !additional(name) {
                        continue;
                    }
                    path.push(name.clone());
                    self.check(value, sub, path, depth + 1)?;
                    path.pop();
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn check_array(
        &self,
        items: &[Value],
        obj: &'s Map<String, Value>,
        path: &mut Vec<String>,
        depth: usize,
    ) -> Result<(), SchemaError> {
        let bound = |key: &str| obj.get(key).and_then(Value::as_u64);
        if let Some(min) = bound("minItems") {
            if (items.len() as u64) < min {
                return self.fail(path, format!("{} is too short", repr(&Value::Array(items.to_vec()))));
            }
        }
        if let Some(max) = bound("maxItems") {
            if (items.len() as u64) > max {
                return self.fail(path, format!("{} is too long", repr(&Value::Array(items.to_vec()))));
            }
        }
        if obj.get("uniqueItems") == Some(&Value::Bool(true)) {
            for (i, item) in items.iter().enumerate() {
                if items[..i].contains(item) {
                    return self.fail(path, format!("{} has non-unique elements", repr(&Value::Array(items.to_vec()))));
                }
            }
        }

        match obj.get("items") {
            Some(Value::Array(tuple)) => {
                for (i, (item, sub)) in items.iter().zip(tuple).enumerate() {
                    path.push(i.to_string());
                    self.check(item, sub, path, depth + 1)?;
                    path.pop();
                }
            }
            Some(sub) => {
                for (i, item) in items.iter().enumerate() {
                    path.push(i.to_string());
                    self.check(item, sub, path, depth + 1)?;
                    path.pop();
                }
            }
            None => {}
        }
        Ok(())
    }

    fn check_string(
        &self,
        s: &str,
        obj: &Map<String, Value>,
        path: &[String],
    ) -> Result<(), SchemaError> {
        let len = s.chars().count() as u64;
        if let Some(min) = obj.get("minLength").and_then(Value::as_u64) {
            if len < min {
                return self.fail(path, format!("'{s}' is too short"));
            }
        }
        if let Some(max) = obj.get("maxLength").and_then(Value::as_u64) {
            if len > max {
                return self.fail(path, format!("'{s}' is too long"));
            }
        }
        if let Some(pattern) = obj.get("pattern").and_then(Value::as_str) {
            if !self.regex(pattern, path)?.is_match(s) {
                return self.fail(path, format!("'{s}' does not match '{pattern}'"));
            }
        }
        Ok(())
    }

    fn check_number(
        &self,
        instance: &Value,
        obj: &Map<String, Value>,
        path: &[String],
    ) -> Result<(), SchemaError> {
        let Some(n) = instance.as_f64() else {
            return Ok(());
        };
        let limit = |key: &str| obj.get(key).and_then(Value::as_f64);
        // Draft-04 spells exclusivity as a boolean next to the bound.
        let exclusive = |key: &str| obj.get(key) == Some(&Value::Bool(true));

        if let Some(min) = limit("minimum") {
            if n < min || (exclusive("exclusiveMinimum") && n == min) {
                return self.fail(path, format!("{instance} is less than the minimum of {min}"));
            }
        }
        if let Some(max) = limit("maximum") {
            if n > max || (exclusive("exclusiveMaximum") && n == max) {
                return self.fail(path, format!("{instance} is greater than the maximum of {max}"));
            }
        }
        if let Some(min) = limit("exclusiveMinimum") {
            if n <= min {
                return self.fail(path, format!("{instance} is less than or equal to the minimum of {min}"));
            }
        }
        if let Some(max) = limit("exclusiveMaximum") {
            if n >= max {
                return self.fail(path, format!("{instance} is greater than or equal to the maximum of {max}"));
            }
        }
        if let Some(step) = limit("multipleOf") {
            if step > 0.0 && (n / step).fract() != 0.0 {
                return self.fail(path, format!("{instance} is not a multiple of {step}"));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn err(instance: Value, schema: Value) -> String {
        validate(&instance, &schema, None).unwrap_err().message
    }

    #[test]
    fn test_required_and_types() {
        let schema = json!({
            "type": "object",
            "required": ["tender", "comment"],
            "properties": {
                "tender": {"type": "string", "minLength": 32, "maxLength": 32},
                "comment": {"type": "string"},
                "score": {"type": "integer", "minimum": 1, "maximum": 5}
            }
        });
        assert!(validate(
            &json!({"tender": "0".repeat(32), "comment": "тест", "score": 3}),
            &schema,
            None
        )
        .is_ok());
        assert_eq!(
            err(json!({"comment": "x"}), schema.clone()),
            "'tender' is a required property"
        );
        assert_eq!(
            err(json!({"tender": 1, "comment": "x"}), schema.clone()),
            "1 is not of type 'string'"
        );
        assert!(err(json!({"tender": "0".repeat(32), "comment": "x", "score": 9}), schema.clone())
            .contains("greater than the maximum"));
        assert!(err(json!({"tender": "0".repeat(32), "comment": "x", "score": 2.5}), schema)
            .contains("is not of type 'integer'"));
    }

    #[test]
    fn test_enum_and_additional_properties() {
        let schema = json!({
            "properties": {"kind": {"enum": ["a", "b"]}},
            "additionalProperties": false
        });
        assert_eq!(err(json!({"kind": "c"}), schema.clone()), "'c' is not one of ['a', 'b']");
        assert_eq!(
            err(json!({"kind": "a", "extra": 1}), schema),
            "Additional properties are not allowed ('extra' was unexpected)"
        );
    }

    #[test]
    fn test_pattern() {
        let schema = json!({"properties": {"tender": {"type": "string", "pattern": "^[0-9a-f]{32}$"}}});
        assert!(validate(&json!({"tender": "0".repeat(32)}), &schema, None).is_ok());
        let e = validate(&json!({"tender": "NOT-HEX!"}), &schema, None).unwrap_err();
        assert_eq!(e.message, "'NOT-HEX!' does not match '^[0-9a-f]{32}$'");
        assert_eq!(e.path, vec!["tender"]);

        // Unanchored patterns match anywhere.
        let schema = json!({"pattern": "b+"});
        assert!(validate(&json!("abbc"), &schema, None).is_ok());
        assert!(validate(&json!("ac"), &schema, None).is_err());
        // Non-strings are not constrained.
        assert!(validate(&json!(5), &schema, None).is_ok());

        assert!(err(json!("x"), json!({"pattern": "("})).contains("not a valid regular expression"));
    }

    #[test]
    fn test_pattern_properties() {
        let schema = json!({
            "properties": {"a": {}},
            "patternProperties": {"^x-": {"type": "string"}},
            "additionalProperties": false
        });
        assert!(validate(&json!({"a": 1, "x-note": "ok"}), &schema, None).is_ok());
        assert_eq!(
            err(json!({"a": 1, "zzz": 2}), schema.clone()),
            "Additional properties are not allowed ('zzz' was unexpected)"
        );
        let e = validate(&json!({"x-note": 3}), &schema, None).unwrap_err();
        assert_eq!(e.message, "3 is not of type 'string'");
        assert_eq!(e.path, vec!["x-note"]);

        let schema = json!({
            "patternProperties": {"^n_": {"type": "integer"}},
            "additionalProperties": {"type": "boolean"}
        });
        assert!(validate(&json!({"n_1": 1, "flag": true}), &schema, None).is_ok());
        assert!(err(json!({"n_1": 1, "flag": 1}), schema).contains("is not of type 'boolean'"));
    }

    #[test]
    fn test_refs_local_and_shared() {
        let shared = json!({"nonEmpty": {"type": "string", "minLength": 1}});
        let schema = json!({
            "definitions": {"score": {"type": "integer"}},
            "properties": {
                "score": {"$ref": "#/definitions/score"},
                "title": {"$ref": "#/definitions/nonEmpty"}
            }
        });
        let shared = shared.as_object();
        assert!(validate(&json!({"score": 2, "title": "t"}), &schema, shared).is_ok());
        let e = validate(&json!({"score": 2, "title": ""}), &schema, shared).unwrap_err();
        assert_eq!(e.message, "'' is too short");
        assert_eq!(e.path, vec!["title"]);
        assert!(validate(&json!({"title": "t"}), &schema, None)
            .unwrap_err()
            .message
            .starts_with("Unresolvable"));
    }

    #[test]
    fn test_combinators() {
        let schema = json!({"oneOf": [{"type": "string"}, {"type": "integer"}]});
        assert!(validate(&json!("x"), &schema, None).is_ok());
        assert!(err(json!(true), schema).contains("not valid under any"));

        let schema = json!({"anyOf": [{"minimum": 10}, {"maximum": 0}]});
        assert!(validate(&json!(-1), &schema, None).is_ok());
        assert!(validate(&json!(5), &schema, None).is_err());

        let schema = json!({"not": {"type": "null"}});
        assert!(validate(&json!(null), &schema, None).is_err());
    }

    #[test]
    fn test_arrays() {
        let schema = json!({"type": "array", "minItems": 1, "uniqueItems": true, "items": {"type": "string"}});
        assert!(validate(&json!(["a", "b"]), &schema, None).is_ok());
        assert!(err(json!([]), schema.clone()).ends_with("is too short"));
        assert!(err(json!(["a", "a"]), schema.clone()).contains("non-unique"));
        let e = validate(&json!(["a", 1]), &schema, None).unwrap_err();
        assert_eq!(e.path, vec!["1"]);
    }

    #[test]
    fn test_self_reference_is_bounded() {
        let schema = json!({"$ref": "#"});
        assert!(err(json!({}), schema).contains("too deep"));
    }
}
