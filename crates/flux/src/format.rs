//! Canonical formatter (spec.md §4.C): schema validation over the raw value
//! tree, plus a deterministic, idempotent serialization driven by the typed
//! AST (component A/B feed this; D/E/F consume `ast::Module`, not this
//! module's output, directly).
//!
//! The canonical form is built as an ordered [`serde_json::Value`] tree (key
//! order fixed by insertion, thanks to `serde_json`'s `preserve_order`
//! feature) and handed to `serde_json::to_string_pretty`, rather than
//! a hand-rolled printer: two-space indent and non-ASCII-preserving output
//! are `serde_json`'s defaults already.

use indexmap::IndexMap;
use serde_json::{Map, Value, json};

use crate::ast::{self, DecodeError, Expr, Module, Stmt};

/// One schema-validation finding (spec.md §4.C).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaIssue {
    pub pointer: String,
    pub message: String,
    pub validator: String,
    pub expected: String,
}

impl SchemaIssue {
    fn new(pointer: impl Into<String>, validator: &str, expected: &str, message: impl Into<String>) -> Self {
        Self { pointer: pointer.into(), message: message.into(), validator: validator.to_owned(), expected: expected.to_owned() }
    }
}

/// Structural schema validation over the raw parsed value, independent of
/// whether [`ast::Module::from_value`] would also succeed.
#[must_use]
pub fn validate_schema(value: &Value) -> Vec<SchemaIssue> {
    let mut issues = Vec::new();
    let Some(obj) = value.as_object() else {
        issues.push(SchemaIssue::new("", "type", "object", "module must be a JSON object"));
        return issues;
    };
    require_string(obj, "", "module", &mut issues);
    require_string(obj, "", "version", &mut issues);
    match obj.get("functions") {
        Some(Value::Array(functions)) => {
            for (i, f) in functions.iter().enumerate() {
                validate_function(f, &format!("/functions/{i}"), &mut issues);
            }
        }
        Some(_) => issues.push(SchemaIssue::new("/functions", "type", "array", "`functions` must be an array")),
        None => issues.push(SchemaIssue::new("", "required", "functions", "module missing `functions`")),
    }
    for key in ["imports", "externs"] {
        require_string_array_opt(obj, "", key, &mut issues);
    }
    issues
}

fn validate_function(value: &Value, pointer: &str, issues: &mut Vec<SchemaIssue>) {
    let Some(obj) = value.as_object() else {
        issues.push(SchemaIssue::new(pointer, "type", "object", "function must be an object"));
        return;
    };
    require_string(obj, pointer, "name", issues);
    match obj.get("params") {
        Some(Value::Array(_)) => {}
        Some(_) => issues.push(SchemaIssue::new(pointer, "type", "array", "`params` must be an array")),
        None => issues.push(SchemaIssue::new(pointer, "required", "params", "function missing `params`")),
    }
    match obj.get("body") {
        Some(Value::Array(_)) => {}
        Some(_) => issues.push(SchemaIssue::new(pointer, "type", "array", "`body` must be an array")),
        None => issues.push(SchemaIssue::new(pointer, "required", "body", "function missing `body`")),
    }
    if let Some(Value::Array(pt)) = obj.get("param_types") {
        if let Some(Value::Array(params)) = obj.get("params") {
            if pt.len() != params.len() {
                issues.push(SchemaIssue::new(
                    &format!("{pointer}/param_types"),
                    "length",
                    "same length as params",
                    "`param_types` length must match `params`",
                ));
            }
        }
    }
}

fn require_string(obj: &Map<String, Value>, pointer: &str, key: &str, issues: &mut Vec<SchemaIssue>) {
    match obj.get(key) {
        Some(Value::String(_)) => {}
        Some(_) => issues.push(SchemaIssue::new(pointer, "type", "string", format!("`{key}` must be a string"))),
        None => issues.push(SchemaIssue::new(pointer, "required", key, format!("missing `{key}`"))),
    }
}

fn require_string_array_opt(obj: &Map<String, Value>, pointer: &str, key: &str, issues: &mut Vec<SchemaIssue>) {
    let Some(v) = obj.get(key) else { return };
    let Some(items) = v.as_array() else {
        issues.push(SchemaIssue::new(pointer, "type", "array", format!("`{key}` must be an array")));
        return;
    };
    if items.iter().any(|i| !i.is_string()) {
        issues.push(SchemaIssue::new(pointer, "type", "array of strings", format!("`{key}` entries must be strings")));
    }
}

/// Canonicalises a raw value: decode into the typed AST, then re-serialize
/// deterministically. `canon(canon(x)) == canon(x)` byte-for-byte because the
/// typed structure, not the input's own key order, drives the output.
pub fn canon(value: &Value) -> Result<String, DecodeError> {
    let module = Module::from_value(value)?;
    Ok(canon_module(&module))
}

#[must_use]
pub fn canon_module(module: &Module) -> String {
    let mut body = serde_json::to_string_pretty(&module_to_value(module)).expect("canonical value always serializes");
    body.push('\n');
    body
}

fn module_to_value(m: &Module) -> Value {
    let mut map = IndexMap::new();
    map.insert("module".to_owned(), json!(m.name));
    map.insert("version".to_owned(), json!(m.version));
    if !m.imports.is_empty() {
        map.insert("imports".to_owned(), json!(m.imports));
    }
    if !m.externs.is_empty() {
        map.insert("externs".to_owned(), json!(m.externs));
    }
    map.insert("functions".to_owned(), Value::Array(m.functions.iter().map(function_to_value).collect()));
    if !m.tests.is_empty() {
        map.insert("tests".to_owned(), Value::Array(m.tests.iter().map(unit_test_to_value).collect()));
    }
    if !m.properties.is_empty() {
        map.insert("properties".to_owned(), Value::Array(m.properties.iter().map(property_to_value).collect()));
    }
    if let Some(metadata) = &m.metadata {
        map.insert("metadata".to_owned(), sort_value(metadata));
    }
    for (k, v) in &m.extra {
        map.insert(k.clone(), sort_value(v));
    }
    ordered_object(map)
}

fn function_to_value(f: &ast::Function) -> Value {
    let mut map = IndexMap::new();
    map.insert("name".to_owned(), json!(f.name));
    if let Some(doc) = &f.doc {
        map.insert("doc".to_owned(), json!(doc));
    }
    if !f.type_params.is_empty() {
        map.insert("type_params".to_owned(), json!(f.type_params));
    }
    map.insert("params".to_owned(), json!(f.params));
    if let Some(pt) = &f.param_types {
        map.insert("param_types".to_owned(), json!(pt));
    }
    if let Some(r) = &f.returns {
        map.insert("returns".to_owned(), json!(r));
    }
    map.insert("effects".to_owned(), json!(f.effects));
    if !f.requires.is_empty() {
        map.insert("requires".to_owned(), Value::Array(f.requires.iter().map(expr_to_value).collect()));
    }
    if !f.ensures.is_empty() {
        map.insert("ensures".to_owned(), Value::Array(f.ensures.iter().map(expr_to_value).collect()));
    }
    map.insert("body".to_owned(), Value::Array(f.body.iter().map(stmt_to_value).collect()));
    if !f.tests.is_empty() {
        map.insert("tests".to_owned(), Value::Array(f.tests.iter().map(unit_test_to_value).collect()));
    }
    if !f.properties.is_empty() {
        map.insert("properties".to_owned(), Value::Array(f.properties.iter().map(property_to_value).collect()));
    }
    for (k, v) in &f.extra {
        map.insert(k.clone(), sort_value(v));
    }
    ordered_object(map)
}

fn unit_test_to_value(t: &ast::UnitTest) -> Value {
    let mut map = IndexMap::new();
    if let Some(name) = &t.name {
        map.insert("name".to_owned(), json!(name));
    }
    if let Some(function) = &t.function {
        map.insert("function".to_owned(), json!(function));
    }
    map.insert("args".to_owned(), Value::Array(t.args.iter().map(sort_value).collect()));
    map.insert("expect".to_owned(), sort_value(&t.expect));
    ordered_object(map)
}

fn property_to_value(p: &ast::Property) -> Value {
    let mut map = IndexMap::new();
    if let Some(name) = &p.name {
        map.insert("name".to_owned(), json!(name));
    }
    map.insert("function".to_owned(), json!(p.function));
    map.insert("postcondition".to_owned(), expr_to_value(&p.postcondition));
    map.insert("cases".to_owned(), json!(p.cases));
    map.insert("seed".to_owned(), json!(p.seed));
    ordered_object(map)
}

fn stmt_to_value(s: &Stmt) -> Value {
    let mut inner = IndexMap::new();
    let tag = match s {
        Stmt::Let { name, value } => {
            inner.insert("name".to_owned(), json!(name));
            inner.insert("value".to_owned(), expr_to_value(value));
            "let"
        }
        Stmt::Expr { expr } => {
            inner.insert("expr".to_owned(), expr_to_value(expr));
            "expr"
        }
        Stmt::Assert { expr, message } => {
            inner.insert("expr".to_owned(), expr_to_value(expr));
            if let Some(m) = message {
                inner.insert("message".to_owned(), expr_to_value(m));
            }
            "assert"
        }
        Stmt::Return { expr } => {
            inner.insert("expr".to_owned(), expr_to_value(expr));
            "return"
        }
        Stmt::If { cond, then, r#else } => {
            inner.insert("cond".to_owned(), expr_to_value(cond));
            inner.insert("then".to_owned(), Value::Array(then.iter().map(stmt_to_value).collect()));
            inner.insert("else".to_owned(), Value::Array(r#else.iter().map(stmt_to_value).collect()));
            "if"
        }
    };
    let mut outer = IndexMap::new();
    outer.insert(tag.to_owned(), ordered_object(inner));
    ordered_object(outer)
}

fn expr_to_value(e: &Expr) -> Value {
    match e {
        Expr::Literal(v) => sort_value(v),
        Expr::Var(name) => {
            let mut outer = IndexMap::new();
            outer.insert("var".to_owned(), json!(name));
            ordered_object(outer)
        }
        Expr::List(items) => {
            let mut outer = IndexMap::new();
            outer.insert("list".to_owned(), Value::Array(items.iter().map(expr_to_value).collect()));
            ordered_object(outer)
        }
        Expr::Obj(fields) => {
            let mut sorted: Vec<_> = fields.iter().collect();
            sorted.sort_by_key(|(k, _)| k.clone());
            let mut inner = IndexMap::new();
            for (k, v) in sorted {
                inner.insert(k.clone(), expr_to_value(v));
            }
            let mut outer = IndexMap::new();
            outer.insert("obj".to_owned(), ordered_object(inner));
            ordered_object(outer)
        }
        Expr::Call { func, args } => {
            let mut inner = IndexMap::new();
            inner.insert("fn".to_owned(), json!(func));
            inner.insert("args".to_owned(), Value::Array(args.iter().map(expr_to_value).collect()));
            let mut outer = IndexMap::new();
            outer.insert("call".to_owned(), ordered_object(inner));
            ordered_object(outer)
        }
    }
}

/// Recursively sorts object keys lexicographically; used for values with no
/// fixed schema (record literals, test arguments/expectations, metadata).
fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = IndexMap::new();
            for k in keys {
                out.insert(k.clone(), sort_value(&map[k]));
            }
            ordered_object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sort_value).collect()),
        other => other.clone(),
    }
}

fn ordered_object(map: IndexMap<String, Value>) -> Value {
    let mut out = Map::new();
    for (k, v) in map {
        out.insert(k, v);
    }
    Value::Object(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "version": "1",
            "functions": [{
                "body": [{"return": {"expr": 1}}],
                "params": [],
                "name": "f",
                "effects": ["pure"]
            }],
            "module": "m"
        })
    }

    #[test]
    fn canonicalization_reorders_keys() {
        let out = canon(&sample()).unwrap();
        let module_key_pos = out.find("\"module\"").unwrap();
        let version_key_pos = out.find("\"version\"").unwrap();
        let functions_key_pos = out.find("\"functions\"").unwrap();
        assert!(module_key_pos < version_key_pos);
        assert!(version_key_pos < functions_key_pos);
    }

    #[test]
    fn canonicalization_is_idempotent() {
        let once = canon(&sample()).unwrap();
        let reparsed: Value = serde_json::from_str(&once).unwrap();
        let twice = canon(&reparsed).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn ends_with_trailing_newline() {
        let out = canon(&sample()).unwrap();
        assert!(out.ends_with('\n'));
    }

    #[test]
    fn record_fields_sort_lexicographically() {
        let doc = json!({
            "module": "m", "version": "1",
            "functions": [{
                "name": "f", "params": [],
                "body": [{"return": {"expr": {"obj": {"b": 1, "a": 2}}}}]
            }]
        });
        let out = canon(&doc).unwrap();
        let a_pos = out.find("\"a\"").unwrap();
        let b_pos = out.find("\"b\"").unwrap();
        assert!(a_pos < b_pos);
    }

    #[test]
    fn schema_validation_flags_missing_required_keys() {
        let issues = validate_schema(&json!({"module": "m"}));
        assert!(issues.iter().any(|i| i.expected == "functions"));
    }
}
