//! The JSON AST data model (spec.md §3): modules, functions, statements and
//! expressions, decoded from an already-parsed [`serde_json::Value`] tree.
//!
//! Decoding is a second, fallible step over the tree the positional parser
//! (component B) produces rather than a direct `serde_json::from_str`, so the
//! raw value and its span maps stay available to every later pass, the same
//! split a syntax tree (`ruff`-style) draws from the typed views built over
//! it.

use std::fmt;

use indexmap::IndexMap;
use serde_json::Value;

/// A decode failure: which JSON pointer, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodeError {
    pub pointer: String,
    pub message: String,
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.pointer, self.message)
    }
}

impl std::error::Error for DecodeError {}

fn err(pointer: &str, message: impl Into<String>) -> DecodeError {
    DecodeError { pointer: pointer.to_owned(), message: message.into() }
}

/// A module: an ordered sequence of functions plus tests/properties/imports.
#[derive(Debug, Clone, Default)]
pub struct Module {
    pub name: String,
    pub version: String,
    pub imports: Vec<String>,
    pub externs: Vec<String>,
    pub functions: Vec<Function>,
    pub tests: Vec<UnitTest>,
    pub properties: Vec<Property>,
    pub metadata: Option<Value>,
    /// Keys outside the known module schema, kept for round-tripping and
    /// serialized in lexicographic order by the canonical formatter.
    pub extra: std::collections::BTreeMap<String, Value>,
}

/// A function definition.
#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub doc: Option<String>,
    pub type_params: Vec<String>,
    pub params: Vec<String>,
    pub param_types: Option<Vec<String>>,
    pub returns: Option<String>,
    pub effects: Vec<String>,
    pub requires: Vec<Expr>,
    pub ensures: Vec<Expr>,
    pub body: Vec<Stmt>,
    pub tests: Vec<UnitTest>,
    pub properties: Vec<Property>,
    pub extra: std::collections::BTreeMap<String, Value>,
}

const MODULE_KEYS: &[&str] =
    &["module", "version", "imports", "externs", "functions", "tests", "properties", "metadata"];
const FUNCTION_KEYS: &[&str] = &[
    "name",
    "doc",
    "type_params",
    "params",
    "param_types",
    "returns",
    "effects",
    "requires",
    "ensures",
    "body",
    "tests",
    "properties",
];

fn extra_keys(obj: &serde_json::Map<String, Value>, known: &[&str]) -> std::collections::BTreeMap<String, Value> {
    obj.iter()
        .filter(|(k, _)| !known.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// A module- or function-level unit test: call with concrete args, compare
/// against an expected literal value.
#[derive(Debug, Clone)]
pub struct UnitTest {
    pub name: Option<String>,
    pub function: Option<String>,
    pub args: Vec<Value>,
    pub expect: Value,
}

/// A property test: generate inputs for `function`'s parameters and check
/// `postcondition` (an expression over the parameter names plus `result`).
#[derive(Debug, Clone)]
pub struct Property {
    pub name: Option<String>,
    pub function: String,
    pub postcondition: Expr,
    pub cases: u32,
    pub seed: u64,
}

/// Statement variants (spec.md §3). Exactly one tag per node.
#[derive(Debug, Clone)]
pub enum Stmt {
    Let { name: String, value: Expr },
    Expr { expr: Expr },
    Assert { expr: Expr, message: Option<Expr> },
    Return { expr: Expr },
    If { cond: Expr, then: Vec<Stmt>, r#else: Vec<Stmt> },
}

/// Expression variants (spec.md §3).
#[derive(Debug, Clone)]
pub enum Expr {
    Literal(Value),
    Var(String),
    List(Vec<Expr>),
    Obj(IndexMap<String, Expr>),
    Call { func: String, args: Vec<Expr> },
}

const RESERVED_NAME: &str = "result";

#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name == RESERVED_NAME
}

impl Module {
    pub fn from_value(value: &Value) -> Result<Self, DecodeError> {
        let obj = value.as_object().ok_or_else(|| err("", "module must be an object"))?;
        let name = get_str(obj, "", "module")?;
        let version = get_str(obj, "", "version")?;
        let imports = get_str_array_opt(obj, "", "imports")?.unwrap_or_default();
        let externs = get_str_array_opt(obj, "", "externs")?.unwrap_or_default();

        let raw_functions = obj
            .get("functions")
            .and_then(Value::as_array)
            .ok_or_else(|| err("/functions", "`functions` must be an array"))?;
        let mut functions = Vec::with_capacity(raw_functions.len());
        for (i, f) in raw_functions.iter().enumerate() {
            functions.push(Function::from_value(f, &format!("/functions/{i}"))?);
        }

        let tests = decode_unit_tests(obj, "")?;
        let properties = decode_properties(obj, "")?;
        let metadata = obj.get("metadata").cloned();
        let extra = extra_keys(obj, MODULE_KEYS);

        Ok(Module { name, version, imports, externs, functions, tests, properties, metadata, extra })
    }
}

impl Function {
    fn from_value(value: &Value, pointer: &str) -> Result<Self, DecodeError> {
        let obj = value.as_object().ok_or_else(|| err(pointer, "function must be an object"))?;
        let name = get_str(obj, pointer, "name")?;
        let doc = obj.get("doc").and_then(Value::as_str).map(str::to_owned);
        let type_params = get_str_array_opt(obj, pointer, "type_params")?.unwrap_or_default();
        let params = get_str_array_opt(obj, pointer, "params")?
            .ok_or_else(|| err(pointer, "`params` must be an array of strings"))?;
        let param_types = get_str_array_opt(obj, pointer, "param_types")?;
        if let Some(pt) = &param_types {
            if pt.len() != params.len() {
                return Err(err(&format!("{pointer}/param_types"), "param_types length must match params"));
            }
        }
        let returns = obj.get("returns").and_then(Value::as_str).map(str::to_owned);
        let effects = get_str_array_opt(obj, pointer, "effects")?.unwrap_or_else(|| vec!["pure".to_owned()]);

        let requires = decode_expr_array(obj, pointer, "requires")?;
        let ensures = decode_expr_array(obj, pointer, "ensures")?;

        let raw_body = obj
            .get("body")
            .and_then(Value::as_array)
            .ok_or_else(|| err(&format!("{pointer}/body"), "`body` must be an array"))?;
        let mut body = Vec::with_capacity(raw_body.len());
        for (i, s) in raw_body.iter().enumerate() {
            body.push(Stmt::from_value(s, &format!("{pointer}/body/{i}"))?);
        }

        let tests = decode_unit_tests(obj, pointer)?;
        let properties = decode_properties(obj, pointer)?;
        let extra = extra_keys(obj, FUNCTION_KEYS);

        Ok(Function {
            name,
            doc,
            type_params,
            params,
            param_types,
            returns,
            effects,
            requires,
            ensures,
            body,
            tests,
            properties,
            extra,
        })
    }
}

fn decode_expr_array(obj: &serde_json::Map<String, Value>, pointer: &str, key: &str) -> Result<Vec<Expr>, DecodeError> {
    let Some(arr) = obj.get(key) else { return Ok(Vec::new()) };
    let arr = arr.as_array().ok_or_else(|| err(pointer, format!("`{key}` must be an array")))?;
    arr.iter()
        .enumerate()
        .map(|(i, e)| Expr::from_value(e, &format!("{pointer}/{key}/{i}")))
        .collect()
}

fn decode_unit_tests(obj: &serde_json::Map<String, Value>, pointer: &str) -> Result<Vec<UnitTest>, DecodeError> {
    let Some(arr) = obj.get("tests") else { return Ok(Vec::new()) };
    let arr = arr.as_array().ok_or_else(|| err(pointer, "`tests` must be an array"))?;
    arr.iter()
        .enumerate()
        .map(|(i, t)| {
            let tp = format!("{pointer}/tests/{i}");
            let tobj = t.as_object().ok_or_else(|| err(&tp, "test must be an object"))?;
            let name = tobj.get("name").and_then(Value::as_str).map(str::to_owned);
            let function = tobj.get("function").and_then(Value::as_str).map(str::to_owned);
            let args = tobj
                .get("args")
                .and_then(Value::as_array)
                .ok_or_else(|| err(&tp, "test `args` must be an array"))?
                .clone();
            let expect = tobj.get("expect").cloned().ok_or_else(|| err(&tp, "test missing `expect`"))?;
            Ok(UnitTest { name, function, args, expect })
        })
        .collect()
}

fn decode_properties(obj: &serde_json::Map<String, Value>, pointer: &str) -> Result<Vec<Property>, DecodeError> {
    let Some(arr) = obj.get("properties") else { return Ok(Vec::new()) };
    let arr = arr.as_array().ok_or_else(|| err(pointer, "`properties` must be an array"))?;
    arr.iter()
        .enumerate()
        .map(|(i, p)| {
            let pp = format!("{pointer}/properties/{i}");
            let pobj = p.as_object().ok_or_else(|| err(&pp, "property must be an object"))?;
            let name = pobj.get("name").and_then(Value::as_str).map(str::to_owned);
            let function = get_str(pobj, &pp, "function")?;
            let postcondition_value =
                pobj.get("postcondition").ok_or_else(|| err(&pp, "property missing `postcondition`"))?;
            let postcondition = Expr::from_value(postcondition_value, &format!("{pp}/postcondition"))?;
            let cases = pobj.get("cases").and_then(Value::as_u64).unwrap_or(100) as u32;
            let seed = pobj.get("seed").and_then(Value::as_u64).unwrap_or(0);
            Ok(Property { name, function, postcondition, cases, seed })
        })
        .collect()
}

impl Stmt {
    fn from_value(value: &Value, pointer: &str) -> Result<Self, DecodeError> {
        let obj = value.as_object().ok_or_else(|| err(pointer, "statement must be an object"))?;
        if obj.len() != 1 {
            return Err(err(pointer, "statement must have exactly one tag"));
        }
        let (tag, body) = obj.iter().next().unwrap();
        let bobj = body.as_object().ok_or_else(|| err(pointer, format!("`{tag}` payload must be an object")))?;
        match tag.as_str() {
            "let" => {
                let name = get_str(bobj, pointer, "name")?;
                let value = bobj.get("value").ok_or_else(|| err(pointer, "let missing `value`"))?;
                Ok(Stmt::Let { name, value: Expr::from_value(value, &format!("{pointer}/let/value"))? })
            }
            "expr" => {
                let e = bobj.get("expr").ok_or_else(|| err(pointer, "expr missing `expr`"))?;
                Ok(Stmt::Expr { expr: Expr::from_value(e, &format!("{pointer}/expr/expr"))? })
            }
            "assert" => {
                let e = bobj.get("expr").ok_or_else(|| err(pointer, "assert missing `expr`"))?;
                let message = bobj
                    .get("message")
                    .map(|m| Expr::from_value(m, &format!("{pointer}/assert/message")))
                    .transpose()?;
                Ok(Stmt::Assert { expr: Expr::from_value(e, &format!("{pointer}/assert/expr"))?, message })
            }
            "return" => {
                let e = bobj.get("expr").ok_or_else(|| err(pointer, "return missing `expr`"))?;
                Ok(Stmt::Return { expr: Expr::from_value(e, &format!("{pointer}/return/expr"))? })
            }
            "if" => {
                let cond = bobj.get("cond").ok_or_else(|| err(pointer, "if missing `cond`"))?;
                let then = decode_block(bobj, pointer, "then")?;
                let r#else = decode_block(bobj, pointer, "else")?;
                Ok(Stmt::If { cond: Expr::from_value(cond, &format!("{pointer}/if/cond"))?, then, r#else })
            }
            other => Err(err(pointer, format!("unknown statement tag `{other}`"))),
        }
    }
}

fn decode_block(obj: &serde_json::Map<String, Value>, pointer: &str, key: &str) -> Result<Vec<Stmt>, DecodeError> {
    let Some(arr) = obj.get(key) else { return Ok(Vec::new()) };
    let arr = arr.as_array().ok_or_else(|| err(pointer, format!("`{key}` must be an array")))?;
    arr.iter()
        .enumerate()
        .map(|(i, s)| Stmt::from_value(s, &format!("{pointer}/if/{key}/{i}")))
        .collect()
}

impl Expr {
    fn from_value(value: &Value, pointer: &str) -> Result<Self, DecodeError> {
        match value {
            Value::Null | Value::Bool(_) | Value::Number(_) | Value::String(_) => Ok(Expr::Literal(value.clone())),
            Value::Object(obj) => {
                if obj.len() != 1 {
                    return Err(err(pointer, "expression object must have exactly one tag"));
                }
                let (tag, body) = obj.iter().next().unwrap();
                match tag.as_str() {
                    "var" => {
                        let name = body.as_str().ok_or_else(|| err(pointer, "`var` must be a string"))?;
                        Ok(Expr::Var(name.to_owned()))
                    }
                    "list" => {
                        let arr = body.as_array().ok_or_else(|| err(pointer, "`list` must be an array"))?;
                        let items = arr
                            .iter()
                            .enumerate()
                            .map(|(i, e)| Expr::from_value(e, &format!("{pointer}/list/{i}")))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Expr::List(items))
                    }
                    "obj" => {
                        let map = body.as_object().ok_or_else(|| err(pointer, "`obj` must be an object"))?;
                        let mut fields = IndexMap::new();
                        for (k, v) in map {
                            fields.insert(k.clone(), Expr::from_value(v, &format!("{pointer}/obj/{k}"))?);
                        }
                        Ok(Expr::Obj(fields))
                    }
                    "call" => {
                        let cobj = body.as_object().ok_or_else(|| err(pointer, "`call` must be an object"))?;
                        let func = get_str(cobj, pointer, "fn")?;
                        let args = cobj
                            .get("args")
                            .and_then(Value::as_array)
                            .ok_or_else(|| err(pointer, "`call` missing `args`"))?;
                        let args = args
                            .iter()
                            .enumerate()
                            .map(|(i, a)| Expr::from_value(a, &format!("{pointer}/call/args/{i}")))
                            .collect::<Result<Vec<_>, _>>()?;
                        Ok(Expr::Call { func, args })
                    }
                    other => Err(err(pointer, format!("unknown expression tag `{other}`"))),
                }
            }
            Value::Array(_) => Err(err(pointer, "bare arrays are not expressions; use `{\"list\": [...]}`")),
        }
    }
}

fn get_str(obj: &serde_json::Map<String, Value>, pointer: &str, key: &str) -> Result<String, DecodeError> {
    obj.get(key)
        .and_then(Value::as_str)
        .map(str::to_owned)
        .ok_or_else(|| err(pointer, format!("missing or non-string `{key}`")))
}

fn get_str_array_opt(
    obj: &serde_json::Map<String, Value>,
    pointer: &str,
    key: &str,
) -> Result<Option<Vec<String>>, DecodeError> {
    let Some(v) = obj.get(key) else { return Ok(None) };
    let arr = v.as_array().ok_or_else(|| err(pointer, format!("`{key}` must be an array")))?;
    let mut out = Vec::with_capacity(arr.len());
    for item in arr {
        out.push(item.as_str().ok_or_else(|| err(pointer, format!("`{key}` entries must be strings")))?.to_owned());
    }
    Ok(Some(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_module() -> Value {
        json!({
            "module": "m",
            "version": "1",
            "functions": [{
                "name": "f",
                "params": ["x"],
                "param_types": ["Int"],
                "returns": "Int",
                "body": [
                    {"assert": {"expr": {"call": {"fn": "gt", "args": [{"var": "x"}, 0]}}}},
                    {"return": {"expr": {"var": "x"}}}
                ]
            }]
        })
    }

    #[test]
    fn decodes_a_well_formed_module() {
        let m = Module::from_value(&sample_module()).unwrap();
        assert_eq!(m.functions.len(), 1);
        assert_eq!(m.functions[0].body.len(), 2);
        assert!(matches!(m.functions[0].body[1], Stmt::Return { .. }));
    }

    #[test]
    fn rejects_multi_tag_statement() {
        let bad = json!({"let": {"name": "x", "value": 1}, "return": {"expr": 1}});
        assert!(Stmt::from_value(&bad, "/functions/0/body/0").is_err());
    }

    #[test]
    fn bare_array_is_not_an_expression() {
        let bad = json!([1, 2, 3]);
        assert!(Expr::from_value(&bad, "/x").is_err());
    }
}
