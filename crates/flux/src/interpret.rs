//! The reference AST interpreter (spec.md §4.G): tree-walking evaluation of
//! a decoded [`Module`], gated by each function's declared effects: host I/O
//! stays behind a runtime capability set rather than relying on the static
//! effect check alone.

use std::collections::BTreeMap;
use std::fmt;

use serde_json::{Map, Number, Value};

use crate::ast::{Expr, Function, Module, Stmt};

const MAX_CALL_DEPTH: usize = 256;

/// A runtime failure (distinct from the static [`crate::diagnostics::Code`]
/// taxonomy, which never reaches execution).
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    DivisionByZero,
    IndexOutOfBounds { index: i64, len: usize },
    UnknownField(String),
    TypeError(String),
    AssertionFailed(Option<String>),
    EffectNotPermitted(String),
    CallDepthExceeded,
    Unsupported(String),
    NameError(String),
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fault::DivisionByZero => write!(f, "division by zero"),
            Fault::IndexOutOfBounds { index, len } => write!(f, "index {index} out of bounds for a list of length {len}"),
            Fault::UnknownField(k) => write!(f, "no such field `{k}`"),
            Fault::TypeError(msg) => write!(f, "type error: {msg}"),
            Fault::AssertionFailed(Some(msg)) => write!(f, "assertion failed: {msg}"),
            Fault::AssertionFailed(None) => write!(f, "assertion failed"),
            Fault::EffectNotPermitted(e) => write!(f, "effect `{e}` was not declared"),
            Fault::CallDepthExceeded => write!(f, "maximum call depth exceeded"),
            Fault::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Fault::NameError(name) => write!(f, "undefined name `{name}`"),
        }
    }
}

impl std::error::Error for Fault {}

/// Sink for the `print` effect; the CLI wires this to stdout, tests wire it
/// to an in-memory buffer.
pub trait Output {
    fn print(&mut self, value: &Value);
}

/// Collects printed values without touching stdout (used by tests and the
/// property runner).
#[derive(Default)]
pub struct CapturedOutput(pub Vec<Value>);

impl Output for CapturedOutput {
    fn print(&mut self, value: &Value) {
        self.0.push(value.clone());
    }
}

pub struct StdoutOutput;

impl Output for StdoutOutput {
    fn print(&mut self, value: &Value) {
        println!("{}", render(value));
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Walks `module`'s AST to evaluate `function_name(args)`.
pub struct Interpreter<'m, O: Output> {
    module: &'m Module,
    output: &'m mut O,
    effect_stack: Vec<Vec<String>>,
    depth: usize,
}

impl<'m, O: Output> Interpreter<'m, O> {
    pub fn new(module: &'m Module, output: &'m mut O) -> Self {
        Self { module, output, effect_stack: Vec::new(), depth: 0 }
    }

    pub fn call(&mut self, function_name: &str, args: &[Value]) -> Result<Value, Fault> {
        let func = self
            .module
            .functions
            .iter()
            .find(|f| f.name == function_name)
            .ok_or_else(|| Fault::NameError(function_name.to_owned()))?;
        self.call_function(func, args)
    }

    fn call_function(&mut self, func: &Function, args: &[Value]) -> Result<Value, Fault> {
        self.depth += 1;
        if self.depth > MAX_CALL_DEPTH {
            self.depth -= 1;
            return Err(Fault::CallDepthExceeded);
        }
        let mut env = BTreeMap::new();
        for (name, value) in func.params.iter().zip(args.iter()) {
            env.insert(name.clone(), value.clone());
        }
        self.effect_stack.push(func.effects.iter().filter(|e| e.as_str() != "pure").cloned().collect());

        let result = (|| -> Result<Value, Fault> {
            for req in &func.requires {
                if !as_bool(&self.eval(req, &mut env)?)? {
                    return Err(Fault::AssertionFailed(Some(format!("precondition of `{}` violated", func.name))));
                }
            }
            let returned = self.exec_block(&func.body, &mut env)?.unwrap_or(Value::Null);
            if !func.ensures.is_empty() {
                let mut ensures_env = env.clone();
                ensures_env.insert("result".to_owned(), returned.clone());
                for ens in &func.ensures {
                    if !as_bool(&self.eval(ens, &mut ensures_env)?)? {
                        return Err(Fault::AssertionFailed(Some(format!("postcondition of `{}` violated", func.name))));
                    }
                }
            }
            Ok(returned)
        })();

        self.effect_stack.pop();
        self.depth -= 1;
        result
    }

    fn exec_block(&mut self, stmts: &[Stmt], env: &mut BTreeMap<String, Value>) -> Result<Option<Value>, Fault> {
        for stmt in stmts {
            if let Some(v) = self.exec_stmt(stmt, env)? {
                return Ok(Some(v));
            }
        }
        Ok(None)
    }

    fn exec_stmt(&mut self, stmt: &Stmt, env: &mut BTreeMap<String, Value>) -> Result<Option<Value>, Fault> {
        match stmt {
            Stmt::Let { name, value } => {
                let v = self.eval(value, env)?;
                env.insert(name.clone(), v);
                Ok(None)
            }
            Stmt::Expr { expr } => {
                self.eval(expr, env)?;
                Ok(None)
            }
            Stmt::Assert { expr, message } => {
                if as_bool(&self.eval(expr, env)?)? {
                    Ok(None)
                } else {
                    let detail = match message {
                        Some(m) => Some(render(&self.eval(m, env)?)),
                        None => None,
                    };
                    Err(Fault::AssertionFailed(detail))
                }
            }
            Stmt::Return { expr } => Ok(Some(self.eval(expr, env)?)),
            Stmt::If { cond, then, r#else } => {
                if as_bool(&self.eval(cond, env)?)? {
                    self.exec_block(then, env)
                } else {
                    self.exec_block(r#else, env)
                }
            }
        }
    }

    /// Evaluates a bare expression (a property postcondition, a `requires`
    /// clause under construction by the repair suggester, ...) against a
    /// caller-supplied environment, outside of any function's effect gate.
    pub fn eval_in(&mut self, expr: &Expr, env: &mut BTreeMap<String, Value>) -> Result<Value, Fault> {
        self.effect_stack.push(Vec::new());
        let result = self.eval(expr, env);
        self.effect_stack.pop();
        result
    }

    fn eval(&mut self, expr: &Expr, env: &mut BTreeMap<String, Value>) -> Result<Value, Fault> {
        match expr {
            Expr::Literal(v) => Ok(v.clone()),
            Expr::Var(name) => env.get(name).cloned().ok_or_else(|| Fault::NameError(name.clone())),
            Expr::List(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.eval(item, env)?);
                }
                Ok(Value::Array(out))
            }
            Expr::Obj(fields) => {
                let mut out = Map::new();
                for (k, v) in fields {
                    out.insert(k.clone(), self.eval(v, env)?);
                }
                Ok(Value::Object(out))
            }
            Expr::Call { func, args } => {
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(self.eval(a, env)?);
                }
                self.dispatch(func, args, &values, env)
            }
        }
    }

    fn require_effect(&self, effect: &str) -> Result<(), Fault> {
        let permitted = self.effect_stack.last().map(Vec::as_slice).unwrap_or(&[]);
        if permitted.iter().any(|e| e == effect) {
            Ok(())
        } else {
            Err(Fault::EffectNotPermitted(effect.to_owned()))
        }
    }

    fn call_named(&mut self, name: &str, args: &[Value]) -> Result<Value, Fault> {
        if let Some(func) = self.module.functions.iter().find(|f| f.name == name) {
            let func = func.clone_ref();
            self.call_function(&func, args)
        } else {
            call_builtin_simple(name, args, self)
        }
    }

    fn dispatch(&mut self, func: &str, arg_exprs: &[Expr], args: &[Value], env: &mut BTreeMap<String, Value>) -> Result<Value, Fault> {
        match func {
            "list_map" | "list_filter" | "list_reduce" => self.dispatch_higher_order(func, arg_exprs, args, env),
            "print" => {
                self.require_effect("io.print")?;
                self.output.print(&args[0]);
                Ok(Value::Null)
            }
            "http_get" => {
                self.require_effect("net.http")?;
                Err(Fault::Unsupported("http_get has no network backend in this sandboxed interpreter".to_owned()))
            }
            _ => {
                if let Some(user_func) = self.module.functions.iter().find(|f| f.name == func) {
                    let user_func = user_func.clone_ref();
                    self.call_function(&user_func, args)
                } else {
                    call_builtin_simple(func, args, self)
                }
            }
        }
    }

    fn dispatch_higher_order(&mut self, func: &str, arg_exprs: &[Expr], args: &[Value], _env: &mut BTreeMap<String, Value>) -> Result<Value, Fault> {
        let callee_name = match &arg_exprs[0] {
            Expr::Literal(Value::String(s)) => s.clone(),
            _ => return Err(Fault::TypeError(format!("`{func}`'s first argument must be a function name"))),
        };
        match func {
            "list_map" => {
                let list = as_array(&args[1])?;
                let mut out = Vec::with_capacity(list.len());
                for item in list {
                    out.push(self.call_named(&callee_name, &[item.clone()])?);
                }
                Ok(Value::Array(out))
            }
            "list_filter" => {
                let list = as_array(&args[1])?;
                let mut out = Vec::new();
                for item in list {
                    if as_bool(&self.call_named(&callee_name, &[item.clone()])?)? {
                        out.push(item.clone());
                    }
                }
                Ok(Value::Array(out))
            }
            "list_reduce" => {
                let mut acc = args[1].clone();
                let list = as_array(&args[2])?;
                for item in list {
                    acc = self.call_named(&callee_name, &[acc, item.clone()])?;
                }
                Ok(acc)
            }
            _ => unreachable!(),
        }
    }
}

// `Function` holds owned `Vec`/`String` data; cloning it to call recursively
// without borrowing `self.module` for the call's duration is the simplest
// way to keep the interpreter's `&mut self` borrow checker-clean.
trait CloneRef {
    fn clone_ref(&self) -> Function;
}

impl CloneRef for Function {
    fn clone_ref(&self) -> Function {
        self.clone()
    }
}

fn as_bool(v: &Value) -> Result<bool, Fault> {
    v.as_bool().ok_or_else(|| Fault::TypeError(format!("expected Bool, found {v}")))
}

fn as_array(v: &Value) -> Result<&Vec<Value>, Fault> {
    v.as_array().ok_or_else(|| Fault::TypeError(format!("expected a list, found {v}")))
}

fn as_f64(v: &Value) -> Result<f64, Fault> {
    v.as_f64().ok_or_else(|| Fault::TypeError(format!("expected a number, found {v}")))
}

fn is_int(v: &Value) -> bool {
    matches!(v, Value::Number(n) if n.is_i64() || n.is_u64())
}

fn number_value(n: f64, both_int: bool) -> Value {
    if both_int {
        Value::Number(Number::from(n as i64))
    } else {
        Number::from_f64(n).map_or(Value::Null, Value::Number)
    }
}

/// Builtins that don't need access to unevaluated argument expressions
/// (everything except the higher-order list builtins, handled in
/// [`Interpreter::dispatch_higher_order`]).
fn call_builtin_simple<O: Output>(name: &str, args: &[Value], interp: &mut Interpreter<'_, O>) -> Result<Value, Fault> {
    match name {
        "add" | "sub" | "mul" | "div" => {
            let a = as_f64(&args[0])?;
            let b = as_f64(&args[1])?;
            let both_int = is_int(&args[0]) && is_int(&args[1]);
            match name {
                "add" => Ok(number_value(a + b, both_int)),
                "sub" => Ok(number_value(a - b, both_int)),
                "mul" => Ok(number_value(a * b, both_int)),
                "div" => {
                    if b == 0.0 {
                        Err(Fault::DivisionByZero)
                    } else {
                        Ok(number_value(a / b, false))
                    }
                }
                _ => unreachable!(),
            }
        }
        "neg" => Ok(number_value(-as_f64(&args[0])?, is_int(&args[0]))),
        "gt" | "lt" | "ge" | "le" => {
            let a = as_f64(&args[0])?;
            let b = as_f64(&args[1])?;
            Ok(Value::Bool(match name {
                "gt" => a > b,
                "lt" => a < b,
                "ge" => a >= b,
                "le" => a <= b,
                _ => unreachable!(),
            }))
        }
        "eq" => Ok(Value::Bool(values_equal(&args[0], &args[1]))),
        "ne" => Ok(Value::Bool(!values_equal(&args[0], &args[1]))),
        "and" => Ok(Value::Bool(as_bool(&args[0])? && as_bool(&args[1])?)),
        "or" => Ok(Value::Bool(as_bool(&args[0])? || as_bool(&args[1])?)),
        "not" => Ok(Value::Bool(!as_bool(&args[0])?)),
        "concat" => {
            let a = args[0].as_str().ok_or_else(|| Fault::TypeError("concat expects a String".to_owned()))?;
            let b = args[1].as_str().ok_or_else(|| Fault::TypeError("concat expects a String".to_owned()))?;
            Ok(Value::String(format!("{a}{b}")))
        }
        "str_len" => {
            let s = args[0].as_str().ok_or_else(|| Fault::TypeError("str_len expects a String".to_owned()))?;
            Ok(Value::Number(Number::from(s.chars().count() as u64)))
        }
        "list_len" => Ok(Value::Number(Number::from(as_array(&args[0])?.len() as u64))),
        "list_get" => {
            let list = as_array(&args[0])?;
            let index = args[1].as_i64().ok_or_else(|| Fault::TypeError("list_get expects an Int index".to_owned()))?;
            usize::try_from(index)
                .ok()
                .and_then(|i| list.get(i))
                .cloned()
                .ok_or(Fault::IndexOutOfBounds { index, len: list.len() })
        }
        "list_sum" => {
            let list = as_array(&args[0])?;
            let mut acc = 0.0;
            let mut all_int = true;
            for item in list {
                acc += as_f64(item)?;
                all_int &= is_int(item);
            }
            Ok(number_value(acc, all_int))
        }
        "list_mean" => {
            let list = as_array(&args[0])?;
            if list.is_empty() {
                return Err(Fault::DivisionByZero);
            }
            let mut acc = 0.0;
            for item in list {
                acc += as_f64(item)?;
            }
            Ok(number_value(acc / list.len() as f64, false))
        }
        "obj_get" => {
            let key = args[1].as_str().ok_or_else(|| Fault::TypeError("obj_get expects a String key".to_owned()))?;
            args[0].as_object().and_then(|o| o.get(key)).cloned().ok_or_else(|| Fault::UnknownField(key.to_owned()))
        }
        "obj_get_or" => {
            let key = args[1].as_str().ok_or_else(|| Fault::TypeError("obj_get_or expects a String key".to_owned()))?;
            Ok(args[0].as_object().and_then(|o| o.get(key)).cloned().unwrap_or_else(|| args[2].clone()))
        }
        "obj_set" => {
            let key = args[1].as_str().ok_or_else(|| Fault::TypeError("obj_set expects a String key".to_owned()))?;
            let mut obj = args[0].as_object().cloned().ok_or_else(|| Fault::TypeError("obj_set expects a Record".to_owned()))?;
            obj.insert(key.to_owned(), args[2].clone());
            Ok(Value::Object(obj))
        }
        "obj_del" => {
            let key = args[1].as_str().ok_or_else(|| Fault::TypeError("obj_del expects a String key".to_owned()))?;
            let mut obj = args[0].as_object().cloned().ok_or_else(|| Fault::TypeError("obj_del expects a Record".to_owned()))?;
            obj.remove(key);
            Ok(Value::Object(obj))
        }
        "obj_merge" => {
            let mut a = args[0].as_object().cloned().ok_or_else(|| Fault::TypeError("obj_merge expects a Record".to_owned()))?;
            let b = args[1].as_object().ok_or_else(|| Fault::TypeError("obj_merge expects a Record".to_owned()))?;
            for (k, v) in b {
                a.insert(k.clone(), v.clone());
            }
            Ok(Value::Object(a))
        }
        "print" => {
            interp.require_effect("io.print")?;
            interp.output.print(&args[0]);
            Ok(Value::Null)
        }
        "http_get" => {
            interp.require_effect("net.http")?;
            Err(Fault::Unsupported("http_get has no network backend in this sandboxed interpreter".to_owned()))
        }
        other => Err(Fault::NameError(other.to_owned())),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Module;
    use serde_json::json;

    fn module(v: serde_json::Value) -> Module {
        Module::from_value(&v).unwrap()
    }

    #[test]
    fn division_by_zero_is_a_fault() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "returns": "Float", "body": [
                {"return": {"expr": {"call": {"fn": "div", "args": [1, 0]}}}}
            ]}]
        }));
        let mut out = CapturedOutput::default();
        let mut interp = Interpreter::new(&m, &mut out);
        assert_eq!(interp.call("f", &[]), Err(Fault::DivisionByZero));
    }

    #[test]
    fn print_without_declared_effect_faults() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "body": [
                {"expr": {"expr": {"call": {"fn": "print", "args": [1]}}}}
            ]}]
        }));
        let mut out = CapturedOutput::default();
        let mut interp = Interpreter::new(&m, &mut out);
        assert_eq!(interp.call("f", &[]), Err(Fault::EffectNotPermitted("io.print".to_owned())));
    }

    #[test]
    fn print_with_declared_effect_is_captured() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "effects": ["io.print"], "body": [
                {"expr": {"expr": {"call": {"fn": "print", "args": ["hi"]}}}}
            ]}]
        }));
        let mut out = CapturedOutput::default();
        let mut interp = Interpreter::new(&m, &mut out);
        interp.call("f", &[]).unwrap();
        assert_eq!(out.0, vec![json!("hi")]);
    }

    #[test]
    fn list_map_applies_user_function() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [
                {"name": "inc", "params": ["x"], "returns": "Int", "body": [
                    {"return": {"expr": {"call": {"fn": "add", "args": [{"var": "x"}, 1]}}}}
                ]},
                {"name": "top", "params": [], "returns": "List[Int]", "body": [
                    {"return": {"expr": {"call": {"fn": "list_map", "args": ["inc", {"list": [1, 2, 3]}]}}}}
                ]}
            ]
        }));
        let mut out = CapturedOutput::default();
        let mut interp = Interpreter::new(&m, &mut out);
        assert_eq!(interp.call("top", &[]).unwrap(), json!([2, 3, 4]));
    }

    #[test]
    fn list_get_out_of_bounds_faults() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "body": [
                {"return": {"expr": {"call": {"fn": "list_get", "args": [{"list": [1]}, 5]}}}}
            ]}]
        }));
        let mut out = CapturedOutput::default();
        let mut interp = Interpreter::new(&m, &mut out);
        assert_eq!(interp.call("f", &[]), Err(Fault::IndexOutOfBounds { index: 5, len: 1 }));
    }

    #[test]
    fn obj_set_returns_a_new_record_without_mutating_original() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "body": [
                {"let": {"name": "r", "value": {"obj": {"a": 1}}}},
                {"let": {"name": "r2", "value": {"call": {"fn": "obj_set", "args": [{"var": "r"}, "b", 2]}}}},
                {"return": {"expr": {"var": "r2"}}}
            ]}]
        }));
        let mut out = CapturedOutput::default();
        let mut interp = Interpreter::new(&m, &mut out);
        assert_eq!(interp.call("f", &[]).unwrap(), json!({"a": 1, "b": 2}));
    }
}
