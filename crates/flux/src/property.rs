//! Property-based test execution (spec.md §4.H): type-directed random
//! generation plus greedy shrinking, seeded with `rand_chacha::ChaCha8Rng`
//! so a reported counterexample is exactly reproducible from its seed.

use std::collections::BTreeMap;

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde_json::{Number, Value};

use crate::ast::{Function, Module, Property};
use crate::interpret::{CapturedOutput, Interpreter};
use crate::types::{self, Type};

const MAX_SHRINK_STEPS: usize = 200;

/// Outcome of running one property.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyStatus {
    Passed { cases_run: u32 },
    Falsified { seed: u64, case_index: u32, inputs: Vec<Value>, reason: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropertyResult {
    pub name: String,
    pub function: String,
    pub status: PropertyStatus,
}

/// Runs every property declared at module scope or nested under a function.
#[must_use]
pub fn run_all(module: &Module) -> Vec<PropertyResult> {
    let mut results = Vec::new();
    for (i, property) in module.properties.iter().enumerate() {
        results.push(run_one(module, property, i));
    }
    for func in &module.functions {
        for (i, property) in func.properties.iter().enumerate() {
            results.push(run_one(module, property, i));
        }
    }
    results
}

fn run_one(module: &Module, property: &Property, index: usize) -> PropertyResult {
    let name = property.name.clone().unwrap_or_else(|| format!("property_{index}"));
    let Some(func) = module.functions.iter().find(|f| f.name == property.function) else {
        return PropertyResult {
            name,
            function: property.function.clone(),
            status: PropertyStatus::Falsified { seed: property.seed, case_index: 0, inputs: Vec::new(), reason: format!("unknown function `{}`", property.function) },
        };
    };
    let param_types = resolve_param_types(func);
    let mut rng = ChaCha8Rng::seed_from_u64(property.seed);

    for case_index in 0..property.cases {
        let inputs: Vec<Value> = param_types.iter().map(|t| generate(t, &mut rng, 0)).collect();
        match check_case(module, func, property, &inputs) {
            Ok(()) => {}
            Err(reason) => {
                let shrunk = shrink(module, func, property, &param_types, &inputs, &reason);
                return PropertyResult {
                    name,
                    function: property.function.clone(),
                    status: PropertyStatus::Falsified { seed: property.seed, case_index, inputs: shrunk, reason },
                };
            }
        }
    }
    PropertyResult { name, function: property.function.clone(), status: PropertyStatus::Passed { cases_run: property.cases } }
}

fn resolve_param_types(func: &Function) -> Vec<Type> {
    match &func.param_types {
        Some(types) => types.iter().map(|t| types::parse_type_expr(t).unwrap_or(Type::Any)).collect(),
        None => func.params.iter().map(|_| Type::Any).collect(),
    }
}

/// Runs `func(inputs)` then checks `property.postcondition`. `Ok(())` means
/// the property holds for this case; `Err(reason)` covers both a runtime
/// fault and an explicit postcondition violation.
fn check_case(module: &Module, func: &Function, property: &Property, inputs: &[Value]) -> Result<(), String> {
    let mut output = CapturedOutput::default();
    let mut interp = Interpreter::new(module, &mut output);
    let result = interp.call(&func.name, inputs).map_err(|f| format!("runtime fault: {f}"))?;

    let mut env: BTreeMap<String, Value> = func.params.iter().cloned().zip(inputs.iter().cloned()).collect();
    env.insert("result".to_owned(), result);
    match interp.eval_in(&property.postcondition, &mut env) {
        Ok(Value::Bool(true)) => Ok(()),
        Ok(Value::Bool(false)) => Err("postcondition returned false".to_owned()),
        Ok(other) => Err(format!("postcondition must evaluate to Bool, found {other}")),
        Err(fault) => Err(format!("postcondition raised a fault: {fault}")),
    }
}

fn generate(ty: &Type, rng: &mut ChaCha8Rng, depth: u32) -> Value {
    match ty {
        Type::Int => Value::Number(Number::from(rng.gen_range(-1000..=1000))),
        Type::Float => Number::from_f64(rng.gen_range(-1000.0..=1000.0)).map_or(Value::Null, Value::Number),
        Type::Bool => Value::Bool(rng.gen_bool(0.5)),
        Type::String => Value::String(random_string(rng)),
        Type::Null => Value::Null,
        Type::Var(_) | Type::Any => generate_any(rng, depth),
        Type::List(inner) => {
            if depth >= 4 {
                return Value::Array(Vec::new());
            }
            let len = rng.gen_range(0..=5);
            Value::Array((0..len).map(|_| generate(inner, rng, depth + 1)).collect())
        }
        Type::Record(fields) => {
            let mut out = serde_json::Map::new();
            for (k, v) in fields {
                out.insert(k.clone(), generate(v, rng, depth + 1));
            }
            Value::Object(out)
        }
    }
}

fn generate_any(rng: &mut ChaCha8Rng, depth: u32) -> Value {
    match rng.gen_range(0..5u8) {
        0 => Value::Number(Number::from(rng.gen_range(-100..=100))),
        1 => Number::from_f64(rng.gen_range(-100.0..=100.0)).map_or(Value::Null, Value::Number),
        2 => Value::Bool(rng.gen_bool(0.5)),
        3 => Value::String(random_string(rng)),
        _ => {
            if depth >= 3 {
                Value::Null
            } else {
                Value::Array((0..rng.gen_range(0..=2)).map(|_| generate_any(rng, depth + 1)).collect())
            }
        }
    }
}

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz";

fn random_string(rng: &mut ChaCha8Rng) -> String {
    let len = rng.gen_range(0..=8);
    (0..len).map(|_| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char).collect()
}

/// Greedy shrinking: repeatedly try each value's smaller neighbours,
/// keeping the first that still falsifies the property, until no argument
/// can be shrunk further or the step budget is exhausted.
fn shrink(module: &Module, func: &Function, property: &Property, param_types: &[Type], inputs: &[Value], _reason: &str) -> Vec<Value> {
    let mut current = inputs.to_vec();
    for _ in 0..MAX_SHRINK_STEPS {
        let mut improved = false;
        for i in 0..current.len() {
            for candidate_value in shrink_candidates(&current[i], &param_types[i]) {
                let mut trial = current.clone();
                trial[i] = candidate_value;
                if check_case(module, func, property, &trial).is_err() {
                    current = trial;
                    improved = true;
                    break;
                }
            }
        }
        if !improved {
            break;
        }
    }
    current
}

fn shrink_candidates(value: &Value, ty: &Type) -> Vec<Value> {
    match (value, ty) {
        (Value::Number(n), Type::Int) => {
            let i = n.as_i64().unwrap_or(0);
            shrink_int(i).into_iter().map(|v| Value::Number(Number::from(v))).collect()
        }
        (Value::Number(n), Type::Float | Type::Any | Type::Var(_)) if n.is_f64() => {
            let f = n.as_f64().unwrap_or(0.0);
            shrink_float(f).into_iter().filter_map(Number::from_f64).map(Value::Number).collect()
        }
        (Value::Number(n), _) if n.is_i64() || n.is_u64() => {
            let i = n.as_i64().unwrap_or(0);
            shrink_int(i).into_iter().map(|v| Value::Number(Number::from(v))).collect()
        }
        (Value::Bool(true), _) => vec![Value::Bool(false)],
        (Value::String(s), _) => shrink_string(s).into_iter().map(Value::String).collect(),
        (Value::Array(items), Type::List(inner)) => shrink_list(items, inner),
        (Value::Array(items), _) => shrink_list(items, &Type::Any),
        _ => Vec::new(),
    }
}

fn shrink_int(i: i64) -> Vec<i64> {
    if i == 0 {
        return Vec::new();
    }
    let mut out = vec![0, i / 2];
    if i > 0 {
        out.push(i - 1);
    } else {
        out.push(i + 1);
    }
    out.retain(|&v| v != i);
    out
}

fn shrink_float(f: f64) -> Vec<f64> {
    if f == 0.0 {
        return Vec::new();
    }
    vec![0.0, f / 2.0]
}

fn shrink_string(s: &str) -> Vec<String> {
    if s.is_empty() {
        return Vec::new();
    }
    let mut out = vec![String::new()];
    let half = s.len() / 2;
    out.push(s[..half].to_owned());
    out.push(s[..s.len() - 1].to_owned());
    out
}

fn shrink_list(items: &[Value], elem_ty: &Type) -> Vec<Value> {
    if items.is_empty() {
        return Vec::new();
    }
    let mut out = vec![Value::Array(Vec::new())];
    if items.len() > 1 {
        out.push(Value::Array(items[..items.len() / 2].to_vec()));
        out.push(Value::Array(items[..items.len() - 1].to_vec()));
    }
    for replacement in shrink_candidates(&items[0], elem_ty) {
        let mut shorter = items.to_vec();
        shorter[0] = replacement;
        out.push(Value::Array(shorter));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module(v: serde_json::Value) -> Module {
        Module::from_value(&v).unwrap()
    }

    #[test]
    fn passing_property_runs_all_cases() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "identity", "params": ["x"], "param_types": ["Int"], "returns": "Int",
                "body": [{"return": {"expr": {"var": "x"}}}]}],
            "properties": [{"function": "identity", "cases": 25, "seed": 7,
                "postcondition": {"call": {"fn": "eq", "args": [{"var": "x"}, {"var": "result"}]}}}]
        }));
        let results = run_all(&m);
        assert_eq!(results.len(), 1);
        assert!(matches!(results[0].status, PropertyStatus::Passed { cases_run: 25 }));
    }

    #[test]
    fn falsified_property_shrinks_toward_zero() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "bad_abs", "params": ["x"], "param_types": ["Int"], "returns": "Int",
                "body": [{"return": {"expr": {"var": "x"}}}]}],
            "properties": [{"function": "bad_abs", "cases": 50, "seed": 1,
                "postcondition": {"call": {"fn": "ge", "args": [{"var": "result"}, 0]}}}]
        }));
        let results = run_all(&m);
        match &results[0].status {
            PropertyStatus::Falsified { inputs, .. } => {
                let x = inputs[0].as_i64().unwrap();
                assert!(x < 0, "expected a negative counterexample, got {x}");
                assert!(x >= -2, "shrinking should reach a near-minimal counterexample, got {x}");
            }
            PropertyStatus::Passed { .. } => panic!("expected the property to be falsified"),
        }
    }

    #[test]
    fn same_seed_is_deterministic() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": ["x"], "param_types": ["Int"], "returns": "Int",
                "body": [{"return": {"expr": {"var": "x"}}}]}],
            "properties": [{"function": "f", "cases": 10, "seed": 42,
                "postcondition": {"call": {"fn": "eq", "args": [{"var": "x"}, {"var": "result"}]}}}]
        }));
        let a = run_all(&m);
        let b = run_all(&m);
        assert_eq!(a, b);
    }
}
