//! Effect checking (spec.md §4.F): a transitive closure of effect tags over
//! the call graph, checked against each function's declared `effects` list.
//!
//! `MissingEffect` fires when the transitive closure isn't covered by the
//! declaration; `NotPure` fires when `pure` is declared alongside another
//! tag, since the two are self-contradictory (spec.md §3 invariant 5).

use std::collections::{BTreeMap, BTreeSet};

use crate::ast::{Expr, Function, Module, Stmt};
use crate::builtins;
use crate::diagnostics::{Code, Diagnostic};

const PURE: &str = "pure";

fn declared_set(func: &Function) -> BTreeSet<String> {
    func.effects.iter().filter(|e| e.as_str() != PURE).cloned().collect()
}

/// Checks every function's declared effects against what its body (and
/// everything it transitively calls) actually requires.
#[must_use]
pub fn check(module: &Module) -> Vec<Diagnostic> {
    let direct = direct_requirements(module);
    let required = close_transitively(module, &direct);

    let mut diags = Vec::new();
    for (i, func) in module.functions.iter().enumerate() {
        let pointer = format!("/functions/{i}/effects");
        let declared = declared_set(func);
        let actual = required.get(&func.name).cloned().unwrap_or_default();

        let mut missing: Vec<_> = actual.difference(&declared).cloned().collect();
        if !missing.is_empty() {
            missing.sort();
            let list = missing.join(", ");
            diags.push(Diagnostic::new(pointer.clone(), Code::MissingEffect, format!("`{}` triggers undeclared effect(s): {list}", func.name)));
        }

        if func.effects.iter().any(|e| e == PURE) && func.effects.len() > 1 {
            let others: Vec<_> = func.effects.iter().filter(|e| e.as_str() != PURE).cloned().collect();
            diags.push(Diagnostic::new(pointer, Code::NotPure, format!("`{}` declares `pure` together with: {}", func.name, others.join(", "))));
        }
    }
    diags
}

struct FunctionFacts {
    direct_effects: BTreeSet<String>,
    calls: BTreeSet<String>,
}

fn direct_requirements(module: &Module) -> BTreeMap<String, FunctionFacts> {
    let known_functions: BTreeSet<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();
    let mut out = BTreeMap::new();
    for func in &module.functions {
        let mut direct_effects = BTreeSet::new();
        let mut calls = BTreeSet::new();
        for stmt in &func.body {
            walk_stmt(stmt, &known_functions, &mut direct_effects, &mut calls);
        }
        for e in func.requires.iter().chain(func.ensures.iter()) {
            walk_expr(e, &known_functions, &mut direct_effects, &mut calls);
        }
        out.insert(func.name.clone(), FunctionFacts { direct_effects, calls });
    }
    out
}

fn walk_stmt(stmt: &Stmt, known_functions: &BTreeSet<&str>, effects: &mut BTreeSet<String>, calls: &mut BTreeSet<String>) {
    match stmt {
        Stmt::Let { value, .. } | Stmt::Expr { expr: value } | Stmt::Return { expr: value } => {
            walk_expr(value, known_functions, effects, calls);
        }
        Stmt::Assert { expr, message } => {
            walk_expr(expr, known_functions, effects, calls);
            if let Some(m) = message {
                walk_expr(m, known_functions, effects, calls);
            }
        }
        Stmt::If { cond, then, r#else } => {
            walk_expr(cond, known_functions, effects, calls);
            for s in then.iter().chain(r#else.iter()) {
                walk_stmt(s, known_functions, effects, calls);
            }
        }
    }
}

fn walk_expr(expr: &Expr, known_functions: &BTreeSet<&str>, effects: &mut BTreeSet<String>, calls: &mut BTreeSet<String>) {
    match expr {
        Expr::Literal(_) | Expr::Var(_) => {}
        Expr::List(items) => items.iter().for_each(|i| walk_expr(i, known_functions, effects, calls)),
        Expr::Obj(fields) => fields.values().for_each(|v| walk_expr(v, known_functions, effects, calls)),
        Expr::Call { func, args } => {
            for a in args {
                walk_expr(a, known_functions, effects, calls);
            }
            if builtins::is_builtin(func) {
                effects.extend(builtins::effects_of(func).iter().map(|s| (*s).to_owned()));
                // Higher-order builtins also trigger whatever their callee triggers.
                if let Some(Expr::Literal(serde_json::Value::String(callee))) = args.first() {
                    if matches!(func.as_str(), "list_map" | "list_filter" | "list_reduce") {
                        if builtins::is_builtin(callee) {
                            effects.extend(builtins::effects_of(callee).iter().map(|s| (*s).to_owned()));
                        } else if known_functions.contains(callee.as_str()) {
                            calls.insert(callee.clone());
                        }
                    }
                }
            } else if known_functions.contains(func.as_str()) {
                calls.insert(func.clone());
            }
        }
    }
}

fn close_transitively(module: &Module, direct: &BTreeMap<String, FunctionFacts>) -> BTreeMap<String, BTreeSet<String>> {
    let mut required: BTreeMap<String, BTreeSet<String>> =
        direct.iter().map(|(name, facts)| (name.clone(), facts.direct_effects.clone())).collect();

    let mut changed = true;
    while changed {
        changed = false;
        for func in &module.functions {
            let Some(facts) = direct.get(&func.name) else { continue };
            let mut additions = BTreeSet::new();
            for callee in &facts.calls {
                if let Some(callee_effects) = required.get(callee) {
                    additions.extend(callee_effects.iter().cloned());
                }
            }
            let entry = required.entry(func.name.clone()).or_default();
            let before = entry.len();
            entry.extend(additions);
            if entry.len() != before {
                changed = true;
            }
        }
    }
    required
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module(v: serde_json::Value) -> Module {
        Module::from_value(&v).unwrap()
    }

    #[test]
    fn flags_missing_effect_for_direct_print() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "body": [
                {"expr": {"expr": {"call": {"fn": "print", "args": [1]}}}}
            ]}]
        }));
        let diags = check(&m);
        assert!(diags.iter().any(|d| d.code == Code::MissingEffect));
    }

    #[test]
    fn declared_effect_silences_missing_effect() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "effects": ["io.print"], "body": [
                {"expr": {"expr": {"call": {"fn": "print", "args": [1]}}}}
            ]}]
        }));
        let diags = check(&m);
        assert!(!diags.iter().any(|d| d.code == Code::MissingEffect));
    }

    #[test]
    fn flags_not_pure_when_pure_and_another_tag_coexist() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "effects": ["pure", "io.print"], "body": [
                {"expr": {"expr": {"call": {"fn": "print", "args": [1]}}}}
            ]}]
        }));
        let diags = check(&m);
        assert!(diags.iter().any(|d| d.code == Code::NotPure));
    }

    #[test]
    fn single_non_pure_tag_does_not_flag_not_pure() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "effects": ["io.print"], "body": [
                {"expr": {"expr": {"call": {"fn": "print", "args": [1]}}}}
            ]}]
        }));
        let diags = check(&m);
        assert!(!diags.iter().any(|d| d.code == Code::NotPure));
    }

    #[test]
    fn effect_propagates_through_transitive_call() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [
                {"name": "logger", "params": [], "effects": ["io.print"], "body": [
                    {"expr": {"expr": {"call": {"fn": "print", "args": [1]}}}}
                ]},
                {"name": "caller", "params": [], "body": [
                    {"expr": {"expr": {"call": {"fn": "logger", "args": []}}}}
                ]}
            ]
        }));
        let diags = check(&m);
        assert!(diags.iter().any(|d| d.code == Code::MissingEffect && d.pointer.starts_with("/functions/1")));
    }

    #[test]
    fn effect_propagates_through_list_map_callee() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [
                {"name": "logger", "params": ["x"], "effects": ["io.print"], "body": [
                    {"expr": {"expr": {"call": {"fn": "print", "args": [{"var": "x"}]}}}},
                    {"return": {"expr": {"var": "x"}}}
                ]},
                {"name": "caller", "params": [], "body": [
                    {"return": {"expr": {"call": {"fn": "list_map", "args": ["logger", {"list": [1,2]}]}}}}
                ]}
            ]
        }));
        let diags = check(&m);
        assert!(diags.iter().any(|d| d.code == Code::MissingEffect && d.pointer.starts_with("/functions/1")));
    }
}
