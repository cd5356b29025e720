//! Semantic analysis (spec.md §4.D): definite-assignment, name resolution,
//! reachability and arity checking over a decoded [`Module`]; entirely
//! independent of typing (component E) and effects (component F).

use std::collections::BTreeSet;

use crate::ast::{self, Expr, Function, Module, Stmt};
use crate::builtins;
use crate::diagnostics::{Code, Diagnostic};

/// Runs every D-level check over `module`, returning accumulated diagnostics
/// in AST order. Never panics and never throws: static analysis always
/// produces a (possibly empty) diagnostic list (spec.md §7).
#[must_use]
pub fn analyze(module: &Module) -> Vec<Diagnostic> {
    let mut diags = Vec::new();
    let known_functions: BTreeSet<&str> = module.functions.iter().map(|f| f.name.as_str()).collect();

    for (i, func) in module.functions.iter().enumerate() {
        analyze_function(func, &format!("/functions/{i}"), &known_functions, &mut diags);
    }
    diags
}

fn analyze_function(func: &Function, pointer: &str, known_functions: &BTreeSet<&str>, diags: &mut Vec<Diagnostic>) {
    let mut scope: BTreeSet<String> = BTreeSet::new();
    for (i, p) in func.params.iter().enumerate() {
        if ast::is_reserved(p) {
            diags.push(Diagnostic::new(format!("{pointer}/params/{i}"), Code::ReservedName, format!("`{p}` is a reserved name")));
        }
        scope.insert(p.clone());
    }

    let mut returns = false;
    for (i, stmt) in func.body.iter().enumerate() {
        let stmt_pointer = format!("{pointer}/body/{i}");
        if returns {
            diags.push(Diagnostic::new(stmt_pointer.clone(), Code::UnreachableStatement, "statement is unreachable after a return"));
        }
        if analyze_stmt(stmt, &stmt_pointer, &mut scope, known_functions, diags) {
            returns = true;
        }
    }
    if func.returns.is_some() && !returns {
        diags.push(Diagnostic::new(format!("{pointer}/body"), Code::MissingReturn, format!("`{}` is missing a return on every path", func.name)));
    }

    for (i, e) in func.requires.iter().enumerate() {
        analyze_expr(e, &format!("{pointer}/requires/{i}"), &scope, known_functions, diags);
    }
    let mut ensures_scope = scope.clone();
    ensures_scope.insert("result".to_owned());
    for (i, e) in func.ensures.iter().enumerate() {
        analyze_expr(e, &format!("{pointer}/ensures/{i}"), &ensures_scope, known_functions, diags);
    }
}

/// Returns `true` if every path through `stmt` returns (used for
/// `MissingReturn` and `UnreachableStatement`).
fn analyze_stmt(stmt: &Stmt, pointer: &str, scope: &mut BTreeSet<String>, known_functions: &BTreeSet<&str>, diags: &mut Vec<Diagnostic>) -> bool {
    match stmt {
        Stmt::Let { name, value } => {
            analyze_expr(value, &format!("{pointer}/let/value"), scope, known_functions, diags);
            if ast::is_reserved(name) {
                diags.push(Diagnostic::new(pointer, Code::ReservedName, format!("`{name}` is a reserved name")));
            } else if scope.contains(name) {
                diags.push(Diagnostic::new(pointer, Code::Rebind, format!("`{name}` is already bound in this scope")));
            }
            scope.insert(name.clone());
            false
        }
        Stmt::Expr { expr } => {
            analyze_expr(expr, &format!("{pointer}/expr/expr"), scope, known_functions, diags);
            false
        }
        Stmt::Assert { expr, message } => {
            analyze_expr(expr, &format!("{pointer}/assert/expr"), scope, known_functions, diags);
            if let Some(m) = message {
                analyze_expr(m, &format!("{pointer}/assert/message"), scope, known_functions, diags);
            }
            false
        }
        Stmt::Return { expr } => {
            analyze_expr(expr, &format!("{pointer}/return/expr"), scope, known_functions, diags);
            true
        }
        Stmt::If { cond, then, r#else } => {
            analyze_expr(cond, &format!("{pointer}/if/cond"), scope, known_functions, diags);
            let mut then_scope = scope.clone();
            let then_returns = analyze_block(then, &format!("{pointer}/if/then"), &mut then_scope, known_functions, diags);
            let mut else_scope = scope.clone();
            let else_returns = analyze_block(r#else, &format!("{pointer}/if/else"), &mut else_scope, known_functions, diags);
            // A name is definitely assigned after the `if` only when both
            // branches assign it (or when there's no `else` and `then`
            // doesn't, since control falls through).
            if !r#else.is_empty() {
                *scope = then_scope.intersection(&else_scope).cloned().collect();
            }
            then_returns && else_returns && !r#else.is_empty()
        }
    }
}

fn analyze_block(stmts: &[Stmt], pointer: &str, scope: &mut BTreeSet<String>, known_functions: &BTreeSet<&str>, diags: &mut Vec<Diagnostic>) -> bool {
    let mut returns = false;
    for (i, stmt) in stmts.iter().enumerate() {
        let stmt_pointer = format!("{pointer}/{i}");
        if returns {
            diags.push(Diagnostic::new(stmt_pointer.clone(), Code::UnreachableStatement, "statement is unreachable after a return"));
        }
        if analyze_stmt(stmt, &stmt_pointer, scope, known_functions, diags) {
            returns = true;
        }
    }
    returns
}

fn analyze_expr(expr: &Expr, pointer: &str, scope: &BTreeSet<String>, known_functions: &BTreeSet<&str>, diags: &mut Vec<Diagnostic>) {
    match expr {
        Expr::Literal(_) => {}
        Expr::Var(name) => {
            if !scope.contains(name) {
                diags.push(Diagnostic::new(pointer, Code::UndefinedVariable, format!("undefined variable `{name}`")));
            }
        }
        Expr::List(items) => {
            for (i, item) in items.iter().enumerate() {
                analyze_expr(item, &format!("{pointer}/list/{i}"), scope, known_functions, diags);
            }
        }
        Expr::Obj(fields) => {
            for (k, v) in fields {
                analyze_expr(v, &format!("{pointer}/obj/{k}"), scope, known_functions, diags);
            }
        }
        Expr::Call { func, args } => {
            for (i, a) in args.iter().enumerate() {
                analyze_expr(a, &format!("{pointer}/call/args/{i}"), scope, known_functions, diags);
            }
            if builtins::is_builtin(func) {
                check_higher_order_callee(func, args, pointer, known_functions, diags);
                if let Some(expected) = builtins::arity(func) {
                    if expected != args.len() {
                        diags.push(Diagnostic::new(pointer, Code::ArityMismatch, format!("`{func}` expects {expected} argument(s), found {}", args.len())));
                    }
                }
            } else if known_functions.contains(func.as_str()) {
                // Arity against user functions is checked by the type checker
                // (component E), which has access to declared `params`.
            } else {
                diags.push(Diagnostic::new(pointer, Code::UnknownFunctionCall, format!("call to unknown function `{func}`")));
            }
        }
    }
}

const HIGHER_ORDER: &[(&str, usize)] = &[("list_map", 0), ("list_filter", 0), ("list_reduce", 0)];

fn check_higher_order_callee(func: &str, args: &[Expr], pointer: &str, known_functions: &BTreeSet<&str>, diags: &mut Vec<Diagnostic>) {
    let Some(&(_, callee_pos)) = HIGHER_ORDER.iter().find(|(name, _)| *name == func) else { return };
    let Some(callee_expr) = args.get(callee_pos) else { return };
    match callee_expr {
        Expr::Literal(serde_json::Value::String(name)) => {
            if !builtins::is_builtin(name) && !known_functions.contains(name.as_str()) {
                diags.push(Diagnostic::new(
                    format!("{pointer}/call/args/{callee_pos}"),
                    Code::UnknownFunctionRef,
                    format!("`{func}` references unknown function `{name}`"),
                ));
            }
        }
        _ => {
            diags.push(Diagnostic::new(
                format!("{pointer}/call/args/{callee_pos}"),
                Code::InvalidFunctionRef,
                format!("`{func}`'s first argument must be a string naming a function"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn module(v: serde_json::Value) -> Module {
        Module::from_value(&v).unwrap()
    }

    #[test]
    fn flags_undefined_variable() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "body": [{"expr": {"expr": {"var": "missing"}}}]}]
        }));
        let diags = analyze(&m);
        assert!(diags.iter().any(|d| d.code == Code::UndefinedVariable));
    }

    #[test]
    fn flags_missing_return_when_declared() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "returns": "Int", "body": [{"let": {"name": "x", "value": 1}}]}]
        }));
        let diags = analyze(&m);
        assert!(diags.iter().any(|d| d.code == Code::MissingReturn));
    }

    #[test]
    fn if_without_else_never_satisfies_missing_return() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": ["x"], "returns": "Int", "body": [
                {"if": {"cond": {"var": "x"}, "then": [{"return": {"expr": 1}}]}}
            ]}]
        }));
        let diags = analyze(&m);
        assert!(diags.iter().any(|d| d.code == Code::MissingReturn));
    }

    #[test]
    fn if_with_both_branches_returning_satisfies_missing_return() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": ["x"], "returns": "Int", "body": [
                {"if": {"cond": {"var": "x"}, "then": [{"return": {"expr": 1}}], "else": [{"return": {"expr": 2}}]}}
            ]}]
        }));
        let diags = analyze(&m);
        assert!(!diags.iter().any(|d| d.code == Code::MissingReturn));
    }

    #[test]
    fn flags_unreachable_statement_after_return() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "returns": "Int", "body": [
                {"return": {"expr": 1}},
                {"let": {"name": "x", "value": 2}}
            ]}]
        }));
        let diags = analyze(&m);
        assert!(diags.iter().any(|d| d.code == Code::UnreachableStatement));
    }

    #[test]
    fn flags_rebind_of_existing_let() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "body": [
                {"let": {"name": "x", "value": 1}},
                {"let": {"name": "x", "value": 2}}
            ]}]
        }));
        let diags = analyze(&m);
        assert!(diags.iter().any(|d| d.code == Code::Rebind));
    }

    #[test]
    fn flags_unknown_function_ref_in_list_map() {
        let m = module(json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "body": [
                {"expr": {"expr": {"call": {"fn": "list_map", "args": ["nope", {"list": []}]}}}}
            ]}]
        }));
        let diags = analyze(&m);
        assert!(diags.iter().any(|d| d.code == Code::UnknownFunctionRef));
    }
}
