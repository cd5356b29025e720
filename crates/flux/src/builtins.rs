//! The fixed standard library of builtin functions shared by the semantic
//! analyser (D), type checker (E), effect checker (F) and interpreter (G):
//! a single source of truth backing name resolution, signature and dispatch
//! tables alike.

use std::collections::BTreeMap;

use crate::types::{Signature, Type};

/// Arithmetic/comparison/logic operators plus the stdlib helpers, each with
/// a fixed arity. Higher-order callees (`list_map`/`list_filter`/`list_reduce`)
/// are *not* listed here with their true arity of "1 + however many args the
/// callee takes"; they're handled specially wherever arity matters.
pub fn names() -> &'static [&'static str] {
    &[
        "add", "sub", "mul", "div", "neg", "gt", "lt", "ge", "le", "eq", "ne", "and", "or", "not", "concat", "str_len",
        "list_len", "list_get", "list_sum", "list_mean", "list_map", "list_filter", "list_reduce", "obj_get",
        "obj_get_or", "obj_set", "obj_del", "obj_merge", "print", "http_get",
    ]
}

#[must_use]
pub fn is_builtin(name: &str) -> bool {
    names().contains(&name)
}

/// Fixed arity for builtins whose argument count never varies. `None` for
/// builtins whose true shape depends on their callee argument (the
/// higher-order list builtins), which the semantic analyser checks directly.
#[must_use]
pub fn arity(name: &str) -> Option<usize> {
    match name {
        "neg" | "not" | "str_len" | "list_len" | "list_sum" | "list_mean" => Some(1),
        "add" | "sub" | "mul" | "div" | "gt" | "lt" | "ge" | "le" | "eq" | "ne" | "and" | "or" | "concat" | "list_get"
        | "obj_get" | "obj_del" | "obj_merge" => Some(2),
        "obj_get_or" | "obj_set" => Some(3),
        "print" | "http_get" => Some(1),
        "list_map" | "list_filter" => Some(2),
        "list_reduce" => Some(3),
        _ => None,
    }
}

/// The effect tags a direct call to this builtin requires (spec.md §4.F).
/// Everything not listed here is pure.
#[must_use]
pub fn effects_of(name: &str) -> &'static [&'static str] {
    match name {
        "print" => &["io.print"],
        "http_get" => &["net.http"],
        _ => &[],
    }
}

/// Builds the type-checker's builtin signature table (component E). Uses
/// type variables (`'a`, `'b`, ...) for generics; [`Signature::freshen`]
/// instantiates a fresh copy per call site.
#[must_use]
pub fn type_signatures() -> BTreeMap<String, Signature> {
    let mut sigs = BTreeMap::new();
    let mono = |params: Vec<Type>, ret: Type| Signature { type_params: Vec::new(), params, ret };
    let generic = |type_params: Vec<&str>, params: Vec<Type>, ret: Type| Signature {
        type_params: type_params.into_iter().map(str::to_owned).collect(),
        params,
        ret,
    };

    sigs.insert("add".to_owned(), mono(vec![Type::Float, Type::Float], Type::Float));
    sigs.insert("sub".to_owned(), mono(vec![Type::Float, Type::Float], Type::Float));
    sigs.insert("mul".to_owned(), mono(vec![Type::Float, Type::Float], Type::Float));
    sigs.insert("div".to_owned(), mono(vec![Type::Float, Type::Float], Type::Float));
    sigs.insert("neg".to_owned(), mono(vec![Type::Float], Type::Float));

    sigs.insert("gt".to_owned(), generic(vec!["'a"], vec![Type::Var("'a".into()), Type::Var("'a".into())], Type::Bool));
    sigs.insert("lt".to_owned(), generic(vec!["'a"], vec![Type::Var("'a".into()), Type::Var("'a".into())], Type::Bool));
    sigs.insert("ge".to_owned(), generic(vec!["'a"], vec![Type::Var("'a".into()), Type::Var("'a".into())], Type::Bool));
    sigs.insert("le".to_owned(), generic(vec!["'a"], vec![Type::Var("'a".into()), Type::Var("'a".into())], Type::Bool));
    sigs.insert("eq".to_owned(), generic(vec!["'a"], vec![Type::Any, Type::Any], Type::Bool));
    sigs.insert("ne".to_owned(), generic(vec!["'a"], vec![Type::Any, Type::Any], Type::Bool));

    sigs.insert("and".to_owned(), mono(vec![Type::Bool, Type::Bool], Type::Bool));
    sigs.insert("or".to_owned(), mono(vec![Type::Bool, Type::Bool], Type::Bool));
    sigs.insert("not".to_owned(), mono(vec![Type::Bool], Type::Bool));

    sigs.insert("concat".to_owned(), mono(vec![Type::String, Type::String], Type::String));
    sigs.insert("str_len".to_owned(), mono(vec![Type::String], Type::Int));

    sigs.insert(
        "list_len".to_owned(),
        generic(vec!["'a"], vec![Type::List(Box::new(Type::Var("'a".into())))], Type::Int),
    );
    sigs.insert(
        "list_get".to_owned(),
        generic(vec!["'a"], vec![Type::List(Box::new(Type::Var("'a".into()))), Type::Int], Type::Var("'a".into())),
    );
    // list_sum/list_mean/list_map/list_filter/list_reduce/obj_* are handled by
    // `types::special_case`; this table only needs to exist so unknown-arity
    // errors don't fire for them.
    for special in ["list_sum", "list_mean", "list_map", "list_filter", "list_reduce", "obj_get", "obj_get_or", "obj_set", "obj_del", "obj_merge"] {
        sigs.insert(special.to_owned(), generic(vec!["'a"], vec![], Type::Any));
    }

    sigs.insert("print".to_owned(), generic(vec!["'a"], vec![Type::Var("'a".into())], Type::Null));
    sigs.insert("http_get".to_owned(), mono(vec![Type::String], Type::String));

    sigs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_name_has_a_type_signature_entry() {
        let sigs = type_signatures();
        for name in names() {
            assert!(sigs.contains_key(*name), "missing signature for {name}");
        }
    }
}
