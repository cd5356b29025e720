//! The type algebra, unification and the local type checker (spec.md §4.E).
//!
//! Deliberately not full Hindley-Milner (SPEC_FULL.md / spec.md §9): a
//! per-call-site freshened signature plus local unification is enough
//! because there is no closure over type variables outside a function.

use std::cell::Cell;
use std::collections::BTreeMap;
use std::fmt;

use crate::ast::{self, Expr, Function, Module, Stmt};
use crate::builtins;
use crate::diagnostics::{Code, Diagnostic};

/// The closed type algebra (spec.md §3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Type {
    Any,
    Int,
    Float,
    Bool,
    String,
    Null,
    Var(String),
    List(Box<Type>),
    Record(BTreeMap<String, Type>),
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Any => write!(f, "Any"),
            Type::Int => write!(f, "Int"),
            Type::Float => write!(f, "Float"),
            Type::Bool => write!(f, "Bool"),
            Type::String => write!(f, "String"),
            Type::Null => write!(f, "Null"),
            Type::Var(name) => write!(f, "{name}"),
            Type::List(inner) => write!(f, "List[{inner}]"),
            Type::Record(fields) => {
                write!(f, "Record{{")?;
                for (i, (k, v)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{k}:{v}")?;
                }
                write!(f, "}}")
            }
        }
    }
}

/// Parses a type-expression string (spec.md §6 grammar).
pub fn parse_type_expr(src: &str) -> Result<Type, String> {
    let mut chars = src.chars().peekable();
    let ty = parse_type_inner(&mut chars)?;
    if chars.peek().is_some() {
        return Err(format!("unexpected trailing characters in type expression `{src}`"));
    }
    Ok(ty)
}

fn parse_ident(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<String, String> {
    let mut ident = String::new();
    while let Some(&c) = chars.peek() {
        if c.is_alphanumeric() || c == '_' {
            ident.push(c);
            chars.next();
        } else {
            break;
        }
    }
    if ident.is_empty() {
        return Err("expected identifier in type expression".to_owned());
    }
    Ok(ident)
}

fn parse_type_inner(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Result<Type, String> {
    let ident = parse_ident(chars)?;
    match ident.as_str() {
        "Int" => Ok(Type::Int),
        "Float" => Ok(Type::Float),
        "Bool" => Ok(Type::Bool),
        "String" => Ok(Type::String),
        "Null" => Ok(Type::Null),
        "Any" => Ok(Type::Any),
        "List" => {
            expect_char(chars, '[')?;
            let inner = parse_type_inner(chars)?;
            expect_char(chars, ']')?;
            Ok(Type::List(Box::new(inner)))
        }
        "Record" => {
            expect_char(chars, '{')?;
            let mut fields = BTreeMap::new();
            if chars.peek() == Some(&'}') {
                chars.next();
                return Ok(Type::Record(fields));
            }
            loop {
                let key = parse_ident(chars)?;
                expect_char(chars, ':')?;
                let value = parse_type_inner(chars)?;
                fields.insert(key, value);
                match chars.peek() {
                    Some(',') => {
                        chars.next();
                    }
                    Some('}') => {
                        chars.next();
                        break;
                    }
                    _ => return Err("expected ',' or '}' in record type".to_owned()),
                }
            }
            Ok(Type::Record(fields))
        }
        other => Ok(Type::Var(other.to_owned())),
    }
}

fn expect_char(chars: &mut std::iter::Peekable<std::str::Chars<'_>>, expected: char) -> Result<(), String> {
    if chars.next() == Some(expected) {
        Ok(())
    } else {
        Err(format!("expected `{expected}` in type expression"))
    }
}

/// A (possibly polymorphic) function signature.
#[derive(Debug, Clone)]
pub struct Signature {
    pub type_params: Vec<String>,
    pub params: Vec<Type>,
    pub ret: Type,
}

/// Generates globally-unique fresh type variable names across one type-check
/// run (spec.md §4.E "freshening").
#[derive(Default)]
pub struct FreshCounter(Cell<u64>);

impl FreshCounter {
    fn next(&self) -> String {
        let n = self.0.get();
        self.0.set(n + 1);
        format!("'t{n}")
    }
}

impl Signature {
    /// Substitutes each type parameter with a fresh variable, returning a
    /// signature with no type parameters left and a fully independent set of
    /// variables from any other call site.
    #[must_use]
    pub fn freshen(&self, fresh: &FreshCounter) -> Signature {
        if self.type_params.is_empty() {
            return self.clone();
        }
        let mapping: BTreeMap<String, String> =
            self.type_params.iter().map(|p| (p.clone(), fresh.next())).collect();
        Signature {
            type_params: Vec::new(),
            params: self.params.iter().map(|t| rename_vars(t, &mapping)).collect(),
            ret: rename_vars(&self.ret, &mapping),
        }
    }
}

fn rename_vars(ty: &Type, mapping: &BTreeMap<String, String>) -> Type {
    match ty {
        Type::Var(name) => mapping.get(name).map_or_else(|| ty.clone(), |fresh| Type::Var(fresh.clone())),
        Type::List(inner) => Type::List(Box::new(rename_vars(inner, mapping))),
        Type::Record(fields) => Type::Record(fields.iter().map(|(k, v)| (k.clone(), rename_vars(v, mapping))).collect()),
        other => other.clone(),
    }
}

/// Unification substitution: binds type variables to concrete(-er) types.
#[derive(Default)]
pub struct Subst(BTreeMap<String, Type>);

impl Subst {
    #[must_use]
    pub fn resolve(&self, ty: &Type) -> Type {
        match ty {
            Type::Var(name) => self.0.get(name).map_or_else(|| ty.clone(), |bound| self.resolve(bound)),
            Type::List(inner) => Type::List(Box::new(self.resolve(inner))),
            Type::Record(fields) => Type::Record(fields.iter().map(|(k, v)| (k.clone(), self.resolve(v))).collect()),
            other => other.clone(),
        }
    }

    fn occurs(&self, name: &str, ty: &Type) -> bool {
        match self.resolve(ty) {
            Type::Var(v) => v == name,
            Type::List(inner) => self.occurs(name, &inner),
            Type::Record(fields) => fields.values().any(|v| self.occurs(name, v)),
            _ => false,
        }
    }

    fn bind(&mut self, name: &str, ty: &Type) -> Result<(), String> {
        if self.occurs(name, ty) {
            return Err(format!("cannot bind `{name}` to a type containing itself"));
        }
        self.0.insert(name.to_owned(), ty.clone());
        Ok(())
    }

    /// Unifies `expected` against `actual`, recording bindings. Returns the
    /// joined (most specific known) type on success.
    pub fn unify(&mut self, expected: &Type, actual: &Type) -> Result<Type, String> {
        let expected = self.resolve(expected);
        let actual = self.resolve(actual);
        match (&expected, &actual) {
            (Type::Any, other) | (other, Type::Any) => Ok(other.clone()),
            (Type::Var(name), other) => {
                self.bind(name, other)?;
                Ok(other.clone())
            }
            (other, Type::Var(name)) => {
                self.bind(name, other)?;
                Ok(other.clone())
            }
            (Type::Int, Type::Float) | (Type::Float, Type::Int) => Ok(Type::Float),
            (Type::Int, Type::Int) => Ok(Type::Int),
            (Type::Float, Type::Float) => Ok(Type::Float),
            (Type::Bool, Type::Bool) => Ok(Type::Bool),
            (Type::String, Type::String) => Ok(Type::String),
            (Type::Null, Type::Null) => Ok(Type::Null),
            (Type::List(e), Type::List(a)) => Ok(Type::List(Box::new(self.unify(e, a)?))),
            (Type::Record(expected_fields), Type::Record(actual_fields)) => {
                let mut merged = actual_fields.clone();
                for (k, e) in expected_fields {
                    let a = actual_fields
                        .get(k)
                        .ok_or_else(|| format!("missing field `{k}` in {actual}"))?;
                    merged.insert(k.clone(), self.unify(e, a)?);
                }
                Ok(Type::Record(merged))
            }
            _ => Err(format!("type mismatch: expected {expected}, found {actual}")),
        }
    }

    /// `expected` satisfied by `actual` without requiring an exact join
    /// (width subtyping for records, numeric widening Int -> Float).
    pub fn satisfies(&mut self, expected: &Type, actual: &Type) -> Result<(), String> {
        self.unify(expected, actual).map(|_| ())
    }
}

/// Least-upper-bound used to fold list-literal element types and to merge
/// `if`-branch environments.
#[must_use]
pub fn join(a: &Type, b: &Type) -> Type {
    match (a, b) {
        (Type::Any, _) | (_, Type::Any) => Type::Any,
        (Type::Int, Type::Int) => Type::Int,
        (Type::Int, Type::Float) | (Type::Float, Type::Int) | (Type::Float, Type::Float) => Type::Float,
        (Type::Bool, Type::Bool) => Type::Bool,
        (Type::String, Type::String) => Type::String,
        (Type::Null, Type::Null) => Type::Null,
        (Type::List(x), Type::List(y)) => Type::List(Box::new(join(x, y))),
        (Type::Record(x), Type::Record(y)) => {
            let mut out = BTreeMap::new();
            for (k, vx) in x {
                if let Some(vy) = y.get(k) {
                    out.insert(k.clone(), join(vx, vy));
                }
            }
            Type::Record(out)
        }
        (Type::Var(x), Type::Var(y)) if x == y => a.clone(),
        _ => Type::Any,
    }
}

/// Per-function local variable type environment.
#[derive(Default, Clone)]
struct Env(BTreeMap<String, Type>);

impl Env {
    fn intersect(&self, other: &Env) -> Env {
        Env(self.0.iter().filter_map(|(k, v)| other.0.get(k).map(|_| (k.clone(), v.clone()))).collect())
    }
}

/// Checks every function and unit test in `module`, returning accumulated
/// diagnostics (never throws; matches spec.md §7's static-issue policy).
#[must_use]
pub fn check(module: &Module) -> Vec<Diagnostic> {
    let sigs = build_signature_env(module);
    let fresh = FreshCounter::default();
    let mut diags = Vec::new();
    for (i, func) in module.functions.iter().enumerate() {
        check_function(func, &format!("/functions/{i}"), &sigs, &fresh, &mut diags);
    }
    diags
}

fn build_signature_env(module: &Module) -> BTreeMap<String, Signature> {
    let mut sigs = builtins::type_signatures();
    for func in &module.functions {
        if let Some(sig) = user_signature(func) {
            sigs.insert(func.name.clone(), sig);
        }
    }
    sigs
}

fn user_signature(func: &Function) -> Option<Signature> {
    let params = match &func.param_types {
        Some(types) => types.iter().map(|t| parse_type_expr(t).unwrap_or(Type::Any)).collect(),
        None => func.params.iter().map(|_| Type::Any).collect(),
    };
    let ret = func.returns.as_deref().map_or(Type::Any, |t| parse_type_expr(t).unwrap_or(Type::Any));
    Some(Signature { type_params: func.type_params.clone(), params, ret })
}

fn check_function(func: &Function, pointer: &str, sigs: &BTreeMap<String, Signature>, fresh: &FreshCounter, diags: &mut Vec<Diagnostic>) {
    let mut env = Env::default();
    let param_types: Vec<Type> = match &func.param_types {
        Some(types) => types.iter().map(|t| parse_type_expr(t).unwrap_or(Type::Any)).collect(),
        None => func.params.iter().map(|_| Type::Any).collect(),
    };
    for (name, ty) in func.params.iter().zip(param_types.iter()) {
        env.0.insert(name.clone(), ty.clone());
    }
    let ret_type = func.returns.as_deref().map_or(Type::Any, |t| parse_type_expr(t).unwrap_or(Type::Any));

    let mut subst = Subst::default();
    for (i, body_stmt) in func.body.iter().enumerate() {
        check_stmt(body_stmt, &format!("{pointer}/body/{i}"), &mut env, &ret_type, sigs, fresh, &mut subst, diags);
    }

    let mut ensures_env = env.clone();
    ensures_env.0.insert("result".to_owned(), ret_type.clone());
    for (i, e) in func.ensures.iter().enumerate() {
        let pointer = format!("{pointer}/ensures/{i}");
        if let Ok(ty) = infer_expr(e, &pointer, &ensures_env, sigs, fresh, &mut subst, diags) {
            require_bool(&ty, &pointer, diags);
        }
    }
    for (i, e) in func.requires.iter().enumerate() {
        let pointer = format!("{pointer}/requires/{i}");
        if let Ok(ty) = infer_expr(e, &pointer, &env, sigs, fresh, &mut subst, diags) {
            require_bool(&ty, &pointer, diags);
        }
    }
}

fn require_bool(ty: &Type, pointer: &str, diags: &mut Vec<Diagnostic>) {
    let mut subst = Subst::default();
    if subst.unify(&Type::Bool, ty).is_err() {
        diags.push(Diagnostic::new(pointer, Code::TypeMismatch, format!("expected Bool, found {ty}")));
    }
}

#[allow(clippy::too_many_arguments)]
fn check_stmt(
    stmt: &Stmt,
    pointer: &str,
    env: &mut Env,
    ret_type: &Type,
    sigs: &BTreeMap<String, Signature>,
    fresh: &FreshCounter,
    subst: &mut Subst,
    diags: &mut Vec<Diagnostic>,
) {
    match stmt {
        Stmt::Let { name, value } => {
            let value_pointer = format!("{pointer}/let/value");
            if let Ok(ty) = infer_expr(value, &value_pointer, env, sigs, fresh, subst, diags) {
                env.0.insert(name.clone(), ty);
            }
        }
        Stmt::Expr { expr } => {
            let _ = infer_expr(expr, &format!("{pointer}/expr/expr"), env, sigs, fresh, subst, diags);
        }
        Stmt::Assert { expr, .. } => {
            let p = format!("{pointer}/assert/expr");
            if let Ok(ty) = infer_expr(expr, &p, env, sigs, fresh, subst, diags) {
                require_bool(&ty, &p, diags);
            }
        }
        Stmt::Return { expr } => {
            let p = format!("{pointer}/return/expr");
            if let Ok(ty) = infer_expr(expr, &p, env, sigs, fresh, subst, diags) {
                if subst.unify(ret_type, &ty).is_err() {
                    diags.push(Diagnostic::new(p, Code::ReturnTypeMismatch, format!("expected {ret_type}, found {ty}")));
                }
            }
        }
        Stmt::If { cond, then, r#else } => {
            let cond_pointer = format!("{pointer}/if/cond");
            if let Ok(ty) = infer_expr(cond, &cond_pointer, env, sigs, fresh, subst, diags) {
                require_bool(&ty, &cond_pointer, diags);
            }
            let mut then_env = env.clone();
            for (i, s) in then.iter().enumerate() {
                check_stmt(s, &format!("{pointer}/if/then/{i}"), &mut then_env, ret_type, sigs, fresh, subst, diags);
            }
            let mut else_env = env.clone();
            for (i, s) in r#else.iter().enumerate() {
                check_stmt(s, &format!("{pointer}/if/else/{i}"), &mut else_env, ret_type, sigs, fresh, subst, diags);
            }
            *env = then_env.intersect(&else_env);
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn infer_expr(
    expr: &Expr,
    pointer: &str,
    env: &Env,
    sigs: &BTreeMap<String, Signature>,
    fresh: &FreshCounter,
    subst: &mut Subst,
    diags: &mut Vec<Diagnostic>,
) -> Result<Type, ()> {
    match expr {
        Expr::Literal(v) => Ok(literal_type(v)),
        Expr::Var(name) => Ok(env.0.get(name).cloned().unwrap_or(Type::Any)),
        Expr::List(items) => {
            if items.is_empty() {
                return Ok(Type::List(Box::new(Type::Any)));
            }
            let mut acc: Option<Type> = None;
            for (i, item) in items.iter().enumerate() {
                let ty = infer_expr(item, &format!("{pointer}/list/{i}"), env, sigs, fresh, subst, diags)?;
                acc = Some(match acc {
                    Some(prev) => join(&prev, &ty),
                    None => ty,
                });
            }
            Ok(Type::List(Box::new(acc.unwrap_or(Type::Any))))
        }
        Expr::Obj(fields) => {
            let mut out = BTreeMap::new();
            for (k, v) in fields {
                let ty = infer_expr(v, &format!("{pointer}/obj/{k}"), env, sigs, fresh, subst, diags)?;
                out.insert(k.clone(), ty);
            }
            Ok(Type::Record(out))
        }
        Expr::Call { func, args } => infer_call(func, args, pointer, env, sigs, fresh, subst, diags),
    }
}

fn literal_type(v: &serde_json::Value) -> Type {
    match v {
        serde_json::Value::Null => Type::Null,
        serde_json::Value::Bool(_) => Type::Bool,
        serde_json::Value::Number(n) if n.is_i64() || n.is_u64() => Type::Int,
        serde_json::Value::Number(_) => Type::Float,
        serde_json::Value::String(_) => Type::String,
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => Type::Any,
    }
}

#[allow(clippy::too_many_arguments)]
fn infer_call(
    func: &str,
    args: &[Expr],
    pointer: &str,
    env: &Env,
    sigs: &BTreeMap<String, Signature>,
    fresh: &FreshCounter,
    subst: &mut Subst,
    diags: &mut Vec<Diagnostic>,
) -> Result<Type, ()> {
    let mut arg_types = Vec::with_capacity(args.len());
    for (i, a) in args.iter().enumerate() {
        arg_types.push(infer_expr(a, &format!("{pointer}/call/args/{i}"), env, sigs, fresh, subst, diags)?);
    }

    if let Some(ty) = special_case(func, args, &arg_types, pointer, sigs, fresh, subst, diags) {
        return ty;
    }

    let Some(sig) = sigs.get(func) else {
        // Unknown callees are reported by the semantic analyser (component D); the
        // type checker treats them as `Any` so one bad call doesn't cascade errors.
        return Ok(Type::Any);
    };
    let sig = sig.freshen(fresh);
    if sig.params.len() != args.len() {
        diags.push(Diagnostic::new(
            pointer,
            Code::ArityMismatch,
            format!("`{func}` expects {} argument(s), found {}", sig.params.len(), args.len()),
        ));
        return Err(());
    }
    for (i, (expected, actual)) in sig.params.iter().zip(arg_types.iter()).enumerate() {
        if subst.satisfies(expected, actual).is_err() {
            diags.push(Diagnostic::new(
                format!("{pointer}/call/args/{i}"),
                Code::TypeMismatch,
                format!("expected {expected}, found {actual}"),
            ));
        }
    }
    Ok(subst.resolve(&sig.ret))
}

/// Special-case inference for the higher-order and record-ergonomic stdlib
/// calls (spec.md §4.E). Returns `None` when `func` isn't one of these.
#[allow(clippy::too_many_arguments)]
fn special_case(
    func: &str,
    args: &[Expr],
    arg_types: &[Type],
    pointer: &str,
    sigs: &BTreeMap<String, Signature>,
    fresh: &FreshCounter,
    subst: &mut Subst,
    diags: &mut Vec<Diagnostic>,
) -> Option<Result<Type, ()>> {
    match func {
        "list_sum" => {
            let elem = list_elem(&arg_types[0]);
            Some(Ok(match elem {
                Type::Int | Type::Float => elem,
                Type::Any | Type::Var(_) => Type::Any,
                other => {
                    diags.push(Diagnostic::new(pointer, Code::TypeMismatch, format!("list_sum expects a numeric list, found List[{other}]")));
                    return Some(Err(()));
                }
            }))
        }
        "list_mean" => Some(Ok(Type::Float)),
        "list_map" => Some(higher_order(args, arg_types, pointer, sigs, fresh, subst, diags, HigherOrder::Map)),
        "list_filter" => Some(higher_order(args, arg_types, pointer, sigs, fresh, subst, diags, HigherOrder::Filter)),
        "list_reduce" => Some(higher_order(args, arg_types, pointer, sigs, fresh, subst, diags, HigherOrder::Reduce)),
        "obj_get" => Some(obj_field_access(args, arg_types, pointer, diags, FieldOp::Get)),
        "obj_get_or" => Some(obj_field_access(args, arg_types, pointer, diags, FieldOp::GetOr)),
        "obj_set" => Some(obj_field_access(args, arg_types, pointer, diags, FieldOp::Set)),
        "obj_del" => Some(obj_field_access(args, arg_types, pointer, diags, FieldOp::Del)),
        "obj_merge" => Some(Ok(match (&arg_types[0], &arg_types[1]) {
            (Type::Record(a), Type::Record(b)) => {
                let mut out = a.clone();
                out.extend(b.clone());
                Type::Record(out)
            }
            _ => Type::Any,
        })),
        _ => None,
    }
}

fn list_elem(ty: &Type) -> Type {
    match ty {
        Type::List(inner) => (**inner).clone(),
        Type::Any => Type::Any,
        other => other.clone(),
    }
}

enum HigherOrder {
    Map,
    Filter,
    Reduce,
}

#[allow(clippy::too_many_arguments)]
fn higher_order(
    args: &[Expr],
    arg_types: &[Type],
    pointer: &str,
    sigs: &BTreeMap<String, Signature>,
    fresh: &FreshCounter,
    subst: &mut Subst,
    diags: &mut Vec<Diagnostic>,
    kind: HigherOrder,
) -> Result<Type, ()> {
    let Expr::Literal(serde_json::Value::String(callee_name)) = &args[0] else {
        // Non-string function refs are reported as InvalidFunctionRef by the
        // semantic analyser; here we just stop inferring further.
        return Err(());
    };
    let Some(sig) = sigs.get(callee_name) else { return Err(()) };
    let sig = sig.freshen(fresh);

    match kind {
        HigherOrder::Map => {
            let list_ty = &arg_types[1];
            let elem = list_elem(list_ty);
            if sig.params.len() != 1 {
                diags.push(Diagnostic::new(pointer, Code::ArityMismatch, "list_map callee must take exactly one argument"));
                return Err(());
            }
            let _ = subst.satisfies(&sig.params[0], &elem);
            Ok(Type::List(Box::new(subst.resolve(&sig.ret))))
        }
        HigherOrder::Filter => {
            let list_ty = &arg_types[1];
            let elem = list_elem(list_ty);
            if sig.params.len() != 1 {
                diags.push(Diagnostic::new(pointer, Code::ArityMismatch, "list_filter callee must take exactly one argument"));
                return Err(());
            }
            let _ = subst.satisfies(&sig.params[0], &elem);
            if subst.satisfies(&Type::Bool, &sig.ret).is_err() {
                diags.push(Diagnostic::new(pointer, Code::TypeMismatch, "list_filter callee must return Bool"));
            }
            Ok(list_ty.clone())
        }
        HigherOrder::Reduce => {
            let init_ty = &arg_types[1];
            let elem = list_elem(&arg_types[2]);
            if sig.params.len() != 2 {
                diags.push(Diagnostic::new(pointer, Code::ArityMismatch, "list_reduce callee must take exactly two arguments"));
                return Err(());
            }
            let _ = subst.satisfies(&sig.params[0], init_ty);
            let _ = subst.satisfies(&sig.params[1], &elem);
            let _ = subst.satisfies(init_ty, &sig.ret);
            Ok(init_ty.clone())
        }
    }
}

enum FieldOp {
    Get,
    GetOr,
    Set,
    Del,
}

fn obj_field_access(args: &[Expr], arg_types: &[Type], pointer: &str, diags: &mut Vec<Diagnostic>, op: FieldOp) -> Result<Type, ()> {
    let receiver = &arg_types[0];
    let Expr::Literal(serde_json::Value::String(key)) = &args[1] else {
        return Ok(Type::Any);
    };
    let Type::Record(fields) = receiver else {
        // Non-Record receivers (Any/Var) are accepted per spec.md §9 open question.
        return Ok(Type::Any);
    };
    match op {
        FieldOp::Get => fields.get(key).cloned().map(Ok).unwrap_or_else(|| {
            diags.push(Diagnostic::new(pointer, Code::UnknownField, format!("unknown field `{key}`")));
            Err(())
        }),
        FieldOp::GetOr => {
            let default = arg_types.get(2).cloned().unwrap_or(Type::Any);
            Ok(fields.get(key).map_or(default.clone(), |t| join(t, &default)))
        }
        FieldOp::Set => {
            let mut out = fields.clone();
            out.insert(key.clone(), arg_types.get(2).cloned().unwrap_or(Type::Any));
            Ok(Type::Record(out))
        }
        FieldOp::Del => {
            let mut out = fields.clone();
            out.remove(key);
            Ok(Type::Record(out))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Code;

    fn module(json: serde_json::Value) -> Module {
        Module::from_value(&json).unwrap()
    }

    #[test]
    fn int_widens_to_float_but_not_back() {
        let mut s = Subst::default();
        assert!(s.satisfies(&Type::Float, &Type::Int).is_ok());
        let mut s2 = Subst::default();
        assert!(s2.satisfies(&Type::Int, &Type::Float).is_err());
    }

    #[test]
    fn list_map_unifies_callee_and_checks_bool_for_filter() {
        let m = module(serde_json::json!({
            "module": "m", "version": "1",
            "functions": [
                {"name": "inc", "params": ["x"], "param_types": ["Int"], "returns": "Int",
                 "body": [{"return": {"expr": {"var": "x"}}}]},
                {"name": "top", "params": [], "returns": "List[Int]",
                 "body": [{"return": {"expr": {"call": {"fn": "list_map", "args": ["inc", {"list": [1,2,3]}]}}}}]}
            ]
        }));
        let diags = check(&m);
        assert!(diags.iter().all(|d| d.code != Code::TypeMismatch), "{diags:?}");
    }

    #[test]
    fn list_map_rejects_mismatched_callee_param_type() {
        let m = module(serde_json::json!({
            "module": "m", "version": "1",
            "functions": [
                {"name": "inc", "params": ["x"], "param_types": ["String"], "returns": "Int",
                 "body": [{"return": {"expr": 1}}]},
                {"name": "top", "params": [], "returns": "List[Int]",
                 "body": [{"return": {"expr": {"call": {"fn": "list_map", "args": ["inc", {"list": [1,2,3]}]}}}}]}
            ]
        }));
        let diags = check(&m);
        assert!(diags.iter().any(|d| d.code == Code::TypeMismatch));
    }

    #[test]
    fn record_width_subtyping_tolerates_extra_fields() {
        let mut s = Subst::default();
        let mut wide = BTreeMap::new();
        wide.insert("a".to_owned(), Type::Int);
        wide.insert("b".to_owned(), Type::Bool);
        let mut narrow = BTreeMap::new();
        narrow.insert("a".to_owned(), Type::Int);
        assert!(s.satisfies(&Type::Record(narrow), &Type::Record(wide)).is_ok());
    }
}
