//! Deterministic repair suggestion (spec.md §4.I): for each repairable
//! diagnostic code, synthesize the smallest JSON Patch (component A) that
//! resolves it, then re-run the static passes to confirm the patch doesn't
//! introduce a new diagnostic with the same `(code, pointer)` key.

use serde_json::Value;

use crate::ast::Module;
use crate::diagnostics::{self, Code, Diagnostic};
use crate::pointer::{self, PatchOp};
use crate::{effects, semantic, types};

/// One candidate fix: the patch plus the diagnostic it targets.
#[derive(Debug, Clone, PartialEq)]
pub struct Repair {
    pub diagnostic: Diagnostic,
    pub patch: Vec<PatchOp>,
}

/// Synthesizes a repair for every repairable diagnostic in `diags`,
/// discarding any whose patch would introduce a regression (spec.md §8
/// invariant on repair safety).
#[must_use]
pub fn suggest_all(document: &Value, module: &Module, diags: &[Diagnostic]) -> Vec<Repair> {
    diags.iter().filter(|d| d.code.is_repairable()).filter_map(|d| suggest_one(document, module, d)).collect()
}

/// Synthesizes and validates a single repair, or `None` if this code isn't
/// repairable or the function index can't be recovered from the pointer.
#[must_use]
pub fn suggest_one(document: &Value, module: &Module, diag: &Diagnostic) -> Option<Repair> {
    let patch = match diag.code {
        Code::MissingReturn => missing_return_patch(module, diag)?,
        Code::NotPure => not_pure_patch(document, diag)?,
        Code::MissingEffect => missing_effect_patch(document, diag)?,
        _ => return None,
    };
    if regresses(document, &patch, diag) {
        return None;
    }
    Some(Repair { diagnostic: diag.clone(), patch })
}

fn function_index(pointer: &str) -> Option<usize> {
    let segments = pointer::split(pointer).ok()?;
    if segments.first().map(String::as_str) != Some("functions") {
        return None;
    }
    segments.get(1)?.parse().ok()
}

/// Per spec.md §4.I: always append `{return: null}`, independent of the
/// declared return type. For a non-`Null`/`Any` return type this produces a
/// `ReturnTypeMismatch` the editor's pre-validation rejects (§8 scenario
/// E1); the suggester doesn't try to be smarter than that.
fn missing_return_patch(module: &Module, diag: &Diagnostic) -> Option<Vec<PatchOp>> {
    let i = function_index(&diag.pointer)?;
    module.functions.get(i)?;
    let path = format!("/functions/{i}/body/-");
    Some(vec![PatchOp::Add { path, value: serde_json::json!({"return": {"expr": null}}) }])
}

/// Parses the comma-separated effect list out of an effects.rs `MissingEffect`
/// message (`"...: e1, e2"`), the only place that list is recorded.
fn effect_list_from_message(message: &str) -> Vec<String> {
    message
        .rsplit_once(": ")
        .map(|(_, list)| list.split(", ").map(str::trim).filter(|s| !s.is_empty()).map(str::to_owned).collect())
        .unwrap_or_default()
}

fn not_pure_patch(document: &Value, diag: &Diagnostic) -> Option<Vec<PatchOp>> {
    let i = function_index(&diag.pointer)?;
    let remaining: Vec<String> = current_effects(document, i)?.into_iter().filter(|e| e != "pure").collect();
    let path = format!("/functions/{i}/effects");
    Some(vec![PatchOp::Replace { path, value: serde_json::to_value(remaining).ok()? }])
}

fn missing_effect_patch(document: &Value, diag: &Diagnostic) -> Option<Vec<PatchOp>> {
    let i = function_index(&diag.pointer)?;
    let missing = effect_list_from_message(&diag.message);
    let mut current: Vec<String> = current_effects(document, i)?.into_iter().filter(|e| e != "pure").collect();
    for m in missing {
        if !current.contains(&m) {
            current.push(m);
        }
    }
    current.sort();
    let path = format!("/functions/{i}/effects");
    Some(vec![PatchOp::Replace { path, value: serde_json::to_value(current).ok()? }])
}

fn current_effects(document: &Value, function_index: usize) -> Option<Vec<String>> {
    let func = pointer::resolve(document, &format!("/functions/{function_index}")).ok()?;
    func.get("effects")
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(str::to_owned)).collect())
        .or_else(|| Some(vec!["pure".to_owned()]))
}

/// Applies `patch` to a clone of `document`, re-decodes and re-runs D/E/F,
/// and rejects the repair if the target diagnostic's `(code, pointer)` key
/// survives, or if any *other* previously-absent `(code, pointer)` key
/// appears (a regression).
fn regresses(document: &Value, patch: &[PatchOp], target: &Diagnostic) -> bool {
    let before = full_diagnostics(document);
    let before_keys = diagnostics::key_set(&before);

    let mut patched = document.clone();
    let Ok(patched_root) = pointer::apply(&mut patched, patch) else { return true };
    let Ok(module) = Module::from_value(&patched_root) else { return true };

    let after = full_diagnostics_for(&module);
    let after_keys = diagnostics::key_set(&after);

    let target_key = (target.code, target.pointer.clone());
    if after_keys.contains(&target_key) {
        return true;
    }
    after_keys.difference(&before_keys).next().is_some()
}

fn full_diagnostics(document: &Value) -> Vec<Diagnostic> {
    Module::from_value(document).map(|m| full_diagnostics_for(&m)).unwrap_or_default()
}

fn full_diagnostics_for(module: &Module) -> Vec<Diagnostic> {
    let mut diags = semantic::analyze(module);
    diags.extend(types::check(module));
    diags.extend(effects::check(module));
    diags
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_return_on_a_null_returning_function_is_repaired() {
        let doc = json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "returns": "Null", "body": [
                {"let": {"name": "x", "value": 1}}
            ]}]
        });
        let module = Module::from_value(&doc).unwrap();
        let diags = semantic::analyze(&module);
        let missing = diags.iter().find(|d| d.code == Code::MissingReturn).unwrap();
        let repair = suggest_one(&doc, &module, missing).expect("repair should be synthesized");
        let mut patched_doc = doc.clone();
        let patched = pointer::apply(&mut patched_doc, &repair.patch).unwrap();
        let patched_module = Module::from_value(&patched).unwrap();
        assert!(semantic::analyze(&patched_module).iter().all(|d| d.code != Code::MissingReturn));
    }

    #[test]
    fn missing_return_on_an_int_returning_function_is_not_offered() {
        // spec.md §8 scenario E1: appending `{return: null}` to an
        // Int-returning function trades MissingReturn for ReturnTypeMismatch,
        // so pre-validation must reject the fix rather than offer it.
        let doc = json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": ["x"], "param_types": ["Int"], "returns": "Int", "body": [
                {"assert": {"expr": {"call": {"fn": "gt", "args": [{"var": "x"}, 0]}}}}
            ]}]
        });
        let module = Module::from_value(&doc).unwrap();
        let diags = semantic::analyze(&module);
        let missing = diags.iter().find(|d| d.code == Code::MissingReturn).unwrap();
        assert!(suggest_one(&doc, &module, missing).is_none());
    }

    #[test]
    fn missing_effect_adds_the_declaration() {
        let doc = json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "body": [
                {"expr": {"expr": {"call": {"fn": "print", "args": [1]}}}}
            ]}]
        });
        let module = Module::from_value(&doc).unwrap();
        let diags = effects::check(&module);
        let missing = diags.iter().find(|d| d.code == Code::MissingEffect).unwrap();
        let repair = suggest_one(&doc, &module, missing).expect("repair should be synthesized");
        let mut patched_doc = doc.clone();
        let patched = pointer::apply(&mut patched_doc, &repair.patch).unwrap();
        assert_eq!(patched["functions"][0]["effects"], json!(["io.print"]));
    }

    #[test]
    fn not_pure_drops_the_pure_tag_and_keeps_the_rest() {
        let doc = json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "effects": ["pure", "io.print"], "body": [
                {"expr": {"expr": {"call": {"fn": "print", "args": [1]}}}}
            ]}]
        });
        let module = Module::from_value(&doc).unwrap();
        let diags = effects::check(&module);
        let not_pure = diags.iter().find(|d| d.code == Code::NotPure).unwrap();
        let repair = suggest_one(&doc, &module, not_pure).expect("repair should be synthesized");
        let mut patched_doc = doc.clone();
        let patched = pointer::apply(&mut patched_doc, &repair.patch).unwrap();
        assert_eq!(patched["functions"][0]["effects"], json!(["io.print"]));
    }
}
