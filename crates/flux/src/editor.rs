//! Editor service (spec.md §4.J): an in-memory document store plus
//! diagnostics, code actions and completion, entirely free of I/O. The LSP
//! crate (`flux-lsp`) owns the JSON-RPC transport and calls straight through
//! to this module, keeping transport and session logic as separate layers.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::ast::Module;
use crate::builtins;
use crate::diagnostics::{self, Code, Diagnostic};
use crate::effects;
use crate::format::{self, SchemaIssue};
use crate::parse::{self, Parsed};
use crate::pointer::PatchOp;
use crate::repair::{self, Repair};
use crate::semantic;
use crate::textindex::Position;
use crate::types;

/// A diagnostic with its resolved editor range.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RangedDiagnostic {
    #[serde(flatten)]
    pub diagnostic: Diagnostic,
    pub range: Range,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Range {
    pub start: Position,
    pub end: Position,
}

/// A single contiguous text replacement, in UTF-16 editor coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextEdit {
    pub range: Range,
    pub new_text: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CodeActionKind {
    Format,
    QuickFix,
    FixAll,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CodeAction {
    pub title: String,
    pub kind: CodeActionKind,
    pub edits: Vec<TextEdit>,
}

/// One open document's full state (spec.md §4.J).
pub struct Document {
    pub text: String,
    pub version: i64,
    parsed: Result<Parsed, parse::ParseError>,
}

impl Document {
    fn new(text: String, version: i64) -> Self {
        let parsed = parse::parse(&text);
        Self { text, version, parsed }
    }

    fn module(&self) -> Option<Module> {
        self.parsed.as_ref().ok().and_then(|p| Module::from_value(&p.value).ok())
    }
}

/// Document-URI-keyed store; mutated only by `open`/`change` (spec.md §5).
#[derive(Default)]
pub struct EditorService {
    documents: BTreeMap<String, Document>,
}

impl EditorService {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, uri: impl Into<String>, text: String, version: i64) {
        self.documents.insert(uri.into(), Document::new(text, version));
    }

    /// Full-text replacement, per spec.md §6 (`didChange` is whole-document).
    pub fn change(&mut self, uri: &str, text: String, version: i64) {
        self.documents.insert(uri.to_owned(), Document::new(text, version));
    }

    pub fn close(&mut self, uri: &str) {
        self.documents.remove(uri);
    }

    #[must_use]
    pub fn document(&self, uri: &str) -> Option<&Document> {
        self.documents.get(uri)
    }

    /// Computes the full diagnostic set for one document: a single parse
    /// error, or schema + semantic + type + effect issues (spec.md §4.J).
    #[must_use]
    pub fn diagnostics(&self, uri: &str) -> Vec<RangedDiagnostic> {
        let Some(doc) = self.documents.get(uri) else { return Vec::new() };
        diagnostics_for(doc)
    }

    /// Available code actions at the current document state.
    #[must_use]
    pub fn code_actions(&self, uri: &str) -> Vec<CodeAction> {
        let Some(doc) = self.documents.get(uri) else { return Vec::new() };
        let Ok(parsed) = &doc.parsed else { return Vec::new() };
        let Some(module) = doc.module() else { return Vec::new() };

        let mut actions = Vec::new();
        actions.push(CodeAction {
            title: "Format document".to_owned(),
            kind: CodeActionKind::Format,
            edits: vec![full_document_replace(doc, format::canon_module(&module))],
        });

        let all_diags = diagnostics_for(doc);
        for ranged in all_diags.iter().filter(|r| r.diagnostic.code.is_repairable()) {
            if let Some(action) = quick_fix(doc, parsed, &module, &all_diags, &ranged.diagnostic) {
                actions.push(action);
            }
        }

        if let Some(action) = fix_all(doc, &module, &all_diags) {
            actions.push(action);
        }

        actions
    }

    /// Coarse completion: builtin names plus every function in this module
    /// (spec.md §4.J; filtering is the client's job).
    #[must_use]
    pub fn completion(&self, uri: &str) -> Vec<String> {
        let mut names: Vec<String> = builtins::names().iter().map(|s| (*s).to_owned()).collect();
        if let Some(module) = self.documents.get(uri).and_then(Document::module) {
            names.extend(module.functions.iter().map(|f| f.name.clone()));
        }
        names.sort();
        names.dedup();
        names
    }
}

fn diagnostics_for(doc: &Document) -> Vec<RangedDiagnostic> {
    match &doc.parsed {
        Err(e) => {
            let pos = {
                // A best-effort position: re-run a throwaway text-index since a
                // failed parse doesn't hand one back.
                crate::textindex::TextIndex::new(&doc.text).position(e.index)
            };
            vec![RangedDiagnostic {
                diagnostic: Diagnostic::new("", Code::JsonParse, e.message.clone()),
                range: Range { start: pos, end: pos },
            }]
        }
        Ok(parsed) => {
            let mut diags: Vec<Diagnostic> = format::validate_schema(&parsed.value).into_iter().map(schema_issue_to_diagnostic).collect();
            if let Ok(module) = Module::from_value(&parsed.value) {
                diags.extend(semantic::analyze(&module));
                diags.extend(types::check(&module));
                diags.extend(effects::check(&module));
            }
            diags.into_iter().map(|d| ranged(parsed, d)).collect()
        }
    }
}

fn schema_issue_to_diagnostic(issue: SchemaIssue) -> Diagnostic {
    Diagnostic::new(issue.pointer, Code::SchemaError, issue.message).with_detail(issue.validator)
}

fn ranged(parsed: &Parsed, diagnostic: Diagnostic) -> RangedDiagnostic {
    let range = range_for_pointer(parsed, &diagnostic.pointer);
    RangedDiagnostic { diagnostic, range }
}

/// Walks a pointer up toward the root until a recorded span (preferring a
/// pair-span, which covers a key too) is found (spec.md §4.J).
fn range_for_pointer(parsed: &Parsed, pointer: &str) -> Range {
    let mut current = pointer.to_owned();
    loop {
        if let Some(&(start, end)) = parsed.pair_spans.get(&current) {
            return Range { start: parsed.text_index.position(start), end: parsed.text_index.position(end) };
        }
        if let Some(&(start, end)) = parsed.spans.get(&current) {
            return Range { start: parsed.text_index.position(start), end: parsed.text_index.position(end) };
        }
        if current.is_empty() {
            let zero = Position { line: 0, character: 0 };
            return Range { start: zero, end: zero };
        }
        current = parent_pointer(&current);
    }
}

fn parent_pointer(pointer: &str) -> String {
    let mut segments = crate::pointer::split(pointer).unwrap_or_default();
    segments.pop();
    crate::pointer::join(&segments)
}

fn full_document_replace(doc: &Document, new_text: String) -> TextEdit {
    let end = match &doc.parsed {
        Ok(parsed) => parsed.text_index.position(doc.text.chars().count()),
        Err(_) => crate::textindex::TextIndex::new(&doc.text).position(doc.text.chars().count()),
    };
    TextEdit { range: Range { start: Position { line: 0, character: 0 }, end }, new_text }
}

fn quick_fix(doc: &Document, parsed: &Parsed, module: &Module, baseline: &[RangedDiagnostic], target: &Diagnostic) -> Option<CodeAction> {
    let baseline_diags: Vec<Diagnostic> = baseline.iter().map(|r| r.diagnostic.clone()).collect();
    let repair = repair::suggest_one(&parsed.value, module, target)?;
    let edits = minimal_edits(parsed, &repair)?;
    if !pre_validate(doc, &baseline_diags, &edits, target, None) {
        return None;
    }
    Some(CodeAction { title: format!("Fix {:?}", target.code), kind: CodeActionKind::QuickFix, edits })
}

fn fix_all(doc: &Document, module: &Module, baseline: &[RangedDiagnostic]) -> Option<CodeAction> {
    let Ok(parsed) = &doc.parsed else { return None };
    let baseline_diags: Vec<Diagnostic> = baseline.iter().map(|r| r.diagnostic.clone()).collect();

    let mut document_value = parsed.value.clone();
    let mut current_module = module.clone();
    let mut any_applied = false;
    for _ in 0..5 {
        let diags = run_static_passes(&current_module);
        let repairs: Vec<Repair> = repair::suggest_all(&document_value, &current_module, &diags);
        if repairs.is_empty() {
            break;
        }
        for r in &repairs {
            match crate::pointer::apply(&mut document_value, &r.patch) {
                Ok(root) => document_value = root,
                Err(_) => return None,
            }
        }
        let Ok(next_module) = Module::from_value(&document_value) else { return None };
        current_module = next_module;
        any_applied = true;
    }
    if !any_applied {
        return None;
    }

    let new_text = format::canon_module(&current_module);
    let edit = full_document_replace(doc, new_text);
    if !pre_validate_fixall(doc, &baseline_diags, &edit) {
        return None;
    }
    Some(CodeAction { title: "Fix all".to_owned(), kind: CodeActionKind::FixAll, edits: vec![edit] })
}

fn run_static_passes(module: &Module) -> Vec<Diagnostic> {
    let mut diags = semantic::analyze(module);
    diags.extend(types::check(module));
    diags.extend(effects::check(module));
    diags
}

/// Minimal-edit synthesis for the patch ops the repair suggester actually
/// emits (spec.md §4.J): `replace` on a scalar/array value, and `add` at a
/// list's `-` index. Anything else signals the caller to fall back to a
/// full-document canonical replacement.
fn minimal_edits(parsed: &Parsed, repair: &Repair) -> Option<Vec<TextEdit>> {
    repair.patch.iter().map(|op| minimal_edit_for(parsed, op)).collect()
}

fn minimal_edit_for(parsed: &Parsed, op: &PatchOp) -> Option<TextEdit> {
    match op {
        PatchOp::Replace { path, value } => {
            let &(start, end) = parsed.spans.get(path)?;
            Some(TextEdit {
                range: Range { start: parsed.text_index.position(start), end: parsed.text_index.position(end) },
                new_text: serde_json::to_string(value).ok()?,
            })
        }
        PatchOp::Add { path, value } if path.ends_with("/-") => {
            let parent_pointer = path.strip_suffix("/-").unwrap_or(path);
            let &(_, end) = parsed.spans.get(parent_pointer)?;
            let list = crate::pointer::resolve(&parsed.value, parent_pointer).ok()?.as_array()?;
            let insert_at = end.saturating_sub(1);
            let prefix = if list.is_empty() { String::new() } else { ",".to_owned() };
            let pos = parsed.text_index.position(insert_at);
            Some(TextEdit { range: Range { start: pos, end: pos }, new_text: format!("{prefix}{}", serde_json::to_string(value).ok()?) })
        }
        PatchOp::Add { .. } | PatchOp::Remove { .. } => None,
    }
}

/// Applies `edits` (sorted back-to-front so earlier offsets stay valid) to
/// `text`, rejecting overlaps (spec.md §4.J pre-validation step 1).
fn apply_edits(text: &str, edits: &[TextEdit]) -> Option<String> {
    let index = crate::textindex::TextIndex::new(text);
    let mut spans: Vec<(usize, usize, &str)> =
        edits.iter().map(|e| (index.offset(e.range.start), index.offset(e.range.end), e.new_text.as_str())).collect();
    spans.sort_by_key(|&(start, _, _)| start);
    for pair in spans.windows(2) {
        if pair[1].0 < pair[0].1 {
            return None;
        }
    }
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::new();
    let mut cursor = 0usize;
    for (start, end, new_text) in spans {
        if start > chars.len() || end > chars.len() || start > end {
            return None;
        }
        out.extend(&chars[cursor..start]);
        out.push_str(new_text);
        cursor = end;
    }
    out.extend(&chars[cursor..]);
    Some(out)
}

/// Five-step pre-validation for a single targeted quick fix (spec.md §4.J).
fn pre_validate(doc: &Document, baseline: &[Diagnostic], edits: &[TextEdit], target: &Diagnostic, expected_canonical: Option<&str>) -> bool {
    let Some(new_text) = apply_edits(&doc.text, edits) else { return false };
    let Ok(parsed) = parse::parse(&new_text) else { return false };
    if !format::validate_schema(&parsed.value).is_empty() {
        return false;
    }
    if let Some(expected) = expected_canonical {
        let Ok(actual) = format::canon(&parsed.value) else { return false };
        if actual != expected {
            return false;
        }
    }
    let Ok(module) = Module::from_value(&parsed.value) else { return false };
    let after = run_static_passes(&module);

    let baseline_errors: std::collections::BTreeSet<_> = baseline.iter().filter(|d| d.is_error()).map(|d| (d.code, d.pointer.clone())).collect();
    let after_errors: std::collections::BTreeSet<_> = after.iter().filter(|d| d.is_error()).map(|d| (d.code, d.pointer.clone())).collect();
    if !after_errors.is_subset(&baseline_errors) {
        return false;
    }
    if after_errors == baseline_errors {
        let baseline_warnings: std::collections::BTreeSet<_> =
            baseline.iter().filter(|d| !d.is_error()).map(|d| (d.code, d.pointer.clone())).collect();
        let after_warnings: std::collections::BTreeSet<_> = after.iter().filter(|d| !d.is_error()).map(|d| (d.code, d.pointer.clone())).collect();
        if !after_warnings.is_subset(&baseline_warnings) {
            return false;
        }
    }
    let target_key = (target.code, target.pointer.clone());
    if diagnostics::key_set(&after).contains(&target_key) {
        return false;
    }
    diagnostics::key_set(&after) != diagnostics::key_set(baseline)
}

fn pre_validate_fixall(doc: &Document, baseline: &[Diagnostic], edit: &TextEdit) -> bool {
    let Some(new_text) = apply_edits(&doc.text, std::slice::from_ref(edit)) else { return false };
    let Ok(parsed) = parse::parse(&new_text) else { return false };
    if !format::validate_schema(&parsed.value).is_empty() {
        return false;
    }
    let Ok(module) = Module::from_value(&parsed.value) else { return false };
    let after = run_static_passes(&module);
    let baseline_errors: std::collections::BTreeSet<_> = baseline.iter().filter(|d| d.is_error()).map(|d| (d.code, d.pointer.clone())).collect();
    let after_errors: std::collections::BTreeSet<_> = after.iter().filter(|d| d.is_error()).map(|d| (d.code, d.pointer.clone())).collect();
    after_errors.is_subset(&baseline_errors) && diagnostics::key_set(&after) != diagnostics::key_set(baseline)
}
