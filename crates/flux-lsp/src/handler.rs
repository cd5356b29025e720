//! JSON-RPC method dispatch for the flux language server (spec.md §6): thin
//! request/response and notification handlers translating LSP-shaped JSON
//! into calls against [`flux::editor::EditorService`], which does all the
//! real work, keeping transport (`main.rs`) and session logic (this module)
//! as separate layers.

use flux::editor::EditorService;
use serde::Deserialize;
use serde_json::{Value, json};

/// Adapts JSON-RPC requests/notifications onto one [`EditorService`].
pub struct Handler {
    editor: EditorService,
    shutdown_requested: bool,
}

#[derive(Debug, Deserialize)]
struct TextDocumentIdentifier {
    uri: String,
}

#[derive(Debug, Deserialize)]
struct TextDocumentItem {
    uri: String,
    #[serde(default)]
    version: i64,
    text: String,
}

#[derive(Debug, Deserialize)]
struct DidOpenParams {
    #[serde(rename = "textDocument")]
    text_document: TextDocumentItem,
}

#[derive(Debug, Deserialize)]
struct ContentChange {
    text: String,
}

#[derive(Debug, Deserialize)]
struct VersionedTextDocumentIdentifier {
    uri: String,
    #[serde(default)]
    version: i64,
}

#[derive(Debug, Deserialize)]
struct DidChangeParams {
    #[serde(rename = "textDocument")]
    text_document: VersionedTextDocumentIdentifier,
    #[serde(rename = "contentChanges")]
    content_changes: Vec<ContentChange>,
}

#[derive(Debug, Deserialize)]
struct DidCloseParams {
    #[serde(rename = "textDocument")]
    text_document: TextDocumentIdentifier,
}

#[derive(Debug, Deserialize)]
struct DocumentRequestParams {
    #[serde(rename = "textDocument")]
    text_document: TextDocumentIdentifier,
}

impl Default for Handler {
    fn default() -> Self {
        Self::new()
    }
}

impl Handler {
    #[must_use]
    pub fn new() -> Self {
        Self { editor: EditorService::new(), shutdown_requested: false }
    }

    #[must_use]
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    /// Handles a method that expects a response, returning the JSON-RPC
    /// `result` value or a `(code, message)` pair for a JSON-RPC error.
    pub fn handle_request(&mut self, method: &str, params: Value) -> Result<Value, (i32, String)> {
        match method {
            "initialize" => Ok(initialize_result()),
            "shutdown" => {
                self.shutdown_requested = true;
                Ok(Value::Null)
            }
            "textDocument/completion" => self.completion(params),
            "textDocument/formatting" => self.formatting(params),
            "textDocument/codeAction" => self.code_action(params),
            "textDocument/diagnostic" => self.diagnostic(params),
            other => Err((-32601, format!("method not found: {other}"))),
        }
    }

    /// Handles a notification (no response expected).
    pub fn handle_notification(&mut self, method: &str, params: Value) {
        match method {
            "textDocument/didOpen" => self.did_open(params),
            "textDocument/didChange" => self.did_change(params),
            "textDocument/didClose" => self.did_close(params),
            "exit" => {}
            _ => {}
        }
    }

    fn did_open(&mut self, params: Value) {
        let Ok(p) = serde_json::from_value::<DidOpenParams>(params) else { return };
        self.editor.open(p.text_document.uri, p.text_document.text, p.text_document.version);
    }

    fn did_change(&mut self, params: Value) {
        let Ok(p) = serde_json::from_value::<DidChangeParams>(params) else { return };
        let Some(change) = p.content_changes.into_iter().next_back() else { return };
        self.editor.change(&p.text_document.uri, change.text, p.text_document.version);
    }

    fn did_close(&mut self, params: Value) {
        let Ok(p) = serde_json::from_value::<DidCloseParams>(params) else { return };
        self.editor.close(&p.text_document.uri);
    }

    fn completion(&self, params: Value) -> Result<Value, (i32, String)> {
        let p: DocumentRequestParams = serde_json::from_value(params).map_err(invalid_params)?;
        let items: Vec<Value> = self
            .editor
            .completion(&p.text_document.uri)
            .into_iter()
            .map(|label| json!({"label": label}))
            .collect();
        Ok(json!({"isIncomplete": false, "items": items}))
    }

    fn formatting(&self, params: Value) -> Result<Value, (i32, String)> {
        let p: DocumentRequestParams = serde_json::from_value(params).map_err(invalid_params)?;
        let edits: Vec<Value> = self
            .editor
            .code_actions(&p.text_document.uri)
            .into_iter()
            .find(|a| a.kind == flux::editor::CodeActionKind::Format)
            .map(|a| a.edits.iter().map(text_edit_to_json).collect())
            .unwrap_or_default();
        Ok(Value::Array(edits))
    }

    fn code_action(&self, params: Value) -> Result<Value, (i32, String)> {
        let p: DocumentRequestParams = serde_json::from_value(params).map_err(invalid_params)?;
        let actions: Vec<Value> = self
            .editor
            .code_actions(&p.text_document.uri)
            .into_iter()
            .map(|a| {
                let edits: Vec<Value> = a.edits.iter().map(text_edit_to_json).collect();
                let mut changes = serde_json::Map::new();
                changes.insert(p.text_document.uri.clone(), Value::Array(edits));
                json!({
                    "title": a.title,
                    "kind": format!("{:?}", a.kind),
                    "edit": {"changes": Value::Object(changes)},
                })
            })
            .collect();
        Ok(Value::Array(actions))
    }

    fn diagnostic(&self, params: Value) -> Result<Value, (i32, String)> {
        let p: DocumentRequestParams = serde_json::from_value(params).map_err(invalid_params)?;
        let items: Vec<Value> = self.editor.diagnostics(&p.text_document.uri).into_iter().map(ranged_diagnostic_to_json).collect();
        Ok(json!({"kind": "full", "items": items}))
    }
}

fn invalid_params(err: serde_json::Error) -> (i32, String) {
    (-32602, format!("invalid params: {err}"))
}

fn position_to_json(pos: flux::textindex::Position) -> Value {
    json!({"line": pos.line, "character": pos.character})
}

fn text_edit_to_json(edit: &flux::editor::TextEdit) -> Value {
    json!({
        "range": {"start": position_to_json(edit.range.start), "end": position_to_json(edit.range.end)},
        "newText": edit.new_text,
    })
}

fn ranged_diagnostic_to_json(d: flux::editor::RangedDiagnostic) -> Value {
    json!({
        "range": {"start": position_to_json(d.range.start), "end": position_to_json(d.range.end)},
        "severity": match d.diagnostic.severity { flux::diagnostics::Severity::Error => 1, flux::diagnostics::Severity::Warning => 2 },
        "code": format!("{:?}", d.diagnostic.code),
        "message": d.diagnostic.message,
    })
}

fn initialize_result() -> Value {
    json!({
        "capabilities": {
            "textDocumentSync": 1,
            "completionProvider": {},
            "documentFormattingProvider": true,
            "codeActionProvider": true,
            "diagnosticProvider": {"interFileDependencies": false, "workspaceDiagnostics": false},
        },
        "serverInfo": {"name": "flux-lsp", "version": env!("CARGO_PKG_VERSION")},
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open(handler: &mut Handler, uri: &str, text: &str) {
        handler.handle_notification(
            "textDocument/didOpen",
            json!({"textDocument": {"uri": uri, "version": 1, "text": text}}),
        );
    }

    #[test]
    fn initialize_advertises_capabilities() {
        let mut handler = Handler::new();
        let result = handler.handle_request("initialize", Value::Null).unwrap();
        assert!(result["capabilities"]["codeActionProvider"].as_bool().unwrap());
    }

    #[test]
    fn did_open_then_diagnostic_reports_missing_effect() {
        let mut handler = Handler::new();
        let text = serde_json::to_string_pretty(&json!({
            "module": "m", "version": "1",
            "functions": [{"name": "f", "params": [], "body": [
                {"expr": {"expr": {"call": {"fn": "print", "args": [1]}}}}
            ]}]
        }))
        .unwrap();
        open(&mut handler, "file:///a.json", &text);
        let result = handler.handle_request("textDocument/diagnostic", json!({"textDocument": {"uri": "file:///a.json"}})).unwrap();
        let items = result["items"].as_array().unwrap();
        assert!(items.iter().any(|i| i["code"] == "MissingEffect"));
    }

    #[test]
    fn completion_lists_builtins() {
        let mut handler = Handler::new();
        open(&mut handler, "file:///a.json", r#"{"module":"m","version":"1","functions":[]}"#);
        let result = handler.handle_request("textDocument/completion", json!({"textDocument": {"uri": "file:///a.json"}})).unwrap();
        let labels: Vec<&str> = result["items"].as_array().unwrap().iter().map(|i| i["label"].as_str().unwrap()).collect();
        assert!(labels.contains(&"list_map"));
    }

    #[test]
    fn shutdown_sets_flag() {
        let mut handler = Handler::new();
        assert!(!handler.shutdown_requested());
        handler.handle_request("shutdown", Value::Null).unwrap();
        assert!(handler.shutdown_requested());
    }
}
