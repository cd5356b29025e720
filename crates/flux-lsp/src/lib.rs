//! `flux-lsp`: a JSON-RPC 2.0 over stdio editor service for the flux
//! toolchain (spec.md §6), backed by `flux::editor::EditorService`.

pub mod handler;
