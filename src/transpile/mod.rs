//! # Transpile Module
//!
//! Turns a TypeScript handler into JavaScript a plain script runtime can
//! import, and optionally rewrites its default export into a local binding so
//! a platform wrapper can call it.
//!
//! Type syntax is removed by overwriting it with spaces, so every line and
//! column in the output matches the source and stack traces stay accurate.
//! TypeScript constructs with runtime semantics (`enum`, `namespace`,
//! constructor parameter properties, `import x = require()`) are rejected
//! instead of being emulated.
//!
//! ```rust
//! use biniserve::route::SourceKind;
//! use biniserve::transpile::{transpile, TranspileOptions};
//!
//! let js = transpile(
//!     "export default function handler(req: Req): string { return 'hi' }",
//!     SourceKind::Typed,
//!     &TranspileOptions::handler(),
//! )
//! .unwrap();
//! assert_eq!(js, "export default function handler(req     )         { return 'hi' }");
//! ```

mod edits;
mod rebind;
mod strip;

use thiserror::Error;
use tree_sitter::{Node, Parser, Tree};

use crate::route::SourceKind;
use edits::EditList;

/// Local binding the default export is rewritten into for platform entry points.
pub const USER_HANDLER_BINDING: &str = "__biniUserHandler";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TranspileError {
    #[error("failed to initialize the TypeScript parser")]
    ParserInit,
    #[error("syntax error at line {line}, column {column}")]
    Syntax { line: usize, column: usize },
    #[error("{construct} at line {line} has runtime semantics and cannot be stripped; rewrite it as plain JavaScript")]
    Unsupported {
        construct: &'static str,
        line: usize,
        column: usize,
    },
    #[error("module has no default export")]
    MissingDefaultExport,
    #[error("default export at line {line} re-exports another module; export a local function instead")]
    ReexportedDefault { line: usize },
}

/// Transpilation settings shared by the resolver's transpile strategy and
/// the platform emitters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranspileOptions {
    /// When set, `export default X` becomes `const <binding> = X`.
    pub default_export_binding: Option<String>,
}

impl TranspileOptions {
    /// Keep the module's own default export; used when loading a handler.
    pub fn handler() -> Self {
        Self {
            default_export_binding: None,
        }
    }

    /// Rebind the default export to [`USER_HANDLER_BINDING`]; used by emitters.
    pub fn entry() -> Self {
        Self {
            default_export_binding: Some(USER_HANDLER_BINDING.to_string()),
        }
    }
}

/// Transpile `source`. Type syntax is stripped only for [`SourceKind::Typed`].
pub fn transpile(source: &str, kind: SourceKind, opts: &TranspileOptions) -> Result<String, TranspileError> {
    let tree = parse(source)?;
    let root = tree.root_node();
    if root.has_error() {
        let (line, column) = first_error(root).map(position).unwrap_or((1, 1));
        return Err(TranspileError::Syntax { line, column });
    }

    let mut edits = EditList::default();
    if kind == SourceKind::Typed {
        strip::collect(root, &mut edits)?;
    }
    if let Some(binding) = &opts.default_export_binding {
        rebind::collect(root, source, binding, &mut edits)?;
    }
    Ok(edits.apply(source))
}

/// Strip TypeScript syntax, keeping the module's exports as they are.
pub fn strip_types(source: &str) -> Result<String, TranspileError> {
    transpile(source, SourceKind::Typed, &TranspileOptions::handler())
}

fn parse(source: &str) -> Result<Tree, TranspileError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into())
        .map_err(|_| TranspileError::ParserInit)?;
    parser.parse(source, None).ok_or(TranspileError::ParserInit)
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    if !node.has_error() {
        return None;
    }
    children(node).into_iter().find_map(first_error)
}

/// One-based line and column of `node`.
pub(crate) fn position(node: Node<'_>) -> (usize, usize) {
    let p = node.start_position();
    (p.row + 1, p.column + 1)
}

pub(crate) fn children(node: Node<'_>) -> Vec<Node<'_>> {
    let mut cursor = node.walk();
    node.children(&mut cursor).collect()
}

/// Anonymous child token with the given text, e.g. the `type` in `import type`.
pub(crate) fn token<'t>(node: Node<'t>, kind: &str) -> Option<Node<'t>> {
    children(node)
        .into_iter()
        .find(|c| !c.is_named() && c.kind() == kind)
}
