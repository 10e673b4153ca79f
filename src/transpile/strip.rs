//! TypeScript syntax removal.

use tree_sitter::Node;

use super::edits::EditList;
use super::{children, position, token, TranspileError};

/// Declarations with no runtime meaning; removed whole.
const TYPE_ONLY_DECLARATIONS: [&str; 7] = [
    "interface_declaration",
    "type_alias_declaration",
    "ambient_declaration",
    "function_signature",
    "abstract_method_signature",
    "index_signature",
    "method_signature",
];

/// Type positions and modifiers inside runtime code; removed whole.
const TYPE_ONLY_FRAGMENTS: [&str; 8] = [
    "type_annotation",
    "type_arguments",
    "type_parameters",
    "asserts_annotation",
    "type_predicate_annotation",
    "accessibility_modifier",
    "override_modifier",
    "implements_clause",
];

fn blank_node(node: Node<'_>, edits: &mut EditList) {
    edits.blank(node.start_byte(), node.end_byte());
}

fn unsupported(construct: &'static str, node: Node<'_>) -> TranspileError {
    let (line, column) = position(node);
    TranspileError::Unsupported {
        construct,
        line,
        column,
    }
}

/// Record edits that remove TypeScript syntax below `node`.
pub(super) fn collect(node: Node<'_>, edits: &mut EditList) -> Result<(), TranspileError> {
    let kind = node.kind();
    if TYPE_ONLY_DECLARATIONS.contains(&kind) || TYPE_ONLY_FRAGMENTS.contains(&kind) {
        blank_node(node, edits);
        return Ok(());
    }

    match kind {
        "enum_declaration" if node.is_named() => return Err(unsupported("enum", node)),
        "internal_module" | "module" if node.is_named() => return Err(unsupported("namespace", node)),
        "import_require_clause" => return Err(unsupported("import = require()", node)),
        "as_expression" | "satisfies_expression" => {
            if let Some(expr) = node.named_child(0) {
                collect(expr, edits)?;
                edits.blank(expr.end_byte(), node.end_byte());
            }
            return Ok(());
        }
        "non_null_expression" => {
            if let Some(expr) = node.named_child(0) {
                collect(expr, edits)?;
            }
            if let Some(bang) = token(node, "!") {
                blank_node(bang, edits);
            }
            return Ok(());
        }
        "import_statement" => {
            if token(node, "type").is_some() || token(node, "typeof").is_some() {
                blank_node(node, edits);
                return Ok(());
            }
            if strip_type_specifiers(node, "import_specifier", edits) && !has_value_import(node) {
                blank_node(node, edits);
                return Ok(());
            }
        }
        "export_statement" => {
            if token(node, "type").is_some() {
                blank_node(node, edits);
                return Ok(());
            }
            let type_only_declaration = node
                .child_by_field_name("declaration")
                .is_some_and(|d| TYPE_ONLY_DECLARATIONS.contains(&d.kind()));
            if type_only_declaration {
                blank_node(node, edits);
                return Ok(());
            }
            strip_type_specifiers(node, "export_specifier", edits);
        }
        "required_parameter" | "optional_parameter" => {
            let is_property = children(node).iter().any(|c| {
                matches!(c.kind(), "accessibility_modifier" | "override_modifier")
                    || (!c.is_named() && c.kind() == "readonly")
            });
            if is_property {
                return Err(unsupported("constructor parameter property", node));
            }
            if let Some(mark) = token(node, "?") {
                blank_node(mark, edits);
            }
        }
        "public_field_definition" => {
            if token(node, "declare").is_some() || token(node, "abstract").is_some() {
                blank_node(node, edits);
                return Ok(());
            }
            for mark in ["readonly", "?", "!"] {
                if let Some(t) = token(node, mark) {
                    blank_node(t, edits);
                }
            }
        }
        "method_definition" => {
            if let Some(mark) = token(node, "?") {
                blank_node(mark, edits);
            }
        }
        "abstract_class_declaration" => {
            if let Some(keyword) = token(node, "abstract") {
                blank_node(keyword, edits);
            }
        }
        "variable_declarator" => {
            if let Some(mark) = token(node, "!") {
                blank_node(mark, edits);
            }
        }
        _ => {}
    }

    for child in children(node) {
        collect(child, edits)?;
    }
    Ok(())
}

/// Blank `type`-qualified specifiers (`import { type A, B }`) together with
/// one adjoining comma. Returns true when every specifier was type-only.
fn strip_type_specifiers(node: Node<'_>, specifier_kind: &str, edits: &mut EditList) -> bool {
    let mut specifiers = Vec::new();
    find_descendants(node, specifier_kind, &mut specifiers);
    if specifiers.is_empty() {
        return false;
    }
    let mut stripped = 0;
    for spec in &specifiers {
        if token(*spec, "type").is_none() {
            continue;
        }
        stripped += 1;
        blank_node(*spec, edits);
        let comma = spec
            .next_sibling()
            .filter(|s| s.kind() == ",")
            .or_else(|| spec.prev_sibling().filter(|s| s.kind() == ","));
        if let Some(comma) = comma {
            blank_node(comma, edits);
        }
    }
    stripped == specifiers.len()
}

/// Whether an import binds a default or namespace import next to its braces.
fn has_value_import(import: Node<'_>) -> bool {
    children(import)
        .into_iter()
        .filter(|c| c.kind() == "import_clause")
        .flat_map(children)
        .any(|c| matches!(c.kind(), "identifier" | "namespace_import"))
}

fn find_descendants<'t>(node: Node<'t>, kind: &str, out: &mut Vec<Node<'t>>) {
    for child in children(node) {
        if child.kind() == kind {
            out.push(child);
        } else {
            find_descendants(child, kind, out);
        }
    }
}
