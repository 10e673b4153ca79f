//! Default-export rebinding for platform entry points.

use tree_sitter::Node;

use super::edits::EditList;
use super::{children, position, token, TranspileError};

const NAMED_DECLARATIONS: [&str; 4] = [
    "function_declaration",
    "generator_function_declaration",
    "class_declaration",
    "abstract_class_declaration",
];

/// Rewrite the module's default export into `const <binding> = ...`.
pub(super) fn collect(
    root: Node<'_>,
    src: &str,
    binding: &str,
    edits: &mut EditList,
) -> Result<(), TranspileError> {
    for stmt in children(root) {
        if stmt.kind() != "export_statement" {
            continue;
        }
        if token(stmt, "default").is_some() {
            if rebind_default(stmt, src, binding, edits) {
                return Ok(());
            }
            continue;
        }
        if rebind_clause(stmt, src, binding, edits)? {
            return Ok(());
        }
    }
    Err(TranspileError::MissingDefaultExport)
}

/// `export default <declaration | expression>`.
fn rebind_default(stmt: Node<'_>, src: &str, binding: &str, edits: &mut EditList) -> bool {
    if let Some(decl) = stmt.child_by_field_name("declaration") {
        if !NAMED_DECLARATIONS.contains(&decl.kind()) {
            return false;
        }
        let Some(name) = decl.child_by_field_name("name") else {
            return false;
        };
        edits.blank(stmt.start_byte(), decl.start_byte());
        edits.append_line(format!("const {binding} = {};", &src[name.byte_range()]));
        return true;
    }

    let Some(value) = stmt.child_by_field_name("value") else {
        return false;
    };
    edits.replace(stmt.start_byte(), value.start_byte(), format!("const {binding} = "));
    let terminated = token(stmt, ";").is_some_and(|t| t.end_byte() > t.start_byte());
    if !terminated {
        edits.insert(value.end_byte(), ";");
    }
    true
}

/// `export { handler as default }`.
fn rebind_clause(
    stmt: Node<'_>,
    src: &str,
    binding: &str,
    edits: &mut EditList,
) -> Result<bool, TranspileError> {
    let Some(clause) = children(stmt).into_iter().find(|c| c.kind() == "export_clause") else {
        return Ok(false);
    };
    let aliased_default = children(clause).into_iter().find(|spec| {
        spec.kind() == "export_specifier"
            && spec
                .child_by_field_name("alias")
                .or_else(|| spec.child_by_field_name("name"))
                .is_some_and(|exported| &src[exported.byte_range()] == "default")
    });
    let Some(spec) = aliased_default else {
        return Ok(false);
    };
    if stmt.child_by_field_name("source").is_some() {
        let (line, _) = position(stmt);
        return Err(TranspileError::ReexportedDefault { line });
    }
    let Some(name) = spec.child_by_field_name("name") else {
        return Ok(false);
    };

    edits.blank(spec.start_byte(), spec.end_byte());
    let comma = spec
        .next_sibling()
        .filter(|s| s.kind() == ",")
        .or_else(|| spec.prev_sibling().filter(|s| s.kind() == ","));
    if let Some(comma) = comma {
        edits.blank(comma.start_byte(), comma.end_byte());
    }
    edits.append_line(format!("const {binding} = {};", &src[name.byte_range()]));
    Ok(true)
}
