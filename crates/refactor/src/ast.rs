//! Dependency analyzer (C7): walks a JS/TS source tree, parses each file
//! with the matching `tree-sitter` grammar, and extracts its exports and
//! imports into a [`DependencyContext`].
//!
//! File discovery and per-file parsing fan out via `rayon` (pure I/O, no
//! shared mutable state); results are merged back in sorted-by-path order
//! so the merged context is deterministic regardless of completion order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use tree_sitter::{Node, Parser};

use refactor_types::{
    DependencyContext, ExportType, ExportedSymbol, FileAnalysis, ImportType, ImportedSymbol,
};

use crate::graph::normalize_path;

const SKIPPED_DIRS: &[&str] = &["node_modules", "dist", "build", ".git", "target", ".next", "out"];
const ALIAS_PREFIX: &str = "@/";
const ALIAS_TARGET: &str = "src/";

/// Walk `root` for JS/TS files and build a [`DependencyContext`] describing
/// every file's exports, imports, and the resolved import graph.
pub fn analyze_directory(root: &Path) -> DependencyContext {
    let files = discover_source_files(root);

    let analyses: Vec<FileAnalysis> = files
        .par_iter()
        .map(|path| analyze_file(root, path))
        .collect();

    merge_context(root, analyses)
}

fn discover_source_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    walk(root, &mut out);
    out.sort();
    out
}

fn walk(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = std::fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if SKIPPED_DIRS.contains(&name) {
                continue;
            }
            walk(&path, out);
        } else if is_supported_extension(&path) {
            out.push(path);
        }
    }
}

fn is_supported_extension(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("js") | Some("jsx") | Some("mjs") | Some("cjs") | Some("ts") | Some("tsx")
    )
}

fn grammar_for(path: &Path) -> tree_sitter::Language {
    match path.extension().and_then(|e| e.to_str()) {
        Some("ts") => tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        Some("tsx") => tree_sitter_typescript::LANGUAGE_TSX.into(),
        _ => tree_sitter_javascript::LANGUAGE.into(),
    }
}

fn analyze_file(root: &Path, path: &Path) -> FileAnalysis {
    let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
    let relative = normalize_path(&relative);

    let source = match std::fs::read_to_string(path) {
        Ok(s) => s,
        Err(e) => {
            return FileAnalysis {
                file_path: relative,
                parse_error: Some(format!("failed to read file: {e}")),
                ..Default::default()
            };
        }
    };

    let mut parser = Parser::new();
    if parser.set_language(&grammar_for(path)).is_err() {
        return FileAnalysis {
            file_path: relative,
            parse_error: Some("failed to load tree-sitter grammar".to_string()),
            ..Default::default()
        };
    }

    let Some(tree) = parser.parse(&source, None) else {
        return FileAnalysis {
            file_path: relative,
            parse_error: Some("tree-sitter failed to produce a parse tree".to_string()),
            ..Default::default()
        };
    };

    let root_node = tree.root_node();
    let bytes = source.as_bytes();

    let mut exports = Vec::new();
    let mut imports = Vec::new();

    let mut cursor = root_node.walk();
    for child in root_node.children(&mut cursor) {
        match child.kind() {
            "import_statement" => {
                if let Some(mut parsed) = parse_import_statement(&child, bytes, &relative, root) {
                    imports.append(&mut parsed);
                }
            }
            "export_statement" => {
                if let Some(mut parsed) = parse_export_statement(&child, bytes, &relative) {
                    exports.append(&mut parsed);
                }
            }
            "expression_statement" | "lexical_declaration" | "variable_declaration" => {
                if let Some(parsed) = parse_require_call(&child, bytes, &relative, root) {
                    imports.push(parsed);
                }
            }
            _ => {}
        }
    }

    FileAnalysis {
        file_path: relative,
        exports,
        imports,
        parse_error: None,
    }
}

fn node_text<'a>(node: &Node, source: &'a [u8]) -> &'a str {
    node.utf8_text(source).unwrap_or_default()
}

fn strip_quotes(s: &str) -> &str {
    s.trim_matches(|c| c == '\'' || c == '"' || c == '`')
}

fn parse_import_statement(
    node: &Node,
    source: &[u8],
    importing_file: &Path,
    project_root: &Path,
) -> Option<Vec<ImportedSymbol>> {
    let line = node.start_position().row as u32 + 1;
    let source_node = node.child_by_field_name("source")?;
    let specifier = strip_quotes(node_text(&source_node, source)).to_string();
    let resolved_path = resolve_specifier(&specifier, importing_file, project_root);

    let mut out = Vec::new();
    let mut has_clause = false;

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        match child.kind() {
            "import_clause" => {
                has_clause = true;
                let mut clause_cursor = child.walk();
                for clause_child in child.children(&mut clause_cursor) {
                    match clause_child.kind() {
                        "identifier" => {
                            out.push(ImportedSymbol {
                                name: node_text(&clause_child, source).to_string(),
                                import_type: ImportType::Default,
                                source_specifier: specifier.clone(),
                                resolved_path: resolved_path.clone(),
                                line,
                                importing_file: importing_file.to_path_buf(),
                            });
                        }
                        "namespace_import" => {
                            let name = node_text(&clause_child, source)
                                .rsplit_once("as")
                                .map(|(_, n)| n.trim())
                                .unwrap_or_else(|| node_text(&clause_child, source))
                                .to_string();
                            out.push(ImportedSymbol {
                                name,
                                import_type: ImportType::Namespace,
                                source_specifier: specifier.clone(),
                                resolved_path: resolved_path.clone(),
                                line,
                                importing_file: importing_file.to_path_buf(),
                            });
                        }
                        "named_imports" => {
                            let mut named_cursor = clause_child.walk();
                            for spec in clause_child.children(&mut named_cursor) {
                                if spec.kind() != "import_specifier" {
                                    continue;
                                }
                                let text = node_text(&spec, source);
                                let name = text
                                    .split("as")
                                    .next()
                                    .unwrap_or(text)
                                    .trim()
                                    .to_string();
                                let is_type = text.trim_start().starts_with("type ");
                                out.push(ImportedSymbol {
                                    name,
                                    import_type: if is_type {
                                        ImportType::TypeOnly
                                    } else {
                                        ImportType::Named
                                    },
                                    source_specifier: specifier.clone(),
                                    resolved_path: resolved_path.clone(),
                                    line,
                                    importing_file: importing_file.to_path_buf(),
                                });
                            }
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    if !has_clause {
        // Side-effect import: `import "./styles.css"`.
        out.push(ImportedSymbol {
            name: specifier.clone(),
            import_type: ImportType::SideEffect,
            source_specifier: specifier,
            resolved_path,
            line,
            importing_file: importing_file.to_path_buf(),
        });
    }

    Some(out)
}

fn parse_export_statement(node: &Node, source: &[u8], file_path: &Path) -> Option<Vec<ExportedSymbol>> {
    let line = node.start_position().row as u32 + 1;
    let text = node_text(node, source);
    let mut out = Vec::new();

    if text.trim_start().starts_with("export default") {
        out.push(ExportedSymbol {
            name: "default".to_string(),
            export_type: ExportType::Default,
            line,
            source_file: file_path.to_path_buf(),
        });
        return Some(out);
    }

    if let Some(declaration) = node.child_by_field_name("declaration") {
        let names = declared_names(&declaration, source);
        let is_type = text.trim_start().starts_with("export type");
        for name in names {
            out.push(ExportedSymbol {
                name,
                export_type: if is_type { ExportType::TypeOnly } else { ExportType::Declaration },
                line,
                source_file: file_path.to_path_buf(),
            });
        }
        return Some(out);
    }

    // `export { x, y as z }` or `export { x } from '...'` or `export * from '...'`.
    let has_source = node.child_by_field_name("source").is_some();
    if text.contains('*') && has_source {
        out.push(ExportedSymbol {
            name: "*".to_string(),
            export_type: ExportType::ReExport,
            line,
            source_file: file_path.to_path_buf(),
        });
        return Some(out);
    }

    let mut cursor = node.walk();
    for child in node.children(&mut cursor) {
        if child.kind() != "export_clause" {
            continue;
        }
        let mut clause_cursor = child.walk();
        for spec in child.children(&mut clause_cursor) {
            if spec.kind() != "export_specifier" {
                continue;
            }
            let spec_text = node_text(&spec, source);
            let exported_name = spec_text
                .split("as")
                .last()
                .unwrap_or(spec_text)
                .trim()
                .to_string();
            out.push(ExportedSymbol {
                name: exported_name,
                export_type: if has_source { ExportType::ReExport } else { ExportType::Named },
                line,
                source_file: file_path.to_path_buf(),
            });
        }
    }

    if out.is_empty() { None } else { Some(out) }
}

/// Expand a declaration node to the identifier names it introduces,
/// including destructuring patterns (`export const { a, b } = obj`).
fn declared_names(node: &Node, source: &[u8]) -> Vec<String> {
    let mut names = Vec::new();
    collect_identifiers(node, source, &mut names);
    names
}

fn collect_identifiers(node: &Node, source: &[u8], out: &mut Vec<String>) {
    match node.kind() {
        "function_declaration" | "class_declaration" | "generator_function_declaration" => {
            if let Some(name) = node.child_by_field_name("name") {
                out.push(node_text(&name, source).to_string());
            }
        }
        "variable_declarator" => {
            if let Some(name_node) = node.child_by_field_name("name") {
                match name_node.kind() {
                    "object_pattern" | "array_pattern" => {
                        let mut cursor = name_node.walk();
                        for child in name_node.children(&mut cursor) {
                            if child.kind() == "identifier" || child.kind() == "shorthand_property_identifier_pattern" {
                                out.push(node_text(&child, source).to_string());
                            }
                        }
                    }
                    _ => out.push(node_text(&name_node, source).to_string()),
                }
            }
        }
        "lexical_declaration" | "variable_declaration" => {
            let mut cursor = node.walk();
            for child in node.children(&mut cursor) {
                if child.kind() == "variable_declarator" {
                    collect_identifiers(&child, source, out);
                }
            }
        }
        _ => {}
    }
}

/// Recognize `const x = require('./y')` / bare `require('./y')` as a
/// namespace import, the CommonJS equivalent of `import * as x`.
fn parse_require_call(
    node: &Node,
    source: &[u8],
    importing_file: &Path,
    project_root: &Path,
) -> Option<ImportedSymbol> {
    let text = node_text(node, source);
    if !text.contains("require(") {
        return None;
    }
    let start = text.find("require(")? + "require(".len();
    let rest = &text[start..];
    let end = rest.find(')')?;
    let specifier = strip_quotes(rest[..end].trim()).to_string();
    if specifier.is_empty() {
        return None;
    }

    let line = node.start_position().row as u32 + 1;
    let resolved_path = resolve_specifier(&specifier, importing_file, project_root);
    let name = text
        .split('=')
        .next()
        .unwrap_or(&specifier)
        .trim()
        .trim_start_matches("const")
        .trim_start_matches("let")
        .trim_start_matches("var")
        .trim()
        .to_string();

    Some(ImportedSymbol {
        name: if name.is_empty() { specifier.clone() } else { name },
        import_type: ImportType::Require,
        source_specifier: specifier,
        resolved_path,
        line,
        importing_file: importing_file.to_path_buf(),
    })
}

const CANDIDATE_EXTENSIONS: &[&str] = &["ts", "tsx", "js", "jsx", "mjs", "cjs"];

/// Resolve a relative specifier or the `@/` alias to an on-disk path under
/// `project_root`. External packages (bare specifiers) resolve to `None`.
fn resolve_specifier(specifier: &str, importing_file: &Path, project_root: &Path) -> Option<PathBuf> {
    let candidate_base = if let Some(stripped) = specifier.strip_prefix(ALIAS_PREFIX) {
        project_root.join(ALIAS_TARGET).join(stripped)
    } else if specifier.starts_with('.') {
        let dir = importing_file.parent().unwrap_or(Path::new(""));
        project_root.join(dir).join(specifier)
    } else {
        return None;
    };

    if candidate_base.extension().is_some() {
        if project_root.join(&candidate_base).exists() || candidate_base.exists() {
            return Some(normalize_path(
                candidate_base.strip_prefix(project_root).unwrap_or(&candidate_base),
            ));
        }
    }

    for ext in CANDIDATE_EXTENSIONS {
        let with_ext = append_extension(&candidate_base, ext);
        if project_root.join(&with_ext).exists() {
            return Some(normalize_path(&with_ext));
        }
        let index = candidate_base.join(format!("index.{ext}"));
        if project_root.join(&index).exists() {
            return Some(normalize_path(&index));
        }
    }

    None
}

fn append_extension(path: &Path, ext: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".");
    os.push(ext);
    PathBuf::from(os)
}

fn merge_context(root: &Path, analyses: Vec<FileAnalysis>) -> DependencyContext {
    let mut files: BTreeMap<PathBuf, FileAnalysis> = BTreeMap::new();
    let mut dependency_graph: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    let mut reverse_dependencies: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    let mut total_exports = 0;
    let mut total_imports = 0;
    let mut parse_error_count = 0;

    for analysis in analyses {
        total_exports += analysis.exports.len();
        total_imports += analysis.imports.len();
        if analysis.parse_error.is_some() {
            parse_error_count += 1;
        }

        let mut resolved_targets: Vec<PathBuf> = Vec::new();
        for import in &analysis.imports {
            if let Some(target) = &import.resolved_path {
                resolved_targets.push(target.clone());
                reverse_dependencies
                    .entry(target.clone())
                    .or_default()
                    .push(analysis.file_path.clone());
            }
        }
        resolved_targets.sort();
        resolved_targets.dedup();
        dependency_graph.insert(analysis.file_path.clone(), resolved_targets);

        files.insert(analysis.file_path.clone(), analysis);
    }

    for deps in reverse_dependencies.values_mut() {
        deps.sort();
        deps.dedup();
    }

    let total_files = files.len();

    DependencyContext {
        root_dir: root.to_path_buf(),
        files,
        dependency_graph,
        reverse_dependencies,
        total_files,
        total_exports,
        total_imports,
        parse_error_count,
    }
}
