//! Extracts dependency edges, import/export structure and rewrite edits
//! from a token stream.
//!
//! `require(...)` and `import(...)` are recognized at any nesting depth;
//! `import`/`export` statements only at the top level. Every recognized
//! construct yields an [`Edit`] describing the splice the code generator
//! applies once dependency-map slots are known.

use metropack_core::transformer::{
    Dependency, DependencyKind, ExportRecord, ImportRecord, ImportedSymbols, ModuleAnalysis,
};

use crate::lexer::{lex, Span, Token, TokenKind};

/// Default-import and named-import bindings of one `import` statement.
#[derive(Clone, Debug, Default)]
pub struct ImportClause {
    pub default: Option<String>,
    pub namespace: Option<String>,
    /// `(imported, local)` pairs.
    pub named: Vec<(String, String)>,
    pub side_effect_only: bool,
    /// TypeScript `import type` — erased entirely.
    pub type_only: bool,
}

/// A splice the code generator applies to the module body.
#[derive(Clone, Debug)]
pub enum Edit {
    RequireCall {
        span: Span,
        specifier: String,
    },
    DynamicImport {
        span: Span,
        specifier: String,
    },
    ImportStatement {
        span: Span,
        specifier: String,
        clause: ImportClause,
    },
    /// The `export default` keywords ahead of an expression or declaration.
    ExportDefault {
        span: Span,
    },
    /// The `export` keyword ahead of a declaration; exported names are
    /// recorded in the analysis.
    ExportDeclKeyword {
        span: Span,
    },
    ExportNamedLocal {
        span: Span,
        /// `(local, exported)` pairs.
        items: Vec<(String, String)>,
    },
    ExportNamedFrom {
        span: Span,
        specifier: String,
        /// `(source_name, exported)` pairs.
        items: Vec<(String, String)>,
    },
    ExportStarFrom {
        span: Span,
        specifier: String,
    },
    ExportNamespaceFrom {
        span: Span,
        specifier: String,
        name: String,
    },
}

impl Edit {
    pub fn span(&self) -> Span {
        match self {
            Edit::RequireCall { span, .. }
            | Edit::DynamicImport { span, .. }
            | Edit::ImportStatement { span, .. }
            | Edit::ExportDefault { span }
            | Edit::ExportDeclKeyword { span }
            | Edit::ExportNamedLocal { span, .. }
            | Edit::ExportNamedFrom { span, .. }
            | Edit::ExportStarFrom { span, .. }
            | Edit::ExportNamespaceFrom { span, .. } => *span,
        }
    }
}

#[derive(Debug, Default)]
pub struct Analysis {
    pub deps: Vec<Dependency>,
    pub module: ModuleAnalysis,
    pub edits: Vec<Edit>,
    /// `(exported, local_expression)` pairs assigned onto `exports` at the
    /// end of the generated body.
    pub export_tail: Vec<(String, String)>,
}

impl Analysis {
    fn add_dep(&mut self, specifier: &str, kind: DependencyKind) {
        if !self.deps.iter().any(|d| d.specifier == specifier) {
            self.deps.push(Dependency {
                specifier: specifier.to_string(),
                kind,
            });
        }
    }

    /// Whether the module has any ESM export (drives the `__esModule`
    /// marker in generated code).
    pub fn has_esm_exports(&self) -> bool {
        !self.module.exports.is_empty()
    }
}

const DECL_KEYWORDS: &[&str] = &["const", "let", "var", "function", "class", "async"];

const STATEMENT_KEYWORDS: &[&str] = &[
    "var", "let", "const", "function", "class", "if", "else", "for", "while", "do", "switch",
    "case", "break", "continue", "return", "new", "typeof", "instanceof", "void", "delete", "try",
    "catch", "finally", "throw", "async", "await", "yield", "default", "import", "export", "this",
    "super", "extends", "static", "debugger", "in", "of", "use",
];

pub fn analyze(src: &str) -> Analysis {
    let tokens = lex(src);
    let mut out = Analysis::default();
    let mut depth = 0i32;
    let mut at_stmt_start = true;
    let mut i = 0usize;

    while i < tokens.len() {
        let token = &tokens[i];
        match &token.kind {
            TokenKind::Punct(c) => {
                let c = *c;
                match c {
                    '(' | '{' => depth += 1,
                    ')' | '}' => depth -= 1,
                    '[' => {
                        if is_computed_access(src, &tokens, i) {
                            out.module.has_dynamic_access = true;
                        }
                        depth += 1;
                    }
                    ']' => depth -= 1,
                    '.' => {
                        if is_rest_pattern(src, &tokens, i) {
                            out.module.has_dynamic_access = true;
                        }
                    }
                    _ => {}
                }
                at_stmt_start = matches!(c, ';' | '{' | '}');
                i += 1;
            }
            TokenKind::Ident => {
                let name = token.span.text(src);
                match name {
                    "require" if !follows_dot(&tokens, i) => {
                        i = handle_require(src, &tokens, i, &mut out);
                        at_stmt_start = false;
                    }
                    "import" if next_is_punct(&tokens, i, '(') => {
                        i = handle_dynamic_import(&tokens, i, &mut out);
                        at_stmt_start = false;
                    }
                    "import" if depth == 0 && !next_is_punct(&tokens, i, '.') => {
                        i = handle_import_statement(src, &tokens, i, &mut out);
                        at_stmt_start = true;
                    }
                    "export" if depth == 0 => {
                        i = handle_export_statement(src, &tokens, i, &mut out);
                        at_stmt_start = true;
                    }
                    "Object" => {
                        if let Some(method) = member_name(src, &tokens, i) {
                            if matches!(method, "keys" | "values" | "entries") {
                                out.module.has_dynamic_access = true;
                            }
                        }
                        at_stmt_start = false;
                        i += 1;
                    }
                    _ => {
                        if depth == 0 && at_stmt_start {
                            detect_side_effect(&tokens, i, name, &mut out);
                        }
                        at_stmt_start = false;
                        i += 1;
                    }
                }
            }
            _ => {
                at_stmt_start = false;
                i += 1;
            }
        }
    }

    out
}

fn next_is_punct(tokens: &[Token], i: usize, c: char) -> bool {
    tokens.get(i + 1).is_some_and(|t| t.is_punct(c))
}

fn follows_dot(tokens: &[Token], i: usize) -> bool {
    i > 0 && tokens[i - 1].is_punct('.')
}

/// `Object . keys` → `Some("keys")`
fn member_name<'a>(src: &'a str, tokens: &[Token], i: usize) -> Option<&'a str> {
    if !next_is_punct(tokens, i, '.') {
        return None;
    }
    tokens.get(i + 2)?.ident_text(src)
}

/// `obj[expr]` with a non-literal `expr`. Array literals (`= [`, `([`,
/// `, [` …) are not accesses.
fn is_computed_access(src: &str, tokens: &[Token], i: usize) -> bool {
    let Some(prev) = i.checked_sub(1).map(|p| &tokens[p]) else {
        return false;
    };
    let is_access_base = match &prev.kind {
        TokenKind::Ident => !STATEMENT_KEYWORDS.contains(&prev.span.text(src)),
        TokenKind::Punct(c) => matches!(*c, ')' | ']'),
        _ => false,
    };
    if !is_access_base {
        return false;
    }
    // a literal key (`obj["key"]`, `arr[0]`) is still statically analyzable
    match tokens.get(i + 1).map(|t| &t.kind) {
        Some(TokenKind::Str { .. }) | Some(TokenKind::Number) => {
            !tokens.get(i + 2).is_some_and(|t| t.is_punct(']'))
        }
        _ => true,
    }
}

/// `{ a, ...rest }` — three dots, an identifier, then a closing brace.
fn is_rest_pattern(src: &str, tokens: &[Token], i: usize) -> bool {
    let dots = tokens[i..].iter().take(3).filter(|t| t.is_punct('.')).count();
    if dots != 3 {
        return false;
    }
    let Some(ident) = tokens.get(i + 3) else {
        return false;
    };
    ident.ident_text(src).is_some() && tokens.get(i + 4).is_some_and(|t| t.is_punct('}'))
}

fn handle_require(src: &str, tokens: &[Token], i: usize, out: &mut Analysis) -> usize {
    if !next_is_punct(tokens, i, '(') {
        return i + 1;
    }
    match tokens.get(i + 2).map(|t| &t.kind) {
        Some(TokenKind::Str { value }) if tokens.get(i + 3).is_some_and(|t| t.is_punct(')')) => {
            let specifier = value.clone();
            out.add_dep(&specifier, DependencyKind::Require);
            out.edits.push(Edit::RequireCall {
                span: Span {
                    start: tokens[i].span.start,
                    end: tokens[i + 3].span.end,
                },
                specifier: specifier.clone(),
            });
            out.module.imports.push(ImportRecord {
                specifier,
                symbols: require_symbols(src, tokens, i),
            });
            i + 4
        }
        _ => {
            // non-literal or template require: edge target is unknowable
            out.module.has_dynamic_access = true;
            i + 2
        }
    }
}

/// `const {a, b: c} = require("x")` consumes `a` and `b`; everything else
/// observes the whole namespace.
fn require_symbols(src: &str, tokens: &[Token], require_ix: usize) -> ImportedSymbols {
    let Some(eq_ix) = require_ix.checked_sub(1) else {
        return ImportedSymbols::Namespace;
    };
    if !tokens[eq_ix].is_punct('=') || eq_ix == 0 || !tokens[eq_ix - 1].is_punct('}') {
        return ImportedSymbols::Namespace;
    }
    // walk back to the matching `{`, collecting property names
    let mut names = Vec::new();
    let mut j = eq_ix - 1;
    let mut brace_depth = 0i32;
    loop {
        match &tokens[j].kind {
            TokenKind::Punct('}') => brace_depth += 1,
            TokenKind::Punct('{') => {
                brace_depth -= 1;
                if brace_depth == 0 {
                    break;
                }
            }
            TokenKind::Ident => {
                let renamed = j > 0 && tokens[j - 1].is_punct(':');
                if !renamed {
                    names.push(tokens[j].span.text(src).to_string());
                }
            }
            _ => {}
        }
        if j == 0 {
            return ImportedSymbols::Namespace;
        }
        j -= 1;
    }
    names.reverse();
    if names.is_empty() {
        ImportedSymbols::Namespace
    } else {
        ImportedSymbols::Named(names)
    }
}

fn handle_dynamic_import(tokens: &[Token], i: usize, out: &mut Analysis) -> usize {
    match tokens.get(i + 2).map(|t| &t.kind) {
        Some(TokenKind::Str { value }) if tokens.get(i + 3).is_some_and(|t| t.is_punct(')')) => {
            let specifier = value.clone();
            out.add_dep(&specifier, DependencyKind::DynamicImport);
            out.edits.push(Edit::DynamicImport {
                span: Span {
                    start: tokens[i].span.start,
                    end: tokens[i + 3].span.end,
                },
                specifier: specifier.clone(),
            });
            out.module.imports.push(ImportRecord {
                specifier,
                symbols: ImportedSymbols::Namespace,
            });
            i + 4
        }
        _ => {
            out.module.has_dynamic_access = true;
            i + 2
        }
    }
}

/// Consumes a whole top-level `import` statement starting at `i`.
fn handle_import_statement(src: &str, tokens: &[Token], i: usize, out: &mut Analysis) -> usize {
    let start = tokens[i].span.start;
    let mut j = i + 1;
    let mut clause = ImportClause::default();

    // `import "specifier";`
    if let Some(TokenKind::Str { value }) = tokens.get(j).map(|t| &t.kind) {
        clause.side_effect_only = true;
        let specifier = value.clone();
        let end_ix = consume_semicolon(tokens, j);
        finish_import(tokens, end_ix, start, specifier, clause, out);
        return end_ix + 1;
    }

    // `import type {T} from "x"` — type-only, erased. (`import type from
    // "x"` keeps `type` as a default-import name.)
    if tokens.get(j).and_then(|t| t.ident_text(src)) == Some("type")
        && !tokens
            .get(j + 1)
            .is_some_and(|t| t.is_punct(',') || t.ident_text(src) == Some("from"))
    {
        clause.type_only = true;
        j += 1;
    }

    // clause: default, `* as ns`, `{ a, b as c }`, in any comma-joined order
    loop {
        match tokens.get(j).map(|t| &t.kind) {
            Some(TokenKind::Ident) if tokens[j].span.text(src) == "from" => {
                j += 1;
                break;
            }
            Some(TokenKind::Ident) => {
                clause.default = Some(tokens[j].span.text(src).to_string());
                j += 1;
            }
            Some(TokenKind::Punct('*')) => {
                // `* as name`
                if tokens.get(j + 1).and_then(|t| t.ident_text(src)) == Some("as") {
                    if let Some(name) = tokens.get(j + 2).and_then(|t| t.ident_text(src)) {
                        clause.namespace = Some(name.to_string());
                    }
                    j += 3;
                } else {
                    j += 1;
                }
            }
            Some(TokenKind::Punct('{')) => {
                j += 1;
                while j < tokens.len() && !tokens[j].is_punct('}') {
                    if let Some(imported) = tokens[j].ident_text(src) {
                        let mut local = imported;
                        if tokens.get(j + 1).and_then(|t| t.ident_text(src)) == Some("as") {
                            if let Some(l) = tokens.get(j + 2).and_then(|t| t.ident_text(src)) {
                                local = l;
                                j += 2;
                            }
                        }
                        clause.named.push((imported.to_string(), local.to_string()));
                    }
                    j += 1;
                }
                j += 1;
            }
            Some(TokenKind::Punct(',')) => j += 1,
            _ => break,
        }
    }

    let Some(TokenKind::Str { value }) = tokens.get(j).map(|t| &t.kind) else {
        // malformed or unsupported form; leave the statement untouched
        return i + 1;
    };
    let specifier = value.clone();
    let end_ix = consume_semicolon(tokens, j);
    finish_import(tokens, end_ix, start, specifier, clause, out);
    end_ix + 1
}

fn consume_semicolon(tokens: &[Token], str_ix: usize) -> usize {
    if tokens.get(str_ix + 1).is_some_and(|t| t.is_punct(';')) {
        str_ix + 1
    } else {
        str_ix
    }
}

fn finish_import(
    tokens: &[Token],
    end_ix: usize,
    start: usize,
    specifier: String,
    clause: ImportClause,
    out: &mut Analysis,
) {
    let span = Span {
        start,
        end: tokens[end_ix].span.end,
    };
    if !clause.type_only {
        out.add_dep(&specifier, DependencyKind::EsmImport);
        let symbols = if clause.namespace.is_some() {
            ImportedSymbols::Namespace
        } else if clause.default.is_some() || !clause.named.is_empty() {
            let mut names: Vec<String> = clause.named.iter().map(|(i, _)| i.clone()).collect();
            if clause.default.is_some() {
                names.insert(0, "default".to_string());
            }
            ImportedSymbols::Named(names)
        } else {
            ImportedSymbols::SideEffectOnly
        };
        out.module.imports.push(ImportRecord {
            specifier: specifier.clone(),
            symbols,
        });
    }
    out.edits.push(Edit::ImportStatement {
        span,
        specifier,
        clause,
    });
}

/// Consumes the `export` head (and for list/star forms the whole
/// statement); declarations continue to be scanned normally after the
/// stripped keyword.
fn handle_export_statement(src: &str, tokens: &[Token], i: usize, out: &mut Analysis) -> usize {
    let export_span = tokens[i].span;
    let next = tokens.get(i + 1);

    // `export default <expr|decl>`
    if next.and_then(|t| t.ident_text(src)) == Some("default") {
        out.edits.push(Edit::ExportDefault {
            span: Span {
                start: export_span.start,
                end: tokens[i + 1].span.end,
            },
        });
        out.module.exports.push(ExportRecord::Default);
        out.export_tail
            .push(("default".to_string(), "_$$_default".to_string()));
        return i + 2;
    }

    // `export * from "x"` / `export * as ns from "x"`
    if next.is_some_and(|t| t.is_punct('*')) {
        let mut j = i + 2;
        let mut namespace_name: Option<String> = None;
        if tokens.get(j).and_then(|t| t.ident_text(src)) == Some("as") {
            namespace_name = tokens.get(j + 1).and_then(|t| t.ident_text(src)).map(String::from);
            j += 2;
        }
        if tokens.get(j).and_then(|t| t.ident_text(src)) != Some("from") {
            return i + 1;
        }
        let Some(TokenKind::Str { value }) = tokens.get(j + 1).map(|t| &t.kind) else {
            return i + 1;
        };
        let specifier = value.clone();
        let end_ix = consume_semicolon(tokens, j + 1);
        let span = Span {
            start: export_span.start,
            end: tokens[end_ix].span.end,
        };
        out.add_dep(&specifier, DependencyKind::ExportFrom);
        match namespace_name {
            Some(name) => {
                out.module.exports.push(ExportRecord::ReExport {
                    exported: name.clone(),
                    source_name: "*".to_string(),
                    from: specifier.clone(),
                });
                out.edits.push(Edit::ExportNamespaceFrom {
                    span,
                    specifier,
                    name,
                });
            }
            None => {
                out.module.exports.push(ExportRecord::ReExportAll {
                    from: specifier.clone(),
                });
                out.edits.push(Edit::ExportStarFrom { span, specifier });
            }
        }
        return end_ix + 1;
    }

    // `export { a, b as c }` / `export { a } from "x"`
    if next.is_some_and(|t| t.is_punct('{')) {
        let mut items: Vec<(String, String)> = Vec::new();
        let mut j = i + 2;
        while j < tokens.len() && !tokens[j].is_punct('}') {
            if let Some(local) = tokens[j].ident_text(src) {
                let mut exported = local;
                if tokens.get(j + 1).and_then(|t| t.ident_text(src)) == Some("as") {
                    if let Some(e) = tokens.get(j + 2).and_then(|t| t.ident_text(src)) {
                        exported = e;
                        j += 2;
                    }
                }
                items.push((local.to_string(), exported.to_string()));
            }
            j += 1;
        }
        // j is at `}`
        if tokens.get(j + 1).and_then(|t| t.ident_text(src)) == Some("from") {
            let Some(TokenKind::Str { value }) = tokens.get(j + 2).map(|t| &t.kind) else {
                return i + 1;
            };
            let specifier = value.clone();
            let end_ix = consume_semicolon(tokens, j + 2);
            out.add_dep(&specifier, DependencyKind::ExportFrom);
            for (source_name, exported) in &items {
                out.module.exports.push(ExportRecord::ReExport {
                    exported: exported.clone(),
                    source_name: source_name.clone(),
                    from: specifier.clone(),
                });
            }
            out.edits.push(Edit::ExportNamedFrom {
                span: Span {
                    start: export_span.start,
                    end: tokens[end_ix].span.end,
                },
                specifier,
                items,
            });
            return end_ix + 1;
        }
        let end_ix = consume_semicolon(tokens, j);
        for (local, exported) in &items {
            out.module.exports.push(ExportRecord::Named(exported.clone()));
            out.export_tail.push((exported.clone(), local.clone()));
        }
        out.edits.push(Edit::ExportNamedLocal {
            span: Span {
                start: export_span.start,
                end: tokens[end_ix].span.end,
            },
            items,
        });
        return end_ix + 1;
    }

    // `export const x = …` / `export function f() {}` / `export class C {}`
    if let Some(keyword) = next.and_then(|t| t.ident_text(src)) {
        if DECL_KEYWORDS.contains(&keyword) {
            out.edits.push(Edit::ExportDeclKeyword { span: export_span });
            for name in declared_names(src, tokens, i + 1) {
                out.module.exports.push(ExportRecord::Named(name.clone()));
                out.export_tail.push((name.clone(), name));
            }
            return i + 1;
        }
    }

    i + 1
}

/// Names bound by the declaration starting at `decl_ix` (`const`, `let`,
/// `var`, `function`, `class`, possibly prefixed with `async`).
fn declared_names(src: &str, tokens: &[Token], decl_ix: usize) -> Vec<String> {
    let mut names = Vec::new();
    let mut j = decl_ix;
    let mut keyword = tokens[j].span.text(src);
    if keyword == "async" {
        j += 1;
        keyword = match tokens.get(j).and_then(|t| t.ident_text(src)) {
            Some(k) => k,
            None => return names,
        };
    }
    match keyword {
        "function" | "class" => {
            let mut k = j + 1;
            // skip generator star
            if tokens.get(k).is_some_and(|t| t.is_punct('*')) {
                k += 1;
            }
            if let Some(name) = tokens.get(k).and_then(|t| t.ident_text(src)) {
                names.push(name.to_string());
            }
        }
        "const" | "let" | "var" => {
            let mut k = j + 1;
            let mut depth = 0i32;
            let mut in_pattern_or_head = true;
            while k < tokens.len() {
                match &tokens[k].kind {
                    TokenKind::Punct(c) => match *c {
                        '{' | '[' | '(' => depth += 1,
                        '}' | ']' | ')' => depth -= 1,
                        '=' if depth == 0 => in_pattern_or_head = false,
                        ',' if depth == 0 => in_pattern_or_head = true,
                        ';' if depth == 0 => break,
                        _ => {}
                    },
                    TokenKind::Ident if in_pattern_or_head => {
                        let text = tokens[k].span.text(src);
                        let renamed_source = tokens
                            .get(k + 1)
                            .is_some_and(|t| t.is_punct(':'));
                        if STATEMENT_KEYWORDS.contains(&text) && depth == 0 {
                            // ran into the next statement (ASI)
                            break;
                        }
                        if !renamed_source {
                            names.push(text.to_string());
                        }
                    }
                    _ => {}
                }
                if depth < 0 {
                    break;
                }
                k += 1;
            }
        }
        _ => {}
    }
    names
}

fn detect_side_effect(tokens: &[Token], i: usize, name: &str, out: &mut Analysis) {
    if out.module.has_side_effects {
        return;
    }
    match name {
        "console" => out.module.has_side_effects = true,
        "global" | "window" | "globalThis" => {
            if next_is_punct(tokens, i, '.') || next_is_punct(tokens, i, '=') {
                out.module.has_side_effects = true;
            }
        }
        _ => {
            if !STATEMENT_KEYWORDS.contains(&name) && next_is_punct(tokens, i, '(') {
                out.module.has_side_effects = true;
            }
        }
    }
}
