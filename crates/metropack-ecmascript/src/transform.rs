//! The in-tree transformer: platform/`__DEV__`/`NODE_ENV` inlining plus the
//! module-system lowering applied at code generation time.
//!
//! This is deliberately not a compiler. JSX, syntax lowering and
//! minification belong to an external `Transformer` implementation; this
//! one covers what the bundler itself needs to produce runnable output from
//! already-valid JavaScript.

use std::sync::Arc;

use anyhow::{bail, Result};
use async_trait::async_trait;
use metropack_core::{
    config::Platform,
    source_map::{identity_mappings, SourceMapJson},
    transformer::{
        CodegenContext, Dependency, GeneratedModule, ModuleAnalysis, ModuleAst, TransformRequest,
        Transformer,
    },
};

use crate::{
    analyze::{analyze, Edit, ImportClause},
    lexer::{lex, Token},
};

pub struct DefaultTransformer;

#[async_trait]
impl Transformer for DefaultTransformer {
    async fn transform(&self, request: TransformRequest<'_>) -> Result<Arc<dyn ModuleAst>> {
        let code = inline_constants(request.source, request.platform, request.dev);
        let analysis = analyze(&code);
        Ok(Arc::new(EcmascriptAst {
            file_path: request.file_path.to_string_lossy().into_owned(),
            source: request.source.to_string(),
            code,
            deps: analysis.deps,
            analysis: analysis.module,
            edits: analysis.edits,
            export_tail: analysis.export_tail,
        }))
    }
}

/// Replace `__DEV__`, read positions of `process.env.NODE_ENV` and
/// `Platform.OS` with their compile-time values. Replacements never span or
/// introduce line breaks, so line-identity source maps stay exact.
fn inline_constants(source: &str, platform: Platform, dev: bool) -> String {
    let tokens = lex(source);
    // (span, replacement), collected in source order
    let mut splices: Vec<(usize, usize, String)> = Vec::new();

    let mut i = 0usize;
    while i < tokens.len() {
        let Some(name) = tokens[i].ident_text(source) else {
            i += 1;
            continue;
        };
        match name {
            "__DEV__" if !is_member_or_assigned(source, &tokens, i) => {
                splices.push((
                    tokens[i].span.start,
                    tokens[i].span.end,
                    if dev { "true" } else { "false" }.to_string(),
                ));
                i += 1;
            }
            "process"
                if member_chain(source, &tokens, i, &["env", "NODE_ENV"])
                    && !assigned_after(&tokens, i + 4) =>
            {
                let env = if dev { "development" } else { "production" };
                splices.push((
                    tokens[i].span.start,
                    tokens[i + 4].span.end,
                    format!("\"{env}\""),
                ));
                i += 5;
            }
            "Platform"
                if member_chain(source, &tokens, i, &["OS"])
                    && !assigned_after(&tokens, i + 2)
                    && !is_member_or_assigned(source, &tokens, i) =>
            {
                splices.push((
                    tokens[i].span.start,
                    tokens[i + 2].span.end,
                    format!("\"{}\"", platform.as_str()),
                ));
                i += 3;
            }
            _ => i += 1,
        }
    }

    apply_splices(source, splices)
}

/// `foo.__DEV__` reads a property; `__DEV__ = x` writes one. Neither is
/// inlined.
fn is_member_or_assigned(_src: &str, tokens: &[Token], i: usize) -> bool {
    if i > 0 && tokens[i - 1].is_punct('.') {
        return true;
    }
    assigned_after(tokens, i)
}

/// `… = value` (but not `==`/`===`) directly after token `i`.
fn assigned_after(tokens: &[Token], i: usize) -> bool {
    tokens.get(i + 1).is_some_and(|t| t.is_punct('='))
        && !tokens.get(i + 2).is_some_and(|t| t.is_punct('='))
}

/// Whether tokens at `i` form `ident(.segment)*` matching `segments`.
fn member_chain(src: &str, tokens: &[Token], i: usize, segments: &[&str]) -> bool {
    let mut j = i + 1;
    for segment in segments {
        if !tokens.get(j).is_some_and(|t| t.is_punct('.')) {
            return false;
        }
        if tokens.get(j + 1).and_then(|t| t.ident_text(src)) != Some(*segment) {
            return false;
        }
        j += 2;
    }
    true
}

fn apply_splices(source: &str, splices: Vec<(usize, usize, String)>) -> String {
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0usize;
    for (start, end, replacement) in splices {
        out.push_str(&source[cursor..start]);
        out.push_str(&replacement);
        cursor = end;
    }
    out.push_str(&source[cursor..]);
    out
}

/// The AST handle produced by [`DefaultTransformer`]: the transformed
/// source plus the splice list that lowers the module system once
/// dependency-map slots are known.
#[derive(Debug)]
pub struct EcmascriptAst {
    file_path: String,
    source: String,
    code: String,
    deps: Vec<Dependency>,
    analysis: ModuleAnalysis,
    edits: Vec<Edit>,
    export_tail: Vec<(String, String)>,
}

impl ModuleAst for EcmascriptAst {
    fn transformed_code(&self) -> &str {
        &self.code
    }

    fn dependencies(&self) -> &[Dependency] {
        &self.deps
    }

    fn analysis(&self) -> &ModuleAnalysis {
        &self.analysis
    }

    fn generate(&self, ctx: &CodegenContext<'_>) -> Result<GeneratedModule> {
        let mut edits = self.edits.clone();
        edits.sort_by_key(|e| e.span().start);

        let mut body = String::with_capacity(self.code.len());
        let mut cursor = 0usize;
        let mut tail: Vec<String> = Vec::new();

        for edit in &edits {
            let span = edit.span();
            if span.start < cursor {
                bail!(
                    "overlapping rewrite spans in {} (at byte {})",
                    self.file_path,
                    span.start
                );
            }
            body.push_str(&self.code[cursor..span.start]);
            let original = &self.code[span.start..span.end];
            let mut replacement = self.replacement_for(edit, ctx, &mut tail);
            // keep the line structure identical so the identity map holds
            let missing_newlines =
                count_newlines(original).saturating_sub(count_newlines(&replacement));
            for _ in 0..missing_newlines {
                replacement.push('\n');
            }
            body.push_str(&replacement);
            cursor = span.end;
        }
        body.push_str(&self.code[cursor..]);

        // local `exports.x = y;` assignments, elided when usage is known
        for (exported, local) in &self.export_tail {
            if self.keep_export(ctx, exported) {
                tail.push(format!("exports.{exported} = {local};"));
            }
        }

        let esm_marker = !self.analysis.exports.is_empty();
        let mut code = String::with_capacity(body.len() + 64);
        if esm_marker {
            code.push_str("Object.defineProperty(exports, \"__esModule\", { value: true });\n");
        }
        code.push_str(&body);
        for line in &tail {
            if !code.ends_with('\n') {
                code.push('\n');
            }
            code.push_str(line);
        }

        let body_lines = self.code.lines().count().max(1);
        let prefix_lines = if esm_marker { 1 } else { 0 };
        let mappings = format!(
            "{}{}",
            ";".repeat(prefix_lines),
            identity_mappings(body_lines)
        );
        let map = SourceMapJson {
            version: 3,
            sources: vec![self.file_path.clone()],
            sources_content: Some(vec![Some(self.source.clone())]),
            names: Vec::new(),
            mappings,
            x_google_ignore_list: None,
        };

        Ok(GeneratedModule {
            code,
            map: Some(map),
        })
    }
}

impl EcmascriptAst {
    fn keep_export(&self, ctx: &CodegenContext<'_>, name: &str) -> bool {
        match ctx.used_exports {
            None => true,
            Some(usage) => usage.uses(name),
        }
    }

    fn replacement_for(
        &self,
        edit: &Edit,
        ctx: &CodegenContext<'_>,
        tail: &mut Vec<String>,
    ) -> String {
        match edit {
            Edit::RequireCall { specifier, .. } => match ctx.slot(specifier) {
                Some(slot) => format!("_$$_REQUIRE(dependencyMap[{slot}])"),
                None => unresolved_expr(specifier),
            },
            Edit::DynamicImport { specifier, .. } => match ctx.slot(specifier) {
                Some(slot) => format!(
                    "Promise.resolve().then(function () {{ return \
                     _$$_IMPORT_ALL(dependencyMap[{slot}]); }})"
                ),
                None => format!("Promise.reject(new Error({}))", not_found_message(specifier)),
            },
            Edit::ImportStatement {
                specifier, clause, ..
            } => self.import_replacement(specifier, clause, ctx),
            Edit::ExportDefault { .. } => "var _$$_default =".to_string(),
            Edit::ExportDeclKeyword { .. } => String::new(),
            Edit::ExportNamedLocal { .. } => String::new(),
            Edit::ExportNamedFrom {
                specifier, items, ..
            } => {
                if let Some(slot) = ctx.slot(specifier) {
                    for (source_name, exported) in items {
                        if !self.keep_export(ctx, exported) {
                            continue;
                        }
                        let value = if source_name == "default" {
                            format!("_$$_IMPORT_DEFAULT(dependencyMap[{slot}])")
                        } else {
                            format!("_$$_REQUIRE(dependencyMap[{slot}]).{source_name}")
                        };
                        tail.push(format!("exports.{exported} = {value};"));
                    }
                }
                String::new()
            }
            Edit::ExportStarFrom { specifier, .. } => {
                if let Some(slot) = ctx.slot(specifier) {
                    tail.push(format!(
                        "var _$$_star_{slot} = _$$_REQUIRE(dependencyMap[{slot}]); for (var \
                         _$$_key in _$$_star_{slot}) {{ if (_$$_key !== \"default\" && \
                         !Object.prototype.hasOwnProperty.call(exports, _$$_key)) \
                         exports[_$$_key] = _$$_star_{slot}[_$$_key]; }}"
                    ));
                }
                String::new()
            }
            Edit::ExportNamespaceFrom {
                specifier, name, ..
            } => {
                if let Some(slot) = ctx.slot(specifier) {
                    if self.keep_export(ctx, name) {
                        tail.push(format!(
                            "exports.{name} = _$$_IMPORT_ALL(dependencyMap[{slot}]);"
                        ));
                    }
                }
                String::new()
            }
        }
    }

    fn import_replacement(
        &self,
        specifier: &str,
        clause: &ImportClause,
        ctx: &CodegenContext<'_>,
    ) -> String {
        if clause.type_only {
            return String::new();
        }
        let Some(slot) = ctx.slot(specifier) else {
            return format!("{};", unresolved_expr(specifier));
        };
        if clause.side_effect_only {
            return format!("_$$_REQUIRE(dependencyMap[{slot}]);");
        }
        let mut bindings: Vec<String> = Vec::new();
        if let Some(default) = &clause.default {
            bindings.push(format!(
                "{default} = _$$_IMPORT_DEFAULT(dependencyMap[{slot}])"
            ));
        }
        if let Some(namespace) = &clause.namespace {
            bindings.push(format!(
                "{namespace} = _$$_IMPORT_ALL(dependencyMap[{slot}])"
            ));
        }
        for (imported, local) in &clause.named {
            bindings.push(format!(
                "{local} = _$$_REQUIRE(dependencyMap[{slot}]).{imported}"
            ));
        }
        format!("var {};", bindings.join(", "))
    }
}

/// Dev builds drop unresolvable edges; executing one is a runtime error.
fn unresolved_expr(specifier: &str) -> String {
    format!(
        "(function () {{ throw new Error({}); }})()",
        not_found_message(specifier)
    )
}

fn not_found_message(specifier: &str) -> String {
    serde_json::to_string(&format!("Module not found: {specifier}"))
        .expect("string serialization is infallible")
}

fn count_newlines(s: &str) -> usize {
    s.bytes().filter(|&b| b == b'\n').count()
}

#[cfg(test)]
mod tests {
    use indoc::indoc;
    use metropack_core::transformer::ExportUsage;
    use rustc_hash::FxHashMap;

    use super::*;

    async fn ast_for(source: &str, dev: bool) -> Arc<dyn ModuleAst> {
        DefaultTransformer
            .transform(TransformRequest {
                source,
                file_path: std::path::Path::new("/proj/mod.js"),
                platform: Platform::Ios,
                dev,
                entry_path: std::path::Path::new("/proj/index.js"),
            })
            .await
            .unwrap()
    }

    fn generate(ast: &dyn ModuleAst, slots: &[(&str, usize)]) -> GeneratedModule {
        let dep_index: FxHashMap<&str, usize> = slots.iter().copied().collect();
        ast.generate(&CodegenContext {
            dep_index: &dep_index,
            used_exports: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn dev_constants_are_inlined() {
        let ast = ast_for("if (__DEV__) { setup(process.env.NODE_ENV); }", true).await;
        assert_eq!(
            ast.transformed_code(),
            "if (true) { setup(\"development\"); }"
        );
        let ast = ast_for("if (__DEV__) { setup(process.env.NODE_ENV); }", false).await;
        assert_eq!(
            ast.transformed_code(),
            "if (false) { setup(\"production\"); }"
        );
    }

    #[tokio::test]
    async fn platform_constant_is_inlined_on_reads_only() {
        let ast = ast_for("var os = Platform.OS; Platform.OS = 'x';", true).await;
        assert_eq!(
            ast.transformed_code(),
            "var os = \"ios\"; Platform.OS = 'x';"
        );
    }

    #[tokio::test]
    async fn require_is_rewritten_to_the_dependency_map() {
        let ast = ast_for(r#"var a = require("./a");"#, true).await;
        let generated = generate(ast.as_ref(), &[("./a", 0)]);
        assert_eq!(generated.code, "var a = _$$_REQUIRE(dependencyMap[0]);");
    }

    #[tokio::test]
    async fn esm_imports_lower_to_cjs() {
        let ast = ast_for(
            indoc! {r#"
                import def, { named } from "./a";
                import * as ns from "./b";
                import "./c";
            "#},
            true,
        )
        .await;
        let generated = generate(ast.as_ref(), &[("./a", 0), ("./b", 1), ("./c", 2)]);
        assert_eq!(
            generated.code,
            indoc! {r#"
                var def = _$$_IMPORT_DEFAULT(dependencyMap[0]), named = _$$_REQUIRE(dependencyMap[0]).named;
                var ns = _$$_IMPORT_ALL(dependencyMap[1]);
                _$$_REQUIRE(dependencyMap[2]);
            "#}
        );
    }

    #[tokio::test]
    async fn exports_produce_marker_and_tail() {
        let ast = ast_for(
            indoc! {r#"
                export const one = 1;
                export default one;
            "#},
            true,
        )
        .await;
        let generated = generate(ast.as_ref(), &[]);
        let expected = indoc! {r#"
            Object.defineProperty(exports, "__esModule", { value: true });
             const one = 1;
            var _$$_default = one;
            exports.one = one;
            exports.default = _$$_default;"#};
        assert_eq!(generated.code, expected);
    }

    #[tokio::test]
    async fn unused_exports_are_elided_when_usage_is_known() {
        let ast = ast_for("export const used = 1;\nexport const unused = 2;\n", true).await;
        let dep_index: FxHashMap<&str, usize> = FxHashMap::default();
        let mut usage = ExportUsage::default();
        usage.add_named("used");
        let generated = ast
            .generate(&CodegenContext {
                dep_index: &dep_index,
                used_exports: Some(&usage),
            })
            .unwrap();
        assert!(generated.code.contains("exports.used = used;"));
        assert!(!generated.code.contains("exports.unused"));
    }

    #[tokio::test]
    async fn reexports_thread_through_the_dependency_map() {
        let ast = ast_for(
            "export { a, b as c } from \"./re\";\nexport * from \"./star\";\n",
            true,
        )
        .await;
        let generated = generate(ast.as_ref(), &[("./re", 0), ("./star", 1)]);
        assert!(generated
            .code
            .contains("exports.a = _$$_REQUIRE(dependencyMap[0]).a;"));
        assert!(generated
            .code
            .contains("exports.c = _$$_REQUIRE(dependencyMap[0]).b;"));
        assert!(generated.code.contains("_$$_star_1"));
    }

    #[tokio::test]
    async fn line_structure_survives_rewriting() {
        let source = indoc! {r#"
            import a from "./a";
            const x = 1;
            require("./b");
        "#};
        let ast = ast_for(source, true).await;
        let generated = generate(ast.as_ref(), &[("./a", 0), ("./b", 1)]);
        // the body (after the prefix line) has exactly as many lines as the
        // transformed source
        let map = generated.map.unwrap();
        assert!(map.mappings.starts_with(';') || !generated.code.starts_with("Object."));
        assert_eq!(map.sources, vec!["/proj/mod.js".to_string()]);
        assert_eq!(
            map.sources_content,
            Some(vec![Some(source.to_string())])
        );
    }

    #[tokio::test]
    async fn unresolved_edges_throw_at_runtime() {
        let ast = ast_for(r#"require("./gone");"#, true).await;
        let generated = generate(ast.as_ref(), &[]);
        assert!(generated.code.contains("throw new Error"));
        assert!(generated.code.contains("Module not found: ./gone"));
    }
}
