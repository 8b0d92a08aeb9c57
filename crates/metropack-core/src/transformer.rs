//! Capability traits the core consumes but does not implement: source
//! transformation, dependency/export analysis (behind an opaque AST handle)
//! and image probing for asset metadata.

use std::{collections::BTreeSet, fmt, path::Path, sync::Arc};

use anyhow::Result;
use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::{config::Platform, source_map::SourceMapJson};

/// Everything a transformer gets to see for one file.
pub struct TransformRequest<'a> {
    pub source: &'a str,
    pub file_path: &'a Path,
    pub platform: Platform,
    pub dev: bool,
    pub entry_path: &'a Path,
}

/// The external parse/transform pipeline. Implementations are expected to
/// honor `platform` and `dev` (inlining the corresponding constants) and may
/// introduce new dependency edges; the core extracts edges strictly from the
/// returned handle.
#[async_trait]
pub trait Transformer: Send + Sync {
    async fn transform(&self, request: TransformRequest<'_>) -> Result<Arc<dyn ModuleAst>>;
}

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

/// Probes image files for their intrinsic dimensions. Unknown formats
/// report `(0, 0)`.
pub trait ImageProber: Send + Sync {
    fn probe(&self, path: &Path) -> ImageDimensions;
}

/// Prober that knows nothing. Used in tests and when probing is disabled.
pub struct NullImageProber;

impl ImageProber for NullImageProber {
    fn probe(&self, _path: &Path) -> ImageDimensions {
        ImageDimensions::default()
    }
}

/// How a dependency edge was written in the source.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DependencyKind {
    /// `require("...")`
    Require,
    /// `import ... from "..."` / bare `import "..."`
    EsmImport,
    /// `import("...")` — an edge like any other, treated as a namespace
    /// import by the tree shaker.
    DynamicImport,
    /// `export ... from "..."`
    ExportFrom,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Dependency {
    pub specifier: String,
    pub kind: DependencyKind,
}

/// Which names one outgoing edge consumes from its target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ImportedSymbols {
    /// A known set of names; the default import is the name `"default"`.
    Named(Vec<String>),
    /// `import * as ns`, un-destructured `require()`, dynamic import — the
    /// full surface is live.
    Namespace,
    /// `import "x"` — evaluation only.
    SideEffectOnly,
}

#[derive(Clone, Debug)]
pub struct ImportRecord {
    pub specifier: String,
    pub symbols: ImportedSymbols,
}

/// One entry of a module's export surface.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExportRecord {
    /// `export const x = ...`, `export {x}`, `export function f() {}`
    Named(String),
    /// `export default ...`
    Default,
    /// `export {source_name as exported} from "from"` — forwards without a
    /// local binding.
    ReExport {
        exported: String,
        source_name: String,
        from: String,
    },
    /// `export * from "from"`
    ReExportAll { from: String },
}

/// Import/export structure of a module as seen by the tree shaker.
#[derive(Clone, Debug, Default)]
pub struct ModuleAnalysis {
    pub exports: Vec<ExportRecord>,
    pub imports: Vec<ImportRecord>,
    /// Top-level statements with observable effects: bare calls, assignments
    /// to `global`/`window`/`globalThis`, `console.*`.
    pub has_side_effects: bool,
    /// Dynamic patterns that defeat named-usage tracking (computed member
    /// access, `Object.keys`-style reflection, rest destructuring,
    /// non-literal require/import). Forces `All` usage onto every imported
    /// module.
    pub has_dynamic_access: bool,
}

/// How much of a module's export surface is known to be used.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ExportUsage {
    /// Only evaluated for side effects; no export is read.
    #[default]
    Evaluation,
    /// A known set of used export names.
    Exports(BTreeSet<String>),
    /// Namespace-observed: every export is live.
    All,
}

impl ExportUsage {
    pub fn add_named(&mut self, name: &str) -> bool {
        match self {
            ExportUsage::Evaluation => {
                *self = ExportUsage::Exports(BTreeSet::from([name.to_string()]));
                true
            }
            ExportUsage::Exports(names) => names.insert(name.to_string()),
            ExportUsage::All => false,
        }
    }

    pub fn set_all(&mut self) -> bool {
        if matches!(self, ExportUsage::All) {
            false
        } else {
            *self = ExportUsage::All;
            true
        }
    }

    pub fn uses(&self, name: &str) -> bool {
        match self {
            ExportUsage::Evaluation => false,
            ExportUsage::Exports(names) => names.contains(name),
            ExportUsage::All => true,
        }
    }
}

/// Context for turning an AST handle into factory-body code.
pub struct CodegenContext<'a> {
    /// Position of each specifier in the module's `dependencyMap`.
    pub dep_index: &'a FxHashMap<&'a str, usize>,
    /// When export elision is enabled, the usage computed for this module.
    /// `None` keeps every export.
    pub used_exports: Option<&'a ExportUsage>,
}

impl CodegenContext<'_> {
    pub fn slot(&self, specifier: &str) -> Option<usize> {
        self.dep_index.get(specifier).copied()
    }
}

pub struct GeneratedModule {
    /// The factory body placed inside the `__d` wrapper, with dependency
    /// references rewritten against the `dependencyMap` parameter.
    pub code: String,
    /// The module's own source map, if the transformer produced one.
    pub map: Option<SourceMapJson>,
}

/// Opaque handle to a transformed module. The core never inspects syntax;
/// it only asks the handle for its edges, its import/export structure, and
/// its generated code.
pub trait ModuleAst: Send + Sync + fmt::Debug {
    /// Transformed source before dependency rewriting. Input to the content
    /// hash that drives delta detection.
    fn transformed_code(&self) -> &str;

    fn dependencies(&self) -> &[Dependency];

    fn analysis(&self) -> &ModuleAnalysis;

    fn generate(&self, ctx: &CodegenContext<'_>) -> Result<GeneratedModule>;
}

/// AST handle for synthesized modules (assets, JSON, empty transforms).
/// The code is plain JS with literal `require("<specifier>")` calls that
/// `generate` rewrites against the dependency map.
#[derive(Debug)]
pub struct SyntheticAst {
    code: String,
    deps: Vec<Dependency>,
    analysis: ModuleAnalysis,
}

impl SyntheticAst {
    pub fn new(code: String, deps: Vec<Dependency>) -> Self {
        let analysis = ModuleAnalysis {
            // synthetic modules export through `module.exports`
            has_side_effects: false,
            ..Default::default()
        };
        Self {
            code,
            deps,
            analysis,
        }
    }

    /// The representation of a file whose transform produced nothing (e.g.
    /// a type-only module).
    pub fn empty_object() -> Self {
        Self::new("module.exports = {};".to_string(), Vec::new())
    }
}

impl ModuleAst for SyntheticAst {
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
        let mut code = self.code.clone();
        for dep in &self.deps {
            let slot = match ctx.slot(&dep.specifier) {
                Some(slot) => slot,
                None => continue,
            };
            for quote in ['"', '\''] {
                let needle = format!("require({quote}{}{quote})", dep.specifier);
                if code.contains(&needle) {
                    code = code.replace(&needle, &format!("_$$_REQUIRE(dependencyMap[{slot}])"));
                }
            }
        }
        Ok(GeneratedModule { code, map: None })
    }
}
