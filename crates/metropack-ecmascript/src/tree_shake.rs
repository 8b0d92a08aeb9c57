//! Reachability-based pruning with export-usage tracking.
//!
//! Import edges keep their targets alive unconditionally (evaluation order
//! is observable); re-export edges only keep the source alive when a
//! forwarded name is actually consumed or the source has side effects.
//! Dynamic-access escape hatches degrade every outgoing edge of the module
//! to a namespace import.

use std::{
    collections::VecDeque,
    fs,
    path::{Path, PathBuf},
};

use metropack_core::{
    module::Module,
    module_graph::ModuleGraph,
    transformer::{ExportRecord, ExportUsage, ImportedSymbols},
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::Deserialize;
use tracing::{debug, instrument};

pub struct ShakeResult {
    /// Export usage per surviving module path. Feeds export-level elision
    /// during serialization.
    pub usage: FxHashMap<String, ExportUsage>,
    pub removed: Vec<String>,
}

/// Prune modules unreachable under import/export semantics, starting from
/// the graph entry. The graph is modified in place.
#[instrument(skip_all, fields(modules = graph.len()))]
pub fn shake(graph: &mut ModuleGraph, root: &Path) -> ShakeResult {
    let Some(entry) = graph.entry_path().map(|p| p.to_string()) else {
        return ShakeResult {
            usage: FxHashMap::default(),
            removed: Vec::new(),
        };
    };

    let mut usage: FxHashMap<String, ExportUsage> = FxHashMap::default();
    let mut live: FxHashSet<String> = FxHashSet::default();
    let mut queue: VecDeque<String> = VecDeque::new();
    let mut side_effect_cache = SideEffectCache::new(root.to_path_buf());

    usage.insert(entry.clone(), ExportUsage::All);
    live.insert(entry.clone());
    queue.push_back(entry);

    while let Some(path) = queue.pop_front() {
        let Some(module) = graph.get(&path) else {
            continue;
        };
        let spec_to_path: FxHashMap<&str, &str> = module
            .specifiers
            .iter()
            .map(String::as_str)
            .zip(module.resolved_deps.iter().map(String::as_str))
            .collect();
        let analysis = module.ast.analysis();
        let my_usage = usage.get(&path).cloned().unwrap_or_default();

        for record in &analysis.imports {
            let Some(&target) = spec_to_path.get(record.specifier.as_str()) else {
                continue;
            };
            let target = target.to_string();
            let target_usage = usage.entry(target.clone()).or_default();
            let changed = if analysis.has_dynamic_access {
                target_usage.set_all()
            } else {
                match &record.symbols {
                    ImportedSymbols::Named(names) => {
                        let mut changed = false;
                        for name in names {
                            changed |= target_usage.add_named(name);
                        }
                        changed
                    }
                    ImportedSymbols::Namespace => target_usage.set_all(),
                    ImportedSymbols::SideEffectOnly => false,
                }
            };
            if live.insert(target.clone()) || changed {
                queue.push_back(target);
            }
        }

        for record in &analysis.exports {
            match record {
                ExportRecord::ReExport {
                    exported,
                    source_name,
                    from,
                } => {
                    let Some(&target) = spec_to_path.get(from.as_str()) else {
                        continue;
                    };
                    let target = target.to_string();
                    if my_usage.uses(exported) {
                        let target_usage = usage.entry(target.clone()).or_default();
                        let changed = if source_name == "*" {
                            target_usage.set_all()
                        } else {
                            target_usage.add_named(source_name)
                        };
                        if live.insert(target.clone()) || changed {
                            queue.push_back(target);
                        }
                    } else if !live.contains(&target)
                        && side_effect_cache.preserved(graph.get(&target))
                    {
                        usage.entry(target.clone()).or_default();
                        live.insert(target.clone());
                        queue.push_back(target);
                    }
                }
                ExportRecord::ReExportAll { from } => {
                    let Some(&target) = spec_to_path.get(from.as_str()) else {
                        continue;
                    };
                    let target = target.to_string();
                    let changed = {
                        let target_usage = usage.entry(target.clone()).or_default();
                        match &my_usage {
                            ExportUsage::All => target_usage.set_all(),
                            ExportUsage::Exports(names) => {
                                // the star forward may or may not provide each
                                // asked-for name; over-approximate with all of
                                // them
                                let mut changed = false;
                                for name in names {
                                    changed |= target_usage.add_named(name);
                                }
                                changed
                            }
                            ExportUsage::Evaluation => false,
                        }
                    };
                    let keep = changed
                        || live.contains(&target)
                        || side_effect_cache.preserved(graph.get(&target));
                    if keep && (live.insert(target.clone()) || changed) {
                        queue.push_back(target);
                    }
                }
                ExportRecord::Named(_) | ExportRecord::Default => {}
            }
        }
    }

    let doomed: Vec<String> = graph
        .paths()
        .filter(|path| !live.contains(*path))
        .map(|p| p.to_string())
        .collect();
    for path in &doomed {
        graph.remove(path);
    }
    graph.rebuild_inverse_index();
    debug!(removed = doomed.len(), surviving = graph.len(), "tree shake complete");

    ShakeResult {
        usage,
        removed: doomed,
    }
}

/// `sideEffects` declarations from the nearest `package.json`, cached per
/// directory. A missing field falls through to the top-level-statement
/// heuristic; a malformed one preserves the module.
struct SideEffectCache {
    root: PathBuf,
    by_dir: FxHashMap<PathBuf, Option<(PathBuf, SideEffectsField)>>,
}

#[derive(Clone, Debug)]
enum SideEffectsField {
    All(bool),
    Globs(Vec<String>),
    Unparseable,
}

impl SideEffectCache {
    fn new(root: PathBuf) -> Self {
        Self {
            root,
            by_dir: FxHashMap::default(),
        }
    }

    fn preserved(&mut self, module: Option<&Module>) -> bool {
        let Some(module) = module else {
            return false;
        };
        if module.ast.analysis().has_side_effects {
            return true;
        }
        let path = Path::new(&module.path);
        let Some(dir) = path.parent() else {
            return false;
        };
        match self.field_for(dir) {
            None => false,
            Some((pkg_dir, SideEffectsField::All(value))) => {
                let _ = pkg_dir;
                value
            }
            Some((_, SideEffectsField::Unparseable)) => true,
            Some((pkg_dir, SideEffectsField::Globs(globs))) => {
                let relative = pathdiff::diff_paths(path, &pkg_dir)
                    .unwrap_or_else(|| path.to_path_buf());
                let relative = relative.to_string_lossy().replace('\\', "/");
                globs.iter().any(|glob| glob_matches(glob, &relative))
            }
        }
    }

    fn field_for(&mut self, dir: &Path) -> Option<(PathBuf, SideEffectsField)> {
        if let Some(cached) = self.by_dir.get(dir) {
            return cached.clone();
        }
        let mut result: Option<(PathBuf, SideEffectsField)> = None;
        let mut current = Some(dir);
        while let Some(d) = current {
            let manifest = d.join("package.json");
            if manifest.is_file() {
                result = parse_side_effects(&manifest).map(|f| (d.to_path_buf(), f));
                break;
            }
            if d == self.root {
                break;
            }
            current = d.parent();
        }
        self.by_dir.insert(dir.to_path_buf(), result.clone());
        result
    }
}

fn parse_side_effects(manifest: &Path) -> Option<SideEffectsField> {
    #[derive(Deserialize)]
    struct PackageJson {
        #[serde(rename = "sideEffects")]
        side_effects: Option<serde_json::Value>,
    }

    let text = fs::read_to_string(manifest).ok()?;
    let manifest: PackageJson = match serde_json::from_str(&text) {
        Ok(parsed) => parsed,
        Err(_) => return Some(SideEffectsField::Unparseable),
    };
    match manifest.side_effects? {
        serde_json::Value::Bool(value) => Some(SideEffectsField::All(value)),
        serde_json::Value::Array(items) => Some(SideEffectsField::Globs(
            items
                .into_iter()
                .filter_map(|v| v.as_str().map(|s| s.trim_start_matches("./").to_string()))
                .collect(),
        )),
        _ => Some(SideEffectsField::Unparseable),
    }
}

/// Single-`*` glob: `*.css`, `src/*`, `src/*.js`, or an exact path.
fn glob_matches(glob: &str, path: &str) -> bool {
    match glob.find('*') {
        None => glob == path,
        Some(star) => {
            let (prefix, suffix) = (&glob[..star], &glob[star + 1..]);
            path.len() >= prefix.len() + suffix.len()
                && path.starts_with(prefix)
                && path.ends_with(suffix)
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use metropack_core::{
        config::Platform,
        module::ModuleKind,
        transformer::{ModuleAst, TransformRequest, Transformer},
    };

    use super::*;
    use crate::transform::DefaultTransformer;

    async fn module_from(path: &str, source: &str, deps: &[(&str, &str)]) -> Module {
        let ast: Arc<dyn ModuleAst> = DefaultTransformer
            .transform(TransformRequest {
                source,
                file_path: Path::new(path),
                platform: Platform::Ios,
                dev: false,
                entry_path: Path::new("/proj/index.js"),
            })
            .await
            .unwrap();
        Module::new(
            path.to_string(),
            ModuleKind::Ecmascript,
            Arc::from(source),
            ast,
            deps.iter().map(|(_, p)| p.to_string()).collect(),
            deps.iter().map(|(s, _)| s.to_string()).collect(),
        )
    }

    async fn graph_from(modules: Vec<Module>) -> ModuleGraph {
        let mut graph = ModuleGraph::new();
        let entry = modules[0].path.clone();
        for module in modules {
            graph.insert(module);
        }
        graph.set_entry(entry);
        graph.rebuild_inverse_index();
        graph
    }

    #[tokio::test]
    async fn unreferenced_reexport_source_is_pruned() {
        let entry = module_from(
            "/proj/index.js",
            r#"import { used } from "./barrel"; used();"#,
            &[("./barrel", "/proj/barrel.js")],
        )
        .await;
        let barrel = module_from(
            "/proj/barrel.js",
            "export { used } from \"./used\";\nexport { unused } from \"./unused\";\n",
            &[
                ("./used", "/proj/used.js"),
                ("./unused", "/proj/unused.js"),
            ],
        )
        .await;
        let used = module_from("/proj/used.js", "export const used = () => 1;\n", &[]).await;
        let unused = module_from("/proj/unused.js", "export const unused = () => 2;\n", &[]).await;

        let mut graph = graph_from(vec![entry, barrel, used, unused]).await;
        let result = shake(&mut graph, Path::new("/proj"));

        assert!(graph.contains("/proj/used.js"));
        assert!(!graph.contains("/proj/unused.js"));
        assert!(result.removed.contains(&"/proj/unused.js".to_string()));
        assert!(result.usage.get("/proj/used.js").unwrap().uses("used"));
    }

    #[tokio::test]
    async fn namespace_import_marks_everything_used() {
        let entry = module_from(
            "/proj/index.js",
            r#"import * as ns from "./lib"; ns.one();"#,
            &[("./lib", "/proj/lib.js")],
        )
        .await;
        let lib = module_from(
            "/proj/lib.js",
            "export const one = 1;\nexport const two = 2;\n",
            &[],
        )
        .await;

        let mut graph = graph_from(vec![entry, lib]).await;
        let result = shake(&mut graph, Path::new("/proj"));
        assert_eq!(result.usage.get("/proj/lib.js"), Some(&ExportUsage::All));
    }

    #[tokio::test]
    async fn side_effectful_reexport_source_survives() {
        let entry = module_from(
            "/proj/index.js",
            r#"import { x } from "./barrel"; x();"#,
            &[("./barrel", "/proj/barrel.js")],
        )
        .await;
        let barrel = module_from(
            "/proj/barrel.js",
            "export { x } from \"./x\";\nexport { y } from \"./effects\";\n",
            &[("./x", "/proj/x.js"), ("./effects", "/proj/effects.js")],
        )
        .await;
        let x = module_from("/proj/x.js", "export const x = () => 1;\n", &[]).await;
        let effects = module_from(
            "/proj/effects.js",
            "registerGlobalThing();\nexport const y = 1;\n",
            &[],
        )
        .await;

        let mut graph = graph_from(vec![entry, barrel, x, effects]).await;
        shake(&mut graph, Path::new("/proj"));
        assert!(graph.contains("/proj/effects.js"));
    }

    #[tokio::test]
    async fn dynamic_access_forces_all_used() {
        let entry = module_from(
            "/proj/index.js",
            r#"const lib = require("./lib"); const k = pick(); lib[k]();"#,
            &[("./lib", "/proj/lib.js")],
        )
        .await;
        let lib = module_from("/proj/lib.js", "export const a = 1;\n", &[]).await;

        let mut graph = graph_from(vec![entry, lib]).await;
        let result = shake(&mut graph, Path::new("/proj"));
        assert_eq!(result.usage.get("/proj/lib.js"), Some(&ExportUsage::All));
    }

    #[test]
    fn glob_matching_shapes() {
        assert!(glob_matches("src/setup.js", "src/setup.js"));
        assert!(glob_matches("*.css", "theme.css"));
        assert!(glob_matches("src/*", "src/anything.js"));
        assert!(glob_matches("src/*.js", "src/a.js"));
        assert!(!glob_matches("*.css", "theme.scss"));
        assert!(!glob_matches("src/*.js", "lib/a.js"));
    }
}
