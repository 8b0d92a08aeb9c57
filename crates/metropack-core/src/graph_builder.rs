//! Builds the module graph from an entry point: resolve, transform,
//! collect, recurse.
//!
//! Transformation fans out concurrently within a wave of pending files, but
//! the graph itself is only mutated from the build loop — one serialization
//! point, no locks on the graph.

use std::{path::Path, sync::Arc};

use anyhow::Result;
use rustc_hash::FxHashSet;
use tracing::{debug, instrument, warn};

use crate::{
    asset::{asset_dependencies, build_asset_info, synthesize_asset_source, AssetInfo},
    config::Config,
    error::BuildError,
    module::{Module, ModuleKind},
    module_graph::ModuleGraph,
    resolve::{canonical, Resolver},
    transformer::{ImageProber, ModuleAst, SyntheticAst, TransformRequest, Transformer},
};

/// `(processed, total)` callback; `total` grows as new dependencies are
/// discovered.
pub type ProgressCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

pub struct GraphBuilder {
    config: Arc<Config>,
    transformer: Arc<dyn Transformer>,
    prober: Arc<dyn ImageProber>,
    resolver: Resolver,
    progress: Option<ProgressCallback>,
}

/// A module that has been read and transformed but whose dependencies are
/// not resolved yet.
pub(crate) struct LoadedModule {
    pub path: String,
    pub kind: ModuleKind,
    pub source: Arc<str>,
    pub ast: Arc<dyn ModuleAst>,
    /// Present for assets so the factory can be regenerated if the
    /// registrar turns out to be unresolvable.
    pub asset_info: Option<AssetInfo>,
}

impl GraphBuilder {
    pub fn new(
        config: Arc<Config>,
        transformer: Arc<dyn Transformer>,
        prober: Arc<dyn ImageProber>,
    ) -> Self {
        let resolver = Resolver::new(&config);
        Self {
            config,
            transformer,
            prober,
            resolver,
            progress: None,
        }
    }

    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    /// Build the full graph reachable from `entry`.
    #[instrument(skip_all, fields(entry = %entry.display(), platform = %self.config.platform))]
    pub async fn build(&self, entry: &Path) -> Result<ModuleGraph> {
        if !entry.is_file() {
            return Err(BuildError::EntryNotFound {
                path: entry.to_path_buf(),
            }
            .into());
        }
        let entry_path = canonical(entry).to_string_lossy().into_owned();

        let mut graph = ModuleGraph::new();
        graph.set_entry(entry_path.clone());

        let mut seen: FxHashSet<String> = FxHashSet::default();
        seen.insert(entry_path.clone());
        let mut pending = vec![entry_path];
        let mut processed = 0usize;

        while !pending.is_empty() {
            let wave = std::mem::take(&mut pending);
            let loads = wave.iter().map(|path| self.load(path.clone()));
            let loaded = futures::future::join_all(loads).await;

            for loaded in loaded {
                let module = self.into_module(loaded?)?;
                for dep in &module.resolved_deps {
                    if seen.insert(dep.clone()) {
                        pending.push(dep.clone());
                    }
                }
                graph.insert(module);
                processed += 1;
                if let Some(progress) = &self.progress {
                    progress(processed, processed + pending.len());
                }
            }
        }

        graph.rebuild_inverse_index();
        debug!(modules = graph.len(), "graph complete");
        Ok(graph)
    }

    /// Read and transform one file. Assets and JSON synthesize their source;
    /// everything else goes through the Transformer capability.
    pub(crate) async fn load(&self, path: String) -> Result<LoadedModule> {
        let fs_path = Path::new(&path).to_path_buf();

        if self.resolver.is_asset_path(&fs_path) {
            let info = build_asset_info(&fs_path, &self.config.root, self.prober.as_ref())?;
            let registry = self.resolver.options().asset_registry_path.clone();
            let source = synthesize_asset_source(&info, Some(&registry));
            let ast = SyntheticAst::new(source.clone(), asset_dependencies(Some(&registry)));
            return Ok(LoadedModule {
                path,
                kind: ModuleKind::Asset,
                source: Arc::from(source.as_str()),
                ast: Arc::new(ast),
                asset_info: Some(info),
            });
        }

        let bytes = tokio::fs::read(&fs_path)
            .await
            .map_err(|e| BuildError::io(&fs_path, e))?;
        let source: Arc<str> = Arc::from(String::from_utf8_lossy(&bytes).into_owned().as_str());

        if fs_path.extension().and_then(|e| e.to_str()) == Some("json") {
            let code = format!("module.exports = {};", source.trim());
            let ast = SyntheticAst::new(code, Vec::new());
            return Ok(LoadedModule {
                path,
                kind: ModuleKind::Json,
                source,
                ast: Arc::new(ast),
                asset_info: None,
            });
        }

        let ast = self
            .transformer
            .transform(TransformRequest {
                source: &source,
                file_path: &fs_path,
                platform: self.config.platform,
                dev: self.config.dev,
                entry_path: &self.config.entry_path(),
            })
            .await
            .map_err(|e| BuildError::TransformFailed {
                path: fs_path.clone(),
                detail: format!("{e:#}"),
            })?;

        // A transform that produced nothing (e.g. a type-only file) becomes
        // the empty-object module.
        let ast: Arc<dyn ModuleAst> = if ast.transformed_code().trim().is_empty() {
            Arc::new(SyntheticAst::empty_object())
        } else {
            ast
        };

        Ok(LoadedModule {
            path,
            kind: ModuleKind::Ecmascript,
            source,
            ast,
            asset_info: None,
        })
    }

    /// Resolve a loaded module's dependency edges and produce the graph
    /// node. Dev builds tolerate unresolved edges (warn + omit); production
    /// builds fail. An asset whose registrar cannot be resolved degrades to
    /// a plain metadata export.
    pub(crate) fn into_module(&self, loaded: LoadedModule) -> Result<Module> {
        let referrer = Path::new(&loaded.path).to_path_buf();
        let mut resolved_deps = Vec::new();
        let mut specifiers = Vec::new();
        let asset_info = loaded.asset_info;
        let mut ast = loaded.ast;

        for dep in ast.dependencies().to_vec() {
            match self.resolver.resolve(&dep.specifier, &referrer) {
                Ok(path) => {
                    resolved_deps.push(path.to_string_lossy().into_owned());
                    specifiers.push(dep.specifier);
                }
                Err(not_resolved) => {
                    if loaded.kind == ModuleKind::Asset {
                        warn!(
                            asset = %referrer.display(),
                            "{}",
                            BuildError::AssetRegistrarMissing {
                                asset: referrer.clone()
                            }
                        );
                        if let Some(info) = &asset_info {
                            let source = synthesize_asset_source(info, None);
                            ast = Arc::new(SyntheticAst::new(source, Vec::new()));
                        }
                        resolved_deps.clear();
                        specifiers.clear();
                        break;
                    }
                    if self.config.dev {
                        warn!("{not_resolved}; edge dropped");
                        continue;
                    }
                    return Err(BuildError::ResolveFailed {
                        specifier: not_resolved.specifier,
                        from: not_resolved.from,
                    }
                    .into());
                }
            }
        }

        Ok(Module::new(
            loaded.path,
            loaded.kind,
            loaded.source,
            ast,
            resolved_deps,
            specifiers,
        )
        .with_asset_info(asset_info))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::fs;

    use async_trait::async_trait;

    use super::*;
    use crate::transformer::{Dependency, DependencyKind, ModuleAnalysis, NullImageProber};

    /// Transformer that passes source through and extracts `require("...")`
    /// with a trivial scan — enough to drive the builder in tests.
    #[derive(Debug)]
    pub(crate) struct PassthroughTransformer;

    #[derive(Debug)]
    struct PassthroughAst {
        code: String,
        deps: Vec<Dependency>,
        analysis: ModuleAnalysis,
    }

    impl ModuleAst for PassthroughAst {
        fn transformed_code(&self) -> &str {
            &self.code
        }
        fn dependencies(&self) -> &[Dependency] {
            &self.deps
        }
        fn analysis(&self) -> &ModuleAnalysis {
            &self.analysis
        }
        fn generate(
            &self,
            _ctx: &crate::transformer::CodegenContext<'_>,
        ) -> Result<crate::transformer::GeneratedModule> {
            Ok(crate::transformer::GeneratedModule {
                code: self.code.clone(),
                map: None,
            })
        }
    }

    #[async_trait]
    impl Transformer for PassthroughTransformer {
        async fn transform(
            &self,
            request: TransformRequest<'_>,
        ) -> Result<Arc<dyn ModuleAst>> {
            let mut deps = Vec::new();
            for piece in request.source.split("require(\"").skip(1) {
                if let Some(end) = piece.find('"') {
                    deps.push(Dependency {
                        specifier: piece[..end].to_string(),
                        kind: DependencyKind::Require,
                    });
                }
            }
            Ok(Arc::new(PassthroughAst {
                code: request.source.to_string(),
                deps,
                analysis: ModuleAnalysis::default(),
            }))
        }
    }

    fn builder_for(root: &Path, dev: bool) -> GraphBuilder {
        let mut config = Config::new(root, "index.js");
        config.dev = dev;
        GraphBuilder::new(
            Arc::new(config),
            Arc::new(PassthroughTransformer),
            Arc::new(NullImageProber),
        )
    }

    #[tokio::test]
    async fn builds_a_closed_graph() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("index.js"), r#"require("./a"); require("./b");"#).unwrap();
        fs::write(root.join("a.js"), r#"require("./b");"#).unwrap();
        fs::write(root.join("b.js"), "1;").unwrap();

        let builder = builder_for(root, true);
        let graph = builder.build(&root.join("index.js")).await.unwrap();
        assert_eq!(graph.len(), 3);
        // closure: every resolved dep is a key of the graph
        for (_, module) in graph.iter() {
            for dep in &module.resolved_deps {
                assert!(graph.contains(dep), "dangling edge to {dep}");
            }
        }
    }

    #[tokio::test]
    async fn circular_dependencies_terminate() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("index.js"), r#"require("./a");"#).unwrap();
        fs::write(root.join("a.js"), r#"require("./index.js");"#).unwrap();

        let builder = builder_for(root, true);
        let graph = builder.build(&root.join("index.js")).await.unwrap();
        assert_eq!(graph.len(), 2);
    }

    #[tokio::test]
    async fn missing_entry_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let builder = builder_for(dir.path(), true);
        let err = builder
            .build(&dir.path().join("index.js"))
            .await
            .unwrap_err();
        assert!(err.downcast_ref::<BuildError>().is_some());
    }

    #[tokio::test]
    async fn unresolved_edge_is_dropped_in_dev_and_fatal_in_prod() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("index.js"), r#"require("./gone");"#).unwrap();

        let graph = builder_for(root, true)
            .build(&root.join("index.js"))
            .await
            .unwrap();
        let entry_path = graph.entry_path().unwrap().to_string();
        let entry = graph.get(&entry_path).unwrap();
        assert!(entry.resolved_deps.is_empty());
        assert_eq!(entry.resolved_deps.len(), entry.specifiers.len());

        assert!(builder_for(root, false)
            .build(&root.join("index.js"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn json_modules_synthesize_an_export() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("index.js"), r#"require("./data.json");"#).unwrap();
        fs::write(root.join("data.json"), "{\"a\": 1}\n").unwrap();

        let graph = builder_for(root, true)
            .build(&root.join("index.js"))
            .await
            .unwrap();
        let data = graph
            .iter()
            .find(|(_, m)| m.path.ends_with("data.json"))
            .map(|(_, m)| m)
            .unwrap();
        assert_eq!(data.kind, ModuleKind::Json);
        assert_eq!(data.ast.transformed_code(), "module.exports = {\"a\": 1};");
    }

    #[tokio::test]
    async fn asset_without_registrar_degrades_with_a_warning() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("index.js"), r#"require("./icon.png");"#).unwrap();
        fs::write(root.join("icon.png"), b"png").unwrap();

        let graph = builder_for(root, true)
            .build(&root.join("index.js"))
            .await
            .unwrap();
        let asset = graph
            .iter()
            .find(|(_, m)| m.kind == ModuleKind::Asset)
            .map(|(_, m)| m)
            .unwrap();
        assert!(asset.resolved_deps.is_empty());
        assert!(asset.ast.transformed_code().starts_with("module.exports = {"));
    }

    #[tokio::test]
    async fn progress_is_monotone_and_ends_complete() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("index.js"), r#"require("./a");"#).unwrap();
        fs::write(root.join("a.js"), "1;").unwrap();

        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let sink = seen.clone();
        let builder = builder_for(root, true).with_progress(Arc::new(move |done, total| {
            sink.lock().push((done, total));
        }));
        builder.build(&root.join("index.js")).await.unwrap();

        let seen = seen.lock();
        assert!(!seen.is_empty());
        let (done, total) = *seen.last().unwrap();
        assert_eq!(done, total);
    }
}
