//! Incremental rebuilds: apply a batch of file changes to a prior build,
//! reusing everything that didn't change, and describe the transition as a
//! `{added, modified, deleted}` delta.

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Result;
use indexmap::IndexMap;
use rustc_hash::FxHashSet;
use tracing::{debug, instrument};

use crate::{
    graph_builder::GraphBuilder,
    module::Module,
    module_graph::ModuleGraph,
    module_id::ModuleIdFactory,
    resolve::canonical,
};

/// Everything retained between incremental builds of one platform.
///
/// The id factory is shared by reference on purpose: ids already observed
/// by connected clients must survive every incremental rebuild. It is only
/// replaced when the whole state is dropped for a full-rebuild fallback.
pub struct BuildState {
    pub graph: ModuleGraph,
    pub ids: Arc<ModuleIdFactory>,
    pub revision_id: String,
    revision: u64,
}

impl BuildState {
    pub fn initial(graph: ModuleGraph) -> Self {
        Self {
            graph,
            ids: Arc::new(ModuleIdFactory::new()),
            revision_id: revision_name(0),
            revision: 0,
        }
    }

    fn successor(&self, graph: ModuleGraph) -> Self {
        let revision = self.revision + 1;
        Self {
            graph,
            ids: self.ids.clone(),
            revision_id: revision_name(revision),
            revision,
        }
    }
}

/// Monotone, lexicographically ordered revision names.
fn revision_name(revision: u64) -> String {
    format!("rev-{revision:08}")
}

/// The transition between two graphs. Key sets are disjoint by
/// construction.
#[derive(Debug, Default)]
pub struct Delta {
    pub added: IndexMap<String, Module>,
    pub modified: IndexMap<String, Module>,
    pub deleted: BTreeSet<String>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.deleted.is_empty()
    }

    #[cfg(test)]
    pub fn assert_disjoint(&self) {
        for key in self.added.keys() {
            assert!(!self.modified.contains_key(key));
            assert!(!self.deleted.contains(key));
        }
        for key in self.modified.keys() {
            assert!(!self.deleted.contains(key));
        }
    }
}

/// Computes the delta between two graphs by pair-walking their keys.
/// `modified` means present in both with a differing content hash.
pub fn diff_graphs(old: &ModuleGraph, new: &ModuleGraph) -> Delta {
    let mut delta = Delta::default();
    for (_, module) in new.iter() {
        match old.get(&module.path) {
            None => {
                delta.added.insert(module.path.clone(), module.clone());
            }
            Some(prior) if prior.content_hash != module.content_hash => {
                delta.modified.insert(module.path.clone(), module.clone());
            }
            Some(_) => {}
        }
    }
    for path in old.paths() {
        if !new.contains(path) {
            delta.deleted.insert(path.to_string());
        }
    }
    delta
}

/// The inverse-dependency closure of an updated module, expressed in module
/// ids: for every transitive inverse dependent (including the module
/// itself), its direct inverse-dependency ids. HMR clients walk this upward
/// to find an accepting boundary.
pub fn inverse_closure_ids(
    graph: &ModuleGraph,
    ids: &ModuleIdFactory,
    path: &str,
) -> IndexMap<u32, Vec<u32>> {
    graph
        .inverse_dependency_closure(path)
        .into_iter()
        .map(|(ix, parents)| {
            (
                ids.id_for(&graph.module(ix).path),
                parents
                    .into_iter()
                    .map(|p| ids.id_for(&graph.module(p).path))
                    .collect(),
            )
        })
        .collect()
}

pub struct DeltaEngine {
    builder: GraphBuilder,
}

impl DeltaEngine {
    pub fn new(builder: GraphBuilder) -> Self {
        Self { builder }
    }

    pub fn builder(&self) -> &GraphBuilder {
        &self.builder
    }

    /// Re-transform only the changed files, merge into a copy of the prior
    /// graph, prune what became unreachable, and return the new state plus
    /// the delta against the prior snapshot.
    #[instrument(skip_all, fields(changed = changed.len()))]
    pub async fn incremental_build(
        &self,
        prior: &BuildState,
        changed: &[PathBuf],
    ) -> Result<(BuildState, Delta)> {
        let mut surviving: Vec<String> = Vec::new();
        let mut removed: Vec<String> = Vec::new();
        for path in changed {
            let canon = canonical(path);
            let key = canon.to_string_lossy().into_owned();
            if canon.is_file() {
                surviving.push(key);
            } else {
                removed.push(key);
            }
        }

        let mut graph = prior.graph.clone();
        for path in &removed {
            graph.remove(path);
        }

        // Reload changed files, then chase any dependency that is new to the
        // graph. Prior modules that are present and unchanged are reused
        // as-is; the delta below confirms reuse via content hashes.
        let mut pending: Vec<String> = surviving
            .into_iter()
            .filter(|path| graph.contains(path) || prior.graph.entry_path() == Some(path.as_str()))
            .collect();
        let mut queued: FxHashSet<String> = pending.iter().cloned().collect();

        while !pending.is_empty() {
            let wave = std::mem::take(&mut pending);
            let loads = wave.iter().map(|path| self.builder.load(path.clone()));
            let loaded = futures::future::join_all(loads).await;
            for loaded in loaded {
                let module = self.builder.into_module(loaded?)?;
                for dep in &module.resolved_deps {
                    if !graph.contains(dep) && queued.insert(dep.clone()) {
                        pending.push(dep.clone());
                    }
                }
                graph.insert(module);
            }
        }

        prune_unreachable(&mut graph);
        graph.rebuild_inverse_index();

        let delta = diff_graphs(&prior.graph, &graph);
        debug!(
            added = delta.added.len(),
            modified = delta.modified.len(),
            deleted = delta.deleted.len(),
            "incremental build complete"
        );
        Ok((prior.successor(graph), delta))
    }
}

/// Drop modules no longer reachable from the entry. Files whose last
/// referrer went away are destroyed here rather than lingering in the
/// graph.
fn prune_unreachable(graph: &mut ModuleGraph) {
    let Some(entry) = graph.entry_path().map(|p| p.to_string()) else {
        return;
    };
    let Some(entry_ix) = graph.ix_of(&entry) else {
        return;
    };
    let mut reachable: FxHashSet<String> = FxHashSet::default();
    let mut stack = vec![entry_ix];
    reachable.insert(entry.clone());
    while let Some(ix) = stack.pop() {
        for dep in graph.dep_handles(ix) {
            let path = graph.module(dep).path.clone();
            if reachable.insert(path) {
                stack.push(dep);
            }
        }
    }
    let doomed: Vec<String> = graph
        .paths()
        .filter(|p| !reachable.contains(*p))
        .map(|p| p.to_string())
        .collect();
    for path in doomed {
        graph.remove(&path);
    }
}
