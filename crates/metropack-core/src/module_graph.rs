//! The module graph: a path-indexed arena with integer handles.
//!
//! Dependency lists live on the modules themselves (as resolved paths, in
//! source order); the graph adds the path → slot index and the inverse
//! dependency index on top. Cycles are representable by construction since
//! edges are plain handles, not owning pointers.

use rustc_hash::FxHashMap;

use crate::module::Module;

/// Handle of a module slot in the graph arena. Only meaningful together
/// with the graph that issued it.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ModuleIx(pub u32);

#[derive(Clone, Default)]
pub struct ModuleGraph {
    entry: Option<String>,
    slots: Vec<Option<Module>>,
    by_path: FxHashMap<String, ModuleIx>,
    /// Parallel to `slots`: which modules depend on the module in this slot.
    inverse: Vec<Vec<ModuleIx>>,
}

impl ModuleGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entry_path(&self) -> Option<&str> {
        self.entry.as_deref()
    }

    pub fn set_entry(&mut self, path: String) {
        self.entry = Some(path);
    }

    pub fn len(&self) -> usize {
        self.by_path.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_path.is_empty()
    }

    pub fn contains(&self, path: &str) -> bool {
        self.by_path.contains_key(path)
    }

    pub fn ix_of(&self, path: &str) -> Option<ModuleIx> {
        self.by_path.get(path).copied()
    }

    pub fn module(&self, ix: ModuleIx) -> &Module {
        self.slots[ix.0 as usize]
            .as_ref()
            .expect("module handle points at a freed slot")
    }

    pub fn get(&self, path: &str) -> Option<&Module> {
        self.ix_of(path).map(|ix| self.module(ix))
    }

    /// Insert or replace. Replacement keeps the slot (and therefore every
    /// outstanding handle) stable.
    pub fn insert(&mut self, module: Module) -> ModuleIx {
        if let Some(&ix) = self.by_path.get(&module.path) {
            self.slots[ix.0 as usize] = Some(module);
            return ix;
        }
        let ix = ModuleIx(self.slots.len() as u32);
        self.by_path.insert(module.path.clone(), ix);
        self.slots.push(Some(module));
        self.inverse.push(Vec::new());
        ix
    }

    pub fn remove(&mut self, path: &str) -> Option<Module> {
        let ix = self.by_path.remove(path)?;
        self.slots[ix.0 as usize].take()
    }

    /// All live modules with their handles, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ModuleIx, &Module)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|m| (ModuleIx(i as u32), m)))
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.iter().map(|(_, m)| m.path.as_str())
    }

    /// The resolved dependencies of `ix` that exist in the graph, as
    /// handles, preserving source order. Dev-tolerated missing edges are
    /// silently skipped.
    pub fn dep_handles(&self, ix: ModuleIx) -> Vec<ModuleIx> {
        self.module(ix)
            .resolved_deps
            .iter()
            .filter_map(|path| self.ix_of(path))
            .collect()
    }

    /// Direct inverse dependencies of `ix`. Only valid after
    /// [`Self::rebuild_inverse_index`].
    pub fn inverse_deps(&self, ix: ModuleIx) -> &[ModuleIx] {
        &self.inverse[ix.0 as usize]
    }

    /// Recompute the inverse-dependency index in one pass over all edges.
    pub fn rebuild_inverse_index(&mut self) {
        for list in &mut self.inverse {
            list.clear();
        }
        let edges: Vec<(ModuleIx, ModuleIx)> = self
            .iter()
            .flat_map(|(ix, module)| {
                module
                    .resolved_deps
                    .iter()
                    .filter_map(|dep| self.ix_of(dep).map(|dep_ix| (ix, dep_ix)))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (from, to) in edges {
            let list = &mut self.inverse[to.0 as usize];
            if !list.contains(&from) {
                list.push(from);
            }
        }
    }

    /// Transitive closure of the inverse-dependency relation starting at
    /// `path`, including the start module. Returns, for every member, its
    /// direct inverse-dependency list. This is the map HMR clients walk to
    /// find an accepting boundary.
    pub fn inverse_dependency_closure(&self, path: &str) -> Vec<(ModuleIx, Vec<ModuleIx>)> {
        let Some(start) = self.ix_of(path) else {
            return Vec::new();
        };
        let mut seen = vec![false; self.slots.len()];
        let mut queue = std::collections::VecDeque::from([start]);
        seen[start.0 as usize] = true;
        let mut closure = Vec::new();
        while let Some(ix) = queue.pop_front() {
            let parents = self.inverse_deps(ix).to_vec();
            for &parent in &parents {
                if !seen[parent.0 as usize] {
                    seen[parent.0 as usize] = true;
                    queue.push_back(parent);
                }
            }
            closure.push((ix, parents));
        }
        closure
    }

    /// Debug check of `B ∈ A.resolved_deps ⇔ A ∈ B.inverse_deps`.
    #[cfg(test)]
    pub fn assert_inverse_symmetry(&self) {
        for (ix, module) in self.iter() {
            for dep in &module.resolved_deps {
                if let Some(dep_ix) = self.ix_of(dep) {
                    assert!(
                        self.inverse_deps(dep_ix).contains(&ix),
                        "missing inverse edge {} -> {}",
                        module.path,
                        dep
                    );
                }
            }
            for &parent in self.inverse_deps(ix) {
                assert!(
                    self.module(parent)
                        .resolved_deps
                        .contains(&self.module(ix).path),
                    "stale inverse edge into {}",
                    self.module(ix).path
                );
            }
        }
    }
}

impl std::fmt::Debug for ModuleGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleGraph")
            .field("entry", &self.entry)
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}


#[cfg(test)]
mod tests {
    use super::test_util::graph_of;
    use super::*;

    #[test]
    fn insert_is_idempotent_on_path() {
        let mut graph = graph_of(&[("/a", &["/b"]), ("/b", &[])]);
        let before = graph.ix_of("/a").unwrap();
        let after = graph.insert(super::test_util::stub_module("/a", &[]));
        assert_eq!(before, after);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn inverse_index_is_symmetric() {
        let graph = graph_of(&[
            ("/entry", &["/a", "/b"]),
            ("/a", &["/b"]),
            ("/b", &["/entry"]), // cycle back to the entry
        ]);
        graph.assert_inverse_symmetry();
        let b = graph.ix_of("/b").unwrap();
        let mut parents: Vec<&str> = graph
            .inverse_deps(b)
            .iter()
            .map(|&ix| graph.module(ix).path.as_str())
            .collect();
        parents.sort_unstable();
        assert_eq!(parents, ["/a", "/entry"]);
    }

    #[test]
    fn removal_frees_the_slot_but_keeps_others_stable() {
        let mut graph = graph_of(&[("/a", &["/b"]), ("/b", &[])]);
        let b = graph.ix_of("/b").unwrap();
        graph.remove("/a");
        graph.rebuild_inverse_index();
        assert!(graph.get("/a").is_none());
        assert_eq!(graph.module(b).path, "/b");
        assert!(graph.inverse_deps(b).is_empty());
    }

    #[test]
    fn closure_walks_upward_including_start() {
        let graph = graph_of(&[
            ("/entry", &["/mid"]),
            ("/mid", &["/leaf"]),
            ("/leaf", &[]),
            ("/island", &[]),
        ]);
        let closure = graph.inverse_dependency_closure("/leaf");
        let paths: Vec<&str> = closure
            .iter()
            .map(|(ix, _)| graph.module(*ix).path.as_str())
            .collect();
        assert_eq!(paths, ["/leaf", "/mid", "/entry"]);
        // the leaf's direct parents are reported
        assert_eq!(closure[0].1, vec![graph.ix_of("/mid").unwrap()]);
    }
}
