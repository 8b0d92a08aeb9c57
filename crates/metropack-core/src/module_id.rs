use parking_lot::Mutex;
use rustc_hash::FxHashMap;

/// Hands out the numeric ids bundles and HMR payloads encode module paths
/// with.
///
/// First query for a path assigns the next id (starting at 0); later
/// queries return the stored id, so ids are stable for the life of the
/// factory. One factory instance is shared across all incremental rebuilds
/// of a platform — replacing it would invalidate every id a connected
/// client has already seen — and is only dropped on a full-rebuild
/// fallback.
#[derive(Default)]
pub struct ModuleIdFactory {
    inner: Mutex<Maps>,
}

#[derive(Default)]
struct Maps {
    by_path: FxHashMap<String, u32>,
    by_id: Vec<String>,
}

impl ModuleIdFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn id_for(&self, path: &str) -> u32 {
        let mut maps = self.inner.lock();
        if let Some(&id) = maps.by_path.get(path) {
            return id;
        }
        let id = maps.by_id.len() as u32;
        maps.by_path.insert(path.to_string(), id);
        maps.by_id.push(path.to_string());
        id
    }

    pub fn path_for(&self, id: u32) -> Option<String> {
        self.inner.lock().by_id.get(id as usize).cloned()
    }

    /// Id for a path that has already been assigned one, without assigning.
    pub fn existing_id_for(&self, path: &str) -> Option<u32> {
        self.inner.lock().by_path.get(path).copied()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
