use std::{fmt, sync::Arc};

use data_encoding::HEXLOWER;
use sha2::{Digest, Sha256};

use crate::{asset::AssetInfo, transformer::ModuleAst};

/// How a module entered the graph.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ModuleKind {
    Ecmascript,
    Json,
    Asset,
}

/// One node of the module graph. Identity is the canonical absolute path.
///
/// `resolved_deps` and `specifiers` are parallel: the i-th specifier is what
/// the source wrote, the i-th path is what the resolver returned for it.
/// Edges the resolver could not satisfy in dev mode are dropped from both
/// lists, so the invariant `resolved_deps.len() == specifiers.len()` always
/// holds.
#[derive(Clone)]
pub struct Module {
    pub path: String,
    pub kind: ModuleKind,
    /// Original source text. Feeds `sourcesContent`.
    pub source: Arc<str>,
    /// Transformed handle; also the source of truth for generated code.
    pub ast: Arc<dyn ModuleAst>,
    pub resolved_deps: Vec<String>,
    pub specifiers: Vec<String>,
    /// `sha256(transformed_code || sorted(resolved_deps))[..16]`, the
    /// fingerprint delta computation compares.
    pub content_hash: String,
    /// Registrar metadata, for asset modules only.
    pub asset_info: Option<AssetInfo>,
}

impl Module {
    pub fn new(
        path: String,
        kind: ModuleKind,
        source: Arc<str>,
        ast: Arc<dyn ModuleAst>,
        resolved_deps: Vec<String>,
        specifiers: Vec<String>,
    ) -> Self {
        debug_assert_eq!(resolved_deps.len(), specifiers.len());
        let content_hash = content_hash(ast.transformed_code(), &resolved_deps);
        Self {
            path,
            kind,
            source,
            ast,
            resolved_deps,
            specifiers,
            content_hash,
            asset_info: None,
        }
    }

    pub fn with_asset_info(mut self, asset_info: Option<AssetInfo>) -> Self {
        self.asset_info = asset_info;
        self
    }
}

impl fmt::Debug for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Module")
            .field("path", &self.path)
            .field("kind", &self.kind)
            .field("resolved_deps", &self.resolved_deps)
            .field("content_hash", &self.content_hash)
            .finish_non_exhaustive()
    }
}

/// Content fingerprint of a module: transformed code plus the sorted list of
/// resolved dependency paths, hashed and truncated to 16 hex chars.
pub fn content_hash(transformed_code: &str, resolved_deps: &[String]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(transformed_code.as_bytes());
    let mut deps: Vec<&str> = resolved_deps.iter().map(|s| s.as_str()).collect();
    deps.sort_unstable();
    for dep in deps {
        hasher.update(dep.as_bytes());
    }
    let digest = hasher.finalize();
    HEXLOWER.encode(&digest)[..16].to_string()
}
