use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
    sync::Arc,
    time::Duration,
};

use anyhow::bail;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// The platform a bundle is produced for. Drives resolution of
/// `<stem>.<platform>.<ext>` variants and the transformer's platform
/// constant inlining.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
    Web,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "ios" => Platform::Ios,
            "android" => Platform::Android,
            "web" => Platform::Web,
            _ => bail!("unknown platform {s:?}, expected one of ios, android, web"),
        })
    }
}

/// Options consumed by the resolver.
#[derive(Clone, Debug)]
pub struct ResolverOptions {
    /// Extensions tried for source files, in priority order (without dots).
    pub source_exts: Vec<String>,
    /// Extensions recognized as assets (without dots).
    pub asset_exts: Vec<String>,
    /// Additional `node_modules` roots searched after walking up from the
    /// referrer. Useful in monorepos where packages are hoisted.
    pub node_modules_paths: Vec<PathBuf>,
    /// Whether `<stem>.native.<ext>` is tried between the platform variant
    /// and the plain file.
    pub prefer_native_platform: bool,
    /// Specifier of the module asset factories are registered with.
    pub asset_registry_path: String,
}

impl Default for ResolverOptions {
    fn default() -> Self {
        Self {
            source_exts: ["js", "jsx", "ts", "tsx", "json"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            asset_exts: [
                "png", "jpg", "jpeg", "gif", "webp", "bmp", "svg", "ttf", "otf", "mp3", "mp4",
                "wav", "webm", "zip",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            node_modules_paths: Vec::new(),
            prefer_native_platform: true,
            asset_registry_path: "@react-native/assets-registry/registry".to_string(),
        }
    }
}

/// Predicate deciding whether a module lands on the source map's
/// `x_google_ignoreList`. Wrapped so the options struct stays `Clone` and
/// `Debug`.
#[derive(Clone)]
pub struct IgnoreListPredicate(pub Arc<dyn Fn(&Path) -> bool + Send + Sync>);

impl IgnoreListPredicate {
    pub fn matches(&self, path: &Path) -> bool {
        (self.0)(path)
    }
}

impl fmt::Debug for IgnoreListPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("IgnoreListPredicate(..)")
    }
}

/// Options consumed by the serializer.
#[derive(Clone, Debug, Default)]
pub struct SerializerOptions {
    /// Emit the source map as a base64 `data:` URL comment instead of an
    /// external `.map` reference.
    pub inline_source_map: bool,
    /// Core polyfill files wrapped as modules ahead of all user modules.
    pub polyfills: Vec<PathBuf>,
    /// Extra `var <name>=<value>;` definitions added to the prelude. Values
    /// are serialized as JSON, so strings come out quoted.
    pub extra_vars: IndexMap<String, serde_json::Value>,
    /// Prefix applied to the `__d`/`__r` runtime globals.
    pub global_prefix: String,
    /// Modules required (in order) before the entry module, when present in
    /// the graph. Paths are relative to the project root.
    pub run_before_main_module: Vec<PathBuf>,
    /// When set, each module (and the prelude) is tested against this to
    /// populate `x_google_ignoreList`.
    pub should_add_to_ignore_list: Option<IgnoreListPredicate>,
    /// Emit `sources` entries relative to the project root instead of
    /// absolute paths.
    pub server_relative_sources: bool,
}

/// Options consumed by the dev server.
#[derive(Clone, Debug)]
pub struct ServerOptions {
    pub port: u16,
    /// Keep-alive applied to accepted connections.
    pub idle_timeout: Duration,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            port: 8081,
            idle_timeout: Duration::from_secs(120),
        }
    }
}

/// Options consumed by the file watcher.
#[derive(Clone, Debug)]
pub struct WatcherOptions {
    /// Quiescence window before a batch of changed paths is flushed.
    pub debounce: Duration,
}

impl Default for WatcherOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(300),
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ExperimentalOptions {
    /// Prune modules (and optionally exports) unreachable from the entry.
    /// Only applies to production builds.
    pub tree_shaking: bool,
}

/// The frozen configuration the core operates on. CLI and config-file
/// parsing happen outside the core; by the time a `Config` reaches a build
/// it is not mutated again.
#[derive(Clone, Debug)]
pub struct Config {
    pub platform: Platform,
    pub dev: bool,
    /// Project root. All relative paths and server-relative names are
    /// anchored here.
    pub root: PathBuf,
    /// Entry source file, relative to `root`.
    pub entry: PathBuf,
    pub resolver: ResolverOptions,
    pub serializer: SerializerOptions,
    pub server: ServerOptions,
    pub watcher: WatcherOptions,
    pub experimental: ExperimentalOptions,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>, entry: impl Into<PathBuf>) -> Self {
        let root = root.into();
        // the canonical root keeps relative verbose names stable even when
        // the configured path goes through symlinks
        let root = dunce::canonicalize(&root).unwrap_or(root);
        Self {
            platform: Platform::Ios,
            dev: true,
            root,
            entry: entry.into(),
            resolver: ResolverOptions::default(),
            serializer: SerializerOptions::default(),
            server: ServerOptions::default(),
            watcher: WatcherOptions::default(),
            experimental: ExperimentalOptions::default(),
        }
    }

    /// Absolute path of the entry file.
    pub fn entry_path(&self) -> PathBuf {
        self.root.join(&self.entry)
    }

    /// A copy of this config targeting a different platform. Used by the dev
    /// server, which maintains one build state per requested platform.
    pub fn for_platform(&self, platform: Platform) -> Self {
        let mut config = self.clone();
        config.platform = platform;
        config
    }

    /// The `NODE_ENV` value bundles advertise.
    pub fn node_env(&self) -> &'static str {
        if self.dev { "development" } else { "production" }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_round_trip() {
        for p in [Platform::Ios, Platform::Android, Platform::Web] {
            assert_eq!(p.as_str().parse::<Platform>().unwrap(), p);
        }
        assert!("macos".parse::<Platform>().is_err());
    }

    #[test]
    fn entry_path_is_rooted() {
        let config = Config::new("/proj", "src/index.js");
        assert_eq!(config.entry_path(), PathBuf::from("/proj/src/index.js"));
    }
}
