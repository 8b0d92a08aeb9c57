//! Specifier resolution: relative requests with platform/native variants,
//! asset recognition, directory indexes, and the `node_modules` walk for
//! bare specifiers.
//!
//! Resolution is purely lexical + `stat`-driven; nothing here reads module
//! sources. The resolver is cheap to clone and carries no mutable state.

use std::{
    fs,
    path::{Component, Path, PathBuf},
};

use serde::Deserialize;
use tracing::trace;

use crate::config::{Config, Platform, ResolverOptions};

/// Resolution failure. The caller decides whether this is a warning (dev:
/// the edge is dropped) or fatal (production).
#[derive(Clone, Debug)]
pub struct NotResolved {
    pub specifier: String,
    pub from: PathBuf,
}

impl std::fmt::Display for NotResolved {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unable to resolve '{}' from '{}'",
            self.specifier,
            self.from.display()
        )
    }
}

impl std::error::Error for NotResolved {}

#[derive(Clone, Debug)]
pub struct Resolver {
    options: ResolverOptions,
    platform: Platform,
    root: PathBuf,
}

impl Resolver {
    pub fn new(config: &Config) -> Self {
        Self {
            options: config.resolver.clone(),
            platform: config.platform,
            root: config.root.clone(),
        }
    }

    pub fn options(&self) -> &ResolverOptions {
        &self.options
    }

    /// Map `specifier`, as written in `referrer`, to a canonical absolute
    /// path on disk.
    pub fn resolve(&self, specifier: &str, referrer: &Path) -> Result<PathBuf, NotResolved> {
        let not_resolved = || NotResolved {
            specifier: specifier.to_string(),
            from: referrer.to_path_buf(),
        };

        let resolved = if specifier.starts_with("./") || specifier.starts_with("../") {
            let base = normalize(&referrer.parent().unwrap_or(Path::new("/")).join(specifier));
            self.resolve_file_or_dir(&base)
        } else if Path::new(specifier).is_absolute() {
            self.resolve_file_or_dir(&normalize(Path::new(specifier)))
        } else {
            self.resolve_bare(specifier, referrer)
        };

        match resolved {
            Some(path) => {
                trace!(specifier, resolved = %path.display(), "resolved");
                Ok(canonical(&path))
            }
            None => Err(not_resolved()),
        }
    }

    /// Whether a path has an extension the resolver treats as an asset.
    pub fn is_asset_path(&self, path: &Path) -> bool {
        path.extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| self.options.asset_exts.iter().any(|a| a == ext))
    }

    fn resolve_file_or_dir(&self, base: &Path) -> Option<PathBuf> {
        self.resolve_as_file(base)
            .or_else(|| self.resolve_as_asset(base))
            .or_else(|| self.resolve_as_index(base))
    }

    /// Steps 1–2 of the relative algorithm: the file itself (when the
    /// specifier already carries a source extension) or each source
    /// extension, always trying the platform variant, then `.native`, then
    /// the plain name.
    fn resolve_as_file(&self, base: &Path) -> Option<PathBuf> {
        if let Some(ext) = base.extension().and_then(|e| e.to_str()) {
            if self.options.source_exts.iter().any(|s| s == ext) {
                return self.try_variants_of(base);
            }
        }
        let file_name = base.file_name()?.to_str()?;
        for ext in &self.options.source_exts {
            let candidate = base.with_file_name(format!("{file_name}.{ext}"));
            if let Some(found) = self.try_variants_of(&candidate) {
                return Some(found);
            }
        }
        None
    }

    /// `dir/foo.js` → `dir/foo.<platform>.js`, `dir/foo.native.js` (when
    /// enabled), `dir/foo.js`; first hit wins. A hit on a Flow-only file is
    /// redirected once to the stripped name.
    fn try_variants_of(&self, path: &Path) -> Option<PathBuf> {
        let suffixed = |suffix: &str| -> Option<PathBuf> {
            let stem = path.file_stem()?.to_str()?;
            let ext = path.extension()?.to_str()?;
            Some(path.with_file_name(format!("{stem}.{suffix}.{ext}")))
        };

        let mut candidates = Vec::with_capacity(3);
        if let Some(platform) = suffixed(self.platform.as_str()) {
            candidates.push(platform);
        }
        if self.options.prefer_native_platform {
            if let Some(native) = suffixed("native") {
                candidates.push(native);
            }
        }
        candidates.push(path.to_path_buf());

        for candidate in candidates {
            if let Some(found) = self.try_file(&candidate) {
                return Some(found);
            }
        }
        None
    }

    fn try_file(&self, path: &Path) -> Option<PathBuf> {
        if !path.is_file() {
            return None;
        }
        // Flow-only files are never returned: `foo.flow.js` redirects to
        // `foo.js`, a bare `foo.flow` to `foo`.
        let name = path.file_name()?.to_str()?;
        if let Some(stripped) = name
            .strip_suffix(".flow.js")
            .map(|stem| format!("{stem}.js"))
            .or_else(|| name.strip_suffix(".flow").map(|stem| stem.to_string()))
        {
            let redirected = path.with_file_name(stripped);
            return redirected.is_file().then_some(redirected);
        }
        Some(path.to_path_buf())
    }

    /// Step 3: asset extensions. An exact hit wins; otherwise a scale
    /// variant (`icon@2x.png`) of the requested name is accepted, smallest
    /// scale first.
    fn resolve_as_asset(&self, base: &Path) -> Option<PathBuf> {
        let has_asset_ext = self.is_asset_path(base);
        if has_asset_ext {
            if base.is_file() {
                return Some(base.to_path_buf());
            }
            return self.best_scale_variant(base);
        }
        let file_name = base.file_name()?.to_str()?;
        for ext in &self.options.asset_exts {
            let candidate = base.with_file_name(format!("{file_name}.{ext}"));
            if candidate.is_file() {
                return Some(candidate);
            }
        }
        None
    }

    fn best_scale_variant(&self, base: &Path) -> Option<PathBuf> {
        let stem = base.file_stem()?.to_str()?;
        let ext = base.extension()?.to_str()?;
        let dir = base.parent()?;
        let mut variants: Vec<(f32, PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir).ok()? {
            let entry = entry.ok()?;
            let name = entry.file_name();
            let name = name.to_str()?;
            if let Some(scale) = parse_scale_suffix(name, stem, ext) {
                variants.push((scale, entry.path()));
            }
        }
        variants.sort_by(|a, b| a.0.total_cmp(&b.0));
        variants.into_iter().next().map(|(_, path)| path)
    }

    /// Step 4: treat the request as a directory and look for an index file
    /// with the same extension priority.
    fn resolve_as_index(&self, base: &Path) -> Option<PathBuf> {
        if !base.is_dir() {
            return None;
        }
        self.resolve_as_file(&base.join("index"))
    }

    /// Bare specifiers: walk up candidate `node_modules` roots from the
    /// referrer, then the configured extra paths, then the project root.
    fn resolve_bare(&self, specifier: &str, referrer: &Path) -> Option<PathBuf> {
        let mut roots: Vec<PathBuf> = Vec::new();
        let mut dir = referrer.parent();
        while let Some(d) = dir {
            roots.push(d.join("node_modules"));
            dir = d.parent();
        }
        for extra in &self.options.node_modules_paths {
            roots.push(extra.clone());
        }
        roots.push(self.root.join("node_modules"));
        roots.dedup();

        for root in roots {
            if !root.is_dir() {
                continue;
            }
            let base = root.join(specifier);
            if let Some(found) = self
                .resolve_as_file(&base)
                .or_else(|| self.resolve_as_asset(&base))
                .or_else(|| self.resolve_from_package_json(&base))
                .or_else(|| self.resolve_as_index(&base))
            {
                return Some(found);
            }
        }
        None
    }

    /// `<pkg>/package.json`'s `main` (then `module`) field, with platform
    /// variants applied to the target.
    fn resolve_from_package_json(&self, pkg_dir: &Path) -> Option<PathBuf> {
        #[derive(Deserialize)]
        struct PackageJson {
            main: Option<String>,
            module: Option<String>,
        }

        let manifest_path = pkg_dir.join("package.json");
        let manifest: PackageJson =
            serde_json::from_str(&fs::read_to_string(manifest_path).ok()?).ok()?;
        for field in [manifest.main, manifest.module].into_iter().flatten() {
            let target = normalize(&pkg_dir.join(field));
            if let Some(found) = self
                .resolve_as_file(&target)
                .or_else(|| self.resolve_as_index(&target))
            {
                return Some(found);
            }
        }
        None
    }
}

/// `icon@2x.png` matched against stem `icon`, ext `png` → `2.0`.
fn parse_scale_suffix(file_name: &str, stem: &str, ext: &str) -> Option<f32> {
    let rest = file_name.strip_prefix(stem)?.strip_prefix('@')?;
    let rest = rest.strip_suffix(ext)?.strip_suffix('.')?;
    rest.strip_suffix('x')?.parse().ok()
}

/// Lexical normalization: collapses `.` and `..` without touching the
/// filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other),
        }
    }
    out
}

/// Canonical form used as module identity. Falls back to the lexically
/// normalized path when the file vanished between resolution and
/// canonicalization.
pub fn canonical(path: &Path) -> PathBuf {
    dunce::canonicalize(path).unwrap_or_else(|_| normalize(path))
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;
    use crate::config::Config;

    fn write(root: &Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn resolver_for(root: &Path, platform: Platform) -> Resolver {
        let mut config = Config::new(root, "index.js");
        config.platform = platform;
        Resolver::new(&config)
    }

    #[test]
    fn platform_variant_wins_over_generic() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "");
        write(root, "platform.js", "generic");
        write(root, "platform.ios.js", "ios");

        let resolver = resolver_for(root, Platform::Ios);
        let resolved = resolver
            .resolve("./platform", &root.join("index.js"))
            .unwrap();
        assert!(resolved.ends_with("platform.ios.js"));

        let resolver = resolver_for(root, Platform::Android);
        let resolved = resolver
            .resolve("./platform", &root.join("index.js"))
            .unwrap();
        assert!(resolved.ends_with("platform.js"));
    }

    #[test]
    fn native_variant_sits_between_platform_and_plain() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "");
        write(root, "mod.native.js", "");
        write(root, "mod.js", "");

        let resolver = resolver_for(root, Platform::Android);
        let resolved = resolver.resolve("./mod", &root.join("index.js")).unwrap();
        assert!(resolved.ends_with("mod.native.js"));

        let mut config = Config::new(root, "index.js");
        config.resolver.prefer_native_platform = false;
        let resolver = Resolver::new(&config);
        let resolved = resolver.resolve("./mod", &root.join("index.js")).unwrap();
        assert!(resolved.ends_with("mod.js"));
    }

    #[test]
    fn explicit_extension_still_honors_platform() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "");
        write(root, "a.js", "");
        write(root, "a.ios.js", "");

        let resolver = resolver_for(root, Platform::Ios);
        let resolved = resolver.resolve("./a.js", &root.join("index.js")).unwrap();
        assert!(resolved.ends_with("a.ios.js"));
    }

    #[test]
    fn directory_index_is_last_resort() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "");
        write(root, "lib/index.ts", "");

        let resolver = resolver_for(root, Platform::Ios);
        let resolved = resolver.resolve("./lib", &root.join("index.js")).unwrap();
        assert!(resolved.ends_with("lib/index.ts") || resolved.ends_with("lib\\index.ts"));
    }

    #[test]
    fn bare_specifier_walks_node_modules() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "src/app.js", "");
        write(root, "node_modules/left-pad/package.json", r#"{"main": "lib/pad.js"}"#);
        write(root, "node_modules/left-pad/lib/pad.js", "");

        let resolver = resolver_for(root, Platform::Ios);
        let resolved = resolver
            .resolve("left-pad", &root.join("src/app.js"))
            .unwrap();
        assert!(resolved.ends_with("pad.js"));
    }

    #[test]
    fn bare_specifier_subpath_and_index() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "app.js", "");
        write(root, "node_modules/pkg/util/index.js", "");

        let resolver = resolver_for(root, Platform::Ios);
        let resolved = resolver.resolve("pkg/util", &root.join("app.js")).unwrap();
        assert!(resolved.to_string_lossy().contains("pkg"));
        assert!(resolved.ends_with("index.js"));
    }

    #[test]
    fn flow_files_are_never_returned() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "");
        write(root, "typed.flow.js", "");
        write(root, "typed.js", "");

        let resolver = resolver_for(root, Platform::Ios);
        // `typed.js` is found first by extension priority; force the flow hit
        let resolved = resolver
            .resolve("./typed.flow.js", &root.join("index.js"))
            .unwrap();
        assert!(resolved.ends_with("typed.js"));
    }

    #[test]
    fn asset_extensions_resolve() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "");
        write(root, "icon.png", "png");

        let resolver = resolver_for(root, Platform::Ios);
        let resolved = resolver
            .resolve("./icon.png", &root.join("index.js"))
            .unwrap();
        assert!(resolved.ends_with("icon.png"));
    }

    #[test]
    fn asset_scale_variant_fills_in() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "");
        write(root, "logo@2x.png", "png");

        let resolver = resolver_for(root, Platform::Ios);
        let resolved = resolver
            .resolve("./logo.png", &root.join("index.js"))
            .unwrap();
        assert!(resolved.ends_with("logo@2x.png"));
    }

    #[test]
    fn unresolvable_reports_specifier_and_referrer() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "");

        let resolver = resolver_for(root, Platform::Ios);
        let err = resolver
            .resolve("./missing", &root.join("index.js"))
            .unwrap_err();
        assert_eq!(err.specifier, "./missing");
    }
}
