//! Assets as synthetic modules: a `require('./icon.png')` edge turns into a
//! module whose factory registers the asset's metadata with the runtime
//! asset registrar.

use std::{
    fs,
    path::{Path, PathBuf},
};

use data_encoding::HEXLOWER;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::{
    error::BuildError,
    transformer::{Dependency, DependencyKind, ImageProber},
};

/// Metadata handed to the runtime asset registrar. Field names follow the
/// registrar's wire format.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssetInfo {
    #[serde(rename = "__packager_asset")]
    pub packager_asset: bool,
    pub file_path: String,
    /// `/assets` joined with the asset directory relative to the project
    /// root, forward slashes, possibly containing `..` segments for files
    /// outside the root.
    pub http_server_location: String,
    pub width: u32,
    pub height: u32,
    pub scales: Vec<f32>,
    pub hash: String,
    pub name: String,
    #[serde(rename = "type")]
    pub asset_type: String,
}

/// Compute an asset's metadata from its file. `path` may itself be a scale
/// variant (`logo@2x.png`); the logical name strips the suffix.
pub fn build_asset_info(
    path: &Path,
    root: &Path,
    prober: &dyn ImageProber,
) -> Result<AssetInfo, BuildError> {
    let bytes = fs::read(path).map_err(|e| BuildError::io(path, e))?;
    let asset_type = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default()
        .to_string();
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or_default();
    let name = strip_scale_suffix(stem).to_string();

    let dir = path.parent().unwrap_or(Path::new("/"));
    let dimensions = prober.probe(path);

    Ok(AssetInfo {
        packager_asset: true,
        file_path: path.to_string_lossy().into_owned(),
        http_server_location: http_server_location(dir, root),
        width: dimensions.width,
        height: dimensions.height,
        scales: discover_scales(dir, &name, &asset_type),
        hash: file_hash(&bytes),
        name,
        asset_type,
    })
}

/// The synthetic source of an asset module. With a resolvable registrar the
/// factory registers the metadata; without one (warned about by the caller)
/// it degrades to exporting the raw metadata object.
pub fn synthesize_asset_source(info: &AssetInfo, registry_specifier: Option<&str>) -> String {
    let metadata = serde_json::to_string(info).expect("asset metadata serializes");
    match registry_specifier {
        Some(specifier) => {
            format!("module.exports = require(\"{specifier}\").registerAsset({metadata});")
        }
        None => format!("module.exports = {metadata};"),
    }
}

/// The dependency list of an asset module: just the registrar, when known.
pub fn asset_dependencies(registry_specifier: Option<&str>) -> Vec<Dependency> {
    registry_specifier
        .map(|specifier| Dependency {
            specifier: specifier.to_string(),
            kind: DependencyKind::Require,
        })
        .into_iter()
        .collect()
}

fn http_server_location(dir: &Path, root: &Path) -> String {
    let relative = pathdiff::diff_paths(dir, root).unwrap_or_else(|| dir.to_path_buf());
    let mut location = String::from("/assets");
    for component in relative.components() {
        let part = component.as_os_str().to_string_lossy();
        if part.is_empty() {
            continue;
        }
        location.push('/');
        location.push_str(&part);
    }
    location
}

/// Which scale variants exist next to the asset. The plain file counts as
/// scale 1; with no findings at all the default is `[1]`.
fn discover_scales(dir: &Path, name: &str, ext: &str) -> Vec<f32> {
    let mut scales: Vec<f32> = Vec::new();
    if dir.join(format!("{name}.{ext}")).is_file() {
        scales.push(1.0);
    }
    if let Ok(entries) = fs::read_dir(dir) {
        for entry in entries.flatten() {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            let Some(rest) = file_name.strip_prefix(name).and_then(|r| r.strip_prefix('@'))
            else {
                continue;
            };
            let Some(scale) = rest
                .strip_suffix(ext)
                .and_then(|r| r.strip_suffix('.'))
                .and_then(|r| r.strip_suffix('x'))
                .and_then(|r| r.parse::<f32>().ok())
            else {
                continue;
            };
            scales.push(scale);
        }
    }
    scales.sort_by(f32::total_cmp);
    scales.dedup();
    if scales.is_empty() {
        scales.push(1.0);
    }
    scales
}

fn strip_scale_suffix(stem: &str) -> &str {
    match stem.rfind('@') {
        Some(at) if stem[at + 1..].ends_with('x') => {
            let scale = &stem[at + 1..stem.len() - 1];
            if !scale.is_empty() && scale.chars().all(|c| c.is_ascii_digit() || c == '.') {
                &stem[..at]
            } else {
                stem
            }
        }
        _ => stem,
    }
}

fn file_hash(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    HEXLOWER.encode(&digest)[..16].to_string()
}

/// Where an asset module's file lives, for dev-server lookups keyed by
/// `httpServerLocation`.
pub fn asset_location_to_path(root: &Path, location: &str) -> PathBuf {
    let relative = location.strip_prefix("/assets").unwrap_or(location);
    let relative = relative.strip_prefix('/').unwrap_or(relative);
    root.join(relative)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transformer::NullImageProber;

    #[test]
    fn root_level_asset_serves_from_assets_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("icon.png"), b"not really a png").unwrap();

        let info = build_asset_info(&root.join("icon.png"), root, &NullImageProber).unwrap();
        assert_eq!(info.http_server_location, "/assets");
        assert_eq!(info.name, "icon");
        assert_eq!(info.asset_type, "png");
        assert_eq!(info.scales, vec![1.0]);
        assert_eq!(info.hash.len(), 16);
    }

    #[test]
    fn nested_asset_keeps_its_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("img/logos")).unwrap();
        fs::write(root.join("img/logos/brand.png"), b"png").unwrap();

        let info =
            build_asset_info(&root.join("img/logos/brand.png"), root, &NullImageProber).unwrap();
        assert_eq!(info.http_server_location, "/assets/img/logos");
    }

    #[test]
    fn scale_variants_are_discovered_and_name_is_logical() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("logo.png"), b"1x").unwrap();
        fs::write(root.join("logo@2x.png"), b"2x").unwrap();
        fs::write(root.join("logo@3x.png"), b"3x").unwrap();

        let info = build_asset_info(&root.join("logo@2x.png"), root, &NullImageProber).unwrap();
        assert_eq!(info.name, "logo");
        assert_eq!(info.scales, vec![1.0, 2.0, 3.0]);
    }

    #[test]
    fn synthesized_source_registers_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::write(root.join("icon.png"), b"png").unwrap();
        let info = build_asset_info(&root.join("icon.png"), root, &NullImageProber).unwrap();

        let source = synthesize_asset_source(&info, Some("asset-registry"));
        assert!(source.starts_with("module.exports = require(\"asset-registry\").registerAsset({"));
        assert!(source.contains("\"httpServerLocation\":\"/assets\""));
        assert!(source.contains("\"name\":\"icon\""));
        assert!(source.contains("\"type\":\"png\""));

        let fallback = synthesize_asset_source(&info, None);
        assert!(fallback.starts_with("module.exports = {"));
    }
}
