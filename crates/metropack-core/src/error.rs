use std::path::PathBuf;

use thiserror::Error;

/// The error kinds the core distinguishes. Everything else travels as a
/// plain [`anyhow::Error`].
///
/// Whether a kind is fatal depends on the mode: a failed resolution is a
/// warning in dev (the edge is dropped) and fatal in production builds; a
/// failed transform always fails the containing build, but in an HMR cycle
/// it is reported over the socket and the bundle cache is invalidated
/// instead of tearing the server down.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("entry file not found: {}", path.display())]
    EntryNotFound { path: PathBuf },

    #[error("unable to resolve module '{specifier}' from '{}'", from.display())]
    ResolveFailed { specifier: String, from: PathBuf },

    #[error("transform of {} failed: {detail}", path.display())]
    TransformFailed { path: PathBuf, detail: String },

    #[error("error reading {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("asset registry module could not be resolved (while bundling {})", asset.display())]
    AssetRegistrarMissing { asset: PathBuf },

    #[error("malformed client message: {detail}")]
    Protocol { detail: String },
}

impl BuildError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        BuildError::Io {
            path: path.into(),
            source,
        }
    }
}
