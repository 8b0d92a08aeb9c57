//! The per-platform build owner: a task that exclusively owns the
//! `BuildState` for one platform and serializes every mutation of it.
//!
//! Requests queue on the owner's channel. Because processing is strictly
//! serial, a bundle request that arrives while a build is running simply
//! waits for it and is then answered from the fresh cache — in-flight
//! builds are never duplicated, and HMR cycles go out in exact
//! file-change-batch arrival order.

use std::{path::PathBuf, sync::Arc};

use anyhow::Result;
use metropack_core::{
    config::Config,
    delta::{inverse_closure_ids, BuildState, Delta, DeltaEngine},
    graph_builder::GraphBuilder,
    transformer::ExportUsage,
};
use metropack_ecmascript::{
    serialize::{hmr_module_source, serialize_bundle, SerializeOptions},
    transform::DefaultTransformer,
    tree_shake::shake,
};
use metropack_hmr_protocol::{ErrorBody, HmrModule, ServerMessage, UpdateBody, UpdateStartBody};
use metropack_image::ImageSizeProber;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, instrument, warn};

use crate::hmr::ClientRegistry;

/// A successfully serialized bundle, shared with every waiting requester.
pub struct BuiltBundle {
    pub code: String,
    pub map_json: String,
    pub revision_id: String,
}

enum OwnerRequest {
    Bundle {
        /// `sourceMappingURL` the serialized bundle should reference.
        map_url: Option<String>,
        respond: oneshot::Sender<Result<Arc<BuiltBundle>, String>>,
    },
    SourceMap {
        respond: oneshot::Sender<Option<String>>,
    },
    FilesChanged {
        paths: Vec<PathBuf>,
    },
    Shutdown {
        respond: oneshot::Sender<()>,
    },
}

#[derive(Clone)]
pub struct BuildOwnerHandle {
    tx: mpsc::Sender<OwnerRequest>,
}

impl BuildOwnerHandle {
    pub async fn bundle(&self, map_url: Option<String>) -> Result<Arc<BuiltBundle>, String> {
        let (respond, rx) = oneshot::channel();
        self.tx
            .send(OwnerRequest::Bundle { map_url, respond })
            .await
            .map_err(|_| "build owner is gone".to_string())?;
        rx.await.map_err(|_| "build owner dropped the request".to_string())?
    }

    pub async fn source_map(&self) -> Option<String> {
        let (respond, rx) = oneshot::channel();
        self.tx.send(OwnerRequest::SourceMap { respond }).await.ok()?;
        rx.await.ok()?
    }

    /// Called from the watcher thread; blocks until the owner accepts the
    /// batch so arrival order is preserved.
    pub fn files_changed_blocking(&self, paths: Vec<PathBuf>) {
        let _ = self.tx.blocking_send(OwnerRequest::FilesChanged { paths });
    }

    pub async fn files_changed(&self, paths: Vec<PathBuf>) {
        let _ = self.tx.send(OwnerRequest::FilesChanged { paths }).await;
    }

    /// Drains queued requests, then stops the owner task.
    pub async fn shutdown(&self) {
        let (respond, rx) = oneshot::channel();
        if self.tx.send(OwnerRequest::Shutdown { respond }).await.is_ok() {
            let _ = rx.await;
        }
    }
}

/// Spawn the owner task for one platform's config.
pub fn spawn_owner(config: Config, clients: Arc<ClientRegistry>) -> BuildOwnerHandle {
    let (tx, rx) = mpsc::channel(64);
    let owner = BuildOwner {
        engine: DeltaEngine::new(GraphBuilder::new(
            Arc::new(config.clone()),
            Arc::new(DefaultTransformer),
            Arc::new(ImageSizeProber),
        )),
        config,
        clients,
        state: None,
        cached: None,
        last_map: None,
    };
    tokio::spawn(owner.run(rx));
    BuildOwnerHandle { tx }
}

struct BuildOwner {
    config: Config,
    engine: DeltaEngine,
    clients: Arc<ClientRegistry>,
    state: Option<BuildState>,
    cached: Option<Arc<BuiltBundle>>,
    /// Map of the last successful serialization, kept even after cache
    /// invalidation so `/…​.map` always has something to serve.
    last_map: Option<String>,
}

impl BuildOwner {
    async fn run(mut self, mut rx: mpsc::Receiver<OwnerRequest>) {
        while let Some(request) = rx.recv().await {
            match request {
                OwnerRequest::Bundle { map_url, respond } => {
                    let result = self.bundle(map_url).await;
                    let _ = respond.send(result);
                }
                OwnerRequest::SourceMap { respond } => {
                    let _ = respond.send(self.last_map.clone());
                }
                OwnerRequest::FilesChanged { paths } => {
                    self.handle_changes(paths).await;
                }
                OwnerRequest::Shutdown { respond } => {
                    let _ = respond.send(());
                    break;
                }
            }
        }
    }

    #[instrument(skip_all, fields(platform = %self.config.platform))]
    async fn bundle(&mut self, map_url: Option<String>) -> Result<Arc<BuiltBundle>, String> {
        if let Some(cached) = &self.cached {
            return Ok(cached.clone());
        }
        match self.build(map_url).await {
            Ok(bundle) => {
                let bundle = Arc::new(bundle);
                self.cached = Some(bundle.clone());
                self.last_map = Some(bundle.map_json.clone());
                Ok(bundle)
            }
            Err(error) => {
                // the next request retries from scratch
                self.cached = None;
                Err(format!("{error:#}"))
            }
        }
    }

    async fn build(&mut self, map_url: Option<String>) -> Result<BuiltBundle> {
        if self.state.is_none() {
            let graph = self
                .engine
                .builder()
                .build(&self.config.entry_path())
                .await?;
            self.state = Some(BuildState::initial(graph));
            info!(
                platform = %self.config.platform,
                modules = self.state.as_ref().map(|s| s.graph.len()).unwrap_or(0),
                "full build complete"
            );
        }
        let state = self.state.as_ref().expect("state was just ensured");

        let mut usage: Option<FxHashMap<String, ExportUsage>> = None;
        let mut graph = state.graph.clone();
        if !self.config.dev && self.config.experimental.tree_shaking {
            usage = Some(shake(&mut graph, &self.config.root).usage);
        }

        let bundle = serialize_bundle(
            &graph,
            &SerializeOptions {
                config: &self.config,
                ids: state.ids.as_ref(),
                usage: usage.as_ref(),
                source_map_url: map_url,
            },
        )?;
        Ok(BuiltBundle {
            code: bundle.code,
            map_json: bundle.map.to_json(),
            revision_id: state.revision_id.clone(),
        })
    }

    /// One watched file-change batch: rebuild incrementally and push the
    /// complete `update-start` → `update` → `update-done` group, an `error`
    /// frame, or nothing when the batch had no effect.
    #[instrument(skip_all, fields(platform = %self.config.platform, changed = paths.len()))]
    async fn handle_changes(&mut self, paths: Vec<PathBuf>) {
        let Some(state) = self.state.take() else {
            // nothing built yet for this platform; drop the cache so the
            // next bundle request starts fresh
            self.cached = None;
            return;
        };

        match self.engine.incremental_build(&state, &paths).await {
            Ok((next, delta)) => {
                if delta.is_empty() {
                    self.state = Some(next);
                    return;
                }
                self.cached = None;
                match self.update_message(&next, &delta) {
                    Ok(update) => {
                        self.clients.broadcast(&ServerMessage::UpdateStart {
                            body: UpdateStartBody {
                                is_initial_update: false,
                            },
                        });
                        self.clients.broadcast(&update);
                        self.clients.broadcast(&ServerMessage::UpdateDone);
                    }
                    Err(error) => {
                        error!(%error, "failed to serialize HMR update");
                        self.send_error(&format!("{error:#}"));
                    }
                }
                self.state = Some(next);
            }
            Err(error) => {
                warn!(%error, "incremental build failed");
                self.send_error(&format!("{error:#}"));
                self.cached = None;
                // keep the previous state so the next batch retries on top
                // of a consistent snapshot
                self.state = Some(state);
            }
        }
    }

    fn update_message(&self, state: &BuildState, delta: &Delta) -> Result<ServerMessage> {
        let ids = state.ids.as_ref();
        let mut added = Vec::with_capacity(delta.added.len());
        for (path, module) in &delta.added {
            let closure = inverse_closure_ids(&state.graph, ids, path);
            let id = ids.id_for(path);
            added.push(HmrModule {
                module: (
                    id,
                    hmr_module_source(module, id, &state.graph, ids, &self.config, &closure)?,
                ),
            });
        }
        let mut modified = Vec::with_capacity(delta.modified.len());
        for (path, module) in &delta.modified {
            let closure = inverse_closure_ids(&state.graph, ids, path);
            let id = ids.id_for(path);
            modified.push(HmrModule {
                module: (
                    id,
                    hmr_module_source(module, id, &state.graph, ids, &self.config, &closure)?,
                ),
            });
        }
        let deleted = delta
            .deleted
            .iter()
            .filter_map(|path| state.ids.existing_id_for(path))
            .collect();

        Ok(ServerMessage::Update {
            body: UpdateBody {
                revision_id: state.revision_id.clone(),
                is_initial_update: false,
                added,
                modified,
                deleted,
            },
        })
    }

    fn send_error(&self, message: &str) {
        self.clients.broadcast(&ServerMessage::Error {
            body: ErrorBody {
                error_type: "BuildError".to_string(),
                message: message.to_string(),
                stack: None,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use metropack_hmr_protocol::ServerMessage;
    use tokio::sync::mpsc::unbounded_channel;

    use super::*;

    fn write(root: &std::path::Path, rel: &str, contents: &str) {
        let path = root.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[tokio::test]
    async fn bundle_is_cached_until_files_change() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "require('./leaf');");
        write(root, "leaf.js", "module.exports = 1;");

        let clients = Arc::new(ClientRegistry::new());
        let owner = spawn_owner(Config::new(root, "index.js"), clients);

        let first = owner.bundle(None).await.unwrap();
        let second = owner.bundle(None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        write(root, "leaf.js", "module.exports = 2;");
        owner.files_changed(vec![root.join("leaf.js")]).await;
        let third = owner.bundle(None).await.unwrap();
        assert!(!Arc::ptr_eq(&first, &third));
        assert!(third.code.contains("module.exports = 2;"));
        owner.shutdown().await;
    }

    #[tokio::test]
    async fn whitespace_edit_emits_one_modified_module() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "require('./leaf');");
        write(root, "leaf.js", "module.exports = 1;");

        let clients = Arc::new(ClientRegistry::new());
        let (tx, mut rx) = unbounded_channel();
        clients.insert(tx);

        let owner = spawn_owner(Config::new(root, "index.js"), clients);
        owner.bundle(None).await.unwrap();

        write(root, "leaf.js", "module.exports = 1; ");
        owner.files_changed(vec![root.join("leaf.js")]).await;
        // force the queue to drain
        owner.source_map().await;

        let start = rx.recv().await.unwrap();
        assert!(matches!(start, ServerMessage::UpdateStart { .. }));
        let update = rx.recv().await.unwrap();
        let ServerMessage::Update { body } = update else {
            panic!("expected update, got {update:?}");
        };
        assert_eq!(body.modified.len(), 1);
        assert!(body.modified[0].module.1.contains("leaf.js"));
        assert!(body.added.is_empty());
        assert!(body.deleted.is_empty());
        assert!(!body.revision_id.is_empty());
        let done = rx.recv().await.unwrap();
        assert!(matches!(done, ServerMessage::UpdateDone));
        owner.shutdown().await;
    }

    #[tokio::test]
    async fn ineffective_batch_is_silent() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "module.exports = 1;");

        let clients = Arc::new(ClientRegistry::new());
        let (tx, mut rx) = unbounded_channel();
        clients.insert(tx);

        let owner = spawn_owner(Config::new(root, "index.js"), clients);
        owner.bundle(None).await.unwrap();

        // same bytes: hash unchanged, no HMR traffic
        owner.files_changed(vec![root.join("index.js")]).await;
        owner.source_map().await;
        assert!(rx.try_recv().is_err());
        owner.shutdown().await;
    }

    #[tokio::test]
    async fn build_errors_reach_clients_as_error_frames() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        write(root, "index.js", "require('./leaf');");
        write(root, "leaf.js", "module.exports = 1;");

        let clients = Arc::new(ClientRegistry::new());
        let (tx, mut rx) = unbounded_channel();
        clients.insert(tx);

        let mut config = Config::new(root, "index.js");
        config.dev = false; // unresolved edges are fatal in production
        let owner = spawn_owner(config, clients);
        owner.bundle(None).await.unwrap();

        write(root, "index.js", "require('./does-not-exist');");
        owner.files_changed(vec![root.join("index.js")]).await;
        owner.source_map().await;

        let message = rx.recv().await.unwrap();
        let ServerMessage::Error { body } = message else {
            panic!("expected error frame, got {message:?}");
        };
        assert!(body.message.contains("does-not-exist"));
        owner.shutdown().await;
    }
}
