//! HTTP surface of the dev server.
//!
//! Endpoints: `*.bundle[.js]` and `*.map` per platform, `/status[.txt]`,
//! `/open-url`, asset bytes under `/assets/…` and `/node_modules/…`, and
//! the `/hot` WebSocket upgrade.

use std::{
    convert::Infallible,
    future::Future,
    net::{Ipv4Addr, SocketAddr},
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::{Context, Result};
use hyper::{
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, StatusCode,
};
use metropack_core::{
    config::{Config, Platform},
    resolve::normalize,
};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Deserialize;
use tracing::{info, instrument, warn};

use crate::{
    build_owner::{spawn_owner, BuildOwnerHandle},
    hmr::{serve_websocket, ClientRegistry},
    watcher::spawn_watcher,
};

pub struct ServerState {
    config: Config,
    owners: Mutex<FxHashMap<(Platform, bool), BuildOwnerHandle>>,
    pub clients: Arc<ClientRegistry>,
}

impl ServerState {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            owners: Mutex::new(FxHashMap::default()),
            clients: Arc::new(ClientRegistry::new()),
        }
    }

    /// The build owner for one `(platform, dev)` pair, spawned on first
    /// use. Owners are never shared across platforms, so responses cannot
    /// coalesce across them either.
    pub fn owner_for(&self, platform: Platform, dev: bool) -> BuildOwnerHandle {
        let mut owners = self.owners.lock();
        owners
            .entry((platform, dev))
            .or_insert_with(|| {
                let mut config = self.config.for_platform(platform);
                config.dev = dev;
                spawn_owner(config, self.clients.clone())
            })
            .clone()
    }

    pub fn all_owners(&self) -> Vec<BuildOwnerHandle> {
        self.owners.lock().values().cloned().collect()
    }
}

/// Query parameters of bundle and map requests.
#[derive(Debug, Default, Deserialize)]
struct BundleQuery {
    platform: Option<String>,
    dev: Option<bool>,
}

/// Serve until `shutdown` resolves. Teardown order: stop accepting and
/// drain in-flight requests, stop the watcher, close the hot sockets, then
/// drain the build owners.
pub async fn run_server(config: Config, shutdown: impl Future<Output = ()>) -> Result<()> {
    let state = Arc::new(ServerState::new(config.clone()));

    let watcher_state = state.clone();
    let watcher = spawn_watcher(
        config.root.clone(),
        config.watcher.debounce,
        Arc::new(move |paths: Vec<PathBuf>| {
            for owner in watcher_state.all_owners() {
                owner.files_changed_blocking(paths.clone());
            }
        }),
    );
    let watcher = match watcher {
        Ok(handle) => Some(handle),
        Err(error) => {
            // keep serving; bundles still build on demand, they just will
            // not invalidate on file changes
            warn!(%error, "file watching disabled");
            None
        }
    };

    let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, config.server.port));
    let svc_state = state.clone();
    let make_svc = make_service_fn(move |_conn| {
        let state = svc_state.clone();
        async move {
            Ok::<_, Infallible>(service_fn(move |req| {
                let state = state.clone();
                async move { Ok::<_, Infallible>(handle_request(state, req).await) }
            }))
        }
    });

    let server = hyper::Server::try_bind(&addr)
        .with_context(|| format!("binding {addr}"))?
        .tcp_keepalive(Some(config.server.idle_timeout))
        .http1_keepalive(true)
        .serve(make_svc);
    info!(%addr, "dev server listening");

    server.with_graceful_shutdown(shutdown).await?;

    drop(watcher);
    state.clients.clear();
    for owner in state.all_owners() {
        owner.shutdown().await;
    }
    Ok(())
}

#[instrument(skip_all, fields(method = %req.method(), path = req.uri().path()))]
async fn handle_request(state: Arc<ServerState>, mut req: Request<Body>) -> Response<Body> {
    let path = req.uri().path().to_string();

    if hyper_tungstenite::is_upgrade_request(&req) && path.starts_with("/hot") {
        return match hyper_tungstenite::upgrade(&mut req, None) {
            Ok((response, websocket)) => {
                let clients = state.clients.clone();
                tokio::spawn(serve_websocket(websocket, clients));
                response
            }
            Err(error) => {
                warn!(%error, "websocket upgrade failed");
                text_response(StatusCode::BAD_REQUEST, "websocket upgrade failed")
            }
        };
    }

    match (req.method().clone(), path.as_str()) {
        (Method::GET, "/status") | (Method::GET, "/status.txt") => {
            text_response(StatusCode::OK, "packager-status:running")
        }
        (Method::POST, "/open-url") => open_url(req).await,
        (Method::GET, p) if p.ends_with(".bundle") || p.ends_with(".bundle.js") => {
            serve_bundle(state, &req).await
        }
        (Method::GET, p) if p.ends_with(".map") => serve_source_map(state, &req).await,
        (Method::GET, p) if p.starts_with("/assets/") || p.starts_with("/node_modules/") => {
            serve_asset(state, p).await
        }
        _ => text_response(StatusCode::NOT_FOUND, "not found"),
    }
}

fn bundle_query(req: &Request<Body>) -> BundleQuery {
    req.uri()
        .query()
        .and_then(|q| serde_qs::from_str(q).ok())
        .unwrap_or_default()
}

async fn serve_bundle(state: Arc<ServerState>, req: &Request<Body>) -> Response<Body> {
    let query = bundle_query(req);
    let platform = query
        .platform
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or(state.config.platform);
    let dev = query.dev.unwrap_or(state.config.dev);
    let owner = state.owner_for(platform, dev);

    match owner.bundle(Some(map_url_for(req))).await {
        Ok(bundle) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/javascript; charset=utf-8")
            .header("X-Metro-Revision-Id", &bundle.revision_id)
            .body(Body::from(bundle.code.clone()))
            .unwrap(),
        Err(message) => {
            // the error lands in a comment so the client logs something
            // useful instead of executing half a bundle
            let body = format!("// {}\n", message.replace('\n', "\n// "));
            Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(CONTENT_TYPE, "application/javascript; charset=utf-8")
                .body(Body::from(body))
                .unwrap()
        }
    }
}

/// `/index.bundle?platform=ios` → `/index.map?platform=ios`.
fn map_url_for(req: &Request<Body>) -> String {
    let path = req.uri().path();
    let stem = path
        .strip_suffix(".bundle.js")
        .or_else(|| path.strip_suffix(".bundle"))
        .unwrap_or(path);
    match req.uri().query() {
        Some(query) => format!("{stem}.map?{query}"),
        None => format!("{stem}.map"),
    }
}

async fn serve_source_map(state: Arc<ServerState>, req: &Request<Body>) -> Response<Body> {
    let query = bundle_query(req);
    let platform = query
        .platform
        .as_deref()
        .and_then(|p| p.parse().ok())
        .unwrap_or(state.config.platform);
    let dev = query.dev.unwrap_or(state.config.dev);
    let map = state
        .owner_for(platform, dev)
        .source_map()
        .await
        .unwrap_or_else(|| "{}".to_string());
    Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "application/json; charset=utf-8")
        .body(Body::from(map))
        .unwrap()
}

async fn open_url(req: Request<Body>) -> Response<Body> {
    #[derive(Deserialize)]
    struct OpenUrlBody {
        url: String,
    }

    let bytes = match hyper::body::to_bytes(req.into_body()).await {
        Ok(bytes) => bytes,
        Err(_) => return text_response(StatusCode::BAD_REQUEST, "unreadable body"),
    };
    let Ok(body) = serde_json::from_slice::<OpenUrlBody>(&bytes) else {
        return text_response(StatusCode::BAD_REQUEST, "expected {\"url\": …}");
    };
    let result = tokio::task::spawn_blocking(move || webbrowser::open(&body.url)).await;
    match result {
        Ok(Ok(())) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"success":true}"#))
            .unwrap(),
        _ => text_response(StatusCode::INTERNAL_SERVER_ERROR, "could not open browser"),
    }
}

async fn serve_asset(state: Arc<ServerState>, request_path: &str) -> Response<Body> {
    let decoded = urlencoding::decode(request_path)
        .map(|d| d.into_owned())
        .unwrap_or_else(|_| request_path.to_string());

    let Some(file) = resolve_asset_request(&state.config, &decoded) else {
        return text_response(StatusCode::FORBIDDEN, "forbidden");
    };
    let Some(file) = find_asset_file(&file) else {
        return text_response(StatusCode::NOT_FOUND, "asset not found");
    };

    match tokio::fs::read(&file).await {
        Ok(bytes) => {
            let mime = mime_guess::from_path(&file).first_or_octet_stream();
            Response::builder()
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, mime.as_ref())
                .body(Body::from(bytes))
                .unwrap()
        }
        Err(_) => text_response(StatusCode::NOT_FOUND, "asset not found"),
    }
}

/// Map an asset URL path onto the filesystem and enforce that the result
/// stays inside the project root or a configured `node_modules` root.
///
/// Accepts both the raw `httpServerLocation` form (which may contain `..`
/// segments for monorepo assets) and the normalized form some HTTP clients
/// produce by collapsing them into a leading `/node_modules/…`.
fn resolve_asset_request(config: &Config, path: &str) -> Option<PathBuf> {
    let relative = path
        .strip_prefix("/assets/")
        .or_else(|| path.strip_prefix("/assets"))
        .unwrap_or(path)
        .trim_start_matches('/');

    let absolute = normalize(&config.root.join(relative));

    let mut allowed: Vec<&Path> = vec![config.root.as_path()];
    for extra in &config.resolver.node_modules_paths {
        allowed.push(extra.as_path());
    }
    allowed
        .iter()
        .any(|root| absolute.starts_with(root))
        .then_some(absolute)
}

/// The exact file, or a scale-suffix rewrite of it: `logo@2x.png` falls
/// back to `logo.png` and vice versa (picking the smallest scale present).
fn find_asset_file(path: &Path) -> Option<PathBuf> {
    if path.is_file() {
        return Some(path.to_path_buf());
    }
    let stem = path.file_stem()?.to_str()?;
    let ext = path.extension()?.to_str()?;
    let dir = path.parent()?;

    // requested with a scale suffix, stored without
    if let Some(at) = stem.rfind('@') {
        let plain = dir.join(format!("{}.{ext}", &stem[..at]));
        if plain.is_file() {
            return Some(plain);
        }
    }

    // requested plain, stored with scale suffixes
    let mut variants: Vec<(f32, PathBuf)> = Vec::new();
    for entry in std::fs::read_dir(dir).ok()?.flatten() {
        let name = entry.file_name();
        let name = name.to_str()?.to_string();
        let Some(rest) = name.strip_prefix(stem).and_then(|r| r.strip_prefix('@')) else {
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
        variants.push((scale, entry.path()));
    }
    variants.sort_by(|a, b| a.0.total_cmp(&b.0));
    variants.into_iter().next().map(|(_, path)| path)
}

fn text_response(status: StatusCode, body: &str) -> Response<Body> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body.to_string()))
        .unwrap()
}
